//! Bounding-volume hierarchy over scene primitives. Nodes live in a
//! contiguous arena and refer to their children by index, so traversal
//! walks a flat vector instead of chasing pointers. Construction is
//! selectable at runtime: surface-area-heuristic bucket partitioning,
//! or linear ordering along a Morton space-filling curve.

// std
use std::sync::Arc;
// lumen
use crate::core::common::{clamp_t, Float, EPS_D, INFINITY};
use crate::core::geometry::{Bounds3f, Ray, Vector3f};
use crate::core::primitive::{Intersection, Primitive};

const MAX_NUM_BUCKETS: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SplitMethod {
    Sah,
    Morton,
}

/// One arena entry. A node's bbox encloses every primitive in
/// `[start, start + range)`; children, when present, partition that
/// range. A node is a leaf iff both child indices are -1.
#[derive(Debug, Clone, Copy)]
pub struct BvhNode {
    pub bb: Bounds3f,
    pub start: usize,
    pub range: usize,
    pub l: i32,
    pub r: i32,
}

impl BvhNode {
    fn new(bb: Bounds3f, start: usize, range: usize) -> Self {
        BvhNode {
            bb,
            start,
            range,
            l: -1,
            r: -1,
        }
    }
    pub fn is_leaf(&self) -> bool {
        self.l < 0 && self.r < 0
    }
}

// work item for the SAH build stack: the node goes into `parent`'s
// left or right slot once allocated
struct SahBuildData {
    bb: Bounds3f,
    start: usize,
    range: usize,
    parent: i32,
    is_left: bool,
}

pub struct BVHAccel {
    pub primitives: Vec<Arc<dyn Primitive + Send + Sync>>,
    pub nodes: Vec<BvhNode>,
}

/// Expands a 10-bit integer into 30 bits by inserting 2 zeros after
/// each bit.
fn expand_bits(v: u32) -> u32 {
    let v = (v.wrapping_mul(0x0001_0001)) & 0xFF00_00FF;
    let v = (v.wrapping_mul(0x0000_0101)) & 0x0F00_F00F;
    let v = (v.wrapping_mul(0x0000_0011)) & 0xC30C_30C3;
    (v.wrapping_mul(0x0000_0005)) & 0x4924_9249
}

/// 30-bit Morton code for a point inside the unit cube.
fn morton3d(p: &Vector3f) -> u32 {
    let x: Float = clamp_t(p.x * 1024.0, 0.0, 1023.0);
    let y: Float = clamp_t(p.y * 1024.0, 0.0, 1023.0);
    let z: Float = clamp_t(p.z * 1024.0, 0.0, 1023.0);
    expand_bits(x as u32) * 4 + expand_bits(y as u32) * 2 + expand_bits(z as u32)
}

/// True when `v1` and `v2` differ at bit position `n`, counting from
/// the most significant bit of the 30-bit code (stored right-aligned
/// in 32 bits).
fn is_diff_at_bit(v1: u32, v2: u32, n: u32) -> bool {
    (v1 >> (31 - n)) != (v2 >> (31 - n))
}

/// Index of the last primitive of the left child for the sorted code
/// range `[start, end]`, i.e. the highest index that shares more than
/// the common prefix with `codes[start]`. `None` when every code in
/// the range is identical and the range must become a leaf.
fn find_split_position(codes: &[u32], start: usize, end: usize) -> Option<usize> {
    if start == end {
        return None;
    }
    // unsigned 32-bit arithmetic throughout: identical endpoint codes
    // give a leading-zero count of 32
    let common_prefix: u32 = (codes[start] ^ codes[end]).leading_zeros();
    if common_prefix == 32 {
        return None;
    }

    // binary search for where the next bit first differs
    let mut split: usize = start;
    let mut step: usize = end - start;
    loop {
        step = (step + 1) >> 1;
        let new_split: usize = split + step;
        if new_split < end && !is_diff_at_bit(codes[start], codes[new_split], common_prefix) {
            split = new_split;
        }
        if step <= 1 {
            break;
        }
    }
    Some(split)
}

impl BVHAccel {
    pub fn new(
        primitives: Vec<Arc<dyn Primitive + Send + Sync>>,
        max_leaf_size: usize,
        split_method: SplitMethod,
    ) -> Self {
        let mut accel: BVHAccel = BVHAccel {
            primitives,
            nodes: Vec::new(),
        };

        // a degenerate scene is legal: every query reports a miss
        if accel.primitives.is_empty() {
            return accel;
        }

        let mut bb: Bounds3f = Bounds3f::default();
        for p in &accel.primitives {
            bb.expand(&p.get_bbox());
        }

        match split_method {
            SplitMethod::Sah => accel.build_sah(bb, max_leaf_size.max(1)),
            SplitMethod::Morton => accel.build_morton(bb),
        }
        accel
    }

    pub fn get_bbox(&self) -> Bounds3f {
        if self.nodes.is_empty() {
            Bounds3f::default()
        } else {
            self.nodes[0].bb
        }
    }

    fn centroid_of(&self, i: usize) -> Vector3f {
        self.primitives[i].get_bbox().centroid()
    }

    // in-place partition of [start, start+range) by centroid along
    // `dim`; returns the size of the left side
    fn partition_by_centroid(
        &mut self,
        start: usize,
        range: usize,
        dim: usize,
        split_val: Float,
    ) -> usize {
        let mut a: usize = start;
        let mut b: usize = start + range;
        while a < b {
            if self.centroid_of(a)[dim] < split_val {
                a += 1;
            } else {
                b -= 1;
                self.primitives.swap(a, b);
            }
        }
        a - start
    }

    fn build_sah(&mut self, root_bb: Bounds3f, max_leaf_size: usize) {
        let n: usize = self.primitives.len();
        let mut bstack: Vec<SahBuildData> = Vec::new();
        bstack.push(SahBuildData {
            bb: root_bb,
            start: 0,
            range: n,
            parent: -1,
            is_left: false,
        });

        while let Some(bdata) = bstack.pop() {
            let node_idx: usize = self.nodes.len();
            self.nodes
                .push(BvhNode::new(bdata.bb, bdata.start, bdata.range));
            if bdata.parent >= 0 {
                let parent: &mut BvhNode = &mut self.nodes[bdata.parent as usize];
                if bdata.is_left {
                    parent.l = node_idx as i32;
                } else {
                    parent.r = node_idx as i32;
                }
            }

            if bdata.range <= max_leaf_size {
                continue;
            }

            let num_buckets: usize = MAX_NUM_BUCKETS.min(bdata.range);

            // best split over all three axes and bucket boundaries; the
            // strict < together with ascending (axis, bucket) iteration
            // makes ties deterministic
            let mut split_dim: i32 = -1;
            let mut split_val: Float = 0.0;
            let mut split_cost: Float = INFINITY;
            let mut split_ba: Bounds3f = Bounds3f::default();
            let mut split_bb: Bounds3f = Bounds3f::default();

            for dim in 0..3 {
                if bdata.bb.extent()[dim] < EPS_D {
                    continue; // ignore flat dimension
                }

                let bucket_width: Float = bdata.bb.extent()[dim] / num_buckets as Float;
                let mut buckets: Vec<(Bounds3f, usize)> =
                    vec![(Bounds3f::default(), 0); num_buckets];

                for i in bdata.start..bdata.start + bdata.range {
                    let pbb: Bounds3f = self.primitives[i].get_bbox();
                    let d: Float = (pbb.centroid()[dim] - bdata.bb.min[dim]) / bucket_width;
                    let b: usize = clamp_t(d as i64, 0, num_buckets as i64 - 1) as usize;
                    buckets[b].0.expand(&pbb);
                    buckets[b].1 += 1;
                }

                for idx in 1..num_buckets {
                    let mut na: usize = 0;
                    let mut ba: Bounds3f = Bounds3f::default();
                    for bucket in buckets.iter().take(idx) {
                        ba.expand(&bucket.0);
                        na += bucket.1;
                    }
                    let mut nb: usize = 0;
                    let mut bb: Bounds3f = Bounds3f::default();
                    for bucket in buckets.iter().skip(idx) {
                        bb.expand(&bucket.0);
                        nb += bucket.1;
                    }
                    if na == 0 || nb == 0 {
                        continue;
                    }

                    let cost: Float =
                        na as Float * ba.surface_area() + nb as Float * bb.surface_area();
                    if cost < split_cost {
                        split_dim = dim as i32;
                        split_val = bdata.bb.min[dim] + idx as Float * bucket_width;
                        split_cost = cost;
                        split_ba = ba;
                        split_bb = bb;
                    }
                }
            }

            // if every axis is flat (all centroids coincident) there is
            // no usable split plane; halve the index range instead
            if split_dim < 0 {
                let rangel: usize = bdata.range / 2;
                self.push_sah_children(
                    &mut bstack,
                    node_idx,
                    bdata.start,
                    rangel,
                    bdata.range,
                    bdata.bb,
                    bdata.bb,
                );
                continue;
            }

            let rangel: usize =
                self.partition_by_centroid(bdata.start, bdata.range, split_dim as usize, split_val);
            if rangel == 0 || rangel == bdata.range {
                // boundary rounding put everything on one side
                let rangel: usize = bdata.range / 2;
                self.push_sah_children(
                    &mut bstack,
                    node_idx,
                    bdata.start,
                    rangel,
                    bdata.range,
                    bdata.bb,
                    bdata.bb,
                );
                continue;
            }

            self.push_sah_children(
                &mut bstack,
                node_idx,
                bdata.start,
                rangel,
                bdata.range,
                split_ba,
                split_bb,
            );
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn push_sah_children(
        &self,
        bstack: &mut Vec<SahBuildData>,
        parent: usize,
        start: usize,
        rangel: usize,
        range: usize,
        bb_l: Bounds3f,
        bb_r: Bounds3f,
    ) {
        bstack.push(SahBuildData {
            bb: bb_l,
            start,
            range: rangel,
            parent: parent as i32,
            is_left: true,
        });
        bstack.push(SahBuildData {
            bb: bb_r,
            start: start + rangel,
            range: range - rangel,
            parent: parent as i32,
            is_left: false,
        });
    }

    fn bbox_over(&self, start: usize, span: usize) -> Bounds3f {
        let mut bb: Bounds3f = Bounds3f::default();
        for i in start..start + span {
            bb.expand(&self.primitives[i].get_bbox());
        }
        bb
    }

    fn build_morton(&mut self, root_bb: Bounds3f) {
        let n: usize = self.primitives.len();

        // quantize each centroid to the scene's unit cube and order the
        // primitives along the resulting space-filling curve (stable
        // sort, so equal codes keep their input order)
        let mut keyed: Vec<(u32, Arc<dyn Primitive + Send + Sync>)> = self
            .primitives
            .drain(..)
            .map(|p| {
                let code: u32 = morton3d(&root_bb.unit_cube_pos_of(&p.get_bbox().centroid()));
                (code, p)
            })
            .collect();
        keyed.sort_by_key(|&(code, _)| code);
        let codes: Vec<u32> = keyed.iter().map(|&(code, _)| code).collect();
        self.primitives = keyed.into_iter().map(|(_, p)| p).collect();

        self.nodes.push(BvhNode::new(root_bb, 0, n));

        // split each range at the highest bit where the endpoint codes
        // differ; a range whose codes all agree becomes a leaf
        let mut cstack: Vec<usize> = vec![0];
        while let Some(node_idx) = cstack.pop() {
            let (start, range) = {
                let node: &BvhNode = &self.nodes[node_idx];
                (node.start, node.range)
            };
            if range == 1 {
                continue;
            }

            let gamma: usize = match find_split_position(&codes, start, start + range - 1) {
                Some(g) => g,
                None => continue,
            };

            let lspan: usize = gamma - start + 1;
            let lbb: Bounds3f = self.bbox_over(start, lspan);
            let l_idx: usize = self.nodes.len();
            self.nodes.push(BvhNode::new(lbb, start, lspan));

            let rspan: usize = range - lspan;
            let rbb: Bounds3f = self.bbox_over(gamma + 1, rspan);
            let r_idx: usize = self.nodes.len();
            self.nodes.push(BvhNode::new(rbb, gamma + 1, rspan));

            self.nodes[node_idx].l = l_idx as i32;
            self.nodes[node_idx].r = r_idx as i32;

            cstack.push(l_idx);
            cstack.push(r_idx);
        }
    }

    /// Occlusion query: true as soon as any primitive blocks the ray.
    pub fn intersect_p(&self, ray: &Ray) -> bool {
        if self.nodes.is_empty() {
            return false;
        }

        let mut t0: Float = ray.min_t;
        let mut t1: Float = ray.max_t;
        if !self.nodes[0].bb.intersect(ray, &mut t0, &mut t1) {
            return false;
        }

        let mut tstack: Vec<usize> = vec![0];
        while let Some(idx) = tstack.pop() {
            let current: &BvhNode = &self.nodes[idx];

            if current.is_leaf() {
                for i in 0..current.range {
                    if self.primitives[current.start + i].intersect_p(ray) {
                        return true;
                    }
                }
                continue;
            }

            for &child in &[current.l, current.r] {
                if child >= 0 {
                    let mut c0: Float = ray.min_t;
                    let mut c1: Float = ray.max_t;
                    if self.nodes[child as usize].bb.intersect(ray, &mut c0, &mut c1) {
                        tstack.push(child as usize);
                    }
                }
            }
        }
        false
    }

    /// Closest-hit query. Primitive hits tighten `ray.max_t` as the
    /// traversal proceeds; the nearer child is explored first, though
    /// correctness does not depend on the order.
    pub fn intersect(&self, ray: &mut Ray) -> Option<Intersection> {
        if self.nodes.is_empty() {
            return None;
        }

        let mut t0: Float = ray.min_t;
        let mut t1: Float = ray.max_t;
        if !self.nodes[0].bb.intersect(ray, &mut t0, &mut t1) {
            return None;
        }

        let mut best: Option<Intersection> = None;
        let mut tstack: Vec<usize> = vec![0];
        while let Some(idx) = tstack.pop() {
            let current: BvhNode = self.nodes[idx];

            if current.is_leaf() {
                for i in 0..current.range {
                    if let Some(isect) = self.primitives[current.start + i].intersect(ray) {
                        best = Some(isect);
                    }
                }
                continue;
            }

            let mut tl0: Float = ray.min_t;
            let mut tl1: Float = ray.max_t;
            let mut tr0: Float = ray.min_t;
            let mut tr1: Float = ray.max_t;
            let hit_l: bool = current.l >= 0
                && self.nodes[current.l as usize]
                    .bb
                    .intersect(ray, &mut tl0, &mut tl1);
            let hit_r: bool = current.r >= 0
                && self.nodes[current.r as usize]
                    .bb
                    .intersect(ray, &mut tr0, &mut tr1);

            if hit_l && hit_r {
                // push the farther child first so the nearer pops first
                if tl0 <= tr0 {
                    tstack.push(current.r as usize);
                    tstack.push(current.l as usize);
                } else {
                    tstack.push(current.l as usize);
                    tstack.push(current.r as usize);
                }
            } else if hit_l {
                tstack.push(current.l as usize);
            } else if hit_r {
                tstack.push(current.r as usize);
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bsdf::DiffuseBsdf;
    use crate::core::common::Spectrum;
    use crate::core::rng::Rng;
    use crate::shapes::sphere::Sphere;
    use crate::shapes::triangle::{Triangle, TriangleMesh};

    fn random_triangle_soup(count: usize, seed: u64) -> Vec<Arc<dyn Primitive + Send + Sync>> {
        let mut rng: Rng = Rng::new();
        rng.seed(seed, 0);
        let bsdf: Arc<dyn crate::core::bsdf::Bsdf + Send + Sync> = Arc::new(DiffuseBsdf {
            albedo: Spectrum::from_value(0.5),
        });
        let mut positions: Vec<Vector3f> = Vec::new();
        let mut normals: Vec<Vector3f> = Vec::new();
        for _ in 0..count {
            let base: Vector3f = Vector3f::new(
                rng.uniform_float() * 10.0 - 5.0,
                rng.uniform_float() * 10.0 - 5.0,
                rng.uniform_float() * 10.0 - 5.0,
            );
            for _ in 0..3 {
                positions.push(
                    base + Vector3f::new(
                        rng.uniform_float(),
                        rng.uniform_float(),
                        rng.uniform_float(),
                    ),
                );
                normals.push(Vector3f::new(0.0, 0.0, 1.0));
            }
        }
        let mesh: Arc<TriangleMesh> = Arc::new(TriangleMesh::new(positions, normals, bsdf));
        (0..count)
            .map(|i| {
                Arc::new(Triangle::new(mesh.clone(), 3 * i, 3 * i + 1, 3 * i + 2))
                    as Arc<dyn Primitive + Send + Sync>
            })
            .collect()
    }

    fn random_rays(count: usize, seed: u64) -> Vec<Ray> {
        let mut rng: Rng = Rng::new();
        rng.seed(seed, 1);
        (0..count)
            .map(|_| {
                let o: Vector3f = Vector3f::new(
                    rng.uniform_float() * 20.0 - 10.0,
                    rng.uniform_float() * 20.0 - 10.0,
                    rng.uniform_float() * 20.0 - 10.0,
                );
                let d: Vector3f = Vector3f::new(
                    rng.uniform_float() * 2.0 - 1.0,
                    rng.uniform_float() * 2.0 - 1.0,
                    rng.uniform_float() * 2.0 - 1.0,
                )
                .normalize();
                Ray::new(o, d)
            })
            .collect()
    }

    fn brute_force_hit(
        prims: &[Arc<dyn Primitive + Send + Sync>],
        ray: &Ray,
    ) -> Option<Float> {
        let mut r: Ray = *ray;
        let mut best: Option<Float> = None;
        for p in prims {
            if let Some(isect) = p.intersect(&mut r) {
                best = Some(isect.t);
            }
        }
        best
    }

    fn contains(outer: &Bounds3f, inner: &Bounds3f) -> bool {
        outer.min.x <= inner.min.x
            && outer.min.y <= inner.min.y
            && outer.min.z <= inner.min.z
            && outer.max.x >= inner.max.x
            && outer.max.y >= inner.max.y
            && outer.max.z >= inner.max.z
    }

    #[test]
    fn test_empty_bvh() {
        let bvh: BVHAccel = BVHAccel::new(Vec::new(), 4, SplitMethod::Sah);
        let mut r: Ray = Ray::new(
            Vector3f::new(0.0, 0.0, 0.0),
            Vector3f::new(0.0, 0.0, 1.0),
        );
        assert!(bvh.intersect(&mut r).is_none());
        assert!(!bvh.intersect_p(&r));
        assert!(bvh.get_bbox().is_empty());
    }

    // every node's bbox must contain the bboxes of all primitives in
    // its index range
    #[test]
    fn test_covering_invariant() {
        for &method in &[SplitMethod::Sah, SplitMethod::Morton] {
            let bvh: BVHAccel = BVHAccel::new(random_triangle_soup(100, 7), 4, method);
            for node in &bvh.nodes {
                for i in node.start..node.start + node.range {
                    let pbb: Bounds3f = bvh.primitives[i].get_bbox();
                    assert!(
                        contains(&node.bb, &pbb),
                        "{:?} does not contain {:?}",
                        node.bb,
                        pbb
                    );
                }
            }
        }
    }

    #[test]
    fn test_children_partition_range() {
        for &method in &[SplitMethod::Sah, SplitMethod::Morton] {
            let bvh: BVHAccel = BVHAccel::new(random_triangle_soup(64, 19), 4, method);
            for node in &bvh.nodes {
                if node.is_leaf() {
                    continue;
                }
                let l: &BvhNode = &bvh.nodes[node.l as usize];
                let r: &BvhNode = &bvh.nodes[node.r as usize];
                assert_eq!(l.start, node.start);
                assert_eq!(l.start + l.range, r.start);
                assert_eq!(r.start + r.range, node.start + node.range);
            }
        }
    }

    // the hierarchy must agree with a brute-force scan, hit for hit
    #[test]
    fn test_closest_hit_matches_brute_force() {
        for &method in &[SplitMethod::Sah, SplitMethod::Morton] {
            let prims: Vec<Arc<dyn Primitive + Send + Sync>> = random_triangle_soup(200, 3);
            let bvh: BVHAccel = BVHAccel::new(prims.clone(), 4, method);
            for ray in random_rays(500, 11) {
                let reference: Option<Float> = brute_force_hit(&prims, &ray);
                let mut r: Ray = ray;
                let result: Option<Float> = bvh.intersect(&mut r).map(|isect| isect.t);
                match (reference, result) {
                    (None, None) => {}
                    (Some(a), Some(b)) => {
                        assert!((a - b).abs() <= 1e-12 * a.abs().max(1.0), "{} vs {}", a, b)
                    }
                    _ => panic!("BVH and brute force disagree: {:?} vs {:?}", reference, result),
                }
            }
        }
    }

    #[test]
    fn test_occlusion_matches_brute_force() {
        let prims: Vec<Arc<dyn Primitive + Send + Sync>> = random_triangle_soup(100, 29);
        let bvh: BVHAccel = BVHAccel::new(prims.clone(), 4, SplitMethod::Sah);
        for ray in random_rays(300, 31) {
            let reference: bool = prims.iter().any(|p| p.intersect_p(&ray));
            assert_eq!(bvh.intersect_p(&ray), reference);
        }
    }

    // axis-aligned ray along the shared face of two sibling boxes:
    // the one-ulp slop keeps it from slipping through the crack
    #[test]
    fn test_no_cracks_between_siblings() {
        let bsdf: Arc<dyn crate::core::bsdf::Bsdf + Send + Sync> = Arc::new(DiffuseBsdf {
            albedo: Spectrum::from_value(0.5),
        });
        let prims: Vec<Arc<dyn Primitive + Send + Sync>> = vec![
            Arc::new(Sphere::new(Vector3f::new(-1.0, 0.0, 0.0), 1.0, bsdf.clone())),
            Arc::new(Sphere::new(Vector3f::new(1.0, 0.0, 0.0), 1.0, bsdf)),
        ];
        let bvh: BVHAccel = BVHAccel::new(prims, 1, SplitMethod::Sah);
        // grazes x = 0, exactly the plane where the two children meet
        let mut r: Ray = Ray::new(
            Vector3f::new(0.0, 0.0, -5.0),
            Vector3f::new(0.0, 0.0, 1.0),
        );
        assert!(bvh.intersect(&mut r).is_some());
    }

    #[test]
    fn test_identical_centroids_terminate() {
        // all centroids coincide, so no SAH axis is usable and Morton
        // codes are all equal; both builders must still terminate
        let bsdf: Arc<dyn crate::core::bsdf::Bsdf + Send + Sync> = Arc::new(DiffuseBsdf {
            albedo: Spectrum::from_value(0.5),
        });
        for &method in &[SplitMethod::Sah, SplitMethod::Morton] {
            let prims: Vec<Arc<dyn Primitive + Send + Sync>> = (0..16)
                .map(|_| {
                    Arc::new(Sphere::new(Vector3f::new(0.0, 0.0, 0.0), 1.0, bsdf.clone()))
                        as Arc<dyn Primitive + Send + Sync>
                })
                .collect();
            let bvh: BVHAccel = BVHAccel::new(prims, 4, method);
            let mut r: Ray = Ray::new(
                Vector3f::new(0.0, 0.0, -5.0),
                Vector3f::new(0.0, 0.0, 1.0),
            );
            assert!(bvh.intersect(&mut r).is_some());
        }
    }

    #[test]
    fn test_morton_code_interleave() {
        // full-one coordinates quantize to 1023 in every axis
        let code: u32 = morton3d(&Vector3f::new(1.0, 1.0, 1.0));
        assert_eq!(code, 0x3FFF_FFFF);
        assert_eq!(morton3d(&Vector3f::new(0.0, 0.0, 0.0)), 0);
        // x contributes the highest interleaved bit
        let x_only: u32 = morton3d(&Vector3f::new(1.0, 0.0, 0.0));
        let y_only: u32 = morton3d(&Vector3f::new(0.0, 1.0, 0.0));
        assert!(x_only > y_only);
    }
}
