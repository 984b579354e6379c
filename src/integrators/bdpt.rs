//! Bidirectional path tracing. Each pixel sample builds an eye subpath
//! by random walk from the camera and, per light, a light subpath by
//! random walk from an emitted ray; four classes of connections between
//! them are accumulated into the sample buffer. Light-subpath vertices
//! reprojected onto the film (case III) may land on any pixel, which is
//! why the buffer is written through its atomic accumulate path.

// std
use std::sync::Arc;
// lumen
use crate::accelerators::bvh::BVHAccel;
use crate::core::bsdf::{make_coord_space, Bsdf};
use crate::core::camera::Camera;
use crate::core::common::{Float, Spectrum, EPS_D, INFINITY};
use crate::core::film::SampleBuffer;
use crate::core::geometry::{vec3_abs_dot, Matrix3x3, Point2f, Ray, Vector3f};
use crate::core::light::Light;
use crate::core::rng::Rng;
use crate::lights::environment::EnvironmentLight;

/// Connections between vertices closer than this (squared distance)
/// are rejected; the geometric term is nearly singular there.
const CONNECT_MIN_SQ_DIST: Float = 0.05;

/// One random-walk vertex. `wi` points toward the previous vertex and
/// `wo` toward the next one, both in the local shading frame;
/// `throughput` is the cumulative product of scattering weights up to
/// and including this vertex.
pub struct PathVertex {
    pub p: Vector3f,
    pub n: Vector3f,
    pub wi: Vector3f,
    pub wo: Vector3f,
    pub bsdf: Arc<dyn Bsdf + Send + Sync>,
    pub throughput: Spectrum,
}

pub struct BdptIntegrator {
    pub max_subpath_depth: usize,
    pub throughput_threshold: Float,
}

impl Default for BdptIntegrator {
    fn default() -> Self {
        BdptIntegrator {
            max_subpath_depth: 30,
            throughput_threshold: 1e-7,
        }
    }
}

// the strategy weight for a path with i eye vertices and j light
// vertices; a uniform split between the i+j+1 strategies that produce
// the same path length (deliberately simpler than the full balance
// heuristic)
fn strategy_weight(i: usize, j: usize) -> Float {
    1.0 / (i + j + 1) as Float
}

// cumulative throughput arriving at a vertex, excluding the vertex's
// own scatter
fn throughput_before(path: &[PathVertex], idx: usize, init: Spectrum) -> Spectrum {
    if idx == 0 {
        init
    } else {
        path[idx - 1].throughput
    }
}

impl BdptIntegrator {
    /// Extend a subpath from `ray` until the walk escapes, the depth
    /// cap is reached, or the cumulative luminance dies out.
    fn random_walk(
        &self,
        bvh: &BVHAccel,
        mut ray: Ray,
        init_beta: Spectrum,
        path: &mut Vec<PathVertex>,
        rng: &mut Rng,
    ) {
        path.clear();
        let mut beta: Spectrum = init_beta;
        loop {
            if path.len() >= self.max_subpath_depth {
                break;
            }
            let isect = match bvh.intersect(&mut ray) {
                Some(isect) => isect,
                None => break,
            };
            let bsdf: Arc<dyn Bsdf + Send + Sync> = match isect.bsdf.clone() {
                Some(bsdf) => bsdf,
                None => break,
            };

            let hit: Vector3f = ray.at(isect.t);
            let o2w: Matrix3x3 = make_coord_space(&isect.n);
            let w2o: Matrix3x3 = o2w.transpose();
            let wi: Vector3f = w2o * (-ray.d);

            let mut wo: Vector3f = Vector3f::default();
            let mut pdf: Float = 0.0;
            let f: Spectrum = bsdf.sample_f(&wi, &mut wo, &mut pdf, rng);

            let scatter: Spectrum = if pdf > 0.0 {
                f * (wo.z.abs() / pdf)
            } else {
                Spectrum::default()
            };
            let beta_after: Spectrum = beta * scatter;

            path.push(PathVertex {
                p: hit,
                n: isect.n,
                wi,
                wo,
                bsdf,
                throughput: beta_after,
            });

            if !beta_after.is_finite() || beta_after.illum() < self.throughput_threshold {
                break;
            }
            beta = beta_after;
            let wo_world: Vector3f = o2w * wo;
            ray = Ray::new(hit + wo_world * EPS_D, wo_world);
        }
    }

    fn occluded(bvh: &BVHAccel, from: &Vector3f, dir: &Vector3f, dist: Float) -> bool {
        let mut shadow: Ray = Ray::new(*from + *dir * EPS_D, *dir);
        shadow.max_t = dist - EPS_D;
        bvh.intersect_p(&shadow)
    }

    /// Evaluate one pixel sample through film position `(u, v)` and
    /// accumulate every path class into the buffer, each contribution
    /// scaled by `scale` (one over the pixel's sample count).
    #[allow(clippy::too_many_arguments)]
    pub fn raytrace_pixel_sample(
        &self,
        bvh: &BVHAccel,
        lights: &[Arc<dyn Light + Send + Sync>],
        env_light: Option<&EnvironmentLight>,
        camera: &Camera,
        buffer: &SampleBuffer,
        x: usize,
        y: usize,
        u: Float,
        v: Float,
        scale: Float,
        eye_path: &mut Vec<PathVertex>,
        light_path: &mut Vec<PathVertex>,
        rng: &mut Rng,
    ) {
        let w: usize = buffer.w;
        let h: usize = buffer.h;
        let white: Spectrum = Spectrum::from_value(1.0);

        let primary: Ray = camera.generate_ray(u, v);
        self.random_walk(bvh, primary, white, eye_path, rng);

        if eye_path.is_empty() {
            // the primary ray escaped
            if let Some(env) = env_light {
                buffer.update_pixel_add(&(env.sample_dir(&primary) * scale), x, y);
            }
        }

        // case I: the primary ray lands on an emitter
        if let Some(v0) = eye_path.first() {
            let le: Spectrum = v0.bsdf.get_emission();
            if !le.is_black() {
                buffer.update_pixel_add(&(le * strategy_weight(0, 0) * scale), x, y);
            }
        }

        // case II: next-event estimation from every eye vertex
        for (idx, ve) in eye_path.iter().enumerate() {
            let i: usize = idx + 1;
            if ve.bsdf.is_delta() {
                continue;
            }
            let thr: Spectrum = throughput_before(eye_path, idx, white);
            let w2o: Matrix3x3 = make_coord_space(&ve.n).transpose();

            for light in lights {
                let mut wi_world: Vector3f = Vector3f::default();
                let mut dist: Float = 0.0;
                let weighted: Spectrum = if light.is_delta_light() {
                    let mut pdf: Float = 0.0;
                    let l_light: Spectrum =
                        light.sample_l(&ve.p, rng, &mut wi_world, &mut dist, &mut pdf);
                    if pdf <= 0.0 {
                        continue;
                    }
                    l_light * (1.0 / pdf)
                } else {
                    let mut on_light: Vector3f = Vector3f::default();
                    let c: Spectrum =
                        light.sample_from_p(&ve.p, rng, &mut on_light, &mut wi_world);
                    let d: Vector3f = on_light - ve.p;
                    dist = if d.length_squared().is_finite() {
                        d.length()
                    } else {
                        INFINITY
                    };
                    c
                };
                if weighted.is_black() {
                    continue;
                }
                let wi: Vector3f = w2o * wi_world;
                if wi.z <= 0.0 {
                    continue;
                }
                let f: Spectrum = ve.bsdf.f(&ve.wi, &wi);
                if f.is_black() {
                    continue;
                }
                if Self::occluded(bvh, &ve.p, &wi_world, dist) {
                    continue;
                }
                let c: Spectrum = thr * f * weighted * (wi.z * strategy_weight(i, 0) * scale);
                buffer.update_pixel_add(&c, x, y);
            }
        }

        // light subpaths, one per light
        let world_bound = bvh.get_bbox();
        for light in lights {
            let mut lray: Ray = Ray::new(Vector3f::default(), Vector3f::new(0.0, 0.0, 1.0));
            let mut n_light: Vector3f = Vector3f::default();
            let mut pdf: Float = 0.0;
            let le: Spectrum =
                light.sample_le(rng, &world_bound, &mut lray, &mut n_light, &mut pdf);
            if pdf <= 0.0 || le.is_black() {
                continue;
            }
            let beta0: Spectrum = le * (vec3_abs_dot(&n_light, &lray.d) / pdf);
            self.random_walk(bvh, lray, beta0, light_path, rng);

            // case III: splat light vertices onto the film
            for (jdx, vl) in light_path.iter().enumerate() {
                let j: usize = jdx + 1;
                if vl.bsdf.is_delta() {
                    continue;
                }
                let seg: Vector3f = camera.position - vl.p;
                let sq_dist: Float = seg.length_squared();
                if sq_dist < CONNECT_MIN_SQ_DIST {
                    continue;
                }
                let dist: Float = sq_dist.sqrt();
                let dir: Vector3f = seg / dist;
                let w2o: Matrix3x3 = make_coord_space(&vl.n).transpose();
                let wi: Vector3f = w2o * dir;
                let f: Spectrum = vl.bsdf.f(&vl.wi, &wi);
                if f.is_black() {
                    continue;
                }
                let screen: Point2f = match camera.get_screen_pos(&vl.p) {
                    Some(screen) => screen,
                    None => continue,
                };
                if screen.x < 0.0 || screen.x >= 1.0 || screen.y < 0.0 || screen.y >= 1.0 {
                    continue;
                }
                let px: usize = ((screen.x * w as Float) as usize).min(w - 1);
                let py: usize = ((screen.y * h as Float) as usize).min(h - 1);
                if Self::occluded(bvh, &vl.p, &dir, dist) {
                    continue;
                }
                let thr: Spectrum = throughput_before(light_path, jdx, beta0);
                let c: Spectrum =
                    thr * f * (wi.z.abs() / sq_dist * strategy_weight(0, j) * scale);
                buffer.update_pixel_add(&c, px, py);
            }

            // case IV: connect every eye vertex to every light vertex
            for (idx, ve) in eye_path.iter().enumerate() {
                let i: usize = idx + 1;
                if ve.bsdf.is_delta() {
                    continue;
                }
                let thr_e: Spectrum = throughput_before(eye_path, idx, white);
                let w2o_e: Matrix3x3 = make_coord_space(&ve.n).transpose();

                for (jdx, vl) in light_path.iter().enumerate() {
                    let j: usize = jdx + 1;
                    if vl.bsdf.is_delta() {
                        continue;
                    }
                    let seg: Vector3f = vl.p - ve.p;
                    let sq_dist: Float = seg.length_squared();
                    if sq_dist < CONNECT_MIN_SQ_DIST {
                        continue;
                    }
                    let dist: Float = sq_dist.sqrt();
                    let dir: Vector3f = seg / dist;

                    let wi_e: Vector3f = w2o_e * dir;
                    let f_e: Spectrum = ve.bsdf.f(&ve.wi, &wi_e);
                    if f_e.is_black() {
                        continue;
                    }
                    let w2o_l: Matrix3x3 = make_coord_space(&vl.n).transpose();
                    let wi_l: Vector3f = w2o_l * (-dir);
                    let f_l: Spectrum = vl.bsdf.f(&vl.wi, &wi_l);
                    if f_l.is_black() {
                        continue;
                    }
                    if Self::occluded(bvh, &ve.p, &dir, dist) {
                        continue;
                    }

                    let g: Float = wi_e.z.abs() * wi_l.z.abs() / sq_dist;
                    let thr_l: Spectrum = throughput_before(light_path, jdx, beta0);
                    let c: Spectrum =
                        thr_e * thr_l * f_e * f_l * (g * strategy_weight(i, j) * scale);
                    buffer.update_pixel_add(&c, x, y);
                }
            }
        }
    }
}
