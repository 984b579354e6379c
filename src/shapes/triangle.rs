// std
use std::sync::Arc;
// lumen
use crate::core::bsdf::Bsdf;
use crate::core::common::Float;
use crate::core::geometry::{vec3_cross, vec3_dot, Bounds3f, Ray, Vector3f};
use crate::core::primitive::{Intersection, Primitive};

/// Shared vertex data for all triangles of one mesh, with the single
/// BSDF assigned to the surface.
pub struct TriangleMesh {
    pub positions: Vec<Vector3f>,
    pub normals: Vec<Vector3f>,
    pub bsdf: Arc<dyn Bsdf + Send + Sync>,
}

impl TriangleMesh {
    pub fn new(
        positions: Vec<Vector3f>,
        normals: Vec<Vector3f>,
        bsdf: Arc<dyn Bsdf + Send + Sync>,
    ) -> Self {
        TriangleMesh {
            positions,
            normals,
            bsdf,
        }
    }
}

#[derive(Clone)]
pub struct Triangle {
    mesh: Arc<TriangleMesh>,
    pub v1: usize,
    pub v2: usize,
    pub v3: usize,
}

impl Triangle {
    pub fn new(mesh: Arc<TriangleMesh>, v1: usize, v2: usize, v3: usize) -> Self {
        Triangle { mesh, v1, v2, v3 }
    }
}

/// Plane-equation intersection followed by a barycentric inside test.
/// Writes (alpha, beta, gamma, t) on a hit. Degenerate (zero-area)
/// triangles produce a non-finite plane normal and report a miss.
fn intersect_triangle(
    r: &Ray,
    a: &Vector3f,
    b: &Vector3f,
    c: &Vector3f,
    alpha_r: &mut Float,
    beta_r: &mut Float,
    gamma_r: &mut Float,
    t_r: &mut Float,
) -> bool {
    let v0: Vector3f = *b - *a;
    let v1: Vector3f = *c - *a;
    let n: Vector3f = vec3_cross(&v0, &v1).normalize();
    let t: Float = vec3_dot(&(*a - r.o), &n) / vec3_dot(&r.d, &n);
    if !t.is_finite() || t < r.min_t || t > r.max_t {
        return false;
    }

    let d00: Float = vec3_dot(&v0, &v0);
    let d01: Float = vec3_dot(&v0, &v1);
    let d11: Float = vec3_dot(&v1, &v1);
    let v2: Vector3f = r.at(t) - *a;
    let d20: Float = vec3_dot(&v2, &v0);
    let d21: Float = vec3_dot(&v2, &v1);
    let inv_denom: Float = 1.0 / (d00 * d11 - d01 * d01);
    let beta: Float = (d11 * d20 - d01 * d21) * inv_denom;
    if !(beta >= 0.0 && beta <= 1.0) {
        return false;
    }
    let gamma: Float = (d00 * d21 - d01 * d20) * inv_denom;
    if !(gamma >= 0.0 && gamma <= 1.0 - beta) {
        return false;
    }

    *alpha_r = 1.0 - beta - gamma;
    *beta_r = beta;
    *gamma_r = gamma;
    *t_r = t;
    true
}

impl Primitive for Triangle {
    fn get_bbox(&self) -> Bounds3f {
        let mut bbox: Bounds3f = Bounds3f::from_point(self.mesh.positions[self.v1]);
        bbox.expand_pnt(&self.mesh.positions[self.v2]);
        bbox.expand_pnt(&self.mesh.positions[self.v3]);
        bbox
    }
    fn intersect_p(&self, r: &Ray) -> bool {
        let mut alpha: Float = 0.0;
        let mut beta: Float = 0.0;
        let mut gamma: Float = 0.0;
        let mut t: Float = 0.0;
        intersect_triangle(
            r,
            &self.mesh.positions[self.v1],
            &self.mesh.positions[self.v2],
            &self.mesh.positions[self.v3],
            &mut alpha,
            &mut beta,
            &mut gamma,
            &mut t,
        )
    }
    fn intersect(&self, r: &mut Ray) -> Option<Intersection> {
        let mut alpha: Float = 0.0;
        let mut beta: Float = 0.0;
        let mut gamma: Float = 0.0;
        let mut t: Float = 0.0;
        let a: Vector3f = self.mesh.positions[self.v1];
        let b: Vector3f = self.mesh.positions[self.v2];
        let c: Vector3f = self.mesh.positions[self.v3];

        if !intersect_triangle(r, &a, &b, &c, &mut alpha, &mut beta, &mut gamma, &mut t) {
            return None;
        }

        // interpolate the shading normal
        let n: Vector3f = alpha * self.mesh.normals[self.v1]
            + beta * self.mesh.normals[self.v2]
            + gamma * self.mesh.normals[self.v3];

        r.max_t = t;

        // when the back of the triangle is hit, flip so the shading
        // normal opposes the incident direction
        let n: Vector3f = if vec3_dot(&n, &r.d) > 0.0 { -n } else { n };

        Some(Intersection {
            t,
            n: n.normalize(),
            primitive: Some(Arc::new(self.clone())),
            bsdf: Some(self.mesh.bsdf.clone()),
        })
    }
}
