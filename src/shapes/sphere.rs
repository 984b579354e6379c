// std
use std::sync::Arc;
// lumen
use crate::core::bsdf::Bsdf;
use crate::core::common::Float;
use crate::core::geometry::{vec3_dot, Bounds3f, Ray, Vector3f};
use crate::core::primitive::{Intersection, Primitive};

#[derive(Clone)]
pub struct Sphere {
    /// Center.
    pub o: Vector3f,
    /// Radius.
    pub r: Float,
    r2: Float,
    bsdf: Arc<dyn Bsdf + Send + Sync>,
}

impl Sphere {
    pub fn new(o: Vector3f, r: Float, bsdf: Arc<dyn Bsdf + Send + Sync>) -> Self {
        Sphere {
            o,
            r,
            r2: r * r,
            bsdf,
        }
    }

    fn normal(&self, p: Vector3f) -> Vector3f {
        (p - self.o) / self.r
    }

    /// Solve the intersection quadratic; writes both roots (t1 <= t2).
    /// A zero-radius sphere never intersects.
    fn test(&self, r: &Ray, t1: &mut Float, t2: &mut Float) -> bool {
        if self.r <= 0.0 {
            return false;
        }
        let s: Vector3f = self.o - r.o;
        let sd: Float = vec3_dot(&s, &r.d);
        let ss: Float = vec3_dot(&s, &s);

        let disc: Float = sd * sd - ss + self.r2;
        if disc < 0.0 {
            return false;
        }

        let sqrt_disc: Float = disc.sqrt();
        *t1 = sd - sqrt_disc;
        *t2 = sd + sqrt_disc;
        true
    }
}

impl Primitive for Sphere {
    fn get_bbox(&self) -> Bounds3f {
        let r: Vector3f = Vector3f::new(self.r, self.r, self.r);
        Bounds3f::new(self.o - r, self.o + r)
    }
    fn intersect_p(&self, r: &Ray) -> bool {
        let mut t1: Float = 0.0;
        let mut t2: Float = 0.0;
        if self.test(r, &mut t1, &mut t2) {
            return (t2 >= r.min_t && t2 <= r.max_t) || (t1 >= r.min_t && t1 <= r.max_t);
        }
        false
    }
    fn intersect(&self, r: &mut Ray) -> Option<Intersection> {
        let mut t1: Float = 0.0;
        let mut t2: Float = 0.0;
        if !self.test(r, &mut t1, &mut t2) {
            return None;
        }

        // prefer the nearer root; fall back to the far one when the
        // origin is inside the sphere
        let mut t: Float = t1;
        if t < r.min_t || t > r.max_t {
            t = t2;
        }
        if t < r.min_t || t > r.max_t {
            return None;
        }

        r.max_t = t;
        Some(Intersection {
            t,
            n: self.normal(r.at(t)),
            primitive: Some(Arc::new(self.clone())),
            bsdf: Some(self.bsdf.clone()),
        })
    }
}
