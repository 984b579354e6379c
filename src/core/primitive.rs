//! The **Primitive** trait is the bridge between geometry processing and
//! shading: anything that can be bounded, occlusion-tested, and
//! closest-hit intersected.

// std
use std::sync::Arc;
// lumen
use crate::core::bsdf::Bsdf;
use crate::core::common::{Float, INFINITY};
use crate::core::geometry::{Bounds3f, Ray, Vector3f};

/// Record of a closest-hit query. Only meaningful when the query
/// reported a hit. The shading normal is unit length and oriented
/// toward the incoming ray.
#[derive(Clone)]
pub struct Intersection {
    pub t: Float,
    pub n: Vector3f,
    pub primitive: Option<Arc<dyn Primitive + Send + Sync>>,
    pub bsdf: Option<Arc<dyn Bsdf + Send + Sync>>,
}

impl Default for Intersection {
    fn default() -> Self {
        Intersection {
            t: INFINITY,
            n: Vector3f::default(),
            primitive: None,
            bsdf: None,
        }
    }
}

impl Intersection {
    pub fn new() -> Self {
        Intersection::default()
    }
}

pub trait Primitive {
    fn get_bbox(&self) -> Bounds3f;
    /// Occlusion-only query; true as soon as anything blocks the ray
    /// segment.
    fn intersect_p(&self, ray: &Ray) -> bool;
    /// Closest-hit query. A hit tightens `ray.max_t` so later
    /// candidates prune.
    fn intersect(&self, ray: &mut Ray) -> Option<Intersection>;
}
