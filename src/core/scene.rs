//! Scene description: a set of objects contributing primitives, plus
//! the light list. The renderer collects the primitives into its
//! acceleration structure when the scene is installed.

// std
use std::sync::Arc;
// lumen
use crate::core::light::Light;
use crate::core::primitive::Primitive;
use crate::shapes::sphere::Sphere;
use crate::shapes::triangle::{Triangle, TriangleMesh};

pub trait SceneObject {
    fn get_primitives(&self) -> Vec<Arc<dyn Primitive + Send + Sync>>;
}

/// Indexed triangle mesh object.
pub struct MeshObject {
    mesh: Arc<TriangleMesh>,
    indices: Vec<[usize; 3]>,
}

impl MeshObject {
    pub fn new(mesh: Arc<TriangleMesh>, indices: Vec<[usize; 3]>) -> Self {
        MeshObject { mesh, indices }
    }
}

impl SceneObject for MeshObject {
    fn get_primitives(&self) -> Vec<Arc<dyn Primitive + Send + Sync>> {
        self.indices
            .iter()
            .map(|idx| {
                Arc::new(Triangle::new(self.mesh.clone(), idx[0], idx[1], idx[2]))
                    as Arc<dyn Primitive + Send + Sync>
            })
            .collect()
    }
}

pub struct SphereObject {
    sphere: Arc<Sphere>,
}

impl SphereObject {
    pub fn new(sphere: Sphere) -> Self {
        SphereObject {
            sphere: Arc::new(sphere),
        }
    }
}

impl SceneObject for SphereObject {
    fn get_primitives(&self) -> Vec<Arc<dyn Primitive + Send + Sync>> {
        vec![self.sphere.clone() as Arc<dyn Primitive + Send + Sync>]
    }
}

pub struct Scene {
    pub objects: Vec<Arc<dyn SceneObject + Send + Sync>>,
    pub lights: Vec<Arc<dyn Light + Send + Sync>>,
}

impl Scene {
    pub fn new(
        objects: Vec<Arc<dyn SceneObject + Send + Sync>>,
        lights: Vec<Arc<dyn Light + Send + Sync>>,
    ) -> Self {
        Scene { objects, lights }
    }

    pub fn collect_primitives(&self) -> Vec<Arc<dyn Primitive + Send + Sync>> {
        let mut primitives: Vec<Arc<dyn Primitive + Send + Sync>> = Vec::new();
        for obj in &self.objects {
            primitives.extend(obj.get_primitives());
        }
        primitives
    }
}
