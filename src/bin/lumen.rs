//! Renders the built-in Cornell-box demo scene to a PNG.

// std
use std::path::PathBuf;
use std::sync::Arc;
// others
use structopt::StructOpt;
// lumen
use lumen::accelerators::bvh::SplitMethod;
use lumen::core::bsdf::{Bsdf, DiffuseBsdf, EmissionBsdf, GlassBsdf, MirrorBsdf};
use lumen::core::camera::Camera;
use lumen::core::common::{Float, Spectrum};
use lumen::core::geometry::Vector3f;
use lumen::core::light::Light;
use lumen::core::renderer::{PathTracer, RenderConfig};
use lumen::core::scene::{MeshObject, Scene, SceneObject, SphereObject};
use lumen::lights::area::AreaLight;
use lumen::shapes::sphere::Sphere;
use lumen::shapes::triangle::TriangleMesh;

#[derive(StructOpt)]
#[structopt(name = "lumen", about = "offline physically-based renderer")]
struct Opt {
    /// Image width in pixels
    #[structopt(short = "w", long = "width", default_value = "480")]
    width: usize,
    /// Image height in pixels
    #[structopt(long = "height", default_value = "480")]
    height: usize,
    /// Camera-ray samples per pixel
    #[structopt(short = "s", long = "samples", default_value = "16")]
    samples: usize,
    /// Shadow-ray samples per area light
    #[structopt(short = "l", long = "light-samples", default_value = "4")]
    light_samples: usize,
    /// Maximum ray depth for the unidirectional tracer
    #[structopt(short = "d", long = "depth", default_value = "6")]
    depth: u32,
    /// Worker threads (defaults to the number of cores)
    #[structopt(short = "t", long = "threads")]
    threads: Option<usize>,
    /// Use the bidirectional integrator
    #[structopt(long = "bdpt")]
    bdpt: bool,
    /// BVH build strategy: sah or morton
    #[structopt(long = "bvh", default_value = "sah")]
    bvh: String,
    /// Apply global Reinhard tone mapping before saving
    #[structopt(long = "tonemap")]
    tonemap: bool,
    /// PRNG seed
    #[structopt(long = "seed", default_value = "0")]
    seed: u64,
    /// Output PNG path (defaults to a timestamped filename)
    #[structopt(short = "o", long = "output", parse(from_os_str))]
    output: Option<PathBuf>,
}

fn quad_object(
    center: Vector3f,
    ex: Vector3f,
    ey: Vector3f,
    normal: Vector3f,
    bsdf: Arc<dyn Bsdf + Send + Sync>,
) -> Arc<dyn SceneObject + Send + Sync> {
    let positions: Vec<Vector3f> = vec![
        center - ex * 0.5 - ey * 0.5,
        center + ex * 0.5 - ey * 0.5,
        center + ex * 0.5 + ey * 0.5,
        center - ex * 0.5 + ey * 0.5,
    ];
    let mesh: Arc<TriangleMesh> = Arc::new(TriangleMesh::new(positions, vec![normal; 4], bsdf));
    Arc::new(MeshObject::new(mesh, vec![[0, 1, 2], [0, 2, 3]]))
}

/// The classic box: white floor, ceiling, and back wall, red and green
/// side walls, an area light in the ceiling, a mirror sphere and a
/// glass sphere.
fn build_cornell_box() -> (Scene, Camera) {
    let white: Arc<dyn Bsdf + Send + Sync> = Arc::new(DiffuseBsdf {
        albedo: Spectrum::from_value(0.73),
    });
    let red: Arc<dyn Bsdf + Send + Sync> = Arc::new(DiffuseBsdf {
        albedo: Spectrum::new(0.65, 0.05, 0.05),
    });
    let green: Arc<dyn Bsdf + Send + Sync> = Arc::new(DiffuseBsdf {
        albedo: Spectrum::new(0.12, 0.45, 0.15),
    });

    let x: Vector3f = Vector3f::new(1.0, 0.0, 0.0);
    let y: Vector3f = Vector3f::new(0.0, 1.0, 0.0);
    let z: Vector3f = Vector3f::new(0.0, 0.0, 1.0);

    let mut objects: Vec<Arc<dyn SceneObject + Send + Sync>> = vec![
        // floor, ceiling, back wall
        quad_object(Vector3f::new(0.0, 0.0, 0.0), x * 2.0, z * 2.0, y, white.clone()),
        quad_object(Vector3f::new(0.0, 2.0, 0.0), x * 2.0, z * 2.0, -y, white.clone()),
        quad_object(Vector3f::new(0.0, 1.0, -1.0), x * 2.0, y * 2.0, z, white),
        // colored side walls
        quad_object(Vector3f::new(-1.0, 1.0, 0.0), z * 2.0, y * 2.0, x, red),
        quad_object(Vector3f::new(1.0, 1.0, 0.0), z * 2.0, y * 2.0, -x, green),
        // the visible emitter, just below the ceiling
        quad_object(
            Vector3f::new(0.0, 1.999, 0.0),
            x * 0.6,
            z * 0.6,
            -y,
            Arc::new(EmissionBsdf {
                radiance: Spectrum::from_value(12.0),
            }),
        ),
    ];
    objects.push(Arc::new(SphereObject::new(Sphere::new(
        Vector3f::new(-0.45, 0.35, -0.4),
        0.35,
        Arc::new(MirrorBsdf {
            reflectance: Spectrum::from_value(0.95),
        }),
    ))));
    objects.push(Arc::new(SphereObject::new(Sphere::new(
        Vector3f::new(0.45, 0.35, 0.25),
        0.35,
        Arc::new(GlassBsdf {
            reflectance: Spectrum::from_value(0.95),
            transmittance: Spectrum::from_value(0.95),
            ior: 1.5,
        }),
    ))));

    // the sampled light sits a hair below the emitter quad so shadow
    // rays toward it do not graze the geometry
    let lights: Vec<Arc<dyn Light + Send + Sync>> = vec![Arc::new(AreaLight::new(
        Spectrum::from_value(12.0),
        Vector3f::new(0.0, 1.998, 0.0),
        -y,
        x * 0.6,
        z * 0.6,
    ))];

    let camera: Camera = Camera::look_at(
        Vector3f::new(0.0, 1.0, 3.6),
        Vector3f::new(0.0, 1.0, 0.0),
        y,
        40.0,
        1.0,
    );

    (Scene::new(objects, lights), camera)
}

fn main() {
    let opt: Opt = Opt::from_args();

    let split_method: SplitMethod = match opt.bvh.as_str() {
        "morton" => SplitMethod::Morton,
        _ => SplitMethod::Sah,
    };

    let config: RenderConfig = RenderConfig {
        ns_aa: opt.samples,
        max_ray_depth: opt.depth,
        ns_area_light: opt.light_samples,
        num_threads: opt.threads.unwrap_or_else(num_cpus::get),
        use_bdpt: opt.bdpt,
        split_method,
        seed: opt.seed,
        ..RenderConfig::default()
    };
    let aspect: Float = opt.width as Float / opt.height as Float;

    let mut tracer: PathTracer = PathTracer::new(config, None);
    let (scene, mut camera) = build_cornell_box();
    // rebuild the camera for the requested aspect ratio
    if (aspect - 1.0).abs() > 1e-9 {
        camera = Camera::look_at(
            Vector3f::new(0.0, 1.0, 3.6),
            Vector3f::new(0.0, 1.0, 0.0),
            Vector3f::new(0.0, 1.0, 0.0),
            40.0,
            aspect,
        );
    }

    tracer.set_scene(scene);
    tracer.set_camera(camera);
    tracer.set_frame_size(opt.width, opt.height);
    tracer.render_to_completion();

    if opt.tonemap {
        tracer.tonemap(2.2, 1.0, 0.18, 5.0);
    }
    if let Err(e) = tracer.save_image(opt.output.as_deref()) {
        eprintln!("[lumen] Failed to save image: {}", e);
        std::process::exit(1);
    }
}
