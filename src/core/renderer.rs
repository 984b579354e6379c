//! The render scheduler: a small state machine that owns the scene,
//! camera, and buffers, carves the image into tiles, and drives a pool
//! of worker threads through a shared work queue.

// std
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
// others
use crossbeam_channel::{Receiver, Sender, TryRecvError};
// lumen
use crate::accelerators::bvh::{BVHAccel, SplitMethod};
use crate::core::camera::Camera;
use crate::core::common::{Float, Spectrum};
use crate::core::film::{timestamped_filename, FrameBuffer, HdrImageBuffer, SampleBuffer};
use crate::core::geometry::Ray;
use crate::core::light::Light;
use crate::core::rng::Rng;
use crate::core::scene::Scene;
use crate::integrators::bdpt::{BdptIntegrator, PathVertex};
use crate::integrators::path::PathIntegrator;
use crate::lights::environment::EnvironmentLight;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum State {
    Init,
    Ready,
    Visualize,
    Rendering,
    Done,
}

/// One tile of pixels; the unit of work handed to workers.
#[derive(Debug, Clone, Copy)]
pub struct WorkItem {
    pub tile_x: usize,
    pub tile_y: usize,
    pub tile_w: usize,
    pub tile_h: usize,
}

pub struct RenderConfig {
    /// Camera-ray samples per pixel; decomposed into stratified grids.
    pub ns_aa: usize,
    /// Bounce budget for the unidirectional tracer.
    pub max_ray_depth: u32,
    /// Shadow-ray samples per area light.
    pub ns_area_light: usize,
    pub ns_diff: usize,
    pub ns_glsy: usize,
    pub ns_refr: usize,
    pub num_threads: usize,
    pub use_bdpt: bool,
    pub split_method: SplitMethod,
    pub max_leaf_size: usize,
    pub seed: u64,
    pub tile_size: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        RenderConfig {
            ns_aa: 1,
            max_ray_depth: 4,
            ns_area_light: 1,
            ns_diff: 1,
            ns_glsy: 1,
            ns_refr: 1,
            num_threads: num_cpus::get(),
            use_bdpt: false,
            split_method: SplitMethod::Sah,
            max_leaf_size: 4,
            seed: 0,
            tile_size: 32,
        }
    }
}

// everything a worker needs, shared read-only across the pool (the
// buffers have interior synchronization)
struct WorkerShared {
    state: Arc<Mutex<State>>,
    queue: Receiver<WorkItem>,
    continue_raytracing: Arc<AtomicBool>,
    worker_done_count: Arc<AtomicUsize>,
    tiles_done: Arc<AtomicUsize>,
    num_threads: usize,
    bvh: Arc<BVHAccel>,
    lights: Vec<Arc<dyn Light + Send + Sync>>,
    env_light: Option<Arc<EnvironmentLight>>,
    camera: Arc<Camera>,
    sample_buffer: Arc<SampleBuffer>,
    frame_buffer: Arc<Mutex<FrameBuffer>>,
    w: usize,
    h: usize,
    ns_aa: usize,
    ns_area_light: usize,
    max_ray_depth: u32,
    sample_grids: Vec<usize>,
    use_bdpt: bool,
    seed: u64,
}

pub struct PathTracer {
    pub config: RenderConfig,
    state: Arc<Mutex<State>>,
    sample_grids: Vec<usize>,
    env_light: Option<Arc<EnvironmentLight>>,
    scene: Option<Arc<Scene>>,
    camera: Option<Arc<Camera>>,
    bvh: Option<Arc<BVHAccel>>,
    sample_buffer: Arc<SampleBuffer>,
    frame_buffer: Arc<Mutex<FrameBuffer>>,
    continue_raytracing: Arc<AtomicBool>,
    worker_done_count: Arc<AtomicUsize>,
    tiles_done: Arc<AtomicUsize>,
    num_tiles: usize,
    worker_threads: Vec<thread::JoinHandle<()>>,
}

impl PathTracer {
    pub fn new(mut config: RenderConfig, envmap: Option<HdrImageBuffer>) -> Self {
        config.ns_aa = config.ns_aa.max(1);
        config.ns_area_light = config.ns_area_light.max(1);
        config.num_threads = config.num_threads.max(1);
        config.tile_size = config.tile_size.max(1);
        let env_light: Option<Arc<EnvironmentLight>> =
            envmap.map(|map| Arc::new(EnvironmentLight::new(Arc::new(map))));

        let mut tracer: PathTracer = PathTracer {
            config,
            state: Arc::new(Mutex::new(State::Init)),
            sample_grids: Vec::new(),
            env_light,
            scene: None,
            camera: None,
            bvh: None,
            sample_buffer: Arc::new(SampleBuffer::new(0, 0)),
            frame_buffer: Arc::new(Mutex::new(FrameBuffer::new(0, 0))),
            continue_raytracing: Arc::new(AtomicBool::new(false)),
            worker_done_count: Arc::new(AtomicUsize::new(0)),
            tiles_done: Arc::new(AtomicUsize::new(0)),
            num_tiles: 0,
            worker_threads: Vec::new(),
        };
        tracer.set_sample_pattern();
        tracer
    }

    pub fn state(&self) -> State {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, state: State) {
        *self.state.lock().unwrap() = state;
    }

    fn has_valid_configuration(&self) -> bool {
        self.scene.is_some() && self.camera.is_some() && !self.sample_buffer.is_empty()
    }

    /// Install a scene and build its acceleration structure. Replacing
    /// a previously installed scene drops the old one. Only legal
    /// before the configuration is complete.
    pub fn set_scene(&mut self, mut scene: Scene) {
        if self.state() != State::Init {
            return;
        }

        if let Some(ref env) = self.env_light {
            scene.lights.push(env.clone());
        }

        print!("[lumen] Collecting primitives... ");
        let t0: Instant = Instant::now();
        let primitives = scene.collect_primitives();
        println!("Done! ({:.4} sec)", t0.elapsed().as_secs_f64());

        print!("[lumen] Building BVH... ");
        let t0: Instant = Instant::now();
        let bvh: BVHAccel = BVHAccel::new(
            primitives,
            self.config.max_leaf_size,
            self.config.split_method,
        );
        println!("Done! ({:.4} sec)", t0.elapsed().as_secs_f64());

        self.scene = Some(Arc::new(scene));
        self.bvh = Some(Arc::new(bvh));
        if self.has_valid_configuration() {
            self.set_state(State::Ready);
        }
    }

    pub fn set_camera(&mut self, camera: Camera) {
        if self.state() != State::Init {
            return;
        }
        self.camera = Some(Arc::new(camera));
        if self.has_valid_configuration() {
            self.set_state(State::Ready);
        }
    }

    pub fn set_frame_size(&mut self, width: usize, height: usize) {
        let state: State = self.state();
        if state != State::Init && state != State::Ready {
            self.stop();
        }
        self.sample_buffer = Arc::new(SampleBuffer::new(width, height));
        self.frame_buffer = Arc::new(Mutex::new(FrameBuffer::new(width, height)));
        if self.has_valid_configuration() {
            self.set_state(State::Ready);
        }
    }

    pub fn start_visualizing(&mut self) {
        if self.state() != State::Ready {
            return;
        }
        self.set_state(State::Visualize);
    }

    /// Halt whatever is in flight. Cancelling a render is recoverable:
    /// workers exit after their current pixel and the partial image
    /// stays in the buffers.
    pub fn stop(&mut self) {
        match self.state() {
            State::Init | State::Ready => {}
            State::Visualize => {
                self.set_state(State::Ready);
            }
            State::Rendering => {
                self.continue_raytracing.store(false, Ordering::SeqCst);
                self.join_workers();
                self.set_state(State::Ready);
            }
            State::Done => {
                self.join_workers();
                self.set_state(State::Ready);
            }
        }
    }

    /// Drop the scene and camera and return to the unconfigured state.
    pub fn clear(&mut self) {
        if self.state() != State::Ready {
            return;
        }
        self.bvh = None;
        self.scene = None;
        self.camera = None;
        self.sample_buffer = Arc::new(SampleBuffer::new(0, 0));
        self.frame_buffer = Arc::new(Mutex::new(FrameBuffer::new(0, 0)));
        self.set_state(State::Init);
    }

    fn join_workers(&mut self) {
        for handle in self.worker_threads.drain(..) {
            let _ = handle.join();
        }
    }

    pub fn increase_sample_count(&mut self) {
        self.config.ns_aa *= 2;
        self.set_sample_pattern();
        println!("[lumen] Samples per pixel changed to {}", self.config.ns_aa);
    }

    pub fn decrease_sample_count(&mut self) {
        self.config.ns_aa = (self.config.ns_aa / 2).max(1);
        self.set_sample_pattern();
        println!("[lumen] Samples per pixel changed to {}", self.config.ns_aa);
    }

    pub fn increase_area_light_sample_count(&mut self) {
        self.config.ns_area_light *= 2;
        println!(
            "[lumen] Area light samples changed to {}",
            self.config.ns_area_light
        );
    }

    pub fn decrease_area_light_sample_count(&mut self) {
        self.config.ns_area_light = (self.config.ns_area_light / 2).max(1);
        println!(
            "[lumen] Area light samples changed to {}",
            self.config.ns_area_light
        );
    }

    /// Decompose `ns_aa` into a sum of perfect squares, greedily taking
    /// the largest first; each square becomes one stratified subpixel
    /// grid. A single sample means the pixel center, with no grids.
    fn set_sample_pattern(&mut self) {
        self.sample_grids.clear();
        if self.config.ns_aa == 1 {
            return;
        }
        let mut n_samples: usize = self.config.ns_aa;
        while n_samples > 0 {
            let root: usize = (n_samples as Float).sqrt() as usize;
            let rsq: usize = root * root;
            while n_samples >= rsq {
                self.sample_grids.push(root);
                n_samples -= rsq;
            }
        }
    }

    pub fn start_raytracing(&mut self) {
        if self.state() != State::Ready {
            return;
        }
        // Ready guarantees scene, camera, and buffers are present
        let bvh: Arc<BVHAccel> = match self.bvh.clone() {
            Some(bvh) => bvh,
            None => return,
        };
        let scene: Arc<Scene> = match self.scene.clone() {
            Some(scene) => scene,
            None => return,
        };
        let camera: Arc<Camera> = match self.camera.clone() {
            Some(camera) => camera,
            None => return,
        };

        self.sample_buffer.clear();
        self.frame_buffer.lock().unwrap().clear();
        self.continue_raytracing.store(true, Ordering::SeqCst);
        self.worker_done_count.store(0, Ordering::SeqCst);
        self.tiles_done.store(0, Ordering::SeqCst);

        let w: usize = self.sample_buffer.w;
        let h: usize = self.sample_buffer.h;
        let tile: usize = self.config.tile_size;

        // populate the tile work queue; the sender is dropped so an
        // empty queue means no work will ever arrive
        let (tx, rx): (Sender<WorkItem>, Receiver<WorkItem>) = crossbeam_channel::unbounded();
        let mut num_tiles: usize = 0;
        let mut y: usize = 0;
        while y < h {
            let mut x: usize = 0;
            while x < w {
                tx.send(WorkItem {
                    tile_x: x,
                    tile_y: y,
                    tile_w: tile,
                    tile_h: tile,
                })
                .unwrap();
                num_tiles += 1;
                x += tile;
            }
            y += tile;
        }
        drop(tx);
        self.num_tiles = num_tiles;

        self.set_state(State::Rendering);
        println!("[lumen] Rendering...");

        let shared: Arc<WorkerShared> = Arc::new(WorkerShared {
            state: self.state.clone(),
            queue: rx,
            continue_raytracing: self.continue_raytracing.clone(),
            worker_done_count: self.worker_done_count.clone(),
            tiles_done: self.tiles_done.clone(),
            num_threads: self.config.num_threads,
            bvh,
            lights: scene.lights.clone(),
            env_light: self.env_light.clone(),
            camera,
            sample_buffer: self.sample_buffer.clone(),
            frame_buffer: self.frame_buffer.clone(),
            w,
            h,
            ns_aa: self.config.ns_aa,
            ns_area_light: self.config.ns_area_light,
            max_ray_depth: self.config.max_ray_depth,
            sample_grids: self.sample_grids.clone(),
            use_bdpt: self.config.use_bdpt,
            seed: self.config.seed,
        });

        for _ in 0..self.config.num_threads {
            let shared: Arc<WorkerShared> = shared.clone();
            self.worker_threads.push(thread::spawn(move || {
                worker_loop(&shared);
            }));
        }
    }

    pub fn is_done(&self) -> bool {
        self.state() == State::Done
    }

    pub fn num_tiles(&self) -> usize {
        self.num_tiles
    }

    pub fn tiles_done(&self) -> usize {
        self.tiles_done.load(Ordering::Relaxed)
    }

    /// Kick off a render and block with a progress bar until the last
    /// worker finishes.
    pub fn render_to_completion(&mut self) {
        self.start_raytracing();
        if self.state() != State::Rendering {
            println!("[lumen] Refusing to render: configuration incomplete");
            return;
        }

        let t0: Instant = Instant::now();
        let mut bar = pbr::ProgressBar::new(self.num_tiles as u64);
        bar.show_speed = false;
        loop {
            bar.set(self.tiles_done() as u64);
            if self.is_done() {
                break;
            }
            thread::sleep(Duration::from_millis(50));
        }
        bar.finish();
        self.join_workers();
        println!(
            "[lumen] Rendering finished ({:.4} sec)",
            t0.elapsed().as_secs_f64()
        );
    }

    pub fn sample_buffer(&self) -> &SampleBuffer {
        &self.sample_buffer
    }

    /// Apply the global tone-mapping operator to the whole frame
    /// buffer instead of the per-tile gamma encode.
    pub fn tonemap(&self, gamma: Float, level: Float, key: Float, wht: Float) {
        let mut fb = self.frame_buffer.lock().unwrap();
        self.sample_buffer.tonemap(&mut fb, gamma, level, key, wht);
    }

    /// Write the frame buffer as a PNG; the filename defaults to a
    /// timestamped one in the working directory.
    pub fn save_image(&self, path: Option<&Path>) -> io::Result<()> {
        let fb = self.frame_buffer.lock().unwrap();
        match path {
            Some(path) => fb.save_image(path),
            None => {
                let name: String = timestamped_filename();
                println!("[lumen] Saving to {}", name);
                fb.save_image(Path::new(&name))
            }
        }
    }
}

impl Drop for PathTracer {
    fn drop(&mut self) {
        self.continue_raytracing.store(false, Ordering::SeqCst);
        self.join_workers();
    }
}

fn worker_loop(shared: &WorkerShared) {
    let path_integrator: PathIntegrator = PathIntegrator::new(shared.ns_area_light);
    let bdpt_integrator: BdptIntegrator = BdptIntegrator::default();
    let mut rng: Rng = Rng::new();
    // per-worker scratch, reused across every pixel this worker owns
    let mut samples: Vec<(Float, Float)> = Vec::new();
    let mut eye_path: Vec<PathVertex> = Vec::new();
    let mut light_path: Vec<PathVertex> = Vec::new();

    'tiles: loop {
        if !shared.continue_raytracing.load(Ordering::Relaxed) {
            break;
        }
        let item: WorkItem = match shared.queue.try_recv() {
            Ok(item) => item,
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
        };

        let x1: usize = (item.tile_x + item.tile_w).min(shared.w);
        let y1: usize = (item.tile_y + item.tile_h).min(shared.h);

        for y in item.tile_y..y1 {
            for x in item.tile_x..x1 {
                if !shared.continue_raytracing.load(Ordering::Relaxed) {
                    break 'tiles;
                }
                if shared.use_bdpt {
                    raytrace_pixel_bdpt(
                        shared,
                        &bdpt_integrator,
                        x,
                        y,
                        &mut samples,
                        &mut eye_path,
                        &mut light_path,
                        &mut rng,
                    );
                } else {
                    raytrace_pixel(shared, &path_integrator, x, y, &mut samples, &mut rng);
                }
            }
        }

        // refresh the displayable image: the unidirectional tracer only
        // touched this tile, BDPT splats may have landed anywhere
        {
            let mut fb = shared.frame_buffer.lock().unwrap();
            if shared.use_bdpt {
                shared.sample_buffer.to_color(&mut fb, 0, 0, shared.w, shared.h);
            } else {
                shared
                    .sample_buffer
                    .to_color(&mut fb, item.tile_x, item.tile_y, x1, y1);
            }
        }
        shared.tiles_done.fetch_add(1, Ordering::SeqCst);
    }

    let done: usize = shared.worker_done_count.fetch_add(1, Ordering::SeqCst) + 1;
    if done == shared.num_threads {
        let canceled: bool = !shared.continue_raytracing.load(Ordering::SeqCst);
        let mut state = shared.state.lock().unwrap();
        if *state == State::Rendering {
            *state = if canceled { State::Ready } else { State::Done };
        }
    }
}

// jittered stratified film samples for one pixel, following the
// perfect-square decomposition; a lone sample takes the pixel center
fn film_samples(
    shared: &WorkerShared,
    x: usize,
    y: usize,
    rng: &mut Rng,
    out: &mut Vec<(Float, Float)>,
) {
    out.clear();
    if shared.ns_aa == 1 {
        out.push((
            (x as Float + 0.5) / shared.w as Float,
            (y as Float + 0.5) / shared.h as Float,
        ));
        return;
    }
    for &grid in &shared.sample_grids {
        for i in 0..grid {
            for j in 0..grid {
                let sx: Float = (i as Float + rng.uniform_float()) / grid as Float;
                let sy: Float = (j as Float + rng.uniform_float()) / grid as Float;
                out.push((
                    (x as Float + sx) / shared.w as Float,
                    (y as Float + sy) / shared.h as Float,
                ));
            }
        }
    }
}

fn raytrace_pixel(
    shared: &WorkerShared,
    integrator: &PathIntegrator,
    x: usize,
    y: usize,
    samples: &mut Vec<(Float, Float)>,
    rng: &mut Rng,
) {
    rng.seed(shared.seed, (y * shared.w + x) as u64);
    film_samples(shared, x, y, rng, samples);

    let mut sum: Spectrum = Spectrum::default();
    let env = shared.env_light.as_deref();
    for &(u, v) in samples.iter() {
        let mut ray: Ray = shared.camera.generate_ray(u, v);
        ray.depth = shared.max_ray_depth;
        sum += integrator.trace_ray(&shared.bvh, &shared.lights, env, &mut ray, true, rng);
    }

    let avg: Spectrum = sum / shared.ns_aa as Float;
    shared.sample_buffer.update_pixel(&avg, x, y);
}

#[allow(clippy::too_many_arguments)]
fn raytrace_pixel_bdpt(
    shared: &WorkerShared,
    integrator: &BdptIntegrator,
    x: usize,
    y: usize,
    samples: &mut Vec<(Float, Float)>,
    eye_path: &mut Vec<PathVertex>,
    light_path: &mut Vec<PathVertex>,
    rng: &mut Rng,
) {
    rng.seed(shared.seed, (y * shared.w + x) as u64);
    film_samples(shared, x, y, rng, samples);

    let scale: Float = 1.0 / shared.ns_aa as Float;
    let env = shared.env_light.as_deref();
    for &(u, v) in samples.iter() {
        integrator.raytrace_pixel_sample(
            &shared.bvh,
            &shared.lights,
            env,
            &shared.camera,
            &shared.sample_buffer,
            x,
            y,
            u,
            v,
            scale,
            eye_path,
            light_path,
            rng,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_pattern_decomposition() {
        let mut tracer: PathTracer = PathTracer::new(
            RenderConfig {
                ns_aa: 1,
                ..RenderConfig::default()
            },
            None,
        );
        assert!(tracer.sample_grids.is_empty());

        tracer.config.ns_aa = 4;
        tracer.set_sample_pattern();
        assert_eq!(tracer.sample_grids, vec![2]);

        // 7 = 4 + 1 + 1 + 1
        tracer.config.ns_aa = 7;
        tracer.set_sample_pattern();
        assert_eq!(tracer.sample_grids, vec![2, 1, 1, 1]);

        // 64 = 8^2
        tracer.config.ns_aa = 64;
        tracer.set_sample_pattern();
        assert_eq!(tracer.sample_grids, vec![8]);

        // the grids always account for every sample
        for ns in 1..100 {
            tracer.config.ns_aa = ns;
            tracer.set_sample_pattern();
            let total: usize = tracer.sample_grids.iter().map(|g| g * g).sum();
            if ns == 1 {
                assert_eq!(total, 0);
            } else {
                assert_eq!(total, ns);
            }
        }
    }

    #[test]
    fn test_sample_count_key_semantics() {
        let mut tracer: PathTracer = PathTracer::new(RenderConfig::default(), None);
        tracer.increase_sample_count();
        assert_eq!(tracer.config.ns_aa, 2);
        tracer.decrease_sample_count();
        tracer.decrease_sample_count();
        assert_eq!(tracer.config.ns_aa, 1);
        tracer.increase_area_light_sample_count();
        assert_eq!(tracer.config.ns_area_light, 2);
        tracer.decrease_area_light_sample_count();
        tracer.decrease_area_light_sample_count();
        assert_eq!(tracer.config.ns_area_light, 1);
    }

    #[test]
    fn test_incomplete_configuration_refused() {
        let mut tracer: PathTracer = PathTracer::new(RenderConfig::default(), None);
        assert_eq!(tracer.state(), State::Init);
        // no scene, no camera, no buffer: the transition is refused
        tracer.start_raytracing();
        assert_eq!(tracer.state(), State::Init);
        tracer.set_frame_size(8, 8);
        assert_eq!(tracer.state(), State::Init);
        tracer.start_raytracing();
        assert_eq!(tracer.state(), State::Init);
    }

    #[test]
    fn test_visualize_transitions() {
        let mut tracer: PathTracer = PathTracer::new(RenderConfig::default(), None);
        // visualize is only reachable from Ready
        tracer.start_visualizing();
        assert_eq!(tracer.state(), State::Init);
    }
}
