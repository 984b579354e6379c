//! Unidirectional path tracing with next-event estimation. Emission is
//! collected on the primary ray and after delta bounces only; every
//! diffuse vertex instead samples the lights directly, so no transport
//! path is counted twice.

// std
use std::sync::Arc;
// lumen
use crate::accelerators::bvh::BVHAccel;
use crate::core::bsdf::{make_coord_space, Bsdf};
use crate::core::common::{clamp_t, Float, Spectrum, EPS_D};
use crate::core::geometry::{Matrix3x3, Ray, Vector3f};
use crate::core::light::Light;
use crate::core::rng::{coin_flip, Rng};
use crate::lights::environment::EnvironmentLight;

pub struct PathIntegrator {
    /// Shadow-ray samples per area light; delta lights always get one.
    pub ns_area_light: usize,
}

impl PathIntegrator {
    pub fn new(ns_area_light: usize) -> Self {
        PathIntegrator {
            ns_area_light: ns_area_light.max(1),
        }
    }

    /// Estimate the radiance arriving along `ray`. `include_le` gates
    /// emission pickup: true for camera rays and after delta bounces,
    /// false after diffuse bounces (the light was already counted by
    /// next-event estimation there).
    pub fn trace_ray(
        &self,
        bvh: &BVHAccel,
        lights: &[Arc<dyn Light + Send + Sync>],
        env_light: Option<&EnvironmentLight>,
        ray: &mut Ray,
        include_le: bool,
        rng: &mut Rng,
    ) -> Spectrum {
        let isect = match bvh.intersect(ray) {
            Some(isect) => isect,
            None => {
                // escaped into the environment
                if include_le {
                    if let Some(env) = env_light {
                        return env.sample_dir(ray);
                    }
                }
                return Spectrum::default();
            }
        };
        let bsdf: Arc<dyn Bsdf + Send + Sync> = match isect.bsdf.clone() {
            Some(bsdf) => bsdf,
            None => return Spectrum::default(),
        };

        let mut l: Spectrum = if include_le {
            bsdf.get_emission()
        } else {
            Spectrum::default()
        };

        let hit: Vector3f = ray.at(isect.t);
        let o2w: Matrix3x3 = make_coord_space(&isect.n);
        let w2o: Matrix3x3 = o2w.transpose();
        let wo: Vector3f = w2o * (-ray.d);

        // next-event estimation at every non-delta vertex
        if !bsdf.is_delta() {
            for light in lights {
                let ns: usize = if light.is_delta_light() {
                    1
                } else {
                    self.ns_area_light
                };
                for _ in 0..ns {
                    let mut wi_world: Vector3f = Vector3f::default();
                    let mut dist_to_light: Float = 0.0;
                    let mut pdf: Float = 0.0;
                    let l_light: Spectrum =
                        light.sample_l(&hit, rng, &mut wi_world, &mut dist_to_light, &mut pdf);
                    if l_light.is_black() || pdf <= 0.0 {
                        continue;
                    }
                    let wi: Vector3f = w2o * wi_world;
                    if wi.z < 0.0 {
                        continue;
                    }
                    let mut shadow: Ray = Ray::new(hit + isect.n * EPS_D, wi_world);
                    shadow.max_t = dist_to_light - EPS_D;
                    if !bvh.intersect_p(&shadow) {
                        l += l_light * bsdf.f(&wo, &wi) * (wi.z / (ns as Float * pdf));
                    }
                }
            }
        }

        if ray.depth == 0 {
            return l;
        }

        // extend the path by importance-sampling the BSDF
        let mut wi: Vector3f = Vector3f::default();
        let mut pdf: Float = 0.0;
        let f: Spectrum = bsdf.sample_f(&wo, &mut wi, &mut pdf, rng);
        if pdf <= 0.0 {
            return l;
        }

        // Russian roulette, continuing with the throughput's luminance
        let continue_p: Float = clamp_t(f.illum(), 0.0, 1.0);
        if !coin_flip(rng, continue_p) {
            return l;
        }

        let wi_world: Vector3f = o2w * wi;
        let mut next: Ray =
            Ray::new_with_depth(hit + wi_world * EPS_D, wi_world, ray.depth - 1);
        let l_rec: Spectrum =
            self.trace_ray(bvh, lights, env_light, &mut next, bsdf.is_delta(), rng);

        l + f * l_rec * (wi.z.abs() / (pdf * continue_p))
    }
}
