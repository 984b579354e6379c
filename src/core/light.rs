//! Light-source interface. All pdfs written by `sample_l` are with
//! respect to solid angle at the shading point.

// lumen
use crate::core::common::{Float, Spectrum};
use crate::core::geometry::{Bounds3f, Ray, Vector3f};
use crate::core::rng::Rng;

pub trait Light {
    /// Incident radiance at `p`. Writes the unit direction toward the
    /// light, the distance to it, and the solid-angle pdf of the
    /// sample.
    fn sample_l(
        &self,
        p: &Vector3f,
        rng: &mut Rng,
        wi: &mut Vector3f,
        dist_to_light: &mut Float,
        pdf: &mut Float,
    ) -> Spectrum;

    /// True for lights sampled from a single point or direction; the
    /// direct-lighting loop takes one sample from these instead of
    /// `ns_area_light`.
    fn is_delta_light(&self) -> bool;

    /// Start a light subpath: emit a ray from the light into the scene
    /// with the combined positional and directional pdf, and write the
    /// surface normal at the emission point. Lights that cannot start
    /// subpaths leave `pdf` at zero.
    fn sample_le(
        &self,
        _rng: &mut Rng,
        _world_bound: &Bounds3f,
        _ray: &mut Ray,
        _n_light: &mut Vector3f,
        pdf: &mut Float,
    ) -> Spectrum {
        *pdf = 0.0;
        Spectrum::default()
    }

    /// Sample a point on the light as seen from `p` and return the
    /// contribution already weighted by the sampling pdf; writes the
    /// sampled point and the unit direction toward it. Zero for lights
    /// without a surface.
    fn sample_from_p(
        &self,
        _p: &Vector3f,
        _rng: &mut Rng,
        _on_light: &mut Vector3f,
        _wi: &mut Vector3f,
    ) -> Spectrum {
        Spectrum::default()
    }
}
