// lumen
use crate::core::common::{Float, Spectrum, INFINITY};
use crate::core::geometry::{Matrix3x3, Point2f, Vector3f};
use crate::core::light::Light;
use crate::core::rng::Rng;
use crate::core::sampling::{uniform_hemisphere_pdf, uniform_sample_2d, uniform_sample_hemisphere};

/// Uniform radiance arriving from the entire upper (world +y)
/// hemisphere.
pub struct InfiniteHemisphereLight {
    pub radiance: Spectrum,
    sample_to_world: Matrix3x3,
}

impl InfiniteHemisphereLight {
    pub fn new(radiance: Spectrum) -> Self {
        // rotate the sampler's +z hemisphere up to world +y
        InfiniteHemisphereLight {
            radiance,
            sample_to_world: Matrix3x3::from_columns(
                Vector3f::new(1.0, 0.0, 0.0),
                Vector3f::new(0.0, 0.0, -1.0),
                Vector3f::new(0.0, 1.0, 0.0),
            ),
        }
    }
}

impl Light for InfiniteHemisphereLight {
    fn sample_l(
        &self,
        _p: &Vector3f,
        rng: &mut Rng,
        wi: &mut Vector3f,
        dist_to_light: &mut Float,
        pdf: &mut Float,
    ) -> Spectrum {
        let u: Point2f = uniform_sample_2d(rng);
        let dir: Vector3f = uniform_sample_hemisphere(&u);
        *wi = self.sample_to_world * dir;
        *dist_to_light = INFINITY;
        *pdf = uniform_hemisphere_pdf();
        self.radiance
    }
    fn is_delta_light(&self) -> bool {
        false
    }
}
