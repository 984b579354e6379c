// lumen
use crate::core::common::{Float, Spectrum};
use crate::core::geometry::Vector3f;
use crate::core::light::Light;
use crate::core::rng::Rng;

pub struct PointLight {
    pub radiance: Spectrum,
    pub position: Vector3f,
}

impl PointLight {
    pub fn new(radiance: Spectrum, position: Vector3f) -> Self {
        PointLight { radiance, position }
    }
}

impl Light for PointLight {
    fn sample_l(
        &self,
        p: &Vector3f,
        _rng: &mut Rng,
        wi: &mut Vector3f,
        dist_to_light: &mut Float,
        pdf: &mut Float,
    ) -> Spectrum {
        let d: Vector3f = self.position - *p;
        *dist_to_light = d.length();
        *wi = d / *dist_to_light;
        *pdf = 1.0;
        self.radiance
    }
    fn is_delta_light(&self) -> bool {
        true
    }
}
