// lumen
use crate::core::common::{radians, Float, Spectrum};
use crate::core::geometry::{vec3_dot, Vector3f};
use crate::core::light::Light;
use crate::core::rng::Rng;

/// Point emitter restricted to a hard cone around `direction`.
pub struct SpotLight {
    pub radiance: Spectrum,
    pub position: Vector3f,
    direction: Vector3f,
    cos_angle: Float,
}

impl SpotLight {
    /// `angle` is the full cone angle in degrees.
    pub fn new(radiance: Spectrum, position: Vector3f, direction: Vector3f, angle: Float) -> Self {
        SpotLight {
            radiance,
            position,
            direction: direction.normalize(),
            cos_angle: (radians(angle) * 0.5).cos(),
        }
    }
}

impl Light for SpotLight {
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
        if vec3_dot(&self.direction, &-*wi) < self.cos_angle {
            return Spectrum::default();
        }
        self.radiance
    }
    fn is_delta_light(&self) -> bool {
        true
    }
}
