//! Scattering at surfaces. All BSDF evaluation happens in a
//! surface-local frame whose +z axis is the shading normal, so
//! `cos_theta(w)` is just `w.z`.

// lumen
use crate::core::common::{Float, Spectrum, INV_PI, PI};
use crate::core::geometry::{vec3_cross, Matrix3x3, Point2f, Vector3f};
use crate::core::rng::{coin_flip, Rng};
use crate::core::sampling::{cosine_sample_hemisphere, uniform_sample_2d};

/// Build an orthonormal basis with `n` as the third column. The helper
/// axis is chosen along the component of `n` with the smallest
/// magnitude so the cross products stay well conditioned.
pub fn make_coord_space(n: &Vector3f) -> Matrix3x3 {
    let z: Vector3f = n.normalize();
    let mut h: Vector3f = z;
    if h.x.abs() <= h.y.abs() && h.x.abs() <= h.z.abs() {
        h.x = 1.0;
    } else if h.y.abs() <= h.x.abs() && h.y.abs() <= h.z.abs() {
        h.y = 1.0;
    } else {
        h.z = 1.0;
    }
    let y: Vector3f = vec3_cross(&h, &z).normalize();
    let x: Vector3f = vec3_cross(&z, &y).normalize();
    Matrix3x3::from_columns(x, y, z)
}

pub fn cos_theta(w: &Vector3f) -> Float {
    w.z
}

pub fn abs_cos_theta(w: &Vector3f) -> Float {
    w.z.abs()
}

pub fn sin_theta2(w: &Vector3f) -> Float {
    (1.0 - cos_theta(w) * cos_theta(w)).max(0.0)
}

/// Mirror `wo` about the surface normal.
pub fn reflect(wo: &Vector3f, wi: &mut Vector3f) {
    *wi = Vector3f::new(-wo.x, -wo.y, wo.z);
}

/// Refract `wo` through the surface with relative index `ior`. Returns
/// false on total internal reflection, in which case `wi` is untouched.
pub fn refract(wo: &Vector3f, wi: &mut Vector3f, ior: Float) -> bool {
    let entering: bool = cos_theta(wo) > 0.0;

    let mut ei: Float = 1.0;
    let mut et: Float = ior;
    if !entering {
        ::std::mem::swap(&mut ei, &mut et);
    }

    let sini2: Float = sin_theta2(wo);
    let eta: Float = ei / et;
    let sint2: Float = eta * eta * sini2;
    if sint2 > 1.0 {
        return false;
    }
    let mut cost: Float = (1.0 - sint2).sqrt();
    if entering {
        cost = -cost;
    }

    *wi = Vector3f::new(-eta * wo.x, -eta * wo.y, cost);
    true
}

pub trait Bsdf {
    /// BSDF value for the given outgoing/incoming pair, both in the
    /// surface-local frame. Delta distributions return zero here.
    fn f(&self, wo: &Vector3f, wi: &Vector3f) -> Spectrum;
    /// Sample an incoming direction for `wo`, writing it and its pdf
    /// through the out-parameters, and return the BSDF value.
    fn sample_f(
        &self,
        wo: &Vector3f,
        wi: &mut Vector3f,
        pdf: &mut Float,
        rng: &mut Rng,
    ) -> Spectrum;
    /// True when scattering is concentrated on a measure-zero set of
    /// directions (mirror, refraction, glass).
    fn is_delta(&self) -> bool;
    fn get_emission(&self) -> Spectrum {
        Spectrum::default()
    }
}

pub struct DiffuseBsdf {
    pub albedo: Spectrum,
}

impl Bsdf for DiffuseBsdf {
    fn f(&self, _wo: &Vector3f, _wi: &Vector3f) -> Spectrum {
        self.albedo * INV_PI
    }
    fn sample_f(
        &self,
        _wo: &Vector3f,
        wi: &mut Vector3f,
        pdf: &mut Float,
        rng: &mut Rng,
    ) -> Spectrum {
        let u: Point2f = uniform_sample_2d(rng);
        *wi = cosine_sample_hemisphere(&u);
        *pdf = wi.z * INV_PI;
        self.albedo * INV_PI
    }
    fn is_delta(&self) -> bool {
        false
    }
}

pub struct MirrorBsdf {
    pub reflectance: Spectrum,
}

impl Bsdf for MirrorBsdf {
    fn f(&self, _wo: &Vector3f, _wi: &Vector3f) -> Spectrum {
        Spectrum::default()
    }
    fn sample_f(
        &self,
        wo: &Vector3f,
        wi: &mut Vector3f,
        pdf: &mut Float,
        _rng: &mut Rng,
    ) -> Spectrum {
        *pdf = 1.0;
        reflect(wo, wi);
        // dividing by cos_theta cancels the cosine factor the estimator
        // applies downstream
        self.reflectance * (1.0 / abs_cos_theta(wo))
    }
    fn is_delta(&self) -> bool {
        true
    }
}

pub struct RefractionBsdf {
    pub transmittance: Spectrum,
    pub ior: Float,
}

impl Bsdf for RefractionBsdf {
    fn f(&self, _wo: &Vector3f, _wi: &Vector3f) -> Spectrum {
        Spectrum::default()
    }
    fn sample_f(
        &self,
        wo: &Vector3f,
        wi: &mut Vector3f,
        pdf: &mut Float,
        _rng: &mut Rng,
    ) -> Spectrum {
        *pdf = 1.0;

        let entering: bool = cos_theta(wo) > 0.0;
        let mut ei: Float = 1.0;
        let mut et: Float = self.ior;
        let mut cos: Float = cos_theta(wo);
        if !entering {
            ::std::mem::swap(&mut ei, &mut et);
            cos = -cos;
        }
        let inveta: Float = et / ei;
        let inveta2: Float = inveta * inveta;

        if refract(wo, wi, self.ior) {
            // radiance is compressed by the squared index ratio as the
            // solid angle changes across the boundary
            self.transmittance * (inveta2 / cos)
        } else {
            // total internal reflection
            reflect(wo, wi);
            Spectrum::default()
        }
    }
    fn is_delta(&self) -> bool {
        true
    }
}

pub struct GlassBsdf {
    pub reflectance: Spectrum,
    pub transmittance: Spectrum,
    pub ior: Float,
}

impl Bsdf for GlassBsdf {
    fn f(&self, _wo: &Vector3f, _wi: &Vector3f) -> Spectrum {
        // wi is never the exact mirror direction of wo for a sampled pair
        Spectrum::default()
    }
    fn sample_f(
        &self,
        wo: &Vector3f,
        wi: &mut Vector3f,
        pdf: &mut Float,
        rng: &mut Rng,
    ) -> Spectrum {
        // Schlick's approximation of the Fresnel coefficient, used as
        // the probability of sampling the reflection branch
        let r0: Float =
            (self.ior - 1.0) * (self.ior - 1.0) / ((self.ior + 1.0) * (self.ior + 1.0));
        let mut cos: Float = cos_theta(wo);
        let f: Float = 1.0 - cos.abs();
        let g: Float = ((f * f) * (f * f)) * f;
        let fresnel_coe: Float = r0 + (1.0 - r0) * g;

        let entering: bool = cos > 0.0;
        let mut ei: Float = 1.0;
        let mut et: Float = self.ior;
        if !entering {
            ::std::mem::swap(&mut ei, &mut et);
            cos = -cos;
        }
        let inveta: Float = et / ei;
        let inveta2: Float = inveta * inveta;

        if !refract(wo, wi, self.ior) {
            // total internal reflection; always reflect
            *pdf = 1.0;
            reflect(wo, wi);
            return self.reflectance * (1.0 / cos);
        }

        if coin_flip(rng, fresnel_coe) {
            *pdf = fresnel_coe;
            reflect(wo, wi);
            self.reflectance * (fresnel_coe / cos)
        } else {
            // the refracted direction is already in wi
            let one_minus_fresnel: Float = 1.0 - fresnel_coe;
            *pdf = one_minus_fresnel;
            self.transmittance * (one_minus_fresnel * inveta2 / cos)
        }
    }
    fn is_delta(&self) -> bool {
        true
    }
}

pub struct EmissionBsdf {
    pub radiance: Spectrum,
}

impl Bsdf for EmissionBsdf {
    fn f(&self, _wo: &Vector3f, _wi: &Vector3f) -> Spectrum {
        Spectrum::default()
    }
    /// Light-subpath construction samples an outgoing direction from the
    /// emitter cosine-weighted; the emitted radiance itself is reported
    /// by `get_emission`, not here.
    fn sample_f(
        &self,
        _wo: &Vector3f,
        wi: &mut Vector3f,
        pdf: &mut Float,
        rng: &mut Rng,
    ) -> Spectrum {
        let u: Point2f = uniform_sample_2d(rng);
        *wi = cosine_sample_hemisphere(&u);
        *pdf = wi.z / PI;
        Spectrum::default()
    }
    fn is_delta(&self) -> bool {
        false
    }
    fn get_emission(&self) -> Spectrum {
        self.radiance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geometry::vec3_dot;

    #[test]
    fn test_coord_space_orthonormal() {
        for n in &[
            Vector3f::new(0.0, 0.0, 1.0),
            Vector3f::new(1.0, 2.0, -3.0).normalize(),
            Vector3f::new(-0.2, 0.9, 0.1).normalize(),
        ] {
            let o2w: Matrix3x3 = make_coord_space(n);
            let x: Vector3f = o2w.cols[0];
            let y: Vector3f = o2w.cols[1];
            let z: Vector3f = o2w.cols[2];
            assert!((x.length() - 1.0).abs() < 1e-9);
            assert!((y.length() - 1.0).abs() < 1e-9);
            assert!(vec3_dot(&x, &y).abs() < 1e-9);
            assert!(vec3_dot(&y, &z).abs() < 1e-9);
            assert!((vec3_dot(&z, n) - 1.0).abs() < 1e-9);
        }
    }

    // wo = (0.6, 0, 0.8) reflects to (-0.6, 0, 0.8) with pdf 1
    #[test]
    fn test_mirror_reflection() {
        let bsdf: MirrorBsdf = MirrorBsdf {
            reflectance: Spectrum::from_value(1.0),
        };
        let wo: Vector3f = Vector3f::new(0.6, 0.0, 0.8);
        let mut wi: Vector3f = Vector3f::default();
        let mut pdf: Float = 0.0;
        let mut rng: Rng = Rng::new();
        let f: Spectrum = bsdf.sample_f(&wo, &mut wi, &mut pdf, &mut rng);
        assert_eq!(wi, Vector3f::new(-0.6, 0.0, 0.8));
        assert_eq!(pdf, 1.0);
        assert!((f.r - 1.0 / 0.8).abs() < 1e-12);
        assert!(bsdf.is_delta());
        assert!(bsdf.f(&wo, &wi).is_black());
    }

    #[test]
    fn test_diffuse_value() {
        let albedo: Spectrum = Spectrum::new(0.25, 0.5, 0.75);
        let bsdf: DiffuseBsdf = DiffuseBsdf { albedo };
        let wo: Vector3f = Vector3f::new(0.0, 0.0, 1.0);
        let wi: Vector3f = Vector3f::new(0.0, 0.0, 1.0);
        let f: Spectrum = bsdf.f(&wo, &wi);
        assert!((f.r - albedo.r * INV_PI).abs() < 1e-12);
        assert!(!bsdf.is_delta());
    }

    // Monte-Carlo integral of f * cos / pdf over the sampling
    // distribution must converge to the albedo (energy conservation)
    #[test]
    fn test_diffuse_white_furnace() {
        let albedo: Spectrum = Spectrum::new(0.8, 0.6, 0.4);
        let bsdf: DiffuseBsdf = DiffuseBsdf { albedo };
        let wo: Vector3f = Vector3f::new(0.0, 0.0, 1.0);
        let mut rng: Rng = Rng::new();
        rng.seed(17, 3);
        let n: usize = 50_000;
        let mut sum: Spectrum = Spectrum::default();
        for _ in 0..n {
            let mut wi: Vector3f = Vector3f::default();
            let mut pdf: Float = 0.0;
            let f: Spectrum = bsdf.sample_f(&wo, &mut wi, &mut pdf, &mut rng);
            if pdf > 0.0 {
                sum += f * wi.z / pdf;
            }
        }
        let estimate: Spectrum = sum / n as Float;
        assert!((estimate.r - albedo.r).abs() < 0.01);
        assert!((estimate.g - albedo.g).abs() < 0.01);
        assert!((estimate.b - albedo.b).abs() < 0.01);
    }

    #[test]
    fn test_refraction_bends_ray() {
        let bsdf: RefractionBsdf = RefractionBsdf {
            transmittance: Spectrum::from_value(1.0),
            ior: 1.5,
        };
        let wo: Vector3f = Vector3f::new(0.6, 0.0, 0.8);
        let mut wi: Vector3f = Vector3f::default();
        let mut pdf: Float = 0.0;
        let mut rng: Rng = Rng::new();
        let f: Spectrum = bsdf.sample_f(&wo, &mut wi, &mut pdf, &mut rng);
        assert_eq!(pdf, 1.0);
        // entering: transmitted ray continues into the -z hemisphere
        assert!(wi.z < 0.0);
        assert!((wi.length() - 1.0).abs() < 1e-9);
        assert!(!f.is_black());
        // Snell: sin_t = sin_i / ior
        assert!((wi.x - (-0.6 / 1.5)).abs() < 1e-9);
    }

    #[test]
    fn test_refraction_total_internal_reflection() {
        let bsdf: RefractionBsdf = RefractionBsdf {
            transmittance: Spectrum::from_value(1.0),
            ior: 1.5,
        };
        // grazing exit from the dense side: sin_i * ior > 1
        let wo: Vector3f = Vector3f::new(0.9, 0.0, -(1.0_f64 - 0.81).sqrt());
        let mut wi: Vector3f = Vector3f::default();
        let mut pdf: Float = 0.0;
        let mut rng: Rng = Rng::new();
        let f: Spectrum = bsdf.sample_f(&wo, &mut wi, &mut pdf, &mut rng);
        assert_eq!(pdf, 1.0);
        assert!(f.is_black());
        assert_eq!(wi, Vector3f::new(-wo.x, -wo.y, wo.z));
    }

    #[test]
    fn test_glass_branch_pdfs() {
        let bsdf: GlassBsdf = GlassBsdf {
            reflectance: Spectrum::from_value(1.0),
            transmittance: Spectrum::from_value(1.0),
            ior: 1.5,
        };
        let wo: Vector3f = Vector3f::new(0.6, 0.0, 0.8);
        let r0: Float = (0.5 / 2.5) * (0.5 / 2.5);
        let fres: Float = r0 + (1.0 - r0) * (1.0 - 0.8_f64).powi(5);
        let mut rng: Rng = Rng::new();
        rng.seed(23, 1);
        for _ in 0..200 {
            let mut wi: Vector3f = Vector3f::default();
            let mut pdf: Float = 0.0;
            let f: Spectrum = bsdf.sample_f(&wo, &mut wi, &mut pdf, &mut rng);
            if wi.z > 0.0 {
                // reflection branch
                assert!((pdf - fres).abs() < 1e-9);
            } else {
                assert!((pdf - (1.0 - fres)).abs() < 1e-9);
            }
            assert!(!f.is_black());
        }
    }

    #[test]
    fn test_emission() {
        let bsdf: EmissionBsdf = EmissionBsdf {
            radiance: Spectrum::from_value(5.0),
        };
        let wo: Vector3f = Vector3f::new(0.0, 0.0, 1.0);
        assert!(bsdf.f(&wo, &wo).is_black());
        assert_eq!(bsdf.get_emission(), Spectrum::from_value(5.0));
        let mut wi: Vector3f = Vector3f::default();
        let mut pdf: Float = 0.0;
        let mut rng: Rng = Rng::new();
        let f: Spectrum = bsdf.sample_f(&wo, &mut wi, &mut pdf, &mut rng);
        assert!(f.is_black());
        assert!(wi.z >= 0.0);
        assert!((pdf - wi.z / PI).abs() < 1e-12);
    }
}
