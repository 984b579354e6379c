// lumen
use crate::core::bsdf::make_coord_space;
use crate::core::common::{Float, Spectrum, EPS_D, PI};
use crate::core::geometry::{vec3_cross, vec3_dot, Bounds3f, Matrix3x3, Point2f, Ray, Vector3f};
use crate::core::light::Light;
use crate::core::rng::Rng;
use crate::core::sampling::{cosine_sample_hemisphere, uniform_sample_2d};

/// One-sided rectangular emitter. `position` is the rectangle center,
/// `dim_x`/`dim_y` span it, and radiance leaves the face that
/// `direction` points away from.
pub struct AreaLight {
    pub radiance: Spectrum,
    pub position: Vector3f,
    pub direction: Vector3f,
    dim_x: Vector3f,
    dim_y: Vector3f,
    area: Float,
}

impl AreaLight {
    pub fn new(
        radiance: Spectrum,
        position: Vector3f,
        direction: Vector3f,
        dim_x: Vector3f,
        dim_y: Vector3f,
    ) -> Self {
        AreaLight {
            radiance,
            position,
            direction: direction.normalize(),
            dim_x,
            dim_y,
            area: vec3_cross(&dim_x, &dim_y).length(),
        }
    }

    fn sample_point(&self, rng: &mut Rng) -> Vector3f {
        let u: Point2f = uniform_sample_2d(rng);
        self.position + (u.x - 0.5) * self.dim_x + (u.y - 0.5) * self.dim_y
    }
}

impl Light for AreaLight {
    fn sample_l(
        &self,
        p: &Vector3f,
        rng: &mut Rng,
        wi: &mut Vector3f,
        dist_to_light: &mut Float,
        pdf: &mut Float,
    ) -> Spectrum {
        let d: Vector3f = self.sample_point(rng) - *p;
        let cos_theta: Float = vec3_dot(&d, &self.direction);
        let sq_dist: Float = d.length_squared();
        let dist: Float = sq_dist.sqrt();
        *wi = d / dist;
        *dist_to_light = dist;
        // convert the area pdf 1/A into solid angle at the shading point
        *pdf = sq_dist / (self.area * (cos_theta / dist).abs());
        if cos_theta < 0.0 {
            self.radiance
        } else {
            // back face
            Spectrum::default()
        }
    }

    fn is_delta_light(&self) -> bool {
        false
    }

    fn sample_le(
        &self,
        rng: &mut Rng,
        _world_bound: &Bounds3f,
        ray: &mut Ray,
        n_light: &mut Vector3f,
        pdf: &mut Float,
    ) -> Spectrum {
        let q: Vector3f = self.sample_point(rng);
        // cosine-weighted direction about the emitting face
        let o2w: Matrix3x3 = make_coord_space(&self.direction);
        let u: Point2f = uniform_sample_2d(rng);
        let w_local: Vector3f = cosine_sample_hemisphere(&u);
        let w: Vector3f = o2w * w_local;
        *ray = Ray::new(q + w * EPS_D, w);
        *n_light = self.direction;
        *pdf = (1.0 / self.area) * (w_local.z / PI);
        self.radiance
    }

    fn sample_from_p(
        &self,
        p: &Vector3f,
        rng: &mut Rng,
        on_light: &mut Vector3f,
        wi: &mut Vector3f,
    ) -> Spectrum {
        let q: Vector3f = self.sample_point(rng);
        let d: Vector3f = q - *p;
        let sq_dist: Float = d.length_squared();
        let dist: Float = sq_dist.sqrt();
        *on_light = q;
        *wi = d / dist;
        let cos_l: Float = vec3_dot(&self.direction, &-*wi);
        if cos_l <= 0.0 {
            return Spectrum::default();
        }
        // radiance over the solid-angle pdf d^2 / (A cos_l)
        self.radiance * (self.area * cos_l / sq_dist)
    }
}
