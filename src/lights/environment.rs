// std
use std::sync::Arc;
// lumen
use crate::core::common::{Float, Spectrum, EPS_D, INFINITY, PI};
use crate::core::film::HdrImageBuffer;
use crate::core::geometry::{Bounds3f, Matrix3x3, Ray, Vector3f};
use crate::core::light::Light;
use crate::core::rng::Rng;
use crate::core::sampling::AliasTable;

/// Image-based light over the whole sphere of directions, importance
/// sampled through an alias table built over pixel luminance weighted
/// by each cell's solid angle.
pub struct EnvironmentLight {
    env_map: Arc<HdrImageBuffer>,
    world_to_local: Matrix3x3,
    local_to_world: Matrix3x3,
    /// Pre-averaged pole colors; bilinear lookups blend toward these at
    /// the top and bottom rows instead of wrapping across the pole.
    top_l: Spectrum,
    bottom_l: Spectrum,
    cell_areas: Vec<Float>,
    alias_table: AliasTable,
}

impl EnvironmentLight {
    pub fn new(env_map: Arc<HdrImageBuffer>) -> Self {
        let world_to_local: Matrix3x3 = Matrix3x3::from_columns(
            Vector3f::new(0.0, 0.0, 1.0),
            Vector3f::new(0.0, 1.0, 0.0),
            Vector3f::new(-1.0, 0.0, 0.0),
        );
        let local_to_world: Matrix3x3 = world_to_local.transpose();

        let w: usize = env_map.w;
        let h: usize = env_map.h;

        let mut top_l: Spectrum = Spectrum::default();
        let mut bottom_l: Spectrum = Spectrum::default();
        let last_row_start: usize = (h - 1) * w;
        for x in 0..w {
            top_l += env_map.data[x];
            bottom_l += env_map.data[last_row_start + x];
        }
        top_l = top_l * (1.0 / w as Float);
        bottom_l = bottom_l * (1.0 / w as Float);

        // per-pixel sampling weight: luminance times the solid angle of
        // the cell, dPhi * (cos(theta1) - cos(theta2))
        let mut probs: Vec<Float> = vec![0.0; w * h];
        let mut cell_areas: Vec<Float> = vec![0.0; h];
        let d_phi: Float = 2.0 * PI / w as Float;
        let mut net_sum: Float = 0.0;
        for y in 0..h {
            let theta1: Float = y as Float / h as Float * PI;
            let theta2: Float = (y + 1) as Float / h as Float * PI;
            let cell_area: Float = d_phi * (theta1.cos() - theta2.cos());
            cell_areas[y] = cell_area;
            for i in y * w..y * w + w {
                probs[i] = env_map.data[i].illum() * cell_area;
                net_sum += probs[i];
            }
        }
        // scale so the average weight is 1, purely for conditioning
        for p in &mut probs {
            *p *= w as Float * h as Float / net_sum;
        }

        EnvironmentLight {
            env_map,
            world_to_local,
            local_to_world,
            top_l,
            bottom_l,
            cell_areas,
            alias_table: AliasTable::new(probs),
        }
    }

    /// Radiance along an arbitrary escaped ray, bilinearly filtered on
    /// the (u, v) chart with pole rows blended to their average color.
    pub fn sample_dir(&self, r: &Ray) -> Spectrum {
        let dir: Vector3f = (self.world_to_local * r.d).normalize();
        let u: Float = dir.z.atan2(dir.x) / (2.0 * PI) + 0.5;
        let v: Float = dir.y.min(1.0).max(-1.0).acos() / PI;

        let w: usize = self.env_map.w;
        let h: usize = self.env_map.h;
        let data: &[Spectrum] = &self.env_map.data;

        // an extra w on x keeps the wraparound arithmetic unsigned
        let x: Float = u * w as Float + w as Float;
        let y: Float = v * h as Float;

        let x0: usize = (x - 0.5).floor() as usize;
        let x1: usize = x0 + 1;
        let wx0: Float = (x1 as Float + 0.5) - x;
        let wx1: Float = x - (x0 as Float + 0.5);
        let x0: usize = x0 % w;
        let x1: usize = x1 % w;

        if y < 0.5 {
            let wy1: Float = 0.5 + y;
            data[x0] * (wx0 * wy1) + data[x1] * (wx1 * wy1) + self.top_l * (1.0 - wy1)
        } else if y > h as Float - 0.5 {
            let wy0: Float = h as Float + 0.5 - y;
            data[x0 + (h - 1) * w] * (wx0 * wy0)
                + data[x1 + (h - 1) * w] * (wx1 * wy0)
                + self.bottom_l * (1.0 - wy0)
        } else {
            let y0: usize = (y - 0.5).floor() as usize;
            let y1: usize = (y0 + 1).min(h - 1);
            let wy0: Float = (y1 as Float + 0.5) - y;
            let wy1: Float = 1.0 - wy0;
            data[x0 + y0 * w] * (wx0 * wy0)
                + data[x0 + y1 * w] * (wx0 * wy1)
                + data[x1 + y0 * w] * (wx1 * wy0)
                + data[x1 + y1 * w] * (wx1 * wy1)
        }
    }

    fn direction_for_pixel(&self, x: usize, y: usize) -> Vector3f {
        let w: usize = self.env_map.w;
        let h: usize = self.env_map.h;
        let phi: Float = (x as Float + 0.5) / w as Float * (2.0 * PI);
        let theta: Float = (y as Float + 0.5) / h as Float * PI;
        let sin_theta: Float = theta.sin();
        let dir: Vector3f = Vector3f::new(
            sin_theta * phi.cos(),
            theta.cos(),
            sin_theta * phi.sin(),
        );
        self.local_to_world * dir
    }
}

impl Light for EnvironmentLight {
    /// Samples are drawn from among the pixel centers; with maps of any
    /// real resolution this costs little quality and keeps the pdf
    /// bookkeeping exact.
    fn sample_l(
        &self,
        _p: &Vector3f,
        rng: &mut Rng,
        wi: &mut Vector3f,
        dist_to_light: &mut Float,
        pdf: &mut Float,
    ) -> Spectrum {
        let w: usize = self.env_map.w;
        let (i, pmf) = self.alias_table.sample(rng);
        let y: usize = i / w;
        let x: usize = i % w;

        *wi = self.direction_for_pixel(x, y);
        *dist_to_light = INFINITY;
        *pdf = pmf;
        self.env_map.data[i] * self.cell_areas[y]
    }

    fn is_delta_light(&self) -> bool {
        false
    }

    fn sample_le(
        &self,
        rng: &mut Rng,
        world_bound: &Bounds3f,
        ray: &mut Ray,
        n_light: &mut Vector3f,
        pdf: &mut Float,
    ) -> Spectrum {
        if world_bound.is_empty() {
            *pdf = 0.0;
            return Spectrum::default();
        }
        let w: usize = self.env_map.w;
        let (i, pmf) = self.alias_table.sample(rng);
        let y: usize = i / w;
        let x: usize = i % w;

        // start outside the scene bounds and shoot back through it
        let out: Vector3f = self.direction_for_pixel(x, y);
        let radius: Float = world_bound.extent().length() * 0.5;
        let o: Vector3f = world_bound.centroid() + out * (2.0 * radius + EPS_D);
        *ray = Ray::new(o, -out);
        *n_light = -out;
        *pdf = pmf / self.cell_areas[y];
        self.env_map.data[i]
    }

    fn sample_from_p(
        &self,
        p: &Vector3f,
        rng: &mut Rng,
        on_light: &mut Vector3f,
        wi: &mut Vector3f,
    ) -> Spectrum {
        let w: usize = self.env_map.w;
        let (i, pmf) = self.alias_table.sample(rng);
        let y: usize = i / w;
        let x: usize = i % w;

        *wi = self.direction_for_pixel(x, y);
        *on_light = *p + *wi * INFINITY;
        // L over the pmf of the chosen cell, times its solid angle
        self.env_map.data[i] * (self.cell_areas[y] / pmf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant_map(w: usize, h: usize, v: Float) -> Arc<HdrImageBuffer> {
        Arc::new(HdrImageBuffer::new(
            w,
            h,
            vec![Spectrum::from_value(v); w * h],
        ))
    }

    #[test]
    fn test_constant_map_lookup() {
        let light: EnvironmentLight = EnvironmentLight::new(constant_map(16, 8, 2.0));
        let r: Ray = Ray::new(
            Vector3f::default(),
            Vector3f::new(0.3, 0.5, -0.8).normalize(),
        );
        let l: Spectrum = light.sample_dir(&r);
        assert!((l.r - 2.0).abs() < 1e-9);
        assert!((l.g - 2.0).abs() < 1e-9);
    }

    // for a constant map, L * cellArea / pmf is the same for every
    // sample: the total environment power
    #[test]
    fn test_sample_l_constant_estimator() {
        let light: EnvironmentLight = EnvironmentLight::new(constant_map(8, 4, 1.0));
        let mut rng: Rng = Rng::new();
        rng.seed(6, 6);
        let p: Vector3f = Vector3f::default();
        let mut first: Option<Float> = None;
        for _ in 0..100 {
            let mut wi: Vector3f = Vector3f::default();
            let mut dist: Float = 0.0;
            let mut pdf: Float = 0.0;
            let l: Spectrum = light.sample_l(&p, &mut rng, &mut wi, &mut dist, &mut pdf);
            assert!(pdf > 0.0);
            assert_eq!(dist, INFINITY);
            assert!((wi.length() - 1.0).abs() < 1e-9);
            let ratio: Float = l.illum() / pdf;
            match first {
                None => first = Some(ratio),
                Some(f) => assert!((ratio - f).abs() / f < 1e-6),
            }
        }
        // the constant estimator equals the integral of L over the
        // sphere: 4 * pi * L
        assert!((first.unwrap() - 4.0 * PI).abs() < 1e-3);
    }

    #[test]
    fn test_sample_le_enters_world() {
        let light: EnvironmentLight = EnvironmentLight::new(constant_map(8, 4, 1.0));
        let world: Bounds3f = Bounds3f::new(
            Vector3f::new(-1.0, -1.0, -1.0),
            Vector3f::new(1.0, 1.0, 1.0),
        );
        let mut rng: Rng = Rng::new();
        rng.seed(9, 9);
        let mut ray: Ray = Ray::new(Vector3f::default(), Vector3f::new(0.0, 0.0, 1.0));
        let mut n_light: Vector3f = Vector3f::default();
        let mut pdf: Float = 0.0;
        let le: Spectrum = light.sample_le(&mut rng, &world, &mut ray, &mut n_light, &mut pdf);
        assert!(!le.is_black());
        assert!(pdf > 0.0);
        // ray must point back toward the scene bounds
        let to_center: Vector3f = world.centroid() - ray.o;
        assert!(crate::core::geometry::vec3_dot(&to_center.normalize(), &ray.d) > 0.99);
    }
}
