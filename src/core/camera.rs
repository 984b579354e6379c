//! Perspective pinhole camera. Image-plane coordinates are normalized
//! to `[0, 1]^2` with the origin at the bottom-left.

// lumen
use crate::core::common::{radians, Float};
use crate::core::geometry::{vec3_cross, Matrix3x3, Point2f, Ray, Vector3f};

pub struct Camera {
    pub position: Vector3f,
    c2w: Matrix3x3,
    w2c: Matrix3x3,
    tan_half_h: Float,
    tan_half_v: Float,
}

impl Camera {
    /// `v_fov` is the vertical field of view in degrees; the horizontal
    /// one follows from the aspect ratio.
    pub fn look_at(
        position: Vector3f,
        target: Vector3f,
        up: Vector3f,
        v_fov: Float,
        aspect: Float,
    ) -> Self {
        let view: Vector3f = (target - position).normalize();
        let right: Vector3f = vec3_cross(&view, &up).normalize();
        let true_up: Vector3f = vec3_cross(&right, &view);
        // the camera looks down its local -z
        let c2w: Matrix3x3 = Matrix3x3::from_columns(right, true_up, -view);
        let tan_half_v: Float = (radians(v_fov) * 0.5).tan();
        Camera {
            position,
            c2w,
            w2c: c2w.transpose(),
            tan_half_h: tan_half_v * aspect,
            tan_half_v,
        }
    }

    /// Ray through normalized film position `(u, v)`.
    pub fn generate_ray(&self, u: Float, v: Float) -> Ray {
        let sx: Float = (u - 0.5) * 2.0 * self.tan_half_h;
        let sy: Float = (v - 0.5) * 2.0 * self.tan_half_v;
        let d: Vector3f = (self.c2w * Vector3f::new(sx, sy, -1.0)).normalize();
        Ray::new(self.position, d)
    }

    /// Reproject a world point onto the film; `None` when the point is
    /// behind the camera. The returned coordinates may fall outside
    /// `[0, 1]^2`; the caller bounds-checks against the image.
    pub fn get_screen_pos(&self, p: &Vector3f) -> Option<Point2f> {
        let q: Vector3f = self.w2c * (*p - self.position);
        if q.z >= 0.0 {
            return None;
        }
        let u: Float = (q.x / -q.z) / (2.0 * self.tan_half_h) + 0.5;
        let v: Float = (q.y / -q.z) / (2.0 * self.tan_half_v) + 0.5;
        Some(Point2f::new(u, v))
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_camera() -> Camera {
        Camera::look_at(
            Vector3f::new(0.0, 0.0, 5.0),
            Vector3f::new(0.0, 0.0, 0.0),
            Vector3f::new(0.0, 1.0, 0.0),
            60.0,
            1.0,
        )
    }

    #[test]
    fn test_center_ray_hits_target() {
        let cam: Camera = test_camera();
        let r: Ray = cam.generate_ray(0.5, 0.5);
        assert!((r.d.z + 1.0).abs() < 1e-12);
        assert!(r.d.x.abs() < 1e-12);
    }

    // generate_ray and get_screen_pos are inverses of each other
    #[test]
    fn test_screen_pos_roundtrip() {
        let cam: Camera = test_camera();
        for &(u, v) in &[(0.5, 0.5), (0.25, 0.75), (0.1, 0.9)] {
            let r: Ray = cam.generate_ray(u, v);
            let p: Vector3f = r.at(3.0);
            let screen: Point2f = cam.get_screen_pos(&p).expect("in front of camera");
            assert!((screen.x - u).abs() < 1e-9, "{} vs {}", screen.x, u);
            assert!((screen.y - v).abs() < 1e-9, "{} vs {}", screen.y, v);
        }
    }

    #[test]
    fn test_behind_camera_rejected() {
        let cam: Camera = test_camera();
        assert!(cam.get_screen_pos(&Vector3f::new(0.0, 0.0, 10.0)).is_none());
    }
}
