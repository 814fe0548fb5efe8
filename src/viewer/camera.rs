use nalgebra::{Isometry3, Matrix4, Perspective3, Point3, Translation3, UnitQuaternion, Vector3};

const FOV_Y: f32 = std::f32::consts::FRAC_PI_3;

/// Orbit-style camera: left-drag rotates, right-drag pans, scroll dollies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrbitCamera {
    pub rotation: UnitQuaternion<f32>,
    /// Pan offset in screen pixels.
    pub pan: egui::Vec2,
    /// Dolly factor: 1 = framing distance, 2 = half the distance, …
    pub zoom: f32,
}

impl Default for OrbitCamera {
    fn default() -> Self {
        Self { rotation: UnitQuaternion::identity(), pan: egui::Vec2::ZERO, zoom: 1.0 }
    }
}

impl OrbitCamera {
    pub fn rotate(&mut self, drag: egui::Vec2) {
        let yaw = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), drag.x * 0.01);
        let pitch = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), drag.y * 0.01);
        self.rotation = yaw * pitch * self.rotation;
    }

    pub fn scroll(&mut self, delta: f32) {
        self.zoom = (self.zoom * (1.0 + delta * 0.001)).clamp(0.05, 50.0);
    }

    /// Build an MVP matrix that keeps a sphere of `radius` around `center`
    /// framed in a viewport of `size` pixels.
    pub fn mvp(&self, size: egui::Vec2, center: [f32; 3], radius: f32) -> Matrix4<f32> {
        let aspect = (size.x / size.y.max(1.0)).max(1e-3);
        let distance = radius * 3.0 / self.zoom;

        // pixels → world units at the target plane
        let world_per_px = 2.0 * distance * (FOV_Y * 0.5).tan() / size.y.max(1.0);
        let pan = Vector3::new(self.pan.x * world_per_px, -self.pan.y * world_per_px, 0.0);

        let eye = Point3::new(0.0, 0.0, distance);
        let proj = Perspective3::new(aspect, FOV_Y, distance * 0.01, distance + radius * 10.0);
        let view = Translation3::from(pan).to_homogeneous()
            * Isometry3::look_at_rh(&eye, &Point3::origin(), &Vector3::y()).to_homogeneous();
        let model = self.rotation.to_homogeneous()
            * Translation3::new(-center[0], -center[1], -center[2]).to_homogeneous();

        proj.to_homogeneous() * view * model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector4;

    #[test]
    fn centre_projects_to_viewport_middle() {
        let cam = OrbitCamera::default();
        let mvp = cam.mvp(egui::vec2(800.0, 600.0), [1.0, 2.0, 3.0], 2.0);
        let clip = mvp * Vector4::new(1.0, 2.0, 3.0, 1.0);
        assert!((clip.x / clip.w).abs() < 1e-5);
        assert!((clip.y / clip.w).abs() < 1e-5);
        assert!(clip.z / clip.w > -1.0 && clip.z / clip.w < 1.0);
    }

    #[test]
    fn zoom_is_clamped() {
        let mut cam = OrbitCamera::default();
        cam.scroll(-10_000.0);
        assert_eq!(cam.zoom, 0.05);
        cam.scroll(1e9);
        assert_eq!(cam.zoom, 50.0);
    }

    #[test]
    fn rotation_changes_orientation() {
        let mut cam = OrbitCamera::default();
        cam.rotate(egui::vec2(157.0, 0.0));
        assert!(cam.rotation.angle() > 1.5);
    }
}
