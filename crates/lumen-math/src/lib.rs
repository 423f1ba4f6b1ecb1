// SPDX-License-Identifier: CEPL-1.0
//! Camera and the per-frame uniform/push-constant blocks shared with shaders.
use bytemuck::{Pod, Zeroable};
pub use glam::{Mat4, Vec2, Vec3, Vec4};

/// Perspective camera. Projection uses Vulkan clip conventions: depth in
/// `0..1` and Y pointing down in NDC.
#[derive(Clone, Debug)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 2.5),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov_y: 50f32.to_radians(),
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 100.0,
        }
    }
}

impl Camera {
    pub fn look_at(&mut self, position: Vec3, target: Vec3) {
        self.position = position;
        self.target = target;
    }

    /// Called after every chain rebuild with the new extent's aspect ratio.
    pub fn set_aspect(&mut self, aspect: f32) {
        if aspect.is_finite() && aspect > 0.0 {
            self.aspect = aspect;
        }
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    pub fn projection(&self) -> Mat4 {
        let mut proj = Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far);
        // flip Y for Vulkan
        proj.y_axis.y *= -1.0;
        proj
    }
}

/// A single point light, drawn as a camera-facing disc of `radius`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointLight {
    pub position: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    pub radius: f32,
}

impl Default for PointLight {
    fn default() -> Self {
        Self {
            position: Vec3::new(-0.8, 0.6, 0.8),
            color: Vec3::ONE,
            intensity: 1.0,
            radius: 0.05,
        }
    }
}

/// Ambient term added to every lit fragment: rgb color, w intensity.
pub const AMBIENT_LIGHT: Vec4 = Vec4::new(1.0, 1.0, 1.0, 0.08);

/// Contents of the per-frame global uniform buffer (set 0, binding 0).
/// Layout matches std140: two matrices, then three vec4s.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GlobalUbo {
    pub projection: Mat4,
    pub view: Mat4,
    /// rgb color, w intensity
    pub ambient_light_color: Vec4,
    /// xyz world position, w billboard radius
    pub light_position: Vec4,
    /// rgb color, w intensity
    pub light_color: Vec4,
}

impl GlobalUbo {
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    pub fn new(camera: &Camera, ambient: Vec4, light: &PointLight) -> Self {
        Self {
            projection: camera.projection(),
            view: camera.view(),
            ambient_light_color: ambient,
            light_position: light.position.extend(light.radius),
            light_color: light.color.extend(light.intensity),
        }
    }
}

/// Per-draw push constants.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct PushConstants {
    pub model: Mat4,
    pub normal: Mat4,
}

impl PushConstants {
    pub fn from_model(model: Mat4) -> Self {
        Self {
            model,
            normal: model.inverse().transpose(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-4
    }

    #[test]
    fn projection_maps_near_and_far_to_vulkan_depth() {
        let cam = Camera::default();
        let p = cam.projection();
        let near = p.project_point3(Vec3::new(0.0, 0.0, -cam.near));
        let far = p.project_point3(Vec3::new(0.0, 0.0, -cam.far));
        assert!(near.z.abs() < 1e-4, "near z = {}", near.z);
        assert!((far.z - 1.0).abs() < 1e-4, "far z = {}", far.z);
    }

    #[test]
    fn projection_flips_y() {
        let cam = Camera::default();
        let up = cam.projection().project_point3(Vec3::new(0.0, 1.0, -5.0));
        assert!(up.y < 0.0);
    }

    #[test]
    fn view_moves_target_onto_negative_z() {
        let mut cam = Camera::default();
        cam.look_at(Vec3::new(3.0, 0.0, 0.0), Vec3::ZERO);
        let t = cam.view().transform_point3(Vec3::ZERO);
        assert!(approx(t, Vec3::new(0.0, 0.0, -3.0)), "{t}");
    }

    #[test]
    fn set_aspect_ignores_degenerate_values() {
        let mut cam = Camera::default();
        cam.set_aspect(2.0);
        cam.set_aspect(0.0);
        cam.set_aspect(f32::NAN);
        assert_eq!(cam.aspect, 2.0);
    }

    #[test]
    fn global_ubo_matches_std140_layout() {
        assert_eq!(GlobalUbo::SIZE, 176);
        assert_eq!(std::mem::offset_of!(GlobalUbo, view), 64);
        assert_eq!(std::mem::offset_of!(GlobalUbo, ambient_light_color), 128);
        assert_eq!(std::mem::offset_of!(GlobalUbo, light_position), 144);
        assert_eq!(std::mem::offset_of!(GlobalUbo, light_color), 160);
        let ubo = GlobalUbo::new(&Camera::default(), AMBIENT_LIGHT, &PointLight::default());
        let bytes: &[u8] = bytemuck::bytes_of(&ubo);
        let first: f32 = bytemuck::pod_read_unaligned(&bytes[0..4]);
        assert_eq!(first, ubo.projection.x_axis.x);
    }

    #[test]
    fn light_radius_and_intensity_ride_in_w() {
        let light = PointLight {
            position: Vec3::new(1.0, 2.0, 3.0),
            color: Vec3::new(1.0, 0.5, 0.25),
            intensity: 4.0,
            radius: 0.2,
        };
        let ubo = GlobalUbo::new(&Camera::default(), AMBIENT_LIGHT, &light);
        assert_eq!(ubo.light_position, Vec4::new(1.0, 2.0, 3.0, 0.2));
        assert_eq!(ubo.light_color, Vec4::new(1.0, 0.5, 0.25, 4.0));
        assert_eq!(ubo.ambient_light_color, AMBIENT_LIGHT);
    }

    #[test]
    fn normal_matrix_of_rotation_is_the_rotation() {
        let m = Mat4::from_rotation_y(0.7);
        let pc = PushConstants::from_model(m);
        assert!(pc.normal.abs_diff_eq(m, 1e-5));
    }
}
