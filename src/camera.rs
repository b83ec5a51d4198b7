use ultraviolet::{projection, Mat4, Rotor3, Vec3};

use crate::culling::Frustum;

#[derive(Debug, Clone)]
pub struct Camera {
    pub position: Vec3,
    pub orientation: Rotor3,
    pub settings: CameraSettings,
}

#[derive(Debug, Clone, Copy)]
pub struct CameraSettings {
    pub z_near: f32,
    pub z_far: f32,
    /// Vertical field of view in radians.
    pub fov: f32,
    pub aspect_ratio: f32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            z_near: 0.1,
            z_far: 1000.0,
            fov: 60f32.to_radians(),
            aspect_ratio: 1.0,
        }
    }
}

impl Camera {
    pub fn new(settings: CameraSettings) -> Self {
        Self {
            position: Vec3::zero(),
            orientation: Rotor3::identity(),
            settings,
        }
    }

    /// Positions the camera
    pub fn view_matrix(&self) -> Mat4 {
        let cam_direction = self.orientation * Camera::forward();
        let target = self.position + cam_direction;

        Mat4::look_at(self.position, target, Camera::up())
    }

    /// Vulkan clip space: y points down, depth goes from 0 to 1.
    pub fn projection_matrix(&self) -> Mat4 {
        projection::rh_yup::perspective_vk(
            self.settings.fov,
            self.settings.aspect_ratio,
            self.settings.z_near,
            self.settings.z_far,
        )
    }

    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    pub fn frustum(&self) -> Frustum {
        Frustum::from_view_projection(&self.view_projection_matrix())
    }

    pub fn set_aspect_ratio(&mut self, width: u32, height: u32) {
        if height > 0 {
            self.settings.aspect_ratio = width as f32 / height as f32;
        }
    }

    /// in world-space
    pub const fn forward() -> Vec3 {
        Vec3::new(0.0, 0.0, -1.0)
    }

    /// in world-space
    pub const fn right() -> Vec3 {
        Vec3::new(1.0, 0.0, 0.0)
    }

    /// in world-space
    pub const fn up() -> Vec3 {
        Vec3::new(0.0, 1.0, 0.0)
    }
}
