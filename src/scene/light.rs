use bytemuck::{Pod, Zeroable};
use ultraviolet::Vec3;

#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct PointLight {
    pub position: Vec3,
    pub intensity: f32,
    pub color: Vec3,
    pub radius: f32,
    pub casts_shadows: i32,
    pub animated: i32,
    _padding: [i32; 2],
}

impl PointLight {
    pub fn new(position: Vec3, color: Vec3, intensity: f32, radius: f32) -> Self {
        Self {
            position,
            intensity,
            color,
            radius,
            casts_shadows: 1,
            animated: 0,
            _padding: [0; 2],
        }
    }

    pub fn with_animated(mut self, animated: bool) -> Self {
        self.animated = animated as i32;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct SpotLight {
    pub position: Vec3,
    pub intensity: f32,
    pub direction: Vec3,
    /// Cosine of the inner cone angle.
    pub cutoff: f32,
    pub color: Vec3,
    /// Cosine of the outer cone angle.
    pub outer_cutoff: f32,
    pub casts_shadows: i32,
    pub animated: i32,
    _padding: [i32; 2],
}

impl SpotLight {
    pub fn new(
        position: Vec3,
        direction: Vec3,
        color: Vec3,
        intensity: f32,
        inner_angle: f32,
        outer_angle: f32,
    ) -> Self {
        Self {
            position,
            intensity,
            direction: direction.normalized(),
            cutoff: inner_angle.cos(),
            color,
            outer_cutoff: outer_angle.cos(),
            casts_shadows: 1,
            animated: 0,
            _padding: [0; 2],
        }
    }

    pub fn with_animated(mut self, animated: bool) -> Self {
        self.animated = animated as i32;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct DirectionalLight {
    pub direction: Vec3,
    pub intensity: f32,
    pub color: Vec3,
    _padding: f32,
}

impl DirectionalLight {
    pub fn new(direction: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            direction: direction.normalized(),
            intensity,
            color,
            _padding: 0.0,
        }
    }
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self::new(Vec3::new(-0.3, -1.0, -0.2), Vec3::one(), 1.0)
    }
}
