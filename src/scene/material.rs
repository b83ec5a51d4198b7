use bytemuck::{Pod, Zeroable};
use ultraviolet::{Vec3, Vec4};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlphaMode {
    Opaque,
    Blend,
    Mask,
}

impl AlphaMode {
    fn to_raw(self) -> i32 {
        match self {
            AlphaMode::Opaque => 0,
            AlphaMode::Blend => 1,
            AlphaMode::Mask => 2,
        }
    }

    fn from_raw(value: i32) -> Self {
        match value {
            1 => AlphaMode::Blend,
            2 => AlphaMode::Mask,
            _ => AlphaMode::Opaque,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Material {
    pub base_color_factor: Vec4,
    pub emissive_factor: Vec3,
    _padding0: f32,
    pub metallic_factor: f32,
    pub roughness_factor: f32,
    /// Texture indices are -1 when unset.
    pub base_color_texture: i32,
    pub normal_texture: i32,
    pub metallic_roughness_texture: i32,
    pub emissive_texture: i32,
    pub occlusion_texture: i32,
    alpha_mode: i32,
    pub reflective: i32,
    pub casts_shadows: i32,
    pub receives_lighting: i32,
    _padding1: i32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            base_color_factor: Vec4::one(),
            emissive_factor: Vec3::zero(),
            _padding0: 0.0,
            metallic_factor: 0.0,
            roughness_factor: 1.0,
            base_color_texture: -1,
            normal_texture: -1,
            metallic_roughness_texture: -1,
            emissive_texture: -1,
            occlusion_texture: -1,
            alpha_mode: AlphaMode::Opaque.to_raw(),
            reflective: 0,
            casts_shadows: 1,
            receives_lighting: 1,
            _padding1: 0,
        }
    }
}

impl Material {
    pub fn with_alpha_mode(mut self, alpha_mode: AlphaMode) -> Self {
        self.alpha_mode = alpha_mode.to_raw();
        self
    }

    pub fn alpha_mode(&self) -> AlphaMode {
        AlphaMode::from_raw(self.alpha_mode)
    }

    pub fn is_transparent(&self) -> bool {
        self.alpha_mode() == AlphaMode::Blend
    }

    pub fn is_reflective(&self) -> bool {
        self.reflective != 0
    }

    pub fn casts_shadows(&self) -> bool {
        self.casts_shadows != 0
    }
}
