use bytemuck::{Pod, Zeroable};
use ultraviolet::Mat4;

/// One placed occurrence of a mesh.
///
/// The layout is shared with the shaders. Flags are stored as `i32` because that is what
/// GLSL reads.
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Instance {
    transform: Mat4,
    inverse_transform: Mat4,
    pub mesh_index: i32,
    pub reflective: i32,
    pub casts_shadows: i32,
    pub receives_lighting: i32,
    pub animated: i32,
    _padding: [i32; 3],
}

impl Instance {
    pub fn new(mesh_index: u32, transform: Mat4) -> Self {
        Self {
            transform,
            inverse_transform: transform.inversed(),
            mesh_index: mesh_index as i32,
            reflective: 0,
            casts_shadows: 1,
            receives_lighting: 1,
            animated: 0,
            _padding: [0; 3],
        }
    }

    pub fn with_animated(mut self, animated: bool) -> Self {
        self.animated = animated as i32;
        self
    }

    pub fn with_reflective(mut self, reflective: bool) -> Self {
        self.reflective = reflective as i32;
        self
    }

    pub fn with_casts_shadows(mut self, casts_shadows: bool) -> Self {
        self.casts_shadows = casts_shadows as i32;
        self
    }

    pub fn transform(&self) -> &Mat4 {
        &self.transform
    }

    pub fn inverse_transform(&self) -> &Mat4 {
        &self.inverse_transform
    }

    /// Keeps the inverse in sync.
    pub fn set_transform(&mut self, transform: Mat4) {
        self.transform = transform;
        self.inverse_transform = transform.inversed();
    }

    pub fn mesh_index(&self) -> Option<usize> {
        usize::try_from(self.mesh_index).ok()
    }

    pub fn is_animated(&self) -> bool {
        self.animated != 0
    }

    pub fn is_reflective(&self) -> bool {
        self.reflective != 0
    }

    pub fn casts_shadows(&self) -> bool {
        self.casts_shadows != 0
    }
}
