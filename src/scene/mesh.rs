use bytemuck::{Pod, Zeroable};
use ultraviolet::Vec3;

use crate::culling::BoundingSphere;

/// A range of the shared vertex and index buffers, plus its local bounds.
///
/// Uploaded as-is into the mesh metadata buffer, hence the explicit padding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Mesh {
    pub bounding_box_min: Vec3,
    _padding: i32,
    pub bounding_box_max: Vec3,
    pub base_vertex: u32,
    pub base_index: u32,
    pub vertex_count: u32,
    pub index_count: u32,
    /// Negative when the mesh has no material.
    pub material_index: i32,
}

impl Mesh {
    pub fn new(
        bounds: (Vec3, Vec3),
        base_vertex: u32,
        vertex_count: u32,
        base_index: u32,
        index_count: u32,
        material_index: Option<u32>,
    ) -> Self {
        Self {
            bounding_box_min: bounds.0,
            _padding: 0,
            bounding_box_max: bounds.1,
            base_vertex,
            base_index,
            vertex_count,
            index_count,
            material_index: material_index.map_or(-1, |index| index as i32),
        }
    }

    pub fn material_index(&self) -> Option<usize> {
        usize::try_from(self.material_index).ok()
    }

    pub fn triangle_count(&self) -> u32 {
        self.index_count / 3
    }

    pub fn local_bounding_sphere(&self) -> BoundingSphere {
        BoundingSphere::from_aabb(self.bounding_box_min, self.bounding_box_max)
    }
}
