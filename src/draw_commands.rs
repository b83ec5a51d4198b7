use ash::vk;
use bytemuck::{Pod, Zeroable};
use ultraviolet::Mat4;

use crate::{
    config::DrawConfig,
    culling::Frustum,
    error::Result,
    frame::{FrameSlot, FrameSlots},
    gpu::{GpuBuffer, MappedRegion},
    scene::Scene,
};

/// Same layout as `VkDrawIndexedIndirectCommand`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct DrawIndexedIndirectCommand {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub vertex_offset: i32,
    pub first_instance: u32,
}

impl DrawIndexedIndirectCommand {
    pub const STRIDE: u32 = std::mem::size_of::<Self>() as u32;
}

/// Opaque commands occupy `[0, opaque)` of the indirect buffer, transparent ones follow
/// directly after.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrawCounts {
    pub opaque: u32,
    pub transparent: u32,
}

impl DrawCounts {
    pub fn total(&self) -> u32 {
        self.opaque + self.transparent
    }

    /// Byte offset of the first transparent command.
    pub fn transparent_offset(&self) -> vk::DeviceSize {
        self.opaque as vk::DeviceSize * DrawIndexedIndirectCommand::STRIDE as vk::DeviceSize
    }
}

#[derive(Debug, Default)]
struct SlotCache {
    view_projection: Option<Mat4>,
    counts: DrawCounts,
    rebuilds: u64,
}

/// Fills the per-slot indirect draw buffers with frustum culled, opaque-first commands.
pub struct DrawCommandGenerator {
    config: DrawConfig,
    slots: FrameSlots<SlotCache>,
    transparent: Vec<DrawIndexedIndirectCommand>,
}

impl DrawCommandGenerator {
    pub fn new(config: DrawConfig) -> Self {
        Self {
            config,
            slots: FrameSlots::from_fn(|_| SlotCache::default()),
            transparent: Vec::new(),
        }
    }

    /// Regenerates the slot's commands unless neither the camera nor any instance moved
    /// since the slot was last generated, in which case nothing is written.
    pub fn refresh<B: GpuBuffer>(
        &mut self,
        scene: &Scene,
        slot: FrameSlot,
        target: &mut MappedRegion<B, DrawIndexedIndirectCommand>,
    ) -> Result<DrawCounts> {
        let view_projection = scene.camera.view_projection_matrix();
        let any_animated = scene.instances.iter().any(|instance| instance.is_animated());

        let cache = &self.slots[slot];
        if let Some(cached) = &cache.view_projection {
            if !any_animated && nearly_equal(cached, &view_projection, self.config.camera_epsilon)
            {
                return Ok(cache.counts);
            }
        }

        let frustum = Frustum::from_view_projection(&view_projection);
        let transparent_capacity =
            (self.config.max_transparent_draws as usize).min(scene.instances.len());
        self.transparent.clear();
        let mut opaque = 0;
        let mut dropped = 0;

        for (index, instance) in scene.instances.iter().enumerate() {
            let Some(mesh) = scene.mesh_of(instance) else {
                continue;
            };
            let Some(material) = scene.material_of(mesh) else {
                continue;
            };

            let sphere = mesh.local_bounding_sphere().transformed(instance.transform());
            if !frustum.is_sphere_visible(&sphere) {
                continue;
            }

            let command = DrawIndexedIndirectCommand {
                index_count: mesh.index_count,
                instance_count: 1,
                first_index: mesh.base_index,
                vertex_offset: mesh.base_vertex as i32,
                first_instance: index as u32,
            };
            if material.is_transparent() {
                if self.transparent.len() < transparent_capacity {
                    self.transparent.push(command);
                } else {
                    dropped += 1;
                }
            } else {
                target.write(opaque, &command)?;
                opaque += 1;
            }
        }
        target.write_slice(opaque, &self.transparent)?;

        if dropped > 0 {
            log::debug!(
                "{}: dropped {} transparent draws over the limit of {}",
                slot,
                dropped,
                transparent_capacity
            );
        }

        let counts = DrawCounts {
            opaque: opaque as u32,
            transparent: self.transparent.len() as u32,
        };
        let cache = &mut self.slots[slot];
        cache.view_projection = Some(view_projection);
        cache.counts = counts;
        cache.rebuilds += 1;
        log::trace!(
            "{}: {} opaque and {} transparent draws",
            slot,
            counts.opaque,
            counts.transparent
        );
        Ok(counts)
    }

    /// Counts produced by the slot's latest refresh.
    pub fn counts(&self, slot: FrameSlot) -> DrawCounts {
        self.slots[slot].counts
    }

    /// How often the slot's commands were regenerated.
    pub fn rebuilds(&self, slot: FrameSlot) -> u64 {
        self.slots[slot].rebuilds
    }
}

fn nearly_equal(a: &Mat4, b: &Mat4, epsilon: f32) -> bool {
    a.cols.iter().zip(b.cols.iter()).all(|(a, b)| {
        (a.x - b.x).abs() <= epsilon
            && (a.y - b.y).abs() <= epsilon
            && (a.z - b.z).abs() <= epsilon
            && (a.w - b.w).abs() <= epsilon
    })
}
