use std::sync::Arc;

use ash::vk::{self, Handle};

use crate::{
    error::{Result, VkResultExt},
    frame::{FrameSlot, FrameSlots, FRAMES_IN_FLIGHT},
    gpu::RawBuffer,
    resource_pool::FrameBindings,
    vulkan::context::Context,
};

/// Binding numbers of the scene descriptor set, shared with the shaders.
pub mod binding {
    pub const UNIFORMS: u32 = 0;
    pub const INSTANCES: u32 = 1;
    pub const MATERIALS: u32 = 2;
    pub const POINT_LIGHTS: u32 = 3;
    pub const SPOT_LIGHTS: u32 = 4;
    pub const MESHES: u32 = 5;
    pub const TEX_COORDS: u32 = 6;
    pub const INDICES: u32 = 7;
    pub const VERTICES: u32 = 8;
    pub const TOP_LEVEL: u32 = 9;
}

const STORAGE_BINDINGS: [u32; 8] = [
    binding::INSTANCES,
    binding::MATERIALS,
    binding::POINT_LIGHTS,
    binding::SPOT_LIGHTS,
    binding::MESHES,
    binding::TEX_COORDS,
    binding::INDICES,
    binding::VERTICES,
];

/// One descriptor set per frame slot, all with the same layout.
pub struct SceneDescriptors {
    pub layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    sets: FrameSlots<vk::DescriptorSet>,
    context: Arc<Context>,
}

impl SceneDescriptors {
    pub fn new(context: Arc<Context>) -> Result<Self> {
        let device = &context.device;
        let stages = vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT;

        let layout_binding = |binding, descriptor_type| {
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding)
                .descriptor_type(descriptor_type)
                .descriptor_count(1)
                .stage_flags(stages)
                .build()
        };
        let mut bindings = vec![layout_binding(
            binding::UNIFORMS,
            vk::DescriptorType::UNIFORM_BUFFER,
        )];
        bindings.extend(
            STORAGE_BINDINGS
                .iter()
                .map(|&binding| layout_binding(binding, vk::DescriptorType::STORAGE_BUFFER)),
        );
        bindings.push(layout_binding(
            binding::TOP_LEVEL,
            vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
        ));

        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
        let layout = unsafe { device.create_descriptor_set_layout(&layout_info, None) }
            .vk_context("Could not create descriptor set layout")?;

        let slots = FRAMES_IN_FLIGHT as u32;
        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: slots,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: STORAGE_BINDINGS.len() as u32 * slots,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
                descriptor_count: slots,
            },
        ];
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&pool_sizes)
            .max_sets(slots);
        let pool = unsafe { device.create_descriptor_pool(&pool_info, None) }
            .vk_context("Could not create descriptor pool")?;

        let set_layouts = [layout; FRAMES_IN_FLIGHT];
        let allocate_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&set_layouts);
        let allocated = unsafe { device.allocate_descriptor_sets(&allocate_info) }
            .vk_context("Could not allocate descriptor sets")?;
        let sets = FrameSlots::from_fn(|slot| allocated[slot.index()]);

        Ok(Self {
            layout,
            pool,
            sets,
            context,
        })
    }

    pub fn set(&self, slot: FrameSlot) -> vk::DescriptorSet {
        self.sets[slot]
    }

    /// Must only be called while the slot's fence is signaled.
    pub fn write(&self, slot: FrameSlot, bindings: &FrameBindings) {
        let set = self.sets[slot];
        let buffer_info = |raw: RawBuffer| {
            vk::DescriptorBufferInfo::builder()
                .buffer(vk::Buffer::from_raw(raw.0))
                .offset(0)
                .range(vk::WHOLE_SIZE)
                .build()
        };

        let uniforms = [buffer_info(bindings.uniforms)];
        let storage = [
            bindings.instances,
            bindings.materials,
            bindings.point_lights,
            bindings.spot_lights,
            bindings.meshes,
            bindings.tex_coords,
            bindings.indices,
            bindings.vertices,
        ]
        .map(|raw| [buffer_info(raw)]);
        let top_level = [vk::AccelerationStructureKHR::from_raw(bindings.top_level.0)];
        let mut top_level_info = vk::WriteDescriptorSetAccelerationStructureKHR::builder()
            .acceleration_structures(&top_level);

        let mut writes = vec![vk::WriteDescriptorSet::builder()
            .dst_set(set)
            .dst_binding(binding::UNIFORMS)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .buffer_info(&uniforms)
            .build()];
        writes.extend(STORAGE_BINDINGS.iter().zip(&storage).map(|(&binding, info)| {
            vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(binding)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .buffer_info(info)
                .build()
        }));

        let mut top_level_write = vk::WriteDescriptorSet::builder()
            .dst_set(set)
            .dst_binding(binding::TOP_LEVEL)
            .descriptor_type(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR)
            .push_next(&mut top_level_info)
            .build();
        top_level_write.descriptor_count = 1;
        writes.push(top_level_write);

        unsafe { self.context.device.update_descriptor_sets(&writes, &[]) };
        log::debug!("Wrote descriptor set of {}", slot);
    }
}

impl Drop for SceneDescriptors {
    fn drop(&mut self) {
        let device = &self.context.device;
        unsafe { device.destroy_descriptor_pool(self.pool, None) };
        unsafe { device.destroy_descriptor_set_layout(self.layout, None) };
    }
}
