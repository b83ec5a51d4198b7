use std::sync::Arc;

use ash::vk;

use super::{
    acceleration_structure::VulkanAccelerationStructure, buffer::VulkanBuffer,
    command_pool::CommandPool, context::Context, recorder,
};
use crate::{
    error::{Error, Result},
    gpu::{
        AccelerationGeometry, AccelerationLevel, BufferDesc, BuildSizes, Command, CommandList,
        GpuBuffer, GpuDevice, MemoryLocation,
    },
};

/// Resource creation and one-shot submissions on the graphics queue.
pub struct VulkanDevice {
    context: Arc<Context>,
    command_pool: CommandPool,
}

impl VulkanDevice {
    pub fn new(context: Arc<Context>) -> Result<Self> {
        let command_pool = CommandPool::new(context.clone())?;
        Ok(Self {
            context,
            command_pool,
        })
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }
}

impl GpuDevice for VulkanDevice {
    type Buffer = VulkanBuffer;
    type AccelerationStructure = VulkanAccelerationStructure;

    fn create_buffer(&self, desc: &BufferDesc) -> Result<VulkanBuffer> {
        VulkanBuffer::new(self.context.clone(), desc)
    }

    fn create_buffer_with_data(&self, desc: &BufferDesc, data: &[u8]) -> Result<VulkanBuffer> {
        match desc.location {
            MemoryLocation::HostMapped => {
                let mut buffer = self.create_buffer(desc)?;
                let label = desc.label.to_string();
                let mapped = buffer
                    .mapped_slice_mut()
                    .ok_or_else(|| Error::NotHostVisible {
                        label: label.clone(),
                    })?;
                let len = mapped.len();
                mapped
                    .get_mut(..data.len())
                    .ok_or(Error::MappedOutOfBounds {
                        label,
                        index: data.len(),
                        len,
                    })?
                    .copy_from_slice(data);
                Ok(buffer)
            }
            MemoryLocation::DeviceLocal => {
                let buffer = self.create_buffer(&BufferDesc {
                    usage: desc.usage | vk::BufferUsageFlags::TRANSFER_DST,
                    ..desc.clone()
                })?;
                if data.is_empty() {
                    return Ok(buffer);
                }

                let staging_label = format!("{} staging", desc.label);
                let staging = self.create_buffer_with_data(
                    &BufferDesc {
                        label: &staging_label,
                        size: data.len() as vk::DeviceSize,
                        usage: vk::BufferUsageFlags::TRANSFER_SRC,
                        location: MemoryLocation::HostMapped,
                        slot: None,
                    },
                    data,
                )?;

                let device = &self.context.device;
                self.command_pool.submit_immediate(|command_buffer| {
                    let region = vk::BufferCopy::builder().size(data.len() as vk::DeviceSize);
                    unsafe {
                        device.cmd_copy_buffer(
                            command_buffer,
                            staging.inner,
                            buffer.inner,
                            std::slice::from_ref(&region),
                        )
                    };
                })?;
                Ok(buffer)
            }
        }
    }

    fn acceleration_structure_build_sizes(
        &self,
        level: AccelerationLevel,
        geometry: &AccelerationGeometry,
        allow_update: bool,
        primitive_count: u32,
    ) -> Result<BuildSizes> {
        let sizes = recorder::build_sizes(
            &self.context,
            level,
            geometry,
            allow_update,
            primitive_count,
        );
        Ok(BuildSizes {
            structure_size: sizes.acceleration_structure_size,
            build_scratch_size: sizes.build_scratch_size,
            update_scratch_size: sizes.update_scratch_size,
        })
    }

    fn create_acceleration_structure(
        &self,
        label: &str,
        level: AccelerationLevel,
        buffer: &VulkanBuffer,
        size: vk::DeviceSize,
    ) -> Result<VulkanAccelerationStructure> {
        VulkanAccelerationStructure::new(self.context.clone(), label, level, buffer, size)
    }

    fn scratch_alignment(&self) -> vk::DeviceSize {
        self.context
            .acceleration_structure_properties
            .min_acceleration_structure_scratch_offset_alignment as vk::DeviceSize
    }

    fn submit_immediate(&self, commands: &CommandList) -> Result<()> {
        let context = &self.context;
        self.command_pool.submit_immediate(|command_buffer| {
            for command in commands {
                match command {
                    Command::Barrier(barrier) => {
                        recorder::record_barrier(context, command_buffer, barrier)
                    }
                    Command::BuildAccelerationStructure(build) => {
                        recorder::record_build(context, command_buffer, build)
                    }
                    other => log::warn!("Ignoring {:?} outside of a frame", other),
                }
            }
        })
    }
}
