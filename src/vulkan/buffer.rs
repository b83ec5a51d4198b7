use std::sync::Arc;

use ash::vk::{self, Handle};
use gpu_allocator::{
    vulkan::{Allocation, AllocationCreateDesc, AllocationScheme},
    MemoryLocation as AllocatorLocation,
};

use crate::{
    error::{Error, Result, VkResultExt},
    gpu::{BufferDesc, GpuBuffer, MemoryLocation, RawBuffer},
    vulkan::context::Context,
};

/// A buffer with its own gpu-allocator suballocation.
pub struct VulkanBuffer {
    pub inner: vk::Buffer,
    label: String,
    size: vk::DeviceSize,
    device_address: vk::DeviceAddress,
    allocation: Option<Allocation>,
    context: Arc<Context>,
}

impl VulkanBuffer {
    pub fn new(context: Arc<Context>, desc: &BufferDesc) -> Result<Self> {
        let device = &context.device;
        let usage = desc.usage | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;

        let create_info = vk::BufferCreateInfo::builder()
            .size(desc.size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let inner = unsafe { device.create_buffer(&create_info, None) }
            .vk_context("Could not create buffer")?;

        let requirements = unsafe { device.get_buffer_memory_requirements(inner) };
        let location = match desc.location {
            MemoryLocation::DeviceLocal => AllocatorLocation::GpuOnly,
            MemoryLocation::HostMapped => AllocatorLocation::CpuToGpu,
        };

        let allocation = context.allocator().allocate(&AllocationCreateDesc {
            name: desc.label,
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(error) => {
                log::error!(
                    "Could not allocate {} bytes for '{}': {}",
                    requirements.size,
                    desc.label,
                    error
                );
                unsafe { device.destroy_buffer(inner, None) };
                return Err(Error::Allocation {
                    label: desc.label.to_string(),
                    size: desc.size,
                    reason: error.to_string(),
                });
            }
        };

        let bound =
            unsafe { device.bind_buffer_memory(inner, allocation.memory(), allocation.offset()) }
                .vk_context("Could not bind buffer memory");
        if let Err(error) = bound {
            // Freeing is best effort, the bind error is the interesting one.
            let _ = context.allocator().free(allocation);
            unsafe { device.destroy_buffer(inner, None) };
            return Err(error);
        }

        let device_address = {
            let info = vk::BufferDeviceAddressInfo::builder().buffer(inner);
            unsafe { device.get_buffer_device_address(&info) }
        };

        Ok(Self {
            inner,
            label: desc.label.to_string(),
            size: desc.size,
            device_address,
            allocation: Some(allocation),
            context,
        })
    }
}

impl GpuBuffer for VulkanBuffer {
    fn raw(&self) -> RawBuffer {
        RawBuffer(self.inner.as_raw())
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn size(&self) -> vk::DeviceSize {
        self.size
    }

    fn device_address(&self) -> vk::DeviceAddress {
        self.device_address
    }

    fn mapped_slice(&self) -> Option<&[u8]> {
        let size = self.size as usize;
        self.allocation
            .as_ref()?
            .mapped_slice()
            .map(|bytes| &bytes[..size])
    }

    fn mapped_slice_mut(&mut self) -> Option<&mut [u8]> {
        let size = self.size as usize;
        self.allocation
            .as_mut()?
            .mapped_slice_mut()
            .map(|bytes| &mut bytes[..size])
    }
}

impl Drop for VulkanBuffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            if let Err(error) = self.context.allocator().free(allocation) {
                log::error!("Could not free '{}': {}", self.label, error);
            }
        }
        unsafe { self.context.device.destroy_buffer(self.inner, None) };
    }
}
