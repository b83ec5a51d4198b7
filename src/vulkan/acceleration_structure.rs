use std::sync::Arc;

use ash::vk::{self, Handle};

use super::{buffer::VulkanBuffer, context::Context};
use crate::{
    error::{Error, Result},
    gpu::{AccelerationLevel, GpuAccelerationStructure, RawAccelerationStructure},
};

/// The structure handle only. Its storage buffer is owned by whoever created it.
pub struct VulkanAccelerationStructure {
    pub inner: vk::AccelerationStructureKHR,
    device_address: vk::DeviceAddress,
    context: Arc<Context>,
}

impl VulkanAccelerationStructure {
    pub fn new(
        context: Arc<Context>,
        label: &str,
        level: AccelerationLevel,
        buffer: &VulkanBuffer,
        size: vk::DeviceSize,
    ) -> Result<Self> {
        let create_info = vk::AccelerationStructureCreateInfoKHR::builder()
            .buffer(buffer.inner)
            .size(size)
            .ty(structure_type(level));

        let inner = unsafe {
            context
                .acceleration_structure
                .create_acceleration_structure(&create_info, None)
        }
        .map_err(|result| Error::AccelerationStructure {
            label: label.to_string(),
            reason: result.to_string(),
        })?;

        let device_address = {
            let info =
                vk::AccelerationStructureDeviceAddressInfoKHR::builder().acceleration_structure(inner);
            unsafe {
                context
                    .acceleration_structure
                    .get_acceleration_structure_device_address(&info)
            }
        };

        Ok(Self {
            inner,
            device_address,
            context,
        })
    }
}

impl GpuAccelerationStructure for VulkanAccelerationStructure {
    fn raw(&self) -> RawAccelerationStructure {
        RawAccelerationStructure(self.inner.as_raw())
    }

    fn device_address(&self) -> vk::DeviceAddress {
        self.device_address
    }
}

impl Drop for VulkanAccelerationStructure {
    fn drop(&mut self) {
        unsafe {
            self.context
                .acceleration_structure
                .destroy_acceleration_structure(self.inner, None);
        }
    }
}

pub(super) fn structure_type(level: AccelerationLevel) -> vk::AccelerationStructureTypeKHR {
    match level {
        AccelerationLevel::Bottom => vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
        AccelerationLevel::Top => vk::AccelerationStructureTypeKHR::TOP_LEVEL,
    }
}
