use std::sync::Arc;

use ash::vk;
use gpu_allocator::{
    vulkan::{Allocation, AllocationCreateDesc, AllocationScheme},
    MemoryLocation,
};

use super::context::Context;
use crate::error::{Error, Result, VkResultExt};

pub const COLOR_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;
pub const VELOCITY_FORMAT: vk::Format = vk::Format::R16G16_SFLOAT;
pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

pub struct AttachmentImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub format: vk::Format,
    allocation: Option<Allocation>,
    context: Arc<Context>,
}

impl AttachmentImage {
    fn new(
        context: Arc<Context>,
        label: &str,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        aspect_mask: vk::ImageAspectFlags,
    ) -> Result<Self> {
        let device = &context.device;

        let create_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.create_image(&create_info, None) }
            .vk_context("Could not create attachment image")?;
        let requirements = unsafe { device.get_image_memory_requirements(image) };

        let allocation = context
            .allocator()
            .allocate(&AllocationCreateDesc {
                name: label,
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|error| {
                log::error!("Could not allocate '{}': {}", label, error);
                Error::Allocation {
                    label: label.to_string(),
                    size: requirements.size,
                    reason: error.to_string(),
                }
            });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(error) => {
                unsafe { device.destroy_image(image, None) };
                return Err(error);
            }
        };

        let mut attachment = Self {
            image,
            view: vk::ImageView::null(),
            format,
            allocation: Some(allocation),
            context: context.clone(),
        };

        if let Some(allocation) = &attachment.allocation {
            unsafe { device.bind_image_memory(image, allocation.memory(), allocation.offset()) }
                .vk_context("Could not bind image memory")?;
        }

        let view_info = vk::ImageViewCreateInfo::builder()
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image(image);
        attachment.view = unsafe { device.create_image_view(&view_info, None) }
            .vk_context("Could not create attachment view")?;

        Ok(attachment)
    }
}

impl Drop for AttachmentImage {
    fn drop(&mut self) {
        let device = &self.context.device;
        unsafe { device.destroy_image_view(self.view, None) };
        unsafe { device.destroy_image(self.image, None) };
        if let Some(allocation) = self.allocation.take() {
            if let Err(error) = self.context.allocator().free(allocation) {
                log::error!("Could not free attachment: {}", error);
            }
        }
    }
}

/// Attachments of one frame slot. Recreated whenever the swapchain extent changes.
pub struct RenderTargets {
    pub color: AttachmentImage,
    pub velocity: AttachmentImage,
    pub depth: AttachmentImage,
    pub extent: vk::Extent2D,
}

impl RenderTargets {
    pub fn new(context: &Arc<Context>, slot_index: usize, extent: vk::Extent2D) -> Result<Self> {
        let color = AttachmentImage::new(
            context.clone(),
            &format!("color #{}", slot_index),
            extent,
            COLOR_FORMAT,
            vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::SAMPLED
                | vk::ImageUsageFlags::TRANSFER_SRC,
            vk::ImageAspectFlags::COLOR,
        )?;
        let velocity = AttachmentImage::new(
            context.clone(),
            &format!("velocity #{}", slot_index),
            extent,
            VELOCITY_FORMAT,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
            vk::ImageAspectFlags::COLOR,
        )?;
        let depth = AttachmentImage::new(
            context.clone(),
            &format!("depth #{}", slot_index),
            extent,
            DEPTH_FORMAT,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::ImageAspectFlags::DEPTH,
        )?;

        Ok(Self {
            color,
            velocity,
            depth,
            extent,
        })
    }
}
