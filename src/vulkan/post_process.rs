use ash::vk;

use crate::post_process::{PostProcessInputs, PostProcessor};

/// Scales the resolved color straight into the swapchain image.
#[derive(Debug, Default)]
pub struct BlitPostProcessor;

impl PostProcessor for BlitPostProcessor {
    fn record(
        &mut self,
        device: &ash::Device,
        command_buffer: vk::CommandBuffer,
        inputs: &PostProcessInputs,
    ) {
        let color_range = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };
        let to_transfer = vk::ImageMemoryBarrier2::builder()
            .image(inputs.resolved_color)
            .old_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .new_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
            .src_stage_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags2::COLOR_ATTACHMENT_WRITE)
            .dst_stage_mask(vk::PipelineStageFlags2::BLIT)
            .dst_access_mask(vk::AccessFlags2::TRANSFER_READ)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .subresource_range(color_range)
            .build();
        let dependency_info =
            vk::DependencyInfo::builder().image_memory_barriers(std::slice::from_ref(&to_transfer));
        unsafe { device.cmd_pipeline_barrier2(command_buffer, &dependency_info) };

        let layers = vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        };
        let corner = |extent: vk::Extent2D| vk::Offset3D {
            x: extent.width as i32,
            y: extent.height as i32,
            z: 1,
        };
        let region = vk::ImageBlit::builder()
            .src_subresource(layers)
            .src_offsets([vk::Offset3D::default(), corner(inputs.extent)])
            .dst_subresource(layers)
            .dst_offsets([vk::Offset3D::default(), corner(inputs.target_extent)]);

        unsafe {
            device.cmd_blit_image(
                command_buffer,
                inputs.resolved_color,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                inputs.target,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(&region),
                vk::Filter::LINEAR,
            )
        };
    }
}
