use ash::vk;

use crate::frame::FrameSlot;

/// What the raster pass leaves behind for post-processing.
///
/// Both attachments are in `SHADER_READ_ONLY_OPTIMAL` layout, the target swapchain image
/// in `TRANSFER_DST_OPTIMAL`. The processor leaves the target in `TRANSFER_DST_OPTIMAL`
/// too, the transition to present happens afterwards.
#[derive(Debug, Clone, Copy)]
pub struct PostProcessInputs {
    pub slot: FrameSlot,
    pub extent: vk::Extent2D,
    pub resolved_color: vk::Image,
    pub resolved_color_view: vk::ImageView,
    /// Per-pixel screen space motion in `R16G16_SFLOAT`.
    pub velocity: vk::Image,
    pub velocity_view: vk::ImageView,
    pub target: vk::Image,
    pub target_extent: vk::Extent2D,
}

/// Tone mapping, TAA, bloom and upscaling live behind this.
pub trait PostProcessor {
    fn record(
        &mut self,
        device: &ash::Device,
        command_buffer: vk::CommandBuffer,
        inputs: &PostProcessInputs,
    );
}
