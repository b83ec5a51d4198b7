use std::{sync::Arc, time::Duration};

use ash::vk::{self, Handle};

use super::{
    command_pool::CommandPool,
    context::Context,
    descriptor_set::SceneDescriptors,
    pipelines::ScenePipelines,
    recorder::{self, ImageTransition},
    render_targets::RenderTargets,
    swapchain::SwapchainContainer,
};
use crate::{
    config::Config,
    error::{Result, VkResultExt},
    frame::{FrameSlot, FrameSlots, FRAMES_IN_FLIGHT},
    gpu::{
        AcquireOutcome, Command, CommandList, FenceStatus, FrameQueue, FrameSubmission,
        PresentOutcome,
    },
    post_process::{PostProcessInputs, PostProcessor},
    resource_pool::FrameBindings,
};

/// Everything a frame needs on the presenting side: swapchain, per-slot fences and command
/// buffers, per-image semaphores, attachments and the raster pipelines.
pub struct VulkanFrameQueue {
    swapchain: SwapchainContainer,
    image_available: Vec<vk::Semaphore>,
    render_finished: Vec<vk::Semaphore>,
    fences: FrameSlots<vk::Fence>,
    command_buffers: FrameSlots<vk::CommandBuffer>,
    targets: FrameSlots<RenderTargets>,
    descriptors: SceneDescriptors,
    pipelines: ScenePipelines,
    post_processor: Box<dyn PostProcessor>,
    command_pool: CommandPool,
    context: Arc<Context>,
}

impl VulkanFrameQueue {
    pub fn new(
        context: Arc<Context>,
        config: &Config,
        window_size: vk::Extent2D,
        post_processor: Box<dyn PostProcessor>,
    ) -> Result<Self> {
        let swapchain =
            SwapchainContainer::new(context.clone(), window_size, config.present_mode.into())?;
        let extent = swapchain.extent;

        let command_pool = CommandPool::new(context.clone())?;
        let allocated = command_pool.allocate(FRAMES_IN_FLIGHT as u32)?;
        let command_buffers = FrameSlots::from_fn(|slot| allocated[slot.index()]);

        let fences = FrameSlots::try_from_fn(|_| {
            let create_info =
                vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);
            unsafe { context.device.create_fence(&create_info, None) }
                .vk_context("Could not create fence")
        })?;

        let (image_available, render_finished) =
            create_semaphores(&context, swapchain.images.len())?;

        let targets =
            FrameSlots::try_from_fn(|slot| RenderTargets::new(&context, slot.index(), extent))?;
        let descriptors = SceneDescriptors::new(context.clone())?;
        let pipelines = ScenePipelines::new(context.clone(), &config.shaders, descriptors.layout)?;

        Ok(Self {
            swapchain,
            image_available,
            render_finished,
            fences,
            command_buffers,
            targets,
            descriptors,
            pipelines,
            post_processor,
            command_pool,
            context,
        })
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    /// Rebuilds the swapchain and every size dependent attachment after a resize or an
    /// out-of-date acquire.
    pub fn recreate_swapchain(&mut self, window_size: vk::Extent2D) -> Result<()> {
        if window_size.width == 0 || window_size.height == 0 {
            return Ok(());
        }
        self.swapchain.recreate(window_size)?;
        let extent = self.swapchain.extent;
        let context = self.context.clone();
        self.targets =
            FrameSlots::try_from_fn(|slot| RenderTargets::new(&context, slot.index(), extent))?;

        if self.image_available.len() != self.swapchain.images.len() {
            self.destroy_semaphores();
            let (image_available, render_finished) =
                create_semaphores(&self.context, self.swapchain.images.len())?;
            self.image_available = image_available;
            self.render_finished = render_finished;
        }
        log::info!("Swapchain resized to {}x{}", extent.width, extent.height);
        Ok(())
    }

    fn destroy_semaphores(&mut self) {
        let device = &self.context.device;
        for semaphore in self.image_available.drain(..).chain(self.render_finished.drain(..)) {
            unsafe { device.destroy_semaphore(semaphore, None) };
        }
    }

    fn record(&mut self, slot: FrameSlot, commands: &CommandList) -> Result<()> {
        let context = self.context.clone();
        let device = &context.device;
        let command_buffer = self.command_buffers[slot];

        unsafe {
            device.reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
        }
        .vk_context("Could not reset command buffer")?;
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { device.begin_command_buffer(command_buffer, &begin_info) }
            .vk_context("Could not begin command buffer")?;

        for command in commands {
            self.record_command(command_buffer, command);
        }

        unsafe { device.end_command_buffer(command_buffer) }
            .vk_context("Could not end command buffer")
    }

    fn record_command(&mut self, command_buffer: vk::CommandBuffer, command: &Command) {
        let context = &self.context;
        let device = &context.device;
        match command {
            Command::Barrier(barrier) => recorder::record_barrier(context, command_buffer, barrier),
            Command::BuildAccelerationStructure(build) => {
                recorder::record_build(context, command_buffer, build)
            }
            Command::BeginRendering { slot, .. } => {
                let targets = &self.targets[*slot];
                begin_rendering(context, command_buffer, targets);
            }
            Command::BindPipeline(kind) => unsafe {
                device.cmd_bind_pipeline(
                    command_buffer,
                    vk::PipelineBindPoint::GRAPHICS,
                    self.pipelines.pipeline(*kind),
                )
            },
            Command::BindSceneResources {
                slot,
                vertices,
                indices,
            } => {
                let vertices = vk::Buffer::from_raw(vertices.0);
                let indices = vk::Buffer::from_raw(indices.0);
                unsafe {
                    device.cmd_bind_vertex_buffers(command_buffer, 0, &[vertices], &[0]);
                    device.cmd_bind_index_buffer(command_buffer, indices, 0, vk::IndexType::UINT32);
                    device.cmd_bind_descriptor_sets(
                        command_buffer,
                        vk::PipelineBindPoint::GRAPHICS,
                        self.pipelines.layout,
                        0,
                        &[self.descriptors.set(*slot)],
                        &[],
                    );
                }
            }
            Command::DrawIndexedIndirect {
                buffer,
                offset,
                draw_count,
                stride,
            } => unsafe {
                device.cmd_draw_indexed_indirect(
                    command_buffer,
                    vk::Buffer::from_raw(buffer.0),
                    *offset,
                    *draw_count,
                    *stride,
                )
            },
            Command::EndRendering { .. } => unsafe { device.cmd_end_rendering(command_buffer) },
            Command::HandOffToPostProcess { slot, image_index } => {
                let targets = &self.targets[*slot];
                let Some(&target) = self.swapchain.images.get(*image_index as usize) else {
                    log::warn!("Swapchain image {} does not exist", image_index);
                    return;
                };
                hand_off(context, command_buffer, targets, target);

                let inputs = PostProcessInputs {
                    slot: *slot,
                    extent: targets.extent,
                    resolved_color: targets.color.image,
                    resolved_color_view: targets.color.view,
                    velocity: targets.velocity.image,
                    velocity_view: targets.velocity.view,
                    target,
                    target_extent: self.swapchain.extent,
                };
                self.post_processor.record(device, command_buffer, &inputs);

                recorder::record_transitions(
                    context,
                    command_buffer,
                    &[ImageTransition {
                        image: target,
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        old_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        new_layout: vk::ImageLayout::PRESENT_SRC_KHR,
                        src_stage_mask: vk::PipelineStageFlags2::ALL_COMMANDS,
                        src_access_mask: vk::AccessFlags2::MEMORY_WRITE,
                        dst_stage_mask: vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
                        dst_access_mask: vk::AccessFlags2::empty(),
                    }],
                );
            }
        }
    }
}

impl FrameQueue for VulkanFrameQueue {
    fn image_count(&self) -> usize {
        self.swapchain.images.len()
    }

    fn bind_frame_resources(&mut self, slot: FrameSlot, bindings: &FrameBindings) -> Result<()> {
        self.descriptors.write(slot, bindings);
        Ok(())
    }

    fn wait_for_fence(&mut self, slot: FrameSlot, timeout: Duration) -> Result<FenceStatus> {
        let timeout = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        match unsafe {
            self.context
                .device
                .wait_for_fences(&[self.fences[slot]], true, timeout)
        } {
            Ok(()) => Ok(FenceStatus::Signaled),
            Err(vk::Result::TIMEOUT) => Ok(FenceStatus::TimedOut),
            Err(result) => Err(result).vk_context("Could not wait for frame fence"),
        }
    }

    fn reset_fence(&mut self, slot: FrameSlot) -> Result<()> {
        unsafe { self.context.device.reset_fences(&[self.fences[slot]]) }
            .vk_context("Could not reset frame fence")
    }

    fn acquire_next_image(&mut self, semaphore_index: usize) -> Result<AcquireOutcome> {
        self.swapchain
            .acquire_next_image(self.image_available[semaphore_index % self.image_available.len()])
    }

    fn submit(&mut self, submission: &FrameSubmission, commands: &CommandList) -> Result<()> {
        self.record(submission.slot, commands)?;

        let semaphores = SemaphoreIndices::of(submission, self.image_available.len());
        let wait_semaphores = [self.image_available[semaphores.image_available]];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [self.render_finished[semaphores.render_finished]];
        let command_buffers = [self.command_buffers[submission.slot]];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.context.device.queue_submit(
                self.context.queue,
                std::slice::from_ref(&submit_info),
                self.fences[submission.slot],
            )
        }
        .vk_context("Could not submit frame")
    }

    fn present(&mut self, submission: &FrameSubmission) -> Result<PresentOutcome> {
        let semaphores = SemaphoreIndices::of(submission, self.render_finished.len());
        self.swapchain.present(
            self.render_finished[semaphores.render_finished],
            submission.image_index,
        )
    }
}

impl Drop for VulkanFrameQueue {
    fn drop(&mut self) {
        if let Err(error) = unsafe { self.context.device.device_wait_idle() } {
            log::error!("Could not wait for device idle: {}", error);
        }
        self.destroy_semaphores();
        for (_, &fence) in self.fences.iter() {
            unsafe { self.context.device.destroy_fence(fence, None) };
        }
        let command_buffers: Vec<_> = self.command_buffers.iter().map(|(_, &cb)| cb).collect();
        unsafe {
            self.context
                .device
                .free_command_buffers(*self.command_pool, &command_buffers)
        };
    }
}

/// Acquire semaphores rotate with the frame. Render-finished semaphores belong to a swapchain
/// image: the image can't be acquired again before its last present consumed the semaphore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SemaphoreIndices {
    image_available: usize,
    render_finished: usize,
}

impl SemaphoreIndices {
    fn of(submission: &FrameSubmission, image_count: usize) -> Self {
        let image_count = image_count.max(1);
        Self {
            image_available: submission.semaphore_index % image_count,
            render_finished: submission.image_index as usize % image_count,
        }
    }
}

fn create_semaphores(
    context: &Context,
    count: usize,
) -> Result<(Vec<vk::Semaphore>, Vec<vk::Semaphore>)> {
    let create = || {
        unsafe {
            context
                .device
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
        }
        .vk_context("Could not create semaphore")
    };
    let image_available = (0..count).map(|_| create()).collect::<Result<Vec<_>>>()?;
    let render_finished = (0..count).map(|_| create()).collect::<Result<Vec<_>>>()?;
    Ok((image_available, render_finished))
}

fn begin_rendering(context: &Context, command_buffer: vk::CommandBuffer, targets: &RenderTargets) {
    let color_transition = |image| ImageTransition {
        image,
        aspect_mask: vk::ImageAspectFlags::COLOR,
        old_layout: vk::ImageLayout::UNDEFINED,
        new_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        src_stage_mask: vk::PipelineStageFlags2::ALL_COMMANDS,
        src_access_mask: vk::AccessFlags2::empty(),
        dst_stage_mask: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        dst_access_mask: vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
    };
    recorder::record_transitions(
        context,
        command_buffer,
        &[
            color_transition(targets.color.image),
            color_transition(targets.velocity.image),
            ImageTransition {
                image: targets.depth.image,
                aspect_mask: vk::ImageAspectFlags::DEPTH,
                old_layout: vk::ImageLayout::UNDEFINED,
                new_layout: vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
                src_stage_mask: vk::PipelineStageFlags2::ALL_COMMANDS,
                src_access_mask: vk::AccessFlags2::empty(),
                dst_stage_mask: vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
                    | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
                dst_access_mask: vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
            },
        ],
    );

    let color_attachment = |view| {
        vk::RenderingAttachmentInfo::builder()
            .image_view(view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: [0.0, 0.0, 0.0, 1.0],
                },
            })
            .build()
    };
    let color_attachments = [
        color_attachment(targets.color.view),
        color_attachment(targets.velocity.view),
    ];
    let depth_attachment = vk::RenderingAttachmentInfo::builder()
        .image_view(targets.depth.view)
        .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::DONT_CARE)
        .clear_value(vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        });

    let render_area = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent: targets.extent,
    };
    let rendering_info = vk::RenderingInfo::builder()
        .render_area(render_area)
        .layer_count(1)
        .color_attachments(&color_attachments)
        .depth_attachment(&depth_attachment);

    let viewport = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: targets.extent.width as f32,
        height: targets.extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };

    let device = &context.device;
    unsafe {
        device.cmd_begin_rendering(command_buffer, &rendering_info);
        device.cmd_set_viewport(command_buffer, 0, &[viewport]);
        device.cmd_set_scissor(command_buffer, 0, &[render_area]);
    }
}

fn hand_off(
    context: &Context,
    command_buffer: vk::CommandBuffer,
    targets: &RenderTargets,
    swapchain_image: vk::Image,
) {
    let to_shader_read = |image| ImageTransition {
        image,
        aspect_mask: vk::ImageAspectFlags::COLOR,
        old_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        new_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        src_stage_mask: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        src_access_mask: vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
        dst_stage_mask: vk::PipelineStageFlags2::FRAGMENT_SHADER
            | vk::PipelineStageFlags2::COMPUTE_SHADER,
        dst_access_mask: vk::AccessFlags2::SHADER_SAMPLED_READ,
    };
    recorder::record_transitions(
        context,
        command_buffer,
        &[
            to_shader_read(targets.color.image),
            to_shader_read(targets.velocity.image),
            ImageTransition {
                image: swapchain_image,
                aspect_mask: vk::ImageAspectFlags::COLOR,
                old_layout: vk::ImageLayout::UNDEFINED,
                new_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                src_stage_mask: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
                src_access_mask: vk::AccessFlags2::empty(),
                dst_stage_mask: vk::PipelineStageFlags2::ALL_TRANSFER,
                dst_access_mask: vk::AccessFlags2::TRANSFER_WRITE,
            },
        ],
    );
}
