use std::{ops::Deref, sync::Arc};

use ash::vk;

use super::context::Context;
use crate::error::{Result, VkResultExt};

pub struct CommandPool {
    inner: vk::CommandPool,
    context: Arc<Context>,
}

impl CommandPool {
    pub fn new(context: Arc<Context>) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(context.queue_family_index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let inner = unsafe { context.device.create_command_pool(&create_info, None) }
            .vk_context("Could not create command pool")?;

        Ok(Self { inner, context })
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    pub fn allocate(&self, count: u32) -> Result<Vec<vk::CommandBuffer>> {
        let allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.inner)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        unsafe { self.context.device.allocate_command_buffers(&allocate_info) }
            .vk_context("Could not allocate command buffers")
    }

    /// Records a one-shot command buffer, submits it and blocks until the GPU is done.
    pub fn submit_immediate(&self, record: impl FnOnce(vk::CommandBuffer)) -> Result<()> {
        let device = &self.context.device;
        let command_buffers = self.allocate(1)?;
        let command_buffer = command_buffers[0];

        let fence = unsafe { device.create_fence(&vk::FenceCreateInfo::default(), None) }
            .vk_context("Could not create fence");
        let result = fence.and_then(|fence| {
            let result = (|| {
                let begin_info = vk::CommandBufferBeginInfo::builder()
                    .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
                unsafe { device.begin_command_buffer(command_buffer, &begin_info) }
                    .vk_context("Could not begin command buffer")?;

                record(command_buffer);

                unsafe { device.end_command_buffer(command_buffer) }
                    .vk_context("Could not end command buffer")?;

                let submit_info =
                    vk::SubmitInfo::builder().command_buffers(std::slice::from_ref(&command_buffer));
                unsafe {
                    device.queue_submit(
                        self.context.queue,
                        std::slice::from_ref(&submit_info),
                        fence,
                    )
                }
                .vk_context("Could not submit immediate commands")?;

                unsafe { device.wait_for_fences(&[fence], true, u64::MAX) }
                    .vk_context("Could not wait for immediate commands")
            })();
            unsafe { device.destroy_fence(fence, None) };
            result
        });

        unsafe { device.free_command_buffers(self.inner, &command_buffers) };
        result
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe { self.context.device.destroy_command_pool(self.inner, None) };
    }
}

impl Deref for CommandPool {
    type Target = vk::CommandPool;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
