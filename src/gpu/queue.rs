use std::time::Duration;

use super::CommandList;
use crate::{error::Result, frame::FrameSlot, resource_pool::FrameBindings};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    Signaled,
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired { image_index: u32, suboptimal: bool },
    /// The swapchain no longer matches the surface, the frame has to be skipped.
    OutOfDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

/// Identifies the synchronization objects used by one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSubmission {
    pub slot: FrameSlot,
    /// Picks the image-acquire semaphore. Rotates over the swapchain images, not the slots.
    pub semaphore_index: usize,
    pub image_index: u32,
}

/// Fences, semaphores, swapchain and queue of a presenting backend.
pub trait FrameQueue {
    fn image_count(&self) -> usize;

    /// Points the slot's descriptor set at the slot's buffers and top-level structure.
    fn bind_frame_resources(&mut self, slot: FrameSlot, bindings: &FrameBindings) -> Result<()>;

    fn wait_for_fence(&mut self, slot: FrameSlot, timeout: Duration) -> Result<FenceStatus>;

    fn reset_fence(&mut self, slot: FrameSlot) -> Result<()>;

    /// Signals the acquire semaphore `semaphore_index` once the image is ready.
    fn acquire_next_image(&mut self, semaphore_index: usize) -> Result<AcquireOutcome>;

    /// Records `commands` into the slot's command buffer and submits it. The submission waits
    /// for the acquire semaphore at color attachment output, signals the image's
    /// render-finished semaphore and the slot's fence.
    fn submit(&mut self, submission: &FrameSubmission, commands: &CommandList) -> Result<()>;

    /// Presents after the image's render-finished semaphore.
    fn present(&mut self, submission: &FrameSubmission) -> Result<PresentOutcome>;
}
