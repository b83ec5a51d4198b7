use ash::vk;

use super::{AccelerationBuild, RawBuffer};
use crate::frame::FrameSlot;

/// A global synchronization2 memory barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBarrier {
    pub src_stage_mask: vk::PipelineStageFlags2,
    pub src_access_mask: vk::AccessFlags2,
    pub dst_stage_mask: vk::PipelineStageFlags2,
    pub dst_access_mask: vk::AccessFlags2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineKind {
    Opaque,
    /// Alpha blended, depth test without depth writes.
    Transparent,
}

/// One step of a frame's GPU work, in submission order.
///
/// Backends translate these into real commands. Rendering and hand-off commands refer to
/// backend-owned attachments through the slot and swapchain image they belong to.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Barrier(MemoryBarrier),
    BuildAccelerationStructure(AccelerationBuild),
    /// Transitions the slot's attachments and begins dynamic rendering into them.
    BeginRendering { slot: FrameSlot, image_index: u32 },
    BindPipeline(PipelineKind),
    /// Vertex buffer, `u32` index buffer and the slot's descriptor set.
    BindSceneResources {
        slot: FrameSlot,
        vertices: RawBuffer,
        indices: RawBuffer,
    },
    DrawIndexedIndirect {
        buffer: RawBuffer,
        offset: vk::DeviceSize,
        draw_count: u32,
        stride: u32,
    },
    EndRendering { slot: FrameSlot },
    /// Makes resolved color and velocity readable and lets post-processing take over.
    HandOffToPostProcess { slot: FrameSlot, image_index: u32 },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandList {
    commands: Vec<Command>,
}

impl CommandList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Command> {
        self.commands.iter()
    }

    pub fn builds(&self) -> impl Iterator<Item = &AccelerationBuild> {
        self.commands.iter().filter_map(|command| match command {
            Command::BuildAccelerationStructure(build) => Some(build),
            _ => None,
        })
    }

    /// Position of the first command matching `predicate`.
    pub fn position(&self, predicate: impl Fn(&Command) -> bool) -> Option<usize> {
        self.commands.iter().position(predicate)
    }
}

impl<'a> IntoIterator for &'a CommandList {
    type Item = &'a Command;
    type IntoIter = std::slice::Iter<'a, Command>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.iter()
    }
}
