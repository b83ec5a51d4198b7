//! The seam between the renderer core and a graphics backend.
//!
//! The core only ever talks to these traits. [`crate::vulkan`] implements them on top of ash,
//! and the tests implement them with plain memory and modelled fences.

mod command;
mod mapped;
#[cfg(test)]
pub(crate) mod mock;
mod queue;

pub use command::*;
pub use mapped::*;
pub use queue::*;

use ash::vk;

use crate::{error::Result, frame::FrameSlot};

/// Backend handle of a buffer, as the raw Vulkan handle value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawBuffer(pub u64);

/// Backend handle of an acceleration structure, as the raw Vulkan handle value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawAccelerationStructure(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryLocation {
    /// Written once through a staging upload.
    DeviceLocal,
    /// Host visible, coherent and persistently mapped.
    HostMapped,
}

#[derive(Debug, Clone)]
pub struct BufferDesc<'a> {
    pub label: &'a str,
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    pub location: MemoryLocation,
    /// The frame-in-flight slot that exclusively owns the buffer, if any.
    pub slot: Option<FrameSlot>,
}

pub trait GpuBuffer {
    fn raw(&self) -> RawBuffer;
    fn label(&self) -> &str;
    fn size(&self) -> vk::DeviceSize;
    fn device_address(&self) -> vk::DeviceAddress;
    /// `None` unless the buffer lives in [`MemoryLocation::HostMapped`] memory.
    fn mapped_slice(&self) -> Option<&[u8]>;
    fn mapped_slice_mut(&mut self) -> Option<&mut [u8]>;
}

pub trait GpuAccelerationStructure {
    fn raw(&self) -> RawAccelerationStructure;
    fn device_address(&self) -> vk::DeviceAddress;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccelerationLevel {
    Bottom,
    Top,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    Build,
    /// Refit in place. Requires a structure built with `allow_update`.
    Update,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AccelerationGeometry {
    /// `R32G32B32_SFLOAT` positions at the start of each vertex, `u32` indices.
    Triangles {
        vertex_data: vk::DeviceAddress,
        vertex_stride: vk::DeviceSize,
        max_vertex: u32,
        index_data: vk::DeviceAddress,
        opaque: bool,
    },
    /// Tightly packed `VkAccelerationStructureInstanceKHR` records.
    Instances { data: vk::DeviceAddress },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccelerationBuild {
    pub level: AccelerationLevel,
    pub mode: BuildMode,
    pub allow_update: bool,
    pub geometry: AccelerationGeometry,
    pub primitive_count: u32,
    /// Read when updating. Equal to `destination` for in-place updates.
    pub source: Option<RawAccelerationStructure>,
    pub destination: RawAccelerationStructure,
    pub scratch_address: vk::DeviceAddress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BuildSizes {
    pub structure_size: vk::DeviceSize,
    pub build_scratch_size: vk::DeviceSize,
    pub update_scratch_size: vk::DeviceSize,
}

pub trait GpuDevice {
    type Buffer: GpuBuffer;
    type AccelerationStructure: GpuAccelerationStructure;

    fn create_buffer(&self, desc: &BufferDesc) -> Result<Self::Buffer>;

    /// Creates a buffer and fills it. Device-local buffers go through a staging copy.
    fn create_buffer_with_data(&self, desc: &BufferDesc, data: &[u8]) -> Result<Self::Buffer>;

    fn acceleration_structure_build_sizes(
        &self,
        level: AccelerationLevel,
        geometry: &AccelerationGeometry,
        allow_update: bool,
        primitive_count: u32,
    ) -> Result<BuildSizes>;

    /// The structure occupies `size` bytes at the start of `buffer`.
    fn create_acceleration_structure(
        &self,
        label: &str,
        level: AccelerationLevel,
        buffer: &Self::Buffer,
        size: vk::DeviceSize,
    ) -> Result<Self::AccelerationStructure>;

    /// Required alignment of scratch buffer device addresses.
    fn scratch_alignment(&self) -> vk::DeviceSize;

    /// Records, submits and waits for a one-shot command list.
    fn submit_immediate(&self, commands: &CommandList) -> Result<()>;
}
