//! The ash backend of the [`crate::gpu`] traits.

pub mod acceleration_structure;
pub mod buffer;
pub mod command_pool;
pub mod context;
pub mod descriptor_set;
pub mod device;
pub mod frame_queue;
pub mod pipelines;
pub mod post_process;
mod recorder;
pub mod render_targets;
pub mod shader_create_info;
pub mod swapchain;

pub use context::Context;
pub use device::VulkanDevice;
pub use frame_queue::VulkanFrameQueue;
pub use post_process::BlitPostProcessor;
