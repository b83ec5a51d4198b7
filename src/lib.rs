//! A ray query renderer core: per-frame acceleration structure refits, frustum culled
//! indirect draws and a resource pool that never writes to memory the GPU may still read.

pub mod acceleration;
pub mod animation;
pub mod camera;
pub mod config;
pub mod culling;
pub mod dirty;
pub mod draw_commands;
pub mod error;
pub mod frame;
pub mod gpu;
pub mod jitter;
pub mod post_process;
pub mod resource_pool;
pub mod scene;
pub mod scheduler;
pub mod time;
pub mod uniforms;
pub mod utility;
pub mod vulkan;

pub use error::{Error, Result};
