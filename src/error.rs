use ash::vk;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("could not load vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("no suitable physical device: {0}")]
    NoSuitableDevice(String),

    #[error("device does not support {0}")]
    MissingFeature(&'static str),

    #[error("{context}: {result}")]
    Vulkan {
        context: &'static str,
        result: vk::Result,
    },

    #[error("could not allocate {size} bytes for '{label}': {reason}")]
    Allocation {
        label: String,
        size: u64,
        reason: String,
    },

    #[error("acceleration structure '{label}': {reason}")]
    AccelerationStructure { label: String, reason: String },

    #[error("index {index} is outside of mapped region '{label}' with {len} elements")]
    MappedOutOfBounds {
        label: String,
        index: usize,
        len: usize,
    },

    #[error("buffer '{label}' is not host visible")]
    NotHostVisible { label: String },

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Attaches a short description to raw Vulkan results.
pub(crate) trait VkResultExt<T> {
    fn vk_context(self, context: &'static str) -> Result<T>;
}

impl<T> VkResultExt<T> for std::result::Result<T, vk::Result> {
    fn vk_context(self, context: &'static str) -> Result<T> {
        self.map_err(|result| Error::Vulkan { context, result })
    }
}
