use std::{path::PathBuf, time::Duration};

use ash::vk;
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub present_mode: PresentMode,
    pub shaders: ShaderPaths,
    pub draw: DrawConfig,
    pub taa: TaaConfig,
    /// Nanoseconds per fence wait attempt, the wait is retried until the fence signals.
    pub fence_timeout_ns: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window: WindowConfig::default(),
            present_mode: PresentMode::Mailbox,
            shaders: ShaderPaths::default(),
            draw: DrawConfig::default(),
            taa: TaaConfig::default(),
            fence_timeout_ns: u64::MAX,
        }
    }
}

impl Config {
    pub fn from_str(value: &str) -> Result<Self> {
        Ok(serde_json::from_str(value)?)
    }

    pub fn fence_timeout(&self) -> Duration {
        Duration::from_nanos(self.fence_timeout_ns)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Ray Query Renderer".to_string(),
            width: 1920,
            height: 1080,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
pub enum PresentMode {
    Immediate,
    Mailbox,
    Fifo,
    FifoRelaxed,
}

impl From<PresentMode> for vk::PresentModeKHR {
    fn from(mode: PresentMode) -> Self {
        match mode {
            PresentMode::Immediate => vk::PresentModeKHR::IMMEDIATE,
            PresentMode::Mailbox => vk::PresentModeKHR::MAILBOX,
            PresentMode::Fifo => vk::PresentModeKHR::FIFO,
            PresentMode::FifoRelaxed => vk::PresentModeKHR::FIFO_RELAXED,
        }
    }
}

/// Precompiled SPIR-V for the raster pipelines, compiled outside of this crate.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ShaderPaths {
    pub vertex: PathBuf,
    pub opaque_fragment: PathBuf,
    pub transparent_fragment: PathBuf,
}

impl Default for ShaderPaths {
    fn default() -> Self {
        Self {
            vertex: "assets/shaders/scene.vert.spv".into(),
            opaque_fragment: "assets/shaders/opaque.frag.spv".into(),
            transparent_fragment: "assets/shaders/transparent.frag.spv".into(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct DrawConfig {
    /// Per-element tolerance when comparing view-projection matrices between frames.
    pub camera_epsilon: f32,
    pub max_transparent_draws: u32,
}

impl Default for DrawConfig {
    fn default() -> Self {
        Self {
            camera_epsilon: 1.0e-4,
            max_transparent_draws: 500,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct TaaConfig {
    pub enabled: bool,
    pub jitter_sequence_length: u32,
}

impl Default for TaaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            jitter_sequence_length: 16,
        }
    }
}

pub struct ConfigFileLoader {
    pub path: PathBuf,
    config: Option<Config>,
}

impl ConfigFileLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            config: None,
        }
    }

    /// Reads the config file. A missing file is replaced by the defaults, which are saved.
    pub fn load_config(&mut self) -> Result<&mut Config> {
        let config = match std::fs::read_to_string(&self.path) {
            Ok(content) => Config::from_str(&content)?,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                log::info!(
                    "No config at {}, writing the defaults",
                    self.path.display()
                );
                let config = Config::default();
                self.config = Some(config.clone());
                self.save_config()?;
                config
            }
            Err(error) => return Err(error.into()),
        };
        Ok(self.config.insert(config))
    }

    pub fn get_or_load_config(&mut self) -> Result<&mut Config> {
        if self.config.is_none() {
            self.load_config()?;
        }
        Ok(self.config.get_or_insert_with(Config::default))
    }

    pub fn save_config(&self) -> Result<()> {
        if let Some(config) = &self.config {
            let content = serde_json::to_string_pretty(config)?;
            std::fs::write(&self.path, content)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureQuality {
    VeryLow,
    Low,
    Medium,
    MediumHigh,
    High,
}

/// Texture limits picked once from the amount of device-local memory.
///
/// Handed by value to whoever uploads textures. There is no global copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureMemoryConfig {
    pub quality: TextureQuality,
    pub max_mip_levels: u32,
    pub max_texture_dimension: u32,
    pub enable_downscaling: bool,
    /// Textures uploaded between two GPU flushes, 0 disables batching.
    pub upload_batch_size: u32,
    pub upload_batch_delay: Duration,
    pub skip_emissive_textures: bool,
}

impl TextureMemoryConfig {
    pub fn for_vram_bytes(vram_bytes: u64) -> Self {
        const GIB: u64 = 1024 * 1024 * 1024;
        let limits = |quality, max_mip_levels, max_texture_dimension, batch, delay_ms| Self {
            quality,
            max_mip_levels,
            max_texture_dimension,
            enable_downscaling: quality != TextureQuality::High,
            upload_batch_size: batch,
            upload_batch_delay: Duration::from_millis(delay_ms),
            skip_emissive_textures: false,
        };

        let config = match vram_bytes / GIB {
            0..=3 => limits(TextureQuality::VeryLow, 8, 512, 10, 150),
            4..=5 => limits(TextureQuality::Low, 9, 512, 15, 100),
            6..=7 => limits(TextureQuality::Medium, 10, 1024, 30, 50),
            8..=11 => limits(TextureQuality::MediumHigh, 10, 2048, 50, 25),
            _ => limits(TextureQuality::High, 16, 8192, 0, 0),
        };
        log::info!(
            "VRAM: {} MiB, texture quality {:?}, max texture {}x{}",
            vram_bytes / (1024 * 1024),
            config.quality,
            config.max_texture_dimension,
            config.max_texture_dimension
        );
        config
    }
}

impl Default for TextureMemoryConfig {
    fn default() -> Self {
        Self::for_vram_bytes(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIB: u64 = 1024 * 1024 * 1024;

    #[test]
    fn vram_tiers() {
        let tier = |gib: u64| TextureMemoryConfig::for_vram_bytes(gib * GIB);

        assert_eq!(tier(2).quality, TextureQuality::VeryLow);
        assert_eq!(tier(2).max_texture_dimension, 512);
        assert_eq!(tier(4).quality, TextureQuality::Low);
        assert_eq!(tier(6).max_texture_dimension, 1024);
        assert_eq!(tier(11).quality, TextureQuality::MediumHigh);
        assert_eq!(tier(11).upload_batch_delay, Duration::from_millis(25));

        let high = tier(24);
        assert_eq!(high.quality, TextureQuality::High);
        assert_eq!(high.max_mip_levels, 16);
        assert!(!high.enable_downscaling);
        assert_eq!(high.upload_batch_size, 0);
    }

    #[test]
    fn tiers_use_whole_gibibytes() {
        let just_below = TextureMemoryConfig::for_vram_bytes(4 * GIB - 1);
        assert_eq!(just_below.quality, TextureQuality::VeryLow);
    }

    #[test]
    fn partial_config_falls_back_to_defaults() {
        let config = Config::from_str(r#"{ "present_mode": "Fifo" }"#).unwrap();
        assert_eq!(config.present_mode, PresentMode::Fifo);
        assert_eq!(config.draw.max_transparent_draws, 500);
        assert_eq!(config.fence_timeout_ns, u64::MAX);
    }

    #[test]
    fn broken_json_is_a_config_error() {
        assert!(matches!(
            Config::from_str("{ not json"),
            Err(crate::error::Error::Config(_))
        ));
    }

    #[test]
    fn missing_file_writes_defaults() {
        let path = std::env::temp_dir().join(format!(
            "ray-query-renderer-config-{}.json",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);

        let mut loader = ConfigFileLoader::new(&path);
        let config = loader.load_config().unwrap().clone();
        assert_eq!(config.window.width, 1920);

        let written = std::fs::read_to_string(&path).unwrap();
        let reloaded = Config::from_str(&written).unwrap();
        assert_eq!(reloaded.present_mode, config.present_mode);
        std::fs::remove_file(&path).unwrap();
    }
}
