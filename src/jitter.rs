use ultraviolet::Vec2;

use crate::config::TaaConfig;

/// Radical inverse of `index` in `base`, in `[0, 1)`.
pub fn halton(mut index: u32, base: u32) -> f32 {
    let mut fraction = 1.0;
    let mut result = 0.0;
    while index > 0 {
        fraction /= base as f32;
        result += fraction * (index % base) as f32;
        index /= base;
    }
    result
}

/// Sub-pixel camera offsets for temporal anti-aliasing, following the Halton (2, 3) sequence.
#[derive(Debug, Clone)]
pub struct JitterSequence {
    enabled: bool,
    length: u32,
    index: u32,
}

impl JitterSequence {
    pub fn new(config: &TaaConfig) -> Self {
        Self {
            enabled: config.enabled,
            length: config.jitter_sequence_length.max(1),
            index: 0,
        }
    }

    /// Offset for the next frame in pixels, each component in `[-0.5, 0.5)`.
    pub fn next_offset(&mut self) -> Vec2 {
        if !self.enabled {
            return Vec2::zero();
        }
        self.index = (self.index + 1) % self.length;
        Vec2::new(
            halton(self.index + 1, 2) - 0.5,
            halton(self.index + 1, 3) - 0.5,
        )
    }
}
