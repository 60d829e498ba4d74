//! Decode session configuration

use std::fmt;
use std::sync::Arc;

use super::hwaccel::HwDecoder;
use super::pool::{RotatingPool, SharedFramePool};
use crate::frame::PixelFormat;
use crate::registry::DEFAULT_IO_BUFFER_SIZE;

/// Default row alignment in bytes
pub const DEFAULT_PADDING: usize = 4;

/// Options applied when a session is opened
#[derive(Clone)]
pub struct DecoderConfig {
    /// Output pixel format
    pub pixel_format: PixelFormat,
    /// Row alignment in bytes; 0 disables row padding
    pub padding: usize,
    /// Hardware families to try before software decoding
    pub hw: HwDecoder,
    /// Where frame buffers come from
    pub pool: SharedFramePool,
    /// Bytes requested from the source per engine read
    pub io_buffer_size: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            pixel_format: PixelFormat::default(),
            padding: DEFAULT_PADDING,
            hw: HwDecoder::NONE,
            pool: Arc::new(RotatingPool::default()),
            io_buffer_size: DEFAULT_IO_BUFFER_SIZE,
        }
    }
}

impl DecoderConfig {
    pub fn with_pixel_format(mut self, format: PixelFormat) -> Self {
        self.pixel_format = format;
        self
    }

    pub fn with_padding(mut self, padding: usize) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_hw(mut self, hw: HwDecoder) -> Self {
        self.hw = hw;
        self
    }

    pub fn with_pool(mut self, pool: SharedFramePool) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_io_buffer_size(mut self, size: usize) -> Self {
        self.io_buffer_size = size;
        self
    }
}

impl fmt::Debug for DecoderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoderConfig")
            .field("pixel_format", &self.pixel_format)
            .field("padding", &self.padding)
            .field("hw", &self.hw.to_string())
            .field("io_buffer_size", &self.io_buffer_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::pool::AllocatingPool;

    #[test]
    fn defaults() {
        let config = DecoderConfig::default();
        assert_eq!(config.pixel_format, PixelFormat::Rgb);
        assert_eq!(config.padding, 4);
        assert!(config.hw.is_empty());
        assert_eq!(config.io_buffer_size, 16 * 1024);
    }

    #[test]
    fn builders_override_fields() {
        let config = DecoderConfig::default()
            .with_pixel_format(PixelFormat::Rgba)
            .with_padding(0)
            .with_hw(HwDecoder::LINUX)
            .with_pool(Arc::new(AllocatingPool))
            .with_io_buffer_size(4096);
        assert_eq!(config.pixel_format, PixelFormat::Rgba);
        assert_eq!(config.padding, 0);
        assert_eq!(config.hw, HwDecoder::LINUX);
        assert_eq!(config.io_buffer_size, 4096);
        assert!(format!("{:?}", config).contains("vdpau,vaapi,drm"));
    }
}
