//! Decoded frame values and output pixel layout

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

/// Shared byte buffer backing a decoded frame.
///
/// Buffers come from a [`FramePool`](crate::FramePool) and may be longer
/// than the frame itself; [`Frame::data`] returns the exact view.
pub type FrameBuffer = Arc<Vec<u8>>;

/// Caller-visible output pixel format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Packed 8-bit RGB (RGB24)
    #[default]
    Rgb,
    /// Packed 8-bit RGBA
    Rgba,
}

impl PixelFormat {
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb => 3,
            PixelFormat::Rgba => 4,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelFormat::Rgb => write!(f, "rgb"),
            PixelFormat::Rgba => write!(f, "rgba"),
        }
    }
}

impl FromStr for PixelFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rgb" | "rgb24" => Ok(PixelFormat::Rgb),
            "rgba" => Ok(PixelFormat::Rgba),
            other => Err(format!("unknown pixel format: {}", other)),
        }
    }
}

/// Byte layout of one output frame.
///
/// Every row is `width * bytes_per_pixel` pixel bytes followed by
/// `row_padding` filler bytes, where the padding is the remainder of the
/// row size modulo the configured alignment (0 disables it).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    pub width: u32,
    pub height: u32,
    pub bytes_per_pixel: usize,
    pub row_padding: usize,
}

impl FrameLayout {
    pub fn new(width: u32, height: u32, format: PixelFormat, alignment: usize) -> Self {
        let bytes_per_pixel = format.bytes_per_pixel();
        let row_bytes = width as usize * bytes_per_pixel;
        let row_padding = if alignment != 0 { row_bytes % alignment } else { 0 };
        Self {
            width,
            height,
            bytes_per_pixel,
            row_padding,
        }
    }

    /// Pixel bytes in one row, excluding padding
    pub fn row_bytes(&self) -> usize {
        self.width as usize * self.bytes_per_pixel
    }

    /// Distance in bytes between the starts of two consecutive rows
    pub fn stride(&self) -> usize {
        self.row_bytes() + self.row_padding
    }

    /// Total buffer length for the frame
    pub fn len(&self) -> usize {
        self.height as usize * self.stride()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A decoded video frame in the session's output format.
///
/// The buffer is pool-backed: a [`RotatingPool`](crate::RotatingPool) hands
/// the same allocation out again once every clone of this frame has been
/// dropped, so holding on to a frame is safe but keeps its slot busy.
#[derive(Clone)]
pub struct Frame {
    buffer: FrameBuffer,
    layout: FrameLayout,
    format: PixelFormat,
    timestamp: Duration,
}

impl Frame {
    pub(crate) fn new(
        buffer: FrameBuffer,
        layout: FrameLayout,
        format: PixelFormat,
        timestamp: Duration,
    ) -> Self {
        debug_assert!(buffer.len() >= layout.len());
        Self {
            buffer,
            layout,
            format,
            timestamp,
        }
    }

    /// Pixel data, exactly `height * stride` bytes
    pub fn data(&self) -> &[u8] {
        &self.buffer[..self.layout.len()]
    }

    /// One row of pixel bytes without its padding
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.layout.stride();
        &self.data()[start..start + self.layout.row_bytes()]
    }

    /// Copy the pixels into a tightly packed vector (padding removed)
    pub fn to_packed(&self) -> Vec<u8> {
        if self.layout.row_padding == 0 {
            return self.data().to_vec();
        }
        let mut packed = Vec::with_capacity(self.layout.row_bytes() * self.layout.height as usize);
        for y in 0..self.layout.height {
            packed.extend_from_slice(self.row(y));
        }
        packed
    }

    /// The pooled buffer itself, possibly longer than [`Frame::data`]
    pub fn buffer(&self) -> &FrameBuffer {
        &self.buffer
    }

    /// Presentation timestamp relative to the stream start
    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }

    pub fn width(&self) -> u32 {
        self.layout.width
    }

    pub fn height(&self) -> u32 {
        self.layout.height
    }

    pub fn stride(&self) -> usize {
        self.layout.stride()
    }

    pub fn layout(&self) -> FrameLayout {
        self.layout
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.layout.width)
            .field("height", &self.layout.height)
            .field("stride", &self.layout.stride())
            .field("format", &self.format)
            .field("timestamp", &self.timestamp)
            .field("len", &self.layout.len())
            .finish()
    }
}
