//! Pull-based video frame decoding on FFmpeg.
//!
//! A [`DecodeSession`] opens a container from memory, a file, a URL or any
//! reader, picks the best video stream and negotiates a decoder, trying the
//! requested hardware backends first and falling back to software. Frames
//! come out one at a time as packed RGB or RGBA with optional row padding,
//! backed by buffers from a [`FramePool`].
//!
//! ```no_run
//! use videcoder::{DecodeSession, DecoderConfig, HwDecoder, PixelFormat};
//!
//! # fn main() -> videcoder::Result<()> {
//! let config = DecoderConfig::default()
//!     .with_pixel_format(PixelFormat::Rgba)
//!     .with_hw(HwDecoder::platform_default());
//! let mut session = DecodeSession::open_file("clip.mp4", config)?;
//! while let Some(frame) = session.next_frame()? {
//!     println!("{:?} {}x{}", frame.timestamp(), frame.width(), frame.height());
//! }
//! # Ok(())
//! # }
//! ```

pub mod decoder;
pub mod engine;
pub mod error;
pub mod frame;
pub mod registry;
pub mod source;

pub use decoder::{
    AllocatingPool, DecodeSession, DecoderConfig, FramePool, HwDecoder, HwDevice, RotatingPool,
    SessionState, StreamSummary,
};
pub use engine::{CodecEngine, FfmpegEngine};
pub use error::{DecoderError, Result};
pub use frame::{Frame, FrameBuffer, FrameLayout, PixelFormat};
pub use source::StreamSource;
