//! Codec engine seam
//!
//! The decode session drives demuxing, decoding, hardware transfer and
//! pixel conversion through [`CodecEngine`]. Native handles are associated
//! types owned by the session; the engine only borrows them per call and
//! never keeps them alive itself.

mod ffmpeg;
#[cfg(test)]
pub(crate) mod mock;

pub use ffmpeg::FfmpegEngine;

use std::fmt::Debug;

use crate::decoder::HwDevice;
use crate::error::Result;
use crate::frame::{FrameLayout, PixelFormat};
use crate::registry::IoBinding;

/// Rational number as used for time bases and frame rates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// Value as a float, 0 when the denominator is 0
    pub fn as_f64(self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            self.num as f64 / self.den as f64
        }
    }
}

/// Properties of the selected video stream
#[derive(Debug, Clone)]
pub struct StreamInfo<Id> {
    pub index: usize,
    pub codec_id: Id,
    pub time_base: Rational,
    pub avg_frame_rate: Rational,
    /// First timestamp in time base units
    pub start_time: Option<i64>,
    /// Stream duration in time base units
    pub duration: Option<i64>,
    /// Container duration in microseconds
    pub container_duration_us: Option<i64>,
    pub width: u32,
    pub height: u32,
}

/// One entry of the engine's registered codec list
#[derive(Debug, Clone)]
pub struct CodecDescriptor<Id, C> {
    pub id: Id,
    pub codec: C,
    pub is_decoder: bool,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Packet { stream_index: usize },
    EndOfStream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The packet was consumed and can be released
    Accepted,
    /// Output must be received before more input is taken
    TryAgain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    Frame,
    /// The decoder needs more input
    TryAgain,
    /// The decoder is fully drained
    EndOfStream,
}

/// Geometry and format of a decoded native frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo<P> {
    pub width: u32,
    pub height: u32,
    pub format: P,
    pub pts: Option<i64>,
    /// Pixels live in a device surface and need a transfer first
    pub hardware: bool,
}

/// Identity of a scaler; a cached scaler is reused only for an equal key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScalerKey<P> {
    pub width: u32,
    pub height: u32,
    pub src: P,
    pub dst: P,
}

/// Native demux/decode/scale capability.
pub trait CodecEngine {
    type CodecId: Copy + Eq + Debug;
    type Codec: Copy + PartialEq + Debug;
    type Pixel: Copy + Eq + Debug;
    type Demuxer;
    type HwContext;
    type Decoder;
    type Packet;
    type Frame;
    type Scaler;

    /// Open the container over a registered source and analyse its streams
    fn open_demuxer(&self, io: IoBinding) -> Result<Self::Demuxer>;

    /// Best video stream by the engine's scoring, `None` when there is none
    fn find_best_video_stream(
        &self,
        demuxer: &Self::Demuxer,
    ) -> Result<Option<StreamInfo<Self::CodecId>>>;

    fn registered_codecs(&self) -> Vec<CodecDescriptor<Self::CodecId, Self::Codec>>;

    /// Default decoder for a codec id
    fn find_decoder(&self, id: Self::CodecId) -> Option<Self::Codec>;

    /// Device types the codec advertises hardware configs for
    fn hw_configs(&self, codec: Self::Codec) -> Vec<HwDevice>;

    fn create_hw_device(&self, device: HwDevice) -> Result<Self::HwContext>;

    /// Allocate a decoder context for the stream, bind its parameters and
    /// open it, attached to `hw` when given
    fn open_decoder(
        &self,
        demuxer: &Self::Demuxer,
        stream_index: usize,
        codec: Self::Codec,
        hw: Option<&Self::HwContext>,
    ) -> Result<Self::Decoder>;

    fn decoder_name(&self, decoder: &Self::Decoder) -> String;

    fn alloc_packet(&self) -> Result<Self::Packet>;

    fn alloc_frame(&self) -> Result<Self::Frame>;

    fn read_packet(
        &self,
        demuxer: &mut Self::Demuxer,
        packet: &mut Self::Packet,
    ) -> Result<ReadOutcome>;

    fn release_packet(&self, packet: &mut Self::Packet);

    /// Submit a packet, or the drain signal when `packet` is `None`
    fn send_packet(
        &self,
        decoder: &mut Self::Decoder,
        packet: Option<&Self::Packet>,
    ) -> Result<SendOutcome>;

    fn receive_frame(
        &self,
        decoder: &mut Self::Decoder,
        frame: &mut Self::Frame,
    ) -> Result<ReceiveOutcome>;

    fn release_frame(&self, frame: &mut Self::Frame);

    fn frame_info(&self, frame: &Self::Frame) -> FrameInfo<Self::Pixel>;

    /// Native identifier for an output pixel format
    fn output_pixel(&self, format: PixelFormat) -> Self::Pixel;

    /// Host formats a hardware frame can be downloaded as
    fn hw_transfer_formats(&self, frame: &Self::Frame) -> Result<Vec<Self::Pixel>>;

    /// Download a hardware frame into a host frame of `format`
    fn transfer_hw_frame(
        &self,
        src: &Self::Frame,
        dst: &mut Self::Frame,
        format: Self::Pixel,
    ) -> Result<()>;

    fn create_scaler(&self, key: ScalerKey<Self::Pixel>) -> Result<Self::Scaler>;

    /// Convert `frame` into `dst`, rows `stride` bytes apart
    fn rescale(
        &self,
        scaler: &mut Self::Scaler,
        frame: &Self::Frame,
        dst: &mut [u8],
        stride: usize,
    ) -> Result<()>;

    /// Copy a host frame already in the output format row by row
    fn copy_pixels(&self, frame: &Self::Frame, dst: &mut [u8], layout: FrameLayout) -> Result<()>;

    /// Seek to the keyframe at or before `timestamp` (stream time base)
    fn seek(&self, demuxer: &mut Self::Demuxer, stream_index: usize, timestamp: i64) -> Result<()>;

    fn flush_decoder(&self, decoder: &mut Self::Decoder);

    fn error_to_string(&self, code: i32) -> String;
}
