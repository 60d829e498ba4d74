//! Decode session: probe, decoder negotiation, the packet/frame loop,
//! hardware download, pixel conversion and seeking.

use serde::Serialize;
use std::fmt;
use std::io::{Read, Seek};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use super::config::DecoderConfig;
use super::hwaccel::{decode_candidates, DecodeCandidate, HwDecoder, HwDevice};
use crate::engine::{
    CodecEngine, FfmpegEngine, FrameInfo, ReadOutcome, ReceiveOutcome, ScalerKey, SendOutcome,
    StreamInfo,
};
use crate::error::{DecoderError, Result, INVALID_ARGUMENT};
use crate::frame::{Frame, FrameBuffer, FrameLayout, PixelFormat};
use crate::registry::{Registration, SourceRegistry};
use crate::source::{self, SeekableSource, SequentialSource, StreamSource};

/// Lifecycle of a decode session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Unopened,
    Probing,
    NegotiatingDecoder,
    /// Opened, no frame requested yet
    Ready,
    Decoding,
    Seeking,
    /// Input exhausted, buffered frames are being flushed out
    Draining,
    /// Every frame was returned and resources are released
    Exhausted,
    /// Disposed by the caller
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Unopened => "unopened",
            SessionState::Probing => "probing",
            SessionState::NegotiatingDecoder => "negotiating",
            SessionState::Ready => "ready",
            SessionState::Decoding => "decoding",
            SessionState::Seeking => "seeking",
            SessionState::Draining => "draining",
            SessionState::Exhausted => "exhausted",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Stream properties for display and JSON output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamSummary {
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub duration_ms: u64,
    pub hw_device: Option<HwDevice>,
    pub pixel_format: PixelFormat,
    pub seekable: bool,
}

/// How native frames become output bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConversionPath<P> {
    /// Rescale the decoded host frame
    Software,
    /// Hardware frames; transfer format not resolved yet
    HardwarePending,
    /// Download as `transfer`, then rescale
    HardwareConvert { transfer: P },
    /// Download straight in the output format and copy rows
    HardwareDirect { transfer: P },
}

struct CachedScaler<S, P> {
    key: ScalerKey<P>,
    scaler: S,
}

/// Every native handle a session owns
struct NativeState<E: CodecEngine> {
    packet: E::Packet,
    frame: E::Frame,
    /// Host-side scratch frame for hardware downloads
    host_frame: E::Frame,
    decoder: E::Decoder,
    hw: Option<E::HwContext>,
    demuxer: E::Demuxer,
    scaler: Option<CachedScaler<E::Scaler, E::Pixel>>,
    registration: Registration,
}

impl<E: CodecEngine> NativeState<E> {
    /// Release everything in dependency order
    fn release(self, engine: &E) {
        let NativeState {
            mut packet,
            mut frame,
            mut host_frame,
            decoder,
            hw,
            demuxer,
            scaler,
            registration,
        } = self;

        engine.release_packet(&mut packet);
        engine.release_frame(&mut frame);
        engine.release_frame(&mut host_frame);
        drop(packet);
        drop(frame);
        drop(host_frame);
        drop(decoder);
        drop(hw);
        drop(demuxer);
        drop(scaler);
        // Removing the registry entry closes the source
        drop(registration);
    }
}

/// Result of decoder negotiation
struct Negotiated<E: CodecEngine> {
    decoder: E::Decoder,
    hw: Option<E::HwContext>,
    device: Option<HwDevice>,
}

/// Try each candidate in order until a decoder opens.
///
/// Hardware device failures and invalid-argument opens skip to the next
/// candidate; any other open failure aborts. A failed attempt's decoder
/// and device are dropped before the next one is tried.
fn negotiate<E: CodecEngine>(
    engine: &E,
    demuxer: &E::Demuxer,
    stream: &StreamInfo<E::CodecId>,
    requested: HwDecoder,
) -> Result<Negotiated<E>> {
    for candidate in decode_candidates(engine, stream.codec_id, requested) {
        let (codec, hw) = match candidate {
            DecodeCandidate::Hardware { device, codec } => match engine.create_hw_device(device) {
                Ok(ctx) => (codec, Some(ctx)),
                Err(e) => {
                    info!(%device, "Skipping hardware decoder: {}", e);
                    continue;
                }
            },
            DecodeCandidate::Software { codec: Some(codec) } => (codec, None),
            DecodeCandidate::Software { codec: None } => {
                warn!("No software decoder registered for {:?}", stream.codec_id);
                continue;
            }
        };

        match engine.open_decoder(demuxer, stream.index, codec, hw.as_ref()) {
            Ok(decoder) => {
                return Ok(Negotiated {
                    decoder,
                    hw,
                    device: candidate.device(),
                })
            }
            Err(e) if e.is_invalid_argument() => {
                debug!(
                    device = ?candidate.device(),
                    "Decoder rejected configuration, trying next: {}",
                    e
                );
            }
            Err(e) => return Err(e),
        }
    }
    Err(DecoderError::NoDecoderAvailable)
}

/// Pull-based decoder over one stream source.
///
/// Frames come out in presentation order from [`next_frame`]; once the
/// stream is exhausted the session frees its native resources on its own.
/// Dropping the session disposes it.
///
/// [`next_frame`]: DecodeSession::next_frame
pub struct DecodeSession<E: CodecEngine = FfmpegEngine> {
    engine: E,
    native: Option<NativeState<E>>,
    state: SessionState,
    config: DecoderConfig,
    stream: StreamInfo<E::CodecId>,
    codec_name: String,
    hw_device: Option<HwDevice>,
    path: ConversionPath<E::Pixel>,
    seekable: bool,
    holding_packet: bool,
    duration: Duration,
    fps: f64,
    position: Duration,
    width: u32,
    height: u32,
    eof: bool,
    first_frame_decoded: bool,
}

impl DecodeSession<FfmpegEngine> {
    /// Decode from an in-memory buffer
    pub fn from_bytes(data: Vec<u8>, config: DecoderConfig) -> Result<Self> {
        Self::open_with(FfmpegEngine::new()?, source::memory(data), config)
    }

    pub fn open_file(path: impl AsRef<Path>, config: DecoderConfig) -> Result<Self> {
        Self::open_with(FfmpegEngine::new()?, source::file(path)?, config)
    }

    /// Decode an HTTP(S) stream; the session cannot seek
    pub fn open_url(url: &str, config: DecoderConfig) -> Result<Self> {
        Self::open_with(FfmpegEngine::new()?, source::url(url)?, config)
    }

    /// Decode a forward-only reader; the session cannot seek
    pub fn from_reader<R>(reader: R, config: DecoderConfig) -> Result<Self>
    where
        R: Read + Send + 'static,
    {
        let source = Box::new(SequentialSource::new(reader));
        Self::open_with(FfmpegEngine::new()?, source, config)
    }

    pub fn from_seekable<R>(reader: R, config: DecoderConfig) -> Result<Self>
    where
        R: Read + Seek + Send + 'static,
    {
        let source = Box::new(SeekableSource::new(reader));
        Self::open_with(FfmpegEngine::new()?, source, config)
    }
}

impl<E: CodecEngine> DecodeSession<E> {
    /// Probe `source` and negotiate a decoder.
    ///
    /// On failure everything acquired so far is released, including the
    /// source itself.
    pub fn open_with(
        engine: E,
        source: Box<dyn StreamSource>,
        config: DecoderConfig,
    ) -> Result<Self> {
        let started = Instant::now();

        trace!(state = %SessionState::Probing, "Opening source");
        let registration = SourceRegistry::global().register(source);
        let seekable = registration.is_seekable();
        let demuxer = engine.open_demuxer(registration.binding(config.io_buffer_size))?;
        let stream = engine
            .find_best_video_stream(&demuxer)?
            .ok_or(DecoderError::NoVideoStream)?;
        debug!(
            index = stream.index,
            width = stream.width,
            height = stream.height,
            "Selected video stream {:?}",
            stream.codec_id
        );

        trace!(state = %SessionState::NegotiatingDecoder, hw = %config.hw, "Negotiating decoder");
        let Negotiated {
            decoder,
            hw,
            device,
        } = negotiate(&engine, &demuxer, &stream, config.hw)?;

        let packet = engine.alloc_packet()?;
        let frame = engine.alloc_frame()?;
        let host_frame = engine.alloc_frame()?;
        let codec_name = engine.decoder_name(&decoder);

        let duration = stream_duration(&stream);
        let fps = stream.avg_frame_rate.as_f64();
        let path = if device.is_some() {
            ConversionPath::HardwarePending
        } else {
            ConversionPath::Software
        };

        info!(
            codec = %codec_name,
            hw = device.map(|d| d.name()).unwrap_or("none"),
            width = stream.width,
            height = stream.height,
            fps,
            duration_ms = duration.as_millis() as u64,
            seekable,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Opened decode session"
        );

        Ok(Self {
            native: Some(NativeState {
                packet,
                frame,
                host_frame,
                decoder,
                hw,
                demuxer,
                scaler: None,
                registration,
            }),
            engine,
            state: SessionState::Ready,
            width: stream.width,
            height: stream.height,
            stream,
            config,
            codec_name,
            hw_device: device,
            path,
            seekable,
            holding_packet: false,
            duration,
            fps,
            position: Duration::ZERO,
            eof: false,
            first_frame_decoded: false,
        })
    }

    /// Decode the next frame in presentation order.
    ///
    /// Returns `Ok(None)` once the stream is exhausted, and on every call
    /// after that or after [`dispose`](Self::dispose).
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(native) = self.native.as_mut() else {
            return Ok(None);
        };
        let engine = &self.engine;

        loop {
            if self.state != SessionState::Draining {
                if !self.holding_packet {
                    match engine.read_packet(&mut native.demuxer, &mut native.packet)? {
                        ReadOutcome::EndOfStream => {
                            debug!("End of input, draining decoder");
                            engine.send_packet(&mut native.decoder, None)?;
                            self.state = SessionState::Draining;
                            continue;
                        }
                        ReadOutcome::Packet { stream_index }
                            if stream_index != self.stream.index =>
                        {
                            engine.release_packet(&mut native.packet);
                            continue;
                        }
                        ReadOutcome::Packet { .. } => self.holding_packet = true,
                    }
                }

                match engine.send_packet(&mut native.decoder, Some(&native.packet))? {
                    SendOutcome::Accepted => {
                        engine.release_packet(&mut native.packet);
                        self.holding_packet = false;
                    }
                    SendOutcome::TryAgain => trace!("Decoder full, receiving before resubmitting"),
                }
                self.state = SessionState::Decoding;
            }

            match engine.receive_frame(&mut native.decoder, &mut native.frame)? {
                ReceiveOutcome::Frame => {
                    let produced = produce_frame(
                        engine,
                        native,
                        &mut self.path,
                        &self.config,
                        &self.stream,
                    );
                    engine.release_frame(&mut native.frame);
                    let frame = produced?;

                    self.position = frame.timestamp();
                    self.width = frame.width();
                    self.height = frame.height();
                    if !self.first_frame_decoded {
                        self.first_frame_decoded = true;
                        debug!(
                            width = self.width,
                            height = self.height,
                            timestamp_ms = self.position.as_millis() as u64,
                            "First frame decoded"
                        );
                    }
                    return Ok(Some(frame));
                }
                ReceiveOutcome::TryAgain if self.state != SessionState::Draining => continue,
                // A draining decoder that wants more input has nothing left
                ReceiveOutcome::TryAgain | ReceiveOutcome::EndOfStream => {
                    self.finish();
                    return Ok(None);
                }
            }
        }
    }

    /// Seek to the keyframe at or before `target`.
    ///
    /// Decoding resumes from that keyframe, so the next frame may be
    /// earlier than `target`.
    pub fn seek(&mut self, target: Duration) -> Result<()> {
        let Some(native) = self.native.as_mut() else {
            return Err(DecoderError::Closed);
        };
        if !self.seekable {
            return Err(DecoderError::UnsupportedSeek);
        }

        self.state = SessionState::Seeking;
        let timestamp = millis_to_stream_ts(target, &self.stream);
        debug!(
            target_ms = target.as_millis() as u64,
            timestamp,
            "Seeking"
        );

        self.engine
            .seek(&mut native.demuxer, self.stream.index, timestamp)?;
        self.engine.flush_decoder(&mut native.decoder);
        self.engine.release_packet(&mut native.packet);
        self.holding_packet = false;
        self.position = target;
        self.state = SessionState::Decoding;
        Ok(())
    }

    /// Release every native resource and close the source. Safe to call
    /// more than once.
    pub fn dispose(&mut self) {
        if let Some(native) = self.native.take() {
            native.release(&self.engine);
            debug!(codec = %self.codec_name, "Disposed decode session");
        }
        if self.state != SessionState::Exhausted {
            self.state = SessionState::Closed;
        }
    }

    /// Change the output pixel format for subsequent frames
    pub fn set_pixel_format(&mut self, format: PixelFormat) {
        if self.config.pixel_format == format {
            return;
        }
        debug!(from = %self.config.pixel_format, to = %format, "Changing output format");
        self.config.pixel_format = format;
        if let Some(native) = self.native.as_mut() {
            native.scaler = None;
        }
        if self.path != ConversionPath::Software {
            self.path = ConversionPath::HardwarePending;
        }
    }

    /// Change the row alignment for subsequent frames; 0 disables padding
    pub fn set_padding(&mut self, padding: usize) {
        self.config.padding = padding;
    }

    fn finish(&mut self) {
        info!(
            position_ms = self.position.as_millis() as u64,
            "End of stream"
        );
        self.eof = true;
        self.holding_packet = false;
        self.state = SessionState::Exhausted;
        if let Some(native) = self.native.take() {
            native.release(&self.engine);
        }
    }

    /// Timestamp of the last returned frame, or the last seek target
    pub fn position(&self) -> Duration {
        self.position
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Average frame rate, 0 when the container does not state one
    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    pub fn is_hardware_decoder(&self) -> bool {
        self.hw_device.is_some()
    }

    pub fn hw_device(&self) -> Option<HwDevice> {
        self.hw_device
    }

    pub fn is_seekable(&self) -> bool {
        self.seekable
    }

    pub fn codec_name(&self) -> &str {
        &self.codec_name
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.config.pixel_format
    }

    pub fn padding(&self) -> usize {
        self.config.padding
    }

    pub fn summary(&self) -> StreamSummary {
        StreamSummary {
            codec: self.codec_name.clone(),
            width: self.width,
            height: self.height,
            fps: self.fps,
            duration_ms: self.duration.as_millis() as u64,
            hw_device: self.hw_device,
            pixel_format: self.config.pixel_format,
            seekable: self.seekable,
        }
    }
}

impl<E: CodecEngine> Drop for DecodeSession<E> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<E: CodecEngine> fmt::Debug for DecodeSession<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodeSession")
            .field("codec", &self.codec_name)
            .field("hw_device", &self.hw_device)
            .field("state", &self.state)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}

/// Convert the received native frame into a pooled output frame
fn produce_frame<E: CodecEngine>(
    engine: &E,
    native: &mut NativeState<E>,
    path: &mut ConversionPath<E::Pixel>,
    config: &DecoderConfig,
    stream: &StreamInfo<E::CodecId>,
) -> Result<Frame> {
    let info = engine.frame_info(&native.frame);
    let layout = FrameLayout::new(info.width, info.height, config.pixel_format, config.padding);
    let target = engine.output_pixel(config.pixel_format);
    let timestamp = frame_timestamp(info.pts, stream);

    // A hardware decoder may still emit system-memory frames, e.g. after
    // its accelerator refused the stream profile
    let transfer = match *path {
        ConversionPath::Software => None,
        _ if !info.hardware => {
            trace!(format = ?info.format, "Hardware session produced a software frame");
            None
        }
        ConversionPath::HardwareConvert { transfer }
        | ConversionPath::HardwareDirect { transfer } => Some(transfer),
        ConversionPath::HardwarePending => {
            let formats = engine.hw_transfer_formats(&native.frame)?;
            let transfer = if formats.contains(&target) {
                target
            } else {
                *formats.first().ok_or_else(|| {
                    DecoderError::engine(
                        INVALID_ARGUMENT,
                        "hardware frame has no host transfer format",
                    )
                })?
            };
            *path = if transfer == target {
                ConversionPath::HardwareDirect { transfer }
            } else {
                ConversionPath::HardwareConvert { transfer }
            };
            debug!(?formats, ?transfer, "Resolved hardware transfer format");
            Some(transfer)
        }
    };

    let buffer = match transfer {
        None => convert(engine, &mut native.scaler, &native.frame, info, target, layout, config)?,
        Some(transfer) => {
            let result = download(engine, native, transfer, target, layout, config);
            engine.release_frame(&mut native.host_frame);
            result?
        }
    };

    Ok(Frame::new(buffer, layout, config.pixel_format, timestamp))
}

/// Transfer the hardware frame to host memory and write it to a pool buffer
fn download<E: CodecEngine>(
    engine: &E,
    native: &mut NativeState<E>,
    transfer: E::Pixel,
    target: E::Pixel,
    layout: FrameLayout,
    config: &DecoderConfig,
) -> Result<FrameBuffer> {
    engine.transfer_hw_frame(&native.frame, &mut native.host_frame, transfer)?;
    if transfer == target {
        let host = &native.host_frame;
        config
            .pool
            .rent(layout.len(), &mut |dst: &mut [u8]| engine.copy_pixels(host, dst, layout))
    } else {
        let info = engine.frame_info(&native.host_frame);
        convert(engine, &mut native.scaler, &native.host_frame, info, target, layout, config)
    }
}

/// Rescale `frame` into a pool buffer, rebuilding the cached scaler when
/// the frame geometry or formats changed
fn convert<E: CodecEngine>(
    engine: &E,
    cache: &mut Option<CachedScaler<E::Scaler, E::Pixel>>,
    frame: &E::Frame,
    info: FrameInfo<E::Pixel>,
    target: E::Pixel,
    layout: FrameLayout,
    config: &DecoderConfig,
) -> Result<FrameBuffer> {
    let key = ScalerKey {
        width: info.width,
        height: info.height,
        src: info.format,
        dst: target,
    };
    if cache.as_ref().map_or(true, |cached| cached.key != key) {
        if cache.is_some() {
            debug!(?key, "Frame geometry changed, rebuilding scaler");
        }
        *cache = None;
        let scaler = engine.create_scaler(key)?;
        *cache = Some(CachedScaler { key, scaler });
    }
    let Some(cached) = cache.as_mut() else {
        return Err(DecoderError::ResourceAllocation("a scaling context"));
    };

    let scaler = &mut cached.scaler;
    let stride = layout.stride();
    config
        .pool
        .rent(layout.len(), &mut |dst: &mut [u8]| engine.rescale(scaler, frame, dst, stride))
}

/// Stream duration, falling back to the container's
fn stream_duration<Id>(stream: &StreamInfo<Id>) -> Duration {
    if let Some(ticks) = stream.duration {
        let tb = stream.time_base;
        if tb.den != 0 {
            let micros = ticks as i128 * tb.num as i128 * 1_000_000 / tb.den as i128;
            return Duration::from_micros(micros.clamp(0, u64::MAX as i128) as u64);
        }
    }
    stream
        .container_duration_us
        .map(|us| Duration::from_micros(us.max(0) as u64))
        .unwrap_or(Duration::ZERO)
}

/// Presentation time relative to the stream start, in whole milliseconds
fn frame_timestamp<Id>(pts: Option<i64>, stream: &StreamInfo<Id>) -> Duration {
    let Some(pts) = pts else {
        return Duration::ZERO;
    };
    let tb = stream.time_base;
    if tb.den == 0 {
        return Duration::ZERO;
    }
    let relative = pts as i128 - stream.start_time.unwrap_or(0) as i128;
    let millis = relative * tb.num as i128 * 1000 / tb.den as i128;
    Duration::from_millis(millis.clamp(0, u64::MAX as i128) as u64)
}

/// Millisecond target to a timestamp in the stream's time base
fn millis_to_stream_ts<Id>(target: Duration, stream: &StreamInfo<Id>) -> i64 {
    let tb = stream.time_base;
    let start = stream.start_time.unwrap_or(0);
    if tb.num == 0 {
        return start;
    }
    let ticks = target.as_millis() as i128 * tb.den as i128 / (tb.num as i128 * 1000);
    (start as i128 + ticks).clamp(i64::MIN as i128, i64::MAX as i128) as i64
}
