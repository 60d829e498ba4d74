//! Scripted in-memory engine for session tests
//!
//! Produces a synthetic stream described by [`MockScript`] and counts the
//! native objects it hands out so tests can check lifetimes.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::decoder::HwDevice;
use crate::engine::{
    CodecDescriptor, CodecEngine, FrameInfo, Rational, ReadOutcome, ReceiveOutcome, ScalerKey,
    SendOutcome, StreamInfo,
};
use crate::error::{DecoderError, Result, INVALID_ARGUMENT, TRY_AGAIN};
use crate::frame::{FrameLayout, PixelFormat};
use crate::registry::IoBinding;

/// Leading bytes a mock container must start with
pub const MAGIC: &[u8; 4] = b"MOCK";

const AVERROR_EOF: i32 = -541_478_725;
const AVERROR_INVALIDDATA: i32 = -1_094_995_529;
const AVERROR_EXTERNAL: i32 = -542_398_533;

pub const VIDEO_STREAM: usize = 0;
pub const AUDIO_STREAM: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockPixel {
    Yuv420,
    Nv12,
    Rgb24,
    Rgba,
    HwSurface,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenBehavior {
    Succeed,
    InvalidArgument,
    Fail(i32),
}

#[derive(Debug, Clone)]
pub struct MockCodec {
    pub id: u32,
    pub name: &'static str,
    pub is_decoder: bool,
    pub hw: Vec<HwDevice>,
    /// Result of opening this codec in software mode
    pub software_open: OpenBehavior,
    /// Result of opening this codec with a hardware device
    pub hardware_open: OpenBehavior,
}

impl MockCodec {
    pub fn decoder(id: u32, name: &'static str) -> Self {
        Self {
            id,
            name,
            is_decoder: true,
            hw: Vec::new(),
            software_open: OpenBehavior::Succeed,
            hardware_open: OpenBehavior::Succeed,
        }
    }

    pub fn encoder(id: u32, name: &'static str) -> Self {
        Self {
            is_decoder: false,
            ..Self::decoder(id, name)
        }
    }

    pub fn with_hw(mut self, devices: &[HwDevice]) -> Self {
        self.hw = devices.to_vec();
        self
    }

    pub fn hardware_open(mut self, behavior: OpenBehavior) -> Self {
        self.hardware_open = behavior;
        self
    }

    pub fn software_open(mut self, behavior: OpenBehavior) -> Self {
        self.software_open = behavior;
        self
    }
}

/// Description of the synthetic media and engine behavior
#[derive(Debug, Clone)]
pub struct MockScript {
    pub codecs: Vec<MockCodec>,
    /// Codec id of the video stream, `None` for an audio-only container
    pub video_codec: Option<u32>,
    pub width: u32,
    pub height: u32,
    /// Switch to a new resolution from this frame index on
    pub resize_at: Option<(usize, u32, u32)>,
    pub frames: usize,
    pub time_base: Rational,
    pub frame_rate: Rational,
    /// Timestamp increment per frame, in time base units
    pub frame_duration: i64,
    pub start_time: i64,
    pub keyframe_interval: usize,
    pub stream_duration: Option<i64>,
    pub container_duration_us: Option<i64>,
    /// An audio packet precedes every video packet
    pub interleave_audio: bool,
    /// Frames held back inside the decoder before output starts
    pub reorder_delay: usize,
    /// Every n-th submission is refused once with a try-again
    pub stall_every: Option<usize>,
    /// Devices whose context creation fails
    pub failing_devices: Vec<HwDevice>,
    pub transfer_formats: Vec<MockPixel>,
    pub software_format: MockPixel,
    /// Hardware decoders hand out `software_format` frames instead of surfaces
    pub hw_outputs_software: bool,
    /// Read error code returned at this packet index
    pub read_error_at: Option<usize>,
}

impl Default for MockScript {
    fn default() -> Self {
        Self {
            codecs: vec![MockCodec::decoder(27, "h264")],
            video_codec: Some(27),
            width: 320,
            height: 240,
            resize_at: None,
            frames: 300,
            time_base: Rational::new(1, 90_000),
            frame_rate: Rational::new(30, 1),
            frame_duration: 3000,
            start_time: 0,
            keyframe_interval: 30,
            stream_duration: Some(900_000),
            container_duration_us: Some(10_000_000),
            interleave_audio: false,
            reorder_delay: 0,
            stall_every: None,
            failing_devices: Vec::new(),
            transfer_formats: vec![MockPixel::Nv12],
            software_format: MockPixel::Yuv420,
            hw_outputs_software: false,
            read_error_at: None,
        }
    }
}

/// Live object counters shared by everything an engine creates
#[derive(Debug, Default)]
pub struct MockStats {
    pub live_demuxers: AtomicUsize,
    pub live_decoders: AtomicUsize,
    pub max_live_decoders: AtomicUsize,
    pub decoders_opened: AtomicUsize,
    pub live_hw_devices: AtomicUsize,
    pub live_packets: AtomicUsize,
    pub live_frames: AtomicUsize,
    pub scalers_built: AtomicUsize,
    pub live_scalers: AtomicUsize,
    pub transfers: AtomicUsize,
    pub direct_copies: AtomicUsize,
    pub seeks: AtomicUsize,
}

impl MockStats {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    /// Every native object has been released
    pub fn all_released(&self) -> bool {
        [
            &self.live_demuxers,
            &self.live_decoders,
            &self.live_hw_devices,
            &self.live_packets,
            &self.live_frames,
            &self.live_scalers,
        ]
        .iter()
        .all(|c| Self::get(c) == 0)
    }
}

#[derive(Debug, Clone, Copy)]
enum Counter {
    Demuxer,
    Decoder,
    HwDevice,
    Packet,
    Frame,
    Scaler,
}

impl Counter {
    fn of(self, stats: &MockStats) -> &AtomicUsize {
        match self {
            Counter::Demuxer => &stats.live_demuxers,
            Counter::Decoder => &stats.live_decoders,
            Counter::HwDevice => &stats.live_hw_devices,
            Counter::Packet => &stats.live_packets,
            Counter::Frame => &stats.live_frames,
            Counter::Scaler => &stats.live_scalers,
        }
    }
}

/// Decrements its live counter when dropped
struct Tracked {
    stats: Arc<MockStats>,
    counter: Counter,
}

impl Tracked {
    fn new(stats: &Arc<MockStats>, counter: Counter) -> Self {
        counter.of(stats).fetch_add(1, Ordering::SeqCst);
        Self {
            stats: Arc::clone(stats),
            counter,
        }
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.counter.of(&self.stats).fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy)]
struct MockPacketData {
    stream_index: usize,
    frame: usize,
}

pub struct MockDemuxer {
    _tracked: Tracked,
    packets: Vec<MockPacketData>,
    cursor: usize,
}

pub struct MockHwContext {
    _tracked: Tracked,
    device: HwDevice,
}

pub struct MockDecoder {
    _tracked: Tracked,
    codec: usize,
    device: Option<HwDevice>,
    queue: VecDeque<usize>,
    draining: bool,
    sends: usize,
    stalled: bool,
}

pub struct MockPacket {
    _tracked: Tracked,
    data: Option<MockPacketData>,
}

pub struct MockFrame {
    _tracked: Tracked,
    info: Option<FrameInfo<MockPixel>>,
    /// Source frame index, used as the pixel fill value
    index: usize,
}

pub struct MockScaler {
    _tracked: Tracked,
    key: ScalerKey<MockPixel>,
}

/// Engine producing the stream described by its script
pub struct MockEngine {
    script: MockScript,
    stats: Arc<MockStats>,
}

impl MockEngine {
    pub fn new(script: MockScript) -> Self {
        Self {
            script,
            stats: Arc::new(MockStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<MockStats> {
        Arc::clone(&self.stats)
    }

    fn frame_pts(&self, index: usize) -> i64 {
        self.script.start_time + index as i64 * self.script.frame_duration
    }

    fn frame_size(&self, index: usize) -> (u32, u32) {
        match self.script.resize_at {
            Some((at, w, h)) if index >= at => (w, h),
            _ => (self.script.width, self.script.height),
        }
    }

    fn packet_layout(&self) -> Vec<MockPacketData> {
        let mut packets = Vec::new();
        for frame in 0..self.script.frames {
            if self.script.interleave_audio {
                packets.push(MockPacketData {
                    stream_index: AUDIO_STREAM,
                    frame,
                });
            }
            packets.push(MockPacketData {
                stream_index: VIDEO_STREAM,
                frame,
            });
        }
        packets
    }

    fn fill_rows(
        dst: &mut [u8],
        rows: u32,
        row_bytes: usize,
        stride: usize,
        value: u8,
    ) -> Result<()> {
        let needed = rows as usize * stride;
        if dst.len() < needed || stride < row_bytes {
            return Err(DecoderError::engine(INVALID_ARGUMENT, "destination too small"));
        }
        for row in dst[..needed].chunks_mut(stride) {
            row[..row_bytes].fill(value);
        }
        Ok(())
    }
}

fn pixel_bytes(format: MockPixel) -> usize {
    match format {
        MockPixel::Rgba => 4,
        _ => 3,
    }
}

impl CodecEngine for MockEngine {
    type CodecId = u32;
    type Codec = usize;
    type Pixel = MockPixel;
    type Demuxer = MockDemuxer;
    type HwContext = MockHwContext;
    type Decoder = MockDecoder;
    type Packet = MockPacket;
    type Frame = MockFrame;
    type Scaler = MockScaler;

    fn open_demuxer(&self, io: IoBinding) -> Result<MockDemuxer> {
        let mut magic = [0u8; 4];
        let mut filled = 0;
        while filled < magic.len() {
            let n = io.read(&mut magic[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if &magic != MAGIC {
            return Err(DecoderError::engine(
                AVERROR_INVALIDDATA,
                self.error_to_string(AVERROR_INVALIDDATA),
            ));
        }
        Ok(MockDemuxer {
            _tracked: Tracked::new(&self.stats, Counter::Demuxer),
            packets: self.packet_layout(),
            cursor: 0,
        })
    }

    fn find_best_video_stream(&self, _demuxer: &MockDemuxer) -> Result<Option<StreamInfo<u32>>> {
        Ok(self.script.video_codec.map(|codec_id| StreamInfo {
            index: VIDEO_STREAM,
            codec_id,
            time_base: self.script.time_base,
            avg_frame_rate: self.script.frame_rate,
            start_time: Some(self.script.start_time),
            duration: self.script.stream_duration,
            container_duration_us: self.script.container_duration_us,
            width: self.script.width,
            height: self.script.height,
        }))
    }

    fn registered_codecs(&self) -> Vec<CodecDescriptor<u32, usize>> {
        self.script
            .codecs
            .iter()
            .enumerate()
            .map(|(index, c)| CodecDescriptor {
                id: c.id,
                codec: index,
                is_decoder: c.is_decoder,
                name: c.name.to_string(),
            })
            .collect()
    }

    fn find_decoder(&self, id: u32) -> Option<usize> {
        self.script
            .codecs
            .iter()
            .position(|c| c.is_decoder && c.id == id)
    }

    fn hw_configs(&self, codec: usize) -> Vec<HwDevice> {
        self.script.codecs[codec].hw.clone()
    }

    fn create_hw_device(&self, device: HwDevice) -> Result<MockHwContext> {
        if self.script.failing_devices.contains(&device) {
            return Err(DecoderError::engine(
                AVERROR_EXTERNAL,
                self.error_to_string(AVERROR_EXTERNAL),
            ));
        }
        Ok(MockHwContext {
            _tracked: Tracked::new(&self.stats, Counter::HwDevice),
            device,
        })
    }

    fn open_decoder(
        &self,
        _demuxer: &MockDemuxer,
        _stream_index: usize,
        codec: usize,
        hw: Option<&MockHwContext>,
    ) -> Result<MockDecoder> {
        let tracked = Tracked::new(&self.stats, Counter::Decoder);
        let live = MockStats::get(&self.stats.live_decoders);
        self.stats.max_live_decoders.fetch_max(live, Ordering::SeqCst);

        let codec_script = &self.script.codecs[codec];
        let behavior = if hw.is_some() {
            codec_script.hardware_open
        } else {
            codec_script.software_open
        };
        match behavior {
            OpenBehavior::Succeed => {}
            OpenBehavior::InvalidArgument => {
                return Err(DecoderError::engine(INVALID_ARGUMENT, "Invalid argument"))
            }
            OpenBehavior::Fail(code) => {
                return Err(DecoderError::engine(code, self.error_to_string(code)))
            }
        }

        self.stats.decoders_opened.fetch_add(1, Ordering::SeqCst);
        Ok(MockDecoder {
            _tracked: tracked,
            codec,
            device: hw.map(|h| h.device),
            queue: VecDeque::new(),
            draining: false,
            sends: 0,
            stalled: false,
        })
    }

    fn decoder_name(&self, decoder: &MockDecoder) -> String {
        self.script.codecs[decoder.codec].name.to_string()
    }

    fn alloc_packet(&self) -> Result<MockPacket> {
        Ok(MockPacket {
            _tracked: Tracked::new(&self.stats, Counter::Packet),
            data: None,
        })
    }

    fn alloc_frame(&self) -> Result<MockFrame> {
        Ok(MockFrame {
            _tracked: Tracked::new(&self.stats, Counter::Frame),
            info: None,
            index: 0,
        })
    }

    fn read_packet(
        &self,
        demuxer: &mut MockDemuxer,
        packet: &mut MockPacket,
    ) -> Result<ReadOutcome> {
        if self.script.read_error_at == Some(demuxer.cursor) {
            return Err(DecoderError::engine(-5, self.error_to_string(-5)));
        }
        match demuxer.packets.get(demuxer.cursor) {
            Some(data) => {
                demuxer.cursor += 1;
                packet.data = Some(*data);
                Ok(ReadOutcome::Packet {
                    stream_index: data.stream_index,
                })
            }
            None => Ok(ReadOutcome::EndOfStream),
        }
    }

    fn release_packet(&self, packet: &mut MockPacket) {
        packet.data = None;
    }

    fn send_packet(
        &self,
        decoder: &mut MockDecoder,
        packet: Option<&MockPacket>,
    ) -> Result<SendOutcome> {
        let Some(packet) = packet else {
            decoder.draining = true;
            return Ok(SendOutcome::Accepted);
        };
        let data = packet
            .data
            .ok_or_else(|| DecoderError::engine(INVALID_ARGUMENT, "empty packet"))?;
        if data.stream_index != VIDEO_STREAM {
            return Err(DecoderError::engine(INVALID_ARGUMENT, "packet from another stream"));
        }

        if let Some(every) = self.script.stall_every {
            if !decoder.stalled && (decoder.sends + 1) % every == 0 {
                decoder.stalled = true;
                return Ok(SendOutcome::TryAgain);
            }
        }
        if decoder.queue.len() > self.script.reorder_delay {
            return Ok(SendOutcome::TryAgain);
        }

        decoder.stalled = false;
        decoder.sends += 1;
        decoder.queue.push_back(data.frame);
        Ok(SendOutcome::Accepted)
    }

    fn receive_frame(
        &self,
        decoder: &mut MockDecoder,
        frame: &mut MockFrame,
    ) -> Result<ReceiveOutcome> {
        let ready = decoder.queue.len() > self.script.reorder_delay
            || (decoder.draining && !decoder.queue.is_empty());
        if !ready {
            return Ok(if decoder.draining {
                ReceiveOutcome::EndOfStream
            } else {
                ReceiveOutcome::TryAgain
            });
        }
        let Some(index) = decoder.queue.pop_front() else {
            return Err(DecoderError::engine(TRY_AGAIN, "decoder queue empty"));
        };
        let (width, height) = self.frame_size(index);
        frame.index = index;
        let hardware = decoder.device.is_some() && !self.script.hw_outputs_software;
        frame.info = Some(FrameInfo {
            width,
            height,
            format: if hardware {
                MockPixel::HwSurface
            } else {
                self.script.software_format
            },
            pts: Some(self.frame_pts(index)),
            hardware,
        });
        Ok(ReceiveOutcome::Frame)
    }

    fn release_frame(&self, frame: &mut MockFrame) {
        frame.info = None;
    }

    fn frame_info(&self, frame: &MockFrame) -> FrameInfo<MockPixel> {
        frame.info.unwrap_or(FrameInfo {
            width: 0,
            height: 0,
            format: self.script.software_format,
            pts: None,
            hardware: false,
        })
    }

    fn output_pixel(&self, format: PixelFormat) -> MockPixel {
        match format {
            PixelFormat::Rgb => MockPixel::Rgb24,
            PixelFormat::Rgba => MockPixel::Rgba,
        }
    }

    fn hw_transfer_formats(&self, frame: &MockFrame) -> Result<Vec<MockPixel>> {
        match frame.info {
            Some(info) if info.hardware => Ok(self.script.transfer_formats.clone()),
            _ => Err(DecoderError::engine(INVALID_ARGUMENT, "not a hardware frame")),
        }
    }

    fn transfer_hw_frame(
        &self,
        src: &MockFrame,
        dst: &mut MockFrame,
        format: MockPixel,
    ) -> Result<()> {
        let info = src
            .info
            .ok_or_else(|| DecoderError::engine(INVALID_ARGUMENT, "empty source frame"))?;
        if !self.script.transfer_formats.contains(&format) {
            return Err(DecoderError::engine(INVALID_ARGUMENT, "unsupported transfer format"));
        }
        self.stats.transfers.fetch_add(1, Ordering::SeqCst);
        dst.index = src.index;
        dst.info = Some(FrameInfo {
            format,
            hardware: false,
            ..info
        });
        Ok(())
    }

    fn create_scaler(&self, key: ScalerKey<MockPixel>) -> Result<MockScaler> {
        self.stats.scalers_built.fetch_add(1, Ordering::SeqCst);
        Ok(MockScaler {
            _tracked: Tracked::new(&self.stats, Counter::Scaler),
            key,
        })
    }

    fn rescale(
        &self,
        scaler: &mut MockScaler,
        frame: &MockFrame,
        dst: &mut [u8],
        stride: usize,
    ) -> Result<()> {
        let info = self.frame_info(frame);
        if info.width != scaler.key.width
            || info.height != scaler.key.height
            || info.format != scaler.key.src
        {
            return Err(DecoderError::engine(INVALID_ARGUMENT, "stale scaler"));
        }
        let row_bytes = info.width as usize * pixel_bytes(scaler.key.dst);
        Self::fill_rows(dst, info.height, row_bytes, stride, frame.index as u8)
    }

    fn copy_pixels(&self, frame: &MockFrame, dst: &mut [u8], layout: FrameLayout) -> Result<()> {
        self.stats.direct_copies.fetch_add(1, Ordering::SeqCst);
        Self::fill_rows(
            dst,
            layout.height,
            layout.row_bytes(),
            layout.stride(),
            frame.index as u8,
        )
    }

    fn seek(&self, demuxer: &mut MockDemuxer, _stream_index: usize, timestamp: i64) -> Result<()> {
        self.stats.seeks.fetch_add(1, Ordering::SeqCst);
        let interval = self.script.keyframe_interval.max(1);
        let target = (0..self.script.frames)
            .step_by(interval)
            .take_while(|&i| self.frame_pts(i) <= timestamp)
            .last()
            .unwrap_or(0);
        demuxer.cursor = demuxer
            .packets
            .iter()
            .position(|p| p.frame == target)
            .unwrap_or(demuxer.packets.len());
        Ok(())
    }

    fn flush_decoder(&self, decoder: &mut MockDecoder) {
        decoder.queue.clear();
        decoder.draining = false;
    }

    fn error_to_string(&self, code: i32) -> String {
        match code {
            AVERROR_EOF => "End of file".to_string(),
            AVERROR_INVALIDDATA => "Invalid data found when processing input".to_string(),
            AVERROR_EXTERNAL => "Generic error in an external library".to_string(),
            INVALID_ARGUMENT => "Invalid argument".to_string(),
            -5 => "Input/output error".to_string(),
            other => format!("Error number {} occurred", other),
        }
    }
}
