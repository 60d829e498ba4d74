//! FFmpeg implementation of the codec engine
//!
//! Decoders, packets and frames are ffmpeg-next's own types. The custom
//! AVIO context, hardware device references and the padded-stride scaler
//! have no safe counterpart, so those raw pointers sit behind owning
//! wrappers here that free them on drop.

use ffmpeg_next as ffmpeg;
use ffmpeg_next::ffi;
use ffmpeg_next::format::Pixel;
use std::ffi::{c_int, c_void, CStr};
use std::io::SeekFrom;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::Once;
use tracing::{debug, trace, warn};

use crate::decoder::HwDevice;
use crate::engine::{
    CodecDescriptor, CodecEngine, FrameInfo, Rational, ReadOutcome, ReceiveOutcome, ScalerKey,
    SendOutcome, StreamInfo,
};
use crate::error::{DecoderError, Result};
use crate::frame::{FrameLayout, PixelFormat};
use crate::registry::IoBinding;

/// `AVSEEK_SIZE`: report the stream size instead of seeking
const AVSEEK_SIZE: c_int = 0x10000;
/// `AVSEEK_FORCE`: hint bit ORed into `whence`
const AVSEEK_FORCE: c_int = 0x20000;
/// `AV_CODEC_HW_CONFIG_METHOD_HW_DEVICE_CTX`
const HW_CONFIG_METHOD_HW_DEVICE_CTX: c_int = 0x01;

/// Turn a negative FFmpeg return code into an error
fn check(code: c_int) -> Result<c_int> {
    if code < 0 {
        Err(DecoderError::engine(code, ffmpeg::Error::from(code).to_string()))
    } else {
        Ok(code)
    }
}

fn engine_error(e: ffmpeg::Error) -> DecoderError {
    DecoderError::engine(i32::from(e), e.to_string())
}

pub(crate) fn device_type(device: HwDevice) -> ffi::AVHWDeviceType {
    use ffi::AVHWDeviceType::*;
    match device {
        HwDevice::Vdpau => AV_HWDEVICE_TYPE_VDPAU,
        HwDevice::Cuda => AV_HWDEVICE_TYPE_CUDA,
        HwDevice::Vaapi => AV_HWDEVICE_TYPE_VAAPI,
        HwDevice::Dxva2 => AV_HWDEVICE_TYPE_DXVA2,
        HwDevice::Qsv => AV_HWDEVICE_TYPE_QSV,
        HwDevice::VideoToolbox => AV_HWDEVICE_TYPE_VIDEOTOOLBOX,
        HwDevice::D3d11va => AV_HWDEVICE_TYPE_D3D11VA,
        HwDevice::Drm => AV_HWDEVICE_TYPE_DRM,
        HwDevice::OpenCl => AV_HWDEVICE_TYPE_OPENCL,
        HwDevice::MediaCodec => AV_HWDEVICE_TYPE_MEDIACODEC,
        HwDevice::Vulkan => AV_HWDEVICE_TYPE_VULKAN,
    }
}

pub(crate) fn device_from_type(kind: ffi::AVHWDeviceType) -> Option<HwDevice> {
    HwDevice::ALL.into_iter().find(|d| device_type(*d) == kind)
}

// ---------------------------------------------------------------------------
// Owning wrappers
// ---------------------------------------------------------------------------

/// Registered codec; FFmpeg codecs are static and never freed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecRef(*const ffi::AVCodec);

// SAFETY: AVCodec descriptors are immutable static data inside libavcodec.
unsafe impl Send for CodecRef {}

impl CodecRef {
    fn name(self) -> String {
        // SAFETY: registered codecs always carry a static NUL-terminated name
        unsafe { CStr::from_ptr((*self.0).name).to_string_lossy().into_owned() }
    }
}

/// Custom AVIO context reading through the source registry
struct IoContext {
    ptr: *mut ffi::AVIOContext,
    /// Callback opaque; must outlive `ptr`
    binding: Box<IoBinding>,
}

impl IoContext {
    fn new(binding: IoBinding) -> Result<Self> {
        let size = binding.buffer_size;
        // SAFETY: av_malloc returns null or a block of `size` bytes
        let buffer = unsafe { ffi::av_malloc(size) as *mut u8 };
        if buffer.is_null() {
            return Err(DecoderError::ResourceAllocation("an AVIO buffer"));
        }

        let mut binding = Box::new(binding);
        let opaque = binding.as_mut() as *mut IoBinding as *mut c_void;
        let seek = if binding.seekable {
            Some(seek_callback as unsafe extern "C" fn(*mut c_void, i64, c_int) -> i64)
        } else {
            None
        };

        // SAFETY: buffer ownership moves to the AVIO context; opaque stays
        // valid because the box lives as long as the context
        let ptr = unsafe {
            ffi::avio_alloc_context(
                buffer,
                size as c_int,
                0,
                opaque,
                Some(read_callback),
                None,
                seek,
            )
        };
        if ptr.is_null() {
            // SAFETY: the context did not take the buffer
            unsafe { ffi::av_free(buffer as *mut c_void) };
            return Err(DecoderError::ResourceAllocation("an AVIO context"));
        }
        // SAFETY: ptr was just allocated
        unsafe {
            (*ptr).seekable = if binding.seekable { 1 } else { 0 };
        }
        Ok(Self { ptr, binding })
    }
}

impl Drop for IoContext {
    fn drop(&mut self) {
        if self.ptr.is_null() {
            return;
        }
        // SAFETY: the AVIO buffer may have been reallocated by FFmpeg; free
        // whatever it currently points at, then the context itself
        unsafe {
            ffi::av_freep(&mut (*self.ptr).buffer as *mut *mut u8 as *mut c_void);
            ffi::avio_context_free(&mut self.ptr);
        }
        trace!(token = ?self.binding.token, "Freed AVIO context");
    }
}

/// Opened input container and the AVIO context it reads from
pub struct Demuxer {
    format: *mut ffi::AVFormatContext,
    io: IoContext,
}

// SAFETY: a Demuxer exclusively owns its FFmpeg contexts; it is only used
// from the thread currently driving the owning session.
unsafe impl Send for Demuxer {}

impl Demuxer {
    fn stream(&self, index: usize) -> Option<*mut ffi::AVStream> {
        // SAFETY: format is an opened input context
        unsafe {
            if index >= (*self.format).nb_streams as usize {
                return None;
            }
            Some(*(*self.format).streams.add(index))
        }
    }
}

impl Drop for Demuxer {
    fn drop(&mut self) {
        // The container is closed first; it may still reference the AVIO
        // context, which is freed afterwards by `io`'s drop
        if !self.format.is_null() {
            // SAFETY: format was opened by avformat_open_input
            unsafe { ffi::avformat_close_input(&mut self.format) };
        }
        debug!(token = ?self.io.binding.token, "Closed demuxer");
    }
}

/// Reference to a hardware device context
pub struct HwDeviceRef {
    ptr: *mut ffi::AVBufferRef,
    device: HwDevice,
}

// SAFETY: HwDeviceRef is an RAII wrapper with exclusive ownership of its
// AVBufferRef; it moves between threads only together with its session.
unsafe impl Send for HwDeviceRef {}

impl Drop for HwDeviceRef {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            // SAFETY: ptr is a valid buffer reference we own
            unsafe { ffi::av_buffer_unref(&mut self.ptr) };
            trace!(device = %self.device, "Released hardware device reference");
        }
    }
}

pub struct Scaler {
    ptr: *mut ffi::SwsContext,
    key: ScalerKey<Pixel>,
}

// SAFETY: exclusively owned; driven by one thread at a time.
unsafe impl Send for Scaler {}

impl Drop for Scaler {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            // SAFETY: created by sws_getContext
            unsafe { ffi::sws_freeContext(self.ptr) };
        }
    }
}

// ---------------------------------------------------------------------------
// AVIO callbacks
// ---------------------------------------------------------------------------

fn io_error_code(err: &std::io::Error) -> c_int {
    match err.raw_os_error() {
        Some(errno) if errno > 0 => -errno,
        _ => -ffmpeg::error::EIO,
    }
}

unsafe extern "C" fn read_callback(opaque: *mut c_void, buf: *mut u8, buf_size: c_int) -> c_int {
    if opaque.is_null() || buf.is_null() || buf_size <= 0 {
        return ffi::AVERROR_EOF;
    }
    let binding = &*(opaque as *const IoBinding);
    let out = std::slice::from_raw_parts_mut(buf, buf_size as usize);

    match panic::catch_unwind(AssertUnwindSafe(|| binding.read(out))) {
        Ok(Ok(0)) => ffi::AVERROR_EOF,
        Ok(Ok(n)) => n as c_int,
        Ok(Err(e)) => {
            warn!(token = ?binding.token, "Source read failed: {}", e);
            io_error_code(&e)
        }
        Err(_) => {
            warn!(token = ?binding.token, "Source read panicked");
            -ffmpeg::error::EIO
        }
    }
}

unsafe extern "C" fn seek_callback(opaque: *mut c_void, offset: i64, whence: c_int) -> i64 {
    if opaque.is_null() {
        return -(ffmpeg::error::EINVAL as i64);
    }
    let binding = &*(opaque as *const IoBinding);

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        if whence & AVSEEK_SIZE != 0 {
            return binding.len().map(|len| len as i64).unwrap_or(-1);
        }
        let pos = match whence & !AVSEEK_FORCE {
            0 => SeekFrom::Start(offset.max(0) as u64),
            1 => SeekFrom::Current(offset),
            2 => SeekFrom::End(offset),
            _ => return -(ffmpeg::error::EINVAL as i64),
        };
        match binding.seek(pos) {
            Ok(at) => at as i64,
            Err(e) => {
                debug!(token = ?binding.token, "Source seek failed: {}", e);
                io_error_code(&e) as i64
            }
        }
    }));
    result.unwrap_or(-(ffmpeg::error::EIO as i64))
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Codec engine backed by the linked FFmpeg libraries
#[derive(Debug, Clone, Copy)]
pub struct FfmpegEngine {
    _private: (),
}

impl FfmpegEngine {
    /// Initialise FFmpeg once per process
    pub fn new() -> Result<Self> {
        static INIT: Once = Once::new();
        let mut failed = None;
        INIT.call_once(|| {
            if let Err(e) = ffmpeg::init() {
                failed = Some(e);
            }
        });
        if let Some(e) = failed {
            return Err(DecoderError::engine(i32::from(e), e.to_string()));
        }
        Ok(Self { _private: () })
    }

    fn rational(r: ffi::AVRational) -> Rational {
        Rational::new(r.num, r.den)
    }

    fn known(value: i64) -> Option<i64> {
        (value != ffi::AV_NOPTS_VALUE).then_some(value)
    }
}

impl CodecEngine for FfmpegEngine {
    type CodecId = ffi::AVCodecID;
    type Codec = CodecRef;
    type Pixel = Pixel;
    type Demuxer = Demuxer;
    type HwContext = HwDeviceRef;
    type Decoder = ffmpeg::decoder::Video;
    type Packet = ffmpeg::Packet;
    type Frame = ffmpeg::frame::Video;
    type Scaler = Scaler;

    fn open_demuxer(&self, io: IoBinding) -> Result<Demuxer> {
        let io = IoContext::new(io)?;

        // SAFETY: a fresh format context gets our AVIO context; on failure
        // avformat_open_input frees the format context and nulls it
        unsafe {
            let mut format = ffi::avformat_alloc_context();
            if format.is_null() {
                return Err(DecoderError::ResourceAllocation("an AVFormatContext"));
            }
            (*format).pb = io.ptr;
            (*format).flags |= ffi::AVFMT_FLAG_CUSTOM_IO as c_int;

            check(ffi::avformat_open_input(
                &mut format,
                ptr::null(),
                ptr::null(),
                ptr::null_mut(),
            ))?;
            let demuxer = Demuxer { format, io };

            check(ffi::avformat_find_stream_info(demuxer.format, ptr::null_mut()))?;
            debug!(
                streams = (*demuxer.format).nb_streams,
                "Opened container {}",
                CStr::from_ptr((*(*demuxer.format).iformat).name).to_string_lossy()
            );
            Ok(demuxer)
        }
    }

    fn find_best_video_stream(
        &self,
        demuxer: &Demuxer,
    ) -> Result<Option<StreamInfo<ffi::AVCodecID>>> {
        // SAFETY: format is an opened input context
        let index = unsafe {
            ffi::av_find_best_stream(
                demuxer.format,
                ffi::AVMediaType::AVMEDIA_TYPE_VIDEO,
                -1,
                -1,
                ptr::null_mut(),
                0,
            )
        };
        if index == ffi::AVERROR_STREAM_NOT_FOUND {
            return Ok(None);
        }
        let index = check(index)? as usize;
        let Some(stream) = demuxer.stream(index) else {
            return Ok(None);
        };

        // SAFETY: stream and its codec parameters belong to the open context
        unsafe {
            let par = (*stream).codecpar;
            let container = (*demuxer.format).duration;
            Ok(Some(StreamInfo {
                index,
                codec_id: (*par).codec_id,
                time_base: Self::rational((*stream).time_base),
                avg_frame_rate: Self::rational((*stream).avg_frame_rate),
                start_time: Self::known((*stream).start_time),
                duration: Self::known((*stream).duration).filter(|d| *d > 0),
                container_duration_us: Self::known(container).filter(|d| *d > 0),
                width: (*par).width.max(0) as u32,
                height: (*par).height.max(0) as u32,
            }))
        }
    }

    fn registered_codecs(&self) -> Vec<CodecDescriptor<ffi::AVCodecID, CodecRef>> {
        let mut codecs = Vec::new();
        let mut iter: *mut c_void = ptr::null_mut();
        loop {
            // SAFETY: av_codec_iterate walks static codec tables
            let codec = unsafe { ffi::av_codec_iterate(&mut iter) };
            if codec.is_null() {
                break;
            }
            let codec = CodecRef(codec);
            // SAFETY: codec is non-null and static
            let (id, is_decoder) =
                unsafe { ((*codec.0).id, ffi::av_codec_is_decoder(codec.0) != 0) };
            codecs.push(CodecDescriptor {
                id,
                codec,
                is_decoder,
                name: codec.name(),
            });
        }
        codecs
    }

    fn find_decoder(&self, id: ffi::AVCodecID) -> Option<CodecRef> {
        // SAFETY: lookup in static codec tables
        let codec = unsafe { ffi::avcodec_find_decoder(id) };
        (!codec.is_null()).then_some(CodecRef(codec))
    }

    fn hw_configs(&self, codec: CodecRef) -> Vec<HwDevice> {
        let mut devices = Vec::new();
        for index in 0.. {
            // SAFETY: returns null past the last config
            let config = unsafe { ffi::avcodec_get_hw_config(codec.0, index) };
            if config.is_null() {
                break;
            }
            // SAFETY: config is non-null and static
            let (methods, kind) = unsafe { ((*config).methods, (*config).device_type) };
            if methods & HW_CONFIG_METHOD_HW_DEVICE_CTX == 0 {
                continue;
            }
            if let Some(device) = device_from_type(kind) {
                if !devices.contains(&device) {
                    devices.push(device);
                }
            }
        }
        devices
    }

    fn create_hw_device(&self, device: HwDevice) -> Result<HwDeviceRef> {
        let mut ptr: *mut ffi::AVBufferRef = ptr::null_mut();
        // SAFETY: default device, no options
        let ret = unsafe {
            ffi::av_hwdevice_ctx_create(
                &mut ptr,
                device_type(device),
                ptr::null(),
                ptr::null_mut(),
                0,
            )
        };
        check(ret)?;
        if ptr.is_null() {
            return Err(DecoderError::ResourceAllocation("a hardware device context"));
        }
        debug!(%device, "Created hardware device context");
        Ok(HwDeviceRef { ptr, device })
    }

    fn open_decoder(
        &self,
        demuxer: &Demuxer,
        stream_index: usize,
        codec: CodecRef,
        hw: Option<&HwDeviceRef>,
    ) -> Result<ffmpeg::decoder::Video> {
        let stream = demuxer
            .stream(stream_index)
            .ok_or(DecoderError::NoVideoStream)?;
        // SAFETY: registered codecs are static
        let codec = unsafe { ffmpeg::Codec::wrap(codec.0 as _) };
        let mut context = ffmpeg::codec::context::Context::new_with_codec(codec);

        // SAFETY: stream belongs to the open container; the context takes
        // ownership of the extra device reference and frees it with itself
        unsafe {
            let ctx = context.as_mut_ptr();
            check(ffi::avcodec_parameters_to_context(ctx, (*stream).codecpar))?;
            (*ctx).pkt_timebase = (*stream).time_base;

            if let Some(hw) = hw {
                let device_ref = ffi::av_buffer_ref(hw.ptr);
                if device_ref.is_null() {
                    return Err(DecoderError::ResourceAllocation("a hardware device reference"));
                }
                (*ctx).hw_device_ctx = device_ref;
            }
        }

        context
            .decoder()
            .open_as(codec)
            .and_then(|opened| opened.video())
            .map_err(engine_error)
    }

    fn decoder_name(&self, decoder: &ffmpeg::decoder::Video) -> String {
        decoder
            .codec()
            .map(|codec| codec.name().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    fn alloc_packet(&self) -> Result<ffmpeg::Packet> {
        Ok(ffmpeg::Packet::empty())
    }

    fn alloc_frame(&self) -> Result<ffmpeg::frame::Video> {
        Ok(ffmpeg::frame::Video::empty())
    }

    fn read_packet(
        &self,
        demuxer: &mut Demuxer,
        packet: &mut ffmpeg::Packet,
    ) -> Result<ReadOutcome> {
        // SAFETY: both contexts are valid and owned by the caller
        let ret = unsafe { ffi::av_read_frame(demuxer.format, packet.as_mut_ptr()) };
        if ret == ffi::AVERROR_EOF {
            return Ok(ReadOutcome::EndOfStream);
        }
        check(ret)?;
        Ok(ReadOutcome::Packet {
            stream_index: packet.stream(),
        })
    }

    fn release_packet(&self, packet: &mut ffmpeg::Packet) {
        // SAFETY: unref on an empty packet is a no-op
        unsafe { ffi::av_packet_unref(packet.as_mut_ptr()) };
    }

    fn send_packet(
        &self,
        decoder: &mut ffmpeg::decoder::Video,
        packet: Option<&ffmpeg::Packet>,
    ) -> Result<SendOutcome> {
        let sent = match packet {
            Some(packet) => decoder.send_packet(packet),
            None => decoder.send_eof(),
        };
        match sent {
            Ok(()) => Ok(SendOutcome::Accepted),
            Err(ffmpeg::Error::Other {
                errno: ffmpeg::error::EAGAIN,
            }) => Ok(SendOutcome::TryAgain),
            // Draining twice reports EOF; nothing more to submit
            Err(ffmpeg::Error::Eof) if packet.is_none() => Ok(SendOutcome::Accepted),
            Err(e) => Err(engine_error(e)),
        }
    }

    fn receive_frame(
        &self,
        decoder: &mut ffmpeg::decoder::Video,
        frame: &mut ffmpeg::frame::Video,
    ) -> Result<ReceiveOutcome> {
        match decoder.receive_frame(frame) {
            Ok(()) => Ok(ReceiveOutcome::Frame),
            Err(ffmpeg::Error::Other {
                errno: ffmpeg::error::EAGAIN,
            }) => Ok(ReceiveOutcome::TryAgain),
            Err(ffmpeg::Error::Eof) => Ok(ReceiveOutcome::EndOfStream),
            Err(e) => Err(engine_error(e)),
        }
    }

    fn release_frame(&self, frame: &mut ffmpeg::frame::Video) {
        // SAFETY: unref on an empty frame is a no-op
        unsafe { ffi::av_frame_unref(frame.as_mut_ptr()) };
    }

    fn frame_info(&self, frame: &ffmpeg::frame::Video) -> FrameInfo<Pixel> {
        // SAFETY: reading a plain field of an owned frame
        let hardware = unsafe { !(*frame.as_ptr()).hw_frames_ctx.is_null() };
        FrameInfo {
            width: frame.width(),
            height: frame.height(),
            format: frame.format(),
            pts: frame.pts().or_else(|| frame.timestamp()),
            hardware,
        }
    }

    fn output_pixel(&self, format: PixelFormat) -> Pixel {
        match format {
            PixelFormat::Rgb => Pixel::RGB24,
            PixelFormat::Rgba => Pixel::RGBA,
        }
    }

    fn hw_transfer_formats(&self, frame: &ffmpeg::frame::Video) -> Result<Vec<Pixel>> {
        let mut formats: *mut ffi::AVPixelFormat = ptr::null_mut();
        // SAFETY: the list is allocated by FFmpeg, terminated by NONE and
        // released with av_free
        unsafe {
            let frames_ctx = (*frame.as_ptr()).hw_frames_ctx;
            if frames_ctx.is_null() {
                return Err(DecoderError::engine(
                    -ffmpeg::error::EINVAL,
                    "frame has no hardware frames context",
                ));
            }
            check(ffi::av_hwframe_transfer_get_formats(
                frames_ctx,
                ffi::AVHWFrameTransferDirection::AV_HWFRAME_TRANSFER_DIRECTION_FROM,
                &mut formats,
                0,
            ))?;

            let mut list = Vec::new();
            if !formats.is_null() {
                let mut cursor = formats;
                while *cursor != ffi::AVPixelFormat::AV_PIX_FMT_NONE {
                    list.push(Pixel::from(*cursor));
                    cursor = cursor.add(1);
                }
                ffi::av_free(formats as *mut c_void);
            }
            Ok(list)
        }
    }

    fn transfer_hw_frame(
        &self,
        src: &ffmpeg::frame::Video,
        dst: &mut ffmpeg::frame::Video,
        format: Pixel,
    ) -> Result<()> {
        // SAFETY: dst is an empty owned frame; FFmpeg allocates its buffers
        unsafe {
            (*dst.as_mut_ptr()).format = ffi::AVPixelFormat::from(format) as c_int;
            check(ffi::av_hwframe_transfer_data(dst.as_mut_ptr(), src.as_ptr(), 0))?;
            check(ffi::av_frame_copy_props(dst.as_mut_ptr(), src.as_ptr()))?;
        }
        Ok(())
    }

    fn create_scaler(&self, key: ScalerKey<Pixel>) -> Result<Scaler> {
        // SAFETY: plain context creation, null on unsupported parameters
        let ptr = unsafe {
            ffi::sws_getContext(
                key.width as c_int,
                key.height as c_int,
                key.src.into(),
                key.width as c_int,
                key.height as c_int,
                key.dst.into(),
                ffi::SWS_BILINEAR as c_int,
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null(),
            )
        };
        if ptr.is_null() {
            return Err(DecoderError::ResourceAllocation("a scaling context"));
        }
        trace!(?key, "Created scaling context");
        Ok(Scaler { ptr, key })
    }

    fn rescale(
        &self,
        scaler: &mut Scaler,
        frame: &ffmpeg::frame::Video,
        dst: &mut [u8],
        stride: usize,
    ) -> Result<()> {
        let height = scaler.key.height as usize;
        if dst.len() < height * stride {
            return Err(DecoderError::engine(
                -ffmpeg::error::EINVAL,
                "destination buffer too small",
            ));
        }
        let planes: [*mut u8; 4] = [
            dst.as_mut_ptr(),
            ptr::null_mut(),
            ptr::null_mut(),
            ptr::null_mut(),
        ];
        let strides: [c_int; 4] = [stride as c_int, 0, 0, 0];

        // SAFETY: the scaler was built for this frame's geometry and the
        // destination holds `height` rows of `stride` bytes
        let ret = unsafe {
            let f = &*frame.as_ptr();
            ffi::sws_scale(
                scaler.ptr,
                f.data.as_ptr() as *const *const u8,
                f.linesize.as_ptr(),
                0,
                f.height,
                planes.as_ptr(),
                strides.as_ptr(),
            )
        };
        check(ret)?;
        Ok(())
    }

    fn copy_pixels(
        &self,
        frame: &ffmpeg::frame::Video,
        dst: &mut [u8],
        layout: FrameLayout,
    ) -> Result<()> {
        let row_bytes = layout.row_bytes();
        let stride = layout.stride();
        if dst.len() < layout.len() {
            return Err(DecoderError::engine(
                -ffmpeg::error::EINVAL,
                "destination buffer too small",
            ));
        }
        if frame.planes() == 0 || frame.stride(0) < row_bytes {
            return Err(DecoderError::engine(
                -ffmpeg::error::EINVAL,
                "host frame has no packed plane",
            ));
        }

        let src = frame.data(0);
        let src_stride = frame.stride(0);
        for y in 0..layout.height as usize {
            let row = src
                .get(y * src_stride..y * src_stride + row_bytes)
                .ok_or_else(|| {
                    DecoderError::engine(-ffmpeg::error::EINVAL, "host frame is too short")
                })?;
            dst[y * stride..y * stride + row_bytes].copy_from_slice(row);
        }
        Ok(())
    }

    fn seek(&self, demuxer: &mut Demuxer, stream_index: usize, timestamp: i64) -> Result<()> {
        // SAFETY: format is an opened input context
        let ret = unsafe {
            ffi::av_seek_frame(
                demuxer.format,
                stream_index as c_int,
                timestamp,
                ffi::AVSEEK_FLAG_BACKWARD as c_int,
            )
        };
        check(ret)?;
        Ok(())
    }

    fn flush_decoder(&self, decoder: &mut ffmpeg::decoder::Video) {
        decoder.flush();
    }

    fn error_to_string(&self, code: i32) -> String {
        ffmpeg::Error::from(code).to_string()
    }
}
