//! videcoder CLI
//!
//! Probes a video, negotiates a decoder and pulls frames through a
//! decode session. Useful for checking which hardware backend a machine
//! ends up with and how fast it decodes.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use videcoder::decoder::detect_hw_devices;
use videcoder::{DecodeSession, DecoderConfig, Frame, HwDecoder, PixelFormat};

/// Decode frames from a video file or URL
#[derive(Parser, Debug)]
#[command(name = "videcoder")]
#[command(about = "Decode video frames with FFmpeg, hardware first and software as fallback")]
#[command(version)]
struct Args {
    /// Input file path or http(s) URL
    input: String,

    /// Hardware families to try, comma-separated
    /// (none, auto, all, linux, windows, nvidia, vaapi, ...)
    #[arg(long, default_value = "none")]
    hw: HwDecoder,

    /// Output pixel format (rgb, rgba)
    #[arg(long, default_value = "rgb")]
    format: PixelFormat,

    /// Row alignment in bytes, 0 to disable padding
    #[arg(long, default_value = "4")]
    padding: usize,

    /// Number of frames to decode (0 = until end of stream)
    #[arg(long, default_value = "10")]
    frames: usize,

    /// Seek to this position before decoding
    #[arg(long)]
    seek_ms: Option<u64>,

    /// Write each decoded frame as a JPEG into this directory
    #[arg(long)]
    dump: Option<PathBuf>,

    /// Print the stream summary as JSON
    #[arg(long)]
    json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over --log-level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let detected = detect_hw_devices();
    if !args.json {
        println!();
        println!("========================================================");
        println!("  videcoder v{}", env!("CARGO_PKG_VERSION"));
        println!("========================================================");
        println!("  Input:     {}", args.input);
        println!("  HW tried:  {}", args.hw);
        println!(
            "  HW found:  {}",
            if detected.is_empty() {
                "none detected".to_string()
            } else {
                detected.iter().map(|d| d.name()).collect::<Vec<_>>().join(", ")
            }
        );
        println!("  Output:    {} (padding {})", args.format, args.padding);
        println!("========================================================");
        println!();
    }

    let config = DecoderConfig::default()
        .with_hw(args.hw)
        .with_pixel_format(args.format)
        .with_padding(args.padding);

    let mut session = open(&args.input, config)
        .with_context(|| format!("Failed to open {}", args.input))?;

    let summary = session.summary();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        info!(
            codec = %summary.codec,
            width = summary.width,
            height = summary.height,
            fps = summary.fps,
            duration_ms = summary.duration_ms,
            hw = ?summary.hw_device,
            seekable = summary.seekable,
            "Opened stream"
        );
    }

    if let Some(ms) = args.seek_ms {
        session
            .seek(Duration::from_millis(ms))
            .with_context(|| format!("Seek to {} ms failed", ms))?;
    }

    if let Some(dir) = &args.dump {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    let started = Instant::now();
    let mut decoded = 0usize;
    let mut bytes = 0usize;
    while args.frames == 0 || decoded < args.frames {
        let frame = match session.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                info!(frames = decoded, "End of stream");
                break;
            }
            Err(e) => {
                error!("Decode failed after {} frames: {}", decoded, e);
                return Err(e.into());
            }
        };

        if !args.json {
            println!(
                "frame {:>5}  ts {:>8.3}s  {}x{}  stride {}  {} bytes",
                decoded,
                frame.timestamp().as_secs_f64(),
                frame.width(),
                frame.height(),
                frame.stride(),
                frame.data().len()
            );
        }

        if let Some(dir) = &args.dump {
            let path = dir.join(format!("frame_{:05}.jpg", decoded));
            if let Err(e) = write_jpeg(&frame, &path) {
                warn!("Could not write {}: {:#}", path.display(), e);
            }
        }

        bytes += frame.data().len();
        decoded += 1;
    }

    let elapsed = started.elapsed().as_secs_f64();
    if decoded > 0 && elapsed > 0.0 {
        info!(
            frames = decoded,
            secs = elapsed,
            fps = decoded as f64 / elapsed,
            mib = bytes as f64 / (1024.0 * 1024.0),
            "Throughput"
        );
    }

    session.dispose();
    Ok(())
}

fn open(input: &str, config: DecoderConfig) -> videcoder::Result<DecodeSession> {
    if input.starts_with("http://") || input.starts_with("https://") {
        DecodeSession::open_url(input, config)
    } else {
        DecodeSession::open_file(input, config)
    }
}

fn write_jpeg(frame: &Frame, path: &Path) -> anyhow::Result<()> {
    let packed = frame.to_packed();
    let rgb = match frame.format() {
        PixelFormat::Rgb => image::RgbImage::from_raw(frame.width(), frame.height(), packed),
        // JPEG has no alpha channel
        PixelFormat::Rgba => image::RgbaImage::from_raw(frame.width(), frame.height(), packed)
            .map(|img| image::DynamicImage::ImageRgba8(img).into_rgb8()),
    }
    .context("Frame buffer does not match its dimensions")?;

    rgb.save_with_format(path, image::ImageFormat::Jpeg)?;
    Ok(())
}
