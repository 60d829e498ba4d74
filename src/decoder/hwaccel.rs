//! Hardware acceleration families and decode candidate enumeration

use serde::Serialize;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;
use tracing::{debug, trace};

use crate::engine::CodecEngine;

/// A concrete hardware device type the engine can open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HwDevice {
    Vdpau,
    Cuda,
    Vaapi,
    Dxva2,
    Qsv,
    VideoToolbox,
    D3d11va,
    Drm,
    OpenCl,
    MediaCodec,
    Vulkan,
}

impl HwDevice {
    pub const ALL: [HwDevice; 11] = [
        HwDevice::Vdpau,
        HwDevice::Cuda,
        HwDevice::Vaapi,
        HwDevice::Dxva2,
        HwDevice::Qsv,
        HwDevice::VideoToolbox,
        HwDevice::D3d11va,
        HwDevice::Drm,
        HwDevice::OpenCl,
        HwDevice::MediaCodec,
        HwDevice::Vulkan,
    ];

    /// Family bit this device belongs to
    pub const fn family(self) -> HwDecoder {
        match self {
            HwDevice::Vdpau => HwDecoder::VDPAU,
            HwDevice::Cuda => HwDecoder::NVIDIA,
            HwDevice::Vaapi => HwDecoder::VAAPI,
            HwDevice::Dxva2 => HwDecoder::DXVA2,
            HwDevice::Qsv => HwDecoder::INTEL,
            HwDevice::VideoToolbox => HwDecoder::APPLE,
            HwDevice::D3d11va => HwDecoder::D3D11VA,
            HwDevice::Drm => HwDecoder::DRM,
            HwDevice::OpenCl => HwDecoder::OPENCL,
            HwDevice::MediaCodec => HwDecoder::ANDROID,
            HwDevice::Vulkan => HwDecoder::VULKAN,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            HwDevice::Vdpau => "vdpau",
            HwDevice::Cuda => "cuda",
            HwDevice::Vaapi => "vaapi",
            HwDevice::Dxva2 => "dxva2",
            HwDevice::Qsv => "qsv",
            HwDevice::VideoToolbox => "videotoolbox",
            HwDevice::D3d11va => "d3d11va",
            HwDevice::Drm => "drm",
            HwDevice::OpenCl => "opencl",
            HwDevice::MediaCodec => "mediacodec",
            HwDevice::Vulkan => "vulkan",
        }
    }
}

impl fmt::Display for HwDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HwDevice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        HwDevice::ALL
            .into_iter()
            .find(|d| d.name() == lower)
            .ok_or_else(|| format!("unknown hardware device: {}", s))
    }
}

/// Bitmask of hardware device families a caller is willing to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HwDecoder(u32);

impl HwDecoder {
    pub const NONE: HwDecoder = HwDecoder(0);
    pub const VDPAU: HwDecoder = HwDecoder(1 << 0);
    pub const NVIDIA: HwDecoder = HwDecoder(1 << 1);
    pub const VAAPI: HwDecoder = HwDecoder(1 << 2);
    pub const DXVA2: HwDecoder = HwDecoder(1 << 3);
    pub const INTEL: HwDecoder = HwDecoder(1 << 4);
    pub const APPLE: HwDecoder = HwDecoder(1 << 5);
    pub const D3D11VA: HwDecoder = HwDecoder(1 << 6);
    pub const DRM: HwDecoder = HwDecoder(1 << 7);
    pub const OPENCL: HwDecoder = HwDecoder(1 << 8);
    pub const ANDROID: HwDecoder = HwDecoder(1 << 9);
    pub const VULKAN: HwDecoder = HwDecoder(1 << 10);

    pub const LINUX: HwDecoder = HwDecoder(Self::VDPAU.0 | Self::VAAPI.0 | Self::DRM.0);
    pub const WINDOWS: HwDecoder = HwDecoder(Self::D3D11VA.0 | Self::DXVA2.0);
    pub const ALL: HwDecoder = HwDecoder((1 << 11) - 1);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: HwDecoder) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    /// Whether the mask lets `device` be tried
    pub const fn allows(self, device: HwDevice) -> bool {
        self.contains(device.family())
    }

    /// Devices selected by this mask, in enumeration order
    pub fn devices(self) -> impl Iterator<Item = HwDevice> {
        HwDevice::ALL.into_iter().filter(move |d| self.allows(*d))
    }

    /// Families that usually exist on the build target
    pub fn platform_default() -> Self {
        if cfg!(target_os = "windows") {
            HwDecoder::WINDOWS | HwDecoder::NVIDIA | HwDecoder::INTEL
        } else if cfg!(target_os = "macos") || cfg!(target_os = "ios") {
            HwDecoder::APPLE
        } else if cfg!(target_os = "android") {
            HwDecoder::ANDROID
        } else if cfg!(target_os = "linux") {
            HwDecoder::LINUX | HwDecoder::NVIDIA
        } else {
            HwDecoder::NONE
        }
    }
}

impl BitOr for HwDecoder {
    type Output = HwDecoder;

    fn bitor(self, rhs: Self) -> Self::Output {
        HwDecoder(self.0 | rhs.0)
    }
}

impl BitOrAssign for HwDecoder {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for HwDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let names: Vec<&str> = self.devices().map(HwDevice::name).collect();
        f.write_str(&names.join(","))
    }
}

/// Parses a comma separated list of family or device names,
/// e.g. `linux,nvidia` or `vaapi,cuda`.
impl FromStr for HwDecoder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut mask = HwDecoder::NONE;
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            mask |= match part.to_ascii_lowercase().as_str() {
                "none" => HwDecoder::NONE,
                "all" => HwDecoder::ALL,
                "auto" => HwDecoder::platform_default(),
                "android" => HwDecoder::ANDROID,
                "apple" => HwDecoder::APPLE,
                "intel" => HwDecoder::INTEL,
                "linux" => HwDecoder::LINUX,
                "windows" => HwDecoder::WINDOWS,
                "nvidia" | "nvdec" => HwDecoder::NVIDIA,
                other => other.parse::<HwDevice>()?.family(),
            };
        }
        Ok(mask)
    }
}

/// Hardware devices that look present on this machine.
///
/// A cheap filesystem probe for the CLI banner; negotiation does not depend
/// on it and will still try every requested device.
pub fn detect_hw_devices() -> Vec<HwDevice> {
    let mut available = Vec::new();

    #[cfg(target_os = "windows")]
    {
        // DXVA2 and D3D11VA ship with every supported Windows version
        available.push(HwDevice::D3d11va);
        available.push(HwDevice::Dxva2);

        let system32 = std::path::PathBuf::from(
            std::env::var("SystemRoot").unwrap_or_else(|_| "C:\\Windows".to_string()),
        )
        .join("System32");
        if system32.join("nvcuda.dll").exists() {
            available.push(HwDevice::Cuda);
        }
        if system32.join("libmfxhw64.dll").exists() || system32.join("libvpl.dll").exists() {
            available.push(HwDevice::Qsv);
        }
    }

    #[cfg(target_os = "linux")]
    {
        let exists = |path: &str| std::path::Path::new(path).exists();
        if exists("/dev/dri/renderD128") {
            available.push(HwDevice::Vaapi);
            available.push(HwDevice::Drm);
        }
        if exists("/dev/nvidia0") {
            available.push(HwDevice::Cuda);
            available.push(HwDevice::Vdpau);
        }
    }

    #[cfg(target_os = "macos")]
    {
        available.push(HwDevice::VideoToolbox);
    }

    available
}

/// One decoder open attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeCandidate<C> {
    Hardware { device: HwDevice, codec: C },
    /// Software decoding; `None` when no decoder is registered for the codec
    Software { codec: Option<C> },
}

impl<C> DecodeCandidate<C> {
    pub fn device(&self) -> Option<HwDevice> {
        match self {
            DecodeCandidate::Hardware { device, .. } => Some(*device),
            DecodeCandidate::Software { .. } => None,
        }
    }

    pub fn is_hardware(&self) -> bool {
        self.device().is_some()
    }
}

/// Build the ordered candidate list for `codec_id`.
///
/// Every registered decoder for the codec contributes one candidate per
/// hardware config whose device the mask allows; a device shared by two
/// decoders yields two candidates. A single software candidate always
/// comes last.
pub fn decode_candidates<E: CodecEngine>(
    engine: &E,
    codec_id: E::CodecId,
    requested: HwDecoder,
) -> Vec<DecodeCandidate<E::Codec>> {
    let mut candidates = Vec::new();

    if !requested.is_empty() {
        for descriptor in engine.registered_codecs() {
            if !descriptor.is_decoder || descriptor.id != codec_id {
                continue;
            }
            for device in engine.hw_configs(descriptor.codec) {
                if !requested.allows(device) {
                    trace!(codec = %descriptor.name, %device, "Device not requested");
                    continue;
                }
                let candidate = DecodeCandidate::Hardware {
                    device,
                    codec: descriptor.codec,
                };
                if !candidates.contains(&candidate) {
                    candidates.push(candidate);
                }
            }
        }
    }

    candidates.push(DecodeCandidate::Software {
        codec: engine.find_decoder(codec_id),
    });

    debug!(
        requested = %requested,
        hardware = candidates.len() - 1,
        "Built decode candidate list for {:?}",
        codec_id
    );
    candidates
}
