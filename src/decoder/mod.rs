//! Decode sessions and the pieces they are configured with

pub(crate) mod config;
pub(crate) mod hwaccel;
pub(crate) mod pool;
pub(crate) mod session;

pub use config::{DecoderConfig, DEFAULT_PADDING};
pub use hwaccel::{decode_candidates, detect_hw_devices, DecodeCandidate, HwDecoder, HwDevice};
pub use pool::{
    AllocatingPool, FillFn, FramePool, RotatingPool, SharedFramePool, DEFAULT_POOL_SLOTS,
};
pub use session::{DecodeSession, SessionState, StreamSummary};
