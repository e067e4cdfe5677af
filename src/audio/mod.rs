//! Audio Module - PCM-Verarbeitung zwischen Gemini und WebRTC
//!
//! - Resampling mit gefensterter Sinc-Interpolation
//! - Framing in feste Blockgrößen mit Restpuffer
//! - Opus Encoding/Decoding für die WebRTC Tracks
//! - Pacer für 10ms getaktete Wiedergabe mit Barge-In

mod framing;
mod opus;
mod pacer;
mod pipeline;
mod resample;

pub use framing::{frame, pcm_from_le_bytes, pcm_to_le_bytes, PcmFramer};
pub use opus::{OpusDecoder, OpusEncoder};
pub use pacer::{AudioPacer, FrameSink, PacerEvent};
pub use pipeline::{AudioFrame, DownstreamPipeline, UpstreamPipeline};
pub use resample::resample;

use thiserror::Error;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Sample-Rate der Gemini Audio-Ausgabe
pub const GEMINI_OUTPUT_RATE: u32 = 24_000;
/// Sample-Rate, die Gemini als Eingabe erwartet
pub const GEMINI_INPUT_RATE: u32 = 16_000;
/// Sample-Rate der WebRTC Opus Tracks
pub const WEBRTC_RATE: u32 = 48_000;
/// 10ms bei 48kHz
pub const WEBRTC_FRAME_SAMPLES: usize = 480;
/// 100ms bei 16kHz (3200 Bytes)
pub const UPSTREAM_CHUNK_SAMPLES: usize = 1600;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AudioError {
    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(u32),

    #[error("Opus error: {0}")]
    Opus(String),

    #[error("Audio sink closed: {0}")]
    SinkClosed(String),
}
