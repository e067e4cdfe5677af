//! Audio-Pfade in beide Richtungen
//!
//! Downstream: Gemini PCM 24kHz → 48kHz → 10ms Frames für den Pacer.
//! Upstream: WebRTC PCM 48kHz → 16kHz → 100ms Chunks für Gemini.

use super::framing::{pcm_to_le_bytes, PcmFramer};
use super::resample::resample;
use super::{
    AudioError, GEMINI_INPUT_RATE, GEMINI_OUTPUT_RATE, UPSTREAM_CHUNK_SAMPLES, WEBRTC_FRAME_SAMPLES,
    WEBRTC_RATE,
};
use std::time::Duration;

/// Ein Block Mono PCM mit fester Dauer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub duration: Duration,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        let micros = if sample_rate == 0 {
            0
        } else {
            samples.len() as u64 * 1_000_000 / sample_rate as u64
        };
        Self {
            samples,
            sample_rate,
            duration: Duration::from_micros(micros),
        }
    }
}

// ============================================================================
// DOWNSTREAM (Gemini → WebRTC)
// ============================================================================

/// Bereitet Gemini Audio für den ausgehenden WebRTC Track auf
#[derive(Debug, Clone)]
pub struct DownstreamPipeline {
    framer: PcmFramer,
}

impl DownstreamPipeline {
    pub fn new() -> Self {
        Self {
            framer: PcmFramer::new(WEBRTC_FRAME_SAMPLES),
        }
    }

    /// Nimmt einen Chunk 24kHz LE-PCM an und liefert fertige 10ms Frames
    pub fn push(&mut self, pcm_bytes: &[u8]) -> Result<Vec<AudioFrame>, AudioError> {
        let samples = self.framer.decode_bytes(pcm_bytes);
        let upsampled = resample(&samples, GEMINI_OUTPUT_RATE, WEBRTC_RATE)?;
        Ok(self
            .framer
            .push(&upsampled)
            .into_iter()
            .map(|s| AudioFrame::new(s, WEBRTC_RATE))
            .collect())
    }

    pub fn pending(&self) -> usize {
        self.framer.pending()
    }

    pub fn clear(&mut self) {
        self.framer.clear();
    }
}

impl Default for DownstreamPipeline {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// UPSTREAM (WebRTC → Gemini)
// ============================================================================

/// Bereitet dekodiertes Mikrofon-Audio für Gemini auf
#[derive(Debug, Clone)]
pub struct UpstreamPipeline {
    framer: PcmFramer,
}

impl UpstreamPipeline {
    pub fn new() -> Self {
        Self {
            framer: PcmFramer::new(UPSTREAM_CHUNK_SAMPLES),
        }
    }

    /// Nimmt 48kHz Samples an und liefert 3200-Byte Chunks (16kHz LE-PCM)
    pub fn push(&mut self, samples: &[i16]) -> Result<Vec<Vec<u8>>, AudioError> {
        let downsampled = resample(samples, WEBRTC_RATE, GEMINI_INPUT_RATE)?;
        Ok(self
            .framer
            .push(&downsampled)
            .iter()
            .map(|chunk| pcm_to_le_bytes(chunk))
            .collect())
    }

    pub fn pending(&self) -> usize {
        self.framer.pending()
    }

    pub fn clear(&mut self) {
        self.framer.clear();
    }
}

impl Default for UpstreamPipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::pcm_to_le_bytes;

    #[test]
    fn frame_duration_is_ten_ms() {
        let frame = AudioFrame::new(vec![0; 480], 48_000);
        assert_eq!(frame.duration, Duration::from_millis(10));
    }

    #[test]
    fn gemini_chunk_becomes_sixteen_frames() {
        let mut pipeline = DownstreamPipeline::new();
        let chunk = pcm_to_le_bytes(&vec![100i16; 3840]);
        let frames = pipeline.push(&chunk).unwrap();
        assert_eq!(frames.len(), 16);
        assert!(frames.iter().all(|f| f.samples.len() == 480));
        assert_eq!(pipeline.pending(), 0);
    }

    #[test]
    fn partial_chunks_accumulate() {
        let mut pipeline = DownstreamPipeline::new();
        // 100 Samples @24k -> 200 @48k, kein voller Frame
        assert!(pipeline
            .push(&pcm_to_le_bytes(&vec![0i16; 100]))
            .unwrap()
            .is_empty());
        assert_eq!(pipeline.pending(), 200);

        // weitere 140 -> 480 insgesamt
        let frames = pipeline.push(&pcm_to_le_bytes(&vec![0i16; 140])).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(pipeline.pending(), 0);
    }

    #[test]
    fn microphone_audio_becomes_3200_byte_chunks() {
        let mut pipeline = UpstreamPipeline::new();
        let chunks = pipeline.push(&vec![0i16; 4800]).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 3200);
        assert_eq!(pipeline.pending(), 0);
    }

    #[test]
    fn twenty_ms_opus_frames_fill_a_chunk_after_five() {
        let mut pipeline = UpstreamPipeline::new();
        for _ in 0..4 {
            assert!(pipeline.push(&vec![0i16; 960]).unwrap().is_empty());
        }
        assert_eq!(pipeline.push(&vec![0i16; 960]).unwrap().len(), 1);
    }
}
