//! Opus Encoder/Decoder für die WebRTC Audio Tracks (48kHz Mono)

use super::{AudioError, WEBRTC_RATE};
use audiopus::coder::{Decoder, Encoder};
use audiopus::{Application, Channels, MutSignals, SampleRate};
use std::convert::TryFrom;

/// Obergrenze für ein kodiertes Opus-Paket
const MAX_PACKET_BYTES: usize = 4000;

/// 120ms bei 48kHz, die längste mögliche Opus-Frame-Dauer
const MAX_DECODED_SAMPLES: usize = 5760;

fn sample_rate(rate: u32) -> Result<SampleRate, AudioError> {
    SampleRate::try_from(rate as i32).map_err(|_| AudioError::InvalidSampleRate(rate))
}

/// Kodiert 10ms PCM-Frames für den ausgehenden Track
pub struct OpusEncoder {
    encoder: Encoder,
}

impl OpusEncoder {
    pub fn new() -> Result<Self, AudioError> {
        let encoder = Encoder::new(sample_rate(WEBRTC_RATE)?, Channels::Mono, Application::Voip)
            .map_err(|e| AudioError::Opus(format!("Failed to create encoder: {}", e)))?;
        Ok(Self { encoder })
    }

    /// `pcm` muss eine gültige Opus-Framegröße haben (z.B. 480 Samples)
    pub fn encode(&mut self, pcm: &[i16]) -> Result<Vec<u8>, AudioError> {
        let mut output = vec![0u8; MAX_PACKET_BYTES];
        let len = self
            .encoder
            .encode(pcm, &mut output)
            .map_err(|e| AudioError::Opus(format!("Encode failed: {}", e)))?;
        output.truncate(len);
        Ok(output)
    }
}

/// Dekodiert eingehende RTP-Payloads vom Mikrofon des Clients
pub struct OpusDecoder {
    decoder: Decoder,
}

impl OpusDecoder {
    pub fn new() -> Result<Self, AudioError> {
        let decoder = Decoder::new(sample_rate(WEBRTC_RATE)?, Channels::Mono)
            .map_err(|e| AudioError::Opus(format!("Failed to create decoder: {}", e)))?;
        Ok(Self { decoder })
    }

    pub fn decode(&mut self, packet: &[u8]) -> Result<Vec<i16>, AudioError> {
        let mut output = vec![0i16; MAX_DECODED_SAMPLES];
        let packet = audiopus::packet::Packet::try_from(packet)
            .map_err(|e| AudioError::Opus(format!("Invalid packet: {}", e)))?;
        let signals = MutSignals::try_from(output.as_mut_slice())
            .map_err(|e| AudioError::Opus(format!("Invalid output buffer: {}", e)))?;
        let decoded = self
            .decoder
            .decode(Some(packet), signals, false)
            .map_err(|e| AudioError::Opus(format!("Decode failed: {}", e)))?;
        output.truncate(decoded);
        Ok(output)
    }
}

impl std::fmt::Debug for OpusEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpusEncoder").field("rate", &WEBRTC_RATE).finish()
    }
}

impl std::fmt::Debug for OpusDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpusDecoder").field("rate", &WEBRTC_RATE).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::WEBRTC_FRAME_SAMPLES;

    #[test]
    fn ten_ms_frame_roundtrips_through_opus() {
        let mut encoder = OpusEncoder::new().unwrap();
        let mut decoder = OpusDecoder::new().unwrap();

        let pcm: Vec<i16> = (0..WEBRTC_FRAME_SAMPLES)
            .map(|n| ((n as f64 * 0.05).sin() * 8000.0) as i16)
            .collect();
        let packet = encoder.encode(&pcm).unwrap();
        assert!(!packet.is_empty());

        let decoded = decoder.decode(&packet).unwrap();
        assert_eq!(decoded.len(), WEBRTC_FRAME_SAMPLES);
    }
}
