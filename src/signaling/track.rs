//! Audio-Anbindung der Peer Connection
//!
//! - `OpusTrackSink`: Pacer-Frames → Opus → ausgehender Track
//! - `spawn_inbound_audio`: eingehender Track → Opus-Decode → 16kHz Chunks

use super::PeerEvent;
use crate::audio::{AudioError, AudioFrame, FrameSink, OpusDecoder, OpusEncoder, UpstreamPipeline};
use crate::emitter::Emitter;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use webrtc::media::Sample;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

/// Ausgehender Audio-Track als Ziel für den Pacer
pub struct OpusTrackSink {
    track: Arc<TrackLocalStaticSample>,
    encoder: Mutex<OpusEncoder>,
}

impl OpusTrackSink {
    pub fn new(track: Arc<TrackLocalStaticSample>) -> Result<Self, AudioError> {
        Ok(Self {
            track,
            encoder: Mutex::new(OpusEncoder::new()?),
        })
    }
}

#[async_trait]
impl FrameSink for OpusTrackSink {
    async fn deliver(&self, frame: &AudioFrame) -> Result<(), AudioError> {
        let packet = self.encoder.lock().encode(&frame.samples)?;
        let sample = Sample {
            data: Bytes::from(packet),
            duration: frame.duration,
            ..Default::default()
        };
        self.track
            .write_sample(&sample)
            .await
            .map_err(|e| AudioError::SinkClosed(e.to_string()))
    }
}

/// Liest den Mikrofon-Track des Clients und liefert 100ms Chunks für Gemini
pub fn spawn_inbound_audio(track: Arc<TrackRemote>, events: Emitter<PeerEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut decoder = match OpusDecoder::new() {
            Ok(decoder) => decoder,
            Err(e) => {
                tracing::error!(peer = events.source(), "Cannot decode inbound audio: {}", e);
                return;
            }
        };
        let mut pipeline = UpstreamPipeline::new();
        let mut chunks = 0u64;

        tracing::info!(peer = events.source(), ssrc = track.ssrc(), "Inbound audio sink started");

        loop {
            let packet = match track.read_rtp().await {
                Ok((packet, _)) => packet,
                Err(e) => {
                    tracing::debug!(peer = events.source(), "Inbound audio ended: {}", e);
                    break;
                }
            };
            if packet.payload.is_empty() {
                continue;
            }

            let samples = match decoder.decode(&packet.payload) {
                Ok(samples) => samples,
                Err(e) => {
                    tracing::trace!("Skipping undecodable packet: {}", e);
                    continue;
                }
            };

            let ready = match pipeline.push(&samples) {
                Ok(ready) => ready,
                Err(e) => {
                    tracing::warn!("Inbound audio pipeline failed: {}", e);
                    continue;
                }
            };
            for chunk in ready {
                chunks += 1;
                if !events.emit(PeerEvent::MicAudio(chunk)) {
                    return;
                }
            }
        }

        tracing::info!(peer = events.source(), chunks, "Inbound audio sink stopped");
    })
}
