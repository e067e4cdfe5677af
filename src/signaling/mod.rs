//! Signaling Module - WebRTC Sessions zwischen Client und Gateway
//!
//! Dieses Modul verwaltet die Echtzeit-Audioverbindung pro Client:
//! - Offer/Answer und Trickle-ICE über das Envelope-Protokoll
//! - Zustandsautomat der Peer Connection
//! - Opus Tracks in beide Richtungen, Data Channel für Ping/Pong

mod peer;
mod state;
mod track;

pub use peer::{ice_servers, PeerSession};
pub use state::{transition, PeerState};
pub use track::{spawn_inbound_audio, OpusTrackSink};

use crate::audio::AudioError;
use crate::protocol::IceCandidateJson;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum SignalingError {
    #[error("WebRTC error: {0}")]
    WebRTC(#[from] webrtc::Error),

    #[error("Invalid SDP: {0}")]
    InvalidSdp(String),

    #[error("Invalid peer state transition: {from} -> {to}")]
    InvalidTransition { from: PeerState, to: PeerState },

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),
}

// ============================================================================
// PEER EVENTS
// ============================================================================

/// Events die von einer PeerSession ausgelöst werden
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// Lokaler ICE Candidate für den Client
    LocalIceCandidate(IceCandidateJson),
    StateChanged(PeerState),
    /// 100ms Mikrofon-Audio, 16kHz LE-PCM (3200 Bytes)
    MicAudio(Vec<u8>),
}
