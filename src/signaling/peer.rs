//! WebRTC Peer Session pro Client
//!
//! Der Client ist immer der Anbieter (Offer), der Gateway antwortet.
//! Ein ausgehender Opus-Track trägt die Stimme des Assistenten, eingehende
//! Audio-Tracks werden dekodiert und als Mikrofon-Chunks gemeldet.

use super::state::{transition, PeerState};
use super::track::{spawn_inbound_audio, OpusTrackSink};
use super::{PeerEvent, SignalingError};
use crate::audio::FrameSink;
use crate::emitter::Emitter;
use crate::protocol::IceCandidateJson;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS};
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Laufender Task, der eingehendes Audio liest
type InboundSlot = Arc<Mutex<Option<JoinHandle<()>>>>;

/// Baut ICE-Server aus Konfigurations-URLs
pub fn ice_servers(urls: &[String]) -> Vec<RTCIceServer> {
    if urls.is_empty() {
        return Vec::new();
    }
    vec![RTCIceServer {
        urls: urls.to_vec(),
        ..Default::default()
    }]
}

// ============================================================================
// PEER SESSION
// ============================================================================

/// Eine Peer Connection mit ihrem ausgehenden Track
pub struct PeerSession {
    id: u64,
    pc: Arc<RTCPeerConnection>,
    state: Arc<Mutex<PeerState>>,
    track: Arc<TrackLocalStaticSample>,
    inbound: InboundSlot,
    events: Emitter<PeerEvent>,
}

impl PeerSession {
    /// Erstellt die Peer Connection und registriert alle Handler
    pub async fn open(
        ice_servers: Vec<RTCIceServer>,
        events: Emitter<PeerEvent>,
    ) -> Result<Self, SignalingError> {
        // Media Engine mit Opus konfigurieren
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        // Interceptors für RTCP, NACK etc.
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };
        let pc = Arc::new(api.new_peer_connection(config).await?);

        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_string(),
                clock_rate: crate::audio::WEBRTC_RATE,
                channels: 2,
                ..Default::default()
            },
            "assistant-audio".to_string(),
            "live-gateway".to_string(),
        ));

        let session = Self {
            id: events.source(),
            pc,
            state: Arc::new(Mutex::new(PeerState::Idle)),
            track,
            inbound: Arc::new(Mutex::new(None)),
            events,
        };
        session.register_handlers();

        tracing::debug!(peer = session.id, "Peer connection created");
        Ok(session)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> PeerState {
        *self.state.lock()
    }

    /// Verarbeitet das Offer des Clients und liefert das SDP Answer
    ///
    /// Bei einem Fehler wechselt die Session nach Failed und stoppt ihre Sinks.
    pub async fn answer(&self, offer_sdp: String) -> Result<String, SignalingError> {
        self.set_state(PeerState::OfferReceived)?;

        match self.negotiate(offer_sdp).await {
            Ok(sdp) => {
                self.set_state(PeerState::AnswerSent)?;
                Ok(sdp)
            }
            Err(e) => {
                tracing::error!(peer = self.id, "WebRTC negotiation failed: {}", e);
                self.fail();
                Err(e)
            }
        }
    }

    async fn negotiate(&self, offer_sdp: String) -> Result<String, SignalingError> {
        let offer = RTCSessionDescription::offer(offer_sdp)
            .map_err(|e| SignalingError::InvalidSdp(e.to_string()))?;
        self.pc.set_remote_description(offer).await?;

        let rtp_sender = self
            .pc
            .add_track(Arc::clone(&self.track) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        // RTCP lesen, damit die Interceptors arbeiten
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while rtp_sender.read(&mut buf).await.is_ok() {}
        });

        let answer = self.pc.create_answer(None).await?;
        self.pc.set_local_description(answer.clone()).await?;

        Ok(answer.sdp)
    }

    /// Fügt einen Remote ICE Candidate hinzu; leere Candidates werden ignoriert
    pub async fn add_ice_candidate(&self, candidate: IceCandidateJson) -> Result<(), SignalingError> {
        let Some(text) = candidate.candidate.filter(|c| !c.is_empty()) else {
            tracing::debug!(peer = self.id, "Ignoring empty ICE candidate");
            return Ok(());
        };

        let init = RTCIceCandidateInit {
            candidate: text,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_m_line_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc.add_ice_candidate(init).await?;
        Ok(())
    }

    /// Ziel für den Pacer
    pub fn audio_sink(&self) -> Result<Arc<dyn FrameSink>, SignalingError> {
        let sink = OpusTrackSink::new(Arc::clone(&self.track))?;
        Ok(Arc::new(sink))
    }

    /// Stoppt den eingehenden Audio-Task und schließt die Verbindung
    pub async fn close(&self, timeout: Duration) {
        stop_inbound(&self.inbound);
        {
            let mut state = self.state.lock();
            if !state.is_terminal() {
                *state = PeerState::Closed;
            }
        }

        match tokio::time::timeout(timeout, self.pc.close()).await {
            Ok(Ok(())) => tracing::debug!(peer = self.id, "Peer connection closed"),
            Ok(Err(e)) => tracing::warn!(peer = self.id, "Error closing peer connection: {}", e),
            Err(_) => tracing::warn!(peer = self.id, "Closing peer connection timed out"),
        }
    }

    // ========================================================================
    // PRIVATE METHODS
    // ========================================================================

    fn set_state(&self, next: PeerState) -> Result<(), SignalingError> {
        transition(&mut self.state.lock(), next)?;
        self.events.emit(PeerEvent::StateChanged(next));
        Ok(())
    }

    fn fail(&self) {
        stop_inbound(&self.inbound);
        let changed = transition(&mut self.state.lock(), PeerState::Failed).is_ok();
        if changed {
            self.events.emit(PeerEvent::StateChanged(PeerState::Failed));
        }
    }

    /// Registriert Event Handler für die Peer Connection
    fn register_handlers(&self) {
        // Connection State Handler
        let state = Arc::clone(&self.state);
        let inbound = Arc::clone(&self.inbound);
        let events = self.events.clone();
        self.pc
            .on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                tracing::info!(peer = events.source(), "Peer connection state: {}", s);

                if matches!(
                    s,
                    RTCPeerConnectionState::Closed
                        | RTCPeerConnectionState::Failed
                        | RTCPeerConnectionState::Disconnected
                ) {
                    stop_inbound(&inbound);
                }

                if let Some(next) = PeerState::from_connection_state(s) {
                    let changed = transition(&mut state.lock(), next).is_ok();
                    if changed {
                        events.emit(PeerEvent::StateChanged(next));
                    }
                }
                Box::pin(async {})
            }));

        // ICE Candidate Handler
        let events = self.events.clone();
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                if let Some(c) = candidate {
                    match c.to_json() {
                        Ok(init) => {
                            events.emit(PeerEvent::LocalIceCandidate(IceCandidateJson {
                                candidate: Some(init.candidate),
                                sdp_mid: init.sdp_mid,
                                sdp_m_line_index: init.sdp_mline_index,
                                username_fragment: init.username_fragment,
                            }));
                        }
                        Err(e) => tracing::warn!("Failed to serialize ICE candidate: {}", e),
                    }
                }
                Box::pin(async {})
            }));

        // Data Channel: ping → pong
        let peer = self.id;
        self.pc
            .on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                tracing::info!(peer, label = dc.label(), "Data channel opened");
                let reply = Arc::clone(&dc);
                dc.on_message(Box::new(move |msg: DataChannelMessage| {
                    let reply = Arc::clone(&reply);
                    Box::pin(async move {
                        if msg.is_string && msg.data.as_ref() == b"ping" {
                            if let Err(e) = reply.send_text("pong".to_string()).await {
                                tracing::debug!("Failed to answer ping: {}", e);
                            }
                        }
                    })
                }));
                Box::pin(async {})
            }));

        // Track Handler (eingehendes Audio)
        let state = Arc::clone(&self.state);
        let inbound = Arc::clone(&self.inbound);
        let events = self.events.clone();
        self.pc.on_track(Box::new(move |track: Arc<TrackRemote>, _, _| {
            match track.kind() {
                RTPCodecType::Audio => {
                    if state.lock().is_terminal() {
                        tracing::debug!("Ignoring audio track on closed peer");
                    } else {
                        let handle = spawn_inbound_audio(track, events.clone());
                        if let Some(previous) = inbound.lock().replace(handle) {
                            previous.abort();
                        }
                    }
                }
                kind => {
                    tracing::info!(peer = events.source(), "Ignoring {} track", kind);
                }
            }
            Box::pin(async {})
        }));
    }
}

fn stop_inbound(slot: &InboundSlot) {
    if let Some(handle) = slot.lock().take() {
        handle.abort();
    }
}

impl Drop for PeerSession {
    fn drop(&mut self) {
        stop_inbound(&self.inbound);
    }
}

impl std::fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSession")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::Tagged;
    use tokio::sync::mpsc;

    async fn session() -> (PeerSession, mpsc::UnboundedReceiver<Tagged<PeerEvent>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let peer = PeerSession::open(Vec::new(), Emitter::new(9, tx)).await.unwrap();
        (peer, rx)
    }

    #[test]
    fn ice_servers_from_urls() {
        let servers = ice_servers(&["stun:stun.l.google.com:19302".to_string()]);
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].urls, vec!["stun:stun.l.google.com:19302"]);
        assert!(ice_servers(&[]).is_empty());
    }

    #[tokio::test]
    async fn invalid_offer_marks_peer_failed() {
        let (peer, mut rx) = session().await;
        assert_eq!(peer.state(), PeerState::Idle);

        assert!(peer.answer("not an sdp".to_string()).await.is_err());
        assert_eq!(peer.state(), PeerState::Failed);

        let mut states = Vec::new();
        while let Ok(tagged) = rx.try_recv() {
            if let PeerEvent::StateChanged(s) = tagged.event {
                states.push(s);
            }
        }
        assert_eq!(states, vec![PeerState::OfferReceived, PeerState::Failed]);
        peer.close(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn answers_a_browser_style_offer() {
        // Offerer-Seite mit derselben Bibliothek erzeugen
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().unwrap();
        let api = APIBuilder::new().with_media_engine(media_engine).build();
        let offerer = api.new_peer_connection(RTCConfiguration::default()).await.unwrap();
        offerer
            .add_transceiver_from_kind(RTPCodecType::Audio, None)
            .await
            .unwrap();
        let offer = offerer.create_offer(None).await.unwrap();
        offerer.set_local_description(offer.clone()).await.unwrap();

        let (peer, _rx) = session().await;
        let answer = peer.answer(offer.sdp).await.unwrap();
        assert!(answer.contains("opus"));
        assert_eq!(peer.state(), PeerState::AnswerSent);

        peer.close(Duration::from_secs(1)).await;
        assert_eq!(peer.state(), PeerState::Closed);
        let _ = offerer.close().await;
    }

    #[tokio::test]
    async fn empty_ice_candidate_is_ignored() {
        let (peer, _rx) = session().await;
        peer.add_ice_candidate(IceCandidateJson::default()).await.unwrap();
        peer.close(Duration::from_secs(1)).await;
    }
}
