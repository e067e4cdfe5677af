//! Client Session - ein Task pro verbundenem Client
//!
//! Der Task besitzt den gesamten Zustand einer Verbindung (Upstream-Adapter,
//! Peer Connection, Pacer, Audio-Restpuffer) und multiplext eingehende
//! Frames des Clients mit den Event-Kanälen seiner Komponenten. Zustand wird
//! nur innerhalb dieses Tasks verändert.

use super::registry::{ClientId, SessionRegistry};
use super::GatewayContext;
use crate::audio::{AudioPacer, DownstreamPipeline, PacerEvent};
use crate::emitter::{Emitter, Tagged};
use crate::image::ImageRequest;
use crate::protocol::{
    AudioChunkPayload, CancelledIds, ClientMessage, ContentPayload, IceCandidateJson,
    IceCandidatePayload, ImageResultPayload, LiveConfig, ProtocolError, RealtimeInput, SdpPayload,
    ServerMessage, SpeakingPayload, ToolCallCancellationPayload, ToolCallPayload,
};
use crate::signaling::{ice_servers, PeerEvent, PeerSession, PeerState};
use crate::upstream::{AdapterSettings, UpstreamAdapter, UpstreamEvent};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Ein Frame vom Client-Transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Text(String),
    /// Binär-Frames enthalten UTF-8 JSON
    Binary(Vec<u8>),
}

const NOT_CONNECTED: &str = "Gemini not connected. Send CONNECT_GEMINI first.";
const NOT_CONNECTED_SHORT: &str = "Gemini not connected.";

// ============================================================================
// CLIENT SESSION
// ============================================================================

pub(crate) struct ClientSession {
    id: ClientId,
    ctx: Arc<GatewayContext>,
    registry: SessionRegistry,
    outbound: mpsc::UnboundedSender<ServerMessage>,

    adapter: Option<UpstreamAdapter>,
    peer: Option<PeerSession>,
    pacer: Option<AudioPacer>,
    downstream: DownstreamPipeline,
    next_source: u64,

    upstream_tx: mpsc::UnboundedSender<Tagged<UpstreamEvent>>,
    peer_tx: mpsc::UnboundedSender<Tagged<PeerEvent>>,
    pacer_tx: mpsc::UnboundedSender<Tagged<PacerEvent>>,
    image_tx: mpsc::UnboundedSender<ImageResultPayload>,
}

/// Empfangsseiten der Event-Kanäle einer Session
pub(crate) struct SessionChannels {
    upstream: mpsc::UnboundedReceiver<Tagged<UpstreamEvent>>,
    peer: mpsc::UnboundedReceiver<Tagged<PeerEvent>>,
    pacer: mpsc::UnboundedReceiver<Tagged<PacerEvent>>,
    images: mpsc::UnboundedReceiver<ImageResultPayload>,
}

impl ClientSession {
    pub(crate) fn new(
        id: ClientId,
        ctx: Arc<GatewayContext>,
        registry: SessionRegistry,
        outbound: mpsc::UnboundedSender<ServerMessage>,
    ) -> (Self, SessionChannels) {
        let (upstream_tx, upstream) = mpsc::unbounded_channel();
        let (peer_tx, peer) = mpsc::unbounded_channel();
        let (pacer_tx, pacer) = mpsc::unbounded_channel();
        let (image_tx, images) = mpsc::unbounded_channel();

        let session = Self {
            id,
            ctx,
            registry,
            outbound,
            adapter: None,
            peer: None,
            pacer: None,
            downstream: DownstreamPipeline::new(),
            next_source: 0,
            upstream_tx,
            peer_tx,
            pacer_tx,
            image_tx,
        };
        let channels = SessionChannels {
            upstream,
            peer,
            pacer,
            images,
        };
        (session, channels)
    }

    /// Hauptschleife; endet wenn der Transport schließt oder die Session
    /// abgebrochen wird, danach folgt immer der vollständige Abbau
    pub(crate) async fn run(
        mut self,
        mut inbound: mpsc::UnboundedReceiver<InboundFrame>,
        mut channels: SessionChannels,
        cancel: CancellationToken,
    ) {
        tracing::info!(client_id = %self.id, "Client session started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(client_id = %self.id, "Client session cancelled");
                    break;
                }
                frame = inbound.recv() => match frame {
                    Some(frame) => self.handle_frame(frame).await,
                    None => {
                        tracing::info!(client_id = %self.id, "Client transport closed");
                        break;
                    }
                },
                Some(event) = channels.upstream.recv() => self.handle_upstream(event).await,
                Some(event) = channels.peer.recv() => self.handle_peer(event),
                Some(event) = channels.pacer.recv() => self.handle_pacer(event),
                Some(result) = channels.images.recv() => {
                    self.send(ServerMessage::ImageGenerationResult(result));
                }
            }
        }

        self.teardown().await;
    }

    // ========================================================================
    // CLIENT MESSAGES
    // ========================================================================

    async fn handle_frame(&mut self, frame: InboundFrame) {
        let text = match frame {
            InboundFrame::Text(text) => text,
            InboundFrame::Binary(data) => match String::from_utf8(data) {
                Ok(text) => text,
                Err(e) => {
                    self.reject(&ProtocolError::InvalidJson(e.to_string()));
                    return;
                }
            },
        };

        match ClientMessage::parse(&text) {
            Ok(message) => self.handle_message(message).await,
            Err(e) => self.reject(&e),
        }
    }

    fn reject(&self, err: &ProtocolError) {
        tracing::warn!(client_id = %self.id, "Rejected client message: {}", err);
        self.send(ServerMessage::from(err));
    }

    async fn handle_message(&mut self, message: ClientMessage) {
        let message_type = message.message_type();
        tracing::debug!(client_id = %self.id, "Received {}", message_type);

        match message {
            ClientMessage::ConnectGemini { initial_config } => self.connect(initial_config).await,

            ClientMessage::SendMessage {
                parts,
                turn_complete,
            } => {
                let Some(adapter) = &self.adapter else {
                    self.send(ServerMessage::error(NOT_CONNECTED, None));
                    return;
                };
                let result = adapter.send(parts, turn_complete);
                self.report_command(message_type, result);
            }

            ClientMessage::SendRealtimeInput(input) => {
                let Some(adapter) = &self.adapter else {
                    self.send(ServerMessage::error(NOT_CONNECTED_SHORT, None));
                    return;
                };
                tracing::trace!(client_id = %self.id, kind = input.kind(), "Realtime input");
                let result = adapter.send_realtime_input(input);
                self.report_command(message_type, result);
            }

            ClientMessage::SendToolResponse(response) => {
                let Some(adapter) = &self.adapter else {
                    self.send(ServerMessage::error(NOT_CONNECTED_SHORT, None));
                    return;
                };
                for call in &response.function_responses {
                    tracing::info!(client_id = %self.id, call_id = %call.id, "Tool response");
                }
                let result = adapter.send_tool_response(response);
                self.report_command(message_type, result);
            }

            ClientMessage::UpdateConfig(config) => {
                let Some(adapter) = &self.adapter else {
                    self.send(ServerMessage::error(NOT_CONNECTED, None));
                    return;
                };
                tracing::info!(client_id = %self.id, model = %config.model, "Updating Gemini config");
                let result = adapter.reconfigure(config);
                self.report_command(message_type, result);
            }

            ClientMessage::DisconnectGemini => {
                let stopped = match &self.adapter {
                    Some(adapter) => adapter.disconnect().is_err(),
                    None => {
                        tracing::info!(client_id = %self.id, "Disconnect requested without Gemini session");
                        false
                    }
                };
                // Adapter-Task bereits beendet: kein Closed-Event mehr zu erwarten
                if stopped {
                    self.adapter = None;
                    self.send(ServerMessage::disconnected(None));
                }
            }

            ClientMessage::WebrtcOffer { sdp } => self.handle_offer(sdp).await,

            ClientMessage::WebrtcIceCandidate(candidate) => self.handle_remote_ice(candidate).await,

            ClientMessage::GenerateImage { text, image_uri } => {
                let images = Arc::clone(&self.ctx.images);
                let reply = self.image_tx.clone();
                let client_id = self.id;
                tokio::spawn(async move {
                    let result = images
                        .generate(ImageRequest {
                            text,
                            image_base64: image_uri,
                        })
                        .await;
                    tracing::info!(client_id = %client_id, success = result.success, "Image generation finished");
                    if reply.send(result).is_err() {
                        tracing::trace!(client_id = %client_id, "Session gone, dropping image result");
                    }
                });
            }
        }
    }

    /// Ersetzt einen bestehenden Adapter vollständig durch einen neuen
    async fn connect(&mut self, config: LiveConfig) {
        if let Some(old) = self.adapter.take() {
            tracing::info!(client_id = %self.id, adapter = old.id(), "Replacing Gemini session");
            self.silence();
            old.shutdown(self.ctx.config.upstream_close_timeout).await;
        }

        let id = self.next_source();
        let settings = AdapterSettings {
            reconfigure_delay: self.ctx.config.reconfigure_delay,
            close_timeout: self.ctx.config.upstream_close_timeout,
        };
        let adapter = UpstreamAdapter::spawn(
            Arc::clone(&self.ctx.connector),
            settings,
            Emitter::new(id, self.upstream_tx.clone()),
        );

        tracing::info!(client_id = %self.id, adapter = id, model = %config.model, "Connecting to Gemini");
        match adapter.connect(config) {
            Ok(()) => self.adapter = Some(adapter),
            Err(e) => self.send(ServerMessage::error(
                "Failed to connect to Gemini.",
                Some(e.to_string()),
            )),
        }
    }

    fn report_command(
        &self,
        message_type: &'static str,
        result: Result<(), crate::upstream::UpstreamError>,
    ) {
        if let Err(e) = result {
            tracing::warn!(client_id = %self.id, "Failed to process {}: {}", message_type, e);
            self.send(ServerMessage::error(
                format!("Error processing message: {}", message_type),
                Some(e.to_string()),
            ));
        }
    }

    // ========================================================================
    // WEBRTC
    // ========================================================================

    async fn handle_offer(&mut self, sdp: String) {
        self.teardown_peer().await;

        let id = self.next_source();
        let servers = ice_servers(&self.ctx.config.stun_servers);
        let peer = match PeerSession::open(servers, Emitter::new(id, self.peer_tx.clone())).await {
            Ok(peer) => peer,
            Err(e) => {
                tracing::error!(client_id = %self.id, "Failed to create peer connection: {}", e);
                self.send(ServerMessage::error(
                    "Error processing WebRTC offer.",
                    Some(e.to_string()),
                ));
                return;
            }
        };

        let answer = match peer.answer(sdp).await {
            Ok(answer) => answer,
            Err(e) => {
                // Peer bleibt bis zum nächsten Offer oder Disconnect registriert
                self.peer = Some(peer);
                self.send(ServerMessage::error(
                    "Error processing WebRTC offer.",
                    Some(e.to_string()),
                ));
                return;
            }
        };

        match peer.audio_sink() {
            Ok(sink) => {
                self.pacer = Some(AudioPacer::new(
                    sink,
                    Emitter::new(id, self.pacer_tx.clone()),
                ));
            }
            Err(e) => {
                tracing::error!(client_id = %self.id, "No outbound audio sink: {}", e);
            }
        }
        self.peer = Some(peer);

        self.send(ServerMessage::WebrtcAnswer(SdpPayload { sdp: answer }));
        tracing::info!(client_id = %self.id, peer = id, "Sent WEBRTC_ANSWER");
    }

    async fn handle_remote_ice(&mut self, candidate: IceCandidateJson) {
        let Some(peer) = &self.peer else {
            tracing::debug!(client_id = %self.id, "ICE candidate without peer connection ignored");
            return;
        };
        if let Err(e) = peer.add_ice_candidate(candidate).await {
            tracing::warn!(client_id = %self.id, "Failed to add ICE candidate: {}", e);
            self.send(ServerMessage::error(
                "Error processing WebRTC ICE candidate.",
                Some(e.to_string()),
            ));
        }
    }

    fn handle_peer(&mut self, tagged: Tagged<PeerEvent>) {
        if self.peer.as_ref().map(PeerSession::id) != Some(tagged.source) {
            tracing::trace!(client_id = %self.id, peer = tagged.source, "Dropping event from old peer");
            return;
        }

        match tagged.event {
            PeerEvent::LocalIceCandidate(candidate) => {
                self.send(ServerMessage::WebrtcIceCandidate(IceCandidatePayload {
                    candidate,
                }));
            }
            PeerEvent::StateChanged(state) => {
                tracing::info!(client_id = %self.id, peer = tagged.source, "Peer state: {}", state);
                if matches!(state, PeerState::Failed | PeerState::Closed) {
                    self.silence();
                }
            }
            PeerEvent::MicAudio(chunk) => {
                if let Some(adapter) = &self.adapter {
                    let input = RealtimeInput::pcm16k(STANDARD.encode(&chunk));
                    if adapter.send_realtime_input(input).is_err() {
                        tracing::debug!(client_id = %self.id, "Adapter gone, dropping mic audio");
                    }
                }
            }
        }
    }

    fn handle_pacer(&mut self, tagged: Tagged<PacerEvent>) {
        if self.peer.as_ref().map(PeerSession::id) != Some(tagged.source) {
            return;
        }
        match tagged.event {
            PacerEvent::SpeakingStarted => {
                self.send(ServerMessage::AssistantSpeaking(SpeakingPayload {
                    speaking: true,
                }));
            }
            PacerEvent::Drained { frames } => {
                tracing::debug!(client_id = %self.id, frames, "Pacer drained");
            }
        }
    }

    // ========================================================================
    // UPSTREAM EVENTS
    // ========================================================================

    async fn handle_upstream(&mut self, tagged: Tagged<UpstreamEvent>) {
        let current = self.adapter.as_ref().map(UpstreamAdapter::id) == Some(tagged.source);

        if let UpstreamEvent::Closed { reason } = tagged.event {
            tracing::info!(client_id = %self.id, adapter = tagged.source, reason = ?reason, "Gemini session closed");
            self.send(ServerMessage::disconnected(reason));
            if current {
                self.adapter = None;
                self.silence();
            }
            return;
        }

        if !current {
            tracing::trace!(client_id = %self.id, adapter = tagged.source, "Dropping event from superseded adapter");
            return;
        }

        match tagged.event {
            UpstreamEvent::Opened => self.send(ServerMessage::GeminiConnected),
            UpstreamEvent::Content(content) => {
                self.send(ServerMessage::ContentMessage(ContentPayload {
                    server_content: content,
                }));
            }
            UpstreamEvent::Audio(pcm) => self.play(&pcm),
            UpstreamEvent::ToolCall(tool_call) => {
                tracing::info!(client_id = %self.id, "Gemini requested tool call");
                self.send(ServerMessage::ToolCall(ToolCallPayload { tool_call }));
            }
            UpstreamEvent::ToolCallCancellation(ids) => {
                self.send(ServerMessage::ToolCallCancellation(
                    ToolCallCancellationPayload {
                        tool_call_cancellation: CancelledIds { ids },
                    },
                ));
            }
            UpstreamEvent::SetupComplete { success, error } => {
                tracing::info!(client_id = %self.id, success, "Gemini setup complete");
                self.send(ServerMessage::setup_complete(success, error));
            }
            UpstreamEvent::Interrupted => {
                tracing::info!(client_id = %self.id, "Gemini interrupted, clearing audio queue");
                self.silence();
                self.send(ServerMessage::Interrupted);
            }
            UpstreamEvent::TurnComplete => self.send(ServerMessage::TurnComplete),
            UpstreamEvent::Log(entry) => {
                if self.ctx.config.forward_upstream_logs {
                    self.send(ServerMessage::LogMessage(entry));
                }
            }
            UpstreamEvent::ConnectFailed {
                reconfigure,
                details,
            } => {
                self.adapter = None;
                let message = if reconfigure {
                    "Failed to update Gemini configuration."
                } else {
                    "Failed to connect to Gemini."
                };
                self.send(ServerMessage::error(message, Some(details)));
            }
            UpstreamEvent::CommandFailed {
                message_type,
                details,
            } => {
                self.send(ServerMessage::error(
                    format!("Error processing message: {}", message_type),
                    Some(details),
                ));
            }
            UpstreamEvent::Closed { .. } => {}
        }
    }

    /// Gemini-Audio über WebRTC ausspielen, ohne Peer als AUDIO_CHUNK
    fn play(&mut self, pcm: &[u8]) {
        match &self.pacer {
            Some(pacer) => match self.downstream.push(pcm) {
                Ok(frames) => pacer.enqueue(frames),
                Err(e) => tracing::warn!(client_id = %self.id, "Dropping Gemini audio: {}", e),
            },
            None => self.send(ServerMessage::AudioChunk(AudioChunkPayload {
                data: STANDARD.encode(pcm),
            })),
        }
    }

    // ========================================================================
    // TEARDOWN
    // ========================================================================

    /// Leert Pacer und Restpuffer
    fn silence(&mut self) {
        if let Some(pacer) = &self.pacer {
            pacer.interrupt();
        }
        self.downstream.clear();
    }

    async fn teardown_peer(&mut self) {
        if let Some(pacer) = self.pacer.take() {
            pacer.stop();
        }
        self.downstream.clear();
        if let Some(peer) = self.peer.take() {
            tracing::info!(client_id = %self.id, peer = peer.id(), "Closing existing peer connection");
            peer.close(self.ctx.config.upstream_close_timeout).await;
        }
    }

    /// Pacer stoppen, Adapter trennen, Peer schließen, Registry-Eintrag löschen
    async fn teardown(mut self) {
        if let Some(pacer) = self.pacer.take() {
            pacer.stop();
        }
        if let Some(adapter) = self.adapter.take() {
            adapter.shutdown(self.ctx.config.upstream_close_timeout).await;
        }
        if let Some(peer) = self.peer.take() {
            peer.close(self.ctx.config.upstream_close_timeout).await;
        }
        self.downstream.clear();
        self.registry.remove(&self.id);
        tracing::info!(client_id = %self.id, "Client session closed");
    }

    fn next_source(&mut self) -> u64 {
        self.next_source += 1;
        self.next_source
    }

    fn send(&self, message: ServerMessage) {
        if self.outbound.send(message).is_err() {
            tracing::trace!(client_id = %self.id, "Outbound channel closed");
        }
    }
}
