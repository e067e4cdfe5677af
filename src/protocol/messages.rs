//! Nachrichten-Typen für das Client-Protokoll
//!
//! Jede Nachricht ist ein Envelope `{ "type": TAG, "payload": ... }`.
//! Eingehende Nachrichten werden zweistufig geparst: zuerst der Envelope,
//! dann der Payload passend zum Tag. So lässt sich ein unbekannter Typ von
//! einem kaputten Payload unterscheiden.

use super::live::{Blob, IceCandidateJson, LiveConfig, Part, RealtimeInput, ToolResponse};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid JSON message received.")]
    InvalidJson(String),

    #[error("Message type missing.")]
    MissingType,

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("Invalid payload for {message_type}")]
    InvalidPayload {
        message_type: &'static str,
        reason: String,
    },

    #[error("Failed to encode message: {0}")]
    Encode(String),
}

impl ProtocolError {
    /// Zusatzinfo für das `details` Feld von GEMINI_ERROR
    pub fn details(&self) -> Option<String> {
        match self {
            ProtocolError::InvalidJson(reason) => Some(reason.clone()),
            ProtocolError::InvalidPayload { reason, .. } => Some(reason.clone()),
            ProtocolError::Encode(reason) => Some(reason.clone()),
            ProtocolError::MissingType | ProtocolError::UnknownType(_) => None,
        }
    }
}

// ============================================================================
// CLIENT → SERVER MESSAGES
// ============================================================================

/// Eingehende Nachricht vom Client (bereits validiert)
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    ConnectGemini { initial_config: LiveConfig },
    SendMessage { parts: Vec<Part>, turn_complete: bool },
    SendRealtimeInput(RealtimeInput),
    SendToolResponse(ToolResponse),
    UpdateConfig(LiveConfig),
    DisconnectGemini,
    WebrtcOffer { sdp: String },
    WebrtcIceCandidate(IceCandidateJson),
    GenerateImage { text: String, image_uri: Option<String> },
}

impl ClientMessage {
    /// Der Wire-Tag dieser Nachricht
    pub fn message_type(&self) -> &'static str {
        match self {
            ClientMessage::ConnectGemini { .. } => "CONNECT_GEMINI",
            ClientMessage::SendMessage { .. } => "SEND_MESSAGE",
            ClientMessage::SendRealtimeInput(_) => "SEND_REALTIME_INPUT",
            ClientMessage::SendToolResponse(_) => "SEND_TOOL_RESPONSE",
            ClientMessage::UpdateConfig(_) => "UPDATE_CONFIG",
            ClientMessage::DisconnectGemini => "DISCONNECT_GEMINI",
            ClientMessage::WebrtcOffer { .. } => "WEBRTC_OFFER",
            ClientMessage::WebrtcIceCandidate(_) => "WEBRTC_ICE_CANDIDATE",
            ClientMessage::GenerateImage { .. } => "GENERATE_IMAGE",
        }
    }

    /// Parst einen Text-Frame vom Client
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let envelope: RawEnvelope =
            serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;
        let kind = envelope.kind.ok_or(ProtocolError::MissingType)?;
        let payload = envelope.payload;

        let message = match kind.as_str() {
            "CONNECT_GEMINI" => {
                let p: ConnectPayload = payload_as("CONNECT_GEMINI", payload)?;
                ClientMessage::ConnectGemini {
                    initial_config: p.initial_config,
                }
            }
            "SEND_MESSAGE" => {
                let p: SendMessagePayload = payload_as("SEND_MESSAGE", payload)?;
                ClientMessage::SendMessage {
                    parts: p.parts,
                    turn_complete: p.turn_complete.unwrap_or(true),
                }
            }
            "SEND_REALTIME_INPUT" => {
                let p: RealtimeInputPayload = payload_as("SEND_REALTIME_INPUT", payload)?;
                ClientMessage::SendRealtimeInput(p.into_input()?)
            }
            "SEND_TOOL_RESPONSE" => {
                let p: ToolResponsePayload = payload_as("SEND_TOOL_RESPONSE", payload)?;
                ClientMessage::SendToolResponse(p.tool_response)
            }
            "UPDATE_CONFIG" => ClientMessage::UpdateConfig(payload_as("UPDATE_CONFIG", payload)?),
            "DISCONNECT_GEMINI" => ClientMessage::DisconnectGemini,
            "WEBRTC_OFFER" => {
                let p: SdpPayload = payload_as("WEBRTC_OFFER", payload)?;
                ClientMessage::WebrtcOffer { sdp: p.sdp }
            }
            "WEBRTC_ICE_CANDIDATE" => {
                let p: IceCandidatePayload = payload_as("WEBRTC_ICE_CANDIDATE", payload)?;
                ClientMessage::WebrtcIceCandidate(p.candidate)
            }
            "GENERATE_IMAGE" => {
                let p: GenerateImagePayload = payload_as("GENERATE_IMAGE", payload)?;
                ClientMessage::GenerateImage {
                    text: p.text,
                    image_uri: p.image_uri,
                }
            }
            _ => return Err(ProtocolError::UnknownType(kind)),
        };

        Ok(message)
    }
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    payload: Value,
}

fn payload_as<T: DeserializeOwned>(
    message_type: &'static str,
    payload: Value,
) -> Result<T, ProtocolError> {
    serde_json::from_value(payload).map_err(|e| ProtocolError::InvalidPayload {
        message_type,
        reason: e.to_string(),
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectPayload {
    initial_config: LiveConfig,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMessagePayload {
    parts: Vec<Part>,
    turn_complete: Option<bool>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolResponsePayload {
    tool_response: ToolResponse,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateImagePayload {
    text: String,
    image_uri: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInputPayload {
    text: Option<String>,
    audio: Option<Blob>,
    video: Option<Blob>,
    activity_start: Option<Value>,
    activity_end: Option<Value>,
    audio_stream_end: Option<bool>,
    #[serde(alias = "mediaChunks")]
    chunks: Option<Vec<Blob>>,
}

impl RealtimeInputPayload {
    fn into_input(self) -> Result<RealtimeInput, ProtocolError> {
        let mut inputs = Vec::with_capacity(1);
        if let Some(text) = self.text {
            inputs.push(RealtimeInput::Text(text));
        }
        if let Some(audio) = self.audio {
            inputs.push(RealtimeInput::Audio(audio));
        }
        if let Some(video) = self.video {
            inputs.push(RealtimeInput::Video(video));
        }
        if self.activity_start.is_some() {
            inputs.push(RealtimeInput::ActivityStart);
        }
        if self.activity_end.is_some() {
            inputs.push(RealtimeInput::ActivityEnd);
        }
        if self.audio_stream_end == Some(true) {
            inputs.push(RealtimeInput::AudioStreamEnd);
        }
        if let Some(chunks) = self.chunks {
            inputs.push(RealtimeInput::MediaChunks(chunks));
        }

        if inputs.len() != 1 {
            return Err(ProtocolError::InvalidPayload {
                message_type: "SEND_REALTIME_INPUT",
                reason: format!("expected exactly one realtime input, got {}", inputs.len()),
            });
        }
        Ok(inputs.remove(0))
    }
}

// ============================================================================
// SERVER → CLIENT MESSAGES
// ============================================================================

/// Ausgehende Nachricht an den Client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    GeminiConnected,
    GeminiDisconnected(DisconnectedPayload),
    GeminiError(ErrorPayload),
    ContentMessage(ContentPayload),
    ToolCall(ToolCallPayload),
    ToolCallCancellation(ToolCallCancellationPayload),
    SetupComplete(SetupCompletePayload),
    Interrupted,
    TurnComplete,
    AudioChunk(AudioChunkPayload),
    LogMessage(LogEntry),
    AssistantSpeaking(SpeakingPayload),
    WebrtcAnswer(SdpPayload),
    WebrtcIceCandidate(IceCandidatePayload),
    ImageGenerationResult(ImageResultPayload),
}

impl ServerMessage {
    pub fn error(message: impl Into<String>, details: Option<String>) -> Self {
        ServerMessage::GeminiError(ErrorPayload {
            message: message.into(),
            details,
        })
    }

    pub fn disconnected(reason: Option<String>) -> Self {
        ServerMessage::GeminiDisconnected(DisconnectedPayload { reason })
    }

    pub fn setup_complete(success: bool, error: Option<String>) -> Self {
        ServerMessage::SetupComplete(SetupCompletePayload {
            setup_complete: SetupStatus { success, error },
        })
    }

    /// Serialisiert die Nachricht als Text-Frame
    pub fn to_text(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }
}

impl From<&ProtocolError> for ServerMessage {
    fn from(err: &ProtocolError) -> Self {
        ServerMessage::error(err.to_string(), err.details())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DisconnectedPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentPayload {
    pub server_content: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallPayload {
    pub tool_call: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallCancellationPayload {
    pub tool_call_cancellation: CancelledIds,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelledIds {
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupCompletePayload {
    pub setup_complete: SetupStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupStatus {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioChunkPayload {
    /// PCM 16 bit, 24 kHz, base64 kodiert
    pub data: String,
}

/// Log-Eintrag aus der Upstream-Session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub date: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeakingPayload {
    pub speaking: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdpPayload {
    pub sdp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidatePayload {
    pub candidate: IceCandidateJson,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageResultPayload {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_connect_with_initial_config() {
        let text = r#"{"type":"CONNECT_GEMINI","payload":{"initialConfig":{"model":"gemini-2.0-flash-exp","tools":[]}}}"#;
        match ClientMessage::parse(text).unwrap() {
            ClientMessage::ConnectGemini { initial_config } => {
                assert_eq!(initial_config.model, "gemini-2.0-flash-exp");
                assert_eq!(initial_config.extra.get("tools"), Some(&json!([])));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn send_message_defaults_turn_complete() {
        let text = r#"{"type":"SEND_MESSAGE","payload":{"parts":[{"text":"hi"}]}}"#;
        assert_eq!(
            ClientMessage::parse(text).unwrap(),
            ClientMessage::SendMessage {
                parts: vec![Part::text("hi")],
                turn_complete: true
            }
        );
    }

    #[test]
    fn disconnect_needs_no_payload() {
        let text = r#"{"type":"DISCONNECT_GEMINI"}"#;
        assert_eq!(
            ClientMessage::parse(text).unwrap(),
            ClientMessage::DisconnectGemini
        );
    }

    #[test]
    fn unknown_type_is_reported_by_name() {
        let err = ClientMessage::parse(r#"{"type":"BOGUS","payload":{}}"#).unwrap_err();
        assert_eq!(err, ProtocolError::UnknownType("BOGUS".to_string()));
        assert_eq!(err.to_string(), "Unknown message type: BOGUS");
    }

    #[test]
    fn non_json_is_invalid_json() {
        let err = ClientMessage::parse("not json").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidJson(_)));
        assert_eq!(err.to_string(), "Invalid JSON message received.");
    }

    #[test]
    fn bad_payload_names_the_type() {
        let err =
            ClientMessage::parse(r#"{"type":"WEBRTC_OFFER","payload":{"sdp":5}}"#).unwrap_err();
        match err {
            ProtocolError::InvalidPayload { message_type, .. } => {
                assert_eq!(message_type, "WEBRTC_OFFER")
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn realtime_input_requires_exactly_one_field() {
        let audio = r#"{"type":"SEND_REALTIME_INPUT","payload":{"audio":{"mimeType":"audio/pcm;rate=16000","data":"AAA="}}}"#;
        assert!(matches!(
            ClientMessage::parse(audio).unwrap(),
            ClientMessage::SendRealtimeInput(RealtimeInput::Audio(_))
        ));

        let activity = r#"{"type":"SEND_REALTIME_INPUT","payload":{"activityStart":{}}}"#;
        assert_eq!(
            ClientMessage::parse(activity).unwrap(),
            ClientMessage::SendRealtimeInput(RealtimeInput::ActivityStart)
        );

        let none = r#"{"type":"SEND_REALTIME_INPUT","payload":{}}"#;
        assert!(ClientMessage::parse(none).is_err());

        let two = r#"{"type":"SEND_REALTIME_INPUT","payload":{"text":"a","activityEnd":{}}}"#;
        assert!(ClientMessage::parse(two).is_err());
    }

    #[test]
    fn legacy_chunks_are_accepted() {
        let text = r#"{"type":"SEND_REALTIME_INPUT","payload":{"chunks":[{"mimeType":"image/jpeg","data":"AA=="}]}}"#;
        match ClientMessage::parse(text).unwrap() {
            ClientMessage::SendRealtimeInput(RealtimeInput::MediaChunks(chunks)) => {
                assert_eq!(chunks.len(), 1)
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn unit_server_messages_have_no_payload() {
        let value = serde_json::to_value(ServerMessage::GeminiConnected).unwrap();
        assert_eq!(value, json!({ "type": "GEMINI_CONNECTED" }));
    }

    #[test]
    fn server_messages_use_wire_shapes() {
        let value = serde_json::to_value(ServerMessage::setup_complete(true, None)).unwrap();
        assert_eq!(
            value,
            json!({ "type": "SETUP_COMPLETE", "payload": { "setupComplete": { "success": true } } })
        );

        let value = serde_json::to_value(ServerMessage::AssistantSpeaking(SpeakingPayload {
            speaking: true,
        }))
        .unwrap();
        assert_eq!(
            value,
            json!({ "type": "ASSISTANT_SPEAKING", "payload": { "speaking": true } })
        );

        let err = ProtocolError::UnknownType("BOGUS".to_string());
        let value = serde_json::to_value(ServerMessage::from(&err)).unwrap();
        assert_eq!(
            value,
            json!({ "type": "GEMINI_ERROR", "payload": { "message": "Unknown message type: BOGUS" } })
        );
    }
}
