//! Datentypen der Gemini Live API, die der Gateway 1:1 durchreicht
//!
//! Felder, die der Gateway nicht selbst auswertet, bleiben als
//! `serde_json::Value` erhalten und werden unverändert weitergegeben.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Session-Konfiguration, wie sie der Client bei CONNECT_GEMINI schickt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveConfig {
    pub model: String,
    /// systemInstruction, generationConfig, tools, realtimeInputConfig, ...
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl LiveConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            extra: Map::new(),
        }
    }

    pub fn with_field(mut self, key: &str, value: Value) -> Self {
        self.extra.insert(key.to_string(), value);
        self
    }
}

/// Binärdaten mit MIME-Typ (base64 kodiert)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

/// Ein Teil eines Conversation-Turns
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }
}

/// Antwort auf einen einzelnen Function Call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionResponse {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub response: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub function_responses: Vec<FunctionResponse>,
}

/// Genau eine Art von Echtzeit-Eingabe pro Nachricht
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeInput {
    Text(String),
    Audio(Blob),
    Video(Blob),
    ActivityStart,
    ActivityEnd,
    AudioStreamEnd,
    /// Ältere Clients schicken eine Liste von Media-Chunks
    MediaChunks(Vec<Blob>),
}

impl RealtimeInput {
    /// Mikrofon-Audio im Format, das Gemini erwartet
    pub fn pcm16k(data_base64: String) -> Self {
        RealtimeInput::Audio(Blob {
            mime_type: "audio/pcm;rate=16000".to_string(),
            data: data_base64,
        })
    }

    /// Kurzname für Logs
    pub fn kind(&self) -> &'static str {
        match self {
            RealtimeInput::Text(_) => "text",
            RealtimeInput::Audio(_) => "audio",
            RealtimeInput::Video(_) => "video",
            RealtimeInput::ActivityStart => "activityStart",
            RealtimeInput::ActivityEnd => "activityEnd",
            RealtimeInput::AudioStreamEnd => "audioStreamEnd",
            RealtimeInput::MediaChunks(_) => "mediaChunks",
        }
    }
}

/// ICE Candidate im Browser-JSON-Format
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidateJson {
    pub candidate: Option<String>,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default)]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn live_config_keeps_unknown_fields() {
        let raw = json!({
            "model": "models/gemini-2.0-flash-exp",
            "generationConfig": { "responseModalities": ["AUDIO"] },
            "systemInstruction": { "parts": [{ "text": "be brief" }] }
        });
        let config: LiveConfig = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(config.model, "models/gemini-2.0-flash-exp");
        assert_eq!(serde_json::to_value(&config).unwrap(), raw);
    }

    #[test]
    fn ice_candidate_uses_browser_field_names() {
        let raw = json!({ "candidate": "candidate:1 1 udp 1 1.2.3.4 5 typ host", "sdpMid": "0", "sdpMLineIndex": 0 });
        let candidate: IceCandidateJson = serde_json::from_value(raw).unwrap();
        assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
        assert_eq!(candidate.sdp_m_line_index, Some(0));
    }

    #[test]
    fn part_with_inline_data() {
        let raw = json!({ "inlineData": { "mimeType": "image/jpeg", "data": "AAAA" } });
        let part: Part = serde_json::from_value(raw).unwrap();
        assert_eq!(part.inline_data.unwrap().mime_type, "image/jpeg");
        assert!(part.text.is_none());
    }
}
