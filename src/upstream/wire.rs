//! JSON-Nachrichten der Gemini Live WebSocket API
//!
//! Baut die Client-Nachrichten (`setup`, `clientContent`, `realtimeInput`,
//! `toolResponse`) und zerlegt Server-Nachrichten in einzelne Events.

use super::UpstreamEvent;
use crate::protocol::{LiveConfig, Part, RealtimeInput, ToolResponse};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Map, Value};

// ============================================================================
// CLIENT → GEMINI
// ============================================================================

/// `setup` Nachricht, die direkt nach dem Öffnen gesendet wird
///
/// Der Modellname bekommt das Präfix `models/`, falls es fehlt. Ohne eigene
/// `realtimeInputConfig` wird automatische Sprachaktivitätserkennung mit
/// hoher Empfindlichkeit aktiviert.
pub fn setup_message(config: &LiveConfig) -> Value {
    let mut setup = config.extra.clone();

    let model = if config.model.starts_with("models/") {
        config.model.clone()
    } else {
        format!("models/{}", config.model)
    };
    setup.insert("model".to_string(), Value::String(model));

    if !setup.contains_key("realtimeInputConfig") {
        setup.insert("realtimeInputConfig".to_string(), default_realtime_input_config());
    }

    json!({ "setup": Value::Object(setup) })
}

fn default_realtime_input_config() -> Value {
    json!({
        "automaticActivityDetection": {
            "disabled": false,
            "startOfSpeechSensitivity": "START_SENSITIVITY_HIGH",
            "endOfSpeechSensitivity": "END_SENSITIVITY_HIGH",
            "prefixPaddingMs": 20,
            "silenceDurationMs": 100
        }
    })
}

pub fn client_content(parts: &[Part], turn_complete: bool) -> Value {
    json!({
        "clientContent": {
            "turns": [{ "role": "user", "parts": parts }],
            "turnComplete": turn_complete
        }
    })
}

pub fn realtime_input(input: &RealtimeInput) -> Value {
    let body = match input {
        RealtimeInput::Text(text) => json!({ "text": text }),
        RealtimeInput::Audio(blob) => json!({ "audio": blob }),
        RealtimeInput::Video(blob) => json!({ "video": blob }),
        RealtimeInput::ActivityStart => json!({ "activityStart": {} }),
        RealtimeInput::ActivityEnd => json!({ "activityEnd": {} }),
        RealtimeInput::AudioStreamEnd => json!({ "audioStreamEnd": true }),
        RealtimeInput::MediaChunks(chunks) => json!({ "mediaChunks": chunks }),
    };
    json!({ "realtimeInput": body })
}

pub fn tool_response(response: &ToolResponse) -> Value {
    json!({ "toolResponse": response })
}

// ============================================================================
// GEMINI → CLIENT
// ============================================================================

/// Ergebnis der Zerlegung einer Server-Nachricht
#[derive(Debug, Default, PartialEq)]
pub struct ServerFrame {
    pub events: Vec<UpstreamEvent>,
    pub setup_complete: bool,
}

/// Zerlegt eine Server-Nachricht in Events in der Reihenfolge
/// Content, Audio, Interrupted, TurnComplete
pub fn parse_server_message(message: Value) -> ServerFrame {
    let mut frame = ServerFrame::default();
    let Value::Object(mut message) = message else {
        return frame;
    };

    if message.remove("setupComplete").is_some() {
        frame.setup_complete = true;
        frame.events.push(UpstreamEvent::SetupComplete {
            success: true,
            error: None,
        });
    }

    if let Some(Value::Object(content)) = message.remove("serverContent") {
        parse_server_content(content, &mut frame.events);
    }

    if let Some(tool_call) = message.remove("toolCall") {
        frame.events.push(UpstreamEvent::ToolCall(tool_call));
    }

    if let Some(cancellation) = message.remove("toolCallCancellation") {
        let ids = cancellation
            .get("ids")
            .and_then(Value::as_array)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| id.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        frame.events.push(UpstreamEvent::ToolCallCancellation(ids));
    }

    if let Some(go_away) = message.remove("goAway") {
        frame.events.push(UpstreamEvent::log("server.goAway", go_away));
    }

    frame
}

fn parse_server_content(mut content: Map<String, Value>, events: &mut Vec<UpstreamEvent>) {
    let interrupted = content.get("interrupted").and_then(Value::as_bool) == Some(true);
    let turn_complete = content.get("turnComplete").and_then(Value::as_bool) == Some(true);

    let mut audio = Vec::new();
    if let Some(Value::Object(model_turn)) = content.get_mut("modelTurn") {
        if let Some(Value::Array(parts)) = model_turn.get_mut("parts") {
            parts.retain(|part| match audio_part_data(part) {
                Some(data) => {
                    audio.push(data);
                    false
                }
                None => true,
            });
            if parts.is_empty() {
                model_turn.remove("parts");
            }
        }
        if model_turn.is_empty() {
            content.remove("modelTurn");
        }
    }

    if !content.is_empty() {
        events.push(UpstreamEvent::Content(Value::Object(content)));
    }
    for data in audio {
        match STANDARD.decode(data.as_bytes()) {
            Ok(bytes) if !bytes.is_empty() => events.push(UpstreamEvent::Audio(bytes)),
            Ok(_) => {}
            Err(e) => tracing::warn!("Dropping undecodable audio part: {}", e),
        }
    }
    if interrupted {
        events.push(UpstreamEvent::Interrupted);
    }
    if turn_complete {
        events.push(UpstreamEvent::TurnComplete);
    }
}

fn audio_part_data(part: &Value) -> Option<String> {
    let inline = part.get("inlineData")?;
    let mime = inline.get("mimeType")?.as_str()?;
    if !mime.starts_with("audio/pcm") {
        return None;
    }
    inline.get("data")?.as_str().map(str::to_string)
}

/// Entfernt den Präfix bis einschließlich `ERROR]` aus einem Close-Grund
pub fn clean_close_reason(reason: &str) -> Option<String> {
    let trimmed = match reason.find("ERROR]") {
        Some(idx) => &reason[idx + "ERROR]".len()..],
        None => reason,
    };
    let trimmed = trimmed.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Blob;

    #[test]
    fn setup_prefixes_model_and_adds_activity_detection() {
        let config = LiveConfig::new("gemini-2.0-flash-live-001")
            .with_field("generationConfig", json!({ "responseModalities": ["AUDIO"] }));
        let setup = setup_message(&config);

        assert_eq!(setup["setup"]["model"], "models/gemini-2.0-flash-live-001");
        assert_eq!(
            setup["setup"]["generationConfig"]["responseModalities"][0],
            "AUDIO"
        );
        assert_eq!(
            setup["setup"]["realtimeInputConfig"]["automaticActivityDetection"]
                ["silenceDurationMs"],
            100
        );
    }

    #[test]
    fn setup_keeps_client_realtime_config() {
        let config = LiveConfig::new("models/x").with_field(
            "realtimeInputConfig",
            json!({ "automaticActivityDetection": { "disabled": true } }),
        );
        let setup = setup_message(&config);
        assert_eq!(setup["setup"]["model"], "models/x");
        assert_eq!(
            setup["setup"]["realtimeInputConfig"]["automaticActivityDetection"]["disabled"],
            true
        );
    }

    #[test]
    fn realtime_audio_uses_blob_shape() {
        let input = RealtimeInput::Audio(Blob {
            mime_type: "audio/pcm;rate=16000".to_string(),
            data: "AAAA".to_string(),
        });
        assert_eq!(
            realtime_input(&input),
            json!({ "realtimeInput": { "audio": { "mimeType": "audio/pcm;rate=16000", "data": "AAAA" } } })
        );
    }

    #[test]
    fn client_content_wraps_parts_in_user_turn() {
        let msg = client_content(&[Part::text("hello")], false);
        assert_eq!(msg["clientContent"]["turns"][0]["role"], "user");
        assert_eq!(msg["clientContent"]["turns"][0]["parts"][0]["text"], "hello");
        assert_eq!(msg["clientContent"]["turnComplete"], false);
    }

    #[test]
    fn audio_parts_are_split_from_content() {
        let audio = STANDARD.encode([1u8, 0, 2, 0]);
        let frame = parse_server_message(json!({
            "serverContent": {
                "modelTurn": { "parts": [
                    { "text": "hi" },
                    { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": audio } }
                ]}
            }
        }));

        assert_eq!(
            frame.events,
            vec![
                UpstreamEvent::Content(json!({ "modelTurn": { "parts": [{ "text": "hi" }] } })),
                UpstreamEvent::Audio(vec![1, 0, 2, 0]),
            ]
        );
    }

    #[test]
    fn audio_only_turn_produces_no_content() {
        let audio = STANDARD.encode([0u8; 4]);
        let frame = parse_server_message(json!({
            "serverContent": { "modelTurn": { "parts": [
                { "inlineData": { "mimeType": "audio/pcm", "data": audio } }
            ]}}
        }));
        assert_eq!(frame.events, vec![UpstreamEvent::Audio(vec![0; 4])]);
    }

    #[test]
    fn interruption_and_turn_complete_follow_content() {
        let frame = parse_server_message(json!({
            "serverContent": { "interrupted": true, "turnComplete": true }
        }));
        assert_eq!(
            frame.events,
            vec![
                UpstreamEvent::Content(json!({ "interrupted": true, "turnComplete": true })),
                UpstreamEvent::Interrupted,
                UpstreamEvent::TurnComplete,
            ]
        );
    }

    #[test]
    fn setup_and_tool_messages() {
        let frame = parse_server_message(json!({ "setupComplete": {} }));
        assert!(frame.setup_complete);

        let frame = parse_server_message(json!({
            "toolCall": { "functionCalls": [{ "id": "1", "name": "lookup", "args": {} }] }
        }));
        assert!(matches!(&frame.events[..], [UpstreamEvent::ToolCall(_)]));

        let frame = parse_server_message(json!({ "toolCallCancellation": { "ids": ["1", "2"] } }));
        assert_eq!(
            frame.events,
            vec![UpstreamEvent::ToolCallCancellation(vec![
                "1".to_string(),
                "2".to_string()
            ])]
        );
    }

    #[test]
    fn close_reason_drops_error_prelude() {
        assert_eq!(
            clean_close_reason("[GoogleGenerativeAI Error]: ERROR] API key not valid"),
            Some("API key not valid".to_string())
        );
        assert_eq!(clean_close_reason("normal"), Some("normal".to_string()));
        assert_eq!(clean_close_reason("   "), None);
    }
}
