//! Upstream Module - Verbindung zur Gemini Live API
//!
//! Dieses Modul kapselt eine Gemini Live Session pro Client:
//! - `LiveConnector` / `LiveLink` als Naht zum Transport (WebSocket oder Fake)
//! - `UpstreamAdapter` als Actor-Task, der Befehle in Reihenfolge abarbeitet
//! - Übersetzung der Server-Nachrichten in `UpstreamEvent`s

mod adapter;
mod gemini;
mod wire;

pub use adapter::{AdapterSettings, UpstreamAdapter};
pub use gemini::GeminiConnector;
pub use wire::{clean_close_reason, parse_server_message, setup_message, ServerFrame};

use crate::protocol::{LiveConfig, LogEntry};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("Server configuration error: API key missing.")]
    MissingApiKey,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Session not connected")]
    NotConnected,

    #[error("Failed to send message: {0}")]
    SendFailed(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Upstream adapter stopped")]
    AdapterStopped,
}

// ============================================================================
// EVENTS
// ============================================================================

/// Events einer Upstream-Session
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    /// Verbindung offen, Setup gesendet
    Opened,
    /// Verbindung beendet (auch bei explizitem Disconnect)
    Closed { reason: Option<String> },
    /// serverContent ohne Audio-Parts
    Content(Value),
    /// Rohes PCM, 16 bit LE, 24kHz
    Audio(Vec<u8>),
    ToolCall(Value),
    ToolCallCancellation(Vec<String>),
    SetupComplete {
        success: bool,
        error: Option<String>,
    },
    Interrupted,
    TurnComplete,
    Log(LogEntry),
    /// Verbindungsaufbau fehlgeschlagen, der Adapter hat sich beendet
    ConnectFailed { reconfigure: bool, details: String },
    /// Eine einzelne Nachricht konnte nicht gesendet werden
    CommandFailed {
        message_type: &'static str,
        details: String,
    },
}

impl UpstreamEvent {
    pub fn log(kind: &str, message: Value) -> Self {
        UpstreamEvent::Log(LogEntry {
            date: Utc::now().to_rfc3339(),
            kind: kind.to_string(),
            message,
        })
    }
}

// ============================================================================
// TRANSPORT TRAITS
// ============================================================================

/// Ein Frame von der Upstream-Verbindung
#[derive(Debug, Clone, PartialEq)]
pub enum LinkFrame {
    Message(Value),
    Closed { reason: Option<String> },
}

/// Eine offene bidirektionale Session
#[async_trait]
pub trait LiveLink: Send {
    async fn send(&mut self, message: Value) -> Result<(), UpstreamError>;

    /// `None` wenn der Stream ohne Close-Frame endet
    async fn recv(&mut self) -> Option<Result<LinkFrame, UpstreamError>>;

    async fn close(&mut self) -> Result<(), UpstreamError>;
}

/// Öffnet neue Sessions
#[async_trait]
pub trait LiveConnector: Send + Sync {
    async fn open(&self, config: &LiveConfig) -> Result<Box<dyn LiveLink>, UpstreamError>;
}
