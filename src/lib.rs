//! Live Gateway - Echtzeit-Gateway zwischen Mobile Clients und Gemini Live
//!
//! Ein WebSocket-Server mit:
//! - JSON Envelope Protokoll zum Client
//! - Upstream-Session zu Gemini Live pro Client
//! - WebRTC für Sprache in beide Richtungen (Opus, 48kHz)
//! - Resampling, Framing und 10ms-Pacing des Assistenten-Audios

pub mod audio;
pub mod config;
pub mod emitter;
pub mod gateway;
pub mod image;
pub mod protocol;
pub mod signaling;
pub mod upstream;

pub use config::GatewayConfig;
pub use gateway::{serve, Gateway};

// ============================================================================
// LOGGING
// ============================================================================

/// Initialisiert das Logging; `RUST_LOG` ergänzt die Standard-Direktiven
pub fn init_logging() {
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    for directive in ["live_gateway=debug", "webrtc=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    // Ein zweiter Aufruf (z.B. in Tests) ist kein Fehler
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
