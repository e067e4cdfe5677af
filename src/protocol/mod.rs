//! Protokoll zwischen Mobile-Client und Gateway
//!
//! - Envelope-Nachrichten in beide Richtungen (`messages`)
//! - Gemini Live Datentypen, die durchgereicht werden (`live`)

mod live;
mod messages;

pub use live::{Blob, FunctionResponse, IceCandidateJson, LiveConfig, Part, RealtimeInput, ToolResponse};
pub use messages::*;
