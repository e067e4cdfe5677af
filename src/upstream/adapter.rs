//! Upstream Adapter - eine Gemini Live Session als Actor-Task
//!
//! Die Session spricht den Adapter nur über einen Befehlskanal an und
//! blockiert nie. Befehle werden strikt in Reihenfolge abgearbeitet, ein
//! `send` direkt nach `connect` landet also auf der neuen Verbindung.
//! Der Task endet nach einem Close oder einem fehlgeschlagenen Connect.

use super::wire::{self, client_content, realtime_input, setup_message, tool_response};
use super::{LinkFrame, LiveConnector, LiveLink, UpstreamError, UpstreamEvent};
use crate::emitter::Emitter;
use crate::protocol::{LiveConfig, Part, RealtimeInput, ToolResponse};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Zeitverhalten eines Adapters
#[derive(Debug, Clone, Copy)]
pub struct AdapterSettings {
    pub reconfigure_delay: Duration,
    pub close_timeout: Duration,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            reconfigure_delay: Duration::from_millis(100),
            close_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug)]
enum Command {
    Connect(LiveConfig),
    Send { parts: Vec<Part>, turn_complete: bool },
    RealtimeInput(RealtimeInput),
    ToolResponse(ToolResponse),
    Reconfigure(LiveConfig),
    Disconnect,
}

impl Command {
    fn message_type(&self) -> &'static str {
        match self {
            Command::Connect(_) => "CONNECT_GEMINI",
            Command::Send { .. } => "SEND_MESSAGE",
            Command::RealtimeInput(_) => "SEND_REALTIME_INPUT",
            Command::ToolResponse(_) => "SEND_TOOL_RESPONSE",
            Command::Reconfigure(_) => "UPDATE_CONFIG",
            Command::Disconnect => "DISCONNECT_GEMINI",
        }
    }
}

// ============================================================================
// ADAPTER HANDLE
// ============================================================================

/// Handle auf einen laufenden Adapter-Task
pub struct UpstreamAdapter {
    id: u64,
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl UpstreamAdapter {
    /// Startet den Actor; Events tragen die Identität des Emitters
    pub fn spawn(
        connector: Arc<dyn LiveConnector>,
        settings: AdapterSettings,
        events: Emitter<UpstreamEvent>,
    ) -> Self {
        let id = events.source();
        let (commands, rx) = mpsc::unbounded_channel();
        let actor = AdapterActor {
            id,
            connector,
            settings,
            events,
            link: None,
            setup_done: false,
        };
        let task = tokio::spawn(actor.run(rx));
        Self { id, commands, task }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn connect(&self, config: LiveConfig) -> Result<(), UpstreamError> {
        self.command(Command::Connect(config))
    }

    pub fn send(&self, parts: Vec<Part>, turn_complete: bool) -> Result<(), UpstreamError> {
        self.command(Command::Send {
            parts,
            turn_complete,
        })
    }

    pub fn send_realtime_input(&self, input: RealtimeInput) -> Result<(), UpstreamError> {
        self.command(Command::RealtimeInput(input))
    }

    pub fn send_tool_response(&self, response: ToolResponse) -> Result<(), UpstreamError> {
        self.command(Command::ToolResponse(response))
    }

    /// Trennt, wartet kurz und verbindet mit der neuen Konfiguration
    pub fn reconfigure(&self, config: LiveConfig) -> Result<(), UpstreamError> {
        self.command(Command::Reconfigure(config))
    }

    pub fn disconnect(&self) -> Result<(), UpstreamError> {
        self.command(Command::Disconnect)
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Beendet den Adapter; hängt das Schließen länger als `timeout`,
    /// wird der Task abgebrochen
    pub async fn shutdown(self, timeout: Duration) {
        let Self { id, commands, task } = self;
        let _ = commands.send(Command::Disconnect);
        drop(commands);

        let abort = task.abort_handle();
        if tokio::time::timeout(timeout, task).await.is_err() {
            tracing::warn!(adapter = id, "Upstream adapter did not stop in time, aborting");
            abort.abort();
        }
    }

    fn command(&self, command: Command) -> Result<(), UpstreamError> {
        self.commands
            .send(command)
            .map_err(|_| UpstreamError::AdapterStopped)
    }
}

impl std::fmt::Debug for UpstreamAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamAdapter")
            .field("id", &self.id)
            .field("finished", &self.is_finished())
            .finish()
    }
}

// ============================================================================
// ACTOR
// ============================================================================

enum Flow {
    Continue,
    Exit,
}

struct AdapterActor {
    id: u64,
    connector: Arc<dyn LiveConnector>,
    settings: AdapterSettings,
    events: Emitter<UpstreamEvent>,
    link: Option<Box<dyn LiveLink>>,
    setup_done: bool,
}

impl AdapterActor {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        tracing::debug!(adapter = self.id, "Upstream adapter started");

        loop {
            let flow = tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        // Handle fallen gelassen
                        self.close_link().await;
                        Flow::Exit
                    }
                },
                frame = next_frame(&mut self.link) => self.handle_frame(frame),
            };

            if let Flow::Exit = flow {
                break;
            }
        }

        tracing::debug!(adapter = self.id, "Upstream adapter stopped");
    }

    async fn handle_command(&mut self, command: Command) -> Flow {
        let message_type = command.message_type();

        match command {
            Command::Connect(config) => {
                if self.link.is_some() {
                    self.close_link().await;
                }
                self.open(&config, false).await
            }
            Command::Reconfigure(config) => {
                tracing::info!(adapter = self.id, model = %config.model, "Reconfiguring Gemini session");
                self.close_link().await;
                tokio::time::sleep(self.settings.reconfigure_delay).await;
                self.open(&config, true).await
            }
            Command::Disconnect => {
                self.close_link().await;
                self.events
                    .emit(UpstreamEvent::log("client.close", json!("Disconnected")));
                self.events.emit(UpstreamEvent::Closed { reason: None });
                Flow::Exit
            }
            Command::Send {
                parts,
                turn_complete,
            } => {
                let message = client_content(&parts, turn_complete);
                self.forward(message_type, "client.send", message).await
            }
            Command::RealtimeInput(input) => {
                let message = realtime_input(&input);
                self.forward(message_type, "client.realtimeInput", message)
                    .await
            }
            Command::ToolResponse(response) => {
                let message = tool_response(&response);
                self.forward(message_type, "client.toolResponse", message)
                    .await
            }
        }
    }

    async fn open(&mut self, config: &LiveConfig, reconfigure: bool) -> Flow {
        self.setup_done = false;

        let result = async {
            let mut link = self.connector.open(config).await?;
            link.send(setup_message(config)).await?;
            Ok::<_, UpstreamError>(link)
        }
        .await;

        match result {
            Ok(link) => {
                tracing::info!(adapter = self.id, model = %config.model, "Gemini session opened");
                self.link = Some(link);
                self.events.emit(UpstreamEvent::Opened);
                Flow::Continue
            }
            Err(e) => {
                tracing::error!(adapter = self.id, "Failed to open Gemini session: {}", e);
                self.events.emit(UpstreamEvent::log("error", json!(e.to_string())));
                self.events.emit(UpstreamEvent::ConnectFailed {
                    reconfigure,
                    details: e.to_string(),
                });
                Flow::Exit
            }
        }
    }

    async fn forward(&mut self, message_type: &'static str, log_kind: &str, message: Value) -> Flow {
        let Some(link) = self.link.as_mut() else {
            self.events.emit(UpstreamEvent::CommandFailed {
                message_type,
                details: UpstreamError::NotConnected.to_string(),
            });
            return Flow::Continue;
        };

        let logged = log_payload(&message);
        match link.send(message).await {
            Ok(()) => {
                self.events.emit(UpstreamEvent::log(log_kind, logged));
            }
            Err(e) => {
                tracing::warn!(adapter = self.id, "Failed to forward {}: {}", message_type, e);
                self.events.emit(UpstreamEvent::CommandFailed {
                    message_type,
                    details: e.to_string(),
                });
            }
        }
        Flow::Continue
    }

    fn handle_frame(&mut self, frame: Option<Result<LinkFrame, UpstreamError>>) -> Flow {
        match frame {
            Some(Ok(LinkFrame::Message(message))) => {
                let parsed = wire::parse_server_message(message);
                if parsed.setup_complete {
                    self.setup_done = true;
                }
                for event in parsed.events {
                    self.events.emit(event);
                }
                Flow::Continue
            }
            Some(Ok(LinkFrame::Closed { reason })) => self.link_closed(reason),
            // Ein unlesbarer Frame beendet die Session nicht
            Some(Err(UpstreamError::Protocol(details))) => {
                tracing::warn!(adapter = self.id, "Dropping malformed Gemini frame: {}", details);
                self.events.emit(UpstreamEvent::log("error", json!(details)));
                Flow::Continue
            }
            Some(Err(e)) => {
                tracing::warn!(adapter = self.id, "Gemini connection error: {}", e);
                self.events.emit(UpstreamEvent::log("error", json!(e.to_string())));
                self.link_closed(Some(e.to_string()))
            }
            None => self.link_closed(None),
        }
    }

    fn link_closed(&mut self, reason: Option<String>) -> Flow {
        tracing::info!(adapter = self.id, reason = ?reason, "Gemini session closed");
        self.link = None;
        if !self.setup_done {
            self.events.emit(UpstreamEvent::SetupComplete {
                success: false,
                error: Some(
                    reason
                        .clone()
                        .unwrap_or_else(|| "Connection closed before setup completed".to_string()),
                ),
            });
        }
        self.events.emit(UpstreamEvent::Closed { reason });
        Flow::Exit
    }

    /// Schließt die aktuelle Verbindung ohne Closed-Event
    async fn close_link(&mut self) {
        let Some(mut link) = self.link.take() else {
            return;
        };
        match tokio::time::timeout(self.settings.close_timeout, link.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(adapter = self.id, "Error while closing link: {}", e),
            Err(_) => tracing::warn!(adapter = self.id, "Closing Gemini link timed out"),
        }
    }
}

/// Wartet auf den nächsten Frame, ohne Verbindung nie
async fn next_frame(
    link: &mut Option<Box<dyn LiveLink>>,
) -> Option<Result<LinkFrame, UpstreamError>> {
    match link.as_mut() {
        Some(link) => link.recv().await,
        None => std::future::pending().await,
    }
}

/// Audio-Daten werden für Logs gekürzt
fn log_payload(message: &Value) -> Value {
    let audio_len = message
        .pointer("/realtimeInput/audio/data")
        .and_then(Value::as_str)
        .map(str::len);
    match audio_len {
        Some(len) => json!({ "realtimeInput": { "audio": { "bytesBase64": len } } }),
        None => message.clone(),
    }
}
