//! Gateway Module - Client Sessions und WebSocket Server
//!
//! Jeder Client bekommt eine eigene Session (Task) mit eigenem Upstream-Adapter,
//! eigener Peer Connection und eigenem Pacer. Die Registry ist der einzige
//! gemeinsam genutzte Zustand.

mod registry;
mod server;
mod session;

pub use registry::{ClientId, SessionRegistry};
pub use server::serve;
pub use session::InboundFrame;

use crate::config::GatewayConfig;
use crate::image::{GeminiImageGenerator, ImageGenerator};
use crate::protocol::ServerMessage;
use crate::upstream::{GeminiConnector, LiveConnector};
use session::ClientSession;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

/// Gemeinsame, unveränderliche Abhängigkeiten aller Sessions
pub struct GatewayContext {
    pub config: GatewayConfig,
    pub connector: Arc<dyn LiveConnector>,
    pub images: Arc<dyn ImageGenerator>,
}

/// Einstiegspunkt: erzeugt Sessions für neue Client-Transporte
#[derive(Clone)]
pub struct Gateway {
    ctx: Arc<GatewayContext>,
    registry: SessionRegistry,
    sessions: TaskTracker,
}

/// Handle auf eine laufende Client Session
#[derive(Debug)]
pub struct SessionHandle {
    pub id: ClientId,
    pub cancel: CancellationToken,
    pub task: JoinHandle<()>,
}

impl Gateway {
    /// Gateway mit echtem Gemini-Upstream und REST-Bildgenerierung
    pub fn new(config: GatewayConfig) -> Self {
        let connector = Arc::new(GeminiConnector::new(
            config.live_url.clone(),
            config.api_key.clone(),
        ));
        let images = Arc::new(GeminiImageGenerator::new(
            config.api_base.clone(),
            config.image_model.clone(),
            config.api_key.clone(),
            config.image_output_dir.clone(),
        ));
        Self::with_components(config, connector, images)
    }

    pub fn with_components(
        config: GatewayConfig,
        connector: Arc<dyn LiveConnector>,
        images: Arc<dyn ImageGenerator>,
    ) -> Self {
        Self {
            ctx: Arc::new(GatewayContext {
                config,
                connector,
                images,
            }),
            registry: SessionRegistry::new(),
            sessions: TaskTracker::new(),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.ctx.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Startet eine Session für einen neuen Client-Transport
    ///
    /// `inbound` liefert die Frames des Clients; endet der Kanal, wird die
    /// Session abgebaut. Alle Antworten gehen an `outbound`.
    pub fn attach(
        &self,
        inbound: mpsc::UnboundedReceiver<InboundFrame>,
        outbound: mpsc::UnboundedSender<ServerMessage>,
    ) -> SessionHandle {
        let id = Uuid::new_v4();
        let cancel = self.registry.register(id);
        let (session, channels) =
            ClientSession::new(id, Arc::clone(&self.ctx), self.registry.clone(), outbound);
        let task = self
            .sessions
            .spawn(session.run(inbound, channels, cancel.clone()));
        tracing::info!(client_id = %id, active = self.registry.len(), "Client connected");

        SessionHandle { id, cancel, task }
    }

    /// Beendet alle laufenden Sessions und wartet auf deren Abbau
    ///
    /// Jede Session schließt Adapter und Peer Connection mit je
    /// `upstream_close_timeout`; danach wird nicht länger gewartet.
    pub async fn shutdown(&self) {
        tracing::info!(active = self.registry.len(), "Shutting down all client sessions");
        self.registry.cancel_all();
        self.sessions.close();

        if tokio::time::timeout(self.teardown_budget(), self.sessions.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                remaining = self.sessions.len(),
                "Client sessions did not finish teardown in time"
            );
        }
    }

    fn teardown_budget(&self) -> Duration {
        self.ctx.config.upstream_close_timeout * 2 + Duration::from_millis(500)
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("config", &self.ctx.config)
            .field("sessions", &self.registry.len())
            .finish()
    }
}
