//! Registry aller verbundenen Clients
//!
//! Die einzige gemeinsam genutzte Struktur des Gateways. Sie wird nur beim
//! Anlegen und Beenden einer Session angefasst; der Zustand einer Session
//! selbst gehört ausschließlich ihrem Task.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub type ClientId = Uuid;

#[derive(Debug, Clone)]
struct SessionEntry {
    cancel: CancellationToken,
    connected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<ClientId, SessionEntry>>>,
    root: CancellationToken,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Legt einen neuen Eintrag an und gibt dessen Cancel-Token zurück
    pub fn register(&self, id: ClientId) -> CancellationToken {
        let cancel = self.root.child_token();
        self.sessions.write().insert(
            id,
            SessionEntry {
                cancel: cancel.clone(),
                connected_at: Utc::now(),
            },
        );
        tracing::debug!(client_id = %id, active = self.len(), "Session registered");
        cancel
    }

    /// Entfernt den Eintrag und löst dessen Token aus; `false` wenn er nicht existierte
    pub fn remove(&self, id: &ClientId) -> bool {
        let removed = self.sessions.write().remove(id);
        if let Some(entry) = &removed {
            entry.cancel.cancel();
            let duration = Utc::now() - entry.connected_at;
            tracing::debug!(
                client_id = %id,
                seconds = duration.num_seconds(),
                "Session removed"
            );
        }
        removed.is_some()
    }

    pub fn contains(&self, id: &ClientId) -> bool {
        self.sessions.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Beendet alle Sessions (Shutdown)
    pub fn cancel_all(&self) {
        self.root.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_remove() {
        let registry = SessionRegistry::new();
        let id = Uuid::new_v4();

        let token = registry.register(id);
        let other = registry.register(Uuid::new_v4());
        assert!(registry.contains(&id));
        assert_eq!(registry.len(), 2);

        assert!(registry.remove(&id));
        assert!(!registry.remove(&id));
        assert!(token.is_cancelled());
        assert!(!other.is_cancelled());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn cancel_all_reaches_every_session() {
        let registry = SessionRegistry::new();
        let a = registry.register(Uuid::new_v4());
        let b = registry.register(Uuid::new_v4());

        registry.cancel_all();
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
    }
}
