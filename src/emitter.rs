//! Typisierte Event-Kanäle zwischen Komponenten und Session-Task
//!
//! Jede Komponente (Upstream-Adapter, Peer Connection, Pacer) bekommt einen
//! `Emitter` mit ihrer Identität. Die Session erkennt daran, ob ein Event
//! von der aktuellen oder einer bereits ersetzten Instanz stammt.

use tokio::sync::mpsc;

/// Event mit der Identität der Quelle
#[derive(Debug, Clone, PartialEq)]
pub struct Tagged<E> {
    pub source: u64,
    pub event: E,
}

/// Sendet Events einer bestimmten Quelle an die Session
pub struct Emitter<E> {
    source: u64,
    tx: mpsc::UnboundedSender<Tagged<E>>,
}

impl<E> Emitter<E> {
    pub fn new(source: u64, tx: mpsc::UnboundedSender<Tagged<E>>) -> Self {
        Self { source, tx }
    }

    pub fn source(&self) -> u64 {
        self.source
    }

    /// Gibt `false` zurück, wenn die Session nicht mehr zuhört
    pub fn emit(&self, event: E) -> bool {
        self.tx
            .send(Tagged {
                source: self.source,
                event,
            })
            .is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<E> Clone for Emitter<E> {
    fn clone(&self) -> Self {
        Self {
            source: self.source,
            tx: self.tx.clone(),
        }
    }
}

impl<E> std::fmt::Debug for Emitter<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("source", &self.source)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_carry_their_source() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let first = Emitter::new(1, tx.clone());
        let second = Emitter::new(2, tx);

        assert!(first.emit("a"));
        assert!(second.emit("b"));

        assert_eq!(rx.try_recv().unwrap(), Tagged { source: 1, event: "a" });
        assert_eq!(rx.try_recv().unwrap(), Tagged { source: 2, event: "b" });
    }

    #[test]
    fn emit_reports_dropped_receiver() {
        let (tx, rx) = mpsc::unbounded_channel::<Tagged<u8>>();
        let emitter = Emitter::new(7, tx);
        drop(rx);
        assert!(!emitter.emit(1));
        assert!(emitter.is_closed());
    }
}
