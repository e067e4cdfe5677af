//! Audio Pacer - getaktete Ausgabe auf den WebRTC Track
//!
//! Gemini liefert Audio in Schüben. Der Pacer puffert die 10ms Frames in
//! einer FIFO-Queue und gibt sie in Echtzeit an den Track weiter. Bei einer
//! Unterbrechung (Barge-In) wird die Queue sofort geleert.
//!
//! Pro Session läuft höchstens eine Drain-Schleife. Jede Schleife gehört zu
//! einer Generation; nach `interrupt()` liefert eine alte Schleife nie wieder
//! einen Frame, auch wenn direkt danach neue Frames eingereiht werden.

use super::{AudioError, AudioFrame};
use crate::emitter::Emitter;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Ziel für getaktete Frames (der ausgehende Track)
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn deliver(&self, frame: &AudioFrame) -> Result<(), AudioError>;
}

/// Events vom Pacer an die Session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacerEvent {
    /// Erster Frame eines Schubs wird ausgegeben
    SpeakingStarted,
    /// Queue leer, Schleife beendet
    Drained { frames: usize },
}

#[derive(Default)]
struct PacerState {
    queue: VecDeque<AudioFrame>,
    active: bool,
    generation: u64,
    task: Option<JoinHandle<()>>,
}

/// Getaktete FIFO-Ausgabe mit Barge-In
pub struct AudioPacer {
    state: Arc<Mutex<PacerState>>,
    sink: Arc<dyn FrameSink>,
    events: Emitter<PacerEvent>,
}

impl AudioPacer {
    pub fn new(sink: Arc<dyn FrameSink>, events: Emitter<PacerEvent>) -> Self {
        Self {
            state: Arc::new(Mutex::new(PacerState::default())),
            sink,
            events,
        }
    }

    /// Reiht Frames ein und startet die Drain-Schleife, falls sie nicht läuft
    pub fn enqueue(&self, frames: Vec<AudioFrame>) {
        if frames.is_empty() {
            return;
        }
        let mut state = self.state.lock();
        state.queue.extend(frames);
        if state.active {
            return;
        }

        state.active = true;
        state.generation += 1;
        let generation = state.generation;
        tracing::trace!(generation, queued = state.queue.len(), "Pacer started");

        let task = tokio::spawn(drain(
            Arc::clone(&self.state),
            Arc::clone(&self.sink),
            self.events.clone(),
            generation,
        ));
        state.task = Some(task);
    }

    /// Leert die Queue sofort; eine schlafende Schleife beendet sich beim Aufwachen
    pub fn interrupt(&self) {
        let mut state = self.state.lock();
        let dropped = state.queue.len();
        state.queue.clear();
        state.active = false;
        state.generation += 1;
        // Handle bleibt nicht liegen, die Schleife beendet sich selbst
        state.task = None;
        if dropped > 0 {
            tracing::debug!(dropped, "Pacer interrupted");
        }
    }

    /// Wie `interrupt()`, bricht zusätzlich die laufende Schleife ab
    pub fn stop(&self) {
        let task = {
            let mut state = self.state.lock();
            state.queue.clear();
            state.active = false;
            state.generation += 1;
            state.task.take()
        };
        if let Some(task) = task {
            task.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }

    pub fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }
}

impl Drop for AudioPacer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for AudioPacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("AudioPacer")
            .field("active", &state.active)
            .field("queued", &state.queue.len())
            .field("generation", &state.generation)
            .finish()
    }
}

enum Step {
    Deliver(AudioFrame),
    Stop,
}

fn next_frame(state: &Mutex<PacerState>, generation: u64) -> Step {
    let mut state = state.lock();
    if !state.active || state.generation != generation {
        return Step::Stop;
    }
    match state.queue.pop_front() {
        Some(frame) => Step::Deliver(frame),
        None => {
            state.active = false;
            state.task = None;
            Step::Stop
        }
    }
}

/// Prüft nach einer Auslieferung, ob weitergeschlafen werden soll
fn should_continue(state: &Mutex<PacerState>, generation: u64) -> bool {
    let mut state = state.lock();
    if !state.active || state.generation != generation {
        return false;
    }
    if state.queue.is_empty() {
        state.active = false;
        state.task = None;
        return false;
    }
    true
}

async fn drain(
    state: Arc<Mutex<PacerState>>,
    sink: Arc<dyn FrameSink>,
    events: Emitter<PacerEvent>,
    generation: u64,
) {
    let mut delivered = 0usize;

    loop {
        let frame = match next_frame(&state, generation) {
            Step::Deliver(frame) => frame,
            Step::Stop => break,
        };

        if delivered == 0 {
            events.emit(PacerEvent::SpeakingStarted);
        }

        if let Err(e) = sink.deliver(&frame).await {
            tracing::warn!("Pacer delivery failed: {}", e);
            let mut state = state.lock();
            if state.generation == generation {
                state.queue.clear();
                state.active = false;
                state.task = None;
            }
            break;
        }
        delivered += 1;

        if !should_continue(&state, generation) {
            break;
        }
        tokio::time::sleep(frame.duration).await;
    }

    if delivered > 0 {
        events.emit(PacerEvent::Drained { frames: delivered });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::Tagged;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct RecordingSink {
        delivered: Mutex<Vec<i16>>,
        fail: bool,
    }

    #[async_trait]
    impl FrameSink for RecordingSink {
        async fn deliver(&self, frame: &AudioFrame) -> Result<(), AudioError> {
            if self.fail {
                return Err(AudioError::SinkClosed("track gone".to_string()));
            }
            self.delivered.lock().push(frame.samples[0]);
            Ok(())
        }
    }

    fn frames(ids: std::ops::Range<i16>) -> Vec<AudioFrame> {
        ids.map(|id| AudioFrame::new(vec![id; 480], 48_000)).collect()
    }

    fn pacer(
        sink: Arc<RecordingSink>,
    ) -> (AudioPacer, mpsc::UnboundedReceiver<Tagged<PacerEvent>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (AudioPacer::new(sink, Emitter::new(1, tx)), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn frames_are_delivered_in_order() {
        let sink = Arc::new(RecordingSink::default());
        let (pacer, _events) = pacer(Arc::clone(&sink));

        pacer.enqueue(frames(0..5));
        pacer.enqueue(frames(5..8));
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(*sink.delivered.lock(), (0..8).collect::<Vec<i16>>());
        assert!(!pacer.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn delivery_is_paced_at_frame_duration() {
        let sink = Arc::new(RecordingSink::default());
        let (pacer, _events) = pacer(Arc::clone(&sink));

        pacer.enqueue(frames(0..10));
        tokio::time::sleep(Duration::from_millis(35)).await;

        // t = 0, 10, 20, 30
        assert_eq!(sink.delivered.lock().len(), 4);
        assert!(pacer.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn interrupt_drops_everything_queued() {
        let sink = Arc::new(RecordingSink::default());
        let (pacer, _events) = pacer(Arc::clone(&sink));

        pacer.enqueue(frames(0..10));
        tokio::time::sleep(Duration::from_millis(15)).await;
        pacer.interrupt();
        assert_eq!(pacer.queued(), 0);
        assert!(!pacer.is_active());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(*sink.delivered.lock(), vec![0, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_loop_never_delivers_again() {
        let sink = Arc::new(RecordingSink::default());
        let (pacer, _events) = pacer(Arc::clone(&sink));

        pacer.enqueue(frames(0..10));
        tokio::time::sleep(Duration::from_millis(5)).await;
        pacer.interrupt();
        pacer.enqueue(frames(100..103));
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(*sink.delivered.lock(), vec![0, 100, 101, 102]);
    }

    #[tokio::test(start_paused = true)]
    async fn speaking_is_announced_once_per_burst() {
        let sink = Arc::new(RecordingSink::default());
        let (pacer, mut events) = pacer(Arc::clone(&sink));

        pacer.enqueue(frames(0..3));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut received = Vec::new();
        while let Ok(tagged) = events.try_recv() {
            received.push(tagged.event);
        }
        assert_eq!(
            received,
            vec![PacerEvent::SpeakingStarted, PacerEvent::Drained { frames: 3 }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failing_sink_clears_the_queue() {
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..Default::default()
        });
        let (pacer, _events) = pacer(Arc::clone(&sink));

        pacer.enqueue(frames(0..5));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(pacer.queued(), 0);
        assert!(!pacer.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_aborts_a_running_loop() {
        let sink = Arc::new(RecordingSink::default());
        let (pacer, _events) = pacer(Arc::clone(&sink));

        pacer.enqueue(frames(0..10));
        tokio::time::sleep(Duration::from_millis(5)).await;
        pacer.stop();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(*sink.delivered.lock(), vec![0]);
    }
}
