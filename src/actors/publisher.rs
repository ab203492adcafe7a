//! Publisher - best-effort fan-out of score events
//!
//! Producers push into an unbounded queue so publishing never waits on
//! subscribers. A forwarding task drains the queue into a broadcast channel;
//! subscribers that fall behind lose events (`RecvError::Lagged`).
//!
//! ```text
//! CollectorRun ─┐
//! Aggregator  ──┼─> unbounded queue ─> forwarder ─> broadcast ─> [websocket, ...]
//! Scheduler   ──┘
//! ```

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, trace};

use super::messages::ScoreEvent;

/// Default capacity of the broadcast channel
pub const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct Publisher {
    queue: mpsc::UnboundedSender<ScoreEvent>,
    events: broadcast::Sender<ScoreEvent>,
}

impl Publisher {
    /// Spawn the forwarding task and return a publisher
    pub fn spawn(capacity: usize) -> Self {
        let (queue, mut queue_rx) = mpsc::unbounded_channel::<ScoreEvent>();
        let (events, _) = broadcast::channel(capacity);

        let forward = events.clone();
        tokio::spawn(async move {
            while let Some(event) = queue_rx.recv().await {
                match forward.send(event) {
                    Ok(receivers) => trace!("forwarded event to {receivers} receivers"),
                    Err(_) => trace!("no receivers for event (this is OK)"),
                }
            }
            debug!("publisher queue closed");
        });

        Self { queue, events }
    }

    /// Enqueue an event, never blocks
    pub fn publish(&self, event: ScoreEvent) {
        if self.queue.send(event).is_err() {
            debug!("publisher forwarding task is gone, dropping event");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScoreEvent> {
        self.events.subscribe()
    }
}
