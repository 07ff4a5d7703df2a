use std::fmt;

use futures::{Stream, StreamExt};
use reel_model::QueueEvent;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

/// Default channel capacity for queue observers.
pub const DEFAULT_QUEUE_EVENT_CAPACITY: usize = 256;

/// Sink for queue-state events. Publishing never blocks and never fails.
pub trait QueueEventPublisher: Send + Sync {
    fn publish(&self, event: QueueEvent);
}

/// In-process fan-out of queue events to any number of observers. Slow
/// observers lag and lose the oldest events instead of stalling the
/// scheduler.
#[derive(Clone)]
pub struct QueueEventBus {
    sender: broadcast::Sender<QueueEvent>,
}

impl fmt::Debug for QueueEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueEventBus")
            .field("receivers", &self.sender.receiver_count())
            .finish()
    }
}

impl Default for QueueEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_EVENT_CAPACITY)
    }
}

impl QueueEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.sender.subscribe()
    }

    /// Event stream that skips over lagged gaps.
    pub fn stream(&self) -> impl Stream<Item = QueueEvent> + Send + 'static {
        BroadcastStream::new(self.subscribe()).filter_map(|item| async move {
            match item {
                Ok(event) => Some(event),
                Err(err) => {
                    warn!(target: "reel::queue", error = %err, "queue observer lagged");
                    None
                }
            }
        })
    }
}

impl QueueEventPublisher for QueueEventBus {
    fn publish(&self, event: QueueEvent) {
        let _ = self.sender.send(event);
    }
}
