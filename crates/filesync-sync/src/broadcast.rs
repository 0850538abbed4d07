//! Broadcast status sink
//!
//! Fans [`StatusEvent`]s out to any number of async subscribers. Slow
//! subscribers lag and lose the oldest events rather than blocking the
//! run loops.

use filesync_core::domain::StatusEvent;
use filesync_core::ports::IStatusSink;
use tokio::sync::broadcast;
use tracing::trace;

/// Events buffered per subscriber before the oldest are dropped
pub const DEFAULT_CAPACITY: usize = 256;

/// [`IStatusSink`] backed by a tokio broadcast channel
#[derive(Debug, Clone)]
pub struct BroadcastStatusSink {
    sender: broadcast::Sender<StatusEvent>,
}

impl Default for BroadcastStatusSink {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl BroadcastStatusSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// New receiver that sees every event published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl IStatusSink for BroadcastStatusSink {
    fn publish(&self, event: StatusEvent) {
        if self.sender.send(event).is_err() {
            trace!("No status subscribers");
        }
    }
}
