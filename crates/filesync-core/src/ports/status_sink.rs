//! Status notification port (driven/secondary port)
//!
//! A manager emits a [`StatusEvent`] after every state transition and
//! every per-file progress update. How the event reaches a user (push
//! channel, polling endpoint, log line) is entirely up to the sink.
//!
//! ## Design Notes
//!
//! - Delivery is fire-and-forget and must not block the run loop.
//! - Sinks must tolerate having no listeners.

use crate::domain::StatusEvent;

// ============================================================================
// IStatusSink trait
// ============================================================================

/// Port trait for publishing status-change notifications
pub trait IStatusSink: Send + Sync {
    /// Publishes one event
    ///
    /// # Arguments
    /// * `event` - Configuration id, running flag and the full status snapshot
    fn publish(&self, event: StatusEvent);
}

/// Sink that drops every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStatusSink;

impl IStatusSink for NullStatusSink {
    fn publish(&self, _event: StatusEvent) {}
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::domain::{ConfigId, SyncStatus};

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<StatusEvent>>,
    }

    impl IStatusSink for RecordingSink {
        fn publish(&self, event: StatusEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    #[test]
    fn test_sink_is_object_safe() {
        let sink: Box<dyn IStatusSink> = Box::new(RecordingSink::default());
        sink.publish(StatusEvent {
            config_id: ConfigId::new(1),
            running: true,
            status: SyncStatus::new(),
        });
    }

    #[test]
    fn test_recording_sink_keeps_order() {
        let sink = RecordingSink::default();
        for id in 1..=3 {
            sink.publish(StatusEvent {
                config_id: ConfigId::new(id),
                running: false,
                status: SyncStatus::new(),
            });
        }
        let ids: Vec<u64> = sink
            .events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.config_id.get())
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_null_sink_accepts_events() {
        NullStatusSink.publish(StatusEvent {
            config_id: ConfigId::new(1),
            running: false,
            status: SyncStatus::new(),
        });
    }
}
