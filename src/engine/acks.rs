//! Acknowledgment tracking
//!
//! Each at-least-once send gets its own pending record keyed by message id,
//! so several sends may be in flight and each resolves independently.

use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use crate::engine::transport::{MessageId, TransportError};

#[derive(Error, Debug)]
pub enum AckError {
    #[error("No acknowledgment for message {id} after {waited:?}")]
    AckTimeout { id: MessageId, waited: Duration },

    #[error("Transport returned no message id for an at-least-once send")]
    MissingMessageId,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Clone, Copy)]
struct PendingAck {
    sent_at: Instant,
    acked: bool,
}

#[derive(Debug, Default)]
pub struct AckTracker {
    pending: HashMap<MessageId, PendingAck>,
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, id: MessageId) {
        self.pending.insert(
            id,
            PendingAck {
                sent_at: Instant::now(),
                acked: false,
            },
        );
    }

    /// Record an inbound ack. Returns false for ids nobody is waiting on.
    pub fn resolve(&mut self, id: MessageId) -> bool {
        match self.pending.get_mut(&id) {
            Some(pending) => {
                pending.acked = true;
                debug!(message_id = id, elapsed = ?pending.sent_at.elapsed(), "Ack received");
                true
            }
            None => {
                debug!(message_id = id, "Ignoring ack for untracked message");
                false
            }
        }
    }

    /// Remove `id` if its ack has arrived
    pub fn take(&mut self, id: MessageId) -> bool {
        if self.pending.get(&id).is_some_and(|p| p.acked) {
            self.pending.remove(&id);
            true
        } else {
            false
        }
    }

    /// Stop waiting on `id`; a late ack is then ignored
    pub fn forget(&mut self, id: MessageId) {
        self.pending.remove(&id);
    }

    /// Drop records older than `max_age`, acked or not. Returns how many went.
    pub fn sweep(&mut self, max_age: Duration) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, pending| pending.sent_at.elapsed() < max_age);
        let swept = before - self.pending.len();
        if swept > 0 {
            debug!(swept, "Dropped stale ack records");
        }
        swept
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn is_pending(&self, id: MessageId) -> bool {
        self.pending.get(&id).is_some_and(|p| !p.acked)
    }

    pub fn in_flight(&self) -> usize {
        self.pending.values().filter(|p| !p.acked).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_by_id() {
        let mut tracker = AckTracker::new();
        tracker.track(1);
        tracker.track(2);
        assert_eq!(tracker.in_flight(), 2);

        assert!(tracker.resolve(2));
        assert!(!tracker.take(1));
        assert!(tracker.take(2));
        assert!(tracker.is_pending(1));
        assert_eq!(tracker.in_flight(), 1);
    }

    #[test]
    fn test_unknown_ack_ignored() {
        let mut tracker = AckTracker::new();
        tracker.track(5);
        assert!(!tracker.resolve(6));
        assert!(tracker.is_pending(5));
    }

    #[test]
    fn test_forget_drops_late_ack() {
        let mut tracker = AckTracker::new();
        tracker.track(9);
        tracker.forget(9);
        assert!(!tracker.resolve(9));
        assert_eq!(tracker.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_drops_unawaited_records() {
        let mut tracker = AckTracker::new();
        tracker.track(1);
        tracker.track(2);
        assert!(tracker.resolve(1));

        tokio::time::advance(Duration::from_secs(3)).await;
        tracker.track(3);
        assert_eq!(tracker.sweep(Duration::from_secs(2)), 2);
        assert_eq!(tracker.len(), 1);
        assert!(tracker.is_pending(3));
    }
}
