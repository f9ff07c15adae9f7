//! Delivery tracker: per-message delivery/seen ledger for direct messages.
//!
//! Process-local by design. Entries are created when a direct message is
//! dispatched and mutated on delivery/seen events; a restart forgets
//! in-flight state and the ledger rebuilds as new messages are sent.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use parley_shared::{MessageId, UserId};

/// Ledger entry for one direct message.
#[derive(Debug, Clone)]
pub struct DeliveryEntry {
    pub sender: UserId,
    pub receiver: UserId,
    pub delivered: bool,
    pub seen: bool,
    pub created_at: DateTime<Utc>,
    /// Monotonic insertion index; replay happens in this order.
    seq: u64,
}

/// Outcome of a delivery/seen transition.
#[derive(Debug, Clone, Copy)]
pub struct Transition {
    pub sender: UserId,
    /// Whether this call flipped the flag. Status events are emitted only
    /// on the first transition; repeats are idempotent no-ops.
    pub first: bool,
}

#[derive(Default)]
struct TrackerInner {
    entries: HashMap<MessageId, DeliveryEntry>,
    next_seq: u64,
}

#[derive(Clone, Default)]
pub struct DeliveryTracker {
    inner: Arc<Mutex<TrackerInner>>,
}

impl DeliveryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a freshly dispatched direct message.
    pub async fn track(&self, id: MessageId, sender: UserId, receiver: UserId) {
        let mut inner = self.inner.lock().await;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert(
            id,
            DeliveryEntry {
                sender,
                receiver,
                delivered: false,
                seen: false,
                created_at: Utc::now(),
                seq,
            },
        );
    }

    /// Mark a message delivered. Returns `None` for untracked ids.
    pub async fn mark_delivered(&self, id: MessageId) -> Option<Transition> {
        let mut inner = self.inner.lock().await;
        let entry = inner.entries.get_mut(&id)?;
        let first = !entry.delivered;
        entry.delivered = true;
        Some(Transition {
            sender: entry.sender,
            first,
        })
    }

    /// Mark a message seen. Seen implies delivered.
    pub async fn mark_seen(&self, id: MessageId) -> Option<Transition> {
        let mut inner = self.inner.lock().await;
        let entry = inner.entries.get_mut(&id)?;
        let first = !entry.seen;
        entry.delivered = true;
        entry.seen = true;
        Some(Transition {
            sender: entry.sender,
            first,
        })
    }

    /// Messages addressed to `receiver` that were never delivered, in
    /// dispatch order. Used to replay on reconnection.
    pub async fn undelivered_for(&self, receiver: UserId) -> Vec<MessageId> {
        let inner = self.inner.lock().await;
        let mut pending: Vec<(u64, MessageId)> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.receiver == receiver && !e.delivered)
            .map(|(id, e)| (e.seq, *id))
            .collect();
        pending.sort_unstable_by_key(|(seq, _)| *seq);
        pending.into_iter().map(|(_, id)| id).collect()
    }

    pub async fn get(&self, id: MessageId) -> Option<DeliveryEntry> {
        self.inner.lock().await.entries.get(&id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_delivered_transition_fires_once() {
        let tracker = DeliveryTracker::new();
        let id = MessageId::new();
        let sender = UserId::new();

        tracker.track(id, sender, UserId::new()).await;

        let t1 = tracker.mark_delivered(id).await.unwrap();
        assert!(t1.first);
        assert_eq!(t1.sender, sender);

        let t2 = tracker.mark_delivered(id).await.unwrap();
        assert!(!t2.first);
    }

    #[tokio::test]
    async fn test_seen_implies_delivered() {
        let tracker = DeliveryTracker::new();
        let id = MessageId::new();

        tracker.track(id, UserId::new(), UserId::new()).await;
        tracker.mark_seen(id).await.unwrap();

        let entry = tracker.get(id).await.unwrap();
        assert!(entry.delivered);
        assert!(entry.seen);
    }

    #[tokio::test]
    async fn test_untracked_message_is_none() {
        let tracker = DeliveryTracker::new();
        assert!(tracker.mark_delivered(MessageId::new()).await.is_none());
        assert!(tracker.mark_seen(MessageId::new()).await.is_none());
    }

    #[tokio::test]
    async fn test_undelivered_replay_order_and_filtering() {
        let tracker = DeliveryTracker::new();
        let receiver = UserId::new();
        let sender = UserId::new();

        let first = MessageId::new();
        let second = MessageId::new();
        let third = MessageId::new();
        tracker.track(first, sender, receiver).await;
        tracker.track(second, sender, receiver).await;
        tracker.track(third, sender, UserId::new()).await;

        tracker.mark_delivered(second).await.unwrap();

        // Only the receiver's undelivered messages, in dispatch order.
        assert_eq!(tracker.undelivered_for(receiver).await, vec![first]);
    }
}
