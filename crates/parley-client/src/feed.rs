//! Optimistic message feed.
//!
//! The feed is the visible message list for one conversation view. Outgoing
//! messages are appended as pending entries before any network call and
//! resolved against server confirmations:
//!
//! - the send ack echoes the client's local id, so ack resolution is exact;
//! - broadcasts do not carry the local id, so they resolve by best-effort
//!   matching on (sender, text, target) against the oldest pending entry.
//!
//! Invariants: the feed never contains two entries with the same
//! authoritative id, and each confirmation resolves at most one pending
//! entry, so two identical back-to-back sends stay two distinct messages.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use parley_shared::wire::{DeliveryState, SendAck};
use parley_shared::{GroupId, MediaItem, MessageId, MessageView, UserId};

/// A not-yet-confirmed outgoing message.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocalMessage {
    /// Client-generated, process-unique correlation id.
    pub local_id: String,
    pub sender: UserId,
    pub receiver: Option<UserId>,
    pub group: Option<GroupId>,
    pub text: String,
    pub media: Vec<MediaItem>,
    pub reply_to: Option<MessageId>,
    pub failed: bool,
    pub created_at: DateTime<Utc>,
}

/// One entry in the visible message list.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum FeedEntry {
    Confirmed(MessageView),
    Local(LocalMessage),
}

impl FeedEntry {
    pub fn is_pending(&self) -> bool {
        matches!(self, FeedEntry::Local(local) if !local.failed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, FeedEntry::Local(local) if local.failed)
    }
}

/// Content of an outgoing message, captured before the network call.
#[derive(Debug, Clone, Default)]
pub struct SendDraft {
    pub sender: UserId,
    pub receiver: Option<UserId>,
    pub group: Option<GroupId>,
    pub text: String,
    pub media: Vec<MediaItem>,
    pub reply_to: Option<MessageId>,
}

/// What a user-initiated retry should resubmit. Binary attachments were
/// consumed by the failed request and cannot be reattached; they are
/// returned in `dropped_media` so the caller can surface that to the user
/// rather than silently swallowing it.
#[derive(Debug, Clone)]
pub struct RetrySend {
    pub local_id: String,
    pub sender: UserId,
    pub receiver: Option<UserId>,
    pub group: Option<GroupId>,
    pub text: String,
    pub reply_to: Option<MessageId>,
    pub dropped_media: Vec<MediaItem>,
}

/// The reconciled message list plus per-message delivery status markers.
#[derive(Debug, Default)]
pub struct MessageFeed {
    entries: Vec<FeedEntry>,
    statuses: std::collections::HashMap<MessageId, DeliveryState>,
}

impl MessageFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the feed from a history fetch (oldest first). Entries already
    /// present by id are skipped.
    pub fn load_history(&mut self, messages: Vec<MessageView>) {
        for message in messages {
            if !self.contains_id(message.id) {
                self.entries.push(FeedEntry::Confirmed(message));
            }
        }
    }

    /// Register an outgoing message before the network call and return its
    /// local id. A second identical draft while the first is unresolved is
    /// a distinct message and gets its own entry.
    pub fn begin_send(&mut self, draft: SendDraft) -> String {
        let local_id = format!("local_{}", Uuid::new_v4());
        self.entries.push(FeedEntry::Local(LocalMessage {
            local_id: local_id.clone(),
            sender: draft.sender,
            receiver: draft.receiver,
            group: draft.group,
            text: draft.text,
            media: draft.media,
            reply_to: draft.reply_to,
            failed: false,
            created_at: Utc::now(),
        }));
        local_id
    }

    /// Resolve a send ack. Matches by the echoed local id when present,
    /// otherwise by the oldest unresolved pending entry with the same
    /// (sender, text, target).
    pub fn apply_ack(&mut self, ack: &SendAck) {
        if !ack.success {
            if let Some(local_id) = &ack.local_id {
                self.mark_failed(local_id);
            }
            return;
        }
        let Some(message) = &ack.data else { return };

        if ack.delivered == Some(true) {
            self.statuses.insert(message.id, DeliveryState::Delivered);
        }

        let index = match &ack.local_id {
            Some(local_id) => self.index_of_local(local_id),
            None => self.index_of_matching_pending(message),
        };

        self.resolve_at(index, message.clone());
    }

    /// Fold an incoming broadcast into the feed. A broadcast that matches
    /// an outstanding pending entry resolves it; anything else is appended
    /// unless the id is already present.
    pub fn apply_broadcast(&mut self, message: MessageView) {
        if self.contains_id(message.id) {
            return;
        }

        let index = self.index_of_matching_pending(&message);
        self.resolve_at(index, message);
    }

    /// Flag a pending entry as failed; it stays visible with a retry
    /// affordance.
    pub fn mark_failed(&mut self, local_id: &str) {
        if let Some(FeedEntry::Local(local)) = self
            .index_of_local(local_id)
            .map(|i| &mut self.entries[i])
        {
            local.failed = true;
        }
    }

    /// Prepare a failed entry for resubmission: it flips back to pending
    /// and the same content is returned, minus media (see [`RetrySend`]).
    pub fn retry(&mut self, local_id: &str) -> Option<RetrySend> {
        let index = self.index_of_local(local_id)?;
        let FeedEntry::Local(local) = &mut self.entries[index] else {
            return None;
        };
        if !local.failed {
            return None;
        }

        local.failed = false;
        let dropped_media = std::mem::take(&mut local.media);
        if !dropped_media.is_empty() {
            debug!(
                local_id = %local.local_id,
                dropped = dropped_media.len(),
                "retry cannot reattach consumed media"
            );
        }

        Some(RetrySend {
            local_id: local.local_id.clone(),
            sender: local.sender,
            receiver: local.receiver,
            group: local.group,
            text: local.text.clone(),
            reply_to: local.reply_to,
            dropped_media,
        })
    }

    /// Apply a delivery/seen status marker for a confirmed message. Seen
    /// overrides delivered; delivered never downgrades seen.
    pub fn update_status(&mut self, id: MessageId, status: DeliveryState) {
        match (self.statuses.get(&id), status) {
            (Some(DeliveryState::Seen), DeliveryState::Delivered) => {}
            _ => {
                self.statuses.insert(id, status);
            }
        }
    }

    /// Remove a message deleted on the server.
    pub fn remove(&mut self, id: MessageId) {
        self.entries
            .retain(|e| !matches!(e, FeedEntry::Confirmed(m) if m.id == id));
        self.statuses.remove(&id);
    }

    pub fn status_of(&self, id: MessageId) -> Option<DeliveryState> {
        self.statuses.get(&id).copied()
    }

    pub fn entries(&self) -> &[FeedEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_pending()).count()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.statuses.clear();
    }

    // ------------------------------------------------------------------
    // Matching helpers
    // ------------------------------------------------------------------

    fn contains_id(&self, id: MessageId) -> bool {
        self.entries
            .iter()
            .any(|e| matches!(e, FeedEntry::Confirmed(m) if m.id == id))
    }

    fn index_of_local(&self, local_id: &str) -> Option<usize> {
        self.entries.iter().position(
            |e| matches!(e, FeedEntry::Local(local) if local.local_id == local_id),
        )
    }

    /// Oldest pending entry with the same (sender, text, target) as the
    /// confirmed message. At most one pending entry resolves per
    /// confirmation.
    fn index_of_matching_pending(&self, message: &MessageView) -> Option<usize> {
        self.entries.iter().position(|e| match e {
            FeedEntry::Local(local) => {
                !local.failed
                    && local.sender == message.sender.id
                    && local.text == message.text
                    && local.group == message.group.as_ref().map(|g| g.id)
                    && local.receiver == message.receiver.as_ref().map(|r| r.id)
            }
            _ => false,
        })
    }

    /// Replace the entry at `index` with the confirmed message, or append
    /// when nothing matched.
    fn resolve_at(&mut self, index: Option<usize>, message: MessageView) {
        match index {
            Some(index) if !self.contains_id(message.id) => {
                self.entries[index] = FeedEntry::Confirmed(message);
            }
            Some(index) => {
                // Already confirmed through another path (ack vs broadcast
                // race); drop the now-redundant pending entry.
                self.entries.remove(index);
            }
            None if !self.contains_id(message.id) => {
                self.entries.push(FeedEntry::Confirmed(message));
            }
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_shared::UserRef;

    fn user_ref(id: UserId, name: &str) -> UserRef {
        UserRef {
            id,
            username: name.into(),
            avatar: None,
        }
    }

    fn confirmed(sender: UserId, receiver: UserId, text: &str) -> MessageView {
        MessageView {
            id: MessageId::new(),
            sender: user_ref(sender, "alice"),
            receiver: Some(user_ref(receiver, "bob")),
            group: None,
            text: text.into(),
            media: Vec::new(),
            reply_to: None,
            edited: false,
            is_pinned: false,
            reactions: Vec::new(),
            seen_by: Vec::new(),
            created_at: Utc::now(),
        }
    }

    fn draft(sender: UserId, receiver: UserId, text: &str) -> SendDraft {
        SendDraft {
            sender,
            receiver: Some(receiver),
            text: text.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_ack_resolves_by_local_id() {
        let mut feed = MessageFeed::new();
        let alice = UserId::new();
        let bob = UserId::new();

        let local_id = feed.begin_send(draft(alice, bob, "hi"));
        assert_eq!(feed.pending_count(), 1);

        let message = confirmed(alice, bob, "hi");
        feed.apply_ack(&SendAck::ok(
            Some(local_id),
            message.clone(),
            Some(true),
        ));

        assert_eq!(feed.len(), 1);
        assert!(matches!(&feed.entries()[0], FeedEntry::Confirmed(m) if m.id == message.id));
        assert_eq!(feed.status_of(message.id), Some(DeliveryState::Delivered));
    }

    #[test]
    fn test_ack_without_local_id_falls_back_to_heuristic() {
        let mut feed = MessageFeed::new();
        let alice = UserId::new();
        let bob = UserId::new();

        feed.begin_send(draft(alice, bob, "hi"));

        let message = confirmed(alice, bob, "hi");
        feed.apply_ack(&SendAck::ok(None, message.clone(), Some(false)));

        assert_eq!(feed.len(), 1);
        assert_eq!(feed.pending_count(), 0);
        assert_eq!(feed.status_of(message.id), None);
    }

    #[test]
    fn test_broadcast_resolves_pending_instead_of_duplicating() {
        let mut feed = MessageFeed::new();
        let alice = UserId::new();
        let bob = UserId::new();

        feed.begin_send(draft(alice, bob, "hi"));
        let message = confirmed(alice, bob, "hi");

        feed.apply_broadcast(message.clone());
        assert_eq!(feed.len(), 1);

        // The same broadcast again is a duplicate and is ignored.
        feed.apply_broadcast(message);
        assert_eq!(feed.len(), 1);
    }

    #[test]
    fn test_identical_back_to_back_sends_stay_distinct() {
        let mut feed = MessageFeed::new();
        let alice = UserId::new();
        let bob = UserId::new();

        // Two identical sends, neither resolved yet.
        let first_local = feed.begin_send(draft(alice, bob, "hi"));
        let second_local = feed.begin_send(draft(alice, bob, "hi"));
        assert_ne!(first_local, second_local);
        assert_eq!(feed.pending_count(), 2);

        // Two confirmations arrive; each resolves exactly one entry.
        let first = confirmed(alice, bob, "hi");
        let second = confirmed(alice, bob, "hi");
        feed.apply_broadcast(first.clone());
        feed.apply_broadcast(second.clone());

        assert_eq!(feed.pending_count(), 0);
        assert_eq!(feed.len(), 2);
        let ids: Vec<MessageId> = feed
            .entries()
            .iter()
            .map(|e| match e {
                FeedEntry::Confirmed(m) => m.id,
                FeedEntry::Local(_) => panic!("unresolved pending entry"),
            })
            .collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }

    #[test]
    fn test_ack_broadcast_race_never_duplicates() {
        let mut feed = MessageFeed::new();
        let alice = UserId::new();
        let bob = UserId::new();

        let local_id = feed.begin_send(draft(alice, bob, "hi"));
        let message = confirmed(alice, bob, "hi");

        // Broadcast lands first (resolves the pending entry), then the ack
        // for the same message arrives.
        feed.apply_broadcast(message.clone());
        feed.apply_ack(&SendAck::ok(Some(local_id), message.clone(), Some(true)));

        assert_eq!(feed.len(), 1);
        assert!(matches!(&feed.entries()[0], FeedEntry::Confirmed(m) if m.id == message.id));
    }

    #[test]
    fn test_failed_send_and_retry_without_media() {
        let mut feed = MessageFeed::new();
        let alice = UserId::new();
        let bob = UserId::new();

        let local_id = feed.begin_send(SendDraft {
            sender: alice,
            receiver: Some(bob),
            text: "with attachment".into(),
            media: vec![MediaItem {
                url: "/uploads/pic.png".into(),
                kind: parley_shared::MediaKind::Image,
            }],
            ..Default::default()
        });

        feed.apply_ack(&SendAck::err(Some(local_id.clone()), "Server error"));
        assert!(feed.entries()[0].is_failed());
        assert_eq!(feed.pending_count(), 0);

        let retry = feed.retry(&local_id).unwrap();
        assert_eq!(retry.text, "with attachment");
        // Consumed media is dropped from the retry and reported.
        assert_eq!(retry.dropped_media.len(), 1);
        assert!(feed.entries()[0].is_pending());

        // Retrying a non-failed entry is a no-op.
        assert!(feed.retry(&local_id).is_none());
    }

    #[test]
    fn test_failed_entry_is_not_matched_by_broadcasts() {
        let mut feed = MessageFeed::new();
        let alice = UserId::new();
        let bob = UserId::new();

        let local_id = feed.begin_send(draft(alice, bob, "hi"));
        feed.mark_failed(&local_id);

        feed.apply_broadcast(confirmed(alice, bob, "hi"));

        // The failed entry stays; the broadcast appended a new message.
        assert_eq!(feed.len(), 2);
        assert!(feed.entries()[0].is_failed());
    }

    #[test]
    fn test_seen_status_is_never_downgraded() {
        let mut feed = MessageFeed::new();
        let id = MessageId::new();

        feed.update_status(id, DeliveryState::Seen);
        feed.update_status(id, DeliveryState::Delivered);

        assert_eq!(feed.status_of(id), Some(DeliveryState::Seen));
    }

    #[test]
    fn test_history_load_dedupes_by_id() {
        let mut feed = MessageFeed::new();
        let alice = UserId::new();
        let bob = UserId::new();

        let message = confirmed(alice, bob, "old");
        feed.load_history(vec![message.clone()]);
        feed.load_history(vec![message]);

        assert_eq!(feed.len(), 1);
    }

    #[test]
    fn test_remove_deleted_message() {
        let mut feed = MessageFeed::new();
        let alice = UserId::new();
        let bob = UserId::new();

        let message = confirmed(alice, bob, "gone");
        feed.apply_broadcast(message.clone());
        feed.update_status(message.id, DeliveryState::Delivered);

        feed.remove(message.id);
        assert!(feed.is_empty());
        assert_eq!(feed.status_of(message.id), None);
    }
}
