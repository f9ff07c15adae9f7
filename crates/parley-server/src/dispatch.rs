//! Message dispatch engine.
//!
//! Validates incoming send requests, persists them, and fans them out to
//! the right rooms with acknowledgement. Also owns the delivery/seen
//! transitions, bulk seen receipts, and the moderation operations (edit,
//! react, pin, delete).
//!
//! Errors abort before any fan-out: a message is either broadcast to all of
//! its recipients or to none. Presence is re-checked at emit time rather
//! than cached across the persistence await.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::debug;

use parley_shared::wire::{
    DeliveryState, MessageDeletedPayload, MessageStatusPayload, ServerEvent, TypingNotice,
    TypingPayload,
};
use parley_shared::{ChatError, GroupId, MediaItem, MessageId, MessageView, RoomId, UserId};
use parley_store::{Database, NewMessage, StoreError};

use crate::delivery::DeliveryTracker;
use crate::presence::PresenceRegistry;
use crate::rooms::{ConnId, Hub};

/// Shared handle to the persistence collaborator. The mutex serializes
/// persistence, so per-conversation delivery order equals server-acceptance
/// order. Swapping in an external store for multi-process scale replaces
/// this alias behind the same method surface.
pub type SharedStore = Arc<Mutex<Database>>;

/// A validated-on-entry send request. Exactly one of `receiver` / `group`
/// must be set and text or media must be non-empty; `send` rejects
/// anything else before touching the store.
#[derive(Debug, Clone, Default)]
pub struct SendRequest {
    pub sender: UserId,
    pub receiver: Option<UserId>,
    pub group: Option<GroupId>,
    pub text: Option<String>,
    pub media: Vec<MediaItem>,
    pub reply_to: Option<MessageId>,
}

/// Result of a successful send: the expanded record plus, for direct
/// messages, whether the receiver was online at emit time.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub message: MessageView,
    pub delivered: Option<bool>,
}

#[derive(Clone)]
pub struct Dispatcher {
    store: SharedStore,
    hub: Hub,
    presence: PresenceRegistry,
    delivery: DeliveryTracker,
}

impl Dispatcher {
    pub fn new(
        store: SharedStore,
        hub: Hub,
        presence: PresenceRegistry,
        delivery: DeliveryTracker,
    ) -> Self {
        Self {
            store,
            hub,
            presence,
            delivery,
        }
    }

    // ------------------------------------------------------------------
    // Send
    // ------------------------------------------------------------------

    pub async fn send(&self, req: SendRequest) -> Result<SendOutcome, ChatError> {
        let text = req.text.clone().unwrap_or_default();

        if req.receiver.is_some() == req.group.is_some() {
            return Err(ChatError::InvalidPayload(
                "Exactly one of receiver or group is required".into(),
            ));
        }
        if text.trim().is_empty() && req.media.is_empty() {
            return Err(ChatError::InvalidPayload(
                "Text or media file is required".into(),
            ));
        }

        // Persist, then re-fetch with references expanded for display.
        let (id, view) = {
            let store = self.store.lock().await;

            store
                .get_user_ref(req.sender)
                .map_err(|e| map_store(e, "Sender not found"))?;
            if let Some(receiver) = req.receiver {
                store
                    .get_user_ref(receiver)
                    .map_err(|e| map_store(e, "Receiver not found"))?;
            }
            if let Some(group) = req.group {
                store
                    .get_group_ref(group)
                    .map_err(|e| map_store(e, "Group not found"))?;
            }

            let id = store
                .create_message(&NewMessage {
                    sender: req.sender,
                    receiver: req.receiver,
                    group: req.group,
                    text,
                    media: req.media.clone(),
                    reply_to: req.reply_to,
                })
                .map_err(server_err)?;
            let view = store.get_message_expanded(id).map_err(server_err)?;
            (id, view)
        };

        match (req.receiver, req.group) {
            (Some(receiver), None) => {
                self.delivery.track(id, req.sender, receiver).await;

                let event = ServerEvent::ReceiveMessage(view.clone());
                self.hub
                    .emit_to_room(&RoomId::user(&receiver), event.clone())
                    .await;
                // The sender's own room too, so other tabs/devices see it.
                self.hub
                    .emit_to_room(&RoomId::user(&req.sender), event)
                    .await;

                let delivered = if self.presence.is_online(receiver).await {
                    self.message_delivered(id).await;
                    true
                } else {
                    false
                };

                Ok(SendOutcome {
                    message: view,
                    delivered: Some(delivered),
                })
            }
            (None, Some(group)) => {
                let event = ServerEvent::ReceiveMessage(view.clone());
                self.hub
                    .emit_to_room(&RoomId::group(&group), event.clone())
                    .await;
                self.hub
                    .emit_to_room(&RoomId::user(&req.sender), event)
                    .await;

                Ok(SendOutcome {
                    message: view,
                    delivered: None,
                })
            }
            _ => unreachable!("validated above"),
        }
    }

    // ------------------------------------------------------------------
    // Delivery / seen transitions
    // ------------------------------------------------------------------

    /// Mark a direct message delivered. Idempotent; only the first
    /// transition notifies the sender's room.
    pub async fn message_delivered(&self, id: MessageId) {
        if let Some(t) = self.delivery.mark_delivered(id).await {
            if t.first {
                self.emit_status(t.sender, id, DeliveryState::Delivered).await;
            }
        }
    }

    /// Mark a direct message seen (which implies delivered).
    pub async fn message_read(&self, id: MessageId) {
        if let Some(t) = self.delivery.mark_seen(id).await {
            if t.first {
                self.emit_status(t.sender, id, DeliveryState::Seen).await;
            }
        }
    }

    async fn emit_status(&self, sender: UserId, id: MessageId, status: DeliveryState) {
        self.hub
            .emit_to_room(
                &RoomId::user(&sender),
                ServerEvent::MessageStatus(MessageStatusPayload {
                    message_id: id,
                    status,
                }),
            )
            .await;
    }

    /// Record seen receipts for a batch of messages. Ids the user cannot
    /// see (or that no longer exist) are silently skipped; one bad id never
    /// fails the batch. Returns the re-expanded records that changed.
    pub async fn mark_seen(&self, ids: &[MessageId], user: UserId) -> Vec<MessageView> {
        let mut updated = Vec::new();

        for &id in ids {
            let expanded = {
                let store = self.store.lock().await;
                let Ok(stored) = store.get_message(id) else {
                    continue;
                };
                match store.add_seen(id, user, Utc::now()) {
                    Ok(true) => {}
                    // Already seen by this user, or the row vanished.
                    _ => continue,
                }
                match store.get_message_expanded(id) {
                    Ok(view) => (view, stored.sender, stored.receiver, stored.group),
                    Err(_) => continue,
                }
            };
            let (view, sender, receiver, group) = expanded;

            let event = ServerEvent::MessageSeen(view.clone());
            if let Some(receiver) = receiver {
                self.hub
                    .emit_to_room(&RoomId::user(&receiver), event.clone())
                    .await;
                self.hub.emit_to_room(&RoomId::user(&sender), event).await;
            } else if let Some(group) = group {
                self.hub.emit_to_room(&RoomId::group(&group), event).await;
            }

            updated.push(view);
        }

        updated
    }

    // ------------------------------------------------------------------
    // Edit / react / pin / delete
    // ------------------------------------------------------------------

    /// Replace a message's text. Only the original sender may edit.
    pub async fn edit(
        &self,
        id: MessageId,
        editor: UserId,
        new_text: &str,
    ) -> Result<MessageView, ChatError> {
        let store = self.store.lock().await;
        let stored = store
            .get_message(id)
            .map_err(|e| map_store(e, "Message not found"))?;

        if stored.sender != editor {
            return Err(ChatError::Forbidden(
                "Only the sender can edit the message".into(),
            ));
        }
        if new_text.trim().is_empty() && stored.media.is_empty() {
            return Err(ChatError::InvalidPayload(
                "Edited text must not be empty".into(),
            ));
        }

        store.set_message_text(id, new_text).map_err(server_err)?;
        store.get_message_expanded(id).map_err(server_err)
    }

    /// Set or replace the user's reaction on a message. One reaction per
    /// user; re-reacting overwrites the kind rather than stacking.
    pub async fn react(
        &self,
        id: MessageId,
        user: UserId,
        kind: &str,
    ) -> Result<MessageView, ChatError> {
        if kind.trim().is_empty() {
            return Err(ChatError::InvalidPayload("Reaction type is required".into()));
        }

        let store = self.store.lock().await;
        let stored = store
            .get_message(id)
            .map_err(|e| map_store(e, "Message not found"))?;

        let allowed = stored.sender == user
            || stored.receiver == Some(user)
            || stored.group.is_some();
        if !allowed {
            return Err(ChatError::Forbidden(
                "Not authorized to react to this message".into(),
            ));
        }

        store.upsert_reaction(id, user, kind).map_err(server_err)?;
        store.get_message_expanded(id).map_err(server_err)
    }

    /// Pin or unpin a message. Group messages: admin only, and the group's
    /// pinned list gains/loses the id exactly once. Direct messages: either
    /// participant.
    pub async fn set_pinned(
        &self,
        id: MessageId,
        user: UserId,
        pinned: bool,
    ) -> Result<MessageView, ChatError> {
        let store = self.store.lock().await;
        let stored = store
            .get_message(id)
            .map_err(|e| map_store(e, "Message not found"))?;

        if let Some(group_id) = stored.group {
            let group = store
                .get_group(group_id)
                .map_err(|e| map_store(e, "Group not found"))?;
            if group.admin != user {
                return Err(ChatError::Forbidden(
                    "Only the group admin can pin messages".into(),
                ));
            }
            if pinned {
                store.pin_group_message(group_id, id).map_err(server_err)?;
            } else {
                store.unpin_group_message(group_id, id).map_err(server_err)?;
            }
        } else if stored.sender != user && stored.receiver != Some(user) {
            return Err(ChatError::Forbidden(
                "Not authorized to pin this message".into(),
            ));
        }

        store.set_message_pinned(id, pinned).map_err(server_err)?;
        store.get_message_expanded(id).map_err(server_err)
    }

    /// Delete a message. Only the original sender may delete; the deletion
    /// is broadcast so other participants' views do not go stale.
    pub async fn delete(&self, id: MessageId, requester: UserId) -> Result<(), ChatError> {
        let stored = {
            let store = self.store.lock().await;
            let stored = store
                .get_message(id)
                .map_err(|e| map_store(e, "Message not found"))?;

            if stored.sender != requester {
                return Err(ChatError::Forbidden(
                    "Only the sender can delete this message".into(),
                ));
            }

            store.delete_message(id).map_err(server_err)?;
            stored
        };

        let event = ServerEvent::MessageDeleted(MessageDeletedPayload { message_id: id });
        if let Some(receiver) = stored.receiver {
            self.hub
                .emit_to_room(&RoomId::user(&receiver), event.clone())
                .await;
            self.hub
                .emit_to_room(&RoomId::user(&stored.sender), event)
                .await;
        } else if let Some(group) = stored.group {
            self.hub.emit_to_room(&RoomId::group(&group), event).await;
        }

        Ok(())
    }

    /// Clear the direct history between two users. Either participant may
    /// request it.
    pub async fn delete_all_between(
        &self,
        user1: UserId,
        user2: UserId,
        requester: UserId,
    ) -> Result<usize, ChatError> {
        if requester != user1 && requester != user2 {
            return Err(ChatError::Forbidden("Not authorized".into()));
        }
        let store = self.store.lock().await;
        store.delete_all_between(user1, user2).map_err(server_err)
    }

    /// Clear a group's history. Admin only.
    pub async fn delete_all_in_group(
        &self,
        group: GroupId,
        requester: UserId,
    ) -> Result<usize, ChatError> {
        let store = self.store.lock().await;
        let record = store
            .get_group(group)
            .map_err(|e| map_store(e, "Group not found"))?;
        if record.admin != requester {
            return Err(ChatError::Forbidden(
                "Only the group admin can delete all messages".into(),
            ));
        }
        store.delete_all_in_group(group).map_err(server_err)
    }

    // ------------------------------------------------------------------
    // Reconnection replay / typing
    // ------------------------------------------------------------------

    /// Re-emit queued undelivered direct messages to a freshly connected
    /// user and notify the original senders of the delivery.
    pub async fn replay_undelivered(&self, user: UserId, conn: ConnId) {
        let pending = self.delivery.undelivered_for(user).await;
        if pending.is_empty() {
            return;
        }
        debug!(user = %user, count = pending.len(), "replaying undelivered messages");

        for id in pending {
            let view = {
                let store = self.store.lock().await;
                match store.get_message_expanded(id) {
                    Ok(view) => view,
                    // Purged or deleted since dispatch; drop the entry's replay.
                    Err(_) => continue,
                }
            };
            if self
                .hub
                .emit_to_conn(conn, ServerEvent::ReceiveMessage(view))
                .await
            {
                self.message_delivered(id).await;
            }
        }
    }

    /// Forward a transient typing indicator to the target's current
    /// connection, if any. Never queued; a missed event is not an error.
    pub async fn relay_typing(&self, payload: TypingPayload) {
        if let Some(conn) = self.presence.handle_of(payload.to_user_id).await {
            self.hub
                .emit_to_conn(
                    conn,
                    ServerEvent::Typing(TypingNotice {
                        typing: payload.typing,
                        from_user_id: payload.from_user_id,
                    }),
                )
                .await;
        }
    }
}

fn server_err(e: StoreError) -> ChatError {
    ChatError::ServerError(e.to_string())
}

fn map_store(e: StoreError, what: &str) -> ChatError {
    match e {
        StoreError::NotFound => ChatError::NotFound(what.into()),
        other => ChatError::ServerError(other.to_string()),
    }
}
