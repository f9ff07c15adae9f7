//! Conversation summary cache.
//!
//! One entry per conversation (`user_<id>` for directs, `group_<id>` for
//! groups) holding what the sidebar renders: a preview of the last message,
//! its timestamp, and the unread count. The unread count resets only when
//! the conversation becomes the active one.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use parley_shared::{MessageView, RoomId, UserId};

/// Preview text used when the last message carries only media.
const MEDIA_PREVIEW: &str = "[media]";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub last_message_preview: String,
    pub last_message_at: DateTime<Utc>,
    pub unread: u32,
}

#[derive(Debug, Default)]
pub struct ConversationTracker {
    conversations: HashMap<RoomId, ConversationSummary>,
    active: Option<RoomId>,
}

impl ConversationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a conversation: it becomes active and its unread count clears.
    pub fn set_active(&mut self, conversation: Option<RoomId>) {
        if let Some(conversation) = &conversation {
            self.mark_read(conversation);
        }
        self.active = conversation;
    }

    pub fn active(&self) -> Option<&RoomId> {
        self.active.as_ref()
    }

    pub fn mark_read(&mut self, conversation: &RoomId) {
        if let Some(summary) = self.conversations.get_mut(conversation) {
            summary.unread = 0;
        }
    }

    /// Update the summary for the conversation a message belongs to.
    /// Called for every inbound and outbound message.
    pub fn upsert_from_message(&mut self, message: &MessageView, me: &UserId) {
        let Some(conversation) = message.conversation_id(me) else {
            return;
        };

        let preview = if message.text.trim().is_empty() {
            MEDIA_PREVIEW.to_string()
        } else {
            message.text.clone()
        };

        let is_active = self.active.as_ref() == Some(&conversation);
        let unread = if is_active {
            0
        } else {
            self.conversations
                .get(&conversation)
                .map(|s| s.unread + 1)
                .unwrap_or(1)
        };

        self.conversations.insert(
            conversation,
            ConversationSummary {
                last_message_preview: preview,
                last_message_at: message.created_at,
                unread,
            },
        );
    }

    pub fn get(&self, conversation: &RoomId) -> Option<&ConversationSummary> {
        self.conversations.get(conversation)
    }

    /// All summaries, most recently active first.
    pub fn ordered(&self) -> Vec<(&RoomId, &ConversationSummary)> {
        let mut all: Vec<_> = self.conversations.iter().collect();
        all.sort_by(|a, b| b.1.last_message_at.cmp(&a.1.last_message_at));
        all
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }
}
