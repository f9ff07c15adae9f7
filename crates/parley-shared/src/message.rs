//! Expanded message shapes.
//!
//! Everything that crosses an external boundary (wire event or REST
//! response) carries these display-ready shapes: referenced entities are
//! always resolved to objects, never bare identifiers, so consumers never
//! have to distinguish populated from unpopulated references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{GroupId, MediaKind, MessageId, RoomId, UserId};

/// A user resolved for display.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserRef {
    pub id: UserId,
    pub username: String,
    pub avatar: Option<String>,
}

/// A group resolved for display.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GroupRef {
    pub id: GroupId,
    pub name: String,
    pub avatar: Option<String>,
}

/// The message a reply points at, trimmed to what the UI renders inline.
/// A weak reference: the target may have been deleted or aged out, in which
/// case the reply simply carries no preview.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReplyRef {
    pub id: MessageId,
    pub text: String,
    pub sender: UserRef,
}

/// One media attachment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MediaItem {
    pub url: String,
    pub kind: MediaKind,
}

/// One reaction; at most one per user per message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReactionView {
    pub user: UserId,
    pub kind: String,
}

/// One seen receipt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SeenEntry {
    pub user: UserId,
    pub seen_at: DateTime<Utc>,
}

/// A message with every reference expanded for display.
///
/// Invariant: exactly one of `receiver` / `group` is set, and `text` is
/// non-empty or `media` is non-empty.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: MessageId,
    pub sender: UserRef,
    pub receiver: Option<UserRef>,
    pub group: Option<GroupRef>,
    pub text: String,
    pub media: Vec<MediaItem>,
    pub reply_to: Option<ReplyRef>,
    pub edited: bool,
    pub is_pinned: bool,
    pub reactions: Vec<ReactionView>,
    pub seen_by: Vec<SeenEntry>,
    pub created_at: DateTime<Utc>,
}

impl MessageView {
    pub fn is_direct(&self) -> bool {
        self.receiver.is_some()
    }

    /// The conversation this message belongs to, from `me`'s perspective:
    /// `group_<id>` for group messages, `user_<other>` for directs.
    pub fn conversation_id(&self, me: &UserId) -> Option<RoomId> {
        if let Some(group) = &self.group {
            return Some(RoomId::group(&group.id));
        }
        let receiver = self.receiver.as_ref()?;
        let other = if self.sender.id == *me {
            receiver.id
        } else {
            self.sender.id
        };
        Some(RoomId::user(&other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_ref(id: UserId) -> UserRef {
        UserRef {
            id,
            username: "someone".into(),
            avatar: None,
        }
    }

    fn direct_view(sender: UserId, receiver: UserId) -> MessageView {
        MessageView {
            id: MessageId::new(),
            sender: user_ref(sender),
            receiver: Some(user_ref(receiver)),
            group: None,
            text: "hi".into(),
            media: Vec::new(),
            reply_to: None,
            edited: false,
            is_pinned: false,
            reactions: Vec::new(),
            seen_by: Vec::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_conversation_id_points_at_the_other_user() {
        let a = UserId::new();
        let b = UserId::new();
        let msg = direct_view(a, b);

        assert_eq!(msg.conversation_id(&a), Some(RoomId::user(&b)));
        assert_eq!(msg.conversation_id(&b), Some(RoomId::user(&a)));
    }

    #[test]
    fn test_view_serializes_camel_case() {
        let msg = direct_view(UserId::new(), UserId::new());
        let json = serde_json::to_value(&msg).unwrap();

        assert!(json.get("replyTo").is_some());
        assert!(json.get("isPinned").is_some());
        assert!(json.get("seenBy").is_some());
        assert!(json.get("createdAt").is_some());
    }
}
