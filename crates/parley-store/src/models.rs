//! Domain model structs persisted in the database.
//!
//! These are the stored forms: references are bare identifiers. The
//! expanded display shapes live in `parley-shared` and are produced by the
//! `*_expanded` fetches in [`crate::messages`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use parley_shared::{GroupId, MediaItem, MessageId, UserId};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A registered user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: Option<String>,
    /// URL of the avatar image, if one was uploaded.
    pub avatar: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            id: UserId::new(),
            username: username.into(),
            email: None,
            avatar: None,
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Group
// ---------------------------------------------------------------------------

/// A chat group. The admin is the creating user and is always a member.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub avatar: Option<String>,
    pub admin: UserId,
    pub members: Vec<UserId>,
    pub pinned_messages: Vec<MessageId>,
    pub created_at: DateTime<Utc>,
}

impl Group {
    pub fn new(name: impl Into<String>, admin: UserId) -> Self {
        Self {
            id: GroupId::new(),
            name: name.into(),
            avatar: None,
            admin,
            members: vec![admin],
            pinned_messages: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A stored chat message. Exactly one of `receiver` / `group` is set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: MessageId,
    pub sender: UserId,
    pub receiver: Option<UserId>,
    pub group: Option<GroupId>,
    pub text: String,
    pub media: Vec<MediaItem>,
    pub reply_to: Option<MessageId>,
    pub edited: bool,
    pub is_pinned: bool,
    pub created_at: DateTime<Utc>,
}

/// Fields for creating a message; the store assigns the id and timestamp.
/// Target validation (exactly one of receiver/group, non-empty content) is
/// the dispatch engine's job and happens before construction.
#[derive(Debug, Clone, Default)]
pub struct NewMessage {
    pub sender: UserId,
    pub receiver: Option<UserId>,
    pub group: Option<GroupId>,
    pub text: String,
    pub media: Vec<MediaItem>,
    pub reply_to: Option<MessageId>,
}
