//! # parley-client
//!
//! Client-side reconciliation for the Parley chat service.
//!
//! [`MessageFeed`] renders outgoing messages optimistically: every send
//! gets a client-generated local id before any network call, shows up
//! immediately as pending, and is replaced by the authoritative record
//! when the server's ack or broadcast confirms it. [`ConversationTracker`]
//! maintains the per-conversation summaries (preview, timestamp, unread
//! count) the sidebar renders.

pub mod conversations;
pub mod feed;

pub use conversations::{ConversationSummary, ConversationTracker};
pub use feed::{FeedEntry, LocalMessage, MessageFeed, RetrySend, SendDraft};
