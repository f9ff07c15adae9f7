//! # parley-shared
//!
//! Types shared between the Parley server and client crates: identifier
//! newtypes, the expanded message shapes exposed at every external boundary,
//! the JSON wire protocol spoken over the WebSocket gateway, and the error
//! taxonomy surfaced to callers.

pub mod constants;
pub mod error;
pub mod message;
pub mod types;
pub mod wire;

pub use error::ChatError;
pub use message::{GroupRef, MediaItem, MessageView, ReactionView, ReplyRef, SeenEntry, UserRef};
pub use types::{GroupId, MediaKind, MessageId, RoomId, UserId};
