//! # parley-store
//!
//! SQLite-backed persistence for the Parley chat service: users, groups
//! (with membership and pinned-message lists), and messages (with media,
//! reactions, and seen receipts).
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for every domain
//! model, plus the expanded fetches the dispatch engine hands to clients.

pub mod database;
pub mod groups;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod users;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
