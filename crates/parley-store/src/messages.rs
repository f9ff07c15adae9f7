//! CRUD and query operations for messages, including the expanded fetches
//! handed to clients, reaction upserts, seen receipts, paginated history,
//! and the retention purge.

use chrono::{DateTime, Utc};
use rusqlite::params;

use parley_shared::{
    GroupId, MediaItem, MediaKind, MessageId, MessageView, ReactionView, ReplyRef, SeenEntry,
    UserId,
};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{NewMessage, StoredMessage};

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new message and its media rows. Returns the assigned id.
    pub fn create_message(&self, new: &NewMessage) -> Result<MessageId> {
        let id = MessageId::new();
        let now = Utc::now();

        self.conn().execute(
            "INSERT INTO messages
                 (id, sender_id, receiver_id, group_id, text, reply_to, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id.to_string(),
                new.sender.to_string(),
                new.receiver.map(|r| r.to_string()),
                new.group.map(|g| g.to_string()),
                new.text,
                new.reply_to.map(|r| r.to_string()),
                now.to_rfc3339(),
            ],
        )?;

        for (position, item) in new.media.iter().enumerate() {
            self.conn().execute(
                "INSERT INTO message_media (message_id, position, url, kind)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    id.to_string(),
                    position as i64,
                    item.url,
                    item.kind.as_str()
                ],
            )?;
        }

        Ok(id)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a message in stored form (bare identifiers).
    pub fn get_message(&self, id: MessageId) -> Result<StoredMessage> {
        let mut message = self
            .conn()
            .query_row(
                "SELECT id, sender_id, receiver_id, group_id, text, reply_to,
                        edited, is_pinned, created_at
                 FROM messages WHERE id = ?1",
                params![id.to_string()],
                row_to_message,
            )
            .map_err(not_found)?;

        message.media = self.message_media(id)?;
        Ok(message)
    }

    /// Fetch a message with every reference resolved for display:
    /// sender/receiver/group as display objects, the reply target inlined,
    /// and reactions / seen receipts attached.
    pub fn get_message_expanded(&self, id: MessageId) -> Result<MessageView> {
        let stored = self.get_message(id)?;
        self.expand(stored)
    }

    fn expand(&self, stored: StoredMessage) -> Result<MessageView> {
        let sender = self.get_user_ref(stored.sender)?;
        let receiver = stored
            .receiver
            .map(|r| self.get_user_ref(r))
            .transpose()?;
        let group = stored.group.map(|g| self.get_group_ref(g)).transpose()?;

        // Reply targets are weak references: a deleted or aged-out target
        // just means no inline preview.
        let reply_to = match stored.reply_to {
            Some(reply_id) => match self.get_message(reply_id) {
                Ok(reply) => Some(ReplyRef {
                    id: reply.id,
                    text: reply.text,
                    sender: self.get_user_ref(reply.sender)?,
                }),
                Err(StoreError::NotFound) => None,
                Err(e) => return Err(e),
            },
            None => None,
        };

        Ok(MessageView {
            id: stored.id,
            sender,
            receiver,
            group,
            text: stored.text,
            media: stored.media,
            reply_to,
            edited: stored.edited,
            is_pinned: stored.is_pinned,
            reactions: self.message_reactions(stored.id)?,
            seen_by: self.message_seen(stored.id)?,
            created_at: stored.created_at,
        })
    }

    /// Direct history between two users, newest first. `before` excludes
    /// messages at or after the given instant (cursor pagination).
    pub fn find_direct_messages(
        &self,
        user1: UserId,
        user2: UserId,
        limit: u32,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<MessageView>> {
        let cutoff = cursor_string(before);
        let mut stmt = self.conn().prepare(
            "SELECT id FROM messages
             WHERE ((sender_id = ?1 AND receiver_id = ?2)
                 OR (sender_id = ?2 AND receiver_id = ?1))
               AND created_at < ?3
             ORDER BY created_at DESC
             LIMIT ?4",
        )?;

        let rows = stmt.query_map(
            params![user1.to_string(), user2.to_string(), cutoff, limit],
            row_to_id,
        )?;

        self.expand_all(rows)
    }

    /// Group history, newest first.
    pub fn find_group_messages(
        &self,
        group: GroupId,
        limit: u32,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<MessageView>> {
        let cutoff = cursor_string(before);
        let mut stmt = self.conn().prepare(
            "SELECT id FROM messages
             WHERE group_id = ?1 AND created_at < ?2
             ORDER BY created_at DESC
             LIMIT ?3",
        )?;

        let rows = stmt.query_map(params![group.to_string(), cutoff, limit], row_to_id)?;

        self.expand_all(rows)
    }

    /// Every pinned message visible to the user: their own directs plus
    /// messages in groups they belong to, newest first.
    pub fn pinned_messages_for_user(&self, user: UserId) -> Result<Vec<MessageView>> {
        let mut stmt = self.conn().prepare(
            "SELECT id FROM messages
             WHERE is_pinned = 1
               AND (sender_id = ?1
                 OR receiver_id = ?1
                 OR group_id IN (SELECT group_id FROM group_members WHERE user_id = ?1))
             ORDER BY created_at DESC",
        )?;

        let rows = stmt.query_map(params![user.to_string()], row_to_id)?;

        self.expand_all(rows)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Replace the text of a message and mark it edited.
    pub fn set_message_text(&self, id: MessageId, text: &str) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE messages SET text = ?2, edited = 1 WHERE id = ?1",
            params![id.to_string(), text],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub fn set_message_pinned(&self, id: MessageId, pinned: bool) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE messages SET is_pinned = ?2 WHERE id = ?1",
            params![id.to_string(), pinned as i64],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Record a reaction, replacing any previous one by the same user.
    pub fn upsert_reaction(&self, id: MessageId, user: UserId, kind: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO message_reactions (message_id, user_id, kind)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (message_id, user_id) DO UPDATE SET kind = excluded.kind",
            params![id.to_string(), user.to_string(), kind],
        )?;
        Ok(())
    }

    /// Append a seen receipt. Returns `false` when the user had already
    /// seen the message (idempotent).
    pub fn add_seen(&self, id: MessageId, user: UserId, seen_at: DateTime<Utc>) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO message_seen (message_id, user_id, seen_at)
             VALUES (?1, ?2, ?3)",
            params![id.to_string(), user.to_string(), seen_at.to_rfc3339()],
        )?;
        Ok(affected > 0)
    }

    pub fn has_seen(&self, id: MessageId, user: UserId) -> Result<bool> {
        let count: u32 = self.conn().query_row(
            "SELECT COUNT(*) FROM message_seen WHERE message_id = ?1 AND user_id = ?2",
            params![id.to_string(), user.to_string()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a message by id. Media, reactions, and seen rows cascade.
    pub fn delete_message(&self, id: MessageId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM messages WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(affected > 0)
    }

    /// Delete the whole direct history between two users. Returns the
    /// number of deleted messages.
    pub fn delete_all_between(&self, user1: UserId, user2: UserId) -> Result<usize> {
        let affected = self.conn().execute(
            "DELETE FROM messages
             WHERE (sender_id = ?1 AND receiver_id = ?2)
                OR (sender_id = ?2 AND receiver_id = ?1)",
            params![user1.to_string(), user2.to_string()],
        )?;
        Ok(affected)
    }

    /// Delete every message in a group. Returns the number deleted.
    pub fn delete_all_in_group(&self, group: GroupId) -> Result<usize> {
        let affected = self.conn().execute(
            "DELETE FROM messages WHERE group_id = ?1",
            params![group.to_string()],
        )?;
        Ok(affected)
    }

    /// Purge messages created before `cutoff`. Returns the number of
    /// purged messages and the media urls they referenced, so the caller
    /// can unlink the files.
    pub fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<(usize, Vec<String>)> {
        let cutoff = cutoff.to_rfc3339();

        let mut stmt = self.conn().prepare(
            "SELECT m.url FROM message_media m
             JOIN messages msg ON msg.id = m.message_id
             WHERE msg.created_at < ?1",
        )?;
        let rows = stmt.query_map(params![cutoff], |row| row.get::<_, String>(0))?;

        let mut urls = Vec::new();
        for row in rows {
            urls.push(row?);
        }

        let purged = self.conn().execute(
            "DELETE FROM messages WHERE created_at < ?1",
            params![cutoff],
        )?;

        Ok((purged, urls))
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn expand_all(
        &self,
        rows: impl Iterator<Item = rusqlite::Result<MessageId>>,
    ) -> Result<Vec<MessageView>> {
        let mut views = Vec::new();
        for row in rows {
            views.push(self.get_message_expanded(row?)?);
        }
        Ok(views)
    }

    fn message_media(&self, id: MessageId) -> Result<Vec<MediaItem>> {
        let mut stmt = self.conn().prepare(
            "SELECT url, kind FROM message_media
             WHERE message_id = ?1 ORDER BY position ASC",
        )?;

        let rows = stmt.query_map(params![id.to_string()], |row| {
            let url: String = row.get(0)?;
            let kind: String = row.get(1)?;
            Ok(MediaItem {
                url,
                kind: MediaKind::from_str_or_file(&kind),
            })
        })?;

        let mut media = Vec::new();
        for row in rows {
            media.push(row?);
        }
        Ok(media)
    }

    fn message_reactions(&self, id: MessageId) -> Result<Vec<ReactionView>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id, kind FROM message_reactions WHERE message_id = ?1",
        )?;

        let rows = stmt.query_map(params![id.to_string()], |row| {
            let user_str: String = row.get(0)?;
            let kind: String = row.get(1)?;
            let user = UserId::parse(&user_str).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?;
            Ok(ReactionView { user, kind })
        })?;

        let mut reactions = Vec::new();
        for row in rows {
            reactions.push(row?);
        }
        Ok(reactions)
    }

    fn message_seen(&self, id: MessageId) -> Result<Vec<SeenEntry>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id, seen_at FROM message_seen
             WHERE message_id = ?1 ORDER BY seen_at ASC",
        )?;

        let rows = stmt.query_map(params![id.to_string()], |row| {
            let user_str: String = row.get(0)?;
            let seen_str: String = row.get(1)?;
            let user = UserId::parse(&user_str).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?;
            let seen_at = DateTime::parse_from_rfc3339(&seen_str)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        1,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })?;
            Ok(SeenEntry { user, seen_at })
        })?;

        let mut seen = Vec::new();
        for row in rows {
            seen.push(row?);
        }
        Ok(seen)
    }
}

fn not_found(e: rusqlite::Error) -> StoreError {
    match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
        other => StoreError::Sqlite(other),
    }
}

/// Pagination cursor as the stored RFC-3339 text. With no cursor, a
/// sentinel that sorts after every realistic timestamp.
fn cursor_string(before: Option<DateTime<Utc>>) -> String {
    match before {
        Some(before) => before.to_rfc3339(),
        None => String::from("9999-12-31T23:59:59+00:00"),
    }
}

fn row_to_id(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageId> {
    let id_str: String = row.get(0)?;
    MessageId::parse(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Map a `rusqlite::Row` to a [`StoredMessage`] (media filled in later).
fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    let id_str: String = row.get(0)?;
    let sender_str: String = row.get(1)?;
    let receiver_str: Option<String> = row.get(2)?;
    let group_str: Option<String> = row.get(3)?;
    let text: String = row.get(4)?;
    let reply_str: Option<String> = row.get(5)?;
    let edited: bool = row.get(6)?;
    let is_pinned: bool = row.get(7)?;
    let created_str: String = row.get(8)?;

    let conv = |i: usize, e: uuid::Error| {
        rusqlite::Error::FromSqlConversionFailure(i, rusqlite::types::Type::Text, Box::new(e))
    };

    let id = MessageId::parse(&id_str).map_err(|e| conv(0, e))?;
    let sender = UserId::parse(&sender_str).map_err(|e| conv(1, e))?;
    let receiver = receiver_str
        .map(|s| UserId::parse(&s))
        .transpose()
        .map_err(|e| conv(2, e))?;
    let group = group_str
        .map(|s| GroupId::parse(&s))
        .transpose()
        .map_err(|e| conv(3, e))?;
    let reply_to = reply_str
        .map(|s| MessageId::parse(&s))
        .transpose()
        .map_err(|e| conv(5, e))?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(StoredMessage {
        id,
        sender,
        receiver,
        group,
        text,
        media: Vec::new(),
        reply_to,
        edited,
        is_pinned,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Group, NewMessage, User};

    fn seed() -> (Database, UserId, UserId) {
        let db = Database::open_in_memory().unwrap();
        let alice = User::new("alice");
        let bob = User::new("bob");
        db.create_user(&alice).unwrap();
        db.create_user(&bob).unwrap();
        (db, alice.id, bob.id)
    }

    fn direct(sender: UserId, receiver: UserId, text: &str) -> NewMessage {
        NewMessage {
            sender,
            receiver: Some(receiver),
            text: text.into(),
            ..Default::default()
        }
    }

    #[test]
    fn create_and_expand_direct() {
        let (db, alice, bob) = seed();

        let id = db
            .create_message(&NewMessage {
                sender: alice,
                receiver: Some(bob),
                text: "hello".into(),
                media: vec![MediaItem {
                    url: "/uploads/pic.png".into(),
                    kind: MediaKind::Image,
                }],
                ..Default::default()
            })
            .unwrap();

        let view = db.get_message_expanded(id).unwrap();
        assert_eq!(view.sender.username, "alice");
        assert_eq!(view.receiver.as_ref().unwrap().username, "bob");
        assert!(view.group.is_none());
        assert_eq!(view.media.len(), 1);
        assert!(!view.edited);
    }

    #[test]
    fn expand_resolves_reply_target() {
        let (db, alice, bob) = seed();

        let first = db.create_message(&direct(alice, bob, "original")).unwrap();
        let reply = db
            .create_message(&NewMessage {
                sender: bob,
                receiver: Some(alice),
                text: "replying".into(),
                reply_to: Some(first),
                ..Default::default()
            })
            .unwrap();

        let view = db.get_message_expanded(reply).unwrap();
        let reply_ref = view.reply_to.unwrap();
        assert_eq!(reply_ref.id, first);
        assert_eq!(reply_ref.text, "original");
        assert_eq!(reply_ref.sender.username, "alice");
    }

    #[test]
    fn deleted_reply_target_yields_no_preview() {
        let (db, alice, bob) = seed();

        let first = db.create_message(&direct(alice, bob, "gone soon")).unwrap();
        let reply = db
            .create_message(&NewMessage {
                sender: bob,
                receiver: Some(alice),
                text: "replying".into(),
                reply_to: Some(first),
                ..Default::default()
            })
            .unwrap();

        assert!(db.delete_message(first).unwrap());

        let view = db.get_message_expanded(reply).unwrap();
        assert!(view.reply_to.is_none());
    }

    #[test]
    fn direct_history_pages_newest_first() {
        let (db, alice, bob) = seed();

        for i in 0..5 {
            db.create_message(&direct(alice, bob, &format!("msg {i}")))
                .unwrap();
        }

        let page = db.find_direct_messages(alice, bob, 3, None).unwrap();
        assert_eq!(page.len(), 3);
        assert_eq!(page[0].text, "msg 4");

        let older = db
            .find_direct_messages(bob, alice, 20, Some(page[2].created_at))
            .unwrap();
        assert_eq!(older.len(), 2);
        assert_eq!(older[0].text, "msg 1");
    }

    #[test]
    fn reaction_upsert_overwrites() {
        let (db, alice, bob) = seed();
        let id = db.create_message(&direct(alice, bob, "react to me")).unwrap();

        db.upsert_reaction(id, bob, "like").unwrap();
        db.upsert_reaction(id, bob, "heart").unwrap();

        let view = db.get_message_expanded(id).unwrap();
        assert_eq!(view.reactions.len(), 1);
        assert_eq!(view.reactions[0].kind, "heart");
    }

    #[test]
    fn seen_is_idempotent() {
        let (db, alice, bob) = seed();
        let id = db.create_message(&direct(alice, bob, "look")).unwrap();

        assert!(db.add_seen(id, bob, Utc::now()).unwrap());
        assert!(!db.add_seen(id, bob, Utc::now()).unwrap());

        let view = db.get_message_expanded(id).unwrap();
        assert_eq!(view.seen_by.len(), 1);
        assert_eq!(view.seen_by[0].user, bob);
    }

    #[test]
    fn edit_marks_edited() {
        let (db, alice, bob) = seed();
        let id = db.create_message(&direct(alice, bob, "tpyo")).unwrap();

        db.set_message_text(id, "typo").unwrap();

        let view = db.get_message_expanded(id).unwrap();
        assert_eq!(view.text, "typo");
        assert!(view.edited);
    }

    #[test]
    fn pinned_scope_includes_own_directs_and_member_groups() {
        let (db, alice, bob) = seed();
        let carol = User::new("carol");
        db.create_user(&carol).unwrap();

        let group = Group::new("g", alice);
        db.create_group(&group).unwrap();

        let direct_id = db.create_message(&direct(alice, bob, "pin direct")).unwrap();
        let group_id = db
            .create_message(&NewMessage {
                sender: alice,
                group: Some(group.id),
                text: "pin group".into(),
                ..Default::default()
            })
            .unwrap();
        db.set_message_pinned(direct_id, true).unwrap();
        db.set_message_pinned(group_id, true).unwrap();

        // Alice sees both; carol (no overlap) sees neither.
        let alice_pins = db.pinned_messages_for_user(alice).unwrap();
        assert_eq!(alice_pins.len(), 2);
        assert!(db.pinned_messages_for_user(carol.id).unwrap().is_empty());

        // Bob sees only the direct.
        let bob_pins = db.pinned_messages_for_user(bob).unwrap();
        assert_eq!(bob_pins.len(), 1);
        assert_eq!(bob_pins[0].id, direct_id);
    }

    #[test]
    fn retention_purges_old_messages_and_reports_media() {
        let (db, alice, bob) = seed();

        let old = db
            .create_message(&NewMessage {
                sender: alice,
                receiver: Some(bob),
                text: "ancient".into(),
                media: vec![MediaItem {
                    url: "/uploads/old.png".into(),
                    kind: MediaKind::Image,
                }],
                ..Default::default()
            })
            .unwrap();
        // Backdate past the cutoff.
        db.conn()
            .execute(
                "UPDATE messages SET created_at = ?2 WHERE id = ?1",
                params![
                    old.to_string(),
                    (Utc::now() - chrono::Duration::days(60)).to_rfc3339()
                ],
            )
            .unwrap();

        let fresh = db.create_message(&direct(alice, bob, "recent")).unwrap();

        let cutoff = Utc::now() - chrono::Duration::days(45);
        let (purged, urls) = db.delete_older_than(cutoff).unwrap();

        assert_eq!(purged, 1);
        assert_eq!(urls, vec!["/uploads/old.png".to_string()]);
        assert!(matches!(db.get_message(old), Err(StoreError::NotFound)));
        assert!(db.get_message(fresh).is_ok());
    }

    #[test]
    fn delete_all_between_clears_both_directions() {
        let (db, alice, bob) = seed();
        db.create_message(&direct(alice, bob, "one")).unwrap();
        db.create_message(&direct(bob, alice, "two")).unwrap();

        assert_eq!(db.delete_all_between(alice, bob).unwrap(), 2);
        assert!(db.find_direct_messages(alice, bob, 20, None).unwrap().is_empty());
    }
}
