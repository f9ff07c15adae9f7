//! v001 -- Initial schema creation.
//!
//! Creates the core tables: `users`, `groups` (with membership and pinned
//! lists), and `messages` (with media, reactions, and seen receipts).

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id         TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    username   TEXT NOT NULL,
    email      TEXT,
    avatar     TEXT,
    created_at TEXT NOT NULL                 -- ISO-8601 / RFC-3339
);

-- ----------------------------------------------------------------
-- Groups
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS groups (
    id         TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    name       TEXT NOT NULL,
    avatar     TEXT,
    admin_id   TEXT NOT NULL,                -- FK -> users(id)
    created_at TEXT NOT NULL,

    FOREIGN KEY (admin_id) REFERENCES users(id)
);

CREATE TABLE IF NOT EXISTS group_members (
    group_id TEXT NOT NULL,
    user_id  TEXT NOT NULL,

    PRIMARY KEY (group_id, user_id),
    FOREIGN KEY (group_id) REFERENCES groups(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id)  REFERENCES users(id)  ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_group_members_user ON group_members(user_id);

-- Pinned-message list per group; insert-or-ignore keeps entries unique.
CREATE TABLE IF NOT EXISTS group_pins (
    group_id   TEXT NOT NULL,
    message_id TEXT NOT NULL,

    PRIMARY KEY (group_id, message_id),
    FOREIGN KEY (group_id)   REFERENCES groups(id)   ON DELETE CASCADE,
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
-- Exactly one of receiver_id / group_id is set.
CREATE TABLE IF NOT EXISTS messages (
    id          TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    sender_id   TEXT NOT NULL,               -- FK -> users(id)
    receiver_id TEXT,                        -- direct target
    group_id    TEXT,                        -- group target
    text        TEXT NOT NULL DEFAULT '',
    reply_to    TEXT,                        -- weak ref -> messages(id)
    edited      INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    is_pinned   INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    created_at  TEXT NOT NULL,

    FOREIGN KEY (sender_id) REFERENCES users(id),
    CHECK ((receiver_id IS NULL) <> (group_id IS NULL))
);

CREATE INDEX IF NOT EXISTS idx_messages_direct
    ON messages(sender_id, receiver_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_messages_group
    ON messages(group_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_messages_created ON messages(created_at);

CREATE TABLE IF NOT EXISTS message_media (
    message_id TEXT NOT NULL,
    position   INTEGER NOT NULL,             -- preserves attachment order
    url        TEXT NOT NULL,
    kind       TEXT NOT NULL,                -- image / video / file

    PRIMARY KEY (message_id, position),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);

-- One reaction per (message, user); re-reacting replaces the kind.
CREATE TABLE IF NOT EXISTS message_reactions (
    message_id TEXT NOT NULL,
    user_id    TEXT NOT NULL,
    kind       TEXT NOT NULL,

    PRIMARY KEY (message_id, user_id),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS message_seen (
    message_id TEXT NOT NULL,
    user_id    TEXT NOT NULL,
    seen_at    TEXT NOT NULL,

    PRIMARY KEY (message_id, user_id),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
