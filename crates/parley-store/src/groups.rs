//! CRUD operations for [`Group`] records, including membership and the
//! pinned-message list.

use chrono::{DateTime, Utc};
use rusqlite::params;

use parley_shared::{GroupId, GroupRef, MessageId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Group;

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new group along with its member rows.
    pub fn create_group(&self, group: &Group) -> Result<()> {
        self.conn().execute(
            "INSERT INTO groups (id, name, avatar, admin_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                group.id.to_string(),
                group.name,
                group.avatar,
                group.admin.to_string(),
                group.created_at.to_rfc3339(),
            ],
        )?;

        for member in &group.members {
            self.add_group_member(group.id, *member)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single group by id, with members and pinned list.
    pub fn get_group(&self, id: GroupId) -> Result<Group> {
        let (id, name, avatar, admin, created_at) = self
            .conn()
            .query_row(
                "SELECT id, name, avatar, admin_id, created_at
                 FROM groups WHERE id = ?1",
                params![id.to_string()],
                row_to_group_head,
            )
            .map_err(not_found)?;

        Ok(Group {
            id,
            name,
            avatar,
            admin,
            members: self.group_members(id)?,
            pinned_messages: self.group_pins(id)?,
            created_at,
        })
    }

    /// Fetch the display shape for a group.
    pub fn get_group_ref(&self, id: GroupId) -> Result<GroupRef> {
        self.conn()
            .query_row(
                "SELECT id, name, avatar FROM groups WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    let id_str: String = row.get(0)?;
                    let name: String = row.get(1)?;
                    let avatar: Option<String> = row.get(2)?;
                    let id = GroupId::parse(&id_str).map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(
                            0,
                            rusqlite::types::Type::Text,
                            Box::new(e),
                        )
                    })?;
                    Ok(GroupRef { id, name, avatar })
                },
            )
            .map_err(not_found)
    }

    /// Ids of all groups the user is a member of.
    pub fn find_groups_containing_user(&self, user: UserId) -> Result<Vec<GroupId>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT group_id FROM group_members WHERE user_id = ?1")?;

        let rows = stmt.query_map(params![user.to_string()], |row| {
            let id_str: String = row.get(0)?;
            GroupId::parse(&id_str).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
        })?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    /// Full group records for every group the user belongs to, newest first.
    pub fn list_groups_for_user(&self, user: UserId) -> Result<Vec<Group>> {
        let mut stmt = self.conn().prepare(
            "SELECT g.id FROM groups g
             JOIN group_members m ON m.group_id = g.id
             WHERE m.user_id = ?1
             ORDER BY g.created_at DESC",
        )?;

        let rows = stmt.query_map(params![user.to_string()], |row| {
            let id_str: String = row.get(0)?;
            GroupId::parse(&id_str).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
        })?;

        let mut groups = Vec::new();
        for row in rows {
            groups.push(self.get_group(row?)?);
        }
        Ok(groups)
    }

    /// Whether the user belongs to the group.
    pub fn is_group_member(&self, group: GroupId, user: UserId) -> Result<bool> {
        let count: u32 = self.conn().query_row(
            "SELECT COUNT(*) FROM group_members WHERE group_id = ?1 AND user_id = ?2",
            params![group.to_string(), user.to_string()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    // ------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------

    pub fn add_group_member(&self, group: GroupId, user: UserId) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO group_members (group_id, user_id) VALUES (?1, ?2)",
            params![group.to_string(), user.to_string()],
        )?;
        Ok(())
    }

    pub fn remove_group_member(&self, group: GroupId, user: UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2",
            params![group.to_string(), user.to_string()],
        )?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Pinned list
    // ------------------------------------------------------------------

    /// Append a message to the group's pinned list. Inserting an already
    /// pinned id is a no-op, so the list gains each id at most once.
    pub fn pin_group_message(&self, group: GroupId, message: MessageId) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO group_pins (group_id, message_id) VALUES (?1, ?2)",
            params![group.to_string(), message.to_string()],
        )?;
        Ok(())
    }

    pub fn unpin_group_message(&self, group: GroupId, message: MessageId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM group_pins WHERE group_id = ?1 AND message_id = ?2",
            params![group.to_string(), message.to_string()],
        )?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a group by id. Returns `true` if a row was deleted.
    pub fn delete_group(&self, id: GroupId) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM groups WHERE id = ?1", params![id.to_string()])?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn group_members(&self, group: GroupId) -> Result<Vec<UserId>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT user_id FROM group_members WHERE group_id = ?1")?;

        let rows = stmt.query_map(params![group.to_string()], |row| {
            let id_str: String = row.get(0)?;
            UserId::parse(&id_str).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
        })?;

        let mut members = Vec::new();
        for row in rows {
            members.push(row?);
        }
        Ok(members)
    }

    fn group_pins(&self, group: GroupId) -> Result<Vec<MessageId>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT message_id FROM group_pins WHERE group_id = ?1")?;

        let rows = stmt.query_map(params![group.to_string()], |row| {
            let id_str: String = row.get(0)?;
            MessageId::parse(&id_str).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
        })?;

        let mut pins = Vec::new();
        for row in rows {
            pins.push(row?);
        }
        Ok(pins)
    }
}

fn not_found(e: rusqlite::Error) -> StoreError {
    match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
        other => StoreError::Sqlite(other),
    }
}

type GroupHead = (GroupId, String, Option<String>, UserId, DateTime<Utc>);

fn row_to_group_head(row: &rusqlite::Row<'_>) -> rusqlite::Result<GroupHead> {
    let id_str: String = row.get(0)?;
    let name: String = row.get(1)?;
    let avatar: Option<String> = row.get(2)?;
    let admin_str: String = row.get(3)?;
    let created_str: String = row.get(4)?;

    let id = GroupId::parse(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let admin = UserId::parse(&admin_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok((id, name, avatar, admin, created_at))
}
