//! CRUD operations for [`User`] records.

use chrono::{DateTime, Utc};
use rusqlite::params;

use parley_shared::{UserId, UserRef};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::User;

impl Database {
    /// Insert a new user.
    pub fn create_user(&self, user: &User) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, username, email, avatar, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user.id.to_string(),
                user.username,
                user.email,
                user.avatar,
                user.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Fetch a single user by id.
    pub fn get_user(&self, id: UserId) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT id, username, email, avatar, created_at
                 FROM users WHERE id = ?1",
                params![id.to_string()],
                row_to_user,
            )
            .map_err(not_found)
    }

    /// Fetch the display shape for a user.
    pub fn get_user_ref(&self, id: UserId) -> Result<UserRef> {
        self.conn()
            .query_row(
                "SELECT id, username, avatar FROM users WHERE id = ?1",
                params![id.to_string()],
                row_to_user_ref,
            )
            .map_err(not_found)
    }

    /// List all users, ordered by username.
    pub fn list_users(&self) -> Result<Vec<User>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, username, email, avatar, created_at
             FROM users ORDER BY username ASC",
        )?;

        let rows = stmt.query_map([], row_to_user)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    /// Update a user's profile fields.
    pub fn update_user(&self, user: &User) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE users SET username = ?2, email = ?3, avatar = ?4 WHERE id = ?1",
            params![
                user.id.to_string(),
                user.username,
                user.email,
                user.avatar
            ],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Delete a user by id. Returns `true` if a row was deleted.
    pub fn delete_user(&self, id: UserId) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM users WHERE id = ?1", params![id.to_string()])?;
        Ok(affected > 0)
    }
}

fn not_found(e: rusqlite::Error) -> StoreError {
    match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
        other => StoreError::Sqlite(other),
    }
}

/// Map a `rusqlite::Row` to a [`User`].
fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id_str: String = row.get(0)?;
    let username: String = row.get(1)?;
    let email: Option<String> = row.get(2)?;
    let avatar: Option<String> = row.get(3)?;
    let created_str: String = row.get(4)?;

    let id = UserId::parse(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(User {
        id,
        username,
        email,
        avatar,
        created_at,
    })
}

fn row_to_user_ref(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRef> {
    let id_str: String = row.get(0)?;
    let username: String = row.get(1)?;
    let avatar: Option<String> = row.get(2)?;

    let id = UserId::parse(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(UserRef {
        id,
        username,
        avatar,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_fetch() {
        let db = Database::open_in_memory().unwrap();
        let user = User::new("alice");

        db.create_user(&user).unwrap();

        let fetched = db.get_user(user.id).unwrap();
        assert_eq!(fetched, user);

        let as_ref = db.get_user_ref(user.id).unwrap();
        assert_eq!(as_ref.username, "alice");
    }

    #[test]
    fn missing_user_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            db.get_user(UserId::new()),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn list_is_ordered_by_username() {
        let db = Database::open_in_memory().unwrap();
        db.create_user(&User::new("carol")).unwrap();
        db.create_user(&User::new("alice")).unwrap();
        db.create_user(&User::new("bob")).unwrap();

        let names: Vec<String> = db
            .list_users()
            .unwrap()
            .into_iter()
            .map(|u| u.username)
            .collect();
        assert_eq!(names, vec!["alice", "bob", "carol"]);
    }
}
