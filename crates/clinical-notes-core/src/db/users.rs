//! User, credential and session database operations.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use super::{classify, fmt_ts, parse_ts, Database, DbError, DbResult};
use crate::models::{Role, User};

/// bcrypt hashes of a user's signing credentials.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredCredentials {
    pub pin_hash: Option<String>,
    pub password_hash: Option<String>,
}

const USER_COLUMNS: &str = r#"
    id, name, email, roles, supervisor_id, is_under_supervision,
    note_reminders, created_at
"#;

impl Database {
    /// Insert a new user.
    pub fn insert_user(&self, user: &User) -> DbResult<()> {
        let roles: Vec<&str> = user.roles.iter().map(Role::as_str).collect();
        let roles_json = serde_json::to_string(&roles)?;

        self.conn
            .execute(
                r#"
                INSERT INTO users (
                    id, name, email, roles, supervisor_id,
                    is_under_supervision, note_reminders, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
                params![
                    user.id,
                    user.name,
                    user.email,
                    roles_json,
                    user.supervisor_id,
                    user.is_under_supervision,
                    user.note_reminders,
                    user.created_at,
                ],
            )
            .map_err(|e| classify(e, "User"))?;
        Ok(())
    }

    /// Get a user by ID.
    pub fn get_user(&self, user_id: &str) -> DbResult<Option<User>> {
        self.conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"),
                [user_id],
                read_user_row,
            )
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// Users whose assigned supervisor is `supervisor_id`.
    pub fn list_supervisees(&self, supervisor_id: &str) -> DbResult<Vec<User>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE supervisor_id = ? ORDER BY name"
        ))?;
        let rows = stmt.query_map([supervisor_id], read_user_row)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?.try_into()?);
        }
        Ok(users)
    }

    /// Set the reminder preference for a user.
    pub fn set_note_reminders(&self, user_id: &str, enabled: bool) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "UPDATE users SET note_reminders = ?2 WHERE id = ?1",
            params![user_id, enabled],
        )?;
        Ok(rows_affected > 0)
    }

    /// Replace a user's signing credentials.
    pub fn set_credentials(&self, user_id: &str, creds: &StoredCredentials) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE users SET
                signature_pin_hash = ?2,
                password_hash = ?3
            WHERE id = ?1
            "#,
            params![user_id, creds.pin_hash, creds.password_hash],
        )?;
        Ok(rows_affected > 0)
    }

    /// Get a user's signing credentials, if any were set.
    pub fn get_credentials(&self, user_id: &str) -> DbResult<Option<StoredCredentials>> {
        let row: Option<(Option<String>, Option<String>)> = self
            .conn
            .query_row(
                "SELECT signature_pin_hash, password_hash FROM users WHERE id = ?",
                [user_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        Ok(row.and_then(|(pin_hash, password_hash)| {
            (pin_hash.is_some() || password_hash.is_some()).then_some(StoredCredentials {
                pin_hash,
                password_hash,
            })
        }))
    }

    /// Store a session keyed by the hash of its bearer token.
    pub fn insert_session(
        &self,
        token_hash: &str,
        user_id: &str,
        expires_at: &DateTime<Utc>,
        now: &DateTime<Utc>,
    ) -> DbResult<()> {
        self.conn
            .execute(
                "INSERT INTO sessions (token_hash, user_id, expires_at, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![token_hash, user_id, fmt_ts(expires_at), fmt_ts(now)],
            )
            .map_err(|e| classify(e, "User"))?;
        Ok(())
    }

    /// Look up a session: `(user_id, expires_at)`.
    pub fn get_session(&self, token_hash: &str) -> DbResult<Option<(String, DateTime<Utc>)>> {
        let row: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT user_id, expires_at FROM sessions WHERE token_hash = ?",
                [token_hash],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        row.map(|(user_id, expires_at)| Ok((user_id, parse_ts(&expires_at)?)))
            .transpose()
    }

    /// Drop sessions that expired before `now`.
    pub fn purge_expired_sessions(&self, now: &DateTime<Utc>) -> DbResult<usize> {
        Ok(self
            .conn
            .execute("DELETE FROM sessions WHERE expires_at < ?", [fmt_ts(now)])?)
    }
}

/// Intermediate row struct for database mapping.
struct UserRow {
    id: String,
    name: String,
    email: String,
    roles: String,
    supervisor_id: Option<String>,
    is_under_supervision: bool,
    note_reminders: bool,
    created_at: String,
}

fn read_user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        roles: row.get(3)?,
        supervisor_id: row.get(4)?,
        is_under_supervision: row.get(5)?,
        note_reminders: row.get(6)?,
        created_at: row.get(7)?,
    })
}

impl TryFrom<UserRow> for User {
    type Error = DbError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let names: Vec<String> = serde_json::from_str(&row.roles)?;
        let roles = names
            .iter()
            .map(|name| {
                Role::parse(name)
                    .ok_or_else(|| DbError::Constraint(format!("Unknown role: {}", name)))
            })
            .collect::<DbResult<Vec<_>>>()?;

        Ok(User {
            id: row.id,
            name: row.name,
            email: row.email,
            roles,
            supervisor_id: row.supervisor_id,
            is_under_supervision: row.is_under_supervision,
            note_reminders: row.note_reminders,
            created_at: row.created_at,
        })
    }
}
