//! Audit log database operations (append-only).

use rusqlite::{params, params_from_iter, OptionalExtension};

use super::{fmt_ts, parse_ts, Database, DbError, DbResult};
use crate::models::{AuditAction, AuditEntry, AuditQuery};

const AUDIT_COLUMNS: &str = r#"
    seq, id, action, user_id, note_id, timestamp, reason, previous_status, new_status,
    before_state, after_state, changed_fields, details, prev_hash, entry_hash
"#;

impl Database {
    /// Append an entry. `entry.seq` is ignored; the stored sequence is returned.
    pub fn insert_audit_entry(&self, entry: &AuditEntry) -> DbResult<i64> {
        let before_state = entry.before_state.as_ref().map(serde_json::to_string).transpose()?;
        let after_state = entry.after_state.as_ref().map(serde_json::to_string).transpose()?;
        let details = entry.details.as_ref().map(serde_json::to_string).transpose()?;
        let changed_fields = serde_json::to_string(&entry.changed_fields)?;

        self.conn.execute(
            r#"
            INSERT INTO audit_log (
                id, action, user_id, note_id, timestamp, reason, previous_status,
                new_status, before_state, after_state, changed_fields, details,
                prev_hash, entry_hash
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
            params![
                entry.id,
                entry.action.as_str(),
                entry.user_id,
                entry.note_id,
                fmt_ts(&entry.timestamp),
                entry.reason,
                entry.previous_status,
                entry.new_status,
                before_state,
                after_state,
                changed_fields,
                details,
                entry.prev_hash,
                entry.entry_hash,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Hash of the most recently appended entry.
    pub fn last_audit_hash(&self) -> DbResult<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT entry_hash FROM audit_log ORDER BY seq DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Get an entry by ID.
    pub fn get_audit_entry(&self, entry_id: &str) -> DbResult<Option<AuditEntry>> {
        self.conn
            .query_row(
                &format!("SELECT {AUDIT_COLUMNS} FROM audit_log WHERE id = ?"),
                [entry_id],
                read_audit_row,
            )
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// Entries matching `query`, in non-decreasing timestamp order.
    pub fn query_audit(&self, query: &AuditQuery) -> DbResult<Vec<AuditEntry>> {
        let mut sql = format!("SELECT {AUDIT_COLUMNS} FROM audit_log WHERE 1 = 1");
        let mut args: Vec<String> = Vec::new();

        if let Some(note_id) = &query.note_id {
            sql.push_str(" AND note_id = ?");
            args.push(note_id.clone());
        }
        if let Some(user_id) = &query.user_id {
            sql.push_str(" AND user_id = ?");
            args.push(user_id.clone());
        }
        if let Some(action) = query.action {
            sql.push_str(" AND action = ?");
            args.push(action.as_str().to_string());
        }
        if let Some(start) = &query.start {
            sql.push_str(" AND timestamp >= ?");
            args.push(fmt_ts(start));
        }
        if let Some(end) = &query.end {
            sql.push_str(" AND timestamp <= ?");
            args.push(fmt_ts(end));
        }
        sql.push_str(" ORDER BY timestamp ASC, seq ASC");

        self.query_audit_rows(&sql, args)
    }

    /// The whole log in append order.
    pub fn audit_chain(&self) -> DbResult<Vec<AuditEntry>> {
        self.query_audit_rows(
            &format!("SELECT {AUDIT_COLUMNS} FROM audit_log ORDER BY seq ASC"),
            Vec::new(),
        )
    }

    fn query_audit_rows(&self, sql: &str, args: Vec<String>) -> DbResult<Vec<AuditEntry>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), read_audit_row)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?.try_into()?);
        }
        Ok(entries)
    }
}

/// Intermediate row struct for database mapping.
struct AuditRow {
    seq: i64,
    id: String,
    action: String,
    user_id: String,
    note_id: Option<String>,
    timestamp: String,
    reason: Option<String>,
    previous_status: Option<String>,
    new_status: Option<String>,
    before_state: Option<String>,
    after_state: Option<String>,
    changed_fields: String,
    details: Option<String>,
    prev_hash: String,
    entry_hash: String,
}

fn read_audit_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditRow> {
    Ok(AuditRow {
        seq: row.get(0)?,
        id: row.get(1)?,
        action: row.get(2)?,
        user_id: row.get(3)?,
        note_id: row.get(4)?,
        timestamp: row.get(5)?,
        reason: row.get(6)?,
        previous_status: row.get(7)?,
        new_status: row.get(8)?,
        before_state: row.get(9)?,
        after_state: row.get(10)?,
        changed_fields: row.get(11)?,
        details: row.get(12)?,
        prev_hash: row.get(13)?,
        entry_hash: row.get(14)?,
    })
}

impl TryFrom<AuditRow> for AuditEntry {
    type Error = DbError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        let action = AuditAction::parse(&row.action)
            .ok_or_else(|| DbError::Constraint(format!("Unknown audit action: {}", row.action)))?;
        let parse_json = |s: Option<String>| -> DbResult<Option<serde_json::Value>> {
            Ok(s.map(|s| serde_json::from_str(&s)).transpose()?)
        };

        Ok(AuditEntry {
            seq: row.seq,
            id: row.id,
            action,
            user_id: row.user_id,
            note_id: row.note_id,
            timestamp: parse_ts(&row.timestamp)?,
            reason: row.reason,
            previous_status: row.previous_status,
            new_status: row.new_status,
            before_state: parse_json(row.before_state)?,
            after_state: parse_json(row.after_state)?,
            changed_fields: serde_json::from_str(&row.changed_fields)?,
            details: parse_json(row.details)?,
            prev_hash: row.prev_hash,
            entry_hash: row.entry_hash,
        })
    }
}
