//! Caller-facing audit operations.

use serde_json::json;

use super::{to_csv, ChainVerification};
use crate::error::{NotesError, NotesResult};
use crate::models::{Actor, AuditAction, AuditEntry, AuditQuery, NewAuditEntry};
use crate::workflow::{require, visible_clinicians, Action, Context};

/// Scoped audit queries, export and the immutability guard.
pub struct AuditAccess<'a> {
    ctx: Context<'a>,
}

impl<'a> AuditAccess<'a> {
    pub fn new(ctx: Context<'a>) -> Self {
        Self { ctx }
    }

    /// Entries matching `query` that the caller may read.
    ///
    /// Non-admins must name a note they can view, or query their own
    /// (or a supervisee's) activity.
    pub fn query(&self, actor: &Actor, query: AuditQuery) -> NotesResult<Vec<AuditEntry>> {
        let note_id = query.note_id.clone();
        self.ctx.guarded(actor, note_id.as_deref(), "query audit log", |_| {
            let query = self.scope(actor, query)?;
            Ok(self.ctx.audit().query(&query)?)
        })
    }

    /// CSV of the entries matching `query`. The export itself is audited.
    pub fn export_csv(&self, actor: &Actor, query: AuditQuery) -> NotesResult<String> {
        let note_id = query.note_id.clone();
        let now = self.ctx.now;
        let (csv, rows) = self.ctx.guarded(actor, note_id.as_deref(), "export audit log", |_| {
            let query = self.scope(actor, query)?;
            let entries = self.ctx.audit().query(&query)?;

            let mut entry = NewAuditEntry::new(AuditAction::Export, &actor.user_id).details(json!({
                "filters": query,
                "rowCount": entries.len(),
            }));
            if let Some(id) = query.note_id.as_deref() {
                entry = entry.note(id);
            }
            self.ctx.audit().record(entry, now)?;
            Ok((to_csv(&entries), entries.len()))
        })?;

        tracing::info!(user_id = %actor.user_id, rows, "Audit log exported");
        Ok(csv)
    }

    /// Audit entries are never modified. The attempt is recorded.
    pub fn modify_entry(&self, actor: &Actor, entry_id: &str) -> NotesResult<()> {
        self.reject(actor, entry_id, "modify")
    }

    /// Audit entries are never deleted. The attempt is recorded.
    pub fn delete_entry(&self, actor: &Actor, entry_id: &str) -> NotesResult<()> {
        self.reject(actor, entry_id, "delete")
    }

    /// Walk the hash chain. Administrators only.
    pub fn verify_chain(&self, actor: &Actor) -> NotesResult<ChainVerification> {
        self.ctx.guarded(actor, None, "verify audit chain", |_| {
            if !actor.is_admin() {
                return Err(NotesError::forbidden(
                    "You are not authorized to verify the audit log",
                ));
            }
            Ok(self.ctx.audit().verify_chain()?)
        })
    }

    fn reject(&self, actor: &Actor, entry_id: &str, verb: &str) -> NotesResult<()> {
        let attempted = format!("{verb} audit entry {entry_id}");
        self.ctx.guarded(actor, None, &attempted, |_| {
            Err(NotesError::forbidden("Audit log entries are immutable"))
        })
    }

    /// Narrow `query` to what `actor` may read.
    fn scope(&self, actor: &Actor, mut query: AuditQuery) -> NotesResult<AuditQuery> {
        if actor.is_admin() {
            return Ok(query);
        }
        let db = self.ctx.db;

        if let Some(note_id) = query.note_id.as_deref() {
            let note = db.get_note(note_id)?.ok_or_else(|| {
                NotesError::forbidden("You are not authorized to view the audit trail of this note")
            })?;
            require(db, actor, Action::ViewAudit, &note)?;
            return Ok(query);
        }

        let visible = visible_clinicians(db, actor)?.unwrap_or_default();
        match query.user_id.as_deref() {
            None => query.user_id = Some(actor.user_id.clone()),
            Some(user_id) if visible.iter().any(|id| id == user_id) => {}
            Some(_) => {
                return Err(NotesError::forbidden(
                    "You are not authorized to view another user's audit trail",
                ))
            }
        }
        Ok(query)
    }
}
