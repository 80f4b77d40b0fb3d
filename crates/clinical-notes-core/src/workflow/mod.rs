//! Note lifecycle workflow.
//!
//! ```text
//! create ──► DRAFT ──sign──► SIGNED / PENDING_COSIGN ──cosign──► COSIGNED
//!              ▲                         │
//!              └─ edit          return ──▼
//!                         RETURNED_FOR_REVISION ──resubmit──► PENDING_COSIGN
//! ```
//!
//! Every operation runs inside one transaction: authorize, guard, write with
//! a version compare-and-swap, append the audit entry. A denial rolls the
//! transaction back and is then recorded as `FAILED_AUTHORIZATION` on its own.

mod lifecycle;
pub mod policy;
pub mod signature;
pub mod transitions;

pub use lifecycle::*;
pub use policy::{authorize, Action, Resource};
pub use signature::SignatureInput;

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::audit::AuditLog;
use crate::config::EngineConfig;
use crate::db::Database;
use crate::error::{NotesError, NotesResult};
use crate::models::{Actor, AuditAction, ClinicalNote, NewAuditEntry};
use crate::notify::Notifier;

/// What one operation runs against: storage, settings, outbound messages and
/// the instant the operation is stamped with.
#[derive(Clone, Copy)]
pub struct Context<'a> {
    pub db: &'a Database,
    pub config: &'a EngineConfig,
    pub notifier: &'a dyn Notifier,
    pub now: DateTime<Utc>,
}

impl<'a> Context<'a> {
    pub fn new(
        db: &'a Database,
        config: &'a EngineConfig,
        notifier: &'a dyn Notifier,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            db,
            config,
            notifier,
            now,
        }
    }

    pub fn audit(&self) -> AuditLog<'a> {
        AuditLog::new(self.db)
    }

    /// Run `op` in a transaction. A `Forbidden` outcome is audited after the
    /// rollback so the denial record survives it.
    pub fn guarded<T>(
        &self,
        actor: &Actor,
        note_id: Option<&str>,
        attempted: &str,
        op: impl FnOnce(&Database) -> NotesResult<T>,
    ) -> NotesResult<T> {
        let result = self.db.atomically(op);

        if let Err(NotesError::Forbidden(reason)) = &result {
            tracing::warn!(
                user_id = %actor.user_id,
                note_id = ?note_id,
                action = attempted,
                reason = %reason,
                "Authorization denied"
            );
            let mut entry = NewAuditEntry::new(AuditAction::FailedAuthorization, &actor.user_id)
                .reason(reason.clone())
                .details(json!({ "attemptedAction": attempted }));
            if let Some(id) = note_id {
                entry = entry.note(id);
            }
            self.audit().record(entry, self.now)?;
        }

        result
    }
}

/// Load a note or fail with 404.
pub(crate) fn load_note(db: &Database, note_id: &str) -> NotesResult<ClinicalNote> {
    db.get_note(note_id)?
        .ok_or_else(|| NotesError::not_found("Clinical note"))
}

/// Ownership facts for `note`.
pub(crate) fn resource_for(db: &Database, note: &ClinicalNote) -> NotesResult<Resource> {
    let owner_supervisor_id = db
        .get_user(&note.clinician_id)?
        .and_then(|owner| owner.supervisor_id);
    Ok(Resource {
        owner_id: note.clinician_id.clone(),
        owner_supervisor_id,
    })
}

/// Authorize `action` on `note`, mapping a denial to 403.
pub(crate) fn require(
    db: &Database,
    actor: &Actor,
    action: Action,
    note: &ClinicalNote,
) -> NotesResult<()> {
    let resource = resource_for(db, note)?;
    authorize(actor, action, &resource).map_err(NotesError::Forbidden)
}

/// Reject a stale caller-supplied version.
pub(crate) fn check_version(note: &ClinicalNote, expected: i64) -> NotesResult<()> {
    if note.version != expected {
        return Err(NotesError::VersionConflict {
            expected,
            current: note.version,
        });
    }
    Ok(())
}

/// Persist `note` as the successor of `expected`, bumping its version.
pub(crate) fn save(
    db: &Database,
    note: &mut ClinicalNote,
    expected: i64,
    now: DateTime<Utc>,
) -> NotesResult<()> {
    note.version = expected + 1;
    note.updated_at = now;
    if db.update_note(note, expected)? {
        return Ok(());
    }
    match db.get_note_version(&note.id)? {
        Some(current) => Err(NotesError::VersionConflict { expected, current }),
        None => Err(NotesError::not_found("Clinical note")),
    }
}

/// Clinician IDs whose notes `actor` may see; `None` means everyone.
pub(crate) fn visible_clinicians(db: &Database, actor: &Actor) -> NotesResult<Option<Vec<String>>> {
    if actor.is_admin() {
        return Ok(None);
    }
    let mut ids = vec![actor.user_id.clone()];
    if actor.is_supervisor() {
        ids.extend(
            db.list_supervisees(&actor.user_id)?
                .into_iter()
                .map(|u| u.id),
        );
    }
    Ok(Some(ids))
}

/// Non-empty, trimmed text or a 400.
pub(crate) fn required_text(field: &str, value: &str, message: &str) -> NotesResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(NotesError::validation(
            message,
            vec![crate::validation::FieldError::new(field, message)],
        ));
    }
    Ok(trimmed.to_string())
}
