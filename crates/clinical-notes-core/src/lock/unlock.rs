//! Unlock requests and supervisor decisions.
//!
//! The request lives on the note itself. Approval opens a time-boxed grant
//! (`unlock_until`); the next sweep after it runs out locks the note again.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{NotesError, NotesResult};
use crate::models::{Actor, AuditAction, ClinicalNote, NewAuditEntry, UnlockDecision};
use crate::notify::{Notification, NotificationKind};
use crate::validation::FieldError;
use crate::workflow::{
    check_version, load_note, require, required_text, resource_for, save, Action, Context,
};

/// A supervisor's answer to a pending request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "decision")]
pub enum UnlockResponse {
    #[serde(rename = "APPROVED", rename_all = "camelCase")]
    Approve {
        #[serde(default)]
        duration_hours: Option<u32>,
    },
    #[serde(rename = "DENIED")]
    Deny { reason: String },
}

/// Unlock request workflow.
pub struct UnlockService<'a> {
    ctx: Context<'a>,
}

impl<'a> UnlockService<'a> {
    pub fn new(ctx: Context<'a>) -> Self {
        Self { ctx }
    }

    /// Ask the author's supervisor to reopen a locked note.
    pub fn request(
        &self,
        actor: &Actor,
        note_id: &str,
        expected_version: i64,
        reason: &str,
    ) -> NotesResult<ClinicalNote> {
        let now = self.ctx.now;
        let max_age = self.ctx.config.unlock_max_age_days;
        let (note, supervisor) = self.ctx.guarded(actor, Some(note_id), "request unlock", |db| {
            let mut note = load_note(db, note_id)?;
            require(db, actor, Action::RequestUnlock, &note)?;
            check_version(&note, expected_version)?;

            if !note.is_effectively_locked(now) {
                return Err(NotesError::business("NOT_LOCKED", "Note is not locked"));
            }
            if now - note.session_date > Duration::days(max_age) {
                return Err(NotesError::business(
                    "UNLOCK_WINDOW_EXPIRED",
                    format!("Cannot request unlock for notes older than {max_age} days"),
                ));
            }
            if note.unlock_requested {
                return Err(NotesError::business(
                    "UNLOCK_ALREADY_REQUESTED",
                    "An unlock request is already pending for this note",
                ));
            }
            let reason = required_text("reason", reason, "A reason is required to request an unlock")?;

            note.unlock_requested = true;
            note.unlock_reason = Some(reason.clone());
            note.unlock_requested_at = Some(now);
            note.unlock_decision = None;
            note.unlock_decision_reason = None;
            note.unlock_approved_by = None;
            note.unlock_approval_date = None;

            save(db, &mut note, expected_version, now)?;
            self.ctx.audit().record(
                NewAuditEntry::new(AuditAction::UnlockRequest, &actor.user_id)
                    .note(note_id)
                    .reason(reason),
                now,
            )?;
            let supervisor = resource_for(db, &note)?.owner_supervisor_id;
            Ok((note, supervisor))
        })?;

        match supervisor {
            Some(supervisor_id) => self.ctx.notifier.notify(Notification {
                kind: NotificationKind::UnlockRequested,
                recipient_id: supervisor_id,
                note_id: note.id.clone(),
                subject: "Unlock Request Submitted".into(),
                body: format!(
                    "An unlock was requested for a {}: {}",
                    note.note_type,
                    note.unlock_reason.as_deref().unwrap_or_default()
                ),
            }),
            None => tracing::info!(note_id, "Unlock requested; author has no supervisor to notify"),
        }
        Ok(note)
    }

    /// Approve or deny the pending request.
    pub fn decide(
        &self,
        actor: &Actor,
        note_id: &str,
        expected_version: i64,
        response: UnlockResponse,
    ) -> NotesResult<ClinicalNote> {
        match response {
            UnlockResponse::Approve { duration_hours } => {
                self.approve(actor, note_id, expected_version, duration_hours)
            }
            UnlockResponse::Deny { reason } => self.deny(actor, note_id, expected_version, &reason),
        }
    }

    /// Open a grant of `duration_hours` (or the configured default).
    pub fn approve(
        &self,
        actor: &Actor,
        note_id: &str,
        expected_version: i64,
        duration_hours: Option<u32>,
    ) -> NotesResult<ClinicalNote> {
        let now = self.ctx.now;
        let config = self.ctx.config;
        let note = self.ctx.guarded(actor, Some(note_id), "approve unlock", |db| {
            let mut note = load_note(db, note_id)?;
            require(db, actor, Action::DecideUnlock, &note)?;
            check_version(&note, expected_version)?;
            ensure_pending(&note)?;

            let hours = duration_hours.unwrap_or(config.default_unlock_hours);
            if hours == 0 || hours > config.max_unlock_hours {
                let message = format!(
                    "Unlock duration must be between 1 and {} hours",
                    config.max_unlock_hours
                );
                return Err(NotesError::validation(
                    message.clone(),
                    vec![FieldError::new("durationHours", message)],
                ));
            }
            let until = now + Duration::hours(i64::from(hours));

            note.is_locked = false;
            note.locked_at = None;
            note.lock_reason = None;
            note.unlock_requested = false;
            note.unlock_decision = Some(UnlockDecision::Approved);
            note.unlock_approved_by = Some(actor.user_id.clone());
            note.unlock_approval_date = Some(now);
            note.unlock_duration_hours = Some(hours);
            note.unlock_until = Some(until);

            save(db, &mut note, expected_version, now)?;
            self.ctx.audit().record(
                NewAuditEntry::new(AuditAction::UnlockApproved, &actor.user_id)
                    .note(note_id)
                    .details(json!({ "durationHours": hours, "unlockUntil": until })),
                now,
            )?;
            Ok(note)
        })?;

        let hours = note.unlock_duration_hours.unwrap_or_default();
        self.ctx.notifier.notify(Notification {
            kind: NotificationKind::UnlockApproved,
            recipient_id: note.clinician_id.clone(),
            note_id: note.id.clone(),
            subject: "Unlock Request Approved".into(),
            body: format!("Your {} is unlocked for {} hours.", note.note_type, hours),
        });
        tracing::info!(note_id, hours, "Unlock approved");
        Ok(note)
    }

    /// Refuse the pending request. The note stays locked.
    pub fn deny(
        &self,
        actor: &Actor,
        note_id: &str,
        expected_version: i64,
        reason: &str,
    ) -> NotesResult<ClinicalNote> {
        let now = self.ctx.now;
        let note = self.ctx.guarded(actor, Some(note_id), "deny unlock", |db| {
            let mut note = load_note(db, note_id)?;
            require(db, actor, Action::DecideUnlock, &note)?;
            check_version(&note, expected_version)?;
            ensure_pending(&note)?;
            let reason =
                required_text("reason", reason, "A reason is required to deny an unlock request")?;

            note.unlock_requested = false;
            note.unlock_decision = Some(UnlockDecision::Denied);
            note.unlock_decision_reason = Some(reason.clone());

            save(db, &mut note, expected_version, now)?;
            self.ctx.audit().record(
                NewAuditEntry::new(AuditAction::UnlockRejected, &actor.user_id)
                    .note(note_id)
                    .reason(reason),
                now,
            )?;
            Ok(note)
        })?;

        self.ctx.notifier.notify(Notification {
            kind: NotificationKind::UnlockDenied,
            recipient_id: note.clinician_id.clone(),
            note_id: note.id.clone(),
            subject: "Unlock Request Denied".into(),
            body: format!(
                "Your unlock request was denied: {}",
                note.unlock_decision_reason.as_deref().unwrap_or_default()
            ),
        });
        Ok(note)
    }
}

fn ensure_pending(note: &ClinicalNote) -> NotesResult<()> {
    if !note.unlock_requested {
        return Err(NotesError::business(
            "NO_PENDING_REQUEST",
            "No pending unlock request for this note",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_wire_format() {
        let approve: UnlockResponse =
            serde_json::from_str(r#"{"decision":"APPROVED","durationHours":48}"#).unwrap();
        assert_eq!(approve, UnlockResponse::Approve { duration_hours: Some(48) });

        let approve: UnlockResponse = serde_json::from_str(r#"{"decision":"APPROVED"}"#).unwrap();
        assert_eq!(approve, UnlockResponse::Approve { duration_hours: None });

        let deny: UnlockResponse =
            serde_json::from_str(r#"{"decision":"DENIED","reason":"Outside window"}"#).unwrap();
        assert_eq!(deny, UnlockResponse::Deny { reason: "Outside window".into() });
    }
}
