//! Create, edit, sign and countersign notes.

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::signature::{self, SignatureInput};
use super::transitions::{next_status, Event};
use super::{
    check_version, load_note, require, required_text, resource_for, save, visible_clinicians,
    Action, Context,
};
use crate::db::{Database, DbError, NoteFilter};
use crate::error::{NotesError, NotesResult};
use crate::models::{
    Actor, Amendment, AuditAction, ClinicalNote, NewAuditEntry, NewNote, NotePatch, NoteStatus,
    RevisionEntry,
};
use crate::notify::{Notification, NotificationKind};
use crate::validation::{self, FieldError, ValidationResult};

/// A written note plus the advisory validation of its content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NoteWithValidation {
    pub note: ClinicalNote,
    pub validation: ValidationResult,
}

impl NoteWithValidation {
    fn of(note: ClinicalNote) -> Self {
        let validation = validation::validate(note.note_type, &note.clinical_data());
        Self { note, validation }
    }
}

/// Input for returning a note to its author.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RevisionRequest {
    #[serde(default)]
    pub comments: String,
    #[serde(default)]
    pub required_changes: Vec<String>,
}

/// Note lifecycle operations for one caller at one instant.
pub struct NoteService<'a> {
    ctx: Context<'a>,
}

impl<'a> NoteService<'a> {
    pub fn new(ctx: Context<'a>) -> Self {
        Self { ctx }
    }

    /// Create a DRAFT note owned by the caller.
    pub fn create(&self, actor: &Actor, input: NewNote) -> NotesResult<NoteWithValidation> {
        let note_type = input.note_type.ok_or_else(|| {
            NotesError::validation(
                "noteType is required",
                vec![FieldError::new("noteType", "noteType is required")],
            )
        })?;
        if input.client_id.trim().is_empty() {
            return Err(NotesError::validation(
                "clientId is required",
                vec![FieldError::new("clientId", "clientId is required")],
            ));
        }

        let now = self.ctx.now;
        let config = self.ctx.config;
        let note = self.ctx.guarded(actor, None, "create", |db| {
            if db.get_client(&input.client_id)?.is_none() {
                return Err(NotesError::not_found("Client"));
            }

            let mut input = input;
            if let Some(appointment_id) = input.appointment_id.as_deref() {
                let appointment = db
                    .get_appointment(appointment_id)?
                    .ok_or_else(|| NotesError::not_found("Appointment"))?;
                if appointment.client_id != input.client_id {
                    return Err(NotesError::business(
                        "APPOINTMENT_MISMATCH",
                        "Appointment does not belong to this client",
                    ));
                }
                if appointment.clinician_id != actor.user_id && !actor.is_admin() {
                    return Err(NotesError::forbidden(
                        "You are not authorized to document another clinician's appointment",
                    ));
                }
                if db.note_exists_for_appointment(appointment_id)? {
                    return Err(NotesError::DuplicateNote);
                }
                input.session_date = input.session_date.or(Some(appointment.appointment_date));
            }

            if input.session_date.is_some_and(|date| date > now) {
                return Err(NotesError::business(
                    "FUTURE_SESSION_DATE",
                    "Session date cannot be in the future",
                ));
            }
            check_codes(&input.diagnosis_codes, &input.cpt_codes)?;

            if note_type.requires_prior_intake() && !db.has_signed_intake(&input.client_id)? {
                return Err(NotesError::business(
                    "PREREQUISITE_MISSING",
                    format!(
                        "Intake Assessment required: sign an Intake Assessment for this client before writing a {}",
                        note_type
                    ),
                ));
            }

            let note = ClinicalNote::new(
                input,
                note_type,
                actor.user_id.clone(),
                now,
                config.note_due_days,
            );
            check_structure(&note)?;

            db.insert_note(&note).map_err(|e| match e {
                DbError::Duplicate(_) => NotesError::DuplicateNote,
                other => other.into(),
            })?;
            self.ctx.audit().record(
                NewAuditEntry::new(AuditAction::Create, &actor.user_id)
                    .note(&note.id)
                    .states(json!(null), note.editable_snapshot(), Vec::new())
                    .details(json!({ "noteType": note.note_type, "clientId": note.client_id })),
                now,
            )?;
            Ok(note)
        })?;

        tracing::info!(note_id = %note.id, note_type = %note.note_type, "Note created");
        Ok(NoteWithValidation::of(note))
    }

    /// Read one note. Every successful read is audited.
    pub fn view(&self, actor: &Actor, note_id: &str) -> NotesResult<ClinicalNote> {
        self.ctx.guarded(actor, Some(note_id), "view", |db| {
            let note = load_note(db, note_id)?;
            require(db, actor, Action::View, &note)?;
            self.ctx.audit().record(
                NewAuditEntry::new(AuditAction::View, &actor.user_id).note(note_id),
                self.ctx.now,
            )?;
            Ok(note)
        })
    }

    /// Notes visible to the caller that match `filter`.
    pub fn list(&self, actor: &Actor, filter: NoteFilter) -> NotesResult<Vec<ClinicalNote>> {
        let mut filter = filter;
        if let Some(visible) = visible_clinicians(self.ctx.db, actor)? {
            filter.clinician_ids = Some(match filter.clinician_ids.take() {
                Some(requested) => requested
                    .into_iter()
                    .filter(|id| visible.contains(id))
                    .collect(),
                None => visible,
            });
        }
        Ok(self.ctx.db.list_notes(&filter)?)
    }

    /// Edit clinical content.
    pub fn edit(
        &self,
        actor: &Actor,
        note_id: &str,
        expected_version: i64,
        patch: NotePatch,
    ) -> NotesResult<NoteWithValidation> {
        let now = self.ctx.now;
        let note = self.ctx.guarded(actor, Some(note_id), "edit", |db| {
            let mut note = load_note(db, note_id)?;
            require(db, actor, Action::Edit, &note)?;
            check_version(&note, expected_version)?;

            let grant = note.has_active_grant(now);
            let admin_override = actor.is_admin() && note.status.is_editable();
            if note.is_effectively_locked(now) && !grant && !admin_override {
                return Err(NotesError::forbidden(
                    "Cannot edit a locked note; request an unlock first",
                ));
            }
            if !note.status.is_editable() && !grant {
                return Err(NotesError::forbidden("Cannot edit signed note"));
            }

            if patch.session_date.is_some_and(|date| date > now) {
                return Err(NotesError::business(
                    "FUTURE_SESSION_DATE",
                    "Session date cannot be in the future",
                ));
            }
            check_codes(
                patch.diagnosis_codes.as_deref().unwrap_or_default(),
                patch.cpt_codes.as_deref().unwrap_or_default(),
            )?;

            let before = note.editable_snapshot();
            let changed = note.apply_patch(patch);
            if changed.is_empty() {
                return Ok(note);
            }
            check_structure(&note)?;

            save(db, &mut note, expected_version, now)?;
            self.ctx.audit().record(
                NewAuditEntry::new(AuditAction::Edit, &actor.user_id)
                    .note(note_id)
                    .states(before, note.editable_snapshot(), changed),
                now,
            )?;
            Ok(note)
        })?;

        Ok(NoteWithValidation::of(note))
    }

    /// Delete a DRAFT note.
    pub fn delete(&self, actor: &Actor, note_id: &str, expected_version: i64) -> NotesResult<()> {
        let now = self.ctx.now;
        self.ctx.guarded(actor, Some(note_id), "delete", |db| {
            let note = load_note(db, note_id)?;
            require(db, actor, Action::Delete, &note)?;
            check_version(&note, expected_version)?;

            if note.is_effectively_locked(now) {
                return Err(NotesError::forbidden("Cannot delete a locked note"));
            }
            if note.status.is_signed() {
                return Err(NotesError::forbidden("Cannot delete signed note"));
            }
            if note.status != NoteStatus::Draft {
                return Err(NotesError::forbidden("Only draft notes can be deleted"));
            }
            if !note.amendments.is_empty() {
                return Err(NotesError::forbidden("Cannot delete a note with amendments"));
            }

            if !db.delete_note(note_id, expected_version)? {
                return Err(match db.get_note_version(note_id)? {
                    Some(current) => NotesError::VersionConflict {
                        expected: expected_version,
                        current,
                    },
                    None => NotesError::not_found("Clinical note"),
                });
            }
            self.ctx.audit().record(
                NewAuditEntry::new(AuditAction::Delete, &actor.user_id)
                    .note(note_id)
                    .status_change(note.status, "DELETED")
                    .states(note.editable_snapshot(), json!(null), Vec::new()),
                now,
            )?;
            Ok(())
        })?;

        tracing::info!(note_id, "Draft note deleted");
        Ok(())
    }

    /// Sign a DRAFT. Supervised signers route the note to their supervisor.
    pub fn sign(
        &self,
        actor: &Actor,
        note_id: &str,
        expected_version: i64,
        credential: &SignatureInput,
    ) -> NotesResult<ClinicalNote> {
        let now = self.ctx.now;
        let (note, supervisor) = self.ctx.guarded(actor, Some(note_id), "sign", |db| {
            let mut note = load_note(db, note_id)?;
            require(db, actor, Action::Sign, &note)?;
            check_version(&note, expected_version)?;

            if note.status != NoteStatus::Draft {
                return Err(NotesError::InvalidTransition {
                    action: "sign",
                    status: note.status,
                });
            }
            if note.is_effectively_locked(now) && !note.has_active_grant(now) && !actor.is_admin()
            {
                return Err(NotesError::forbidden(
                    "Cannot sign a locked note; request an unlock first",
                ));
            }

            let result = validation::validate(note.note_type, &note.clinical_data());
            if !result.is_valid {
                return Err(NotesError::validation("Note failed validation", result.errors));
            }
            verify_credential(db, actor, credential)?;

            let signer = db
                .get_user(&actor.user_id)?
                .ok_or_else(|| NotesError::Unauthenticated("Unknown signer".into()))?;
            let supervised = signer.is_under_supervision && signer.supervisor_id.is_some();
            let previous = note.status;
            note.status = transition(previous, Event::Sign { supervised })?;
            note.requires_cosign = supervised;
            note.signed_by = Some(actor.user_id.clone());
            note.signed_date = Some(now);
            note.days_to_complete = Some(note.days_since_session(now));
            note.completed_on_time = Some(now <= note.due_date);

            save(db, &mut note, expected_version, now)?;
            self.ctx.audit().record(
                NewAuditEntry::new(AuditAction::Sign, &actor.user_id)
                    .note(note_id)
                    .status_change(previous, note.status)
                    .details(json!({
                        "requiresCosign": supervised,
                        "completedOnTime": note.completed_on_time,
                    })),
                now,
            )?;
            let supervisor = if supervised { signer.supervisor_id } else { None };
            Ok((note, supervisor))
        })?;

        if let Some(supervisor_id) = supervisor {
            self.ctx.notifier.notify(Notification {
                kind: NotificationKind::CosignRequested,
                recipient_id: supervisor_id,
                note_id: note.id.clone(),
                subject: "Cosignature Requested".into(),
                body: format!("A {} is waiting for your cosignature.", note.note_type),
            });
        }
        tracing::info!(note_id, status = %note.status, "Note signed");
        Ok(note)
    }

    /// Countersign a PENDING_COSIGN note.
    pub fn cosign(
        &self,
        actor: &Actor,
        note_id: &str,
        expected_version: i64,
        credential: &SignatureInput,
        comments: Option<String>,
    ) -> NotesResult<ClinicalNote> {
        let now = self.ctx.now;
        self.ctx.guarded(actor, Some(note_id), "cosign", |db| {
            let mut note = load_note(db, note_id)?;
            require(db, actor, Action::Cosign, &note)?;
            check_version(&note, expected_version)?;

            let previous = note.status;
            let next = transition(previous, Event::Cosign)?;
            verify_credential(db, actor, credential)?;

            note.status = next;
            note.cosigned_by = Some(actor.user_id.clone());
            note.cosigned_date = Some(now);
            note.supervisor_comments = comments
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty());

            save(db, &mut note, expected_version, now)?;
            self.ctx.audit().record(
                NewAuditEntry::new(AuditAction::Cosign, &actor.user_id)
                    .note(note_id)
                    .status_change(previous, note.status),
                now,
            )?;
            Ok(note)
        })
    }

    /// Send a PENDING_COSIGN note back to its author.
    pub fn return_for_revision(
        &self,
        actor: &Actor,
        note_id: &str,
        expected_version: i64,
        request: RevisionRequest,
    ) -> NotesResult<ClinicalNote> {
        let now = self.ctx.now;
        let min_len = self.ctx.config.min_revision_comment_len;
        let note = self.ctx.guarded(actor, Some(note_id), "return", |db| {
            let mut note = load_note(db, note_id)?;
            require(db, actor, Action::ReturnForRevision, &note)?;
            check_version(&note, expected_version)?;

            let previous = note.status;
            let next = transition(previous, Event::Return)?;

            let comments = request.comments.trim().to_string();
            if comments.chars().count() < min_len {
                let message = format!("Revision comments must be at least {min_len} characters");
                return Err(NotesError::validation(
                    message.clone(),
                    vec![FieldError::new("comments", message)],
                ));
            }
            let required_changes: Vec<String> = request
                .required_changes
                .iter()
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect();
            if required_changes.is_empty() {
                let message = "At least one required change must be listed";
                return Err(NotesError::validation(
                    message,
                    vec![FieldError::new("requiredChanges", message)],
                ));
            }

            note.status = next;
            note.revision_count += 1;
            note.revision_history.push(RevisionEntry {
                comments: comments.clone(),
                required_changes: required_changes.clone(),
                returned_by: actor.user_id.clone(),
                timestamp: now,
                resubmitted_at: None,
            });

            save(db, &mut note, expected_version, now)?;
            self.ctx.audit().record(
                NewAuditEntry::new(AuditAction::StatusChange, &actor.user_id)
                    .note(note_id)
                    .status_change(previous, note.status)
                    .reason(comments)
                    .details(json!({
                        "requiredChanges": required_changes,
                        "revisionCount": note.revision_count,
                    })),
                now,
            )?;
            Ok(note)
        })?;

        self.ctx.notifier.notify(Notification {
            kind: NotificationKind::ReturnedForRevision,
            recipient_id: note.clinician_id.clone(),
            note_id: note.id.clone(),
            subject: "Note Returned for Revision".into(),
            body: format!(
                "Your {} was returned with {} required change(s).",
                note.note_type,
                note.revision_history
                    .last()
                    .map(|r| r.required_changes.len())
                    .unwrap_or_default()
            ),
        });
        Ok(note)
    }

    /// Resubmit a returned note for cosignature.
    pub fn resubmit(
        &self,
        actor: &Actor,
        note_id: &str,
        expected_version: i64,
    ) -> NotesResult<ClinicalNote> {
        let now = self.ctx.now;
        let (note, supervisor) = self.ctx.guarded(actor, Some(note_id), "resubmit", |db| {
            let mut note = load_note(db, note_id)?;
            require(db, actor, Action::Resubmit, &note)?;
            check_version(&note, expected_version)?;

            let previous = note.status;
            let next = transition(previous, Event::Resubmit)?;

            let result = validation::validate(note.note_type, &note.clinical_data());
            if !result.is_valid {
                return Err(NotesError::validation("Note failed validation", result.errors));
            }

            note.status = next;
            if let Some(round) = note.revision_history.last_mut() {
                round.resubmitted_at = Some(now);
            }

            save(db, &mut note, expected_version, now)?;
            self.ctx.audit().record(
                NewAuditEntry::new(AuditAction::StatusChange, &actor.user_id)
                    .note(note_id)
                    .status_change(previous, note.status)
                    .details(json!({ "revisionCount": note.revision_count })),
                now,
            )?;
            let supervisor = resource_for(db, &note)?.owner_supervisor_id;
            Ok((note, supervisor))
        })?;

        if let Some(supervisor_id) = supervisor {
            self.ctx.notifier.notify(Notification {
                kind: NotificationKind::CosignRequested,
                recipient_id: supervisor_id,
                note_id: note.id.clone(),
                subject: "Revised Note Resubmitted".into(),
                body: format!("A revised {} is waiting for your cosignature.", note.note_type),
            });
        }
        Ok(note)
    }

    /// Attach a correction to a signed note. Allowed while locked.
    pub fn amend(
        &self,
        actor: &Actor,
        note_id: &str,
        expected_version: i64,
        reason: &str,
        change_description: &str,
    ) -> NotesResult<ClinicalNote> {
        let now = self.ctx.now;
        self.ctx.guarded(actor, Some(note_id), "amend", |db| {
            let mut note = load_note(db, note_id)?;
            require(db, actor, Action::Amend, &note)?;
            check_version(&note, expected_version)?;

            if !note.status.is_signed() {
                return Err(NotesError::InvalidTransition {
                    action: "amend",
                    status: note.status,
                });
            }
            let reason = required_text("reason", reason, "Amendment reason is required")?;
            let change_description = required_text(
                "changeDescription",
                change_description,
                "Amendment change description is required",
            )?;

            let amendment = Amendment {
                id: uuid::Uuid::new_v4().to_string(),
                reason: reason.clone(),
                change_description: change_description.clone(),
                author: actor.user_id.clone(),
                timestamp: now,
            };
            let amendment_id = amendment.id.clone();
            note.amendments.push(amendment);

            save(db, &mut note, expected_version, now)?;
            self.ctx.audit().record(
                NewAuditEntry::new(AuditAction::Amendment, &actor.user_id)
                    .note(note_id)
                    .reason(reason)
                    .details(json!({
                        "amendmentId": amendment_id,
                        "changeDescription": change_description,
                    })),
                now,
            )?;
            Ok(note)
        })
    }
}

fn transition(status: NoteStatus, event: Event) -> NotesResult<NoteStatus> {
    next_status(status, event).ok_or(NotesError::InvalidTransition {
        action: event.name(),
        status,
    })
}

fn verify_credential(db: &Database, actor: &Actor, credential: &SignatureInput) -> NotesResult<()> {
    let verified = db
        .get_credentials(&actor.user_id)?
        .is_some_and(|stored| signature::verify(&stored, credential));
    if !verified {
        return Err(NotesError::Unauthenticated(
            "Invalid signature credentials".into(),
        ));
    }
    Ok(())
}

fn check_codes(diagnosis: &[String], cpt: &[String]) -> NotesResult<()> {
    if let Some(code) = validation::first_invalid_diagnosis(diagnosis) {
        return Err(NotesError::business(
            "INVALID_DIAGNOSIS_CODE",
            format!("Invalid diagnosis code '{code}'"),
        ));
    }
    if let Some(code) = validation::first_invalid_cpt(cpt) {
        return Err(NotesError::business(
            "INVALID_CPT_CODE",
            format!("Invalid CPT code '{code}'"),
        ));
    }
    Ok(())
}

fn check_structure(note: &ClinicalNote) -> NotesResult<()> {
    let errors = validation::check_input(&note.clinical_data());
    if !errors.is_empty() {
        return Err(NotesError::validation("Invalid note data", errors));
    }
    Ok(())
}
