//! Note lifecycle integration tests.

mod common;

use chrono::Duration;
use serde_json::json;

use clinical_notes_core::models::{AuditQuery, NewNote, NotePatch, NoteType, OutcomeMeasure};
use clinical_notes_core::notify::NotificationKind;
use clinical_notes_core::workflow::{RevisionRequest, SignatureInput};
use clinical_notes_core::{AuditAction, NoteStatus, NotesError};

use common::{content, intake_input, progress_input, Practice};

#[test]
fn test_independent_clinician_signs_directly() {
    let practice = Practice::new();
    let intake = practice.signed_intake(&practice.clinician);

    assert_eq!(intake.status, NoteStatus::Signed);
    assert!(!intake.requires_cosign);
    assert_eq!(intake.signed_by.as_deref(), Some(practice.clinician.user_id.as_str()));
    assert_eq!(intake.days_to_complete, Some(1));
    assert_eq!(intake.completed_on_time, Some(true));
    assert_eq!(intake.version, 2);
}

#[test]
fn test_supervised_note_requires_cosign() {
    let practice = Practice::new();
    let intake = practice.signed_intake(&practice.supervisee);
    assert_eq!(intake.status, NoteStatus::PendingCosign);
    assert!(intake.requires_cosign);

    let requested = practice.notifier.sent_to(&practice.supervisor.user_id);
    assert_eq!(requested.len(), 1);
    assert_eq!(requested[0].kind, NotificationKind::CosignRequested);

    // The author cannot countersign their own note
    let err = practice
        .engine
        .cosign_note(&practice.supervisee, &intake.id, intake.version, &practice.pin(), None)
        .unwrap_err();
    assert_eq!(err.status_code(), 403);

    let cosigned = practice
        .engine
        .cosign_note(
            &practice.supervisor,
            &intake.id,
            intake.version,
            &practice.pin(),
            Some("Thorough assessment".into()),
        )
        .unwrap();
    assert_eq!(cosigned.status, NoteStatus::Cosigned);
    assert_eq!(cosigned.cosigned_by.as_deref(), Some(practice.supervisor.user_id.as_str()));
    assert_eq!(cosigned.supervisor_comments.as_deref(), Some("Thorough assessment"));
}

#[test]
fn test_progress_note_requires_signed_intake() {
    let practice = Practice::new();

    let err = practice
        .engine
        .create_note(&practice.clinician, progress_input(&practice.client_id))
        .unwrap_err();
    assert_eq!(err.status_code(), 422);
    assert_eq!(err.error_code(), "PREREQUISITE_MISSING");
    assert!(err.to_string().starts_with("Intake Assessment required"));

    // A draft intake is not enough
    practice
        .engine
        .create_note(&practice.clinician, intake_input(&practice.client_id))
        .unwrap();
    let err = practice
        .engine
        .create_note(&practice.clinician, progress_input(&practice.client_id))
        .unwrap_err();
    assert_eq!(err.error_code(), "PREREQUISITE_MISSING");

    practice.signed_intake(&practice.clinician);
    let note = practice.draft_progress(&practice.clinician);
    assert_eq!(note.status, NoteStatus::Draft);
    assert_eq!(note.due_date, note.session_date + Duration::days(3));
}

#[test]
fn test_incomplete_note_saves_but_cannot_be_signed() {
    let practice = Practice::new();
    practice.signed_intake(&practice.clinician);

    let mut input = progress_input(&practice.client_id);
    input.content.insert("plan".into(), json!("Continue."));
    let created = practice.engine.create_note(&practice.clinician, input).unwrap();
    assert!(!created.validation.is_valid);

    let err = practice
        .engine
        .sign_note(&practice.clinician, &created.note.id, created.note.version, &practice.pin())
        .unwrap_err();
    match err {
        NotesError::Validation { errors, .. } => {
            assert!(errors.iter().any(|e| e.field == "plan"));
        }
        other => panic!("expected validation error, got {other:?}"),
    }

    // Fixing the field makes it signable
    let patch = NotePatch {
        content: content(json!({ "plan": "Continue weekly CBT and add a sleep diary." })),
        ..Default::default()
    };
    let edited = practice
        .engine
        .edit_note(&practice.clinician, &created.note.id, created.note.version, patch)
        .unwrap();
    assert!(edited.validation.is_valid);
    let signed = practice
        .engine
        .sign_note(&practice.clinician, &edited.note.id, edited.note.version, &practice.pin())
        .unwrap();
    assert_eq!(signed.status, NoteStatus::Signed);
}

#[test]
fn test_outcome_measure_out_of_range_blocks_write() {
    let practice = Practice::new();
    practice.signed_intake(&practice.clinician);

    let mut input = progress_input(&practice.client_id);
    input.outcome_measures = vec![OutcomeMeasure {
        measure_type: "PHQ-9".into(),
        score: 30.0,
        administered_at: None,
    }];
    let err = practice.engine.create_note(&practice.clinician, input).unwrap_err();
    assert_eq!(err.status_code(), 400);
    match err {
        NotesError::Validation { errors, .. } => {
            assert!(errors[0].message.contains("between 0 and 27"));
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn test_wrong_pin_is_rejected() {
    let practice = Practice::new();
    let created = practice
        .engine
        .create_note(&practice.clinician, intake_input(&practice.client_id))
        .unwrap();

    let err = practice
        .engine
        .sign_note(
            &practice.clinician,
            &created.note.id,
            created.note.version,
            &SignatureInput::pin("0000"),
        )
        .unwrap_err();
    assert_eq!(err.status_code(), 401);

    let note = practice.engine.view_note(&practice.clinician, &created.note.id).unwrap();
    assert_eq!(note.status, NoteStatus::Draft);
    assert_eq!(note.version, created.note.version);
}

#[test]
fn test_revision_cycle() {
    let practice = Practice::new();
    let engine = &practice.engine;
    let intake = practice.signed_intake(&practice.supervisee);

    let err = engine
        .return_for_revision(
            &practice.supervisor,
            &intake.id,
            intake.version,
            RevisionRequest {
                comments: "Too short".into(),
                required_changes: vec!["Add history".into()],
            },
        )
        .unwrap_err();
    assert_eq!(err.status_code(), 400);

    let returned = engine
        .return_for_revision(
            &practice.supervisor,
            &intake.id,
            intake.version,
            RevisionRequest {
                comments: "Please expand the presenting problem history.".into(),
                required_changes: vec!["Add onset and duration".into()],
            },
        )
        .unwrap();
    assert_eq!(returned.status, NoteStatus::ReturnedForRevision);
    assert_eq!(returned.revision_count, 1);
    assert_eq!(returned.revision_history.len(), 1);

    let to_author = practice.notifier.sent_to(&practice.supervisee.user_id);
    assert_eq!(to_author.last().unwrap().kind, NotificationKind::ReturnedForRevision);

    let patch = NotePatch {
        content: content(json!({
            "presentingProblem": "Persistent worry and sleep disruption since a job loss in November",
        })),
        ..Default::default()
    };
    let edited = engine
        .edit_note(&practice.supervisee, &returned.id, returned.version, patch)
        .unwrap();

    let resubmitted = engine
        .resubmit_note(&practice.supervisee, &edited.note.id, edited.note.version)
        .unwrap();
    assert_eq!(resubmitted.status, NoteStatus::PendingCosign);
    assert!(resubmitted.revision_history[0].resubmitted_at.is_some());

    let cosigned = engine
        .cosign_note(&practice.supervisor, &resubmitted.id, resubmitted.version, &practice.pin(), None)
        .unwrap();
    assert_eq!(cosigned.status, NoteStatus::Cosigned);

    let status_changes = engine
        .query_audit(
            &practice.admin,
            AuditQuery {
                note_id: Some(intake.id.clone()),
                action: Some(AuditAction::StatusChange),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(status_changes.len(), 2);
    assert_eq!(status_changes[0].new_status.as_deref(), Some("RETURNED_FOR_REVISION"));
}

#[test]
fn test_second_return_keeps_both_rounds() {
    let practice = Practice::new();
    let engine = &practice.engine;
    let intake = practice.signed_intake(&practice.supervisee);

    let first = engine
        .return_for_revision(
            &practice.supervisor,
            &intake.id,
            intake.version,
            RevisionRequest {
                comments: "Please expand the presenting problem history.".into(),
                required_changes: vec!["Add onset and duration".into()],
            },
        )
        .unwrap();
    let first_round = first.revision_history[0].clone();

    practice.clock.advance(Duration::hours(1));
    let resubmitted = engine
        .resubmit_note(&practice.supervisee, &first.id, first.version)
        .unwrap();

    practice.clock.advance(Duration::hours(1));
    let second = engine
        .return_for_revision(
            &practice.supervisor,
            &resubmitted.id,
            resubmitted.version,
            RevisionRequest {
                comments: "Diagnosis rationale is still missing.".into(),
                required_changes: vec!["Justify F41.1".into(), "List rule-outs".into()],
            },
        )
        .unwrap();

    assert_eq!(second.status, NoteStatus::ReturnedForRevision);
    assert_eq!(second.revision_count, 2);
    assert_eq!(second.revision_history.len(), 2);

    // The first round is kept as returned, apart from its resubmission stamp
    let kept = &second.revision_history[0];
    assert_eq!(kept.comments, first_round.comments);
    assert_eq!(kept.required_changes, first_round.required_changes);
    assert_eq!(kept.returned_by, first_round.returned_by);
    assert_eq!(kept.timestamp, first_round.timestamp);
    assert_eq!(kept.resubmitted_at, Some(resubmitted.updated_at));

    let latest = &second.revision_history[1];
    assert!(latest.timestamp > kept.timestamp);
    assert_eq!(latest.required_changes.len(), 2);
    assert!(latest.resubmitted_at.is_none());

    // Reading it back gives the same history
    let stored = engine.view_note(&practice.supervisee, &second.id).unwrap();
    assert_eq!(stored.revision_history, second.revision_history);
}

#[test]
fn test_signed_note_is_frozen() {
    let practice = Practice::new();
    let intake = practice.signed_intake(&practice.clinician);

    let patch = NotePatch {
        content: content(json!({ "presentingProblem": "Rewritten after signing, which is not allowed" })),
        ..Default::default()
    };
    let err = practice
        .engine
        .edit_note(&practice.clinician, &intake.id, intake.version, patch)
        .unwrap_err();
    assert_eq!(err.status_code(), 403);
    assert_eq!(err.to_string(), "Cannot edit signed note");

    let err = practice
        .engine
        .delete_note(&practice.clinician, &intake.id, intake.version)
        .unwrap_err();
    assert_eq!(err.to_string(), "Cannot delete signed note");

    // Amendments are the only way to correct it
    let amended = practice
        .engine
        .amend_note(
            &practice.clinician,
            &intake.id,
            intake.version,
            "Incorrect onset date",
            "Onset was October, not November",
        )
        .unwrap();
    assert_eq!(amended.amendments.len(), 1);
    assert_eq!(amended.status, NoteStatus::Signed);
}

#[test]
fn test_draft_delete_and_version_check() {
    let practice = Practice::new();
    let created = practice
        .engine
        .create_note(&practice.clinician, intake_input(&practice.client_id))
        .unwrap();

    let err = practice
        .engine
        .delete_note(&practice.clinician, &created.note.id, created.note.version + 1)
        .unwrap_err();
    assert!(matches!(err, NotesError::VersionConflict { expected: 2, current: 1 }));

    practice
        .engine
        .delete_note(&practice.clinician, &created.note.id, created.note.version)
        .unwrap();
    let err = practice.engine.view_note(&practice.clinician, &created.note.id).unwrap_err();
    assert_eq!(err.status_code(), 404);
}

#[test]
fn test_appointment_rules() {
    let practice = Practice::new();
    let past = practice.now() - Duration::hours(3);
    let appointment_id = practice.appointment(&practice.clinician, past);

    let input = NewNote {
        client_id: practice.client_id.clone(),
        appointment_id: Some(appointment_id.clone()),
        note_type: Some(NoteType::CancellationNote),
        content: content(json!({ "cancellationReason": "Client ill" })),
        ..Default::default()
    };

    // Another clinician's appointment
    let err = practice.engine.create_note(&practice.supervisee, input.clone()).unwrap_err();
    assert_eq!(err.status_code(), 403);

    let created = practice.engine.create_note(&practice.clinician, input.clone()).unwrap();
    assert_eq!(created.note.session_date, past);

    let err = practice.engine.create_note(&practice.clinician, input).unwrap_err();
    assert!(matches!(err, NotesError::DuplicateNote));
    assert_eq!(err.status_code(), 409);

    let future = NewNote {
        client_id: practice.client_id.clone(),
        note_type: Some(NoteType::ContactNote),
        session_date: Some(practice.now() + Duration::days(1)),
        content: content(json!({ "contactType": "Phone" })),
        ..Default::default()
    };
    let err = practice.engine.create_note(&practice.clinician, future).unwrap_err();
    assert_eq!(err.error_code(), "FUTURE_SESSION_DATE");
}

#[test]
fn test_invalid_billing_codes() {
    let practice = Practice::new();
    let mut input = intake_input(&practice.client_id);
    input.diagnosis_codes = vec!["depression".into()];
    let err = practice.engine.create_note(&practice.clinician, input).unwrap_err();
    assert_eq!(err.error_code(), "INVALID_DIAGNOSIS_CODE");

    let mut input = intake_input(&practice.client_id);
    input.cpt_codes = vec!["908".into()];
    let err = practice.engine.create_note(&practice.clinician, input).unwrap_err();
    assert_eq!(err.error_code(), "INVALID_CPT_CODE");
}

#[test]
fn test_denied_view_is_audited() {
    let practice = Practice::new();
    let intake = practice.signed_intake(&practice.clinician);

    let err = practice.engine.view_note(&practice.supervisee, &intake.id).unwrap_err();
    assert_eq!(err.status_code(), 403);

    let failures = practice
        .engine
        .query_audit(
            &practice.admin,
            AuditQuery {
                user_id: Some(practice.supervisee.user_id.clone()),
                action: Some(AuditAction::FailedAuthorization),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].note_id.as_deref(), Some(intake.id.as_str()));
    assert_eq!(failures[0].details.as_ref().unwrap()["attemptedAction"], "view");

    // Admins see everything, and the chain still verifies
    practice.engine.view_note(&practice.admin, &intake.id).unwrap();
    let chain = practice.engine.verify_audit_chain(&practice.admin).unwrap();
    assert!(chain.is_valid);
}

#[test]
fn test_list_is_scoped_to_visible_clinicians() {
    let practice = Practice::new();
    practice.signed_intake(&practice.clinician);
    practice
        .engine
        .create_note(&practice.supervisee, intake_input(&practice.client_id))
        .unwrap();

    let own = practice.engine.list_notes(&practice.clinician, Default::default()).unwrap();
    assert_eq!(own.len(), 1);

    let team = practice.engine.list_notes(&practice.supervisor, Default::default()).unwrap();
    assert_eq!(team.len(), 1);
    assert_eq!(team[0].clinician_id, practice.supervisee.user_id);

    let all = practice.engine.list_notes(&practice.admin, Default::default()).unwrap();
    assert_eq!(all.len(), 2);
}
