//! Weekly lockout and unlock workflow integration tests.

mod common;

use chrono::{Duration, TimeZone, Utc};
use serde_json::json;

use clinical_notes_core::lock::UnlockResponse;
use clinical_notes_core::models::{AuditQuery, LockReason, NotePatch, UnlockDecision};
use clinical_notes_core::notify::NotificationKind;
use clinical_notes_core::{AuditAction, EngineConfig, NoteStatus};

use common::{content, Practice};

#[test]
fn test_sweep_locks_signed_notes_once() {
    let practice = Practice::new();
    let intake = practice.signed_intake(&practice.clinician);
    let draft = practice.draft_progress(&practice.clinician);

    // Before the boundary nothing is due
    let report = practice.engine.run_lock_sweep().unwrap();
    assert_eq!(report.total_locked(), 0);

    practice.advance_past_sunday();
    let report = practice.engine.run_lock_sweep().unwrap();
    assert_eq!(report.locked, vec![intake.id.clone()]);
    assert_eq!(report.boundary, Some(Utc.with_ymd_and_hms(2024, 5, 12, 0, 0, 0).unwrap()));

    let locked = practice.engine.view_note(&practice.clinician, &intake.id).unwrap();
    assert!(locked.is_locked);
    assert_eq!(locked.lock_reason, Some(LockReason::SundayLockout));
    assert_eq!(locked.status, NoteStatus::Signed);

    // Drafts are untouched unless overdue locking is enabled
    let draft = practice.engine.view_note(&practice.clinician, &draft.id).unwrap();
    assert!(!draft.is_locked);

    let again = practice.engine.run_lock_sweep().unwrap();
    assert_eq!(again.total_locked(), 0);

    let locks = practice
        .engine
        .query_audit(
            &practice.admin,
            AuditQuery {
                note_id: Some(intake.id.clone()),
                action: Some(AuditAction::Lock),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(locks.len(), 1);
    assert_eq!(locks[0].user_id, "system");
}

#[test]
fn test_overdue_unsigned_notes_lock_when_enabled() {
    let config = EngineConfig {
        lock_overdue_unsigned: true,
        ..Default::default()
    };
    let practice = Practice::with_config(config);
    let created = practice
        .engine
        .create_note(&practice.clinician, common::intake_input(&practice.client_id))
        .unwrap();

    // Due 2024-05-10, before the 2024-05-12 boundary
    practice.advance_past_sunday();
    let report = practice.engine.run_lock_sweep().unwrap();
    assert_eq!(report.locked_overdue, vec![created.note.id.clone()]);

    let note = practice.engine.view_note(&practice.clinician, &created.note.id).unwrap();
    assert_eq!(note.lock_reason, Some(LockReason::OverdueLockout));
    assert_eq!(note.status, NoteStatus::Draft);
}

#[test]
fn test_unlock_request_approve_and_relock() {
    let practice = Practice::new();
    let engine = &practice.engine;

    let intake = practice.signed_intake(&practice.supervisee);
    let intake = engine
        .cosign_note(&practice.supervisor, &intake.id, intake.version, &practice.pin(), None)
        .unwrap();
    practice.advance_past_sunday();
    engine.run_lock_sweep().unwrap();
    let locked = engine.view_note(&practice.supervisee, &intake.id).unwrap();
    assert!(locked.is_locked);

    // Locked notes reject edits outright
    let patch = NotePatch {
        content: content(json!({ "presentingProblem": "Corrected history of the presenting problem" })),
        ..Default::default()
    };
    let err = engine
        .edit_note(&practice.supervisee, &locked.id, locked.version, patch.clone())
        .unwrap_err();
    assert_eq!(err.status_code(), 403);
    assert_eq!(err.to_string(), "Cannot edit a locked note; request an unlock first");

    let requested = engine
        .request_unlock(&practice.supervisee, &locked.id, locked.version, "Wrong onset date recorded")
        .unwrap();
    assert!(requested.unlock_requested);
    let to_supervisor = practice.notifier.sent_to(&practice.supervisor.user_id);
    assert_eq!(to_supervisor.last().unwrap().kind, NotificationKind::UnlockRequested);

    let err = engine
        .request_unlock(&practice.supervisee, &requested.id, requested.version, "Again")
        .unwrap_err();
    assert_eq!(err.error_code(), "UNLOCK_ALREADY_REQUESTED");

    // Only the supervisor (or an admin) decides
    let err = engine
        .decide_unlock(
            &practice.clinician,
            &requested.id,
            requested.version,
            UnlockResponse::Approve { duration_hours: Some(24) },
        )
        .unwrap_err();
    assert_eq!(err.status_code(), 403);

    let approved = engine
        .decide_unlock(
            &practice.supervisor,
            &requested.id,
            requested.version,
            UnlockResponse::Approve { duration_hours: Some(24) },
        )
        .unwrap();
    assert!(!approved.is_locked);
    assert_eq!(approved.unlock_decision, Some(UnlockDecision::Approved));
    assert_eq!(approved.unlock_until, Some(practice.now() + Duration::hours(24)));

    let to_author = practice.notifier.sent_to(&practice.supervisee.user_id);
    let approval = to_author.last().unwrap();
    assert_eq!(approval.kind, NotificationKind::UnlockApproved);
    assert_eq!(approval.subject, "Unlock Request Approved");

    // The grant allows edits and survives a sweep
    let edited = engine
        .edit_note(&practice.supervisee, &approved.id, approved.version, patch)
        .unwrap();
    assert_eq!(edited.note.status, NoteStatus::Cosigned);
    let report = engine.run_lock_sweep().unwrap();
    assert_eq!(report.total_locked(), 0);

    // Expiry relocks it
    practice.clock.advance(Duration::hours(25));
    let report = engine.run_lock_sweep().unwrap();
    assert_eq!(report.relocked, vec![intake.id.clone()]);

    let relocked = engine.view_note(&practice.supervisee, &intake.id).unwrap();
    assert!(relocked.is_locked);
    assert_eq!(relocked.lock_reason, Some(LockReason::UnlockExpired));
    assert!(relocked.unlock_until.is_none());
}

#[test]
fn test_expired_grant_blocks_edit_before_sweep() {
    let practice = Practice::new();
    let engine = &practice.engine;
    let note = practice.signed_intake(&practice.clinician);
    practice.advance_past_sunday();
    engine.run_lock_sweep().unwrap();

    let note = engine.view_note(&practice.clinician, &note.id).unwrap();
    let note = engine
        .request_unlock(&practice.clinician, &note.id, note.version, "Billing code correction")
        .unwrap();
    let note = engine
        .decide_unlock(
            &practice.admin,
            &note.id,
            note.version,
            UnlockResponse::Approve { duration_hours: Some(2) },
        )
        .unwrap();

    practice.clock.advance(Duration::hours(3));
    let patch = NotePatch {
        cpt_codes: Some(vec!["90834".into()]),
        ..Default::default()
    };
    let err = engine
        .edit_note(&practice.clinician, &note.id, note.version, patch)
        .unwrap_err();
    assert_eq!(err.status_code(), 403);
}

#[test]
fn test_unlock_window_is_thirty_days() {
    let practice = Practice::new();
    let note = practice.signed_misc(&practice.clinician, 31);
    practice.advance_past_sunday();
    practice.engine.run_lock_sweep().unwrap();

    let note = practice.engine.view_note(&practice.clinician, &note.id).unwrap();
    let err = practice
        .engine
        .request_unlock(&practice.clinician, &note.id, note.version, "Late correction")
        .unwrap_err();
    assert_eq!(err.status_code(), 422);
    assert_eq!(err.error_code(), "UNLOCK_WINDOW_EXPIRED");
    assert_eq!(err.to_string(), "Cannot request unlock for notes older than 30 days");
}

#[test]
fn test_unlock_denial() {
    let practice = Practice::new();
    let engine = &practice.engine;
    let note = practice.signed_misc(&practice.clinician, 2);

    let err = engine
        .request_unlock(&practice.clinician, &note.id, note.version, "Typo")
        .unwrap_err();
    assert_eq!(err.error_code(), "NOT_LOCKED");

    let note = engine.lock_note(&practice.admin, &note.id, note.version, None).unwrap();
    assert_eq!(note.lock_reason, Some(LockReason::Manual));

    let note = engine
        .request_unlock(&practice.clinician, &note.id, note.version, "Typo in the narrative")
        .unwrap();
    let denied = engine
        .decide_unlock(
            &practice.admin,
            &note.id,
            note.version,
            UnlockResponse::Deny { reason: "Use an amendment instead".into() },
        )
        .unwrap();
    assert!(denied.is_locked);
    assert!(!denied.unlock_requested);
    assert_eq!(denied.unlock_decision, Some(UnlockDecision::Denied));

    let to_author = practice.notifier.sent_to(&practice.clinician.user_id);
    assert_eq!(to_author.last().unwrap().subject, "Unlock Request Denied");

    // Amendments are still allowed on a locked note
    let amended = engine
        .amend_note(&practice.clinician, &denied.id, denied.version, "Typo", "Fixed a word")
        .unwrap();
    assert_eq!(amended.amendments.len(), 1);
    assert!(amended.is_locked);
}

#[test]
fn test_next_lockout() {
    let practice = Practice::new();
    assert_eq!(
        practice.engine.next_lockout().unwrap(),
        Utc.with_ymd_and_hms(2024, 5, 12, 0, 0, 0).unwrap()
    );
}
