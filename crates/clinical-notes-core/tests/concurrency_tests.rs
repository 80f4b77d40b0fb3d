//! Optimistic versioning under concurrent callers.

mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use serde_json::json;

use clinical_notes_core::models::{AuditQuery, NotePatch};
use clinical_notes_core::{Actor, AuditAction, NoteStatus, NotesEngine, NotesError};

use common::{content, Practice};

#[test]
fn test_concurrent_edits_single_winner() {
    let practice = Practice::new();
    practice.signed_intake(&practice.clinician);
    let note = practice.draft_progress(&practice.clinician);

    const WRITERS: usize = 8;
    let barrier = Arc::new(Barrier::new(WRITERS));
    let handles: Vec<_> = (0..WRITERS)
        .map(|i| {
            let engine = Arc::clone(&practice.engine);
            let actor = practice.clinician.clone();
            let barrier = Arc::clone(&barrier);
            let note_id = note.id.clone();
            let version = note.version;
            thread::spawn(move || {
                let patch = NotePatch {
                    content: content(json!({
                        "plan": format!("Plan revision {i}: continue weekly CBT sessions."),
                    })),
                    ..Default::default()
                };
                barrier.wait();
                engine.edit_note(&actor, &note_id, version, patch)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    for result in results.iter().filter(|r| r.is_err()) {
        let err = result.as_ref().unwrap_err();
        assert!(matches!(err, NotesError::VersionConflict { .. }));
        assert_eq!(err.status_code(), 409);
    }

    let current = practice.engine.view_note(&practice.clinician, &note.id).unwrap();
    assert_eq!(current.version, note.version + 1);
}

/// The loser of a same-version race sees either the bumped version or the
/// already-moved status.
fn assert_lost_race(err: &NotesError) {
    assert!(
        matches!(err, NotesError::VersionConflict { .. } | NotesError::InvalidTransition { .. }),
        "unexpected error: {err:?}"
    );
}

fn count_entries(practice: &Practice, note_id: &str, action: AuditAction) -> usize {
    practice
        .engine
        .query_audit(
            &practice.admin,
            AuditQuery {
                note_id: Some(note_id.to_string()),
                action: Some(action),
                ..Default::default()
            },
        )
        .unwrap()
        .len()
}

/// Run `op` once per actor, all released together.
fn race<T, F>(engine: &Arc<NotesEngine>, actors: Vec<Actor>, op: F) -> Vec<Result<T, NotesError>>
where
    T: Send + 'static,
    F: Fn(&NotesEngine, &Actor) -> Result<T, NotesError> + Send + Sync + 'static,
{
    let barrier = Arc::new(Barrier::new(actors.len()));
    let op = Arc::new(op);
    let handles: Vec<_> = actors
        .into_iter()
        .map(|actor| {
            let engine = Arc::clone(engine);
            let barrier = Arc::clone(&barrier);
            let op = Arc::clone(&op);
            thread::spawn(move || {
                barrier.wait();
                op(&engine, &actor)
            })
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

#[test]
fn test_concurrent_sign_single_winner() {
    let practice = Practice::new();
    let created = practice
        .engine
        .create_note(&practice.clinician, common::intake_input(&practice.client_id))
        .unwrap()
        .note;

    let note_id = created.id.clone();
    let version = created.version;
    let pin = practice.pin();
    let results = race(
        &practice.engine,
        vec![practice.clinician.clone(), practice.clinician.clone()],
        move |engine, actor| engine.sign_note(actor, &note_id, version, &pin),
    );

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert_lost_race(loser);

    let note = practice.engine.view_note(&practice.clinician, &created.id).unwrap();
    assert_eq!(note.status, NoteStatus::Signed);
    assert_eq!(note.version, created.version + 1);
    assert_eq!(count_entries(&practice, &created.id, AuditAction::Sign), 1);
}

#[test]
fn test_concurrent_cosign_single_winner() {
    let practice = Practice::new();
    let pending = practice.signed_intake(&practice.supervisee);
    assert_eq!(pending.status, NoteStatus::PendingCosign);

    let note_id = pending.id.clone();
    let version = pending.version;
    let pin = practice.pin();
    let results = race(
        &practice.engine,
        vec![practice.supervisor.clone(), practice.admin.clone()],
        move |engine, actor| engine.cosign_note(actor, &note_id, version, &pin, None),
    );

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert_lost_race(loser);

    let note = practice.engine.view_note(&practice.supervisor, &pending.id).unwrap();
    assert_eq!(note.status, NoteStatus::Cosigned);
    assert_eq!(note.version, pending.version + 1);
    assert_eq!(count_entries(&practice, &pending.id, AuditAction::Cosign), 1);
}

#[test]
fn test_concurrent_deletes() {
    let practice = Practice::new();
    let created = practice
        .engine
        .create_note(&practice.clinician, common::intake_input(&practice.client_id))
        .unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let engine = Arc::clone(&practice.engine);
            let actor = practice.clinician.clone();
            let barrier = Arc::clone(&barrier);
            let note_id = created.note.id.clone();
            let version = created.note.version;
            thread::spawn(move || {
                barrier.wait();
                engine.delete_note(&actor, &note_id, version)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let loser = results.into_iter().find_map(Result::err).unwrap();
    assert_eq!(loser.status_code(), 404);
}

#[test]
fn test_sweep_and_edit_race_is_consistent() {
    let practice = Practice::new();
    let intake = practice.signed_intake(&practice.clinician);
    practice.advance_past_sunday();

    let engine = Arc::clone(&practice.engine);
    let sweeper = thread::spawn(move || engine.run_lock_sweep());
    let amend = practice.engine.amend_note(
        &practice.clinician,
        &intake.id,
        intake.version,
        "Date correction",
        "Session was on Tuesday",
    );
    let report = sweeper.join().unwrap().unwrap();

    // Either the amendment landed first and the sweep locked the new
    // version, or the sweep won and the amendment saw a stale version.
    let note = practice.engine.view_note(&practice.clinician, &intake.id).unwrap();
    assert!(note.is_locked);
    assert_eq!(report.locked, vec![intake.id.clone()]);
    match amend {
        Ok(_) => assert_eq!(note.amendments.len(), 1),
        Err(err) => {
            assert!(matches!(err, NotesError::VersionConflict { .. }));
            assert!(note.amendments.is_empty());
        }
    }
}
