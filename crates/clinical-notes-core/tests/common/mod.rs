//! Shared practice fixture for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{json, Map, Value};

use clinical_notes_core::db::Database;
use clinical_notes_core::models::{Appointment, Client, NewNote, NoteType, Role, User};
use clinical_notes_core::workflow::SignatureInput;
use clinical_notes_core::{Actor, ClinicalNote, EngineConfig, FixedClock, NotesEngine, RecordingNotifier};

pub const PIN: &str = "2468";

/// Wednesday 2024-05-08 10:00 UTC
pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 8, 10, 0, 0).unwrap()
}

/// A small practice: an administrator, a supervisor with one supervisee,
/// an independent clinician and one client.
pub struct Practice {
    pub engine: Arc<NotesEngine>,
    pub clock: Arc<FixedClock>,
    pub notifier: Arc<RecordingNotifier>,
    pub admin: Actor,
    pub supervisor: Actor,
    pub supervisee: Actor,
    pub clinician: Actor,
    pub client_id: String,
}

impl Practice {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        // Cheapest bcrypt cost keeps fixture setup fast
        let config = EngineConfig {
            signature_hash_cost: 4,
            ..config
        };
        let clock = Arc::new(FixedClock::new(start()));
        let notifier = Arc::new(RecordingNotifier::new());
        let engine = Arc::new(NotesEngine::new(
            Database::open_in_memory().unwrap(),
            config,
            clock.clone(),
            notifier.clone(),
        ));

        let admin = User::new("Avery Admin".into(), "admin@example.org".into(), vec![Role::Admin]);
        let supervisor = User::new(
            "Sam Supervisor".into(),
            "sam@example.org".into(),
            vec![Role::Supervisor, Role::Clinician],
        );
        let supervisee = User::new("Riley Resident".into(), "riley@example.org".into(), vec![Role::Clinician])
            .supervised_by(&supervisor.id);
        let clinician = User::new("Casey Clinician".into(), "casey@example.org".into(), vec![Role::Clinician]);

        for user in [&admin, &supervisor, &supervisee, &clinician] {
            engine.register_user(user).unwrap();
            engine.set_signature_credentials(&user.id, Some(PIN), None).unwrap();
        }

        let client = Client::new("Jordan".into(), "Doe".into());
        engine.register_client(&client).unwrap();

        Self {
            engine,
            clock,
            notifier,
            admin: Actor::from(&admin),
            supervisor: Actor::from(&supervisor),
            supervisee: Actor::from(&supervisee),
            clinician: Actor::from(&clinician),
            client_id: client.id,
        }
    }

    pub fn pin(&self) -> SignatureInput {
        SignatureInput::pin(PIN)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.engine.now()
    }

    /// Book a session for `clinician` at `at`.
    pub fn appointment(&self, clinician: &Actor, at: DateTime<Utc>) -> String {
        let appointment = Appointment::new(self.client_id.clone(), clinician.user_id.clone(), at);
        self.engine.register_appointment(&appointment).unwrap();
        appointment.id
    }

    /// Create and sign an intake for the practice's client.
    pub fn signed_intake(&self, author: &Actor) -> ClinicalNote {
        let created = self.engine.create_note(author, intake_input(&self.client_id)).unwrap();
        self.engine
            .sign_note(author, &created.note.id, created.note.version, &self.pin())
            .unwrap()
    }

    /// A complete DRAFT progress note, after the intake prerequisite.
    pub fn draft_progress(&self, author: &Actor) -> ClinicalNote {
        let mut input = progress_input(&self.client_id);
        input.session_date = Some(self.now() - Duration::hours(2));
        self.engine.create_note(author, input).unwrap().note
    }

    /// A signed miscellaneous note with its session `days_ago`.
    pub fn signed_misc(&self, author: &Actor, days_ago: i64) -> ClinicalNote {
        let input = NewNote {
            client_id: self.client_id.clone(),
            note_type: Some(NoteType::MiscellaneousNote),
            session_date: Some(self.now() - Duration::days(days_ago)),
            content: content(json!({ "noteContent": "Coordinated care with the school counselor." })),
            ..Default::default()
        };
        let created = self.engine.create_note(author, input).unwrap();
        self.engine
            .sign_note(author, &created.note.id, created.note.version, &self.pin())
            .unwrap()
    }

    /// Jump to Sunday 2024-05-12 00:05 UTC, just past the weekly boundary.
    pub fn advance_past_sunday(&self) {
        self.clock.set(Utc.with_ymd_and_hms(2024, 5, 12, 0, 5, 0).unwrap());
    }
}

pub fn content(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

pub fn intake_input(client_id: &str) -> NewNote {
    NewNote {
        client_id: client_id.to_string(),
        note_type: Some(NoteType::IntakeAssessment),
        session_date: Some(start() - Duration::days(1)),
        diagnosis_codes: vec!["F41.1".into()],
        content: content(json!({
            "presentingProblem": "Persistent worry and sleep disruption for six months",
            "suicidalIdeation": false,
        })),
        ..Default::default()
    }
}

pub fn progress_input(client_id: &str) -> NewNote {
    NewNote {
        client_id: client_id.to_string(),
        note_type: Some(NoteType::ProgressNote),
        diagnosis_codes: vec!["F41.1".into()],
        cpt_codes: vec!["90837".into()],
        content: content(json!({
            "subjective": "Client reports fewer panic episodes this week.",
            "objective": "Calm affect, good eye contact, organized speech.",
            "assessment": "Symptoms improving with CBT and sleep hygiene.",
            "plan": "Continue weekly CBT; review thought records next session.",
        })),
        ..Default::default()
    }
}
