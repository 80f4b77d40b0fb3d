//! Clinical note models.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Kind of clinical note.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum NoteType {
    #[serde(rename = "Intake Assessment")]
    IntakeAssessment,
    #[serde(rename = "Progress Note")]
    ProgressNote,
    #[serde(rename = "Treatment Plan")]
    TreatmentPlan,
    #[serde(rename = "Cancellation Note")]
    CancellationNote,
    #[serde(rename = "Consultation Note")]
    ConsultationNote,
    #[serde(rename = "Contact Note")]
    ContactNote,
    #[serde(rename = "Termination Note")]
    TerminationNote,
    #[serde(rename = "Miscellaneous Note")]
    MiscellaneousNote,
    #[serde(rename = "Group Therapy Note")]
    GroupTherapyNote,
}

impl NoteType {
    pub const ALL: [NoteType; 9] = [
        NoteType::IntakeAssessment,
        NoteType::ProgressNote,
        NoteType::TreatmentPlan,
        NoteType::CancellationNote,
        NoteType::ConsultationNote,
        NoteType::ContactNote,
        NoteType::TerminationNote,
        NoteType::MiscellaneousNote,
        NoteType::GroupTherapyNote,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NoteType::IntakeAssessment => "Intake Assessment",
            NoteType::ProgressNote => "Progress Note",
            NoteType::TreatmentPlan => "Treatment Plan",
            NoteType::CancellationNote => "Cancellation Note",
            NoteType::ConsultationNote => "Consultation Note",
            NoteType::ContactNote => "Contact Note",
            NoteType::TerminationNote => "Termination Note",
            NoteType::MiscellaneousNote => "Miscellaneous Note",
            NoteType::GroupTherapyNote => "Group Therapy Note",
        }
    }

    /// Note types that may only be written once the client has a signed intake.
    pub fn requires_prior_intake(&self) -> bool {
        matches!(self, NoteType::ProgressNote | NoteType::TreatmentPlan)
    }
}

impl fmt::Display for NoteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for an unrecognised note type name.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Unknown note type '{input}'{hint}")]
pub struct UnknownNoteType {
    pub input: String,
    pub hint: String,
}

impl FromStr for NoteType {
    type Err = UnknownNoteType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Some(found) = NoteType::ALL
            .iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(trimmed))
        {
            return Ok(*found);
        }

        // Suggest the closest known type for near misses ("Progres Note")
        let lower = trimmed.to_lowercase();
        let closest = NoteType::ALL
            .iter()
            .map(|t| (t, strsim::jaro_winkler(&lower, &t.as_str().to_lowercase())))
            .filter(|(_, score)| *score >= 0.85)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        Err(UnknownNoteType {
            input: trimmed.to_string(),
            hint: closest
                .map(|(t, _)| format!(", did you mean '{}'?", t.as_str()))
                .unwrap_or_default(),
        })
    }
}

/// Workflow position of a note.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NoteStatus {
    /// Being written by the owning clinician
    Draft,
    /// Signed, no cosignature required
    Signed,
    /// Signed by a supervised clinician, waiting for the supervisor
    PendingCosign,
    /// Countersigned by the supervisor
    Cosigned,
    /// Sent back to the clinician by the supervisor
    ReturnedForRevision,
}

impl NoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoteStatus::Draft => "DRAFT",
            NoteStatus::Signed => "SIGNED",
            NoteStatus::PendingCosign => "PENDING_COSIGN",
            NoteStatus::Cosigned => "COSIGNED",
            NoteStatus::ReturnedForRevision => "RETURNED_FOR_REVISION",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DRAFT" => Some(NoteStatus::Draft),
            "SIGNED" => Some(NoteStatus::Signed),
            "PENDING_COSIGN" => Some(NoteStatus::PendingCosign),
            "COSIGNED" => Some(NoteStatus::Cosigned),
            "RETURNED_FOR_REVISION" => Some(NoteStatus::ReturnedForRevision),
            _ => None,
        }
    }

    /// Statuses whose clinical content is frozen.
    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            NoteStatus::Signed | NoteStatus::PendingCosign | NoteStatus::Cosigned
        )
    }

    /// Statuses in which the owner may edit content directly.
    pub fn is_editable(&self) -> bool {
        matches!(self, NoteStatus::Draft | NoteStatus::ReturnedForRevision)
    }
}

impl fmt::Display for NoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a note was locked.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockReason {
    /// Weekly boundary passed since signing
    SundayLockout,
    /// Unsigned note past its due date at the weekly boundary
    OverdueLockout,
    /// Unlock grant ran out
    UnlockExpired,
    /// Locked by a supervisor or administrator
    Manual,
}

impl LockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockReason::SundayLockout => "SUNDAY_LOCKOUT",
            LockReason::OverdueLockout => "OVERDUE_LOCKOUT",
            LockReason::UnlockExpired => "UNLOCK_EXPIRED",
            LockReason::Manual => "MANUAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SUNDAY_LOCKOUT" => Some(LockReason::SundayLockout),
            "OVERDUE_LOCKOUT" => Some(LockReason::OverdueLockout),
            "UNLOCK_EXPIRED" => Some(LockReason::UnlockExpired),
            "MANUAL" => Some(LockReason::Manual),
            _ => None,
        }
    }
}

/// Outcome of the most recent unlock request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnlockDecision {
    Approved,
    Denied,
}

impl UnlockDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnlockDecision::Approved => "APPROVED",
            UnlockDecision::Denied => "DENIED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "APPROVED" => Some(UnlockDecision::Approved),
            "DENIED" => Some(UnlockDecision::Denied),
            _ => None,
        }
    }
}

/// One return-for-revision round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RevisionEntry {
    pub comments: String,
    pub required_changes: Vec<String>,
    pub returned_by: String,
    pub timestamp: DateTime<Utc>,
    pub resubmitted_at: Option<DateTime<Utc>>,
}

/// Correction record attached to a signed note.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Amendment {
    pub id: String,
    pub reason: String,
    pub change_description: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
}

/// A standardized outcome instrument score (PHQ-9, GAD-7, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeMeasure {
    pub measure_type: String,
    pub score: f64,
    #[serde(default)]
    pub administered_at: Option<DateTime<Utc>>,
}

/// A clinical note with its full workflow state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClinicalNote {
    pub id: String,
    pub client_id: String,
    pub appointment_id: Option<String>,
    /// Creator and owner
    pub clinician_id: String,
    pub note_type: NoteType,
    pub session_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub status: NoteStatus,

    // Lock state, orthogonal to status
    pub is_locked: bool,
    pub locked_at: Option<DateTime<Utc>>,
    pub lock_reason: Option<LockReason>,

    // Embedded unlock request
    pub unlock_requested: bool,
    pub unlock_reason: Option<String>,
    pub unlock_requested_at: Option<DateTime<Utc>>,
    pub unlock_approved_by: Option<String>,
    pub unlock_approval_date: Option<DateTime<Utc>>,
    pub unlock_decision: Option<UnlockDecision>,
    pub unlock_decision_reason: Option<String>,
    pub unlock_duration_hours: Option<u32>,
    pub unlock_until: Option<DateTime<Utc>>,

    // Signatures
    pub requires_cosign: bool,
    pub signed_by: Option<String>,
    pub signed_date: Option<DateTime<Utc>>,
    pub days_to_complete: Option<i64>,
    pub completed_on_time: Option<bool>,
    pub cosigned_by: Option<String>,
    pub cosigned_date: Option<DateTime<Utc>>,
    pub supervisor_comments: Option<String>,

    pub revision_count: u32,
    pub revision_history: Vec<RevisionEntry>,
    pub amendments: Vec<Amendment>,

    /// Optimistic concurrency counter
    pub version: i64,

    pub diagnosis_codes: Vec<String>,
    pub cpt_codes: Vec<String>,
    /// Type-specific structured fields (SOAP, MSE, risk assessment, ...)
    pub content: Map<String, Value>,
    pub outcome_measures: Vec<OutcomeMeasure>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Payload for creating a note.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewNote {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub appointment_id: Option<String>,
    pub note_type: Option<NoteType>,
    #[serde(default)]
    pub session_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub diagnosis_codes: Vec<String>,
    #[serde(default)]
    pub cpt_codes: Vec<String>,
    #[serde(default)]
    pub content: Map<String, Value>,
    #[serde(default)]
    pub outcome_measures: Vec<OutcomeMeasure>,
}

/// Partial update of a note's clinical content.
///
/// `content` is merged key by key; a JSON `null` removes the key.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NotePatch {
    #[serde(default)]
    pub session_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub diagnosis_codes: Option<Vec<String>>,
    #[serde(default)]
    pub cpt_codes: Option<Vec<String>>,
    #[serde(default)]
    pub content: Map<String, Value>,
    #[serde(default)]
    pub outcome_measures: Option<Vec<OutcomeMeasure>>,
}

impl ClinicalNote {
    /// Build a fresh DRAFT note owned by `clinician_id`.
    pub fn new(
        input: NewNote,
        note_type: NoteType,
        clinician_id: String,
        now: DateTime<Utc>,
        note_due_days: i64,
    ) -> Self {
        let session_date = input.session_date.unwrap_or(now);
        let due_date = input
            .due_date
            .unwrap_or_else(|| session_date + Duration::days(note_due_days));

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            client_id: input.client_id,
            appointment_id: input.appointment_id,
            clinician_id,
            note_type,
            session_date,
            due_date,
            status: NoteStatus::Draft,
            is_locked: false,
            locked_at: None,
            lock_reason: None,
            unlock_requested: false,
            unlock_reason: None,
            unlock_requested_at: None,
            unlock_approved_by: None,
            unlock_approval_date: None,
            unlock_decision: None,
            unlock_decision_reason: None,
            unlock_duration_hours: None,
            unlock_until: None,
            requires_cosign: false,
            signed_by: None,
            signed_date: None,
            days_to_complete: None,
            completed_on_time: None,
            cosigned_by: None,
            cosigned_date: None,
            supervisor_comments: None,
            revision_count: 0,
            revision_history: Vec::new(),
            amendments: Vec::new(),
            version: 1,
            diagnosis_codes: input.diagnosis_codes,
            cpt_codes: input.cpt_codes,
            content: input.content,
            outcome_measures: input.outcome_measures,
            created_at: now,
            updated_at: now,
        }
    }

    /// An approved unlock window is open.
    pub fn has_active_grant(&self, now: DateTime<Utc>) -> bool {
        !self.is_locked && self.unlock_until.is_some_and(|until| now <= until)
    }

    /// Locked, or holding a grant that has already run out but has not yet
    /// been swept.
    pub fn is_effectively_locked(&self, now: DateTime<Utc>) -> bool {
        self.is_locked || self.unlock_until.is_some_and(|until| now > until)
    }

    /// Whole days elapsed since the session.
    pub fn days_since_session(&self, now: DateTime<Utc>) -> i64 {
        (now - self.session_date).num_days()
    }

    /// Flattened field map used by the validation engine.
    pub fn clinical_data(&self) -> Value {
        let mut data = self.content.clone();
        data.insert("diagnosisCodes".into(), Value::from(self.diagnosis_codes.clone()));
        data.insert("cptCodes".into(), Value::from(self.cpt_codes.clone()));
        data.insert(
            "outcomeMeasures".into(),
            serde_json::to_value(&self.outcome_measures).unwrap_or(Value::Array(Vec::new())),
        );
        Value::Object(data)
    }

    /// Snapshot of the editable portion of the note, for EDIT audit entries.
    pub fn editable_snapshot(&self) -> Value {
        let mut data = match self.clinical_data() {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        data.insert("sessionDate".into(), Value::from(self.session_date.to_rfc3339()));
        data.insert("dueDate".into(), Value::from(self.due_date.to_rfc3339()));
        Value::Object(data)
    }

    /// Apply a patch, returning the names of fields that actually changed.
    pub fn apply_patch(&mut self, patch: NotePatch) -> Vec<String> {
        let mut changed = Vec::new();

        if let Some(session_date) = patch.session_date {
            if session_date != self.session_date {
                self.session_date = session_date;
                changed.push("sessionDate".to_string());
            }
        }
        if let Some(due_date) = patch.due_date {
            if due_date != self.due_date {
                self.due_date = due_date;
                changed.push("dueDate".to_string());
            }
        }
        if let Some(codes) = patch.diagnosis_codes {
            if codes != self.diagnosis_codes {
                self.diagnosis_codes = codes;
                changed.push("diagnosisCodes".to_string());
            }
        }
        if let Some(codes) = patch.cpt_codes {
            if codes != self.cpt_codes {
                self.cpt_codes = codes;
                changed.push("cptCodes".to_string());
            }
        }
        if let Some(measures) = patch.outcome_measures {
            if measures != self.outcome_measures {
                self.outcome_measures = measures;
                changed.push("outcomeMeasures".to_string());
            }
        }
        for (key, value) in patch.content {
            let differs = match (&value, self.content.get(&key)) {
                (Value::Null, None) => false,
                (Value::Null, Some(_)) => true,
                (new, Some(old)) => new != old,
                (_, None) => true,
            };
            if !differs {
                continue;
            }
            if value.is_null() {
                self.content.remove(&key);
            } else {
                self.content.insert(key.clone(), value);
            }
            changed.push(key);
        }

        changed
    }

    /// Reset the embedded unlock grant.
    pub fn clear_grant(&mut self) {
        self.unlock_until = None;
        self.unlock_duration_hours = None;
    }
}
