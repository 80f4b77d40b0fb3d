//! Per-note-type rule table.

use serde::Serialize;

use crate::models::NoteType;

/// Narrative fields shorter than this are rejected.
pub const MIN_NARRATIVE_LEN: usize = 20;

/// Kind of check applied to a single field.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RuleKind {
    /// Present and non-empty
    Required,
    /// String length floor, checked only when the field is present
    MinLength { min: usize },
    /// North American phone number
    Phone,
    Email,
    /// Inclusive numeric bounds
    Range { min: f64, max: f64 },
    /// Required when the boolean field `when` is true
    RequiredIf { when: &'static str },
}

/// A rule bound to a content field.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FieldRule {
    pub field: &'static str,
    pub section: &'static str,
    pub rule: RuleKind,
}

impl FieldRule {
    const fn new(field: &'static str, section: &'static str, rule: RuleKind) -> Self {
        Self { field, section, rule }
    }

    pub fn is_required(&self) -> bool {
        matches!(self.rule, RuleKind::Required)
    }
}

use RuleKind::*;

const NARRATIVE: RuleKind = MinLength { min: MIN_NARRATIVE_LEN };

static INTAKE_ASSESSMENT: &[FieldRule] = &[
    FieldRule::new("presentingProblem", "Presenting Problem", Required),
    FieldRule::new("presentingProblem", "Presenting Problem", NARRATIVE),
    FieldRule::new("diagnosisCodes", "Diagnosis", Required),
    FieldRule::new("riskAssessmentDetails", "Risk Assessment", RequiredIf { when: "suicidalIdeation" }),
    FieldRule::new("riskAssessmentDetails", "Risk Assessment", RequiredIf { when: "homicidalIdeation" }),
    FieldRule::new("gafScore", "Diagnosis", Range { min: 1.0, max: 100.0 }),
];

static PROGRESS_NOTE: &[FieldRule] = &[
    FieldRule::new("subjective", "SOAP", Required),
    FieldRule::new("subjective", "SOAP", NARRATIVE),
    FieldRule::new("objective", "SOAP", Required),
    FieldRule::new("objective", "SOAP", NARRATIVE),
    FieldRule::new("assessment", "SOAP", Required),
    FieldRule::new("assessment", "SOAP", NARRATIVE),
    FieldRule::new("plan", "SOAP", Required),
    FieldRule::new("plan", "SOAP", NARRATIVE),
    FieldRule::new("riskAssessmentDetails", "Risk Assessment", RequiredIf { when: "suicidalIdeation" }),
    FieldRule::new("sessionDuration", "Session", Range { min: 1.0, max: 480.0 }),
];

static TREATMENT_PLAN: &[FieldRule] = &[
    FieldRule::new("goals", "Goals", Required),
    FieldRule::new("interventions", "Interventions", Required),
    FieldRule::new("frequency", "Interventions", Required),
    FieldRule::new("diagnosisCodes", "Diagnosis", Required),
];

static CANCELLATION_NOTE: &[FieldRule] = &[
    FieldRule::new("cancellationReason", "Cancellation", Required),
];

static CONSULTATION_NOTE: &[FieldRule] = &[
    FieldRule::new("consultationReason", "Consultation", Required),
    FieldRule::new("recommendations", "Consultation", Required),
];

static CONTACT_NOTE: &[FieldRule] = &[
    FieldRule::new("contactType", "Contact", Required),
    FieldRule::new("contactPhone", "Contact", Phone),
    FieldRule::new("contactEmail", "Contact", Email),
];

static TERMINATION_NOTE: &[FieldRule] = &[
    FieldRule::new("terminationReason", "Termination", Required),
    FieldRule::new("progressSummary", "Termination", NARRATIVE),
];

static MISCELLANEOUS_NOTE: &[FieldRule] = &[
    FieldRule::new("noteContent", "Note", Required),
];

static GROUP_THERAPY_NOTE: &[FieldRule] = &[
    FieldRule::new("groupTopic", "Group", Required),
    FieldRule::new("clientParticipation", "Group", Required),
    FieldRule::new("clientParticipation", "Group", NARRATIVE),
];

/// Rule table for a note type.
pub fn rules_for(note_type: NoteType) -> &'static [FieldRule] {
    match note_type {
        NoteType::IntakeAssessment => INTAKE_ASSESSMENT,
        NoteType::ProgressNote => PROGRESS_NOTE,
        NoteType::TreatmentPlan => TREATMENT_PLAN,
        NoteType::CancellationNote => CANCELLATION_NOTE,
        NoteType::ConsultationNote => CONSULTATION_NOTE,
        NoteType::ContactNote => CONTACT_NOTE,
        NoteType::TerminationNote => TERMINATION_NOTE,
        NoteType::MiscellaneousNote => MISCELLANEOUS_NOTE,
        NoteType::GroupTherapyNote => GROUP_THERAPY_NOTE,
    }
}

/// Inclusive score bounds for standardized outcome instruments.
pub fn instrument_range(measure_type: &str) -> Option<(f64, f64)> {
    let normalized = measure_type.trim().to_ascii_uppercase().replace(' ', "");
    match normalized.as_str() {
        "PHQ-9" | "PHQ9" => Some((0.0, 27.0)),
        "GAD-7" | "GAD7" => Some((0.0, 21.0)),
        "PCL-5" | "PCL5" => Some((0.0, 80.0)),
        "BDI-II" | "BDIII" | "BDI-2" => Some((0.0, 63.0)),
        "AUDIT" => Some((0.0, 40.0)),
        _ => None,
    }
}
