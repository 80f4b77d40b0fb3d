//! Note validation engine.
//!
//! Two layers of checks run over a note's flattened field map:
//!
//! - [`validate`] applies the per-type rule table. It is advisory when a draft
//!   is saved and blocking when the note is signed.
//! - [`check_input`] rejects structurally bad payloads (oversized fields,
//!   unknown risk levels, impossible instrument scores) on every write.
//!
//! Both are pure functions of their input.

mod codes;
mod rules;

pub use codes::*;
pub use rules::*;

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::NoteType;

/// Longest accepted free-text field.
pub const MAX_FIELD_LEN: usize = 10_000;

/// Accepted values for `riskLevel`.
pub const RISK_LEVELS: [&str; 4] = ["LOW", "MODERATE", "HIGH", "IMMINENT"];

static PHONE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\+?1?[\s.-]?\(?\d{3}\)?[\s.-]?\d{3}[\s.-]?\d{4}$").expect("valid phone regex")
});

static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"));

/// A single failed check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Outcome of running the rule table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<FieldError>,
}

impl ValidationResult {
    fn from_errors(errors: Vec<FieldError>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
        }
    }
}

/// Shape of a note type's rule table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationSummary {
    pub note_type: NoteType,
    pub total_fields: usize,
    pub required_fields: Vec<String>,
    pub sections: Vec<String>,
}

/// Run the rule table for `note_type` over `data`.
pub fn validate(note_type: NoteType, data: &Value) -> ValidationResult {
    let mut errors = Vec::new();

    for rule in rules_for(note_type) {
        if let Some(error) = check_rule(rule, data) {
            errors.push(error);
        }
    }
    errors.extend(check_outcome_measures(data));

    ValidationResult::from_errors(errors)
}

/// Structural checks that block any write.
pub fn check_input(data: &Value) -> Vec<FieldError> {
    let mut errors = Vec::new();

    if let Value::Object(map) = data {
        for (field, value) in map {
            if let Value::String(s) = value {
                if s.chars().count() > MAX_FIELD_LEN {
                    errors.push(FieldError::new(
                        field.as_str(),
                        format!("{field} exceeds maximum length of {MAX_FIELD_LEN} characters"),
                    ));
                }
            }
        }

        if let Some(level) = map.get("riskLevel").filter(|v| !v.is_null()) {
            let known = level
                .as_str()
                .map(|s| RISK_LEVELS.contains(&s.to_ascii_uppercase().as_str()))
                .unwrap_or(false);
            if !known {
                errors.push(FieldError::new(
                    "riskLevel",
                    format!("Invalid risk level {level}; expected one of {}", RISK_LEVELS.join(", ")),
                ));
            }
        }
    }

    errors.extend(check_outcome_measures(data));
    errors
}

/// Summary of the rule table for `note_type`.
pub fn summary(note_type: NoteType) -> ValidationSummary {
    let rules = rules_for(note_type);

    let mut fields = BTreeSet::new();
    let mut required = Vec::new();
    let mut sections = Vec::new();
    for rule in rules {
        fields.insert(rule.field);
        if rule.is_required() && !required.iter().any(|f| f == rule.field) {
            required.push(rule.field.to_string());
        }
        if !sections.iter().any(|s| s == rule.section) {
            sections.push(rule.section.to_string());
        }
    }

    ValidationSummary {
        note_type,
        total_fields: fields.len(),
        required_fields: required,
        sections,
    }
}

fn check_rule(rule: &FieldRule, data: &Value) -> Option<FieldError> {
    let value = data.get(rule.field);
    let field = rule.field;

    match rule.rule {
        RuleKind::Required => {
            is_blank(value).then(|| FieldError::new(field, format!("{field} is required")))
        }
        RuleKind::MinLength { min } => {
            let text = value.and_then(Value::as_str)?;
            let len = text.trim().chars().count();
            (len > 0 && len < min).then(|| {
                FieldError::new(
                    field,
                    format!("{field} must be at least {min} characters (minimum {min}, got {len})"),
                )
            })
        }
        RuleKind::Phone => {
            let text = value.and_then(Value::as_str).filter(|s| !s.trim().is_empty())?;
            (!PHONE.is_match(text.trim()))
                .then(|| FieldError::new(field, "Please enter a valid phone number"))
        }
        RuleKind::Email => {
            let text = value.and_then(Value::as_str).filter(|s| !s.trim().is_empty())?;
            (!EMAIL.is_match(text.trim()))
                .then(|| FieldError::new(field, "Please enter a valid email address"))
        }
        RuleKind::Range { min, max } => {
            let number = value.and_then(as_number)?;
            (number < min || number > max)
                .then(|| FieldError::new(field, format!("{field} must be between {min} and {max}")))
        }
        RuleKind::RequiredIf { when } => {
            let triggered = data.get(when).and_then(Value::as_bool).unwrap_or(false);
            (triggered && is_blank(value)).then(|| {
                FieldError::new(field, risk_message(when))
            })
        }
    }
}

fn risk_message(when: &str) -> String {
    match when {
        "suicidalIdeation" => {
            "Risk assessment details required when suicidal ideation is present".to_string()
        }
        "homicidalIdeation" => {
            "Risk assessment details required when homicidal ideation is present".to_string()
        }
        other => format!("Required when {other} is set"),
    }
}

fn check_outcome_measures(data: &Value) -> Vec<FieldError> {
    let Some(measures) = data.get("outcomeMeasures").and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut errors = Vec::new();
    for (i, measure) in measures.iter().enumerate() {
        let Some(measure_type) = measure.get("measureType").and_then(Value::as_str) else {
            errors.push(FieldError::new(
                format!("outcomeMeasures[{i}].measureType"),
                "measureType is required",
            ));
            continue;
        };
        let Some((min, max)) = instrument_range(measure_type) else {
            continue;
        };
        match measure.get("score").and_then(as_number) {
            Some(score) if score >= min && score <= max => {}
            Some(_) => errors.push(FieldError::new(
                format!("outcomeMeasures[{i}].score"),
                format!("Score must be between {min} and {max} for {measure_type}"),
            )),
            None => errors.push(FieldError::new(
                format!("outcomeMeasures[{i}].score"),
                format!("Score is required for {measure_type}"),
            )),
        }
    }
    errors
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::Object(map)) => map.is_empty(),
        Some(_) => false,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
