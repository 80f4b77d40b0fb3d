//! Audit log models.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of audited event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    View,
    Create,
    Edit,
    Delete,
    Sign,
    Cosign,
    StatusChange,
    Amendment,
    Lock,
    UnlockRequest,
    UnlockApproved,
    UnlockRejected,
    Export,
    FailedAuthorization,
}

impl AuditAction {
    pub const ALL: [AuditAction; 14] = [
        AuditAction::View,
        AuditAction::Create,
        AuditAction::Edit,
        AuditAction::Delete,
        AuditAction::Sign,
        AuditAction::Cosign,
        AuditAction::StatusChange,
        AuditAction::Amendment,
        AuditAction::Lock,
        AuditAction::UnlockRequest,
        AuditAction::UnlockApproved,
        AuditAction::UnlockRejected,
        AuditAction::Export,
        AuditAction::FailedAuthorization,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::View => "VIEW",
            AuditAction::Create => "CREATE",
            AuditAction::Edit => "EDIT",
            AuditAction::Delete => "DELETE",
            AuditAction::Sign => "SIGN",
            AuditAction::Cosign => "COSIGN",
            AuditAction::StatusChange => "STATUS_CHANGE",
            AuditAction::Amendment => "AMENDMENT",
            AuditAction::Lock => "LOCK",
            AuditAction::UnlockRequest => "UNLOCK_REQUEST",
            AuditAction::UnlockApproved => "UNLOCK_APPROVED",
            AuditAction::UnlockRejected => "UNLOCK_REJECTED",
            AuditAction::Export => "EXPORT",
            AuditAction::FailedAuthorization => "FAILED_AUTHORIZATION",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        AuditAction::ALL.iter().copied().find(|a| a.as_str() == s)
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored, immutable audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// Insertion order, strictly increasing
    pub seq: i64,
    pub id: String,
    pub action: AuditAction,
    pub user_id: String,
    pub note_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
    pub previous_status: Option<String>,
    pub new_status: Option<String>,
    pub before_state: Option<Value>,
    pub after_state: Option<Value>,
    pub changed_fields: Vec<String>,
    pub details: Option<Value>,
    /// Hash of the preceding entry (empty for the first)
    pub prev_hash: String,
    /// sha256 over `prev_hash` and the canonical entry body
    pub entry_hash: String,
}

/// An audit event to be appended.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditEntry {
    pub action: AuditAction,
    pub user_id: String,
    pub note_id: Option<String>,
    pub reason: Option<String>,
    pub previous_status: Option<String>,
    pub new_status: Option<String>,
    pub before_state: Option<Value>,
    pub after_state: Option<Value>,
    pub changed_fields: Vec<String>,
    pub details: Option<Value>,
}

impl NewAuditEntry {
    pub fn new(action: AuditAction, user_id: &str) -> Self {
        Self {
            action,
            user_id: user_id.to_string(),
            note_id: None,
            reason: None,
            previous_status: None,
            new_status: None,
            before_state: None,
            after_state: None,
            changed_fields: Vec::new(),
            details: None,
        }
    }

    pub fn note(mut self, note_id: &str) -> Self {
        self.note_id = Some(note_id.to_string());
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn status_change(mut self, previous: impl fmt::Display, new: impl fmt::Display) -> Self {
        self.previous_status = Some(previous.to_string());
        self.new_status = Some(new.to_string());
        self
    }

    pub fn states(mut self, before: Value, after: Value, changed_fields: Vec<String>) -> Self {
        self.before_state = Some(before);
        self.after_state = Some(after);
        self.changed_fields = changed_fields;
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Filter for audit log queries. All fields are optional and combined with AND.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuditQuery {
    pub note_id: Option<String>,
    pub user_id: Option<String>,
    pub action: Option<AuditAction>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_parse_roundtrip() {
        for action in AuditAction::ALL {
            assert_eq!(AuditAction::parse(action.as_str()), Some(action));
        }
        assert_eq!(AuditAction::parse("PRINT"), None);
    }

    #[test]
    fn test_builder() {
        let entry = NewAuditEntry::new(AuditAction::StatusChange, "u1")
            .note("n1")
            .status_change("DRAFT", "SIGNED")
            .reason("signed");
        assert_eq!(entry.action, AuditAction::StatusChange);
        assert_eq!(entry.previous_status.as_deref(), Some("DRAFT"));
        assert_eq!(entry.new_status.as_deref(), Some("SIGNED"));
        assert_eq!(entry.note_id.as_deref(), Some("n1"));
    }
}
