//! CSV export of audit entries.

use crate::models::AuditEntry;

/// Column header of the CSV export.
pub const CSV_HEADER: &str =
    "action,userId,timestamp,noteId,reason,previousStatus,newStatus,changedFields,entryId,entryHash";

/// Render entries as CSV, one row per entry, in the order given.
pub fn to_csv(entries: &[AuditEntry]) -> String {
    let mut csv = String::from(CSV_HEADER);
    csv.push('\n');

    for entry in entries {
        let row = [
            entry.action.as_str().to_string(),
            escape_csv(&entry.user_id),
            entry.timestamp.to_rfc3339(),
            escape_csv(entry.note_id.as_deref().unwrap_or("")),
            escape_csv(entry.reason.as_deref().unwrap_or("")),
            entry.previous_status.clone().unwrap_or_default(),
            entry.new_status.clone().unwrap_or_default(),
            escape_csv(&entry.changed_fields.join(";")),
            entry.id.clone(),
            entry.entry_hash.clone(),
        ];
        csv.push_str(&row.join(","));
        csv.push('\n');
    }

    csv
}

fn escape_csv(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AuditAction;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_csv_escaping() {
        let entry = AuditEntry {
            seq: 1,
            id: "e1".into(),
            action: AuditAction::UnlockRequest,
            user_id: "u1".into(),
            note_id: Some("n1".into()),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
            reason: Some("Typo in plan, \"dose\" wrong".into()),
            previous_status: None,
            new_status: None,
            before_state: None,
            after_state: None,
            changed_fields: vec![],
            details: None,
            prev_hash: String::new(),
            entry_hash: "abc".into(),
        };

        let csv = to_csv(&[entry]);
        let mut lines = csv.lines();
        assert!(lines.next().unwrap().starts_with("action,userId,timestamp"));
        let row = lines.next().unwrap();
        assert!(row.starts_with("UNLOCK_REQUEST,u1,2024-05-01T09:00:00+00:00,n1,"));
        assert!(row.contains("\"Typo in plan, \"\"dose\"\" wrong\""));
    }
}
