//! Clinical note database operations.
//!
//! Every update is a compare-and-swap on `version`: the write only lands if
//! the stored version still equals the one the caller read.

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, OptionalExtension};

use super::practice::placeholders;
use super::{classify, fmt_ts, parse_opt_ts, parse_ts, Database, DbError, DbResult};
use crate::models::{
    Amendment, ClinicalNote, LockReason, NoteStatus, NoteType, OutcomeMeasure, RevisionEntry,
    UnlockDecision,
};

const NOTE_COLUMNS: &str = r#"
    id, client_id, appointment_id, clinician_id, note_type, session_date, due_date, status,
    is_locked, locked_at, lock_reason,
    unlock_requested, unlock_reason, unlock_requested_at, unlock_approved_by,
    unlock_approval_date, unlock_decision, unlock_decision_reason, unlock_duration_hours,
    unlock_until,
    requires_cosign, signed_by, signed_date, days_to_complete, completed_on_time,
    cosigned_by, cosigned_date, supervisor_comments,
    revision_count, revision_history, amendments, version,
    diagnosis_codes, cpt_codes, content, outcome_measures, created_at, updated_at
"#;

/// Filter for note listings. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct NoteFilter {
    /// Restrict to notes owned by these clinicians
    pub clinician_ids: Option<Vec<String>>,
    pub client_id: Option<String>,
    pub note_type: Option<NoteType>,
    pub statuses: Option<Vec<NoteStatus>>,
    pub is_locked: Option<bool>,
}

impl Database {
    /// Insert a new note.
    pub fn insert_note(&self, note: &ClinicalNote) -> DbResult<()> {
        let json = NoteJson::encode(note)?;

        self.conn
            .execute(
                &format!(
                    "INSERT INTO clinical_notes ({NOTE_COLUMNS}) VALUES (
                        ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                        ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30,
                        ?31, ?32, ?33, ?34, ?35, ?36, ?37, ?38
                    )"
                ),
                params![
                    note.id,
                    note.client_id,
                    note.appointment_id,
                    note.clinician_id,
                    note.note_type.as_str(),
                    fmt_ts(&note.session_date),
                    fmt_ts(&note.due_date),
                    note.status.as_str(),
                    note.is_locked,
                    note.locked_at.as_ref().map(fmt_ts),
                    note.lock_reason.map(|r| r.as_str()),
                    note.unlock_requested,
                    note.unlock_reason,
                    note.unlock_requested_at.as_ref().map(fmt_ts),
                    note.unlock_approved_by,
                    note.unlock_approval_date.as_ref().map(fmt_ts),
                    note.unlock_decision.map(|d| d.as_str()),
                    note.unlock_decision_reason,
                    note.unlock_duration_hours,
                    note.unlock_until.as_ref().map(fmt_ts),
                    note.requires_cosign,
                    note.signed_by,
                    note.signed_date.as_ref().map(fmt_ts),
                    note.days_to_complete,
                    note.completed_on_time,
                    note.cosigned_by,
                    note.cosigned_date.as_ref().map(fmt_ts),
                    note.supervisor_comments,
                    note.revision_count,
                    json.revision_history,
                    json.amendments,
                    note.version,
                    json.diagnosis_codes,
                    json.cpt_codes,
                    json.content,
                    json.outcome_measures,
                    fmt_ts(&note.created_at),
                    fmt_ts(&note.updated_at),
                ],
            )
            .map_err(|e| classify(e, "Clinical note for appointment"))?;
        Ok(())
    }

    /// Write every mutable column of `note` if the stored version is still
    /// `expected_version`. Returns false when the swap lost.
    pub fn update_note(&self, note: &ClinicalNote, expected_version: i64) -> DbResult<bool> {
        let json = NoteJson::encode(note)?;

        let rows_affected = self
            .conn
            .execute(
                r#"
                UPDATE clinical_notes SET
                    session_date = ?3,
                    due_date = ?4,
                    status = ?5,
                    is_locked = ?6,
                    locked_at = ?7,
                    lock_reason = ?8,
                    unlock_requested = ?9,
                    unlock_reason = ?10,
                    unlock_requested_at = ?11,
                    unlock_approved_by = ?12,
                    unlock_approval_date = ?13,
                    unlock_decision = ?14,
                    unlock_decision_reason = ?15,
                    unlock_duration_hours = ?16,
                    unlock_until = ?17,
                    requires_cosign = ?18,
                    signed_by = ?19,
                    signed_date = ?20,
                    days_to_complete = ?21,
                    completed_on_time = ?22,
                    cosigned_by = ?23,
                    cosigned_date = ?24,
                    supervisor_comments = ?25,
                    revision_count = ?26,
                    revision_history = ?27,
                    amendments = ?28,
                    version = ?29,
                    diagnosis_codes = ?30,
                    cpt_codes = ?31,
                    content = ?32,
                    outcome_measures = ?33,
                    updated_at = ?34
                WHERE id = ?1 AND version = ?2
                "#,
                params![
                    note.id,
                    expected_version,
                    fmt_ts(&note.session_date),
                    fmt_ts(&note.due_date),
                    note.status.as_str(),
                    note.is_locked,
                    note.locked_at.as_ref().map(fmt_ts),
                    note.lock_reason.map(|r| r.as_str()),
                    note.unlock_requested,
                    note.unlock_reason,
                    note.unlock_requested_at.as_ref().map(fmt_ts),
                    note.unlock_approved_by,
                    note.unlock_approval_date.as_ref().map(fmt_ts),
                    note.unlock_decision.map(|d| d.as_str()),
                    note.unlock_decision_reason,
                    note.unlock_duration_hours,
                    note.unlock_until.as_ref().map(fmt_ts),
                    note.requires_cosign,
                    note.signed_by,
                    note.signed_date.as_ref().map(fmt_ts),
                    note.days_to_complete,
                    note.completed_on_time,
                    note.cosigned_by,
                    note.cosigned_date.as_ref().map(fmt_ts),
                    note.supervisor_comments,
                    note.revision_count,
                    json.revision_history,
                    json.amendments,
                    note.version,
                    json.diagnosis_codes,
                    json.cpt_codes,
                    json.content,
                    json.outcome_measures,
                    fmt_ts(&note.updated_at),
                ],
            )
            .map_err(|e| classify(e, "Clinical note for appointment"))?;
        Ok(rows_affected > 0)
    }

    /// Get a note by ID.
    pub fn get_note(&self, note_id: &str) -> DbResult<Option<ClinicalNote>> {
        self.conn
            .query_row(
                &format!("SELECT {NOTE_COLUMNS} FROM clinical_notes WHERE id = ?"),
                [note_id],
                read_note_row,
            )
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// Current stored version of a note.
    pub fn get_note_version(&self, note_id: &str) -> DbResult<Option<i64>> {
        Ok(self
            .conn
            .query_row(
                "SELECT version FROM clinical_notes WHERE id = ?",
                [note_id],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Delete a note at `expected_version`. Returns false when nothing matched.
    pub fn delete_note(&self, note_id: &str, expected_version: i64) -> DbResult<bool> {
        let rows_affected = self
            .conn
            .execute(
                "DELETE FROM clinical_notes WHERE id = ?1 AND version = ?2",
                params![note_id, expected_version],
            )
            .map_err(|e| classify(e, "Clinical note"))?;
        Ok(rows_affected > 0)
    }

    /// Whether any note is attached to the appointment.
    pub fn note_exists_for_appointment(&self, appointment_id: &str) -> DbResult<bool> {
        Ok(self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM clinical_notes WHERE appointment_id = ?)",
            [appointment_id],
            |row| row.get(0),
        )?)
    }

    /// Whether the client has a signed Intake Assessment.
    pub fn has_signed_intake(&self, client_id: &str) -> DbResult<bool> {
        Ok(self.conn.query_row(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM clinical_notes
                WHERE client_id = ?1
                  AND note_type = ?2
                  AND status IN ('SIGNED', 'PENDING_COSIGN', 'COSIGNED')
            )
            "#,
            params![client_id, NoteType::IntakeAssessment.as_str()],
            |row| row.get(0),
        )?)
    }

    /// List notes matching `filter`, oldest session first.
    pub fn list_notes(&self, filter: &NoteFilter) -> DbResult<Vec<ClinicalNote>> {
        let mut sql = format!("SELECT {NOTE_COLUMNS} FROM clinical_notes WHERE 1 = 1");
        let mut args: Vec<String> = Vec::new();

        if let Some(ids) = &filter.clinician_ids {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            sql.push_str(&format!(" AND clinician_id IN ({})", placeholders(ids.len())));
            args.extend(ids.iter().cloned());
        }
        if let Some(client_id) = &filter.client_id {
            sql.push_str(" AND client_id = ?");
            args.push(client_id.clone());
        }
        if let Some(note_type) = filter.note_type {
            sql.push_str(" AND note_type = ?");
            args.push(note_type.as_str().to_string());
        }
        if let Some(statuses) = &filter.statuses {
            if statuses.is_empty() {
                return Ok(Vec::new());
            }
            sql.push_str(&format!(" AND status IN ({})", placeholders(statuses.len())));
            args.extend(statuses.iter().map(|s| s.as_str().to_string()));
        }
        if let Some(locked) = filter.is_locked {
            sql.push_str(if locked { " AND is_locked = 1" } else { " AND is_locked = 0" });
        }
        sql.push_str(" ORDER BY session_date ASC, id ASC");

        self.query_notes(&sql, args)
    }

    /// Unlocked SIGNED/COSIGNED notes signed before `boundary`.
    pub fn list_lock_candidates(&self, boundary: &DateTime<Utc>) -> DbResult<Vec<ClinicalNote>> {
        self.query_notes(
            &format!(
                r#"
                SELECT {NOTE_COLUMNS} FROM clinical_notes
                WHERE is_locked = 0
                  AND status IN ('SIGNED', 'COSIGNED')
                  AND signed_date IS NOT NULL
                  AND signed_date < ?
                ORDER BY signed_date ASC
                "#
            ),
            vec![fmt_ts(boundary)],
        )
    }

    /// Unlocked notes whose unlock grant ended before `now`.
    pub fn list_expired_grants(&self, now: &DateTime<Utc>) -> DbResult<Vec<ClinicalNote>> {
        self.query_notes(
            &format!(
                r#"
                SELECT {NOTE_COLUMNS} FROM clinical_notes
                WHERE is_locked = 0
                  AND unlock_until IS NOT NULL
                  AND unlock_until < ?
                ORDER BY unlock_until ASC
                "#
            ),
            vec![fmt_ts(now)],
        )
    }

    /// Unlocked, unsigned notes that were due before `boundary`.
    pub fn list_overdue_unsigned(&self, boundary: &DateTime<Utc>) -> DbResult<Vec<ClinicalNote>> {
        self.query_notes(
            &format!(
                r#"
                SELECT {NOTE_COLUMNS} FROM clinical_notes
                WHERE is_locked = 0
                  AND status IN ('DRAFT', 'PENDING_COSIGN', 'RETURNED_FOR_REVISION')
                  AND due_date < ?
                ORDER BY due_date ASC
                "#
            ),
            vec![fmt_ts(boundary)],
        )
    }

    /// Record that a reminder was sent. Returns false if it already had been.
    pub fn record_reminder_sent(
        &self,
        note_id: &str,
        days_before: i64,
        now: &DateTime<Utc>,
    ) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "INSERT OR IGNORE INTO note_reminders_sent (note_id, days_before, sent_at) VALUES (?1, ?2, ?3)",
            params![note_id, days_before, fmt_ts(now)],
        )?;
        Ok(rows_affected > 0)
    }

    fn query_notes(&self, sql: &str, args: Vec<String>) -> DbResult<Vec<ClinicalNote>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), read_note_row)?;

        let mut notes = Vec::new();
        for row in rows {
            notes.push(row?.try_into()?);
        }
        Ok(notes)
    }
}

/// JSON-encoded columns of a note.
struct NoteJson {
    revision_history: String,
    amendments: String,
    diagnosis_codes: String,
    cpt_codes: String,
    content: String,
    outcome_measures: String,
}

impl NoteJson {
    fn encode(note: &ClinicalNote) -> DbResult<Self> {
        Ok(Self {
            revision_history: serde_json::to_string(&note.revision_history)?,
            amendments: serde_json::to_string(&note.amendments)?,
            diagnosis_codes: serde_json::to_string(&note.diagnosis_codes)?,
            cpt_codes: serde_json::to_string(&note.cpt_codes)?,
            content: serde_json::to_string(&note.content)?,
            outcome_measures: serde_json::to_string(&note.outcome_measures)?,
        })
    }
}

/// Intermediate row struct for database mapping.
struct NoteRow {
    id: String,
    client_id: String,
    appointment_id: Option<String>,
    clinician_id: String,
    note_type: String,
    session_date: String,
    due_date: String,
    status: String,
    is_locked: bool,
    locked_at: Option<String>,
    lock_reason: Option<String>,
    unlock_requested: bool,
    unlock_reason: Option<String>,
    unlock_requested_at: Option<String>,
    unlock_approved_by: Option<String>,
    unlock_approval_date: Option<String>,
    unlock_decision: Option<String>,
    unlock_decision_reason: Option<String>,
    unlock_duration_hours: Option<u32>,
    unlock_until: Option<String>,
    requires_cosign: bool,
    signed_by: Option<String>,
    signed_date: Option<String>,
    days_to_complete: Option<i64>,
    completed_on_time: Option<bool>,
    cosigned_by: Option<String>,
    cosigned_date: Option<String>,
    supervisor_comments: Option<String>,
    revision_count: u32,
    revision_history: String,
    amendments: String,
    version: i64,
    diagnosis_codes: String,
    cpt_codes: String,
    content: String,
    outcome_measures: String,
    created_at: String,
    updated_at: String,
}

fn read_note_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<NoteRow> {
    Ok(NoteRow {
        id: row.get(0)?,
        client_id: row.get(1)?,
        appointment_id: row.get(2)?,
        clinician_id: row.get(3)?,
        note_type: row.get(4)?,
        session_date: row.get(5)?,
        due_date: row.get(6)?,
        status: row.get(7)?,
        is_locked: row.get(8)?,
        locked_at: row.get(9)?,
        lock_reason: row.get(10)?,
        unlock_requested: row.get(11)?,
        unlock_reason: row.get(12)?,
        unlock_requested_at: row.get(13)?,
        unlock_approved_by: row.get(14)?,
        unlock_approval_date: row.get(15)?,
        unlock_decision: row.get(16)?,
        unlock_decision_reason: row.get(17)?,
        unlock_duration_hours: row.get(18)?,
        unlock_until: row.get(19)?,
        requires_cosign: row.get(20)?,
        signed_by: row.get(21)?,
        signed_date: row.get(22)?,
        days_to_complete: row.get(23)?,
        completed_on_time: row.get(24)?,
        cosigned_by: row.get(25)?,
        cosigned_date: row.get(26)?,
        supervisor_comments: row.get(27)?,
        revision_count: row.get(28)?,
        revision_history: row.get(29)?,
        amendments: row.get(30)?,
        version: row.get(31)?,
        diagnosis_codes: row.get(32)?,
        cpt_codes: row.get(33)?,
        content: row.get(34)?,
        outcome_measures: row.get(35)?,
        created_at: row.get(36)?,
        updated_at: row.get(37)?,
    })
}

impl TryFrom<NoteRow> for ClinicalNote {
    type Error = DbError;

    fn try_from(row: NoteRow) -> Result<Self, Self::Error> {
        let note_type: NoteType = row
            .note_type
            .parse()
            .map_err(|e: crate::models::UnknownNoteType| DbError::Constraint(e.to_string()))?;
        let status = NoteStatus::parse(&row.status)
            .ok_or_else(|| DbError::Constraint(format!("Unknown note status: {}", row.status)))?;
        let lock_reason = row
            .lock_reason
            .map(|r| {
                LockReason::parse(&r)
                    .ok_or_else(|| DbError::Constraint(format!("Unknown lock reason: {}", r)))
            })
            .transpose()?;
        let unlock_decision = row
            .unlock_decision
            .map(|d| {
                UnlockDecision::parse(&d)
                    .ok_or_else(|| DbError::Constraint(format!("Unknown unlock decision: {}", d)))
            })
            .transpose()?;

        let revision_history: Vec<RevisionEntry> = serde_json::from_str(&row.revision_history)?;
        let amendments: Vec<Amendment> = serde_json::from_str(&row.amendments)?;
        let outcome_measures: Vec<OutcomeMeasure> = serde_json::from_str(&row.outcome_measures)?;

        Ok(ClinicalNote {
            id: row.id,
            client_id: row.client_id,
            appointment_id: row.appointment_id,
            clinician_id: row.clinician_id,
            note_type,
            session_date: parse_ts(&row.session_date)?,
            due_date: parse_ts(&row.due_date)?,
            status,
            is_locked: row.is_locked,
            locked_at: parse_opt_ts(row.locked_at)?,
            lock_reason,
            unlock_requested: row.unlock_requested,
            unlock_reason: row.unlock_reason,
            unlock_requested_at: parse_opt_ts(row.unlock_requested_at)?,
            unlock_approved_by: row.unlock_approved_by,
            unlock_approval_date: parse_opt_ts(row.unlock_approval_date)?,
            unlock_decision,
            unlock_decision_reason: row.unlock_decision_reason,
            unlock_duration_hours: row.unlock_duration_hours,
            unlock_until: parse_opt_ts(row.unlock_until)?,
            requires_cosign: row.requires_cosign,
            signed_by: row.signed_by,
            signed_date: parse_opt_ts(row.signed_date)?,
            days_to_complete: row.days_to_complete,
            completed_on_time: row.completed_on_time,
            cosigned_by: row.cosigned_by,
            cosigned_date: parse_opt_ts(row.cosigned_date)?,
            supervisor_comments: row.supervisor_comments,
            revision_count: row.revision_count,
            revision_history,
            amendments,
            version: row.version,
            diagnosis_codes: serde_json::from_str(&row.diagnosis_codes)?,
            cpt_codes: serde_json::from_str(&row.cpt_codes)?,
            content: serde_json::from_str(&row.content)?,
            outcome_measures,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
        })
    }
}
