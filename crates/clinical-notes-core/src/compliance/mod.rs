//! Documentation compliance dashboard.
//!
//! Aggregates, for whatever the caller may see, the notes awaiting a
//! cosignature, overdue and locked notes, open drafts, completed
//! appointments without any note, and each client's treatment plan age.

mod reminders;

pub use reminders::*;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::NoteFilter;
use crate::error::NotesResult;
use crate::lock::LockScheduler;
use crate::models::{Actor, Appointment, ClinicalNote, NoteStatus, NoteType};
use crate::workflow::{visible_clinicians, Context};

/// Whose work a dashboard covers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DashboardScope {
    /// The caller's own notes
    Own,
    /// The caller and their supervisees
    Team,
    /// The whole practice
    All,
}

/// One note on the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NoteSummary {
    pub id: String,
    pub client_id: String,
    pub clinician_id: String,
    pub note_type: NoteType,
    pub status: NoteStatus,
    pub session_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub days_since_session: i64,
    /// Whole days past the due date, zero when not overdue
    pub days_overdue: i64,
    pub is_overdue: bool,
    pub is_urgent: bool,
    pub is_locked: bool,
}

/// A completed appointment with no note.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MissingNote {
    pub appointment_id: String,
    pub client_id: String,
    pub clinician_id: String,
    pub appointment_date: DateTime<Utc>,
    pub days_since: i64,
    pub is_urgent: bool,
}

/// Age of a client's most recent signed treatment plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TreatmentPlanStatus {
    pub client_id: String,
    pub last_plan_note_id: Option<String>,
    pub last_plan_date: Option<DateTime<Utc>>,
    pub days_since_plan: Option<i64>,
    pub needs_update: bool,
}

/// Headline counts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub notes_awaiting_cosign: usize,
    pub overdue_notes: usize,
    pub locked_notes: usize,
    pub draft_notes: usize,
    pub appointments_without_notes: usize,
    pub urgent_items: usize,
    pub plans_needing_update: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceDashboard {
    pub scope: DashboardScope,
    pub generated_at: DateTime<Utc>,
    pub next_lockout: DateTime<Utc>,
    pub stats: DashboardStats,
    pub awaiting_cosign: Vec<NoteSummary>,
    pub overdue: Vec<NoteSummary>,
    pub locked: Vec<NoteSummary>,
    pub drafts: Vec<NoteSummary>,
    pub appointments_without_notes: Vec<MissingNote>,
    pub treatment_plans: Vec<TreatmentPlanStatus>,
}

/// Builds compliance dashboards.
pub struct ComplianceAggregator<'a> {
    ctx: Context<'a>,
}

impl<'a> ComplianceAggregator<'a> {
    pub fn new(ctx: Context<'a>) -> Self {
        Self { ctx }
    }

    pub fn dashboard(&self, actor: &Actor) -> NotesResult<ComplianceDashboard> {
        let now = self.ctx.now;
        let clinicians = visible_clinicians(self.ctx.db, actor)?;
        let scope = match &clinicians {
            None => DashboardScope::All,
            Some(_) if actor.is_supervisor() => DashboardScope::Team,
            Some(_) => DashboardScope::Own,
        };

        let notes = self.ctx.db.list_notes(&NoteFilter {
            clinician_ids: clinicians.clone(),
            ..Default::default()
        })?;
        let missing = self
            .ctx
            .db
            .list_appointments_without_notes(clinicians.as_deref(), &now)?;

        let urgent_after = self.ctx.config.urgent_after_days;
        let summary_of = |note: &ClinicalNote| summarize(note, now, urgent_after);

        let awaiting_cosign: Vec<NoteSummary> = notes
            .iter()
            .filter(|n| n.status == NoteStatus::PendingCosign)
            .map(summary_of)
            .collect();
        let overdue: Vec<NoteSummary> = notes
            .iter()
            .filter(|n| is_overdue(n, now))
            .map(summary_of)
            .collect();
        let locked: Vec<NoteSummary> = notes
            .iter()
            .filter(|n| n.is_effectively_locked(now))
            .map(summary_of)
            .collect();
        let drafts: Vec<NoteSummary> = notes
            .iter()
            .filter(|n| n.status == NoteStatus::Draft)
            .map(summary_of)
            .collect();
        let appointments_without_notes: Vec<MissingNote> = missing
            .iter()
            .map(|a| missing_note(a, now, urgent_after))
            .collect();
        let treatment_plans = self.treatment_plans(&notes);

        // An urgent note is counted once however many lists it is on
        let urgent_notes = notes
            .iter()
            .filter(|n| is_incomplete(n.status) && n.days_since_session(now) > urgent_after)
            .count();
        let urgent_items =
            urgent_notes + appointments_without_notes.iter().filter(|m| m.is_urgent).count();

        let stats = DashboardStats {
            notes_awaiting_cosign: awaiting_cosign.len(),
            overdue_notes: overdue.len(),
            locked_notes: locked.len(),
            draft_notes: drafts.len(),
            appointments_without_notes: appointments_without_notes.len(),
            urgent_items,
            plans_needing_update: treatment_plans.iter().filter(|p| p.needs_update).count(),
        };

        Ok(ComplianceDashboard {
            scope,
            generated_at: now,
            next_lockout: LockScheduler::new(self.ctx).next_lockout(),
            stats,
            awaiting_cosign,
            overdue,
            locked,
            drafts,
            appointments_without_notes,
            treatment_plans,
        })
    }

    /// Latest signed treatment plan per client appearing in `notes`.
    fn treatment_plans(&self, notes: &[ClinicalNote]) -> Vec<TreatmentPlanStatus> {
        let now = self.ctx.now;
        let review_days = self.ctx.config.treatment_plan_review_days;

        let mut latest: BTreeMap<&str, Option<&ClinicalNote>> = BTreeMap::new();
        for note in notes {
            let slot = latest.entry(note.client_id.as_str()).or_insert(None);
            if note.note_type == NoteType::TreatmentPlan && note.status.is_signed() {
                let newer = slot.map_or(true, |current| note.session_date > current.session_date);
                if newer {
                    *slot = Some(note);
                }
            }
        }

        latest
            .into_iter()
            .map(|(client_id, plan)| {
                let days = plan.map(|p| p.days_since_session(now));
                TreatmentPlanStatus {
                    client_id: client_id.to_string(),
                    last_plan_note_id: plan.map(|p| p.id.clone()),
                    last_plan_date: plan.map(|p| p.session_date),
                    days_since_plan: days,
                    needs_update: days.map_or(true, |d| d > review_days),
                }
            })
            .collect()
    }
}

/// Incomplete and past its due date.
pub fn is_overdue(note: &ClinicalNote, now: DateTime<Utc>) -> bool {
    is_incomplete(note.status) && now > note.due_date
}

fn is_incomplete(status: NoteStatus) -> bool {
    matches!(
        status,
        NoteStatus::Draft | NoteStatus::PendingCosign | NoteStatus::ReturnedForRevision
    )
}

fn summarize(note: &ClinicalNote, now: DateTime<Utc>, urgent_after: i64) -> NoteSummary {
    let overdue = is_overdue(note, now);
    let days_since_session = note.days_since_session(now);
    NoteSummary {
        id: note.id.clone(),
        client_id: note.client_id.clone(),
        clinician_id: note.clinician_id.clone(),
        note_type: note.note_type,
        status: note.status,
        session_date: note.session_date,
        due_date: note.due_date,
        days_since_session,
        days_overdue: if overdue { (now - note.due_date).num_days() } else { 0 },
        is_overdue: overdue,
        is_urgent: days_since_session > urgent_after,
        is_locked: note.is_effectively_locked(now),
    }
}

fn missing_note(appointment: &Appointment, now: DateTime<Utc>, urgent_after: i64) -> MissingNote {
    let days_since = (now - appointment.appointment_date).num_days();
    MissingNote {
        appointment_id: appointment.id.clone(),
        client_id: appointment.client_id.clone(),
        clinician_id: appointment.clinician_id.clone(),
        appointment_date: appointment.appointment_date,
        days_since,
        is_urgent: days_since > urgent_after,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewNote;
    use chrono::{Duration, TimeZone};

    fn note(status: NoteStatus, session_days_ago: i64, now: DateTime<Utc>) -> ClinicalNote {
        let mut note = ClinicalNote::new(
            NewNote {
                client_id: "c1".into(),
                session_date: Some(now - Duration::days(session_days_ago)),
                ..Default::default()
            },
            NoteType::ProgressNote,
            "clin".into(),
            now - Duration::days(session_days_ago),
            3,
        );
        note.status = status;
        note
    }

    #[test]
    fn test_overdue_definition() {
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();
        assert!(is_overdue(&note(NoteStatus::Draft, 5, now), now));
        assert!(is_overdue(&note(NoteStatus::ReturnedForRevision, 5, now), now));
        assert!(!is_overdue(&note(NoteStatus::Draft, 2, now), now));
        assert!(!is_overdue(&note(NoteStatus::Signed, 10, now), now));
    }

    #[test]
    fn test_summary_urgency() {
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();
        let summary = summarize(&note(NoteStatus::Draft, 8, now), now, 7);
        assert!(summary.is_urgent);
        assert_eq!(summary.days_overdue, 5);

        let summary = summarize(&note(NoteStatus::Draft, 7, now), now, 7);
        assert!(!summary.is_urgent);
    }
}
