//! Due-date reminders for unsigned notes.

use serde::{Deserialize, Serialize};

use crate::db::NoteFilter;
use crate::error::NotesResult;
use crate::models::NoteStatus;
use crate::notify::{Notification, NotificationKind};
use crate::workflow::Context;

/// Outcome of one reminder pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReminderReport {
    pub sent: usize,
    /// Reminders skipped because the author opted out
    pub opted_out: usize,
}

/// Remind authors of drafts and returned notes coming due.
///
/// Each (note, days-before) pair is sent at most once.
pub fn send_due_reminders(ctx: Context<'_>) -> NotesResult<ReminderReport> {
    let now = ctx.now;
    let mut report = ReminderReport::default();

    let pending = ctx.db.list_notes(&NoteFilter {
        statuses: Some(vec![NoteStatus::Draft, NoteStatus::ReturnedForRevision]),
        is_locked: Some(false),
        ..Default::default()
    })?;

    for note in pending {
        let days_before = (note.due_date.date_naive() - now.date_naive()).num_days();
        if !ctx.config.reminder_days.contains(&days_before) {
            continue;
        }
        let wants_reminders = ctx
            .db
            .get_user(&note.clinician_id)?
            .is_some_and(|u| u.note_reminders);
        if !wants_reminders {
            report.opted_out += 1;
            continue;
        }
        if !ctx.db.record_reminder_sent(&note.id, days_before, &now)? {
            continue;
        }

        let when = match days_before {
            0 => "today".to_string(),
            1 => "tomorrow".to_string(),
            n => format!("in {n} days"),
        };
        ctx.notifier.notify(Notification {
            kind: NotificationKind::DueReminder,
            recipient_id: note.clinician_id.clone(),
            note_id: note.id.clone(),
            subject: format!("{} due {}", note.note_type, when),
            body: format!(
                "Your {} for the session on {} is due {}.",
                note.note_type,
                note.session_date.format("%Y-%m-%d"),
                when
            ),
        });
        report.sent += 1;
    }

    tracing::info!(sent = report.sent, opted_out = report.opted_out, "Reminder pass complete");
    Ok(report)
}
