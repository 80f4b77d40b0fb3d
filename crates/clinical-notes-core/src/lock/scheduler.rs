//! Weekly lockout sweep.
//!
//! Signed notes lock at the first Sunday midnight (practice time) after they
//! were signed. The sweep is idempotent: it only touches unlocked notes, and
//! every lock is a version compare-and-swap, so a note edited concurrently
//! is skipped until the next tick.

use chrono::{DateTime, Datelike, Duration, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{NotesError, NotesResult};
use crate::models::{Actor, AuditAction, ClinicalNote, LockReason, NewAuditEntry};
use crate::workflow::{check_version, load_note, require, save, Action, Context};

/// User ID recorded on entries written by the sweep.
pub const SYSTEM_USER: &str = "system";

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub boundary: Option<DateTime<Utc>>,
    /// Signed notes locked at the weekly boundary
    pub locked: Vec<String>,
    /// Notes whose unlock grant ran out
    pub relocked: Vec<String>,
    /// Unsigned notes past due at the boundary
    pub locked_overdue: Vec<String>,
    /// Notes skipped because they changed during the sweep
    pub conflicts: usize,
}

impl SweepReport {
    pub fn total_locked(&self) -> usize {
        self.locked.len() + self.relocked.len() + self.locked_overdue.len()
    }
}

/// Most recent Sunday 00:00 in `offset` at or before `now`.
pub fn most_recent_boundary(now: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    let local = now.with_timezone(&offset);
    let days_back = i64::from(local.weekday().num_days_from_sunday());
    let sunday = local.date_naive() - Duration::days(days_back);
    let midnight = sunday.and_time(chrono::NaiveTime::MIN);
    let utc = midnight - Duration::seconds(i64::from(offset.local_minus_utc()));
    DateTime::from_naive_utc_and_offset(utc, Utc)
}

/// The next Sunday 00:00 in `offset` strictly after `now`.
pub fn next_lockout(now: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    most_recent_boundary(now, offset) + Duration::days(7)
}

/// Runs lockout sweeps and manual locks.
pub struct LockScheduler<'a> {
    ctx: Context<'a>,
}

impl<'a> LockScheduler<'a> {
    pub fn new(ctx: Context<'a>) -> Self {
        Self { ctx }
    }

    fn offset(&self) -> FixedOffset {
        self.ctx
            .config
            .lockout_offset()
            .unwrap_or_else(|| Utc.fix())
    }

    pub fn boundary(&self) -> DateTime<Utc> {
        most_recent_boundary(self.ctx.now, self.offset())
    }

    pub fn next_lockout(&self) -> DateTime<Utc> {
        next_lockout(self.ctx.now, self.offset())
    }

    /// Lock everything due at this instant.
    pub fn sweep(&self) -> NotesResult<SweepReport> {
        let now = self.ctx.now;
        let boundary = self.boundary();
        let mut report = SweepReport {
            boundary: Some(boundary),
            ..Default::default()
        };

        // Expired grants first, so a relocked note is not also counted below
        for note in self.ctx.db.list_expired_grants(&now)? {
            let id = note.id.clone();
            if self.lock_one(note, LockReason::UnlockExpired)? {
                report.relocked.push(id);
            } else {
                report.conflicts += 1;
            }
        }

        for note in self.ctx.db.list_lock_candidates(&boundary)? {
            if note.has_active_grant(now) {
                continue;
            }
            let id = note.id.clone();
            if self.lock_one(note, LockReason::SundayLockout)? {
                report.locked.push(id);
            } else {
                report.conflicts += 1;
            }
        }

        if self.ctx.config.lock_overdue_unsigned {
            for note in self.ctx.db.list_overdue_unsigned(&boundary)? {
                if note.has_active_grant(now) {
                    continue;
                }
                let id = note.id.clone();
                if self.lock_one(note, LockReason::OverdueLockout)? {
                    report.locked_overdue.push(id);
                } else {
                    report.conflicts += 1;
                }
            }
        }

        tracing::info!(
            boundary = %boundary,
            locked = report.locked.len(),
            relocked = report.relocked.len(),
            locked_overdue = report.locked_overdue.len(),
            conflicts = report.conflicts,
            "Lock sweep complete"
        );
        Ok(report)
    }

    /// Lock `note` as read. Returns false if it changed since.
    fn lock_one(&self, mut note: ClinicalNote, reason: LockReason) -> NotesResult<bool> {
        let now = self.ctx.now;
        let expected = note.version;

        let outcome: NotesResult<()> = self.ctx.db.atomically(|db| {
            apply_lock(&mut note, reason, now);
            save(db, &mut note, expected, now)?;
            self.ctx.audit().record(
                NewAuditEntry::new(AuditAction::Lock, SYSTEM_USER)
                    .note(&note.id)
                    .reason(reason.as_str())
                    .details(json!({ "lockReason": reason })),
                now,
            )?;
            Ok(())
        });

        match outcome {
            Ok(()) => Ok(true),
            Err(NotesError::VersionConflict { .. }) | Err(NotesError::NotFound(_)) => {
                tracing::debug!(note_id = %note.id, "Note changed during sweep, skipped");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Lock a note immediately, on behalf of its supervisor or an admin.
    pub fn lock_note(
        &self,
        actor: &Actor,
        note_id: &str,
        expected_version: i64,
        reason: Option<String>,
    ) -> NotesResult<ClinicalNote> {
        let now = self.ctx.now;
        self.ctx.guarded(actor, Some(note_id), "lock", |db| {
            let mut note = load_note(db, note_id)?;
            require(db, actor, Action::Lock, &note)?;
            check_version(&note, expected_version)?;
            if note.is_locked {
                return Err(NotesError::business("ALREADY_LOCKED", "Note is already locked"));
            }

            apply_lock(&mut note, LockReason::Manual, now);
            save(db, &mut note, expected_version, now)?;

            let mut entry = NewAuditEntry::new(AuditAction::Lock, &actor.user_id)
                .note(note_id)
                .details(json!({ "lockReason": LockReason::Manual }));
            if let Some(reason) = reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty()) {
                entry = entry.reason(reason);
            }
            self.ctx.audit().record(entry, now)?;
            Ok(note)
        })
    }
}

fn apply_lock(note: &mut ClinicalNote, reason: LockReason, now: DateTime<Utc>) {
    note.is_locked = true;
    note.locked_at = Some(now);
    note.lock_reason = Some(reason);
    note.clear_grant();
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Weekday};

    #[test]
    fn test_boundary_is_sunday_midnight() {
        // Wednesday 2024-05-08
        let now = Utc.with_ymd_and_hms(2024, 5, 8, 15, 30, 0).unwrap();
        let utc = FixedOffset::east_opt(0).unwrap();
        let boundary = most_recent_boundary(now, utc);
        assert_eq!(boundary, Utc.with_ymd_and_hms(2024, 5, 5, 0, 0, 0).unwrap());
        assert_eq!(boundary.weekday(), Weekday::Sun);
        assert_eq!(next_lockout(now, utc), Utc.with_ymd_and_hms(2024, 5, 12, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_boundary_on_sunday_itself() {
        let now = Utc.with_ymd_and_hms(2024, 5, 12, 0, 0, 0).unwrap();
        let utc = FixedOffset::east_opt(0).unwrap();
        assert_eq!(most_recent_boundary(now, utc), now);
        assert_eq!(next_lockout(now, utc), now + Duration::days(7));
    }

    #[test]
    fn test_boundary_respects_offset() {
        // Sunday 03:00 UTC is still Saturday evening at UTC-5
        let now = Utc.with_ymd_and_hms(2024, 5, 12, 3, 0, 0).unwrap();
        let eastern = FixedOffset::west_opt(5 * 3600).unwrap();
        let boundary = most_recent_boundary(now, eastern);
        assert_eq!(boundary, Utc.with_ymd_and_hms(2024, 5, 5, 5, 0, 0).unwrap());
        assert_eq!(next_lockout(now, eastern), Utc.with_ymd_and_hms(2024, 5, 12, 5, 0, 0).unwrap());
    }
}
