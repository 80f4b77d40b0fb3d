//! The engine: one database connection behind a mutex plus the clock,
//! notifier, configuration and rate limiter every operation shares.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};

use crate::api::{auth, RateLimiter};
use crate::audit::{AuditAccess, ChainVerification};
use crate::clock::{Clock, SystemClock};
use crate::compliance::{send_due_reminders, ComplianceAggregator, ComplianceDashboard, ReminderReport};
use crate::config::EngineConfig;
use crate::db::{Database, NoteFilter};
use crate::error::{NotesError, NotesResult};
use crate::lock::{LockScheduler, SweepReport, UnlockResponse, UnlockService};
use crate::models::{
    Actor, Appointment, AppointmentStatus, AuditEntry, AuditQuery, Client, ClinicalNote, NewNote,
    NotePatch, User,
};
use crate::notify::{Notifier, NullNotifier};
use crate::workflow::signature::make_credentials;
use crate::workflow::{Context, NoteService, NoteWithValidation, RevisionRequest, SignatureInput};

/// Thread-safe entry point to every engine operation.
pub struct NotesEngine {
    db: Mutex<Database>,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    limiter: RateLimiter,
}

impl NotesEngine {
    pub fn new(
        db: Database,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let limiter = RateLimiter::per_minute(config.rate_limit_per_minute);
        Self {
            db: Mutex::new(db),
            config,
            clock,
            notifier,
            limiter,
        }
    }

    /// Open (or create) an on-disk engine with the system clock.
    pub fn open<P: AsRef<Path>>(path: P, config: EngineConfig) -> NotesResult<Self> {
        Ok(Self::new(
            Database::open(path)?,
            config,
            Arc::new(SystemClock),
            Arc::new(NullNotifier),
        ))
    }

    pub fn open_in_memory(config: EngineConfig) -> NotesResult<Self> {
        Ok(Self::new(
            Database::open_in_memory()?,
            config,
            Arc::new(SystemClock),
            Arc::new(NullNotifier),
        ))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Run `f` with exclusive access to the database.
    fn with<T>(&self, f: impl FnOnce(Context<'_>) -> NotesResult<T>) -> NotesResult<T> {
        // A panic mid-operation already rolled its transaction back on unwind
        let db = self.db.lock().unwrap_or_else(PoisonError::into_inner);
        let ctx = Context::new(&db, &self.config, self.notifier.as_ref(), self.clock.now());
        f(ctx)
    }

    // =========================================================================
    // Practice setup
    // =========================================================================

    pub fn register_user(&self, user: &User) -> NotesResult<()> {
        self.with(|ctx| Ok(ctx.db.insert_user(user)?))
    }

    /// Set (or replace) a user's signing PIN and/or password.
    pub fn set_signature_credentials(
        &self,
        user_id: &str,
        pin: Option<&str>,
        password: Option<&str>,
    ) -> NotesResult<()> {
        if pin.is_none() && password.is_none() {
            return Err(NotesError::validation("A PIN or password is required", Vec::new()));
        }
        let creds = make_credentials(pin, password, self.config.signature_hash_cost)?;
        self.with(|ctx| {
            if !ctx.db.set_credentials(user_id, &creds)? {
                return Err(NotesError::not_found("User"));
            }
            Ok(())
        })
    }

    pub fn set_note_reminders(&self, user_id: &str, enabled: bool) -> NotesResult<()> {
        self.with(|ctx| {
            if !ctx.db.set_note_reminders(user_id, enabled)? {
                return Err(NotesError::not_found("User"));
            }
            Ok(())
        })
    }

    pub fn register_client(&self, client: &Client) -> NotesResult<()> {
        self.with(|ctx| Ok(ctx.db.insert_client(client)?))
    }

    pub fn register_appointment(&self, appointment: &Appointment) -> NotesResult<()> {
        self.with(|ctx| Ok(ctx.db.insert_appointment(appointment)?))
    }

    pub fn set_appointment_status(
        &self,
        appointment_id: &str,
        status: AppointmentStatus,
    ) -> NotesResult<()> {
        self.with(|ctx| {
            if !ctx.db.set_appointment_status(appointment_id, status)? {
                return Err(NotesError::not_found("Appointment"));
            }
            Ok(())
        })
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    pub fn issue_session(&self, user_id: &str, ttl: Duration) -> NotesResult<String> {
        self.with(|ctx| auth::issue_session(ctx.db, user_id, ctx.now, ttl))
    }

    pub fn authenticate(&self, token: Option<&str>) -> NotesResult<Actor> {
        self.with(|ctx| auth::authenticate(ctx.db, token, ctx.now))
    }

    /// Resolve a user ID directly, for trusted in-process callers.
    pub fn actor(&self, user_id: &str) -> NotesResult<Actor> {
        self.with(|ctx| {
            ctx.db
                .get_user(user_id)?
                .map(|u| Actor::from(&u))
                .ok_or_else(|| NotesError::not_found("User"))
        })
    }

    /// Count one request against the caller's rate window.
    pub fn check_rate(&self, actor: &Actor) -> NotesResult<()> {
        self.limiter.check(&actor.user_id, self.clock.now())
    }

    // =========================================================================
    // Note lifecycle
    // =========================================================================

    pub fn create_note(&self, actor: &Actor, input: NewNote) -> NotesResult<NoteWithValidation> {
        self.with(|ctx| NoteService::new(ctx).create(actor, input))
    }

    pub fn view_note(&self, actor: &Actor, note_id: &str) -> NotesResult<ClinicalNote> {
        self.with(|ctx| NoteService::new(ctx).view(actor, note_id))
    }

    pub fn list_notes(&self, actor: &Actor, filter: NoteFilter) -> NotesResult<Vec<ClinicalNote>> {
        self.with(|ctx| NoteService::new(ctx).list(actor, filter))
    }

    pub fn edit_note(
        &self,
        actor: &Actor,
        note_id: &str,
        version: i64,
        patch: NotePatch,
    ) -> NotesResult<NoteWithValidation> {
        self.with(|ctx| NoteService::new(ctx).edit(actor, note_id, version, patch))
    }

    pub fn delete_note(&self, actor: &Actor, note_id: &str, version: i64) -> NotesResult<()> {
        self.with(|ctx| NoteService::new(ctx).delete(actor, note_id, version))
    }

    pub fn sign_note(
        &self,
        actor: &Actor,
        note_id: &str,
        version: i64,
        credential: &SignatureInput,
    ) -> NotesResult<ClinicalNote> {
        self.with(|ctx| NoteService::new(ctx).sign(actor, note_id, version, credential))
    }

    pub fn cosign_note(
        &self,
        actor: &Actor,
        note_id: &str,
        version: i64,
        credential: &SignatureInput,
        comments: Option<String>,
    ) -> NotesResult<ClinicalNote> {
        self.with(|ctx| NoteService::new(ctx).cosign(actor, note_id, version, credential, comments))
    }

    pub fn return_for_revision(
        &self,
        actor: &Actor,
        note_id: &str,
        version: i64,
        request: RevisionRequest,
    ) -> NotesResult<ClinicalNote> {
        self.with(|ctx| NoteService::new(ctx).return_for_revision(actor, note_id, version, request))
    }

    pub fn resubmit_note(&self, actor: &Actor, note_id: &str, version: i64) -> NotesResult<ClinicalNote> {
        self.with(|ctx| NoteService::new(ctx).resubmit(actor, note_id, version))
    }

    pub fn amend_note(
        &self,
        actor: &Actor,
        note_id: &str,
        version: i64,
        reason: &str,
        change_description: &str,
    ) -> NotesResult<ClinicalNote> {
        self.with(|ctx| {
            NoteService::new(ctx).amend(actor, note_id, version, reason, change_description)
        })
    }

    // =========================================================================
    // Locking
    // =========================================================================

    pub fn lock_note(
        &self,
        actor: &Actor,
        note_id: &str,
        version: i64,
        reason: Option<String>,
    ) -> NotesResult<ClinicalNote> {
        self.with(|ctx| LockScheduler::new(ctx).lock_note(actor, note_id, version, reason))
    }

    pub fn run_lock_sweep(&self) -> NotesResult<SweepReport> {
        self.with(|ctx| LockScheduler::new(ctx).sweep())
    }

    /// Run the sweep on behalf of a caller. Administrators only.
    pub fn run_lock_sweep_as(&self, actor: &Actor) -> NotesResult<SweepReport> {
        self.with(|ctx| {
            require_admin(ctx, actor, "run lock sweep")?;
            LockScheduler::new(ctx).sweep()
        })
    }

    pub fn next_lockout(&self) -> NotesResult<DateTime<Utc>> {
        self.with(|ctx| Ok(LockScheduler::new(ctx).next_lockout()))
    }

    pub fn request_unlock(
        &self,
        actor: &Actor,
        note_id: &str,
        version: i64,
        reason: &str,
    ) -> NotesResult<ClinicalNote> {
        self.with(|ctx| UnlockService::new(ctx).request(actor, note_id, version, reason))
    }

    pub fn decide_unlock(
        &self,
        actor: &Actor,
        note_id: &str,
        version: i64,
        response: UnlockResponse,
    ) -> NotesResult<ClinicalNote> {
        self.with(|ctx| UnlockService::new(ctx).decide(actor, note_id, version, response))
    }

    // =========================================================================
    // Audit and compliance
    // =========================================================================

    pub fn query_audit(&self, actor: &Actor, query: AuditQuery) -> NotesResult<Vec<AuditEntry>> {
        self.with(|ctx| AuditAccess::new(ctx).query(actor, query))
    }

    pub fn export_audit_csv(&self, actor: &Actor, query: AuditQuery) -> NotesResult<String> {
        self.with(|ctx| AuditAccess::new(ctx).export_csv(actor, query))
    }

    pub fn modify_audit_entry(&self, actor: &Actor, entry_id: &str) -> NotesResult<()> {
        self.with(|ctx| AuditAccess::new(ctx).modify_entry(actor, entry_id))
    }

    pub fn delete_audit_entry(&self, actor: &Actor, entry_id: &str) -> NotesResult<()> {
        self.with(|ctx| AuditAccess::new(ctx).delete_entry(actor, entry_id))
    }

    pub fn verify_audit_chain(&self, actor: &Actor) -> NotesResult<ChainVerification> {
        self.with(|ctx| AuditAccess::new(ctx).verify_chain(actor))
    }

    pub fn compliance_dashboard(&self, actor: &Actor) -> NotesResult<ComplianceDashboard> {
        self.with(|ctx| ComplianceAggregator::new(ctx).dashboard(actor))
    }

    pub fn run_reminders(&self) -> NotesResult<ReminderReport> {
        self.with(send_due_reminders)
    }

    /// Send due reminders on behalf of a caller. Administrators only.
    pub fn run_reminders_as(&self, actor: &Actor) -> NotesResult<ReminderReport> {
        self.with(|ctx| {
            require_admin(ctx, actor, "send note reminders")?;
            send_due_reminders(ctx)
        })
    }
}

/// Reject non-administrators, recording the attempt.
fn require_admin(ctx: Context<'_>, actor: &Actor, attempted: &str) -> NotesResult<()> {
    ctx.guarded(actor, None, attempted, |_| {
        if actor.is_admin() {
            Ok(())
        } else {
            Err(NotesError::forbidden(format!(
                "You are not authorized to {attempted}"
            )))
        }
    })
}
