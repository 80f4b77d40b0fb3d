//! Clinical Notes Core Library
//!
//! Lifecycle, locking, audit and compliance engine for behavioral-health
//! clinical documentation.
//!
//! # Architecture
//!
//! ```text
//!   create ──► DRAFT ──sign──► SIGNED
//!                │   └─sign (supervised)─► PENDING_COSIGN ──cosign──► COSIGNED
//!                │                              │
//!                │                    return-for-revision
//!                │                              ▼
//!                └──────────────────── RETURNED_FOR_REVISION ──resubmit──┘
//!
//!   Sunday 00:00 sweep ──► signed notes locked ──► unlock request ──► supervisor decision
//!                                                                        │
//!                                                         time-boxed edit window, relock
//!
//!   every mutation, view and denial ──► hash-chained audit log
//! ```
//!
//! # Modules
//!
//! - [`models`]: Domain types (ClinicalNote, User, Appointment, AuditEntry)
//! - [`db`]: SQLite storage with optimistic versioning
//! - [`validation`]: Per-note-type rule tables, code formats, instrument ranges
//! - [`workflow`]: Authorization policy, signatures, the note state machine
//! - [`lock`]: Weekly lock sweep and the unlock request workflow
//! - [`audit`]: Append-only, hash-chained audit log with CSV export
//! - [`compliance`]: Dashboard aggregation and due-date reminders
//! - [`api`]: JSON request surface with sessions and rate limiting
//! - [`engine`]: Thread-safe entry point tying the above together

pub mod api;
pub mod audit;
pub mod clock;
pub mod compliance;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod lock;
pub mod models;
pub mod notify;
pub mod validation;
pub mod workflow;

// Re-export commonly used types
pub use api::{dispatch, ApiRequest, ApiResponse};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::EngineConfig;
pub use db::Database;
pub use engine::NotesEngine;
pub use error::{NotesError, NotesResult};
pub use models::{
    Actor, Appointment, AuditAction, AuditEntry, Client, ClinicalNote, NewNote, NoteStatus,
    NoteType, Role, User,
};
pub use notify::{Notification, NotificationKind, Notifier, NullNotifier, RecordingNotifier};

// UniFFI setup - using proc macros
uniffi::setup_scaffolding!();

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

// =========================================================================
// FFI Error Type
// =========================================================================

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum ClinicalNotesError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not permitted: {0}")]
    NotPermitted(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<NotesError> for ClinicalNotesError {
    fn from(e: NotesError) -> Self {
        let message = e.public_message();
        match e.status_code() {
            400 | 422 => ClinicalNotesError::InvalidInput(message),
            401 | 403 | 429 => ClinicalNotesError::NotPermitted(message),
            404 => ClinicalNotesError::NotFound(message),
            409 => ClinicalNotesError::Conflict(message),
            _ => ClinicalNotesError::Internal(message),
        }
    }
}

impl From<db::DbError> for ClinicalNotesError {
    fn from(e: db::DbError) -> Self {
        NotesError::from(e).into()
    }
}

impl From<config::ConfigError> for ClinicalNotesError {
    fn from(e: config::ConfigError) -> Self {
        ClinicalNotesError::ConfigError(e.to_string())
    }
}

impl From<serde_json::Error> for ClinicalNotesError {
    fn from(e: serde_json::Error) -> Self {
        ClinicalNotesError::InvalidInput(e.to_string())
    }
}

// =========================================================================
// Factory Functions (exported to FFI)
// =========================================================================

/// Open or create an engine backed by the database at `path`.
///
/// `config_toml` overrides the default policy; missing keys keep defaults.
#[uniffi::export]
pub fn open_engine(
    path: String,
    config_toml: Option<String>,
) -> Result<Arc<ClinicalNotesCore>, ClinicalNotesError> {
    let config = match config_toml {
        Some(text) => EngineConfig::from_toml_str(&text)?,
        None => EngineConfig::default(),
    };
    let engine = NotesEngine::open(&path, config)?;
    Ok(Arc::new(ClinicalNotesCore {
        engine: Arc::new(engine),
    }))
}

/// Create an in-memory engine with default configuration (for testing).
#[uniffi::export]
pub fn open_engine_in_memory() -> Result<Arc<ClinicalNotesCore>, ClinicalNotesError> {
    let engine = NotesEngine::open_in_memory(EngineConfig::default())?;
    Ok(Arc::new(ClinicalNotesCore {
        engine: Arc::new(engine),
    }))
}

// =========================================================================
// Main API Object
// =========================================================================

/// Thread-safe engine wrapper for FFI.
#[derive(uniffi::Object)]
pub struct ClinicalNotesCore {
    engine: Arc<NotesEngine>,
}

#[uniffi::export]
impl ClinicalNotesCore {
    // =========================================================================
    // Request Surface
    // =========================================================================

    /// Handle one JSON API request.
    pub fn handle_request(&self, request: FfiRequest) -> Result<FfiResponse, ClinicalNotesError> {
        let body: Option<serde_json::Value> = request
            .body_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        let response = dispatch(
            &self.engine,
            ApiRequest {
                method: request.method,
                path: request.path,
                bearer_token: request.bearer_token,
                query: request.query,
                body,
            },
        );
        Ok(response.into())
    }

    /// Issue a session token for `user_id`, valid for `ttl_minutes`.
    pub fn issue_session(&self, user_id: String, ttl_minutes: u32) -> Result<String, ClinicalNotesError> {
        Ok(self
            .engine
            .issue_session(&user_id, Duration::minutes(i64::from(ttl_minutes)))?)
    }

    // =========================================================================
    // Practice Setup
    // =========================================================================

    /// Register a staff member. Returns the new user ID.
    pub fn register_user(&self, user: FfiUser) -> Result<String, ClinicalNotesError> {
        let user = User::try_from(user)?;
        self.engine.register_user(&user)?;
        Ok(user.id)
    }

    /// Set a user's signing PIN and/or password.
    pub fn set_credentials(
        &self,
        user_id: String,
        pin: Option<String>,
        password: Option<String>,
    ) -> Result<(), ClinicalNotesError> {
        Ok(self
            .engine
            .set_signature_credentials(&user_id, pin.as_deref(), password.as_deref())?)
    }

    /// Register a client. Returns the new client ID.
    pub fn register_client(
        &self,
        first_name: String,
        last_name: String,
    ) -> Result<String, ClinicalNotesError> {
        let client = Client::new(first_name, last_name);
        self.engine.register_client(&client)?;
        Ok(client.id)
    }

    /// Register an appointment. `appointment_date` is RFC 3339.
    pub fn register_appointment(
        &self,
        client_id: String,
        clinician_id: String,
        appointment_date: String,
    ) -> Result<String, ClinicalNotesError> {
        let date = DateTime::parse_from_rfc3339(&appointment_date)
            .map_err(|e| ClinicalNotesError::InvalidInput(format!("appointment_date: {e}")))?
            .with_timezone(&Utc);
        let appointment = Appointment::new(client_id, clinician_id, date);
        self.engine.register_appointment(&appointment)?;
        Ok(appointment.id)
    }

    // =========================================================================
    // Scheduled Jobs
    // =========================================================================

    /// Run the weekly lock sweep now.
    pub fn run_lock_sweep(&self) -> Result<FfiSweepReport, ClinicalNotesError> {
        Ok(self.engine.run_lock_sweep()?.into())
    }

    /// Send due-date reminders. Returns the number sent.
    pub fn run_reminders(&self) -> Result<u32, ClinicalNotesError> {
        Ok(self.engine.run_reminders()?.sent as u32)
    }

    /// Next weekly lockout as RFC 3339.
    pub fn next_lockout(&self) -> Result<String, ClinicalNotesError> {
        Ok(self.engine.next_lockout()?.to_rfc3339())
    }
}

// =========================================================================
// FFI Types
// =========================================================================

/// FFI-safe API request. `body_json` is the raw JSON body.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiRequest {
    pub method: String,
    pub path: String,
    pub bearer_token: Option<String>,
    pub query: HashMap<String, String>,
    pub body_json: Option<String>,
}

/// FFI-safe API response.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl From<ApiResponse> for FfiResponse {
    fn from(response: ApiResponse) -> Self {
        Self {
            status: response.status,
            headers: response.headers.into_iter().collect(),
            body: response.body,
        }
    }
}

/// FFI-safe user registration.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiUser {
    pub name: String,
    pub email: String,
    /// ADMIN, SUPERVISOR or CLINICIAN
    pub roles: Vec<String>,
    pub supervisor_id: Option<String>,
}

impl TryFrom<FfiUser> for User {
    type Error = ClinicalNotesError;

    fn try_from(user: FfiUser) -> Result<Self, Self::Error> {
        let roles = user
            .roles
            .iter()
            .map(|r| {
                Role::parse(r).ok_or_else(|| ClinicalNotesError::InvalidInput(format!("Unknown role '{r}'")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let new_user = User::new(user.name, user.email, roles);
        Ok(match user.supervisor_id.as_deref() {
            Some(supervisor) => new_user.supervised_by(supervisor),
            None => new_user,
        })
    }
}

/// FFI-safe sweep outcome.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiSweepReport {
    pub locked: Vec<String>,
    pub relocked: Vec<String>,
    pub locked_overdue: Vec<String>,
    pub conflicts: u32,
}

impl From<lock::SweepReport> for FfiSweepReport {
    fn from(report: lock::SweepReport) -> Self {
        Self {
            locked: report.locked,
            relocked: report.relocked,
            locked_overdue: report.locked_overdue,
            conflicts: report.conflicts as u32,
        }
    }
}
