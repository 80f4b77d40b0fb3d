//! SQLite schema definition.

/// Complete database schema for the clinical notes engine.
pub const SCHEMA: &str = r#"
-- Enable foreign keys
PRAGMA foreign_keys = ON;

-- ============================================================================
-- Users and Sessions
-- ============================================================================

CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    email TEXT NOT NULL,
    roles TEXT NOT NULL DEFAULT '[]',            -- JSON array of role names
    supervisor_id TEXT REFERENCES users(id),
    is_under_supervision INTEGER NOT NULL DEFAULT 0,
    note_reminders INTEGER NOT NULL DEFAULT 1,
    signature_pin_hash TEXT,                     -- bcrypt, salt embedded
    password_hash TEXT,                          -- bcrypt, salt embedded
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_users_supervisor ON users(supervisor_id);

CREATE TABLE IF NOT EXISTS sessions (
    token_hash TEXT PRIMARY KEY,                 -- sha256 of the bearer token
    user_id TEXT NOT NULL REFERENCES users(id),
    expires_at TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);

-- ============================================================================
-- Clients and Appointments
-- ============================================================================

CREATE TABLE IF NOT EXISTS clients (
    id TEXT PRIMARY KEY,
    first_name TEXT NOT NULL,
    last_name TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS appointments (
    id TEXT PRIMARY KEY,
    client_id TEXT NOT NULL REFERENCES clients(id),
    clinician_id TEXT NOT NULL REFERENCES users(id),
    appointment_date TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'SCHEDULED'
        CHECK (status IN ('SCHEDULED', 'COMPLETED', 'CANCELLED', 'NO_SHOW'))
);

CREATE INDEX IF NOT EXISTS idx_appointments_clinician ON appointments(clinician_id, status);

-- ============================================================================
-- Clinical Notes (version-guarded)
-- ============================================================================

CREATE TABLE IF NOT EXISTS clinical_notes (
    id TEXT PRIMARY KEY,
    client_id TEXT NOT NULL REFERENCES clients(id),
    appointment_id TEXT REFERENCES appointments(id),
    clinician_id TEXT NOT NULL REFERENCES users(id),
    note_type TEXT NOT NULL,
    session_date TEXT NOT NULL,
    due_date TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'DRAFT'
        CHECK (status IN ('DRAFT', 'SIGNED', 'PENDING_COSIGN', 'COSIGNED', 'RETURNED_FOR_REVISION')),

    is_locked INTEGER NOT NULL DEFAULT 0,
    locked_at TEXT,
    lock_reason TEXT,

    unlock_requested INTEGER NOT NULL DEFAULT 0,
    unlock_reason TEXT,
    unlock_requested_at TEXT,
    unlock_approved_by TEXT,
    unlock_approval_date TEXT,
    unlock_decision TEXT,
    unlock_decision_reason TEXT,
    unlock_duration_hours INTEGER,
    unlock_until TEXT,

    requires_cosign INTEGER NOT NULL DEFAULT 0,
    signed_by TEXT,
    signed_date TEXT,
    days_to_complete INTEGER,
    completed_on_time INTEGER,
    cosigned_by TEXT,
    cosigned_date TEXT,
    supervisor_comments TEXT,

    revision_count INTEGER NOT NULL DEFAULT 0,
    revision_history TEXT NOT NULL DEFAULT '[]', -- JSON array of RevisionEntry
    amendments TEXT NOT NULL DEFAULT '[]',       -- JSON array of Amendment
    version INTEGER NOT NULL DEFAULT 1,

    diagnosis_codes TEXT NOT NULL DEFAULT '[]',
    cpt_codes TEXT NOT NULL DEFAULT '[]',
    content TEXT NOT NULL DEFAULT '{}',          -- JSON object of type-specific fields
    outcome_measures TEXT NOT NULL DEFAULT '[]',

    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- One note per appointment
CREATE UNIQUE INDEX IF NOT EXISTS idx_notes_appointment
    ON clinical_notes(appointment_id) WHERE appointment_id IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_notes_clinician ON clinical_notes(clinician_id, status);
CREATE INDEX IF NOT EXISTS idx_notes_client ON clinical_notes(client_id, note_type);
CREATE INDEX IF NOT EXISTS idx_notes_lock ON clinical_notes(is_locked, status);

-- Every update must advance the version by exactly one
CREATE TRIGGER IF NOT EXISTS clinical_notes_version_step BEFORE UPDATE ON clinical_notes
WHEN new.version <> old.version + 1
BEGIN
    SELECT RAISE(ABORT, 'Note version must advance by one');
END;

-- Amendments are append-only
CREATE TRIGGER IF NOT EXISTS clinical_notes_amendments_append BEFORE UPDATE ON clinical_notes
WHEN json_array_length(new.amendments) < json_array_length(old.amendments)
BEGIN
    SELECT RAISE(ABORT, 'Amendments are append-only');
END;

CREATE TRIGGER IF NOT EXISTS clinical_notes_delete_guard BEFORE DELETE ON clinical_notes
BEGIN
    SELECT CASE
        WHEN old.status <> 'DRAFT' THEN
            RAISE(ABORT, 'Only draft notes can be deleted')
        WHEN json_array_length(old.amendments) > 0 THEN
            RAISE(ABORT, 'Notes with amendments cannot be deleted')
    END;
END;

-- ============================================================================
-- Reminder bookkeeping
-- ============================================================================

CREATE TABLE IF NOT EXISTS note_reminders_sent (
    note_id TEXT NOT NULL,
    days_before INTEGER NOT NULL,
    sent_at TEXT NOT NULL,
    PRIMARY KEY (note_id, days_before)
);

-- ============================================================================
-- Audit Log (Append-Only - Immutable after creation)
-- ============================================================================

CREATE TABLE IF NOT EXISTS audit_log (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    action TEXT NOT NULL CHECK (action IN (
        'VIEW', 'CREATE', 'EDIT', 'DELETE', 'SIGN', 'COSIGN', 'STATUS_CHANGE',
        'AMENDMENT', 'LOCK', 'UNLOCK_REQUEST', 'UNLOCK_APPROVED', 'UNLOCK_REJECTED',
        'EXPORT', 'FAILED_AUTHORIZATION'
    )),
    user_id TEXT NOT NULL,
    note_id TEXT,                                -- no FK: entries outlive deleted drafts
    timestamp TEXT NOT NULL,
    reason TEXT,
    previous_status TEXT,
    new_status TEXT,
    before_state TEXT,                           -- JSON
    after_state TEXT,                            -- JSON
    changed_fields TEXT NOT NULL DEFAULT '[]',   -- JSON array
    details TEXT,                                -- JSON
    prev_hash TEXT NOT NULL,
    entry_hash TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_audit_note ON audit_log(note_id, timestamp);
CREATE INDEX IF NOT EXISTS idx_audit_user ON audit_log(user_id, timestamp);
CREATE INDEX IF NOT EXISTS idx_audit_action ON audit_log(action);

CREATE TRIGGER IF NOT EXISTS audit_log_no_update BEFORE UPDATE ON audit_log
BEGIN
    SELECT RAISE(ABORT, 'Audit log entries are immutable');
END;

CREATE TRIGGER IF NOT EXISTS audit_log_no_delete BEFORE DELETE ON audit_log
BEGIN
    SELECT RAISE(ABORT, 'Audit log entries are immutable');
END;
"#;
