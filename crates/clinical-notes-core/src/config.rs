//! Engine configuration.
//!
//! Defaults mirror the practice's documentation policy: notes are due three
//! days after the session, signed notes lock at Sunday midnight, and unlock
//! requests are only accepted for sessions in the last thirty days.

use std::path::Path;

use anyhow::Context;
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Tunable compliance and workflow parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Days after the session before a note is due
    pub note_due_days: i64,
    /// Days since session after which an incomplete item is urgent
    pub urgent_after_days: i64,
    /// Maximum age (days since session) for an unlock request
    pub unlock_max_age_days: i64,
    /// Unlock window granted when the approver gives no duration
    pub default_unlock_hours: u32,
    /// Upper bound on any unlock window
    pub max_unlock_hours: u32,
    /// Offset from UTC, in minutes, of the practice's Sunday midnight
    pub lockout_utc_offset_minutes: i32,
    /// Also lock unsigned notes that are past due at the weekly boundary
    pub lock_overdue_unsigned: bool,
    /// Treatment plans older than this many days need an update
    pub treatment_plan_review_days: i64,
    /// Send reminders this many days before the due date
    pub reminder_days: Vec<i64>,
    /// Requests per user per minute accepted by the API surface
    pub rate_limit_per_minute: u32,
    /// Minimum length of return-for-revision comments
    pub min_revision_comment_len: usize,
    /// bcrypt work factor for signing PINs and passwords
    pub signature_hash_cost: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            note_due_days: 3,
            urgent_after_days: 7,
            unlock_max_age_days: 30,
            default_unlock_hours: 24,
            max_unlock_hours: 168,
            lockout_utc_offset_minutes: 0,
            lock_overdue_unsigned: false,
            treatment_plan_review_days: 90,
            reminder_days: vec![2, 1, 0],
            rate_limit_per_minute: 600,
            min_revision_comment_len: 10,
            signature_hash_cost: bcrypt::DEFAULT_COST,
        }
    }
}

impl EngineConfig {
    /// Parse configuration from TOML text. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.note_due_days < 0 {
            return Err(ConfigError::Invalid("note_due_days must not be negative".into()));
        }
        if self.unlock_max_age_days <= 0 {
            return Err(ConfigError::Invalid("unlock_max_age_days must be positive".into()));
        }
        if self.default_unlock_hours == 0 || self.default_unlock_hours > self.max_unlock_hours {
            return Err(ConfigError::Invalid(format!(
                "default_unlock_hours must be between 1 and max_unlock_hours ({})",
                self.max_unlock_hours
            )));
        }
        if self.lockout_offset().is_none() {
            return Err(ConfigError::Invalid(format!(
                "lockout_utc_offset_minutes out of range: {}",
                self.lockout_utc_offset_minutes
            )));
        }
        if !(4..=31).contains(&self.signature_hash_cost) {
            return Err(ConfigError::Invalid(format!(
                "signature_hash_cost must be between 4 and 31, got {}",
                self.signature_hash_cost
            )));
        }
        if self.rate_limit_per_minute == 0 {
            return Err(ConfigError::Invalid("rate_limit_per_minute must be positive".into()));
        }
        Ok(())
    }

    /// Fixed offset in which the weekly lockout boundary is evaluated.
    pub fn lockout_offset(&self) -> Option<FixedOffset> {
        FixedOffset::east_opt(self.lockout_utc_offset_minutes.checked_mul(60)?)
    }
}
