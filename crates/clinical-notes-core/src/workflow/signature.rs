//! Signing credentials (PIN or password), stored as bcrypt hashes.

use serde::{Deserialize, Serialize};

use crate::db::StoredCredentials;

/// Credential presented when signing or cosigning.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SignatureInput {
    #[serde(default)]
    pub pin: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl SignatureInput {
    pub fn pin(pin: &str) -> Self {
        Self {
            pin: Some(pin.to_string()),
            password: None,
        }
    }

    pub fn password(password: &str) -> Self {
        Self {
            pin: None,
            password: Some(password.to_string()),
        }
    }

    fn is_empty(&self) -> bool {
        self.pin.as_deref().map_or(true, str::is_empty)
            && self.password.as_deref().map_or(true, str::is_empty)
    }
}

/// Hash fresh credentials with bcrypt at work factor `cost`.
pub fn make_credentials(
    pin: Option<&str>,
    password: Option<&str>,
    cost: u32,
) -> Result<StoredCredentials, bcrypt::BcryptError> {
    Ok(StoredCredentials {
        pin_hash: pin.map(|p| bcrypt::hash(p, cost)).transpose()?,
        password_hash: password.map(|p| bcrypt::hash(p, cost)).transpose()?,
    })
}

/// Whether `input` matches the stored credentials. A PIN is tried first.
pub fn verify(stored: &StoredCredentials, input: &SignatureInput) -> bool {
    if input.is_empty() {
        return false;
    }
    let matches = |secret: &Option<String>, hash: &Option<String>| match (secret, hash) {
        (Some(secret), Some(hash)) if !secret.is_empty() => {
            bcrypt::verify(secret, hash).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Stored signature hash is unreadable");
                false
            })
        }
        _ => false,
    };
    matches(&input.pin, &stored.pin_hash) || matches(&input.password, &stored.password_hash)
}
