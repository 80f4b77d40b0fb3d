//! Outbound notifications.
//!
//! Delivery (email, SMS, push) lives outside the engine; the engine only
//! hands finished messages to a [`Notifier`].

use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

/// What a notification is about.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    UnlockRequested,
    UnlockApproved,
    UnlockDenied,
    CosignRequested,
    ReturnedForRevision,
    DueReminder,
}

/// A message addressed to one user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub kind: NotificationKind,
    pub recipient_id: String,
    pub note_id: String,
    pub subject: String,
    pub body: String,
}

/// Sink for outbound notifications. Failures are the sink's concern.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Drops everything.
#[derive(Debug, Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, notification: Notification) {
        tracing::debug!(
            kind = ?notification.kind,
            recipient = %notification.recipient_id,
            "Notification discarded"
        );
    }
}

/// Keeps every notification in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn sent_to(&self, recipient_id: &str) -> Vec<Notification> {
        self.sent()
            .into_iter()
            .filter(|n| n.recipient_id == recipient_id)
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification);
    }
}
