//! Note status graph.
//!
//! ```text
//! DRAFT --sign--> SIGNED                 (unsupervised signer)
//! DRAFT --sign--> PENDING_COSIGN         (supervised signer)
//! PENDING_COSIGN --cosign--> COSIGNED
//! PENDING_COSIGN --return--> RETURNED_FOR_REVISION
//! RETURNED_FOR_REVISION --resubmit--> PENDING_COSIGN
//! ```
//!
//! Anything else is rejected. Locking is not a status.

use crate::models::NoteStatus;

/// Status-changing events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Sign { supervised: bool },
    Cosign,
    Return,
    Resubmit,
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Sign { .. } => "sign",
            Event::Cosign => "cosign",
            Event::Return => "return",
            Event::Resubmit => "resubmit",
        }
    }
}

/// Target status of `event` from `status`, if the edge exists.
pub fn next_status(status: NoteStatus, event: Event) -> Option<NoteStatus> {
    match (status, event) {
        (NoteStatus::Draft, Event::Sign { supervised: false }) => Some(NoteStatus::Signed),
        (NoteStatus::Draft, Event::Sign { supervised: true }) => Some(NoteStatus::PendingCosign),
        (NoteStatus::PendingCosign, Event::Cosign) => Some(NoteStatus::Cosigned),
        (NoteStatus::PendingCosign, Event::Return) => Some(NoteStatus::ReturnedForRevision),
        (NoteStatus::ReturnedForRevision, Event::Resubmit) => Some(NoteStatus::PendingCosign),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edges() {
        assert_eq!(
            next_status(NoteStatus::Draft, Event::Sign { supervised: true }),
            Some(NoteStatus::PendingCosign)
        );
        assert_eq!(
            next_status(NoteStatus::ReturnedForRevision, Event::Resubmit),
            Some(NoteStatus::PendingCosign)
        );
        assert_eq!(next_status(NoteStatus::Signed, Event::Cosign), None);
        assert_eq!(next_status(NoteStatus::Cosigned, Event::Return), None);
        assert_eq!(next_status(NoteStatus::Draft, Event::Resubmit), None);
    }
}
