//! Central authorization policy.
//!
//! Every guarded operation asks [`authorize`] once, with the caller, the
//! action and the note's ownership facts. Administrators bypass ownership;
//! supervisors act on their supervisees' notes; everyone acts on their own.

use crate::models::Actor;

/// Operation being attempted on a note.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    View,
    Edit,
    Delete,
    Sign,
    Resubmit,
    Amend,
    RequestUnlock,
    Cosign,
    ReturnForRevision,
    DecideUnlock,
    Lock,
    ViewAudit,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::View => "view",
            Action::Edit => "edit",
            Action::Delete => "delete",
            Action::Sign => "sign",
            Action::Resubmit => "resubmit",
            Action::Amend => "amend",
            Action::RequestUnlock => "request unlock for",
            Action::Cosign => "cosign",
            Action::ReturnForRevision => "return",
            Action::DecideUnlock => "decide unlock for",
            Action::Lock => "lock",
            Action::ViewAudit => "view the audit trail of",
        }
    }

    fn owner_only(&self) -> bool {
        matches!(
            self,
            Action::Edit
                | Action::Delete
                | Action::Sign
                | Action::Resubmit
                | Action::Amend
                | Action::RequestUnlock
        )
    }

    fn supervisor_only(&self) -> bool {
        matches!(
            self,
            Action::Cosign | Action::ReturnForRevision | Action::DecideUnlock | Action::Lock
        )
    }
}

/// Ownership facts about the note being acted on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub owner_id: String,
    /// The owner's assigned supervisor
    pub owner_supervisor_id: Option<String>,
}

impl Resource {
    fn is_owned_by(&self, actor: &Actor) -> bool {
        self.owner_id == actor.user_id
    }

    fn is_supervised_by(&self, actor: &Actor) -> bool {
        self.owner_supervisor_id.as_deref() == Some(actor.user_id.as_str())
    }
}

/// Allow or deny `action`. The error carries the caller-facing reason.
pub fn authorize(actor: &Actor, action: Action, resource: &Resource) -> Result<(), String> {
    if actor.is_admin() {
        return Ok(());
    }

    let owner = resource.is_owned_by(actor);
    let supervisor = resource.is_supervised_by(actor);

    if action.owner_only() {
        return if owner {
            Ok(())
        } else {
            Err(format!("You are not authorized to {} this note", action.as_str()))
        };
    }

    if action.supervisor_only() {
        return if supervisor {
            Ok(())
        } else if owner {
            Err(format!(
                "You are not authorized to {} your own note; it requires your supervisor",
                action.as_str()
            ))
        } else {
            Err(format!(
                "You are not authorized to {} this note: the author is not your supervisee",
                action.as_str()
            ))
        };
    }

    // View and ViewAudit
    if owner || supervisor {
        Ok(())
    } else {
        Err(format!("You are not authorized to {} this note", action.as_str()))
    }
}
