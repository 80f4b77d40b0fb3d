//! Users, roles and the authenticated actor.

use serde::{Deserialize, Serialize};

/// Access role. A user may hold several.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    #[serde(alias = "ADMINISTRATOR")]
    Admin,
    Supervisor,
    Clinician,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::Supervisor => "SUPERVISOR",
            Role::Clinician => "CLINICIAN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ADMIN" | "ADMINISTRATOR" => Some(Role::Admin),
            "SUPERVISOR" => Some(Role::Supervisor),
            "CLINICIAN" => Some(Role::Clinician),
            _ => None,
        }
    }
}

/// A staff member of the practice.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Unique user ID
    pub id: String,
    /// Display name
    pub name: String,
    /// Contact email for notifications
    pub email: String,
    /// Granted roles
    pub roles: Vec<Role>,
    /// Assigned clinical supervisor, if any
    pub supervisor_id: Option<String>,
    /// Signed notes from this user require a cosignature
    pub is_under_supervision: bool,
    /// Whether due-date reminders are sent to this user
    pub note_reminders: bool,
    /// Creation timestamp
    pub created_at: String,
}

impl User {
    /// Create a new user with the given roles.
    pub fn new(name: String, email: String, roles: Vec<Role>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            email,
            roles,
            supervisor_id: None,
            is_under_supervision: false,
            note_reminders: true,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Place this user under a supervisor.
    pub fn supervised_by(mut self, supervisor_id: &str) -> Self {
        self.supervisor_id = Some(supervisor_id.to_string());
        self.is_under_supervision = true;
        self
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

/// The authenticated caller of an operation.
///
/// Always resolved server-side from a user record; roles supplied by a client
/// are never trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: String,
    pub roles: Vec<Role>,
}

impl Actor {
    pub fn is_admin(&self) -> bool {
        self.roles.contains(&Role::Admin)
    }

    pub fn is_supervisor(&self) -> bool {
        self.roles.contains(&Role::Supervisor)
    }
}

impl From<&User> for Actor {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id.clone(),
            roles: user.roles.clone(),
        }
    }
}
