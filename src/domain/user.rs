use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Administrator,
    ClientUser,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Administrator => "ADMINISTRATOR",
            Role::ClientUser => "CLIENT_USER",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ADMINISTRATOR" => Some(Role::Administrator),
            "CLIENT_USER" => Some(Role::ClientUser),
            _ => None,
        }
    }
}

/// A user account. Identity is immutable once created; only activation and
/// password may change. Accounts are created out-of-band (no signup flow
/// lives in this crate).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: Uuid,
    pub username: String,
    pub role: Role,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What callers outside the auth service get back after a successful login;
/// never carries the password hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSnapshot {
    pub user_id: Uuid,
    pub username: String,
    pub role: Role,
}

impl From<&User> for UserSnapshot {
    fn from(u: &User) -> Self {
        UserSnapshot {
            user_id: u.user_id,
            username: u.username.clone(),
            role: u.role,
        }
    }
}
