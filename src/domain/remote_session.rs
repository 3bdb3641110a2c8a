use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    PendingApproval,
    Active,
    EndedSuccessfully,
    EndedByAdmin,
    EndedByClient,
    Rejected,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionStatus::PendingApproval | SessionStatus::Active)
    }

    fn allowed(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        match self {
            PendingApproval => matches!(next, Active | Rejected | Failed),
            Active => matches!(
                next,
                EndedSuccessfully | EndedByAdmin | EndedByClient | Failed
            ),
            _ => false,
        }
    }
}

/// A stateful agreement between one operator and one client PC. Enforces the
/// transition matrix in its own right — the service layer never mutates
/// `status` directly, only through [`RemoteSession::transition`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSession {
    pub session_id: Uuid,
    pub admin_user_id: Uuid,
    pub client_pc_id: Uuid,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub session_video_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RemoteSession {
    pub fn new(admin_user_id: Uuid, client_pc_id: Uuid) -> Self {
        let now = Utc::now();
        RemoteSession {
            session_id: Uuid::new_v4(),
            admin_user_id,
            client_pc_id,
            start_time: None,
            end_time: None,
            status: SessionStatus::PendingApproval,
            session_video_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies a status transition, rejecting anything not in the matrix and
    /// refusing to mutate a terminal session. Sets `start_time`/`end_time`
    /// exactly as the invariants require.
    pub fn transition(&mut self, next: SessionStatus) -> Result<(), DomainError> {
        if self.status.is_terminal() {
            return Err(DomainError::InvalidState(format!(
                "session {} is already terminal ({:?})",
                self.session_id, self.status
            )));
        }
        if !self.status.allowed(next) {
            return Err(DomainError::InvalidState(format!(
                "session {} cannot go from {:?} to {:?}",
                self.session_id, self.status, next
            )));
        }

        let now = Utc::now();
        if self.status == SessionStatus::PendingApproval && next == SessionStatus::Active {
            self.start_time = Some(now);
        }
        if self.status == SessionStatus::Active && next.is_terminal() {
            self.end_time = Some(now);
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> RemoteSession {
        RemoteSession::new(Uuid::new_v4(), Uuid::new_v4())
    }

    #[test]
    fn starts_pending_approval_with_no_timestamps() {
        let s = session();
        assert_eq!(s.status, SessionStatus::PendingApproval);
        assert!(s.start_time.is_none());
        assert!(s.end_time.is_none());
    }

    #[test]
    fn accept_sets_start_time() {
        let mut s = session();
        s.transition(SessionStatus::Active).unwrap();
        assert_eq!(s.status, SessionStatus::Active);
        assert!(s.start_time.is_some());
        assert!(s.end_time.is_none());
    }

    #[test]
    fn end_from_active_sets_end_time() {
        let mut s = session();
        s.transition(SessionStatus::Active).unwrap();
        s.transition(SessionStatus::EndedByAdmin).unwrap();
        assert!(s.end_time.is_some());
    }

    #[test]
    fn terminal_states_are_absorbing() {
        let mut s = session();
        s.transition(SessionStatus::Rejected).unwrap();
        assert!(s.transition(SessionStatus::Active).is_err());
    }

    #[test]
    fn reject_only_valid_from_pending_approval() {
        let mut s = session();
        s.transition(SessionStatus::Active).unwrap();
        assert!(s.transition(SessionStatus::Rejected).is_err());
    }

    #[test]
    fn pending_cannot_jump_straight_to_ended_by_client() {
        let mut s = session();
        assert!(s.transition(SessionStatus::EndedByClient).is_err());
    }
}
