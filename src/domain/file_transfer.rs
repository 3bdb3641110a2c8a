use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TransferStatus {
    fn allowed(self, next: TransferStatus) -> bool {
        use TransferStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress) | (InProgress, Completed) | (InProgress, Failed) | (Pending, Failed)
        )
    }
}

/// A server-to-client file transfer. Status is monotonic: `PENDING ->
/// IN_PROGRESS -> {COMPLETED, FAILED}` only, never backward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileTransfer {
    pub transfer_id: Uuid,
    pub file_name: String,
    pub source_path_server: String,
    pub destination_path_client: String,
    pub status: TransferStatus,
    pub associated_session_id: Uuid,
    pub initiating_user_id: Uuid,
    pub target_pc_id: Uuid,
    pub file_size_mb: f64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileTransfer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        file_name: String,
        source_path_server: String,
        destination_path_client: String,
        associated_session_id: Uuid,
        initiating_user_id: Uuid,
        target_pc_id: Uuid,
        file_size_mb: f64,
    ) -> Self {
        let now = Utc::now();
        FileTransfer {
            transfer_id: Uuid::new_v4(),
            file_name,
            source_path_server,
            destination_path_client,
            status: TransferStatus::Pending,
            associated_session_id,
            initiating_user_id,
            target_pc_id,
            file_size_mb,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn transition(&mut self, next: TransferStatus) -> Result<(), DomainError> {
        if !self.status.allowed(next) {
            return Err(DomainError::InvalidState(format!(
                "transfer {} cannot go from {:?} to {:?}",
                self.transfer_id, self.status, next
            )));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), DomainError> {
        self.transition(TransferStatus::Failed)?;
        self.error_message = Some(message.into());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer() -> FileTransfer {
        FileTransfer::new(
            "a.txt".into(),
            "/srv/a.txt".into(),
            "C:/a.txt".into(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            0.13,
        )
    }

    #[test]
    fn starts_pending() {
        assert_eq!(transfer().status, TransferStatus::Pending);
    }

    #[test]
    fn cannot_skip_in_progress() {
        let mut t = transfer();
        assert!(t.transition(TransferStatus::Completed).is_err());
    }

    #[test]
    fn cannot_regress_from_completed() {
        let mut t = transfer();
        t.transition(TransferStatus::InProgress).unwrap();
        t.transition(TransferStatus::Completed).unwrap();
        assert!(t.transition(TransferStatus::InProgress).is_err());
    }

    #[test]
    fn fail_sets_error_message() {
        let mut t = transfer();
        t.transition(TransferStatus::InProgress).unwrap();
        t.fail("pc disconnected").unwrap();
        assert_eq!(t.status, TransferStatus::Failed);
        assert_eq!(t.error_message.as_deref(), Some("pc disconnected"));
    }

    #[test]
    fn pending_can_fail_directly_when_never_driven() {
        let mut t = transfer();
        t.fail("target pc disconnected before transfer could start").unwrap();
        assert_eq!(t.status, TransferStatus::Failed);
    }
}
