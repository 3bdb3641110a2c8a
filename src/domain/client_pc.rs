use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectionStatus {
    Online,
    Offline,
    Connecting,
}

impl ConnectionStatus {
    /// `OFFLINE <-> CONNECTING <-> ONLINE <-> OFFLINE`.
    fn allowed(self, next: ConnectionStatus) -> bool {
        use ConnectionStatus::*;
        matches!(
            (self, next),
            (Offline, Connecting)
                | (Connecting, Offline)
                | (Connecting, Online)
                | (Online, Connecting)
                | (Online, Offline)
                | (Offline, Online) // direct heartbeat-reconnect path
        )
    }
}

/// A registered client machine. `(identifier, owner_user_id)` is unique;
/// see [`ClientPc::set_status`] for the transition matrix this entity enforces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientPc {
    pub pc_id: Uuid,
    pub identifier: String,
    pub ip: Option<String>,
    pub owner_user_id: Uuid,
    pub connection_status: ConnectionStatus,
    pub registered_at: DateTime<Utc>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ClientPc {
    pub fn new(identifier: String, owner_user_id: Uuid, ip: Option<String>) -> Self {
        let now = Utc::now();
        ClientPc {
            pc_id: Uuid::new_v4(),
            identifier,
            ip,
            owner_user_id,
            connection_status: ConnectionStatus::Offline,
            registered_at: now,
            last_seen_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies a connection-status transition, rejecting anything not in the matrix.
    pub fn set_status(&mut self, next: ConnectionStatus) -> Result<(), DomainError> {
        if self.connection_status == next {
            return Ok(());
        }
        if !self.connection_status.allowed(next) {
            return Err(DomainError::InvalidState(format!(
                "client pc {} cannot go from {:?} to {:?}",
                self.pc_id, self.connection_status, next
            )));
        }
        self.connection_status = next;
        self.updated_at = Utc::now();
        if next == ConnectionStatus::Online {
            self.last_seen_at = Some(self.updated_at);
        }
        Ok(())
    }

    /// Heartbeat processing: always bumps `last_seen_at`, regardless of status.
    pub fn record_heartbeat(&mut self) {
        let now = Utc::now();
        self.last_seen_at = Some(now);
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pc() -> ClientPc {
        ClientPc::new("lab-01".into(), Uuid::new_v4(), Some("10.0.0.5".into()))
    }

    #[test]
    fn starts_offline() {
        assert_eq!(pc().connection_status, ConnectionStatus::Offline);
    }

    #[test]
    fn offline_to_online_direct_is_allowed_for_reconnect() {
        let mut p = pc();
        assert!(p.set_status(ConnectionStatus::Online).is_ok());
    }

    #[test]
    fn online_to_connecting_then_offline_is_allowed() {
        let mut p = pc();
        p.set_status(ConnectionStatus::Online).unwrap();
        assert!(p.set_status(ConnectionStatus::Connecting).is_ok());
        assert!(p.set_status(ConnectionStatus::Offline).is_ok());
    }

    #[test]
    fn heartbeat_updates_last_seen_regardless_of_status() {
        let mut p = pc();
        assert!(p.last_seen_at.is_none());
        p.record_heartbeat();
        assert!(p.last_seen_at.is_some());
    }

    #[test]
    fn same_status_is_a_no_op() {
        let mut p = pc();
        assert!(p.set_status(ConnectionStatus::Offline).is_ok());
        assert_eq!(p.connection_status, ConnectionStatus::Offline);
    }
}
