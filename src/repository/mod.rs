//! Repository façade: one `#[async_trait]` per aggregate, so the control
//! plane (auth/session/transfer/recorder services) never touches `rusqlite`
//! directly. `sqlite.rs` is the only module that knows about SQL.

mod sqlite;

pub use sqlite::{SqlitePool, SqliteRepositories};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::{AuditLogEntry, ClientPc, FileTransfer, RemoteSession, SessionVideo, User};
use crate::error::DomainResult;

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn save(&self, user: &User, cancel: &CancellationToken) -> DomainResult<()>;
    async fn find_by_id(&self, id: Uuid, cancel: &CancellationToken) -> DomainResult<Option<User>>;
    async fn find_by_username(
        &self,
        username: &str,
        cancel: &CancellationToken,
    ) -> DomainResult<Option<User>>;
}

#[async_trait]
pub trait ClientPcRepository: Send + Sync {
    async fn save(&self, pc: &ClientPc, cancel: &CancellationToken) -> DomainResult<()>;
    async fn find_by_id(&self, id: Uuid, cancel: &CancellationToken) -> DomainResult<Option<ClientPc>>;
    async fn find_by_identifier_and_owner(
        &self,
        identifier: &str,
        owner_user_id: Uuid,
        cancel: &CancellationToken,
    ) -> DomainResult<Option<ClientPc>>;
    async fn find_all(&self, cancel: &CancellationToken) -> DomainResult<Vec<ClientPc>>;
    async fn find_online(&self, cancel: &CancellationToken) -> DomainResult<Vec<ClientPc>>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn save(&self, session: &RemoteSession, cancel: &CancellationToken) -> DomainResult<()>;
    async fn find_by_id(
        &self,
        id: Uuid,
        cancel: &CancellationToken,
    ) -> DomainResult<Option<RemoteSession>>;
    async fn find_active_per_client_pc(
        &self,
        client_pc_id: Uuid,
        cancel: &CancellationToken,
    ) -> DomainResult<Vec<RemoteSession>>;
    async fn find_by_admin(
        &self,
        admin_user_id: Uuid,
        cancel: &CancellationToken,
    ) -> DomainResult<Vec<RemoteSession>>;
    async fn find_active(&self, cancel: &CancellationToken) -> DomainResult<Vec<RemoteSession>>;
    async fn find_rejected_older_than(
        &self,
        cutoff: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> DomainResult<Vec<RemoteSession>>;
    async fn delete(&self, id: Uuid, cancel: &CancellationToken) -> DomainResult<()>;
}

#[async_trait]
pub trait FileTransferRepository: Send + Sync {
    async fn save(&self, transfer: &FileTransfer, cancel: &CancellationToken) -> DomainResult<()>;
    async fn find_by_id(
        &self,
        id: Uuid,
        cancel: &CancellationToken,
    ) -> DomainResult<Option<FileTransfer>>;
    async fn find_pending_by_target_pc(
        &self,
        target_pc_id: Uuid,
        cancel: &CancellationToken,
    ) -> DomainResult<Vec<FileTransfer>>;
    async fn find_by_session(
        &self,
        session_id: Uuid,
        cancel: &CancellationToken,
    ) -> DomainResult<Vec<FileTransfer>>;
    async fn find_by_target_pc(
        &self,
        target_pc_id: Uuid,
        cancel: &CancellationToken,
    ) -> DomainResult<Vec<FileTransfer>>;
    async fn find_pending(&self, cancel: &CancellationToken) -> DomainResult<Vec<FileTransfer>>;
}

#[async_trait]
pub trait SessionVideoRepository: Send + Sync {
    async fn save(&self, video: &SessionVideo, cancel: &CancellationToken) -> DomainResult<()>;
    async fn find_by_id(
        &self,
        id: Uuid,
        cancel: &CancellationToken,
    ) -> DomainResult<Option<SessionVideo>>;
    async fn find_by_session(
        &self,
        session_id: Uuid,
        cancel: &CancellationToken,
    ) -> DomainResult<Option<SessionVideo>>;
    async fn find_all(&self, cancel: &CancellationToken) -> DomainResult<Vec<SessionVideo>>;
    async fn find_by_owner(
        &self,
        owner_user_id: Uuid,
        cancel: &CancellationToken,
    ) -> DomainResult<Vec<SessionVideo>>;
}

#[async_trait]
pub trait AuditLogRepository: Send + Sync {
    async fn record(&self, entry: &AuditLogEntry, cancel: &CancellationToken) -> DomainResult<()>;
    async fn find_recent(
        &self,
        limit: u32,
        cancel: &CancellationToken,
    ) -> DomainResult<Vec<AuditLogEntry>>;
}
