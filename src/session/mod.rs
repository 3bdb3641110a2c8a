//! Session lifecycle orchestration. Entity transition rules live on
//! [`RemoteSession`] itself; this service is the thing that calls them,
//! persists the result, and tells the hubs who needs to hear about it.
//!
//! The hubs can't depend on this module without creating a cycle (hubs are
//! what this module sends notifications through), so instead of taking a
//! hub reference directly, the service holds callback slots the caller
//! wires up once at startup — the same pattern the teacher uses for its
//! `on_disconnect` handler in `host.rs`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::audit::AuditLog;
use crate::domain::{ClientPc, ConnectionStatus, RemoteSession, SessionStatus};
use crate::error::{DomainError, DomainResult};
use crate::repository::{ClientPcRepository, SessionRepository};

type EndCallback = Box<dyn Fn(RemoteSession) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Operational thresholds the cleanup sweep uses, sourced from
/// [`crate::config::ServerConfig`].
#[derive(Debug, Clone, Copy)]
pub struct CleanupThresholds {
    pub stuck_active_mins: i64,
    pub stuck_pending_mins: i64,
    pub rejected_gc_mins: i64,
}

pub struct SessionService {
    sessions: Arc<dyn SessionRepository>,
    client_pcs: Arc<dyn ClientPcRepository>,
    audit: Arc<AuditLog>,
    thresholds: CleanupThresholds,
    on_session_ended: tokio::sync::RwLock<Option<EndCallback>>,
    on_client_session_ended: tokio::sync::RwLock<Option<EndCallback>>,
}

impl SessionService {
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        client_pcs: Arc<dyn ClientPcRepository>,
        audit: Arc<AuditLog>,
        thresholds: CleanupThresholds,
    ) -> Self {
        SessionService {
            sessions,
            client_pcs,
            audit,
            thresholds,
            on_session_ended: tokio::sync::RwLock::new(None),
            on_client_session_ended: tokio::sync::RwLock::new(None),
        }
    }

    /// Registers the callback invoked on the operator side whenever a
    /// session reaches a terminal status, so the router can notify the
    /// operator without this module knowing anything about sockets.
    pub async fn set_on_session_ended(&self, cb: EndCallback) {
        *self.on_session_ended.write().await = Some(cb);
    }

    /// Registers the callback invoked on the client side — only for
    /// terminations the client wouldn't already know about on its own
    /// (an admin-initiated end, or a clean completion), never for a
    /// termination the client itself caused.
    pub async fn set_on_client_session_ended(&self, cb: EndCallback) {
        *self.on_client_session_ended.write().await = Some(cb);
    }

    /// Notifies the operator of every terminal transition, and additionally
    /// notifies the client when the termination wasn't something the client
    /// already knows about (it ended the session itself, or disconnected).
    async fn notify_ended(&self, session: &RemoteSession) {
        if let Some(cb) = self.on_session_ended.read().await.as_ref() {
            cb(session.clone()).await;
        }
        if matches!(session.status, SessionStatus::EndedByAdmin | SessionStatus::EndedSuccessfully) {
            if let Some(cb) = self.on_client_session_ended.read().await.as_ref() {
                cb(session.clone()).await;
            }
        }
    }

    /// An operator requests control of a client PC. Fails with
    /// `UNAVAILABLE` if the PC is not online, `CONFLICT` if it already has
    /// an active or pending session.
    pub async fn initiate_session(
        &self,
        admin_user_id: Uuid,
        client_pc_id: Uuid,
        cancel: &CancellationToken,
    ) -> DomainResult<RemoteSession> {
        let pc = self
            .client_pcs
            .find_by_id(client_pc_id, cancel)
            .await?
            .ok_or_else(|| DomainError::not_found("ClientPc", client_pc_id.to_string()))?;

        if pc.connection_status != ConnectionStatus::Online {
            return Err(DomainError::Unavailable(format!(
                "client pc {client_pc_id} is not online"
            )));
        }

        self.cleanup_stuck_for_pc(client_pc_id, cancel).await?;

        let existing = self.sessions.find_active_per_client_pc(client_pc_id, cancel).await?;
        if !existing.is_empty() {
            return Err(DomainError::Conflict(format!(
                "client pc {client_pc_id} already has an active or pending session"
            )));
        }

        let session = RemoteSession::new(admin_user_id, client_pc_id);
        self.sessions.save(&session, cancel).await?;
        self.audit.record_best_effort(
            "session_initiated",
            Some(admin_user_id),
            json!({ "session_id": session.session_id, "client_pc_id": client_pc_id }),
        );
        Ok(session)
    }

    pub async fn accept_session(&self, session_id: Uuid, cancel: &CancellationToken) -> DomainResult<RemoteSession> {
        self.transition(session_id, SessionStatus::Active, cancel).await
    }

    pub async fn reject_session(&self, session_id: Uuid, cancel: &CancellationToken) -> DomainResult<RemoteSession> {
        self.transition(session_id, SessionStatus::Rejected, cancel).await
    }

    pub async fn end_session_by_admin(&self, session_id: Uuid, cancel: &CancellationToken) -> DomainResult<RemoteSession> {
        self.transition(session_id, SessionStatus::EndedByAdmin, cancel).await
    }

    pub async fn end_session_by_client(&self, session_id: Uuid, cancel: &CancellationToken) -> DomainResult<RemoteSession> {
        self.transition(session_id, SessionStatus::EndedByClient, cancel).await
    }

    /// Reaches `ENDED_SUCCESSFULLY` — the clean-completion path the status
    /// enum names but none of the inbound client/operator messages alone
    /// produce; callers drive it explicitly once a session's agreed work is
    /// done (e.g. a scheduled remote session finishing on its own).
    pub async fn end_session_successfully(&self, session_id: Uuid, cancel: &CancellationToken) -> DomainResult<RemoteSession> {
        self.transition(session_id, SessionStatus::EndedSuccessfully, cancel).await
    }

    pub async fn fail_session(&self, session_id: Uuid, cancel: &CancellationToken) -> DomainResult<RemoteSession> {
        self.transition(session_id, SessionStatus::Failed, cancel).await
    }

    async fn transition(
        &self,
        session_id: Uuid,
        next: SessionStatus,
        cancel: &CancellationToken,
    ) -> DomainResult<RemoteSession> {
        let mut session = self
            .sessions
            .find_by_id(session_id, cancel)
            .await?
            .ok_or_else(|| DomainError::not_found("RemoteSession", session_id.to_string()))?;

        session.transition(next)?;
        self.sessions.save(&session, cancel).await?;

        if next.is_terminal() {
            self.notify_ended(&session).await;
        }
        self.audit.record_best_effort(
            "session_transitioned",
            Some(session.admin_user_id),
            json!({ "session_id": session_id, "status": next.as_str_for_audit() }),
        );
        Ok(session)
    }

    /// A client PC drops its socket: every non-terminal session against it
    /// reaches the terminal status the matrix assigns to a client-caused
    /// ending — `ACTIVE -> ENDED_BY_CLIENT`, `PENDING_APPROVAL -> REJECTED`
    /// — and the PC itself is marked offline. Only the operator is
    /// notified; the client that just disconnected has no channel left to
    /// hear it on.
    pub async fn handle_client_pc_disconnect(&self, client_pc_id: Uuid, cancel: &CancellationToken) -> DomainResult<()> {
        let non_terminal = self.sessions.find_active_per_client_pc(client_pc_id, cancel).await?;
        for mut session in non_terminal {
            let next = match session.status {
                SessionStatus::Active => SessionStatus::EndedByClient,
                SessionStatus::PendingApproval => SessionStatus::Rejected,
                _ => continue,
            };
            if session.transition(next).is_err() {
                continue;
            }
            self.sessions.save(&session, cancel).await?;
            self.notify_ended(&session).await;
        }

        if let Some(mut pc) = self.client_pcs.find_by_id(client_pc_id, cancel).await? {
            let _ = pc.set_status(ConnectionStatus::Offline);
            self.client_pcs.save(&pc, cancel).await?;
        }
        Ok(())
    }

    /// Whether `admin_user_id` may stream frames/commands through
    /// `session_id`: the session must be `ACTIVE` and owned by that admin.
    pub async fn validate_streaming_permission(
        &self,
        session_id: Uuid,
        admin_user_id: Uuid,
        cancel: &CancellationToken,
    ) -> DomainResult<RemoteSession> {
        let session = self
            .sessions
            .find_by_id(session_id, cancel)
            .await?
            .ok_or_else(|| DomainError::not_found("RemoteSession", session_id.to_string()))?;

        if session.admin_user_id != admin_user_id {
            return Err(DomainError::Permission(format!(
                "user {admin_user_id} does not own session {session_id}"
            )));
        }
        if session.status != SessionStatus::Active {
            return Err(DomainError::InvalidState(format!(
                "session {session_id} is not active"
            )));
        }
        Ok(session)
    }

    /// The client-side counterpart of [`Self::validate_streaming_permission`]:
    /// a client PC may only push frames into a session it is actually the
    /// target of, and only while that session is active.
    pub async fn validate_streaming_permission_as_client(
        &self,
        session_id: Uuid,
        client_pc_id: Uuid,
        cancel: &CancellationToken,
    ) -> DomainResult<RemoteSession> {
        let session = self
            .sessions
            .find_by_id(session_id, cancel)
            .await?
            .ok_or_else(|| DomainError::not_found("RemoteSession", session_id.to_string()))?;

        if session.client_pc_id != client_pc_id {
            return Err(DomainError::Permission(format!(
                "client pc {client_pc_id} is not the target of session {session_id}"
            )));
        }
        if session.status != SessionStatus::Active {
            return Err(DomainError::InvalidState(format!(
                "session {session_id} is not active"
            )));
        }
        Ok(session)
    }

    pub async fn session_or_not_found(&self, session_id: Uuid, cancel: &CancellationToken) -> DomainResult<RemoteSession> {
        self.sessions
            .find_by_id(session_id, cancel)
            .await?
            .ok_or_else(|| DomainError::not_found("RemoteSession", session_id.to_string()))
    }

    /// Same contract as streaming permission, named separately since input
    /// commands and screen frames are validated at distinct call sites in
    /// the router.
    pub async fn validate_input_command_permission(
        &self,
        session_id: Uuid,
        admin_user_id: Uuid,
        cancel: &CancellationToken,
    ) -> DomainResult<RemoteSession> {
        self.validate_streaming_permission(session_id, admin_user_id, cancel).await
    }

    /// Sweeps every session that has overstayed its welcome: `ACTIVE` past
    /// `stuck_active_mins` with no traffic is marked `FAILED`;
    /// `PENDING_APPROVAL` past `stuck_pending_mins` with no operator
    /// response is marked `REJECTED`, same as an operator actively turning
    /// the request down. Runs on the periodic maintenance timer.
    pub async fn cleanup_stuck_sessions(&self, cancel: &CancellationToken) -> DomainResult<u32> {
        let mut cleaned = 0u32;

        for session in self.sessions.find_active(cancel).await? {
            if self.reap_if_stuck(session, cancel).await? {
                cleaned += 1;
            }
        }

        // Pending-approval sessions aren't indexed by a dedicated finder;
        // `find_active_per_client_pc` already folds PENDING_APPROVAL in, so
        // sweep through all client PCs' active-or-pending sets instead.
        for pc in self.client_pcs.find_all(cancel).await? {
            for session in self.sessions.find_active_per_client_pc(pc.pc_id, cancel).await? {
                if self.reap_if_stuck(session, cancel).await? {
                    cleaned += 1;
                }
            }
        }

        Ok(cleaned)
    }

    /// Deletes `REJECTED` sessions whose last update is older than
    /// `rejected_gc_mins` — a rejected request has no further life once an
    /// operator or the stuck-session sweep has already disposed of it, so
    /// there's nothing left to retain it for beyond the audit trail, which
    /// records the transition independently. Runs on the same periodic
    /// maintenance timer as [`Self::cleanup_stuck_sessions`].
    pub async fn gc_rejected_sessions(&self, cancel: &CancellationToken) -> DomainResult<u32> {
        let cutoff = Utc::now() - chrono::Duration::minutes(self.thresholds.rejected_gc_mins);
        let mut removed = 0u32;
        for session in self.sessions.find_rejected_older_than(cutoff, cancel).await? {
            if let Err(err) = self.sessions.delete(session.session_id, cancel).await {
                tracing::warn!(session_id = %session.session_id, error = %err, "rejected-session gc failed to delete session");
                continue;
            }
            removed += 1;
        }
        Ok(removed)
    }

    /// Same sweep, scoped to one client PC's non-terminal sessions — run
    /// before `initiate_session` admits a new request, so a stale
    /// `PENDING_APPROVAL` or `ACTIVE` row left behind by a crashed operator
    /// never blocks a fresh one with a spurious `CONFLICT`.
    async fn cleanup_stuck_for_pc(&self, client_pc_id: Uuid, cancel: &CancellationToken) -> DomainResult<()> {
        for session in self.sessions.find_active_per_client_pc(client_pc_id, cancel).await? {
            self.reap_if_stuck(session, cancel).await?;
        }
        Ok(())
    }

    /// Reaps `session` if its age exceeds the threshold for its status,
    /// returning whether it was reaped. A transition or save failure is
    /// logged and skipped rather than raised — one wedged row shouldn't
    /// stop the rest of the sweep.
    async fn reap_if_stuck(&self, mut session: RemoteSession, cancel: &CancellationToken) -> DomainResult<bool> {
        let now = Utc::now();
        let next = match session.status {
            SessionStatus::Active => {
                let started = session.start_time.unwrap_or(session.created_at);
                if (now - started).num_minutes() < self.thresholds.stuck_active_mins {
                    return Ok(false);
                }
                SessionStatus::Failed
            }
            SessionStatus::PendingApproval => {
                if (now - session.created_at).num_minutes() < self.thresholds.stuck_pending_mins {
                    return Ok(false);
                }
                SessionStatus::Rejected
            }
            _ => return Ok(false),
        };

        if let Err(err) = session.transition(next) {
            tracing::warn!(session_id = %session.session_id, error = %err, "stuck-session cleanup could not transition session");
            return Ok(false);
        }
        if let Err(err) = self.sessions.save(&session, cancel).await {
            tracing::warn!(session_id = %session.session_id, error = %err, "stuck-session cleanup failed to persist session");
            return Ok(false);
        }
        self.notify_ended(&session).await;
        Ok(true)
    }
}

impl SessionStatus {
    fn as_str_for_audit(self) -> &'static str {
        match self {
            SessionStatus::PendingApproval => "PENDING_APPROVAL",
            SessionStatus::Active => "ACTIVE",
            SessionStatus::EndedSuccessfully => "ENDED_SUCCESSFULLY",
            SessionStatus::EndedByAdmin => "ENDED_BY_ADMIN",
            SessionStatus::EndedByClient => "ENDED_BY_CLIENT",
            SessionStatus::Rejected => "REJECTED",
            SessionStatus::Failed => "FAILED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::sync::Mutex as AsyncMutex;

    #[derive(Default)]
    struct FakeSessions {
        rows: Mutex<HashMap<Uuid, RemoteSession>>,
    }

    #[async_trait]
    impl SessionRepository for FakeSessions {
        async fn save(&self, session: &RemoteSession, _c: &CancellationToken) -> DomainResult<()> {
            self.rows.lock().unwrap().insert(session.session_id, session.clone());
            Ok(())
        }
        async fn find_by_id(&self, id: Uuid, _c: &CancellationToken) -> DomainResult<Option<RemoteSession>> {
            Ok(self.rows.lock().unwrap().get(&id).cloned())
        }
        async fn find_active_per_client_pc(&self, pc_id: Uuid, _c: &CancellationToken) -> DomainResult<Vec<RemoteSession>> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .values()
                .filter(|s| s.client_pc_id == pc_id && !s.status.is_terminal())
                .cloned()
                .collect())
        }
        async fn find_by_admin(&self, admin_id: Uuid, _c: &CancellationToken) -> DomainResult<Vec<RemoteSession>> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .values()
                .filter(|s| s.admin_user_id == admin_id)
                .cloned()
                .collect())
        }
        async fn find_active(&self, _c: &CancellationToken) -> DomainResult<Vec<RemoteSession>> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .values()
                .filter(|s| s.status == SessionStatus::Active)
                .cloned()
                .collect())
        }
        async fn find_rejected_older_than(&self, cutoff: chrono::DateTime<Utc>, _c: &CancellationToken) -> DomainResult<Vec<RemoteSession>> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .values()
                .filter(|s| s.status == SessionStatus::Rejected && s.updated_at < cutoff)
                .cloned()
                .collect())
        }
        async fn delete(&self, id: Uuid, _c: &CancellationToken) -> DomainResult<()> {
            self.rows.lock().unwrap().remove(&id);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeClientPcs {
        rows: Mutex<HashMap<Uuid, ClientPc>>,
    }

    #[async_trait]
    impl ClientPcRepository for FakeClientPcs {
        async fn save(&self, pc: &ClientPc, _c: &CancellationToken) -> DomainResult<()> {
            self.rows.lock().unwrap().insert(pc.pc_id, pc.clone());
            Ok(())
        }
        async fn find_by_id(&self, id: Uuid, _c: &CancellationToken) -> DomainResult<Option<ClientPc>> {
            Ok(self.rows.lock().unwrap().get(&id).cloned())
        }
        async fn find_by_identifier_and_owner(&self, _i: &str, _o: Uuid, _c: &CancellationToken) -> DomainResult<Option<ClientPc>> {
            Ok(None)
        }
        async fn find_all(&self, _c: &CancellationToken) -> DomainResult<Vec<ClientPc>> {
            Ok(self.rows.lock().unwrap().values().cloned().collect())
        }
        async fn find_online(&self, _c: &CancellationToken) -> DomainResult<Vec<ClientPc>> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .values()
                .filter(|p| p.connection_status == ConnectionStatus::Online)
                .cloned()
                .collect())
        }
    }

    struct FakeAudit;

    fn service(sessions: Arc<FakeSessions>, pcs: Arc<FakeClientPcs>) -> SessionService {
        use crate::domain::AuditLogEntry;
        use crate::repository::AuditLogRepository;

        struct NullAuditRepo;
        #[async_trait]
        impl AuditLogRepository for NullAuditRepo {
            async fn record(&self, _e: &AuditLogEntry, _c: &CancellationToken) -> DomainResult<()> {
                Ok(())
            }
            async fn find_recent(&self, _l: u32, _c: &CancellationToken) -> DomainResult<Vec<AuditLogEntry>> {
                Ok(vec![])
            }
        }
        let audit = Arc::new(AuditLog::new(Arc::new(NullAuditRepo)));
        let _ = FakeAudit;
        let thresholds = CleanupThresholds {
            stuck_active_mins: 15,
            stuck_pending_mins: 2,
            rejected_gc_mins: 30,
        };
        SessionService::new(sessions, pcs, audit, thresholds)
    }

    fn online_pc() -> ClientPc {
        let mut pc = ClientPc::new("lab-01".into(), Uuid::new_v4(), None);
        pc.set_status(ConnectionStatus::Online).unwrap();
        pc
    }

    #[tokio::test]
    async fn initiate_session_fails_when_pc_offline() {
        let sessions = Arc::new(FakeSessions::default());
        let pcs = Arc::new(FakeClientPcs::default());
        let mut pc = ClientPc::new("lab-01".into(), Uuid::new_v4(), None);
        pc.pc_id = Uuid::new_v4();
        pcs.rows.lock().unwrap().insert(pc.pc_id, pc.clone());

        let svc = service(sessions, pcs);
        let cancel = CancellationToken::new();
        let err = svc.initiate_session(Uuid::new_v4(), pc.pc_id, &cancel).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Unavailable);
    }

    #[tokio::test]
    async fn initiate_session_then_accept_then_end_by_admin() {
        let sessions = Arc::new(FakeSessions::default());
        let pcs = Arc::new(FakeClientPcs::default());
        let pc = online_pc();
        pcs.rows.lock().unwrap().insert(pc.pc_id, pc.clone());

        let svc = service(sessions, pcs);
        let cancel = CancellationToken::new();
        let admin_id = Uuid::new_v4();

        let session = svc.initiate_session(admin_id, pc.pc_id, &cancel).await.unwrap();
        assert_eq!(session.status, SessionStatus::PendingApproval);

        let accepted = svc.accept_session(session.session_id, &cancel).await.unwrap();
        assert_eq!(accepted.status, SessionStatus::Active);

        let ended = svc.end_session_by_admin(session.session_id, &cancel).await.unwrap();
        assert_eq!(ended.status, SessionStatus::EndedByAdmin);
    }

    #[tokio::test]
    async fn initiate_session_fails_when_already_pending() {
        let sessions = Arc::new(FakeSessions::default());
        let pcs = Arc::new(FakeClientPcs::default());
        let pc = online_pc();
        pcs.rows.lock().unwrap().insert(pc.pc_id, pc.clone());

        let svc = service(sessions, pcs);
        let cancel = CancellationToken::new();
        let admin_id = Uuid::new_v4();

        svc.initiate_session(admin_id, pc.pc_id, &cancel).await.unwrap();
        let err = svc.initiate_session(admin_id, pc.pc_id, &cancel).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn disconnect_ends_active_session_by_client_and_marks_pc_offline() {
        let sessions = Arc::new(FakeSessions::default());
        let pcs = Arc::new(FakeClientPcs::default());
        let pc = online_pc();
        pcs.rows.lock().unwrap().insert(pc.pc_id, pc.clone());

        let svc = service(sessions.clone(), pcs.clone());
        let cancel = CancellationToken::new();
        let admin_id = Uuid::new_v4();

        let session = svc.initiate_session(admin_id, pc.pc_id, &cancel).await.unwrap();
        svc.accept_session(session.session_id, &cancel).await.unwrap();

        svc.handle_client_pc_disconnect(pc.pc_id, &cancel).await.unwrap();

        let reloaded = sessions.find_by_id(session.session_id, &cancel).await.unwrap().unwrap();
        assert_eq!(reloaded.status, SessionStatus::EndedByClient);

        let reloaded_pc = pcs.find_by_id(pc.pc_id, &cancel).await.unwrap().unwrap();
        assert_eq!(reloaded_pc.connection_status, ConnectionStatus::Offline);
    }

    #[tokio::test]
    async fn disconnect_rejects_pending_session() {
        let sessions = Arc::new(FakeSessions::default());
        let pcs = Arc::new(FakeClientPcs::default());
        let pc = online_pc();
        pcs.rows.lock().unwrap().insert(pc.pc_id, pc.clone());

        let svc = service(sessions.clone(), pcs.clone());
        let cancel = CancellationToken::new();
        let admin_id = Uuid::new_v4();

        let session = svc.initiate_session(admin_id, pc.pc_id, &cancel).await.unwrap();
        svc.handle_client_pc_disconnect(pc.pc_id, &cancel).await.unwrap();

        let reloaded = sessions.find_by_id(session.session_id, &cancel).await.unwrap().unwrap();
        assert_eq!(reloaded.status, SessionStatus::Rejected);
    }

    #[tokio::test]
    async fn ended_callback_fires_once_per_terminal_transition() {
        let sessions = Arc::new(FakeSessions::default());
        let pcs = Arc::new(FakeClientPcs::default());
        let pc = online_pc();
        pcs.rows.lock().unwrap().insert(pc.pc_id, pc.clone());

        let svc = service(sessions, pcs);
        let seen = Arc::new(AsyncMutex::new(Vec::new()));
        let seen_clone = seen.clone();
        svc.set_on_session_ended(Box::new(move |session| {
            let seen = seen_clone.clone();
            Box::pin(async move {
                seen.lock().await.push((session.session_id, session.status));
            })
        }))
        .await;

        let cancel = CancellationToken::new();
        let admin_id = Uuid::new_v4();
        let session = svc.initiate_session(admin_id, pc.pc_id, &cancel).await.unwrap();
        svc.accept_session(session.session_id, &cancel).await.unwrap();
        svc.end_session_by_admin(session.session_id, &cancel).await.unwrap();

        let recorded = seen.lock().await;
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0], (session.session_id, SessionStatus::EndedByAdmin));
    }

    #[tokio::test]
    async fn client_callback_fires_only_for_admin_and_clean_endings() {
        let sessions = Arc::new(FakeSessions::default());
        let pcs = Arc::new(FakeClientPcs::default());
        let pc = online_pc();
        pcs.rows.lock().unwrap().insert(pc.pc_id, pc.clone());

        let svc = service(sessions, pcs);
        let seen = Arc::new(AsyncMutex::new(Vec::new()));
        let seen_clone = seen.clone();
        svc.set_on_client_session_ended(Box::new(move |session| {
            let seen = seen_clone.clone();
            Box::pin(async move {
                seen.lock().await.push(session.status);
            })
        }))
        .await;

        let cancel = CancellationToken::new();
        let admin_id = Uuid::new_v4();
        let session = svc.initiate_session(admin_id, pc.pc_id, &cancel).await.unwrap();
        svc.accept_session(session.session_id, &cancel).await.unwrap();
        svc.end_session_by_admin(session.session_id, &cancel).await.unwrap();

        let recorded = seen.lock().await;
        assert_eq!(*recorded, vec![SessionStatus::EndedByAdmin]);
    }

    #[tokio::test]
    async fn stuck_pending_session_is_rejected_on_reinitiate() {
        let sessions = Arc::new(FakeSessions::default());
        let pcs = Arc::new(FakeClientPcs::default());
        let pc = online_pc();
        pcs.rows.lock().unwrap().insert(pc.pc_id, pc.clone());

        let svc = service(sessions.clone(), pcs.clone());
        let cancel = CancellationToken::new();
        let admin_id = Uuid::new_v4();

        let stale = svc.initiate_session(admin_id, pc.pc_id, &cancel).await.unwrap();
        {
            let mut rows = sessions.rows.lock().unwrap();
            let row = rows.get_mut(&stale.session_id).unwrap();
            row.created_at -= chrono::Duration::minutes(10);
        }

        let fresh = svc.initiate_session(admin_id, pc.pc_id, &cancel).await.unwrap();
        assert_eq!(fresh.status, SessionStatus::PendingApproval);

        let reloaded_stale = sessions.find_by_id(stale.session_id, &cancel).await.unwrap().unwrap();
        assert_eq!(reloaded_stale.status, SessionStatus::Rejected);
    }

    #[tokio::test]
    async fn gc_removes_only_rejected_sessions_past_threshold() {
        let sessions = Arc::new(FakeSessions::default());
        let pcs = Arc::new(FakeClientPcs::default());
        let pc = online_pc();
        pcs.rows.lock().unwrap().insert(pc.pc_id, pc.clone());

        let svc = service(sessions.clone(), pcs.clone());
        let cancel = CancellationToken::new();
        let admin_id = Uuid::new_v4();

        let old_rejected = svc.initiate_session(admin_id, pc.pc_id, &cancel).await.unwrap();
        svc.reject_session(old_rejected.session_id, &cancel).await.unwrap();
        {
            let mut rows = sessions.rows.lock().unwrap();
            let row = rows.get_mut(&old_rejected.session_id).unwrap();
            row.updated_at -= chrono::Duration::minutes(45);
        }

        let recent_rejected = svc.initiate_session(admin_id, pc.pc_id, &cancel).await.unwrap();
        svc.reject_session(recent_rejected.session_id, &cancel).await.unwrap();

        let removed = svc.gc_rejected_sessions(&cancel).await.unwrap();
        assert_eq!(removed, 1);

        assert!(sessions.find_by_id(old_rejected.session_id, &cancel).await.unwrap().is_none());
        assert!(sessions.find_by_id(recent_rejected.session_id, &cancel).await.unwrap().is_some());
    }
}
