//! Fire-and-forget audit logging. Every write is spawned onto its own task
//! and never awaited by the caller, so a slow or failing audit write can
//! never stall a control-plane path (login, session transition, transfer).
//! Failures are logged at `warn` and otherwise swallowed.

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::AuditLogEntry;
use crate::repository::AuditLogRepository;

pub struct AuditLog {
    repo: Arc<dyn AuditLogRepository>,
}

impl AuditLog {
    pub fn new(repo: Arc<dyn AuditLogRepository>) -> Self {
        AuditLog { repo }
    }

    /// Queues an audit entry without waiting for the write to land.
    pub fn record_best_effort(&self, event_kind: &str, actor_user_id: Option<Uuid>, detail: Value) {
        let repo = self.repo.clone();
        let entry = AuditLogEntry::new(event_kind.to_string(), actor_user_id, detail);
        tokio::spawn(async move {
            let cancel = CancellationToken::new();
            if let Err(err) = repo.record(&entry, &cancel).await {
                tracing::warn!(error = %err, event_kind = %entry.event_kind, "audit log write failed");
            }
        });
    }

    pub async fn recent(&self, limit: u32) -> crate::error::DomainResult<Vec<AuditLogEntry>> {
        let cancel = CancellationToken::new();
        self.repo.find_recent(limit, &cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeAuditRepo {
        entries: Mutex<Vec<AuditLogEntry>>,
    }

    #[async_trait]
    impl AuditLogRepository for FakeAuditRepo {
        async fn record(&self, entry: &AuditLogEntry, _cancel: &CancellationToken) -> crate::error::DomainResult<()> {
            self.entries.lock().unwrap().push(entry.clone());
            Ok(())
        }

        async fn find_recent(
            &self,
            limit: u32,
            _cancel: &CancellationToken,
        ) -> crate::error::DomainResult<Vec<AuditLogEntry>> {
            let entries = self.entries.lock().unwrap();
            Ok(entries.iter().rev().take(limit as usize).cloned().collect())
        }
    }

    #[tokio::test]
    async fn record_best_effort_lands_before_recent_is_read() {
        let repo = Arc::new(FakeAuditRepo { entries: Mutex::new(Vec::new()) });
        let audit = AuditLog::new(repo);
        audit.record_best_effort("login_success", Some(Uuid::new_v4()), serde_json::json!({}));
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let recent = audit.recent(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].event_kind, "login_success");
    }
}
