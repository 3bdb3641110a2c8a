use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// An append-only security-relevant event. Never load-bearing for control
/// plane correctness — writes are best-effort, see `audit::AuditLog`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub entry_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub actor_user_id: Option<Uuid>,
    pub event_kind: String,
    pub detail: Value,
}

impl AuditLogEntry {
    pub fn new(event_kind: impl Into<String>, actor_user_id: Option<Uuid>, detail: Value) -> Self {
        AuditLogEntry {
            entry_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            actor_user_id,
            event_kind: event_kind.into(),
            detail,
        }
    }
}
