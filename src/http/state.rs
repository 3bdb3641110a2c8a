use std::sync::Arc;
use std::time::Instant;

use crate::audit::AuditLog;
use crate::auth::AuthService;
use crate::config::ServerConfig;
use crate::hub::Hubs;
use crate::recorder::FrameRecorder;
use crate::repository::{ClientPcRepository, FileTransferRepository, SessionRepository, SessionVideoRepository};
use crate::session::SessionService;
use crate::transfer::FileTransferService;

/// Everything a handler needs, cloned cheaply (every field is an `Arc`)
/// into each axum request. Assembled once in `main` and handed to
/// `build_router`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub hubs: Hubs,
    pub auth: Arc<AuthService>,
    pub sessions: Arc<SessionService>,
    pub transfers: Arc<FileTransferService>,
    pub recorder: Arc<FrameRecorder>,
    pub audit: Arc<AuditLog>,
    pub client_pcs: Arc<dyn ClientPcRepository>,
    pub session_videos: Arc<dyn SessionVideoRepository>,
    pub session_repo: Arc<dyn SessionRepository>,
    pub file_transfers: Arc<dyn FileTransferRepository>,
    pub started_at: Instant,
}
