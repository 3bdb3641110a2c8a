use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use r2d2_sqlite::SqliteConnectionManager;
use remote_control_server::audit::AuditLog;
use remote_control_server::auth::{Argon2Hasher, AuthService, JwtCodec};
use remote_control_server::config::ServerConfig;
use remote_control_server::hub::Hubs;
use remote_control_server::recorder::FrameRecorder;
use remote_control_server::repository::SqliteRepositories;
use remote_control_server::session::{CleanupThresholds, SessionService};
use remote_control_server::transfer::FileTransferService;
use remote_control_server::{http, init_tracing};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Command-line flags, layered under the file/env configuration the same
/// way the teacher's `main` reads a handful of constants — here routed
/// through `clap` so they're discoverable via `--help`.
#[derive(Parser, Debug)]
struct Cli {
    /// Directory containing `default.toml` and an optional `local.toml`.
    #[arg(long, env = "APP_CONFIG_DIR", default_value = "config")]
    config_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = Arc::new(ServerConfig::load(&cli.config_dir)?);
    info!(?config, "configuration loaded");

    let manager = SqliteConnectionManager::file(&config.database_path);
    let pool = r2d2::Pool::builder()
        .min_idle(Some(10))
        .max_size(20)
        .build(manager)?;
    let repos = Arc::new(SqliteRepositories::new(pool)?);

    let audit = Arc::new(AuditLog::new(repos.clone()));
    let auth = Arc::new(AuthService::new(
        repos.clone(),
        Arc::new(Argon2Hasher),
        Arc::new(JwtCodec::new(config.jwt_secret.clone())),
        audit.clone(),
        config.jwt_expiry_hours,
    ));
    let hubs = Hubs::new();
    let thresholds = CleanupThresholds {
        stuck_active_mins: config.stuck_active_threshold_mins,
        stuck_pending_mins: config.stuck_pending_threshold_mins,
        rejected_gc_mins: config.rejected_gc_threshold_mins,
    };
    let sessions = Arc::new(SessionService::new(repos.clone(), repos.clone(), audit.clone(), thresholds));
    let transfers = Arc::new(FileTransferService::new(repos.clone(), audit.clone(), hubs.clone()));
    let recorder = Arc::new(FrameRecorder::new(config.clone(), repos.clone()));

    wire_session_ended_notifications(&sessions, &hubs).await;

    let state = http::AppState {
        config: config.clone(),
        hubs: hubs.clone(),
        auth,
        sessions: sessions.clone(),
        transfers,
        recorder,
        audit,
        client_pcs: repos.clone(),
        session_videos: repos.clone(),
        session_repo: repos.clone(),
        file_transfers: repos.clone(),
        started_at: http::process_start(),
    };

    let shutdown = CancellationToken::new();
    spawn_cleanup_task(sessions, shutdown.clone());

    let app = http::build_router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    Ok(())
}

/// Every terminal session transition needs the operator to hear about it;
/// an admin-initiated end or a clean completion additionally needs the
/// client to hear about it (a client-caused ending doesn't, since that end
/// of the channel already knows). Rather than let the session service
/// depend on the hubs directly (which would cycle back through the router
/// that calls into the session service), it holds two callback slots wired
/// up once here.
async fn wire_session_ended_notifications(sessions: &Arc<SessionService>, hubs: &Hubs) {
    let operator_hubs = hubs.clone();
    sessions
        .set_on_session_ended(Box::new(move |session| {
            let hubs = operator_hubs.clone();
            Box::pin(async move {
                let _ = hubs.operators.send_to(session.admin_user_id, "session_ended", &session).await;
            })
        }))
        .await;

    let client_hubs = hubs.clone();
    sessions
        .set_on_client_session_ended(Box::new(move |session| {
            let hubs = client_hubs.clone();
            Box::pin(async move {
                let reason = format!("{:?}", session.status);
                let _ = hubs
                    .clients
                    .send_to(
                        session.client_pc_id,
                        "control_session_ended",
                        remote_control_server::protocol::ControlSessionEnded {
                            session_id: session.session_id,
                            reason,
                        },
                    )
                    .await;
            })
        }))
        .await;
}

/// Periodically sweeps stuck sessions and garbage-collects old rejected
/// ones, using the interval named in the design notes rather than a
/// one-shot timer, since both conditions recur for as long as the server
/// runs.
fn spawn_cleanup_task(sessions: Arc<SessionService>, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let cancel = CancellationToken::new();
                    match sessions.cleanup_stuck_sessions(&cancel).await {
                        Ok(count) if count > 0 => info!(count, "cleaned up stuck sessions"),
                        Ok(_) => {}
                        Err(err) => tracing::warn!(error = %err, "stuck session cleanup failed"),
                    }
                    match sessions.gc_rejected_sessions(&cancel).await {
                        Ok(count) if count > 0 => info!(count, "garbage-collected old rejected sessions"),
                        Ok(_) => {}
                        Err(err) => tracing::warn!(error = %err, "rejected session gc failed"),
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }
    });
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    shutdown.cancel();
}
