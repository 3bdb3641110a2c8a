//! HTTP/websocket bootstrap layer: the axum `Router`, application state, and
//! the handlers that sit between the outside world and the domain services.
//! Grounded on the teacher's `main.rs` accept loop, but replacing the
//! thread-per-connection TCP listener with axum routes and a websocket
//! upgrade per duplex channel.

pub mod rest;
pub mod state;
pub mod ws;

use std::time::Instant;

use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::AppState;

pub fn build_router(state: AppState) -> Router {
    let cors = if state.config.strict_origin_check {
        CorsLayer::new()
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(Any)
    } else {
        CorsLayer::permissive()
    };

    Router::new()
        .route("/health", get(rest::health))
        .route("/api/auth/login", post(rest::login))
        .route("/api/admin/pcs", get(rest::list_pcs))
        .route("/api/admin/pcs/online", get(rest::list_online_pcs))
        .route("/api/admin/sessions/initiate", post(rest::initiate_session))
        .route("/api/admin/sessions/:session_id/status", get(rest::session_status))
        .route("/api/admin/sessions/:session_id/end", post(rest::end_session))
        .route("/api/admin/sessions/active", get(rest::active_sessions))
        .route("/api/admin/sessions/my", get(rest::my_sessions))
        .route(
            "/api/admin/sessions/:session_id/recording/metadata",
            get(rest::recording_metadata),
        )
        .route(
            "/api/admin/sessions/:session_id/frames/:frame_number",
            get(rest::recording_frame),
        )
        .route("/api/admin/recordings", get(rest::all_recordings))
        .route(
            "/api/admin/clients/:client_id/recordings",
            get(rest::client_recordings),
        )
        .route("/api/admin/sessions/:session_id/files/send", post(rest::send_file))
        .route("/api/admin/sessions/:session_id/files", get(rest::list_session_files))
        .route(
            "/api/admin/transfers/:transfer_id/status",
            get(rest::transfer_status),
        )
        .route("/api/admin/transfers/pending", get(rest::pending_transfers))
        .route(
            "/api/admin/clients/:client_id/transfers",
            get(rest::client_transfers),
        )
        .route("/ws/admin", get(ws::admin_ws))
        .route("/ws/client", get(ws::client_ws))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub fn process_start() -> Instant {
    Instant::now()
}
