//! The server-side coordinator of a remote-desktop control platform:
//! authenticates operators and client PCs, brokers remote-control sessions,
//! relays screen frames and input commands over persistent duplex channels,
//! records sessions as ordered JPEG frame sets, and ships files to clients
//! as chunked transfers with acknowledgement.

pub mod audit;
pub mod auth;
pub mod config;
pub mod domain;
pub mod error;
pub mod hub;
pub mod http;
pub mod protocol;
pub mod recorder;
pub mod repository;
pub mod router;
pub mod session;
pub mod transfer;

pub use error::{DomainError, DomainResult, ErrorKind};

/// Logging target used across the control plane, mirrored from the
/// teacher's single `LOG_TARGET` constant but now feeding `tracing` instead
/// of `log`/`ftail`, since the server runs as a multi-task async process
/// rather than a thread-per-client one.
pub const LOG_TARGET: &str = "remote_control_server";

/// Installs the global `tracing` subscriber. Call once from `main`.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{}=info,tower_http=info", LOG_TARGET)));

    let _ = fmt().with_env_filter(filter).try_init();
}
