pub mod audit;
pub mod client_pc;
pub mod file_transfer;
pub mod remote_session;
pub mod session_video;
pub mod user;

pub use audit::AuditLogEntry;
pub use client_pc::{ClientPc, ConnectionStatus};
pub use file_transfer::{FileTransfer, TransferStatus};
pub use remote_session::{RemoteSession, SessionStatus};
pub use session_video::SessionVideo;
pub use user::{Role, User, UserSnapshot};
