//! `rusqlite` + `r2d2` backed implementations of the repository traits.
//!
//! Every public method wraps its blocking database call in
//! `spawn_blocking`, generalizing the teacher's synchronous
//! `db_pool.get().unwrap().execute(...)` style to an async service without
//! giving up the pooled-connection stack it already uses.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{ffi::SQLITE_CONSTRAINT_UNIQUE, params, Connection, Error::SqliteFailure, OptionalExtension, Row};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::{
    AuditLogEntry, ClientPc, ConnectionStatus, FileTransfer, RemoteSession, Role, SessionStatus,
    SessionVideo, TransferStatus, User,
};
use crate::error::{DomainError, DomainResult};

use super::{
    AuditLogRepository, ClientPcRepository, FileTransferRepository, SessionRepository,
    SessionVideoRepository, UserRepository,
};

pub type SqlitePool = Pool<SqliteConnectionManager>;

/// Runs the `CREATE TABLE IF NOT EXISTS` bootstrap, same inline-DDL shape the
/// teacher uses in `main`, extended with the rest of the data model. Schema
/// DDL is explicitly out of scope for this crate's domain logic, but a real
/// crate needs something runnable to test against.
pub fn bootstrap_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            user_id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            role TEXT NOT NULL,
            password_hash TEXT NOT NULL,
            active INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS client_pcs (
            pc_id TEXT PRIMARY KEY,
            identifier TEXT NOT NULL,
            ip TEXT,
            owner_user_id TEXT NOT NULL,
            connection_status TEXT NOT NULL,
            registered_at TEXT NOT NULL,
            last_seen_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(identifier, owner_user_id)
        );

        CREATE TABLE IF NOT EXISTS remote_sessions (
            session_id TEXT PRIMARY KEY,
            admin_user_id TEXT NOT NULL,
            client_pc_id TEXT NOT NULL,
            start_time TEXT,
            end_time TEXT,
            status TEXT NOT NULL,
            session_video_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS session_videos (
            video_id TEXT PRIMARY KEY,
            associated_session_id TEXT NOT NULL,
            file_path TEXT NOT NULL,
            duration_seconds INTEGER NOT NULL,
            file_size_mb REAL NOT NULL,
            total_frames INTEGER NOT NULL DEFAULT 0,
            fps INTEGER NOT NULL DEFAULT 0,
            recorded_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS file_transfers (
            transfer_id TEXT PRIMARY KEY,
            file_name TEXT NOT NULL,
            source_path_server TEXT NOT NULL,
            destination_path_client TEXT NOT NULL,
            status TEXT NOT NULL,
            associated_session_id TEXT NOT NULL,
            initiating_user_id TEXT NOT NULL,
            target_pc_id TEXT NOT NULL,
            file_size_mb REAL NOT NULL,
            error_message TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS audit_log (
            entry_id TEXT PRIMARY KEY,
            occurred_at TEXT NOT NULL,
            actor_user_id TEXT,
            event_kind TEXT NOT NULL,
            detail TEXT NOT NULL
        );
        ",
    )
}

fn parse_dt(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc.timestamp_opt(0, 0).unwrap())
}

fn uuid_col(row: &Row, idx: usize) -> rusqlite::Result<Uuid> {
    let s: String = row.get(idx)?;
    Uuid::parse_str(&s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Maps a `rusqlite` unique-constraint violation to [`DomainError::Conflict`];
/// everything else becomes [`DomainError::Storage`].
fn map_write_err(e: rusqlite::Error) -> DomainError {
    match &e {
        SqliteFailure(err, _) if err.extended_code == SQLITE_CONSTRAINT_UNIQUE => {
            DomainError::Conflict(e.to_string())
        }
        _ => DomainError::Storage(e.to_string()),
    }
}

fn row_exists(conn: &Connection, table: &str, id_col: &str, id: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        &format!("SELECT 1 FROM {table} WHERE {id_col} = ?1"),
        params![id],
        |_| Ok(()),
    )
    .optional()
    .map(|r| r.is_some())
}

fn row_to_user(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        user_id: uuid_col(row, 0)?,
        username: row.get(1)?,
        role: Role::from_str(&row.get::<_, String>(2)?).unwrap_or(Role::ClientUser),
        password_hash: row.get(3)?,
        active: row.get::<_, i64>(4)? != 0,
        created_at: parse_dt(&row.get::<_, String>(5)?),
        updated_at: parse_dt(&row.get::<_, String>(6)?),
    })
}

fn row_to_client_pc(row: &Row) -> rusqlite::Result<ClientPc> {
    let status_str: String = row.get(4)?;
    let connection_status = match status_str.as_str() {
        "ONLINE" => ConnectionStatus::Online,
        "CONNECTING" => ConnectionStatus::Connecting,
        _ => ConnectionStatus::Offline,
    };
    Ok(ClientPc {
        pc_id: uuid_col(row, 0)?,
        identifier: row.get(1)?,
        ip: row.get(2)?,
        owner_user_id: uuid_col(row, 3)?,
        connection_status,
        registered_at: parse_dt(&row.get::<_, String>(5)?),
        last_seen_at: row.get::<_, Option<String>>(6)?.map(|s| parse_dt(&s)),
        created_at: parse_dt(&row.get::<_, String>(7)?),
        updated_at: parse_dt(&row.get::<_, String>(8)?),
    })
}

fn status_to_str(s: SessionStatus) -> &'static str {
    match s {
        SessionStatus::PendingApproval => "PENDING_APPROVAL",
        SessionStatus::Active => "ACTIVE",
        SessionStatus::EndedSuccessfully => "ENDED_SUCCESSFULLY",
        SessionStatus::EndedByAdmin => "ENDED_BY_ADMIN",
        SessionStatus::EndedByClient => "ENDED_BY_CLIENT",
        SessionStatus::Rejected => "REJECTED",
        SessionStatus::Failed => "FAILED",
    }
}

fn status_from_str(s: &str) -> SessionStatus {
    match s {
        "ACTIVE" => SessionStatus::Active,
        "ENDED_SUCCESSFULLY" => SessionStatus::EndedSuccessfully,
        "ENDED_BY_ADMIN" => SessionStatus::EndedByAdmin,
        "ENDED_BY_CLIENT" => SessionStatus::EndedByClient,
        "REJECTED" => SessionStatus::Rejected,
        "FAILED" => SessionStatus::Failed,
        _ => SessionStatus::PendingApproval,
    }
}

fn row_to_session(row: &Row) -> rusqlite::Result<RemoteSession> {
    Ok(RemoteSession {
        session_id: uuid_col(row, 0)?,
        admin_user_id: uuid_col(row, 1)?,
        client_pc_id: uuid_col(row, 2)?,
        start_time: row.get::<_, Option<String>>(3)?.map(|s| parse_dt(&s)),
        end_time: row.get::<_, Option<String>>(4)?.map(|s| parse_dt(&s)),
        status: status_from_str(&row.get::<_, String>(5)?),
        session_video_id: row
            .get::<_, Option<String>>(6)?
            .and_then(|s| Uuid::parse_str(&s).ok()),
        created_at: parse_dt(&row.get::<_, String>(7)?),
        updated_at: parse_dt(&row.get::<_, String>(8)?),
    })
}

fn transfer_status_to_str(s: TransferStatus) -> &'static str {
    match s {
        TransferStatus::Pending => "PENDING",
        TransferStatus::InProgress => "IN_PROGRESS",
        TransferStatus::Completed => "COMPLETED",
        TransferStatus::Failed => "FAILED",
    }
}

fn transfer_status_from_str(s: &str) -> TransferStatus {
    match s {
        "IN_PROGRESS" => TransferStatus::InProgress,
        "COMPLETED" => TransferStatus::Completed,
        "FAILED" => TransferStatus::Failed,
        _ => TransferStatus::Pending,
    }
}

fn row_to_transfer(row: &Row) -> rusqlite::Result<FileTransfer> {
    Ok(FileTransfer {
        transfer_id: uuid_col(row, 0)?,
        file_name: row.get(1)?,
        source_path_server: row.get(2)?,
        destination_path_client: row.get(3)?,
        status: transfer_status_from_str(&row.get::<_, String>(4)?),
        associated_session_id: uuid_col(row, 5)?,
        initiating_user_id: uuid_col(row, 6)?,
        target_pc_id: uuid_col(row, 7)?,
        file_size_mb: row.get(8)?,
        error_message: row.get(9)?,
        created_at: parse_dt(&row.get::<_, String>(10)?),
        updated_at: parse_dt(&row.get::<_, String>(11)?),
    })
}

fn row_to_video(row: &Row) -> rusqlite::Result<SessionVideo> {
    Ok(SessionVideo {
        video_id: uuid_col(row, 0)?,
        associated_session_id: uuid_col(row, 1)?,
        file_path: row.get(2)?,
        duration_seconds: row.get(3)?,
        file_size_mb: row.get(4)?,
        total_frames: row.get(5)?,
        fps: row.get(6)?,
        recorded_at: parse_dt(&row.get::<_, String>(7)?),
        created_at: parse_dt(&row.get::<_, String>(8)?),
        updated_at: parse_dt(&row.get::<_, String>(9)?),
    })
}

fn row_to_audit(row: &Row) -> rusqlite::Result<AuditLogEntry> {
    let detail_str: String = row.get(4)?;
    Ok(AuditLogEntry {
        entry_id: uuid_col(row, 0)?,
        occurred_at: parse_dt(&row.get::<_, String>(1)?),
        actor_user_id: row
            .get::<_, Option<String>>(2)?
            .and_then(|s| Uuid::parse_str(&s).ok()),
        event_kind: row.get(3)?,
        detail: serde_json::from_str(&detail_str).unwrap_or(Value::Null),
    })
}

/// Bundles one concrete repository implementation per aggregate behind a
/// single pool, the way the teacher threads one `db_pool` through every
/// handler.
#[derive(Clone)]
pub struct SqliteRepositories {
    pool: SqlitePool,
}

impl SqliteRepositories {
    pub fn new(pool: SqlitePool) -> DomainResult<Self> {
        {
            let conn = pool.get().map_err(DomainError::from)?;
            bootstrap_schema(&conn).map_err(DomainError::from)?;
        }
        Ok(SqliteRepositories { pool })
    }

    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }
}

macro_rules! blocking {
    ($pool:expr, $body:expr) => {{
        let pool = $pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(DomainError::from)?;
            $body(conn)
        })
        .await
        .map_err(|e| DomainError::Storage(format!("blocking task panicked: {e}")))?
    }};
}

#[async_trait]
impl UserRepository for SqliteRepositories {
    async fn save(&self, user: &User, _cancel: &CancellationToken) -> DomainResult<()> {
        let user = user.clone();
        blocking!(self.pool, move |conn: Connection| -> DomainResult<()> {
            let exists = row_exists(&conn, "users", "user_id", &user.user_id.to_string())
                .map_err(DomainError::from)?;
            if exists {
                conn.execute(
                    "UPDATE users SET username=?2, role=?3, password_hash=?4, active=?5, updated_at=?6 WHERE user_id=?1",
                    params![
                        user.user_id.to_string(),
                        user.username,
                        user.role.as_str(),
                        user.password_hash,
                        user.active as i64,
                        user.updated_at.to_rfc3339(),
                    ],
                )
                .map_err(map_write_err)?;
            } else {
                conn.execute(
                    "INSERT INTO users (user_id, username, role, password_hash, active, created_at, updated_at) VALUES (?1,?2,?3,?4,?5,?6,?7)",
                    params![
                        user.user_id.to_string(),
                        user.username,
                        user.role.as_str(),
                        user.password_hash,
                        user.active as i64,
                        user.created_at.to_rfc3339(),
                        user.updated_at.to_rfc3339(),
                    ],
                )
                .map_err(map_write_err)?;
            }
            Ok(())
        })
    }

    async fn find_by_id(&self, id: Uuid, _cancel: &CancellationToken) -> DomainResult<Option<User>> {
        blocking!(self.pool, move |conn: Connection| -> DomainResult<Option<User>> {
            conn.query_row(
                "SELECT user_id, username, role, password_hash, active, created_at, updated_at FROM users WHERE user_id = ?1",
                params![id.to_string()],
                |row| row_to_user(row),
            )
            .optional()
            .map_err(DomainError::from)
        })
    }

    async fn find_by_username(
        &self,
        username: &str,
        _cancel: &CancellationToken,
    ) -> DomainResult<Option<User>> {
        let username = username.to_string();
        blocking!(self.pool, move |conn: Connection| -> DomainResult<Option<User>> {
            conn.query_row(
                "SELECT user_id, username, role, password_hash, active, created_at, updated_at FROM users WHERE username = ?1",
                params![username],
                |row| row_to_user(row),
            )
            .optional()
            .map_err(DomainError::from)
        })
    }
}

#[async_trait]
impl ClientPcRepository for SqliteRepositories {
    async fn save(&self, pc: &ClientPc, _cancel: &CancellationToken) -> DomainResult<()> {
        let pc = pc.clone();
        let status_str = match pc.connection_status {
            ConnectionStatus::Online => "ONLINE",
            ConnectionStatus::Offline => "OFFLINE",
            ConnectionStatus::Connecting => "CONNECTING",
        };
        blocking!(self.pool, move |conn: Connection| -> DomainResult<()> {
            let exists = row_exists(&conn, "client_pcs", "pc_id", &pc.pc_id.to_string())
                .map_err(DomainError::from)?;
            if exists {
                conn.execute(
                    "UPDATE client_pcs SET identifier=?2, ip=?3, owner_user_id=?4, connection_status=?5, last_seen_at=?6, updated_at=?7 WHERE pc_id=?1",
                    params![
                        pc.pc_id.to_string(),
                        pc.identifier,
                        pc.ip,
                        pc.owner_user_id.to_string(),
                        status_str,
                        pc.last_seen_at.map(|d| d.to_rfc3339()),
                        pc.updated_at.to_rfc3339(),
                    ],
                )
                .map_err(map_write_err)?;
            } else {
                conn.execute(
                    "INSERT INTO client_pcs (pc_id, identifier, ip, owner_user_id, connection_status, registered_at, last_seen_at, created_at, updated_at) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
                    params![
                        pc.pc_id.to_string(),
                        pc.identifier,
                        pc.ip,
                        pc.owner_user_id.to_string(),
                        status_str,
                        pc.registered_at.to_rfc3339(),
                        pc.last_seen_at.map(|d| d.to_rfc3339()),
                        pc.created_at.to_rfc3339(),
                        pc.updated_at.to_rfc3339(),
                    ],
                )
                .map_err(map_write_err)?;
            }
            Ok(())
        })
    }

    async fn find_by_id(&self, id: Uuid, _cancel: &CancellationToken) -> DomainResult<Option<ClientPc>> {
        blocking!(self.pool, move |conn: Connection| -> DomainResult<Option<ClientPc>> {
            conn.query_row(
                "SELECT pc_id, identifier, ip, owner_user_id, connection_status, registered_at, last_seen_at, created_at, updated_at FROM client_pcs WHERE pc_id = ?1",
                params![id.to_string()],
                |row| row_to_client_pc(row),
            )
            .optional()
            .map_err(DomainError::from)
        })
    }

    async fn find_by_identifier_and_owner(
        &self,
        identifier: &str,
        owner_user_id: Uuid,
        _cancel: &CancellationToken,
    ) -> DomainResult<Option<ClientPc>> {
        let identifier = identifier.to_string();
        blocking!(self.pool, move |conn: Connection| -> DomainResult<Option<ClientPc>> {
            conn.query_row(
                "SELECT pc_id, identifier, ip, owner_user_id, connection_status, registered_at, last_seen_at, created_at, updated_at FROM client_pcs WHERE identifier = ?1 AND owner_user_id = ?2",
                params![identifier, owner_user_id.to_string()],
                |row| row_to_client_pc(row),
            )
            .optional()
            .map_err(DomainError::from)
        })
    }

    async fn find_all(&self, _cancel: &CancellationToken) -> DomainResult<Vec<ClientPc>> {
        blocking!(self.pool, move |conn: Connection| -> DomainResult<Vec<ClientPc>> {
            let mut stmt = conn
                .prepare("SELECT pc_id, identifier, ip, owner_user_id, connection_status, registered_at, last_seen_at, created_at, updated_at FROM client_pcs")
                .map_err(DomainError::from)?;
            let rows = stmt
                .query_map([], |row| row_to_client_pc(row))
                .map_err(DomainError::from)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(DomainError::from)?;
            Ok(rows)
        })
    }

    async fn find_online(&self, _cancel: &CancellationToken) -> DomainResult<Vec<ClientPc>> {
        blocking!(self.pool, move |conn: Connection| -> DomainResult<Vec<ClientPc>> {
            let mut stmt = conn
                .prepare("SELECT pc_id, identifier, ip, owner_user_id, connection_status, registered_at, last_seen_at, created_at, updated_at FROM client_pcs WHERE connection_status = 'ONLINE'")
                .map_err(DomainError::from)?;
            let rows = stmt
                .query_map([], |row| row_to_client_pc(row))
                .map_err(DomainError::from)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(DomainError::from)?;
            Ok(rows)
        })
    }
}

#[async_trait]
impl SessionRepository for SqliteRepositories {
    async fn save(&self, session: &RemoteSession, _cancel: &CancellationToken) -> DomainResult<()> {
        let session = session.clone();
        blocking!(self.pool, move |conn: Connection| -> DomainResult<()> {
            let exists = row_exists(&conn, "remote_sessions", "session_id", &session.session_id.to_string())
                .map_err(DomainError::from)?;
            if exists {
                conn.execute(
                    "UPDATE remote_sessions SET start_time=?2, end_time=?3, status=?4, session_video_id=?5, updated_at=?6 WHERE session_id=?1",
                    params![
                        session.session_id.to_string(),
                        session.start_time.map(|d| d.to_rfc3339()),
                        session.end_time.map(|d| d.to_rfc3339()),
                        status_to_str(session.status),
                        session.session_video_id.map(|id| id.to_string()),
                        session.updated_at.to_rfc3339(),
                    ],
                )
                .map_err(map_write_err)?;
            } else {
                conn.execute(
                    "INSERT INTO remote_sessions (session_id, admin_user_id, client_pc_id, start_time, end_time, status, session_video_id, created_at, updated_at) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
                    params![
                        session.session_id.to_string(),
                        session.admin_user_id.to_string(),
                        session.client_pc_id.to_string(),
                        session.start_time.map(|d| d.to_rfc3339()),
                        session.end_time.map(|d| d.to_rfc3339()),
                        status_to_str(session.status),
                        session.session_video_id.map(|id| id.to_string()),
                        session.created_at.to_rfc3339(),
                        session.updated_at.to_rfc3339(),
                    ],
                )
                .map_err(map_write_err)?;
            }
            Ok(())
        })
    }

    async fn find_by_id(
        &self,
        id: Uuid,
        _cancel: &CancellationToken,
    ) -> DomainResult<Option<RemoteSession>> {
        blocking!(self.pool, move |conn: Connection| -> DomainResult<Option<RemoteSession>> {
            conn.query_row(
                "SELECT session_id, admin_user_id, client_pc_id, start_time, end_time, status, session_video_id, created_at, updated_at FROM remote_sessions WHERE session_id = ?1",
                params![id.to_string()],
                |row| row_to_session(row),
            )
            .optional()
            .map_err(DomainError::from)
        })
    }

    async fn find_active_per_client_pc(
        &self,
        client_pc_id: Uuid,
        _cancel: &CancellationToken,
    ) -> DomainResult<Vec<RemoteSession>> {
        blocking!(self.pool, move |conn: Connection| -> DomainResult<Vec<RemoteSession>> {
            let mut stmt = conn
                .prepare("SELECT session_id, admin_user_id, client_pc_id, start_time, end_time, status, session_video_id, created_at, updated_at FROM remote_sessions WHERE client_pc_id = ?1 AND status IN ('PENDING_APPROVAL', 'ACTIVE')")
                .map_err(DomainError::from)?;
            let rows = stmt
                .query_map(params![client_pc_id.to_string()], |row| row_to_session(row))
                .map_err(DomainError::from)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(DomainError::from)?;
            Ok(rows)
        })
    }

    async fn find_by_admin(
        &self,
        admin_user_id: Uuid,
        _cancel: &CancellationToken,
    ) -> DomainResult<Vec<RemoteSession>> {
        blocking!(self.pool, move |conn: Connection| -> DomainResult<Vec<RemoteSession>> {
            let mut stmt = conn
                .prepare("SELECT session_id, admin_user_id, client_pc_id, start_time, end_time, status, session_video_id, created_at, updated_at FROM remote_sessions WHERE admin_user_id = ?1 ORDER BY created_at DESC")
                .map_err(DomainError::from)?;
            let rows = stmt
                .query_map(params![admin_user_id.to_string()], |row| row_to_session(row))
                .map_err(DomainError::from)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(DomainError::from)?;
            Ok(rows)
        })
    }

    async fn find_active(&self, _cancel: &CancellationToken) -> DomainResult<Vec<RemoteSession>> {
        blocking!(self.pool, move |conn: Connection| -> DomainResult<Vec<RemoteSession>> {
            let mut stmt = conn
                .prepare("SELECT session_id, admin_user_id, client_pc_id, start_time, end_time, status, session_video_id, created_at, updated_at FROM remote_sessions WHERE status = 'ACTIVE'")
                .map_err(DomainError::from)?;
            let rows = stmt
                .query_map([], |row| row_to_session(row))
                .map_err(DomainError::from)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(DomainError::from)?;
            Ok(rows)
        })
    }

    async fn find_rejected_older_than(
        &self,
        cutoff: DateTime<Utc>,
        _cancel: &CancellationToken,
    ) -> DomainResult<Vec<RemoteSession>> {
        blocking!(self.pool, move |conn: Connection| -> DomainResult<Vec<RemoteSession>> {
            let mut stmt = conn
                .prepare("SELECT session_id, admin_user_id, client_pc_id, start_time, end_time, status, session_video_id, created_at, updated_at FROM remote_sessions WHERE status = 'REJECTED' AND updated_at < ?1")
                .map_err(DomainError::from)?;
            let rows = stmt
                .query_map(params![cutoff.to_rfc3339()], |row| row_to_session(row))
                .map_err(DomainError::from)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(DomainError::from)?;
            Ok(rows)
        })
    }

    async fn delete(&self, id: Uuid, _cancel: &CancellationToken) -> DomainResult<()> {
        blocking!(self.pool, move |conn: Connection| -> DomainResult<()> {
            conn.execute("DELETE FROM remote_sessions WHERE session_id = ?1", params![id.to_string()])
                .map_err(DomainError::from)?;
            Ok(())
        })
    }
}

#[async_trait]
impl FileTransferRepository for SqliteRepositories {
    async fn save(&self, transfer: &FileTransfer, _cancel: &CancellationToken) -> DomainResult<()> {
        let t = transfer.clone();
        blocking!(self.pool, move |conn: Connection| -> DomainResult<()> {
            let exists = row_exists(&conn, "file_transfers", "transfer_id", &t.transfer_id.to_string())
                .map_err(DomainError::from)?;
            if exists {
                conn.execute(
                    "UPDATE file_transfers SET status=?2, error_message=?3, updated_at=?4 WHERE transfer_id=?1",
                    params![
                        t.transfer_id.to_string(),
                        transfer_status_to_str(t.status),
                        t.error_message,
                        t.updated_at.to_rfc3339(),
                    ],
                )
                .map_err(map_write_err)?;
            } else {
                conn.execute(
                    "INSERT INTO file_transfers (transfer_id, file_name, source_path_server, destination_path_client, status, associated_session_id, initiating_user_id, target_pc_id, file_size_mb, error_message, created_at, updated_at) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)",
                    params![
                        t.transfer_id.to_string(),
                        t.file_name,
                        t.source_path_server,
                        t.destination_path_client,
                        transfer_status_to_str(t.status),
                        t.associated_session_id.to_string(),
                        t.initiating_user_id.to_string(),
                        t.target_pc_id.to_string(),
                        t.file_size_mb,
                        t.error_message,
                        t.created_at.to_rfc3339(),
                        t.updated_at.to_rfc3339(),
                    ],
                )
                .map_err(map_write_err)?;
            }
            Ok(())
        })
    }

    async fn find_by_id(
        &self,
        id: Uuid,
        _cancel: &CancellationToken,
    ) -> DomainResult<Option<FileTransfer>> {
        blocking!(self.pool, move |conn: Connection| -> DomainResult<Option<FileTransfer>> {
            conn.query_row(
                "SELECT transfer_id, file_name, source_path_server, destination_path_client, status, associated_session_id, initiating_user_id, target_pc_id, file_size_mb, error_message, created_at, updated_at FROM file_transfers WHERE transfer_id = ?1",
                params![id.to_string()],
                |row| row_to_transfer(row),
            )
            .optional()
            .map_err(DomainError::from)
        })
    }

    async fn find_pending_by_target_pc(
        &self,
        target_pc_id: Uuid,
        _cancel: &CancellationToken,
    ) -> DomainResult<Vec<FileTransfer>> {
        blocking!(self.pool, move |conn: Connection| -> DomainResult<Vec<FileTransfer>> {
            let mut stmt = conn
                .prepare("SELECT transfer_id, file_name, source_path_server, destination_path_client, status, associated_session_id, initiating_user_id, target_pc_id, file_size_mb, error_message, created_at, updated_at FROM file_transfers WHERE target_pc_id = ?1 AND status = 'PENDING'")
                .map_err(DomainError::from)?;
            let rows = stmt
                .query_map(params![target_pc_id.to_string()], |row| row_to_transfer(row))
                .map_err(DomainError::from)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(DomainError::from)?;
            Ok(rows)
        })
    }

    async fn find_by_session(
        &self,
        session_id: Uuid,
        _cancel: &CancellationToken,
    ) -> DomainResult<Vec<FileTransfer>> {
        blocking!(self.pool, move |conn: Connection| -> DomainResult<Vec<FileTransfer>> {
            let mut stmt = conn
                .prepare("SELECT transfer_id, file_name, source_path_server, destination_path_client, status, associated_session_id, initiating_user_id, target_pc_id, file_size_mb, error_message, created_at, updated_at FROM file_transfers WHERE associated_session_id = ?1")
                .map_err(DomainError::from)?;
            let rows = stmt
                .query_map(params![session_id.to_string()], |row| row_to_transfer(row))
                .map_err(DomainError::from)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(DomainError::from)?;
            Ok(rows)
        })
    }

    async fn find_by_target_pc(
        &self,
        target_pc_id: Uuid,
        _cancel: &CancellationToken,
    ) -> DomainResult<Vec<FileTransfer>> {
        blocking!(self.pool, move |conn: Connection| -> DomainResult<Vec<FileTransfer>> {
            let mut stmt = conn
                .prepare("SELECT transfer_id, file_name, source_path_server, destination_path_client, status, associated_session_id, initiating_user_id, target_pc_id, file_size_mb, error_message, created_at, updated_at FROM file_transfers WHERE target_pc_id = ?1")
                .map_err(DomainError::from)?;
            let rows = stmt
                .query_map(params![target_pc_id.to_string()], |row| row_to_transfer(row))
                .map_err(DomainError::from)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(DomainError::from)?;
            Ok(rows)
        })
    }

    async fn find_pending(&self, _cancel: &CancellationToken) -> DomainResult<Vec<FileTransfer>> {
        blocking!(self.pool, move |conn: Connection| -> DomainResult<Vec<FileTransfer>> {
            let mut stmt = conn
                .prepare("SELECT transfer_id, file_name, source_path_server, destination_path_client, status, associated_session_id, initiating_user_id, target_pc_id, file_size_mb, error_message, created_at, updated_at FROM file_transfers WHERE status = 'PENDING'")
                .map_err(DomainError::from)?;
            let rows = stmt
                .query_map([], |row| row_to_transfer(row))
                .map_err(DomainError::from)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(DomainError::from)?;
            Ok(rows)
        })
    }
}

#[async_trait]
impl SessionVideoRepository for SqliteRepositories {
    async fn save(&self, video: &SessionVideo, _cancel: &CancellationToken) -> DomainResult<()> {
        let v = video.clone();
        blocking!(self.pool, move |conn: Connection| -> DomainResult<()> {
            let exists = row_exists(&conn, "session_videos", "video_id", &v.video_id.to_string())
                .map_err(DomainError::from)?;
            if exists {
                conn.execute(
                    "UPDATE session_videos SET file_path=?2, duration_seconds=?3, file_size_mb=?4, total_frames=?5, fps=?6, updated_at=?7 WHERE video_id=?1",
                    params![
                        v.video_id.to_string(),
                        v.file_path,
                        v.duration_seconds,
                        v.file_size_mb,
                        v.total_frames,
                        v.fps,
                        v.updated_at.to_rfc3339(),
                    ],
                )
                .map_err(map_write_err)?;
            } else {
                conn.execute(
                    "INSERT INTO session_videos (video_id, associated_session_id, file_path, duration_seconds, file_size_mb, total_frames, fps, recorded_at, created_at, updated_at) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
                    params![
                        v.video_id.to_string(),
                        v.associated_session_id.to_string(),
                        v.file_path,
                        v.duration_seconds,
                        v.file_size_mb,
                        v.total_frames,
                        v.fps,
                        v.recorded_at.to_rfc3339(),
                        v.created_at.to_rfc3339(),
                        v.updated_at.to_rfc3339(),
                    ],
                )
                .map_err(map_write_err)?;
            }
            Ok(())
        })
    }

    async fn find_by_id(
        &self,
        id: Uuid,
        _cancel: &CancellationToken,
    ) -> DomainResult<Option<SessionVideo>> {
        blocking!(self.pool, move |conn: Connection| -> DomainResult<Option<SessionVideo>> {
            conn.query_row(
                "SELECT video_id, associated_session_id, file_path, duration_seconds, file_size_mb, total_frames, fps, recorded_at, created_at, updated_at FROM session_videos WHERE video_id = ?1",
                params![id.to_string()],
                |row| row_to_video(row),
            )
            .optional()
            .map_err(DomainError::from)
        })
    }

    async fn find_by_session(
        &self,
        session_id: Uuid,
        _cancel: &CancellationToken,
    ) -> DomainResult<Option<SessionVideo>> {
        blocking!(self.pool, move |conn: Connection| -> DomainResult<Option<SessionVideo>> {
            conn.query_row(
                "SELECT video_id, associated_session_id, file_path, duration_seconds, file_size_mb, total_frames, fps, recorded_at, created_at, updated_at FROM session_videos WHERE associated_session_id = ?1",
                params![session_id.to_string()],
                |row| row_to_video(row),
            )
            .optional()
            .map_err(DomainError::from)
        })
    }

    async fn find_all(&self, _cancel: &CancellationToken) -> DomainResult<Vec<SessionVideo>> {
        blocking!(self.pool, move |conn: Connection| -> DomainResult<Vec<SessionVideo>> {
            let mut stmt = conn
                .prepare("SELECT video_id, associated_session_id, file_path, duration_seconds, file_size_mb, total_frames, fps, recorded_at, created_at, updated_at FROM session_videos ORDER BY recorded_at DESC")
                .map_err(DomainError::from)?;
            let rows = stmt
                .query_map([], |row| row_to_video(row))
                .map_err(DomainError::from)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(DomainError::from)?;
            Ok(rows)
        })
    }

    async fn find_by_owner(
        &self,
        owner_user_id: Uuid,
        _cancel: &CancellationToken,
    ) -> DomainResult<Vec<SessionVideo>> {
        blocking!(self.pool, move |conn: Connection| -> DomainResult<Vec<SessionVideo>> {
            let mut stmt = conn
                .prepare(
                    "SELECT sv.video_id, sv.associated_session_id, sv.file_path, sv.duration_seconds, sv.file_size_mb, sv.total_frames, sv.fps, sv.recorded_at, sv.created_at, sv.updated_at
                     FROM session_videos sv
                     JOIN remote_sessions rs ON rs.session_id = sv.associated_session_id
                     JOIN client_pcs cp ON cp.pc_id = rs.client_pc_id
                     WHERE cp.owner_user_id = ?1
                     ORDER BY sv.recorded_at DESC",
                )
                .map_err(DomainError::from)?;
            let rows = stmt
                .query_map(params![owner_user_id.to_string()], |row| row_to_video(row))
                .map_err(DomainError::from)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(DomainError::from)?;
            Ok(rows)
        })
    }
}

#[async_trait]
impl AuditLogRepository for SqliteRepositories {
    async fn record(&self, entry: &AuditLogEntry, _cancel: &CancellationToken) -> DomainResult<()> {
        let e = entry.clone();
        let detail = serde_json::to_string(&e.detail).unwrap_or_else(|_| "null".to_string());
        blocking!(self.pool, move |conn: Connection| -> DomainResult<()> {
            conn.execute(
                "INSERT INTO audit_log (entry_id, occurred_at, actor_user_id, event_kind, detail) VALUES (?1,?2,?3,?4,?5)",
                params![
                    e.entry_id.to_string(),
                    e.occurred_at.to_rfc3339(),
                    e.actor_user_id.map(|id| id.to_string()),
                    e.event_kind,
                    detail,
                ],
            )
            .map_err(map_write_err)?;
            Ok(())
        })
    }

    async fn find_recent(
        &self,
        limit: u32,
        _cancel: &CancellationToken,
    ) -> DomainResult<Vec<AuditLogEntry>> {
        blocking!(self.pool, move |conn: Connection| -> DomainResult<Vec<AuditLogEntry>> {
            let mut stmt = conn
                .prepare("SELECT entry_id, occurred_at, actor_user_id, event_kind, detail FROM audit_log ORDER BY occurred_at DESC LIMIT ?1")
                .map_err(DomainError::from)?;
            let rows = stmt
                .query_map(params![limit], |row| row_to_audit(row))
                .map_err(DomainError::from)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(DomainError::from)?;
            Ok(rows)
        })
    }
}
