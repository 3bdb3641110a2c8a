//! REST handlers: everything that isn't a persistent duplex channel —
//! login, PC listing, session control, recording/transfer metadata. Each
//! handler is a thin translation from HTTP to a domain service call; all
//! the actual logic lives in `session`, `transfer`, `recorder`, `auth`.

use axum::extract::{Multipart, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::auth::Claims;
use crate::error::{DomainError, ErrorKind};
use crate::http::state::AppState;

impl IntoResponse for DomainError {
    fn into_response(self) -> Response {
        let status = match self.kind() {
            ErrorKind::AuthFailed => StatusCode::UNAUTHORIZED,
            ErrorKind::Permission => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::InvalidState => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Decode => StatusCode::BAD_REQUEST,
            ErrorKind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({ "error": self.code(), "message": self.to_string() }));
        (status, body).into_response()
    }
}

type RestResult<T> = Result<Json<T>, DomainError>;

fn require_bearer(headers: &HeaderMap) -> Result<&str, DomainError> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| DomainError::AuthFailed("missing bearer token".to_string()))
}

fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<Claims, DomainError> {
    let token = require_bearer(headers)?;
    let claims = state.auth.validate_token(token)?;
    if claims.role != crate::domain::Role::Administrator {
        return Err(DomainError::Permission("administrator role required".to_string()));
    }
    Ok(claims)
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    uptime_seconds: u64,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

#[derive(Deserialize)]
pub struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    token: String,
    user: crate::domain::UserSnapshot,
}

pub async fn login(State(state): State<AppState>, Json(body): Json<LoginRequest>) -> RestResult<LoginResponse> {
    let (token, user) = state.auth.authenticate_admin(&body.username, &body.password).await?;
    Ok(Json(LoginResponse { token, user }))
}

pub async fn list_pcs(State(state): State<AppState>, headers: HeaderMap) -> RestResult<Vec<crate::domain::ClientPc>> {
    require_admin(&state, &headers)?;
    let cancel = CancellationToken::new();
    Ok(Json(state.client_pcs.find_all(&cancel).await?))
}

pub async fn list_online_pcs(State(state): State<AppState>, headers: HeaderMap) -> RestResult<Vec<crate::domain::ClientPc>> {
    require_admin(&state, &headers)?;
    let cancel = CancellationToken::new();
    Ok(Json(state.client_pcs.find_online(&cancel).await?))
}

#[derive(Deserialize)]
pub struct InitiateSessionRequest {
    client_pc_id: Uuid,
}

pub async fn initiate_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<InitiateSessionRequest>,
) -> RestResult<crate::domain::RemoteSession> {
    let claims = require_admin(&state, &headers)?;
    let cancel = CancellationToken::new();
    let session = state.sessions.initiate_session(claims.sub, body.client_pc_id, &cancel).await?;

    if let Some(pc) = state.client_pcs.find_by_id(body.client_pc_id, &cancel).await? {
        let _ = state
            .hubs
            .clients
            .send_to(
                pc.pc_id,
                "remote_control_request",
                crate::protocol::RemoteControlRequest {
                    session_id: session.session_id,
                    admin_username: claims.username.clone(),
                },
            )
            .await;
    }
    Ok(Json(session))
}

pub async fn session_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<Uuid>,
) -> RestResult<crate::domain::RemoteSession> {
    require_admin(&state, &headers)?;
    let cancel = CancellationToken::new();
    Ok(Json(state.sessions.session_or_not_found(session_id, &cancel).await?))
}

pub async fn end_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<Uuid>,
) -> RestResult<crate::domain::RemoteSession> {
    require_admin(&state, &headers)?;
    let cancel = CancellationToken::new();
    let session = state.sessions.end_session_by_admin(session_id, &cancel).await?;
    let _ = state
        .hubs
        .clients
        .send_to(
            session.client_pc_id,
            "control_session_ended",
            crate::protocol::ControlSessionEnded {
                session_id,
                reason: "ended by administrator".to_string(),
            },
        )
        .await;
    Ok(Json(session))
}

pub async fn active_sessions(State(state): State<AppState>, headers: HeaderMap) -> RestResult<Vec<crate::domain::RemoteSession>> {
    require_admin(&state, &headers)?;
    let cancel = CancellationToken::new();
    Ok(Json(state.session_repo.find_active(&cancel).await?))
}

pub async fn my_sessions(State(state): State<AppState>, headers: HeaderMap) -> RestResult<Vec<crate::domain::RemoteSession>> {
    let claims = require_admin(&state, &headers)?;
    let cancel = CancellationToken::new();
    Ok(Json(state.session_repo.find_by_admin(claims.sub, &cancel).await?))
}

#[derive(Serialize)]
pub struct RecordingMetadata {
    video_id: Uuid,
    file_path: String,
    duration_seconds: i64,
    file_size_mb: f64,
    total_frames: u32,
    fps: u32,
}

pub async fn recording_metadata(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<Uuid>,
) -> RestResult<RecordingMetadata> {
    require_admin(&state, &headers)?;
    let cancel = CancellationToken::new();
    let video = state
        .session_videos
        .find_by_session(session_id, &cancel)
        .await?
        .ok_or_else(|| DomainError::not_found("SessionVideo", session_id.to_string()))?;
    Ok(Json(RecordingMetadata {
        video_id: video.video_id,
        file_path: video.file_path,
        duration_seconds: video.duration_seconds,
        file_size_mb: video.file_size_mb,
        total_frames: video.total_frames,
        fps: video.fps,
    }))
}

pub async fn recording_frame(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((session_id, frame_number)): Path<(Uuid, u32)>,
) -> Result<Response, DomainError> {
    require_admin(&state, &headers)?;
    let cancel = CancellationToken::new();
    let video = state
        .session_videos
        .find_by_session(session_id, &cancel)
        .await?
        .ok_or_else(|| DomainError::not_found("SessionVideo", session_id.to_string()))?;
    let path = std::path::Path::new(&video.file_path).join(format!("frame_{frame_number:06}.jpg"));
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| DomainError::not_found("SessionVideoFrame", frame_number.to_string()))?;

    Ok((
        [
            (axum::http::header::CONTENT_TYPE, "image/jpeg"),
            (axum::http::header::CACHE_CONTROL, "public, max-age=3600"),
        ],
        bytes,
    )
        .into_response())
}

pub async fn all_recordings(State(state): State<AppState>, headers: HeaderMap) -> RestResult<Vec<crate::domain::SessionVideo>> {
    require_admin(&state, &headers)?;
    let cancel = CancellationToken::new();
    Ok(Json(state.session_videos.find_all(&cancel).await?))
}

pub async fn client_recordings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(_client_id): Path<Uuid>,
) -> RestResult<Vec<crate::domain::SessionVideo>> {
    let claims = require_admin(&state, &headers)?;
    let cancel = CancellationToken::new();
    Ok(Json(state.session_videos.find_by_owner(claims.sub, &cancel).await?))
}

/// The JSON-body variant of `send_file`: the operator points at a file
/// already sitting on the server's filesystem instead of uploading bytes.
#[derive(Deserialize)]
pub struct SendServerFileRequest {
    target_pc_id: Uuid,
    client_file_name: String,
    server_file_path: String,
}

/// Accepts either `multipart/form-data` (`file`, `target_pc_id`,
/// `client_file_name`) or a JSON body naming a path already on the server
/// (`target_pc_id`, `client_file_name`, `server_file_path`), per the two
/// content types the REST surface documents for this endpoint.
pub async fn send_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<Uuid>,
    body: axum::body::Bytes,
) -> RestResult<crate::domain::FileTransfer> {
    let claims = require_admin(&state, &headers)?;
    let cancel = CancellationToken::new();

    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let is_multipart = content_type.starts_with("multipart/form-data");

    let (target_pc_id, client_file_name, source_path, file_size) = if is_multipart {
        use axum::extract::FromRequest;
        let request = axum::http::Request::builder()
            .header(axum::http::header::CONTENT_TYPE, content_type)
            .body(axum::body::Body::from(body))
            .map_err(|e| DomainError::Decode(e.to_string()))?;
        let mut multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| DomainError::Decode(e.to_string()))?;

        let mut target_pc_id = None;
        let mut client_file_name = None;
        let mut file_name = String::new();
        let mut bytes = Vec::new();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| DomainError::Decode(format!("multipart error: {e}")))?
        {
            match field.name().unwrap_or_default() {
                "target_pc_id" => {
                    let text = field.text().await.map_err(|e| DomainError::Decode(e.to_string()))?;
                    target_pc_id = Some(text.parse().map_err(|_| DomainError::Decode("invalid target_pc_id".to_string()))?);
                }
                "client_file_name" => {
                    client_file_name = Some(field.text().await.map_err(|e| DomainError::Decode(e.to_string()))?);
                }
                "file" => {
                    file_name = field.file_name().unwrap_or("upload.bin").to_string();
                    bytes = field.bytes().await.map_err(|e| DomainError::Decode(e.to_string()))?.to_vec();
                }
                _ => {}
            }
        }

        let target_pc_id = target_pc_id.ok_or_else(|| DomainError::Decode("missing target_pc_id field".to_string()))?;
        let client_file_name = client_file_name.unwrap_or(file_name);

        let upload_dir = state.config.transfer_upload_dir(session_id);
        tokio::fs::create_dir_all(&upload_dir).await?;
        let source_path = upload_dir.join(&client_file_name);
        tokio::fs::write(&source_path, &bytes).await?;

        (target_pc_id, client_file_name, source_path.to_string_lossy().into_owned(), bytes.len() as u64)
    } else {
        let request: SendServerFileRequest =
            serde_json::from_slice(&body).map_err(|e| DomainError::Decode(e.to_string()))?;
        let file_size = tokio::fs::metadata(&request.server_file_path).await?.len();
        (request.target_pc_id, request.client_file_name.clone(), request.server_file_path, file_size)
    };

    let transfer = state
        .transfers
        .initiate_server_to_client_transfer(
            client_file_name.clone(),
            source_path,
            format!("C:/{client_file_name}"),
            session_id,
            claims.sub,
            target_pc_id,
            file_size,
            &cancel,
        )
        .await?;

    // The request-then-chunks sequence can take a while for a large file;
    // the handler hands the transfer off to the pump and responds with the
    // PENDING record immediately rather than blocking the HTTP response on it.
    let transfers = state.transfers.clone();
    let transfer_id = transfer.transfer_id;
    tokio::spawn(async move {
        let cancel = CancellationToken::new();
        if let Err(err) = transfers.drive_transfer(transfer_id, &cancel).await {
            tracing::warn!(transfer_id = %transfer_id, error = %err, "file transfer pump failed");
        }
    });

    Ok(Json(transfer))
}

pub async fn list_session_files(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<Uuid>,
) -> RestResult<Vec<crate::domain::FileTransfer>> {
    require_admin(&state, &headers)?;
    let cancel = CancellationToken::new();
    Ok(Json(state.transfers.by_session(session_id, &cancel).await?))
}

pub async fn transfer_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(transfer_id): Path<Uuid>,
) -> RestResult<crate::domain::FileTransfer> {
    require_admin(&state, &headers)?;
    let cancel = CancellationToken::new();
    Ok(Json(
        state
            .file_transfers
            .find_by_id(transfer_id, &cancel)
            .await?
            .ok_or_else(|| DomainError::not_found("FileTransfer", transfer_id.to_string()))?,
    ))
}

pub async fn pending_transfers(State(state): State<AppState>, headers: HeaderMap) -> RestResult<Vec<crate::domain::FileTransfer>> {
    require_admin(&state, &headers)?;
    let cancel = CancellationToken::new();
    Ok(Json(state.transfers.all_pending(&cancel).await?))
}

pub async fn client_transfers(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(client_id): Path<Uuid>,
) -> RestResult<Vec<crate::domain::FileTransfer>> {
    require_admin(&state, &headers)?;
    let cancel = CancellationToken::new();
    Ok(Json(state.transfers.by_target_pc(client_id, &cancel).await?))
}
