//! Per-channel message dispatch: given one decoded [`Envelope`] and the
//! identity already established on that channel, decide what to do and
//! reply. Socket I/O itself lives in `http::ws`; this module only knows
//! about envelopes and domain services, which is what makes it testable
//! with `tokio::sync::mpsc` stand-ins instead of real sockets.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use crate::domain::ConnectionStatus;
use crate::error::DomainError;
use crate::hub::Hubs;
use crate::protocol::{
    Envelope, FileTransferAck, Heartbeat, HeartbeatResponse, InputCommand, PcRegistrationRequest,
    PcRegistrationResponse, ScreenFrame, SessionAccepted, SessionRejected, VideoChunkUpload,
    VideoFrameUpload, VideoRecordingComplete,
};
use crate::recorder::FrameRecorder;
use crate::repository::ClientPcRepository;
use crate::session::SessionService;
use crate::transfer::FileTransferService;

/// An operator's identity once authenticated on the channel, carried by the
/// websocket task for the life of the connection.
#[derive(Clone, Copy)]
pub struct OperatorIdentity {
    pub user_id: Uuid,
}

/// A client PC's identity once authenticated and registered on the channel.
#[derive(Clone, Copy)]
pub struct ClientIdentity {
    pub pc_id: Uuid,
    pub owner_user_id: Uuid,
}

/// Registers (or re-registers, on reconnect) a client PC and marks it
/// online. Used once per connection, right after the client authenticates.
/// The operator hub hears about it either way — a brand-new PC gets
/// `PC_REGISTERED` in addition to the connection notices every registration
/// triggers.
pub async fn register_client_pc(
    client_pcs: &Arc<dyn ClientPcRepository>,
    owner_user_id: Uuid,
    request: PcRegistrationRequest,
    hubs: &Hubs,
    cancel: &CancellationToken,
) -> Result<PcRegistrationResponse, DomainError> {
    let existing = client_pcs
        .find_by_identifier_and_owner(&request.pc_identifier, owner_user_id, cancel)
        .await?;
    let is_new = existing.is_none();
    let mut pc =
        existing.unwrap_or_else(|| crate::domain::ClientPc::new(request.pc_identifier.clone(), owner_user_id, request.ip.clone()));

    pc.ip = request.ip;
    let _ = pc.set_status(ConnectionStatus::Online);
    client_pcs.save(&pc, cancel).await?;

    if is_new {
        hubs.operators.broadcast("PC_REGISTERED", &pc).await;
    }
    hubs.operators.broadcast("PC_CONNECTED", &pc).await;
    hubs.operators.broadcast("PC_STATUS_CHANGED", &pc).await;

    Ok(PcRegistrationResponse {
        success: true,
        pc_id: pc.pc_id,
    })
}

/// Dispatches one envelope received on an already-registered client
/// channel. Returns the reply envelope, if any — the caller is responsible
/// for queuing it for delivery.
pub async fn handle_client_envelope(
    sessions: &Arc<SessionService>,
    transfers: &Arc<FileTransferService>,
    recorder: &Arc<FrameRecorder>,
    client_pcs: &Arc<dyn ClientPcRepository>,
    hubs: &Hubs,
    identity: ClientIdentity,
    envelope: Envelope,
    cancel: &CancellationToken,
) -> Result<Option<Envelope>, DomainError> {
    match envelope.kind.as_str() {
        "HEARTBEAT" => {
            let _: Heartbeat = envelope.decode()?;
            if let Some(mut pc) = client_pcs.find_by_id(identity.pc_id, cancel).await? {
                let was_offline = pc.connection_status == ConnectionStatus::Offline;
                if was_offline {
                    let _ = pc.set_status(ConnectionStatus::Online);
                }
                pc.record_heartbeat();
                client_pcs.save(&pc, cancel).await?;

                if was_offline {
                    hubs.operators.broadcast("PC_STATUS_CHANGED", &pc).await;
                    let transfers = transfers.clone();
                    let pc_id = identity.pc_id;
                    tokio::spawn(async move {
                        let cancel = CancellationToken::new();
                        if let Err(err) = transfers.resume_pending_for_pc(pc_id, &cancel).await {
                            warn!(pc_id = %pc_id, error = %err, "failed to resume pending transfers after reconnect");
                        }
                    });
                }
            }
            Ok(Some(Envelope::new(
                "HEARTBEAT_RESPONSE",
                HeartbeatResponse { server_time: chrono::Utc::now() },
            )))
        }

        "session_accepted" => {
            let payload: SessionAccepted = envelope.decode()?;
            let session = sessions.accept_session(payload.session_id, cancel).await?;
            // ACTIVE isn't a terminal status, so the session service's own
            // ended-callback never fires here; the operator needs the news
            // some other way, so the router pushes it directly.
            let _ = hubs.operators.send_to(session.admin_user_id, "session_accepted", &session).await;
            Ok(None)
        }

        "session_rejected" => {
            let payload: SessionRejected = envelope.decode()?;
            sessions.reject_session(payload.session_id, cancel).await?;
            // REJECTED is terminal, so the operator is already notified via
            // the session service's `on_session_ended` callback.
            Ok(None)
        }

        "screen_frame" => {
            let frame: ScreenFrame = envelope.decode()?;
            let session = sessions.validate_streaming_permission_as_client(frame.session_id, identity.pc_id, cancel).await?;
            hubs.operators
                .send_to(session.admin_user_id, "screen_frame", &frame)
                .await?;
            Ok(None)
        }

        "video_frame_upload" => {
            let payload: VideoFrameUpload = envelope.decode()?;
            recorder
                .save_video_frame(payload.video_id, payload.frame_index, &payload.jpeg_data)
                .await?;
            Ok(None)
        }

        "video_recording_complete" => {
            let payload: VideoRecordingComplete = envelope.decode()?;
            recorder
                .finalize_video_recording(
                    payload.video_id,
                    payload.session_id,
                    payload.duration_seconds,
                    payload.total_frames,
                    payload.fps,
                )
                .await?;
            Ok(None)
        }

        "video_chunk_upload" => {
            let payload: VideoChunkUpload = envelope.decode()?;
            warn!(video_id = %payload.video_id, "legacy video_chunk_upload path used");
            recorder
                .append_legacy_chunk(payload.video_id, &payload.chunk_data, payload.is_last_chunk)
                .await?;
            Ok(None)
        }

        "file_transfer_ack" => {
            let ack: FileTransferAck = envelope.decode()?;
            match ack {
                FileTransferAck::Ready { transfer_id } => {
                    transfers.mark_in_progress(transfer_id, cancel).await?;
                }
                FileTransferAck::ChunkReceived { .. } => {}
                FileTransferAck::CompletedClient { transfer_id } => {
                    transfers.mark_completed_by_client_ack(transfer_id, cancel).await?;
                }
                FileTransferAck::FailedClient { transfer_id, error_message } => {
                    transfers.mark_failed_by_client_ack(transfer_id, error_message, cancel).await?;
                }
            }
            Ok(None)
        }

        other => Err(DomainError::Decode(format!("unknown client message type: {other}"))),
    }
}

/// Dispatches one envelope received on an already-authenticated operator
/// channel.
pub async fn handle_operator_envelope(
    sessions: &Arc<SessionService>,
    hubs: &Hubs,
    identity: OperatorIdentity,
    envelope: Envelope,
    cancel: &CancellationToken,
) -> Result<Option<Envelope>, DomainError> {
    match envelope.kind.as_str() {
        "HEARTBEAT" => {
            let _: Heartbeat = envelope.decode()?;
            Ok(Some(Envelope::new(
                "HEARTBEAT_RESPONSE",
                HeartbeatResponse { server_time: chrono::Utc::now() },
            )))
        }

        "input_command" => {
            let command: InputCommand = envelope.decode()?;
            let session = sessions
                .validate_input_command_permission(command.session_id, identity.user_id, cancel)
                .await?;
            hubs.clients
                .send_to(session.client_pc_id, "input_command", &command)
                .await?;
            Ok(None)
        }

        other => Err(DomainError::Decode(format!("unknown operator message type: {other}"))),
    }
}
