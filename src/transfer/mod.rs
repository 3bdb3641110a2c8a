//! Server-to-client file transfer bookkeeping and chunk streaming. The
//! service holds the hubs directly (unlike the session service, nothing
//! downstream of a transfer needs to call back into session logic, so there's
//! no cycle to route around with a callback slot) and drives the whole
//! request-then-chunks sequence itself once a target channel is live.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use crate::audit::AuditLog;
use crate::domain::{FileTransfer, TransferStatus};
use crate::error::{DomainError, DomainResult};
use crate::hub::Hubs;
use crate::protocol::{total_chunks, FileChunk, FileTransferRequest, CHUNK_SIZE};
use crate::repository::FileTransferRepository;

/// Inter-chunk pacing while pumping a single transfer, matching the design
/// notes' description of the client as a thin, synchronous writer that
/// can't be flooded.
const CHUNK_PACING: Duration = Duration::from_millis(10);

/// Spacing between transfers when resuming a PC's whole pending backlog on
/// reconnect, so a burst of queued sends doesn't compete with the PC's
/// first post-reconnect heartbeats.
const RESUME_PACING: Duration = Duration::from_millis(2000);

pub struct FileTransferService {
    transfers: Arc<dyn FileTransferRepository>,
    audit: Arc<AuditLog>,
    hubs: Hubs,
}

impl FileTransferService {
    pub fn new(transfers: Arc<dyn FileTransferRepository>, audit: Arc<AuditLog>, hubs: Hubs) -> Self {
        FileTransferService { transfers, audit, hubs }
    }

    /// Creates a `PENDING` transfer record for a file the operator is
    /// pushing to a client PC. The router picks this up and starts pumping
    /// chunks once the target channel is ready.
    #[allow(clippy::too_many_arguments)]
    pub async fn initiate_server_to_client_transfer(
        &self,
        file_name: String,
        source_path_server: String,
        destination_path_client: String,
        associated_session_id: Uuid,
        initiating_user_id: Uuid,
        target_pc_id: Uuid,
        file_size_bytes: u64,
        cancel: &CancellationToken,
    ) -> DomainResult<FileTransfer> {
        let file_size_mb = file_size_bytes as f64 / (1024.0 * 1024.0);
        let transfer = FileTransfer::new(
            file_name,
            source_path_server,
            destination_path_client,
            associated_session_id,
            initiating_user_id,
            target_pc_id,
            file_size_mb,
        );
        self.transfers.save(&transfer, cancel).await?;
        self.audit.record_best_effort(
            "file_transfer_initiated",
            Some(initiating_user_id),
            json!({
                "transfer_id": transfer.transfer_id,
                "target_pc_id": target_pc_id,
                "total_chunks": total_chunks(file_size_bytes),
            }),
        );
        Ok(transfer)
    }

    pub async fn mark_in_progress(&self, transfer_id: Uuid, cancel: &CancellationToken) -> DomainResult<FileTransfer> {
        self.transition(transfer_id, TransferStatus::InProgress, cancel).await
    }

    /// Only a client acknowledgement can reach a terminal status — the
    /// server-side chunk pump finishing does not, by itself, mean the
    /// client actually wrote the file to disk.
    pub async fn mark_completed_by_client_ack(&self, transfer_id: Uuid, cancel: &CancellationToken) -> DomainResult<FileTransfer> {
        self.transition(transfer_id, TransferStatus::Completed, cancel).await
    }

    pub async fn mark_failed_by_client_ack(
        &self,
        transfer_id: Uuid,
        error_message: String,
        cancel: &CancellationToken,
    ) -> DomainResult<FileTransfer> {
        self.mark_failed(transfer_id, error_message, cancel).await
    }

    /// Marks a transfer `FAILED` with a reason, for any source (a client
    /// ack, or the pump itself giving up mid-stream). `Pending` is a valid
    /// starting point too — a target that never came online fails before
    /// ever reaching `IN_PROGRESS`.
    pub async fn mark_failed(&self, transfer_id: Uuid, error_message: String, cancel: &CancellationToken) -> DomainResult<FileTransfer> {
        let mut transfer = self
            .transfers
            .find_by_id(transfer_id, cancel)
            .await?
            .ok_or_else(|| DomainError::not_found("FileTransfer", transfer_id.to_string()))?;
        transfer.fail(error_message)?;
        self.transfers.save(&transfer, cancel).await?;
        Ok(transfer)
    }

    /// Drives one transfer from `PENDING` to the end of the chunk stream:
    /// sends the `file_transfer_request`, reads the source file, and pumps
    /// it in `CHUNK_SIZE` pieces. Leaves the record `PENDING` untouched if
    /// the target isn't connected — a later reconnect resumes it. Never
    /// marks the transfer `COMPLETED` itself; only the client's own ack
    /// does that.
    pub async fn drive_transfer(&self, transfer_id: Uuid, cancel: &CancellationToken) -> DomainResult<()> {
        let transfer = self
            .transfers
            .find_by_id(transfer_id, cancel)
            .await?
            .ok_or_else(|| DomainError::not_found("FileTransfer", transfer_id.to_string()))?;

        if transfer.status != TransferStatus::Pending {
            return Ok(());
        }
        if !self.hubs.clients.is_connected(transfer.target_pc_id).await {
            return Ok(());
        }

        let total = total_chunks((transfer.file_size_mb * 1024.0 * 1024.0) as u64);
        let request = FileTransferRequest {
            transfer_id: transfer.transfer_id,
            session_id: transfer.associated_session_id,
            file_name: transfer.file_name.clone(),
            file_size: (transfer.file_size_mb * 1024.0 * 1024.0) as u64,
            total_chunks: total,
            destination_path: transfer.destination_path_client.clone(),
            timestamp: Utc::now(),
        };
        if self
            .hubs
            .clients
            .send_to(transfer.target_pc_id, "file_transfer_request", request)
            .await
            .is_err()
        {
            self.mark_failed(transfer_id, "target pc channel unavailable".into(), cancel).await?;
            return Ok(());
        }

        self.mark_in_progress(transfer_id, cancel).await?;

        let bytes = match tokio::fs::read(&transfer.source_path_server).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(transfer_id = %transfer_id, error = %err, "failed to read source file for transfer");
                self.mark_failed(transfer_id, format!("failed to read source file: {err}"), cancel).await?;
                return Ok(());
            }
        };

        let chunks: Vec<&[u8]> = bytes.chunks(CHUNK_SIZE).collect();
        let chunk_count = chunks.len().max(1) as u32;
        for (index, chunk) in chunks.iter().enumerate() {
            let payload = FileChunk {
                transfer_id: transfer.transfer_id,
                session_id: transfer.associated_session_id,
                chunk_index: index as u32,
                total_chunks: chunk_count,
                chunk_data: BASE64.encode(chunk),
                is_last_chunk: index as u32 + 1 == chunk_count,
                chunk_size: chunk.len(),
                timestamp: Utc::now(),
            };
            if self.hubs.clients.send_to(transfer.target_pc_id, "file_chunk", payload).await.is_err() {
                self.mark_failed(transfer_id, "target pc disconnected mid-transfer".into(), cancel).await?;
                return Ok(());
            }
            tokio::time::sleep(CHUNK_PACING).await;
        }

        Ok(())
    }

    /// Replays every transfer left `PENDING` against a PC that just came
    /// back online, one at a time with pacing between them, rather than
    /// firing the whole backlog at once.
    pub async fn resume_pending_for_pc(&self, target_pc_id: Uuid, cancel: &CancellationToken) -> DomainResult<()> {
        let pending = self.pending_for_reconnect(target_pc_id, cancel).await?;
        for transfer in pending {
            if let Err(err) = self.drive_transfer(transfer.transfer_id, cancel).await {
                warn!(transfer_id = %transfer.transfer_id, error = %err, "failed to resume pending transfer");
            }
            tokio::time::sleep(RESUME_PACING).await;
        }
        Ok(())
    }

    async fn transition(&self, transfer_id: Uuid, next: TransferStatus, cancel: &CancellationToken) -> DomainResult<FileTransfer> {
        let mut transfer = self
            .transfers
            .find_by_id(transfer_id, cancel)
            .await?
            .ok_or_else(|| DomainError::not_found("FileTransfer", transfer_id.to_string()))?;
        transfer.transition(next)?;
        self.transfers.save(&transfer, cancel).await?;
        Ok(transfer)
    }

    /// Transfers left `PENDING` for a PC that just came back online —
    /// reconnect drives these through the pump again rather than asking the
    /// operator to resubmit.
    pub async fn pending_for_reconnect(&self, target_pc_id: Uuid, cancel: &CancellationToken) -> DomainResult<Vec<FileTransfer>> {
        self.transfers.find_pending_by_target_pc(target_pc_id, cancel).await
    }

    pub async fn by_session(&self, session_id: Uuid, cancel: &CancellationToken) -> DomainResult<Vec<FileTransfer>> {
        self.transfers.find_by_session(session_id, cancel).await
    }

    pub async fn by_target_pc(&self, target_pc_id: Uuid, cancel: &CancellationToken) -> DomainResult<Vec<FileTransfer>> {
        self.transfers.find_by_target_pc(target_pc_id, cancel).await
    }

    pub async fn all_pending(&self, cancel: &CancellationToken) -> DomainResult<Vec<FileTransfer>> {
        self.transfers.find_pending(cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeTransfers {
        rows: Mutex<HashMap<Uuid, FileTransfer>>,
    }

    #[async_trait]
    impl FileTransferRepository for FakeTransfers {
        async fn save(&self, t: &FileTransfer, _c: &CancellationToken) -> DomainResult<()> {
            self.rows.lock().unwrap().insert(t.transfer_id, t.clone());
            Ok(())
        }
        async fn find_by_id(&self, id: Uuid, _c: &CancellationToken) -> DomainResult<Option<FileTransfer>> {
            Ok(self.rows.lock().unwrap().get(&id).cloned())
        }
        async fn find_pending_by_target_pc(&self, pc_id: Uuid, _c: &CancellationToken) -> DomainResult<Vec<FileTransfer>> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .values()
                .filter(|t| t.target_pc_id == pc_id && t.status == TransferStatus::Pending)
                .cloned()
                .collect())
        }
        async fn find_by_session(&self, session_id: Uuid, _c: &CancellationToken) -> DomainResult<Vec<FileTransfer>> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .values()
                .filter(|t| t.associated_session_id == session_id)
                .cloned()
                .collect())
        }
        async fn find_by_target_pc(&self, pc_id: Uuid, _c: &CancellationToken) -> DomainResult<Vec<FileTransfer>> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .values()
                .filter(|t| t.target_pc_id == pc_id)
                .cloned()
                .collect())
        }
        async fn find_pending(&self, _c: &CancellationToken) -> DomainResult<Vec<FileTransfer>> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .values()
                .filter(|t| t.status == TransferStatus::Pending)
                .cloned()
                .collect())
        }
    }

    fn service() -> FileTransferService {
        use crate::domain::AuditLogEntry;
        use crate::repository::AuditLogRepository;

        struct NullAuditRepo;
        #[async_trait]
        impl AuditLogRepository for NullAuditRepo {
            async fn record(&self, _e: &AuditLogEntry, _c: &CancellationToken) -> DomainResult<()> {
                Ok(())
            }
            async fn find_recent(&self, _l: u32, _c: &CancellationToken) -> DomainResult<Vec<AuditLogEntry>> {
                Ok(vec![])
            }
        }
        FileTransferService::new(
            Arc::new(FakeTransfers::default()),
            Arc::new(AuditLog::new(Arc::new(NullAuditRepo))),
            Hubs::new(),
        )
    }

    #[tokio::test]
    async fn full_happy_path_reaches_completed_only_via_client_ack() {
        let svc = service();
        let cancel = CancellationToken::new();
        let session_id = Uuid::new_v4();
        let target_pc_id = Uuid::new_v4();

        let transfer = svc
            .initiate_server_to_client_transfer(
                "report.pdf".into(),
                "/srv/report.pdf".into(),
                "C:/report.pdf".into(),
                session_id,
                Uuid::new_v4(),
                target_pc_id,
                130 * 1024,
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(transfer.status, TransferStatus::Pending);

        svc.mark_in_progress(transfer.transfer_id, &cancel).await.unwrap();
        let completed = svc.mark_completed_by_client_ack(transfer.transfer_id, &cancel).await.unwrap();
        assert_eq!(completed.status, TransferStatus::Completed);
    }

    #[tokio::test]
    async fn failed_ack_records_error_message() {
        let svc = service();
        let cancel = CancellationToken::new();

        let transfer = svc
            .initiate_server_to_client_transfer(
                "report.pdf".into(),
                "/srv/report.pdf".into(),
                "C:/report.pdf".into(),
                Uuid::new_v4(),
                Uuid::new_v4(),
                Uuid::new_v4(),
                4096,
                &cancel,
            )
            .await
            .unwrap();

        svc.mark_in_progress(transfer.transfer_id, &cancel).await.unwrap();
        let failed = svc
            .mark_failed_by_client_ack(transfer.transfer_id, "disk full".into(), &cancel)
            .await
            .unwrap();
        assert_eq!(failed.status, TransferStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("disk full"));
    }

    #[tokio::test]
    async fn pending_for_reconnect_only_returns_pending_rows() {
        let svc = service();
        let cancel = CancellationToken::new();
        let target_pc_id = Uuid::new_v4();

        let t1 = svc
            .initiate_server_to_client_transfer(
                "a.txt".into(), "/srv/a".into(), "C:/a".into(), Uuid::new_v4(), Uuid::new_v4(), target_pc_id, 10, &cancel,
            )
            .await
            .unwrap();
        let t2 = svc
            .initiate_server_to_client_transfer(
                "b.txt".into(), "/srv/b".into(), "C:/b".into(), Uuid::new_v4(), Uuid::new_v4(), target_pc_id, 10, &cancel,
            )
            .await
            .unwrap();
        svc.mark_in_progress(t2.transfer_id, &cancel).await.unwrap();

        let pending = svc.pending_for_reconnect(target_pc_id, &cancel).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].transfer_id, t1.transfer_id);
    }

    #[tokio::test]
    async fn drive_transfer_leaves_pending_when_target_not_connected() {
        let svc = service();
        let cancel = CancellationToken::new();
        let target_pc_id = Uuid::new_v4();

        let transfer = svc
            .initiate_server_to_client_transfer(
                "a.txt".into(), "/srv/a".into(), "C:/a".into(), Uuid::new_v4(), Uuid::new_v4(), target_pc_id, 10, &cancel,
            )
            .await
            .unwrap();

        svc.drive_transfer(transfer.transfer_id, &cancel).await.unwrap();
        let reloaded = svc.transfers.find_by_id(transfer.transfer_id, &cancel).await.unwrap().unwrap();
        assert_eq!(reloaded.status, TransferStatus::Pending);
    }

    #[tokio::test]
    async fn drive_transfer_streams_request_then_chunks_and_stays_in_progress() {
        let svc = service();
        let cancel = CancellationToken::new();
        let target_pc_id = Uuid::new_v4();

        let path = std::env::temp_dir().join(format!("transfer_test_{}.bin", Uuid::new_v4()));
        std::fs::write(&path, vec![7u8; CHUNK_SIZE + 10]).unwrap();

        let transfer = svc
            .initiate_server_to_client_transfer(
                "blob.bin".into(),
                path.to_string_lossy().into_owned(),
                "C:/blob.bin".into(),
                Uuid::new_v4(),
                Uuid::new_v4(),
                target_pc_id,
                (CHUNK_SIZE + 10) as u64,
                &cancel,
            )
            .await
            .unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::channel(32);
        svc.hubs.clients.register(target_pc_id, crate::hub::ChannelHandle::new(tx)).await;

        svc.drive_transfer(transfer.transfer_id, &cancel).await.unwrap();

        let reloaded = svc.transfers.find_by_id(transfer.transfer_id, &cancel).await.unwrap().unwrap();
        assert_eq!(reloaded.status, TransferStatus::InProgress);

        let request_envelope = rx.recv().await.unwrap();
        assert_eq!(request_envelope.kind, "file_transfer_request");

        let first_chunk = rx.recv().await.unwrap();
        assert_eq!(first_chunk.kind, "file_chunk");
        let second_chunk = rx.recv().await.unwrap();
        assert_eq!(second_chunk.kind, "file_chunk");

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn drive_transfer_fails_when_request_send_fails() {
        let svc = service();
        let cancel = CancellationToken::new();
        let target_pc_id = Uuid::new_v4();

        let transfer = svc
            .initiate_server_to_client_transfer(
                "a.txt".into(), "/srv/a".into(), "C:/a".into(), Uuid::new_v4(), Uuid::new_v4(), target_pc_id, 10, &cancel,
            )
            .await
            .unwrap();

        let (tx, rx) = tokio::sync::mpsc::channel(1);
        drop(rx);
        svc.hubs.clients.register(target_pc_id, crate::hub::ChannelHandle::new(tx)).await;

        svc.drive_transfer(transfer.transfer_id, &cancel).await.unwrap();
        let reloaded = svc.transfers.find_by_id(transfer.transfer_id, &cancel).await.unwrap().unwrap();
        assert_eq!(reloaded.status, TransferStatus::Failed);
    }
}
