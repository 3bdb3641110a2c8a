//! Session recording: per-frame JPEGs written under the content root, plus
//! the deprecated legacy path that reassembles base64 chunks into a single
//! MP4. [`SessionVideo`] rows are written once, at finalize time — there is
//! no "recording in progress" row to keep in sync.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::domain::SessionVideo;
use crate::error::{DomainError, DomainResult};
use crate::repository::SessionVideoRepository;

pub struct FrameRecorder {
    config: Arc<ServerConfig>,
    videos: Arc<dyn SessionVideoRepository>,
}

impl FrameRecorder {
    pub fn new(config: Arc<ServerConfig>, videos: Arc<dyn SessionVideoRepository>) -> Self {
        FrameRecorder { config, videos }
    }

    /// Writes one base64-encoded JPEG frame to
    /// `{content_root}/session_videos/{video_id}/frames/frame_{NNNNNN}.jpg`.
    pub async fn save_video_frame(&self, video_id: Uuid, frame_index: u32, jpeg_data_b64: &str) -> DomainResult<()> {
        let dir = self.config.frames_dir(video_id);
        fs::create_dir_all(&dir).await?;

        let bytes = BASE64
            .decode(jpeg_data_b64)
            .map_err(|e| DomainError::Decode(format!("invalid base64 frame data: {e}")))?;

        let path = dir.join(format!("frame_{frame_index:06}.jpg"));
        let mut file = fs::File::create(&path).await?;
        file.write_all(&bytes).await?;
        Ok(())
    }

    /// Finalizes a recording: records the frame directory as the
    /// `SessionVideo`'s `file_path` and writes the row. `total_frames` and
    /// `fps` come from the client's completion message, not a directory
    /// listing, since the client is the one authoritative source for frame
    /// count (a partial directory from a crashed upload should not silently
    /// pass as a complete recording).
    pub async fn finalize_video_recording(
        &self,
        video_id: Uuid,
        associated_session_id: Uuid,
        duration_seconds: i64,
        total_frames: u32,
        fps: u32,
    ) -> DomainResult<SessionVideo> {
        let dir = self.config.frames_dir(video_id);
        if !fs::try_exists(&dir).await.unwrap_or(false) {
            return Err(DomainError::not_found("frame directory", video_id.to_string()));
        }

        let (file_size_mb, frame_count) = directory_size_mb_and_count(&dir).await.unwrap_or((0.0, 0));
        if frame_count != total_frames {
            tracing::warn!(
                video_id = %video_id,
                expected = total_frames,
                found = frame_count,
                "recorded frame count does not match client-reported total"
            );
        }

        let video = SessionVideo::new(
            video_id,
            associated_session_id,
            dir.to_string_lossy().into_owned(),
            duration_seconds,
            file_size_mb,
            total_frames,
            fps,
        );
        let cancel = tokio_util::sync::CancellationToken::new();
        self.videos.save(&video, &cancel).await?;
        Ok(video)
    }

    /// Deprecated legacy path: base64 chunks reassembled into a single
    /// `legacy.mp4`, kept for clients that haven't moved to per-frame
    /// uploads. Never counted against the per-frame recording invariant.
    pub async fn append_legacy_chunk(&self, video_id: Uuid, chunk_data_b64: &str, is_last_chunk: bool) -> DomainResult<()> {
        let path = self.config.legacy_video_path(video_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let bytes = BASE64
            .decode(chunk_data_b64)
            .map_err(|e| DomainError::Decode(format!("invalid base64 chunk data: {e}")))?;

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(&bytes).await?;

        if is_last_chunk {
            file.flush().await?;
        }
        Ok(())
    }
}

async fn directory_size_mb_and_count(dir: &std::path::Path) -> std::io::Result<(f64, u32)> {
    let mut total: u64 = 0;
    let mut count: u32 = 0;
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if let Ok(meta) = entry.metadata().await {
            total += meta.len();
            count += 1;
        }
    }
    Ok((total as f64 / (1024.0 * 1024.0), count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    struct FakeVideos {
        saved: Mutex<Vec<SessionVideo>>,
    }

    #[async_trait]
    impl SessionVideoRepository for FakeVideos {
        async fn save(&self, v: &SessionVideo, _c: &CancellationToken) -> DomainResult<()> {
            self.saved.lock().unwrap().push(v.clone());
            Ok(())
        }
        async fn find_by_id(&self, _id: Uuid, _c: &CancellationToken) -> DomainResult<Option<SessionVideo>> {
            Ok(None)
        }
        async fn find_by_session(&self, _id: Uuid, _c: &CancellationToken) -> DomainResult<Option<SessionVideo>> {
            Ok(None)
        }
        async fn find_all(&self, _c: &CancellationToken) -> DomainResult<Vec<SessionVideo>> {
            Ok(vec![])
        }
        async fn find_by_owner(&self, _id: Uuid, _c: &CancellationToken) -> DomainResult<Vec<SessionVideo>> {
            Ok(vec![])
        }
    }

    fn temp_config() -> ServerConfig {
        let mut config = ServerConfig::default();
        config.content_root = std::env::temp_dir()
            .join(format!("recorder_test_{}", Uuid::new_v4()))
            .to_string_lossy()
            .into_owned();
        config
    }

    #[tokio::test]
    async fn save_frame_then_finalize_writes_row_with_directory_as_path() {
        let config = Arc::new(temp_config());
        let videos = Arc::new(FakeVideos::default());
        let recorder = FrameRecorder::new(config.clone(), videos.clone());

        let video_id = Uuid::new_v4();
        let session_id = Uuid::new_v4();
        let jpeg_b64 = BASE64.encode(b"not-really-a-jpeg");

        recorder.save_video_frame(video_id, 0, &jpeg_b64).await.unwrap();
        recorder.save_video_frame(video_id, 1, &jpeg_b64).await.unwrap();

        let video = recorder
            .finalize_video_recording(video_id, session_id, 2, 2, 10)
            .await
            .unwrap();

        assert_eq!(video.associated_session_id, session_id);
        assert!(video.file_path.contains("frames"));
        assert_eq!(video.total_frames, 2);
        assert_eq!(video.fps, 10);
        assert_eq!(videos.saved.lock().unwrap().len(), 1);

        let _ = std::fs::remove_dir_all(&config.content_root);
    }

    #[tokio::test]
    async fn finalize_fails_when_no_frames_were_ever_written() {
        let config = Arc::new(temp_config());
        let videos = Arc::new(FakeVideos::default());
        let recorder = FrameRecorder::new(config.clone(), videos.clone());

        let err = recorder
            .finalize_video_recording(Uuid::new_v4(), Uuid::new_v4(), 10, 5, 10)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
        assert!(videos.saved.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn legacy_chunks_append_in_order() {
        let config = Arc::new(temp_config());
        let videos = Arc::new(FakeVideos::default());
        let recorder = FrameRecorder::new(config.clone(), videos);

        let video_id = Uuid::new_v4();
        recorder.append_legacy_chunk(video_id, &BASE64.encode(b"abc"), false).await.unwrap();
        recorder.append_legacy_chunk(video_id, &BASE64.encode(b"def"), true).await.unwrap();

        let contents = std::fs::read(config.legacy_video_path(video_id)).unwrap();
        assert_eq!(contents, b"abcdef");

        let _ = std::fs::remove_dir_all(&config.content_root);
    }
}
