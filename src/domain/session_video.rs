use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Points at a directory of per-frame JPEGs recorded during one session.
/// The finalization record is the single source of truth for whether a
/// recording exists at all — there is no "recording in progress" row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionVideo {
    pub video_id: Uuid,
    pub associated_session_id: Uuid,
    pub file_path: String,
    pub duration_seconds: i64,
    pub file_size_mb: f64,
    pub total_frames: u32,
    pub fps: u32,
    pub recorded_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionVideo {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        video_id: Uuid,
        associated_session_id: Uuid,
        file_path: String,
        duration_seconds: i64,
        file_size_mb: f64,
        total_frames: u32,
        fps: u32,
    ) -> Self {
        let now = Utc::now();
        SessionVideo {
            video_id,
            associated_session_id,
            file_path,
            duration_seconds,
            file_size_mb,
            total_frames,
            fps,
            recorded_at: now,
            created_at: now,
            updated_at: now,
        }
    }
}
