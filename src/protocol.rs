//! The wire format exchanged over both duplex channels: a JSON envelope
//! `{ "type": ..., "data": ... }` per frame. This replaces the teacher's
//! length-prefixed binary `ProtocolMessage` trait with `serde_json`, the
//! framing the spec's envelope format calls for, while keeping the same
//! "one enum of message kinds, round-tripped through one function" shape
//! the teacher's `protocol.rs` uses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A single frame on the duplex channel. `data` is left as an untyped
/// [`Value`] at the envelope layer — handlers deserialize it into the
/// concrete payload they expect once they know `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, data: impl Serialize) -> Self {
        Envelope {
            kind: kind.into(),
            data: serde_json::to_value(data).unwrap_or(Value::Null),
        }
    }

    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> Result<T, crate::error::DomainError> {
        serde_json::from_value(self.data.clone())
            .map_err(|e| crate::error::DomainError::Decode(e.to_string()))
    }
}

// ---- client -> server payloads ----

#[derive(Debug, Clone, Deserialize)]
pub struct ClientAuthRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PcRegistrationRequest {
    pub pc_identifier: String,
    #[serde(default)]
    pub ip: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Heartbeat {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenFrame {
    pub session_id: Uuid,
    pub sequence_num: u64,
    /// Always base64 text, per the wire-format decision in the design notes
    /// (never raw bytes embedded in the JSON payload).
    pub frame_data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionAccepted {
    pub session_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRejected {
    pub session_id: Uuid,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoFrameUpload {
    pub video_id: Uuid,
    pub session_id: Uuid,
    pub frame_index: u32,
    pub jpeg_data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoRecordingComplete {
    pub video_id: Uuid,
    pub session_id: Uuid,
    pub total_frames: u32,
    pub fps: u32,
    pub duration_seconds: i64,
}

/// Deprecated legacy upload path (§9 design notes): base64 chunks
/// reassembled into a single MP4 rather than per-frame JPEGs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoChunkUpload {
    pub video_id: Uuid,
    pub session_id: Uuid,
    pub chunk_index: u32,
    pub is_last_chunk: bool,
    pub chunk_data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileTransferAck {
    Ready {
        transfer_id: Uuid,
    },
    ChunkReceived {
        transfer_id: Uuid,
        chunk_number: u32,
    },
    CompletedClient {
        transfer_id: Uuid,
    },
    FailedClient {
        transfer_id: Uuid,
        error_message: String,
    },
}

// ---- server -> client/operator payloads ----

#[derive(Debug, Clone, Serialize)]
pub struct ClientAuthResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PcRegistrationResponse {
    pub success: bool,
    pub pc_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatResponse {
    pub server_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoteControlRequest {
    pub session_id: Uuid,
    pub admin_username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputCommand {
    pub session_id: Uuid,
    pub event_type: String,
    pub action: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ControlSessionEnded {
    pub session_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileTransferRequest {
    pub transfer_id: Uuid,
    pub session_id: Uuid,
    pub file_name: String,
    pub file_size: u64,
    pub total_chunks: u32,
    pub destination_path: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileChunk {
    pub transfer_id: Uuid,
    pub session_id: Uuid,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub chunk_data: String,
    pub is_last_chunk: bool,
    pub chunk_size: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

pub const CHUNK_SIZE: usize = 64 * 1024;

pub fn total_chunks(file_size: u64) -> u32 {
    ((file_size + CHUNK_SIZE as u64 - 1) / CHUNK_SIZE as u64).max(1) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips_through_json() {
        let env = Envelope::new("HEARTBEAT", Heartbeat::default());
        let text = serde_json::to_string(&env).unwrap();
        let back: Envelope = serde_json::from_str(&text).unwrap();
        assert_eq!(back.kind, "HEARTBEAT");
    }

    #[test]
    fn total_chunks_rounds_up() {
        assert_eq!(total_chunks(0), 1);
        assert_eq!(total_chunks(1), 1);
        assert_eq!(total_chunks(CHUNK_SIZE as u64), 1);
        assert_eq!(total_chunks(CHUNK_SIZE as u64 + 1), 2);
        assert_eq!(total_chunks(130 * 1024), 3);
    }
}
