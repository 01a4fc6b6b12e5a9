use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkedUploadStatus {
    Initialized,
    InProgress,
    AllChunksReceived,
    Assembling,
    Processing,
    Failed,
}

/// Parameters for starting a chunked upload.
#[derive(Debug, Clone, Deserialize)]
pub struct InitiateChunkedUpload {
    pub filename: String,
    pub total_size: u64,
    pub chunk_size: u64,
    pub total_chunks: u32,
}

/// Result of accepting one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChunkReceipt {
    pub uploaded_chunks: u32,
    pub total_chunks: u32,
    pub all_chunks_received: bool,
}

/// Read-only view of a chunked upload.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkedUploadSnapshot {
    pub upload_id: Uuid,
    pub filename: String,
    pub status: ChunkedUploadStatus,
    pub total_size: u64,
    pub chunk_size: u64,
    pub total_chunks: u32,
    pub uploaded_chunks: u32,
    pub received_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}
