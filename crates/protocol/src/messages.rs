use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Request field sets
//
// These are the fields hashed and signed into `requestBody`. Binary
// attachments (`metadata`, `chunkData`) travel as separate form parts.
// ---------------------------------------------------------------------------

/// Registers a new object with the storage node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadRequest {
    /// Hex-encoded location.
    pub file_handle: String,
    /// Encrypted object size.
    pub file_size_in_byte: u64,
    /// Number of parts that will follow.
    pub end_index: u64,
}

/// Uploads one encrypted part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadPartRequest {
    pub file_handle: String,
    /// 1-based part number.
    pub part_index: u64,
    pub end_index: u64,
}

/// Finalizes an upload, or polls its completeness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadStatusRequest {
    pub file_handle: String,
}

/// Resolves the download URL of an object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadRequest {
    #[serde(rename = "fileID")]
    pub file_id: String,
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Response to [`DownloadRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadResponse {
    pub file_download_url: String,
}

/// Response to [`UploadStatusRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadStatusResponse {
    #[serde(default)]
    pub status: String,
    /// 1-based part numbers the node has not received.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_indexes: Vec<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_index: Option<u64>,
}

impl UploadStatusResponse {
    /// True when the node reports no missing parts.
    pub fn is_complete(&self) -> bool {
        self.missing_indexes.is_empty()
    }
}
