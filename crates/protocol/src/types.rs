use serde::{Deserialize, Serialize};

use crate::ProtocolError;
use crate::sizing::Layout;

/// Small metadata record stored encrypted next to every object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub name: String,
    pub size: u64,
    #[serde(rename = "type", default)]
    pub mime_type: String,
}

impl FileMetadata {
    pub fn new(name: impl Into<String>, size: u64, mime_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size,
            mime_type: mime_type.into(),
        }
    }

    /// Sizing layout of the object this record describes.
    pub fn layout(&self) -> Layout {
        Layout::for_size(self.size)
    }

    /// Serializes the record to the JSON bytes that get encrypted.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(self).map_err(|e| ProtocolError::InvalidMetadata(e.to_string()))
    }

    /// Parses a decrypted metadata record.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::InvalidMetadata(e.to_string()))
    }
}
