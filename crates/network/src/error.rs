//! Network error types.

use cipherpart_crypto::CryptoError;
use cipherpart_protocol::ProtocolError;

/// Errors produced by the network layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("storage node returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl From<reqwest::Error> for NetworkError {
    fn from(e: reqwest::Error) -> Self {
        NetworkError::Http(e.to_string())
    }
}

impl From<serde_json::Error> for NetworkError {
    fn from(e: serde_json::Error) -> Self {
        NetworkError::Json(e.to_string())
    }
}

impl NetworkError {
    /// True for failures worth retrying: transport errors and 5xx / 429.
    pub fn is_transient(&self) -> bool {
        match self {
            NetworkError::Http(_) => true,
            NetworkError::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}
