//! Ordered concurrent transfer pipelines.
//!
//! [`Upload`] re-chunks a plaintext byte stream into parts, encrypts every
//! block on a crypto-stage [`OrderedQueue`](cipherpart_queue::OrderedQueue)
//! and posts each sealed part from a network-stage queue. [`Download`] runs
//! the same two stages the other way round: ranged part fetches feed
//! per-block decryption, and plaintext leaves in strict byte order.
//!
//! Stages are wired by bounded channels carrying `(index, payload)` pairs,
//! so memory stays bounded however fast one side runs.

mod chunked;
mod config;
mod download;
mod progress;
mod types;
mod upload;

pub use chunked::{PartAccumulator, split_blocks};
pub use config::{DownloadConfig, UploadConfig};
pub use download::{Download, DownloadStream};
pub use progress::{ProgressSnapshot, SpeedCalculator, TransferEvent};
pub use types::{TransferKind, TransferState};
pub use upload::{Upload, UploadSink};

use cipherpart_crypto::CryptoError;
use cipherpart_network::NetworkError;
use cipherpart_protocol::ProtocolError;

/// Terminal failure of a transfer session.
///
/// Cloned to every waiter on the session result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    /// Probe or handshake failed before any part moved.
    #[error("storage node unreachable: {0}")]
    Connectivity(NetworkError),

    #[error("part transfer failed: {0}")]
    Transport(NetworkError),

    #[error("crypto failure: {0}")]
    Crypto(#[from] CryptoError),

    #[error("cancelled")]
    Cancelled,

    #[error("declared {expected} bytes but received {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("invalid handle: {0}")]
    InvalidHandle(String),

    #[error("invalid metadata: {0}")]
    Metadata(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl TransferError {
    /// Classifies a handshake failure.
    pub fn connectivity(err: NetworkError) -> Self {
        Self::classify(err, Self::Connectivity)
    }

    /// Classifies a part transfer failure.
    pub fn transport(err: NetworkError) -> Self {
        Self::classify(err, Self::Transport)
    }

    fn classify(err: NetworkError, fallback: fn(NetworkError) -> Self) -> Self {
        match err {
            NetworkError::Crypto(e) => Self::Crypto(e),
            NetworkError::Protocol(e) => Self::Metadata(e.to_string()),
            NetworkError::InvalidResponse(msg) => Self::Protocol(msg),
            other => fallback(other),
        }
    }
}

impl From<std::io::Error> for TransferError {
    fn from(e: std::io::Error) -> Self {
        TransferError::Io(e.to_string())
    }
}

impl From<ProtocolError> for TransferError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::InvalidHandle(msg) => TransferError::InvalidHandle(msg),
            ProtocolError::InvalidMetadata(msg) => TransferError::Metadata(msg),
        }
    }
}
