//! Crypto error types.

/// Errors produced by block crypto and account keys.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    #[error("ciphertext too short: {len} bytes")]
    CiphertextTooShort { len: usize },

    #[error("authentication tag mismatch")]
    TagMismatch,

    #[error("invalid account seed: {0}")]
    InvalidSeed(String),

    #[error("crypto failure: {0}")]
    Failure(String),
}
