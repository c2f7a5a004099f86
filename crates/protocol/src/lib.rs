//! Wire-level definitions shared by the transfer engine.
//!
//! Covers the block/part layout constants, the pure sizing arithmetic
//! derived from them, the 128-hex-character file handle, and the field
//! sets carried by each storage node request.

pub mod constants;
pub mod handle;
pub mod messages;
pub mod sizing;
pub mod types;

pub use constants::{
    BLOCK_OVERHEAD, BLOCK_SIZE, BLOCK_SIZE_ON_DISK, BLOCKS_PER_PART, IV_LEN, KEY_LEN,
    LOCATION_LEN, PART_SIZE, PART_SIZE_ON_DISK, TAG_LEN,
};
pub use handle::FileHandle;
pub use types::FileMetadata;

/// Errors produced while parsing wire data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid handle: {0}")]
    InvalidHandle(String),

    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),
}
