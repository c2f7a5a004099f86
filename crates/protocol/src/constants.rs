/// Plaintext bytes per block.
pub const BLOCK_SIZE: u64 = 64 * 1024;

/// Authentication tag length appended to every encrypted block.
pub const TAG_LEN: usize = 16;

/// IV length appended after the tag of every encrypted block.
pub const IV_LEN: usize = 16;

/// Ciphertext bytes added to each block: tag followed by IV.
pub const BLOCK_OVERHEAD: u64 = (TAG_LEN + IV_LEN) as u64;

/// Encrypted size of a full block.
pub const BLOCK_SIZE_ON_DISK: u64 = BLOCK_SIZE + BLOCK_OVERHEAD;

/// Blocks grouped into one network part.
pub const BLOCKS_PER_PART: u64 = 80;

/// Plaintext bytes per full part.
pub const PART_SIZE: u64 = BLOCKS_PER_PART * BLOCK_SIZE;

/// Encrypted bytes per full part (5,245,440).
pub const PART_SIZE_ON_DISK: u64 = BLOCKS_PER_PART * BLOCK_SIZE_ON_DISK;

/// Length of the object location half of a handle.
pub const LOCATION_LEN: usize = 32;

/// Length of the symmetric key half of a handle.
pub const KEY_LEN: usize = 32;

// ---------------------------------------------------------------------------
// Storage node endpoints
// ---------------------------------------------------------------------------

/// Registers an object and uploads its encrypted metadata.
pub const INIT_UPLOAD_PATH: &str = "/api/v1/init-upload";

/// Uploads one encrypted part.
pub const UPLOAD_PATH: &str = "/api/v1/upload";

/// Finalizes an upload and reports missing parts.
pub const UPLOAD_STATUS_PATH: &str = "/api/v1/upload-status";

/// Resolves the short-lived download URL for a location.
pub const DOWNLOAD_PATH: &str = "/api/v1/download";

/// Suffix of the download URL serving the encrypted metadata blob.
pub const METADATA_SUFFIX: &str = "/metadata";

/// Suffix of the download URL serving the encrypted object bytes.
pub const FILE_SUFFIX: &str = "/file";

/// Upload-status value reported once every part has been received.
pub const UPLOAD_STATUS_COMPLETE: &str = "File is uploaded";
