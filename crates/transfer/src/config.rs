use cipherpart_protocol::BLOCKS_PER_PART;
use cipherpart_queue::{QueueSettings, RetryPolicy};

/// Tuning knobs of an [`Upload`](crate::Upload).
#[derive(Debug, Clone, PartialEq)]
pub struct UploadConfig {
    /// Per-block encryption queue.
    pub crypto: QueueSettings,
    /// Per-part upload queue.
    pub network: QueueSettings,
    /// Backoff applied to every part upload.
    pub retry: RetryPolicy,
    /// Writes buffered between the sink and the part accumulator.
    pub write_buffer: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            crypto: QueueSettings::unbounded(1),
            network: QueueSettings::unbounded(3),
            retry: RetryPolicy::default(),
            write_buffer: 16,
        }
    }
}

/// Tuning knobs of a [`Download`](crate::Download).
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadConfig {
    /// Per-part ranged fetch queue.
    ///
    /// Fetches are not driven by stream reads: parts are prefetched ahead
    /// of the reader, and the tolerance caps how many fetched parts may
    /// wait for decryption and delivery.
    pub network: QueueSettings,
    /// Per-block decryption queue.
    pub crypto: QueueSettings,
    /// Backoff applied to ranged fetches; `None` fails on the first error.
    pub retry: Option<RetryPolicy>,
    /// Decrypted blocks buffered ahead of the reader.
    pub output_buffer: usize,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            network: QueueSettings::new(3, 3),
            crypto: QueueSettings::unbounded(BLOCKS_PER_PART as usize),
            retry: None,
            output_buffer: BLOCKS_PER_PART as usize,
        }
    }
}
