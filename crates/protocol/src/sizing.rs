//! Block and part size arithmetic.
//!
//! Pure functions converting a plaintext length into block counts, part
//! counts and on-store byte spans. Both pipelines and the upload handshake
//! derive every size they send or expect from here.

use std::ops::Range;

use crate::constants::{BLOCK_OVERHEAD, BLOCK_SIZE, BLOCKS_PER_PART, PART_SIZE, PART_SIZE_ON_DISK};

/// Number of blocks needed for `size` plaintext bytes.
pub const fn number_of_blocks(size: u64) -> u64 {
    size.div_ceil(BLOCK_SIZE)
}

/// Encrypted length of `size` plaintext bytes.
pub const fn size_on_disk(size: u64) -> u64 {
    size + BLOCK_OVERHEAD * number_of_blocks(size)
}

/// Number of parts needed to store `size_on_disk` encrypted bytes.
pub const fn number_of_parts_on_disk(size_on_disk: u64) -> u64 {
    size_on_disk.div_ceil(PART_SIZE_ON_DISK)
}

/// Number of parts needed for `size` plaintext bytes.
pub const fn number_of_parts(size: u64) -> u64 {
    number_of_parts_on_disk(size_on_disk(size))
}

/// Plaintext length of part `part` in an object of `size` bytes.
///
/// Returns 0 for parts past the end of the object.
pub const fn part_plaintext_len(part: u64, size: u64) -> u64 {
    let start = part.saturating_mul(PART_SIZE);
    if start >= size {
        return 0;
    }
    let remaining = size - start;
    if remaining < PART_SIZE {
        remaining
    } else {
        PART_SIZE
    }
}

/// Global index of the first block in `part`.
pub const fn first_block_of_part(part: u64) -> u64 {
    part * BLOCKS_PER_PART
}

/// Number of blocks in `part` for an object of `size` bytes.
pub const fn blocks_in_part(part: u64, size: u64) -> u64 {
    number_of_blocks(part_plaintext_len(part, size))
}

/// Global index of the last block in `part`, or `None` if the part is empty.
pub const fn last_block_of_part(part: u64, size: u64) -> Option<u64> {
    let count = blocks_in_part(part, size);
    if count == 0 {
        None
    } else {
        Some(first_block_of_part(part) + count - 1)
    }
}

/// Encrypted byte span of `part` within the stored object (end exclusive).
pub fn part_span_on_disk(part: u64, size: u64) -> Range<u64> {
    let total = size_on_disk(size);
    let start = part.saturating_mul(PART_SIZE_ON_DISK).min(total);
    let end = start.saturating_add(PART_SIZE_ON_DISK).min(total);
    start..end
}

/// Formats an HTTP `Range` header value for an end-exclusive span.
///
/// The span must be non-empty.
pub fn range_header(span: &Range<u64>) -> String {
    format!("bytes={}-{}", span.start, span.end.saturating_sub(1))
}

/// Summary of the sizing arithmetic for one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub size: u64,
    pub size_on_disk: u64,
    pub blocks: u64,
    pub parts: u64,
}

impl Layout {
    /// Computes the layout of an object holding `size` plaintext bytes.
    pub const fn for_size(size: u64) -> Self {
        let on_disk = size_on_disk(size);
        Self {
            size,
            size_on_disk: on_disk,
            blocks: number_of_blocks(size),
            parts: number_of_parts_on_disk(on_disk),
        }
    }
}
