//! Re-chunking of byte streams into parts and blocks.

use bytes::{Bytes, BytesMut};

/// Stateful re-chunker turning arbitrary writes into fixed-size parts.
///
/// Partial tail data is buffered across writes. Every time the buffer
/// reaches `part_size` it is emitted with the next part index;
/// [`finish`](Self::finish) flushes whatever remains.
#[derive(Debug)]
pub struct PartAccumulator {
    part_size: usize,
    buffer: BytesMut,
    next_part: u64,
}

impl PartAccumulator {
    pub fn new(part_size: usize) -> Self {
        let part_size = part_size.max(1);
        Self {
            part_size,
            buffer: BytesMut::new(),
            next_part: 0,
        }
    }

    /// Appends `data`, returning every part completed by it.
    pub fn push(&mut self, mut data: &[u8]) -> Vec<(u64, Bytes)> {
        let mut parts = Vec::new();
        while !data.is_empty() {
            if self.buffer.is_empty() {
                self.buffer.reserve(self.part_size);
            }
            let take = (self.part_size - self.buffer.len()).min(data.len());
            self.buffer.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.buffer.len() == self.part_size {
                parts.push(self.emit());
            }
        }
        parts
    }

    /// Flushes the buffered tail, if any.
    pub fn finish(mut self) -> Option<(u64, Bytes)> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(self.emit())
        }
    }

    /// Bytes waiting for the current part to fill.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Index the next emitted part will carry.
    pub fn next_part(&self) -> u64 {
        self.next_part
    }

    fn emit(&mut self) -> (u64, Bytes) {
        let part = self.next_part;
        self.next_part += 1;
        (part, self.buffer.split().freeze())
    }
}

/// Splits `data` into consecutive pieces of `block_len` bytes (the last one
/// may be shorter) without copying.
pub fn split_blocks(data: &Bytes, block_len: usize) -> impl Iterator<Item = Bytes> + '_ {
    let block_len = block_len.max(1);
    (0..data.len())
        .step_by(block_len)
        .map(move |start| data.slice(start..(start + block_len).min(data.len())))
}
