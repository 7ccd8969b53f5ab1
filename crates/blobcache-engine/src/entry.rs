//! Core entry record and alignment arithmetic for the cache.

use serde::{Deserialize, Serialize};

use crate::digest::ContentDigest;

/// Allocation granularity of the data region. Every payload starts at a
/// 64-byte-aligned offset and its stored footprint rounds up to this size.
pub const BLOCK_SIZE: u64 = 64;

/// Page granularity of the data region. Aggregate accounting rounds the
/// block-aligned total up to whole pages.
pub const PAGE_SIZE: u64 = 4096;

/// Rounds a length up to the next 64-byte block boundary.
pub fn round_up_to_block(len: u64) -> u64 {
    len.div_ceil(BLOCK_SIZE) * BLOCK_SIZE
}

/// Rounds a length up to the next 4096-byte page boundary.
pub fn round_up_to_page(len: u64) -> u64 {
    len.div_ceil(PAGE_SIZE) * PAGE_SIZE
}

/// One cached object: digest, location in the data region, and the
/// eviction-ordering stamps. Entries are immutable once created; they are
/// removed only by eviction or trim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Content key of the payload.
    pub digest: ContentDigest,
    /// Byte offset of the payload in the data region (64-byte aligned).
    pub offset: u64,
    /// True payload size in bytes.
    pub length: u64,
    /// Generation the entry was created in.
    pub generation: u64,
    /// Monotonic insertion counter; orders entries within a generation.
    pub sequence: u64,
}

impl CacheEntry {
    /// Stored footprint: the payload length rounded up to the block boundary.
    pub fn footprint(&self) -> u64 {
        round_up_to_block(self.length)
    }

    /// End of this entry's stored footprint in the data region.
    pub fn end_offset(&self) -> u64 {
        self.offset + self.footprint()
    }
}
