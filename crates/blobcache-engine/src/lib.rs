#![warn(missing_docs)]

//! blobcache engine: a disk-resident, content-addressed object cache.
//!
//! Payloads are keyed by their BLAKE3 digest and stored in an append-only,
//! 64-byte-aligned data region; a fixed-capacity index maps digests to
//! locations. Both the distinct-object count and the retained byte total are
//! bounded, with generational LRU eviction keeping the cache inside its
//! budget. The index persists to a checksummed file so the cache survives
//! process restarts; scoped views give readers zero-copy access that never
//! races with writers or trims.

pub mod arena;
pub mod cache;
pub mod checksum;
pub mod codec;
pub mod digest;
pub mod entry;
pub mod error;
pub mod eviction;
pub mod index;
pub mod maintenance;
pub mod view;

pub use arena::{ArenaStats, DataArena};
pub use cache::{Cache, CacheConfig, CacheStats, SaveReport, TrimReport};
pub use checksum::{Checksum, ChecksumAlgorithm};
pub use codec::{IndexFile, IndexHeader, INDEX_MAGIC, INDEX_VERSION};
pub use digest::{digest_of, ContentDigest};
pub use entry::{round_up_to_block, round_up_to_page, CacheEntry, BLOCK_SIZE, PAGE_SIZE};
pub use error::{CacheError, CacheResult};
pub use eviction::{EvictionPolicy, GenerationalLru};
pub use index::IndexTable;
pub use maintenance::{MaintenanceConfig, MaintenanceHandle, MaintenanceStats, MaintenanceTask};
pub use view::CacheView;
