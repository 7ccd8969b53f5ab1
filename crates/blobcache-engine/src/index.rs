//! Fixed-capacity digest-to-entry index with dedup-on-insert.

use std::collections::HashMap;

use crate::digest::ContentDigest;
use crate::entry::CacheEntry;

/// Maps content digests to cache entries. The slot capacity is fixed at
/// construction; admission beyond it must evict first. At most one entry
/// exists per distinct digest.
#[derive(Debug)]
pub struct IndexTable {
    max_items: u32,
    entries: HashMap<ContentDigest, CacheEntry>,
}

impl IndexTable {
    /// Creates an empty table with the given slot capacity.
    pub fn new(max_items: u32) -> Self {
        Self {
            max_items,
            entries: HashMap::with_capacity(max_items as usize),
        }
    }

    /// Configured slot capacity.
    pub fn max_items(&self) -> u32 {
        self.max_items
    }

    /// Number of live entries.
    pub fn num_items(&self) -> u32 {
        self.entries.len() as u32
    }

    /// True when every slot is occupied.
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.max_items as usize
    }

    /// O(1) lookup by digest. Never touches the disk.
    pub fn try_find(&self, digest: &ContentDigest) -> Option<&CacheEntry> {
        self.entries.get(digest)
    }

    /// True if the digest is present.
    pub fn contains(&self, digest: &ContentDigest) -> bool {
        self.entries.contains_key(digest)
    }

    /// Inserts an entry, or returns the existing one unchanged if the digest
    /// is already present (the dedup path). The caller must have freed a
    /// slot beforehand when the table is full.
    pub fn insert(&mut self, entry: CacheEntry) -> &CacheEntry {
        debug_assert!(
            self.entries.len() < self.max_items as usize
                || self.entries.contains_key(&entry.digest),
            "index table overfilled"
        );
        self.entries.entry(entry.digest).or_insert(entry)
    }

    /// Removes and returns an entry. Used only by the eviction policy.
    pub fn remove(&mut self, digest: &ContentDigest) -> Option<CacheEntry> {
        self.entries.remove(digest)
    }

    /// Iterates over live entries in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values()
    }

    /// Live entries sorted by insertion sequence, for the persistence codec
    /// and for compaction.
    pub fn entries_by_sequence(&self) -> Vec<CacheEntry> {
        let mut entries: Vec<CacheEntry> = self.entries.values().copied().collect();
        entries.sort_by_key(|e| e.sequence);
        entries
    }
}
