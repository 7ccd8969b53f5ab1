//! Scoped read views over the cache.

use parking_lot::RwLockReadGuard;

use crate::cache::CacheState;
use crate::digest::ContentDigest;
use crate::entry::CacheEntry;

/// A scoped read handle over the cache state.
///
/// While a view is held, every range returned by [`CacheView::get`] is
/// stable: eviction and trimming take the exclusive lock and therefore wait
/// for all outstanding views to drop. The view releases deterministically on
/// every exit path (it is an RAII guard), and many views may be held
/// concurrently without blocking each other.
pub struct CacheView<'a> {
    state: RwLockReadGuard<'a, CacheState>,
}

impl<'a> CacheView<'a> {
    pub(crate) fn new(state: RwLockReadGuard<'a, CacheState>) -> Self {
        Self { state }
    }

    /// Resolves a digest to its payload bytes. A miss (unknown or evicted
    /// digest) is `None`, not an error. The returned range borrows from this
    /// view and cannot outlive it.
    pub fn get(&self, digest: &ContentDigest) -> Option<&[u8]> {
        let entry = self.state.index.try_find(digest)?;
        Some(self.state.arena.read(entry.offset, entry.length))
    }

    /// True if the digest currently resolves.
    pub fn contains(&self, digest: &ContentDigest) -> bool {
        self.state.index.contains(digest)
    }

    /// Copies out the index record for a digest, if present.
    pub fn find(&self, digest: &ContentDigest) -> Option<CacheEntry> {
        self.state.index.try_find(digest).copied()
    }

    /// Number of live entries visible to this view.
    pub fn num_items(&self) -> u32 {
        self.state.index.num_items()
    }
}
