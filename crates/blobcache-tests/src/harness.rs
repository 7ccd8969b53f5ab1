//! Test harness: temp directories, cache construction, payload helpers.

use std::path::PathBuf;

use rand::Rng;
use tempfile::TempDir;

use blobcache_engine::{Cache, CacheConfig, CacheResult};

/// One test's working directory with conventional cache file paths.
#[derive(Debug)]
pub struct TestEnv {
    temp_dir: TempDir,
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl TestEnv {
    /// Creates a fresh temp directory for one test.
    pub fn new() -> Self {
        Self {
            temp_dir: tempfile::tempdir().expect("failed to create temp dir"),
        }
    }

    /// Path of the index file inside the temp directory.
    pub fn index_path(&self) -> PathBuf {
        self.temp_dir.path().join("cache.idx")
    }

    /// Path of the data file inside the temp directory.
    pub fn data_path(&self) -> PathBuf {
        self.temp_dir.path().join("cache.dat")
    }

    /// Creates a new cache over this environment's files.
    pub fn create_cache(&self, config: CacheConfig) -> Cache {
        Cache::create_new(self.index_path(), self.data_path(), config)
            .expect("failed to create cache")
    }

    /// Reopens the cache persisted in this environment.
    pub fn open_cache(&self) -> CacheResult<Cache> {
        Cache::open(self.index_path(), self.data_path())
    }
}

/// Initializes test logging; safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// A deterministic payload of `len` bytes, distinct per `seed`.
pub fn numbered_payload(seed: u32, len: usize) -> Vec<u8> {
    let mut payload = vec![0u8; len];
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte = (seed as usize)
            .wrapping_mul(31)
            .wrapping_add(i)
            .wrapping_rem(251) as u8;
    }
    // Stamp the seed so short payloads stay distinct too.
    let stamp = seed.to_le_bytes();
    let n = len.min(4);
    payload[..n].copy_from_slice(&stamp[..n]);
    payload
}

/// A random payload up to `max_len` bytes.
pub fn random_payload(max_len: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    let len = rng.gen_range(0..=max_len);
    (0..len).map(|_| rng.gen()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_paths_are_distinct() {
        let env = TestEnv::new();
        assert_ne!(env.index_path(), env.data_path());
        assert!(env.index_path().parent().unwrap().exists());
    }

    #[test]
    fn test_numbered_payloads_are_distinct() {
        let a = numbered_payload(1, 64);
        let b = numbered_payload(2, 64);
        assert_ne!(a, b);
        assert_eq!(a, numbered_payload(1, 64));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_numbered_payload_short_lengths() {
        assert_eq!(numbered_payload(7, 0).len(), 0);
        assert_ne!(numbered_payload(1, 3), numbered_payload(2, 3));
    }

    #[test]
    fn test_random_payload_respects_bound() {
        for _ in 0..32 {
            assert!(random_payload(100).len() <= 100);
        }
    }
}
