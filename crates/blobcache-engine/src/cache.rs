//! The cache aggregate: lifecycle, admission with eviction, generation
//! rotation, trimming, and persistence.
//!
//! All mutable state lives behind one `RwLock`; every logical mutation
//! (insert-with-eviction, trim batch, generation bump) is a single exclusive
//! section. Readers take scoped [`CacheView`]s on the shared side of the
//! lock. Trim and save are async and mutually exclusive through an internal
//! maintenance mutex.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::arena::DataArena;
use crate::codec::{IndexFile, IndexHeader, INDEX_MAGIC, INDEX_VERSION};
use crate::digest::{digest_of, ContentDigest};
use crate::entry::{round_up_to_block, CacheEntry};
use crate::error::{CacheError, CacheResult};
use crate::eviction::{EvictionPolicy, GenerationalLru};
use crate::index::IndexTable;
use crate::view::CacheView;

/// Entries evicted per exclusive section during a trim. The lock is released
/// between batches so readers get a window and a dropped trim future leaves
/// a consistent, partially trimmed cache.
const TRIM_BATCH: usize = 64;

/// Sizing configuration for a cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of distinct objects retained.
    pub max_items: u32,
    /// Maximum retained bytes, measured with 64-byte block slack.
    pub capacity_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_items: 4096,
            capacity_bytes: 64 * 1024 * 1024,
        }
    }
}

impl CacheConfig {
    /// Rejects configurations the engine cannot honor.
    pub fn validate(&self) -> CacheResult<()> {
        if self.max_items == 0 {
            return Err(CacheError::InvalidConfig {
                reason: "max_items must be at least 1".to_string(),
            });
        }
        if self.capacity_bytes == 0 {
            return Err(CacheError::InvalidConfig {
                reason: "capacity_bytes must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Point-in-time counters for a cache.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CacheStats {
    /// Live entry count.
    pub num_items: u32,
    /// Configured slot capacity.
    pub max_items: u32,
    /// Sum of true payload lengths.
    pub num_bytes: u64,
    /// Payload lengths rounded to 64-byte blocks.
    pub num_bytes_with_block_slack: u64,
    /// Block-slack total rounded to whole 4096-byte pages.
    pub num_bytes_with_page_slack: u64,
    /// Configured byte capacity.
    pub capacity_bytes: u64,
    /// Current generation.
    pub generation: u64,
    /// Successful saves so far.
    pub save_count: u64,
}

/// Outcome of a [`Cache::trim`] call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TrimReport {
    /// The requested block-slack target.
    pub target_bytes_with_block_slack: u64,
    /// Entries evicted by this trim.
    pub entries_evicted: u64,
    /// True payload bytes evicted.
    pub bytes_evicted: u64,
    /// Block-slack bytes evicted.
    pub bytes_with_block_slack_evicted: u64,
    /// Block-slack total remaining after the trim.
    pub remaining_bytes_with_block_slack: u64,
}

/// Outcome of a [`Cache::save`] call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SaveReport {
    /// Live entries recorded in the index file.
    pub entries_saved: u32,
    /// Payload bytes appended to the data file by this save.
    pub data_bytes_appended: u64,
    /// Size of the written index image, trailer included.
    pub index_image_len: u64,
    /// Save counter after this save.
    pub save_count: u64,
}

/// Identity stamped at creation and preserved across reopens.
#[derive(Debug, Clone, Copy)]
struct CacheIdentity {
    uuid: [u8; 16],
    created_at_secs: u64,
}

pub(crate) struct CacheState {
    pub(crate) index: IndexTable,
    pub(crate) arena: DataArena,
    pub(crate) policy: Box<dyn EvictionPolicy>,
    pub(crate) generation: u64,
    pub(crate) next_sequence: u64,
    pub(crate) save_count: u64,
}

/// A disk-resident, content-addressed object cache.
///
/// Payloads are keyed by their BLAKE3 digest; duplicate adds resolve to the
/// existing entry. Both the entry count and the block-slack byte total are
/// bounded; admission evicts oldest-generation entries first. Dropping the
/// cache releases the file handles without saving.
pub struct Cache {
    config: CacheConfig,
    identity: CacheIdentity,
    state: RwLock<CacheState>,
    maintenance: tokio::sync::Mutex<()>,
    data_file: Mutex<File>,
    index_path: PathBuf,
    data_path: PathBuf,
}

impl Cache {
    /// Creates a new cache over the given index and data files. Fails with
    /// [`CacheError::AlreadyExists`] if either file exists and is non-empty.
    pub fn create_new(
        index_path: impl AsRef<Path>,
        data_path: impl AsRef<Path>,
        config: CacheConfig,
    ) -> CacheResult<Self> {
        config.validate()?;
        let index_path = index_path.as_ref().to_path_buf();
        let data_path = data_path.as_ref().to_path_buf();

        ensure_absent_or_empty(&index_path)?;
        ensure_absent_or_empty(&data_path)?;

        let data_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&data_path)?;
        // Reserve the index path too; the file stays empty until the first
        // save, and an empty index is rejected by open.
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&index_path)?;

        let identity = CacheIdentity {
            uuid: *uuid::Uuid::new_v4().as_bytes(),
            created_at_secs: now_secs(),
        };

        info!(
            index = %index_path.display(),
            data = %data_path.display(),
            max_items = config.max_items,
            capacity_bytes = config.capacity_bytes,
            "created cache"
        );

        Ok(Self {
            state: RwLock::new(CacheState {
                index: IndexTable::new(config.max_items),
                arena: DataArena::new(),
                policy: Box::new(GenerationalLru::new()),
                generation: 0,
                next_sequence: 0,
                save_count: 0,
            }),
            maintenance: tokio::sync::Mutex::new(()),
            data_file: Mutex::new(data_file),
            config,
            identity,
            index_path,
            data_path,
        })
    }

    /// Reopens a previously saved cache. Fails with
    /// [`CacheError::CorruptIndex`] when the index file is absent, truncated,
    /// or inconsistent with the data file; the caller should fall back to
    /// [`Cache::create_new`].
    ///
    /// Dead space left behind by evicted entries (and any data tail from a
    /// save whose index never landed) is reclaimed here by compacting the
    /// data file and republishing the index.
    pub fn open(
        index_path: impl AsRef<Path>,
        data_path: impl AsRef<Path>,
    ) -> CacheResult<Self> {
        let index_path = index_path.as_ref().to_path_buf();
        let data_path = data_path.as_ref().to_path_buf();

        let image = match fs::read(&index_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(CacheError::CorruptIndex {
                    reason: "index file is missing".to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        let index_file = IndexFile::from_bytes(&image)?;
        let header = index_file.header.clone();

        let config = CacheConfig {
            max_items: header.max_items,
            capacity_bytes: header.capacity_bytes,
        };
        if config.validate().is_err() {
            return Err(CacheError::CorruptIndex {
                reason: "header carries an unusable configuration".to_string(),
            });
        }

        let mut data_file = match OpenOptions::new().read(true).write(true).open(&data_path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(CacheError::CorruptIndex {
                    reason: "data file is missing".to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        let file_len = data_file.metadata()?.len();
        if file_len < header.data_len {
            return Err(CacheError::CorruptIndex {
                reason: format!(
                    "data file is {} bytes but the index expects {}",
                    file_len, header.data_len
                ),
            });
        }

        let mut region = vec![0u8; header.data_len as usize];
        data_file.read_exact(&mut region)?;

        let mut index = IndexTable::new(header.max_items);
        let mut policy: Box<dyn EvictionPolicy> = Box::new(GenerationalLru::new());
        for entry in &index_file.entries {
            index.insert(*entry);
            policy.on_insert(entry);
        }
        let mut arena =
            DataArena::from_loaded(region, header.num_bytes, header.num_bytes_with_block_slack);
        let mut save_count = header.save_count;

        let dead_bytes = (file_len - header.data_len) + arena.dead_bytes();
        if dead_bytes > 0 {
            let mut packed = DataArena::new();
            let mut new_index = IndexTable::new(header.max_items);
            let mut new_policy: Box<dyn EvictionPolicy> = Box::new(GenerationalLru::new());
            let mut entries = index.entries_by_sequence();
            for entry in &mut entries {
                let offset = packed.reserve(entry.length);
                packed.write(offset, arena.read(entry.offset, entry.length));
                entry.offset = offset;
                new_index.insert(*entry);
                new_policy.on_insert(entry);
            }

            write_file_atomic(&data_path, packed.read(0, packed.committed_len()))?;
            data_file = OpenOptions::new().read(true).write(true).open(&data_path)?;
            packed.mark_synced_to(packed.committed_len());

            save_count += 1;
            let fresh = IndexFile {
                header: IndexHeader {
                    save_count,
                    num_bytes: packed.num_bytes(),
                    num_bytes_with_block_slack: packed.num_bytes_with_block_slack(),
                    data_len: packed.committed_len(),
                    ..header.clone()
                },
                entries,
            };
            write_file_atomic(&index_path, &fresh.to_bytes()?)?;

            warn!(
                reclaimed_bytes = dead_bytes,
                data_len = packed.committed_len(),
                "compacted data region on open"
            );

            arena = packed;
            index = new_index;
            policy = new_policy;
        }

        info!(
            entries = index.num_items(),
            bytes = arena.num_bytes(),
            generation = header.generation,
            "opened cache"
        );

        Ok(Self {
            state: RwLock::new(CacheState {
                index,
                arena,
                policy,
                generation: header.generation,
                next_sequence: header.next_sequence,
                save_count,
            }),
            maintenance: tokio::sync::Mutex::new(()),
            data_file: Mutex::new(data_file),
            config,
            identity: CacheIdentity {
                uuid: header.cache_uuid,
                created_at_secs: header.created_at_secs,
            },
            index_path,
            data_path,
        })
    }

    /// Adds a payload and returns its digest. Adding bytes already present
    /// resolves to the existing entry without consuming space. When the
    /// cache is full, oldest-generation entries are evicted until the new
    /// payload fits; the configured bounds are never exceeded.
    pub fn add(&self, bytes: &[u8]) -> CacheResult<ContentDigest> {
        let length = bytes.len() as u64;
        let footprint = round_up_to_block(length);
        let digest = digest_of(bytes);

        let mut state = self.state.write();

        if let Some(existing) = state.index.try_find(&digest) {
            if existing.length != length {
                panic!(
                    "content digest collision on {}: stored length {}, offered {}",
                    digest, existing.length, length
                );
            }
            debug!(digest = %digest, "deduplicated payload");
            return Ok(digest);
        }

        if footprint > self.config.capacity_bytes {
            return Err(CacheError::PayloadTooLarge {
                length,
                capacity_bytes: self.config.capacity_bytes,
            });
        }

        while state.index.is_full()
            || state.arena.num_bytes_with_block_slack() + footprint > self.config.capacity_bytes
        {
            Self::evict_one(&mut state);
        }

        let offset = state.arena.reserve(length);
        state.arena.write(offset, bytes);
        let entry = CacheEntry {
            digest,
            offset,
            length,
            generation: state.generation,
            sequence: state.next_sequence,
        };
        state.next_sequence += 1;
        state.index.insert(entry);
        state.policy.on_insert(&entry);

        debug!(
            digest = %digest,
            length,
            offset,
            generation = entry.generation,
            "inserted payload"
        );
        Ok(digest)
    }

    /// Advances the generation counter and returns the new value. New
    /// entries are stamped with the current generation; rotation itself
    /// evicts nothing.
    pub fn next_generation(&self) -> u64 {
        let mut state = self.state.write();
        state.generation += 1;
        debug!(generation = state.generation, "advanced generation");
        state.generation
    }

    /// Current generation counter.
    pub fn generation(&self) -> u64 {
        self.state.read().generation
    }

    /// Live entry count.
    pub fn num_items(&self) -> u32 {
        self.state.read().index.num_items()
    }

    /// Sum of true payload lengths over live entries.
    pub fn num_bytes(&self) -> u64 {
        self.state.read().arena.num_bytes()
    }

    /// Sum of 64-byte-rounded footprints over live entries.
    pub fn num_bytes_with_block_slack(&self) -> u64 {
        self.state.read().arena.num_bytes_with_block_slack()
    }

    /// Block-slack total rounded up to whole 4096-byte pages.
    pub fn num_bytes_with_page_slack(&self) -> u64 {
        self.state.read().arena.num_bytes_with_page_slack()
    }

    /// Configured slot capacity.
    pub fn max_items(&self) -> u32 {
        self.config.max_items
    }

    /// Configured byte capacity.
    pub fn capacity_bytes(&self) -> u64 {
        self.config.capacity_bytes
    }

    /// Snapshot of all counters.
    pub fn stats(&self) -> CacheStats {
        let state = self.state.read();
        CacheStats {
            num_items: state.index.num_items(),
            max_items: self.config.max_items,
            num_bytes: state.arena.num_bytes(),
            num_bytes_with_block_slack: state.arena.num_bytes_with_block_slack(),
            num_bytes_with_page_slack: state.arena.num_bytes_with_page_slack(),
            capacity_bytes: self.config.capacity_bytes,
            generation: state.generation,
            save_count: state.save_count,
        }
    }

    /// Acquires a scoped read view. See [`CacheView`].
    pub fn lock_view(&self) -> CacheView<'_> {
        CacheView::new(self.state.read())
    }

    /// Evicts whole entries, oldest generation first (insertion order within
    /// a generation), until the block-slack total is at most `target`.
    /// Entries of the current generation go last, and only if the target is
    /// still unmet.
    ///
    /// The future is drop-safe: eviction happens in bounded batches with an
    /// await point in between, so cancelling (dropping) the future leaves a
    /// valid, partially trimmed cache.
    pub async fn trim(&self, target_bytes_with_block_slack: u64) -> CacheResult<TrimReport> {
        let _maintenance = self.maintenance.lock().await;
        let mut report = TrimReport {
            target_bytes_with_block_slack,
            ..TrimReport::default()
        };

        loop {
            let done = {
                let mut state = self.state.write();
                let mut done = false;
                for _ in 0..TRIM_BATCH {
                    if state.arena.num_bytes_with_block_slack() <= target_bytes_with_block_slack
                        || state.policy.is_empty()
                    {
                        done = true;
                        break;
                    }
                    let entry = Self::evict_one(&mut state);
                    report.entries_evicted += 1;
                    report.bytes_evicted += entry.length;
                    report.bytes_with_block_slack_evicted += entry.footprint();
                }
                report.remaining_bytes_with_block_slack =
                    state.arena.num_bytes_with_block_slack();
                done
            };
            if done {
                break;
            }
            tokio::task::yield_now().await;
        }

        debug!(
            target = target_bytes_with_block_slack,
            evicted = report.entries_evicted,
            remaining = report.remaining_bytes_with_block_slack,
            "trim complete"
        );
        Ok(report)
    }

    /// Persists the cache: appends the not-yet-durable payload tail to the
    /// data file, fsyncs it, then atomically replaces the index file. The
    /// in-memory cache stays valid and usable even when persistence fails.
    pub async fn save(&self) -> CacheResult<SaveReport> {
        let _maintenance = self.maintenance.lock().await;

        // Snapshot under the shared lock; adds racing past this point land
        // in the next save.
        let (index_file, tail_start, tail) = {
            let state = self.state.read();
            let entries = state.index.entries_by_sequence();
            let header = IndexHeader {
                magic: INDEX_MAGIC,
                version: INDEX_VERSION,
                cache_uuid: self.identity.uuid,
                created_at_secs: self.identity.created_at_secs,
                save_count: state.save_count + 1,
                max_items: self.config.max_items,
                capacity_bytes: self.config.capacity_bytes,
                generation: state.generation,
                next_sequence: state.next_sequence,
                num_entries: entries.len() as u32,
                num_bytes: state.arena.num_bytes(),
                num_bytes_with_block_slack: state.arena.num_bytes_with_block_slack(),
                data_len: state.arena.committed_len(),
            };
            let (tail_start, tail) = state.arena.dirty_tail();
            (IndexFile { header, entries }, tail_start, tail.to_vec())
        };

        // Payload durability first, so the index never references bytes the
        // data file lacks.
        {
            let mut data_file = self.data_file.lock();
            data_file.seek(SeekFrom::Start(tail_start))?;
            data_file.write_all(&tail)?;
            data_file.sync_all()?;
        }

        let image = index_file.to_bytes()?;
        write_file_atomic(&self.index_path, &image)?;

        let save_count = index_file.header.save_count;
        {
            let mut state = self.state.write();
            state.arena.mark_synced_to(tail_start + tail.len() as u64);
            state.save_count = save_count;
        }

        info!(
            entries = index_file.header.num_entries,
            data_bytes_appended = tail.len(),
            save_count,
            "saved cache"
        );
        Ok(SaveReport {
            entries_saved: index_file.header.num_entries,
            data_bytes_appended: tail.len() as u64,
            index_image_len: image.len() as u64,
            save_count,
        })
    }

    /// Path of the index file.
    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    /// Path of the data file.
    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    fn evict_one(state: &mut CacheState) -> CacheEntry {
        let victim = state
            .policy
            .peek_victim()
            .expect("eviction requested from an empty cache");
        let entry = state
            .index
            .remove(&victim)
            .expect("eviction policy out of sync with the index");
        state.policy.on_remove(&entry);
        state.arena.release(entry.length);
        debug!(
            digest = %victim,
            length = entry.length,
            generation = entry.generation,
            "evicted payload"
        );
        entry
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn ensure_absent_or_empty(path: &Path) -> CacheResult<()> {
    match fs::metadata(path) {
        Ok(meta) if meta.len() > 0 => Err(CacheError::AlreadyExists {
            path: path.to_path_buf(),
        }),
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn write_file_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    // Appended rather than swapped extension, so the index and data files
    // never share a temp name.
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}
