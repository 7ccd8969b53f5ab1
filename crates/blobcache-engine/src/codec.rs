//! On-disk index format: header, entry records, and integrity trailer.
//!
//! The index file is a bincode image of [`IndexFile`] followed by an 8-byte
//! little-endian CRC32C of the image. The data file is a flat byte region;
//! an entry's payload occupies `[offset, offset + length)` and the padding
//! up to the 64-byte boundary is unspecified.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::checksum::{self, ChecksumAlgorithm};
use crate::entry::{CacheEntry, BLOCK_SIZE};
use crate::error::{CacheError, CacheResult};

/// Index file magic: "BCI1" = 0x42434931
pub const INDEX_MAGIC: u32 = 0x42434931;
/// Current index format version
pub const INDEX_VERSION: u8 = 1;

/// Header of the persisted index file. Identity fields (`cache_uuid`,
/// `created_at_secs`, `save_count`) never affect lookup or eviction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexHeader {
    /// Magic number (INDEX_MAGIC).
    pub magic: u32,
    /// Format version.
    pub version: u8,
    /// Unique identifier stamped when the cache was created.
    pub cache_uuid: [u8; 16],
    /// Creation timestamp (seconds since epoch).
    pub created_at_secs: u64,
    /// Number of successful saves, including this one.
    pub save_count: u64,
    /// Configured slot capacity of the index table.
    pub max_items: u32,
    /// Configured byte capacity (block-slack bound).
    pub capacity_bytes: u64,
    /// Current generation counter.
    pub generation: u64,
    /// Next insertion sequence number.
    pub next_sequence: u64,
    /// Number of live entries in this image.
    pub num_entries: u32,
    /// Sum of true payload lengths over live entries.
    pub num_bytes: u64,
    /// Sum of 64-byte-rounded footprints over live entries.
    pub num_bytes_with_block_slack: u64,
    /// Committed length of the data region at save time.
    pub data_len: u64,
}

/// The complete persisted index: header plus one record per live entry,
/// ordered by insertion sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexFile {
    /// File header.
    pub header: IndexHeader,
    /// Live entries, ordered by sequence.
    pub entries: Vec<CacheEntry>,
}

impl IndexFile {
    /// Serializes the index to its on-disk image with the CRC32C trailer.
    pub fn to_bytes(&self) -> CacheResult<Vec<u8>> {
        let mut image =
            bincode::serialize(self).map_err(|e| CacheError::Serialization {
                reason: e.to_string(),
            })?;
        let crc = checksum::compute(ChecksumAlgorithm::Crc32c, &image);
        image.extend_from_slice(&crc.value.to_le_bytes());
        Ok(image)
    }

    /// Parses and validates an on-disk image.
    pub fn from_bytes(data: &[u8]) -> CacheResult<Self> {
        if data.len() < 8 {
            return Err(CacheError::CorruptIndex {
                reason: format!("index file too small: {} bytes", data.len()),
            });
        }
        let (image, trailer) = data.split_at(data.len() - 8);
        let stored = u64::from_le_bytes(trailer.try_into().expect("8-byte trailer"));
        let computed = checksum::compute(ChecksumAlgorithm::Crc32c, image);
        if stored != computed.value {
            return Err(CacheError::CorruptIndex {
                reason: format!(
                    "checksum mismatch: expected {:#x}, got {:#x}",
                    stored, computed.value
                ),
            });
        }

        let index: IndexFile =
            bincode::deserialize(image).map_err(|e| CacheError::CorruptIndex {
                reason: format!("deserialization failed: {}", e),
            })?;
        index.validate()?;
        Ok(index)
    }

    /// Validates internal consistency: magic, version, and agreement between
    /// the header counters and the entry records.
    pub fn validate(&self) -> CacheResult<()> {
        let header = &self.header;

        if header.magic != INDEX_MAGIC {
            return Err(CacheError::CorruptIndex {
                reason: format!(
                    "invalid magic: expected {:#x}, got {:#x}",
                    INDEX_MAGIC, header.magic
                ),
            });
        }
        if header.version != INDEX_VERSION {
            return Err(CacheError::CorruptIndex {
                reason: format!(
                    "unsupported version: expected {}, got {}",
                    INDEX_VERSION, header.version
                ),
            });
        }
        if header.num_entries as usize != self.entries.len() {
            return Err(CacheError::CorruptIndex {
                reason: format!(
                    "entry count mismatch: header says {}, found {}",
                    header.num_entries,
                    self.entries.len()
                ),
            });
        }
        if header.num_entries > header.max_items {
            return Err(CacheError::CorruptIndex {
                reason: format!(
                    "{} entries exceed the stated capacity of {}",
                    header.num_entries, header.max_items
                ),
            });
        }
        if !header.data_len.is_multiple_of(BLOCK_SIZE) {
            return Err(CacheError::CorruptIndex {
                reason: format!("data length {} is not block aligned", header.data_len),
            });
        }

        let mut num_bytes = 0u64;
        let mut block_slack = 0u64;
        let mut digests = HashSet::with_capacity(self.entries.len());
        let mut last_sequence = None;

        for entry in &self.entries {
            if !entry.offset.is_multiple_of(BLOCK_SIZE) {
                return Err(CacheError::CorruptIndex {
                    reason: format!("entry offset {} is not block aligned", entry.offset),
                });
            }
            if entry.end_offset() > header.data_len {
                return Err(CacheError::CorruptIndex {
                    reason: format!(
                        "entry at {} runs past the data region ({} > {})",
                        entry.offset,
                        entry.end_offset(),
                        header.data_len
                    ),
                });
            }
            if entry.generation > header.generation {
                return Err(CacheError::CorruptIndex {
                    reason: format!(
                        "entry generation {} is newer than the cache generation {}",
                        entry.generation, header.generation
                    ),
                });
            }
            if entry.sequence >= header.next_sequence {
                return Err(CacheError::CorruptIndex {
                    reason: format!(
                        "entry sequence {} is not below the next sequence {}",
                        entry.sequence, header.next_sequence
                    ),
                });
            }
            if let Some(last) = last_sequence {
                if entry.sequence <= last {
                    return Err(CacheError::CorruptIndex {
                        reason: "entries are not ordered by sequence".to_string(),
                    });
                }
            }
            last_sequence = Some(entry.sequence);
            if !digests.insert(entry.digest) {
                return Err(CacheError::CorruptIndex {
                    reason: format!("duplicate digest {}", entry.digest),
                });
            }
            num_bytes += entry.length;
            block_slack += entry.footprint();
        }

        if num_bytes != header.num_bytes {
            return Err(CacheError::CorruptIndex {
                reason: format!(
                    "byte counter mismatch: header says {}, records sum to {}",
                    header.num_bytes, num_bytes
                ),
            });
        }
        if block_slack != header.num_bytes_with_block_slack {
            return Err(CacheError::CorruptIndex {
                reason: format!(
                    "slack counter mismatch: header says {}, records sum to {}",
                    header.num_bytes_with_block_slack, block_slack
                ),
            });
        }
        if block_slack > header.data_len {
            return Err(CacheError::CorruptIndex {
                reason: format!(
                    "live slack {} exceeds the data region length {}",
                    block_slack, header.data_len
                ),
            });
        }

        Ok(())
    }
}
