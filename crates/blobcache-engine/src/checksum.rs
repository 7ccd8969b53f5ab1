//! Checksums for on-disk integrity verification.
//!
//! Provides CRC32C and CRC32 (IEEE) algorithms for validating the persisted
//! index image against torn or bit-rotted writes.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Supported checksum algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ChecksumAlgorithm {
    /// CRC32C — Castagnoli polynomial, hardware-accelerated on modern CPUs
    #[default]
    Crc32c,
    /// CRC32 — IEEE polynomial via `crc32fast`
    Crc32,
    /// No checksum (for paths where integrity is handled elsewhere)
    None,
}

impl std::fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChecksumAlgorithm::Crc32c => write!(f, "CRC32C"),
            ChecksumAlgorithm::Crc32 => write!(f, "CRC32"),
            ChecksumAlgorithm::None => write!(f, "None"),
        }
    }
}

/// A computed checksum value with its algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum {
    /// The algorithm used to compute this checksum.
    pub algorithm: ChecksumAlgorithm,
    /// The checksum value.
    pub value: u64,
}

impl Checksum {
    /// Creates a new checksum with the given algorithm and value.
    pub fn new(algorithm: ChecksumAlgorithm, value: u64) -> Self {
        Self { algorithm, value }
    }
}

/// Computes the checksum for the given data using the specified algorithm.
pub fn compute(algorithm: ChecksumAlgorithm, data: &[u8]) -> Checksum {
    let value = match algorithm {
        ChecksumAlgorithm::Crc32c => crc32c(data) as u64,
        ChecksumAlgorithm::Crc32 => crc32fast::hash(data) as u64,
        ChecksumAlgorithm::None => 0,
    };
    Checksum { algorithm, value }
}

/// Verifies that the data matches the given checksum.
pub fn verify(checksum: &Checksum, data: &[u8]) -> bool {
    let computed = compute(checksum.algorithm, data);
    let matches = computed.value == checksum.value;
    if !matches {
        debug!(
            algorithm = %checksum.algorithm,
            expected = checksum.value,
            actual = computed.value,
            "checksum mismatch"
        );
    }
    matches
}

/// Generates the CRC32C lookup table at compile time.
const fn make_crc32c_table() -> [u32; 256] {
    const POLY: u32 = 0x82F63B78;
    let mut table = [0u32; 256];
    let mut i = 0u32;
    while i < 256 {
        let mut crc = i;
        let mut j = 0;
        while j < 8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ POLY;
            } else {
                crc >>= 1;
            }
            j += 1;
        }
        table[i as usize] = crc;
        i += 1;
    }
    table
}

/// CRC32C implementation using the standard Castagnoli polynomial.
pub fn crc32c(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = make_crc32c_table();
    let mut crc: u32 = !0;
    for &byte in data {
        let idx = ((crc ^ byte as u32) & 0xFF) as usize;
        crc = (crc >> 8) ^ TABLE[idx];
    }
    !crc
}
