//! Bloom filter sent by the server alongside an existence filter
//!
//! Membership probes hash the document path with MD5 and split the digest
//! into two little-endian `u64`s, `h1` and `h2`. Probe `i` tests bit
//! `(h1 + i * h2) mod bit_count` using wrapping arithmetic. Bit `b` is bit
//! `b % 8` of byte `b / 8`.
//!
//! False positives are possible; false negatives are not.

use docsync_core::DocumentKey;
use thiserror::Error;

/// Parameters that cannot describe a usable filter
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BloomFilterError {
    #[error("invalid padding {0}, must be in 0..8")]
    InvalidPadding(i32),

    #[error("invalid hash count {0}")]
    NegativeHashCount(i32),

    #[error("non-empty bitmap requires a positive hash count")]
    ZeroHashCount,

    #[error("empty bitmap must have zero padding, got {0}")]
    PaddingOnEmptyBitmap(i32),
}

/// Probabilistic set of document paths
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomFilter {
    bitmap: Vec<u8>,
    bit_count: u64,
    hash_count: u32,
}

impl BloomFilter {
    /// Wraps a server-provided bitmap, validating its parameters
    pub fn new(bitmap: Vec<u8>, padding: i32, hash_count: i32) -> Result<Self, BloomFilterError> {
        if !(0..8).contains(&padding) {
            return Err(BloomFilterError::InvalidPadding(padding));
        }
        if hash_count < 0 {
            return Err(BloomFilterError::NegativeHashCount(hash_count));
        }
        if bitmap.is_empty() && padding != 0 {
            return Err(BloomFilterError::PaddingOnEmptyBitmap(padding));
        }
        if !bitmap.is_empty() && hash_count == 0 {
            return Err(BloomFilterError::ZeroHashCount);
        }
        let bit_count = bitmap.len() as u64 * 8 - padding as u64;
        Ok(Self {
            bitmap,
            bit_count,
            hash_count: hash_count as u32,
        })
    }

    /// Builds a filter of `bit_count` bits holding every path in `paths`
    pub fn build<'a, I>(paths: I, bit_count: u64, hash_count: u32) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        assert!(
            bit_count == 0 || hash_count > 0,
            "a non-empty bloom filter needs at least one hash"
        );
        let bytes = ((bit_count + 7) / 8) as usize;
        let mut filter = Self {
            bitmap: vec![0; bytes],
            bit_count,
            hash_count,
        };
        if bit_count > 0 {
            for path in paths {
                for bit in filter.probe_bits(path) {
                    filter.bitmap[(bit / 8) as usize] |= 1 << (bit % 8);
                }
            }
        }
        filter
    }

    pub fn bit_count(&self) -> u64 {
        self.bit_count
    }

    pub fn hash_count(&self) -> u32 {
        self.hash_count
    }

    pub fn bitmap(&self) -> &[u8] {
        &self.bitmap
    }

    /// Unused bits in the last byte
    pub fn padding(&self) -> u8 {
        (self.bitmap.len() as u64 * 8 - self.bit_count) as u8
    }

    fn probe_bits(&self, path: &str) -> impl Iterator<Item = u64> {
        let digest = md5::compute(path.as_bytes()).0;
        let mut lo = [0u8; 8];
        let mut hi = [0u8; 8];
        lo.copy_from_slice(&digest[..8]);
        hi.copy_from_slice(&digest[8..]);
        let h1 = u64::from_le_bytes(lo);
        let h2 = u64::from_le_bytes(hi);
        let bit_count = self.bit_count;
        (0..u64::from(self.hash_count))
            .map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % bit_count)
    }

    /// True if `path` may be in the set; false means it certainly is not
    pub fn might_contain(&self, path: &str) -> bool {
        if self.bit_count == 0 {
            return false;
        }
        self.probe_bits(path)
            .all(|bit| self.bitmap[(bit / 8) as usize] & (1 << (bit % 8)) != 0)
    }

    /// [`might_contain`](Self::might_contain) on a key's canonical path
    pub fn might_contain_key(&self, key: &DocumentKey) -> bool {
        self.might_contain(&key.path().canonical_string())
    }
}
