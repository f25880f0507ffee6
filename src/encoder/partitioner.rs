//! Partitioners: map a serialized partition key to the token that orders it.
//!
//! Tokens must be computed exactly like the target cluster computes them, so
//! the murmur3 variant here reproduces Cassandra's implementation including its
//! sign extension of tail bytes.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::fmt;

const QUALIFIED_PREFIX: &str = "org.apache.cassandra.dht.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Partitioner {
    Murmur3,
    ByteOrdered,
}

/// Position of a partition on the ring.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Token {
    Long(i64),
    Bytes(Vec<u8>),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long(t) => write!(f, "{t}"),
            Self::Bytes(b) => {
                for byte in b {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

impl Partitioner {
    /// Resolve a partitioner by short (`Murmur3Partitioner`) or fully qualified
    /// (`org.apache.cassandra.dht.Murmur3Partitioner`) class name.
    pub fn from_name(name: &str) -> Result<Self> {
        let short = name.trim();
        let short = short.strip_prefix(QUALIFIED_PREFIX).unwrap_or(short);
        match short {
            "Murmur3Partitioner" => Ok(Self::Murmur3),
            "ByteOrderedPartitioner" => Ok(Self::ByteOrdered),
            _ => bail!("unsupported partitioner '{name}'"),
        }
    }

    /// Fully qualified class name, as recorded in segment statistics.
    #[must_use]
    pub const fn class_name(self) -> &'static str {
        match self {
            Self::Murmur3 => "org.apache.cassandra.dht.Murmur3Partitioner",
            Self::ByteOrdered => "org.apache.cassandra.dht.ByteOrderedPartitioner",
        }
    }

    #[must_use]
    pub fn token(self, key: &[u8]) -> Token {
        match self {
            Self::Murmur3 => Token::Long(murmur3_token(key)),
            Self::ByteOrdered => Token::Bytes(key.to_vec()),
        }
    }
}

impl fmt::Display for Partitioner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.class_name())
    }
}

/// Murmur3 token: the first half of the x64 128-bit hash, with `i64::MIN`
/// reserved as the ring minimum.
#[must_use]
pub fn murmur3_token(key: &[u8]) -> i64 {
    let h = hash3_x64_128(key, 0)[0].cast_signed();
    if h == i64::MIN { i64::MAX } else { h }
}

const C1: u64 = 0x87c3_7b91_1142_53d5;
const C2: u64 = 0x4cf5_ad43_2745_937f;

fn fmix(mut k: u64) -> u64 {
    k ^= k >> 33;
    k = k.wrapping_mul(0xff51_afd7_ed55_8ccd);
    k ^= k >> 33;
    k = k.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    k ^= k >> 33;
    k
}

fn block(key: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&key[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

// Tail bytes are widened as signed bytes, matching the reference implementation.
fn signed(b: u8) -> u64 {
    i64::from(b.cast_signed()).cast_unsigned()
}

fn hash3_x64_128(key: &[u8], seed: u64) -> [u64; 2] {
    let len = key.len();
    let nblocks = len / 16;
    let mut h1 = seed;
    let mut h2 = seed;

    for i in 0..nblocks {
        let mut k1 = block(key, i * 16);
        let mut k2 = block(key, i * 16 + 8);

        k1 = k1.wrapping_mul(C1).rotate_left(31).wrapping_mul(C2);
        h1 ^= k1;
        h1 = h1
            .rotate_left(27)
            .wrapping_add(h2)
            .wrapping_mul(5)
            .wrapping_add(0x52dc_e729);

        k2 = k2.wrapping_mul(C2).rotate_left(33).wrapping_mul(C1);
        h2 ^= k2;
        h2 = h2
            .rotate_left(31)
            .wrapping_add(h1)
            .wrapping_mul(5)
            .wrapping_add(0x3849_5ab5);
    }

    let tail = &key[nblocks * 16..];
    let mut k1: u64 = 0;
    let mut k2: u64 = 0;
    for (i, &b) in tail.iter().enumerate().skip(8) {
        k2 ^= signed(b) << ((i - 8) * 8);
    }
    if tail.len() > 8 {
        k2 = k2.wrapping_mul(C2).rotate_left(33).wrapping_mul(C1);
        h2 ^= k2;
    }
    for (i, &b) in tail.iter().enumerate().take(8) {
        k1 ^= signed(b) << (i * 8);
    }
    if !tail.is_empty() {
        k1 = k1.wrapping_mul(C1).rotate_left(31).wrapping_mul(C2);
        h1 ^= k1;
    }

    h1 ^= len as u64;
    h2 ^= len as u64;
    h1 = h1.wrapping_add(h2);
    h2 = h2.wrapping_add(h1);
    h1 = fmix(h1);
    h2 = fmix(h2);
    h1 = h1.wrapping_add(h2);
    h2 = h2.wrapping_add(h1);
    [h1, h2]
}
