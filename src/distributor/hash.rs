//! Peer address hashing.
//!
//! # Responsibilities
//! - Map a peer address string to a 32-bit hash (djb2-xor variant)
//! - Reduce the hash to a bucket index for the current worker count
//!
//! The hash walks the address from the last character to the first, using
//! wrapping `u32` arithmetic over UTF-16 code units. For IP literals the code
//! units are plain ASCII bytes. Recorded hash vectors depend on this exact
//! order, so do not swap it for a std hasher.

use std::num::NonZeroUsize;

/// Initial hash value.
const SEED: u32 = 5381;

/// Hash a peer address.
pub fn hash_address(address: &str) -> u32 {
    let units: Vec<u16> = address.encode_utf16().collect();
    units
        .iter()
        .rev()
        .fold(SEED, |hash, &unit| hash.wrapping_mul(33) ^ u32::from(unit))
}

/// Bucket index for `address` given `workers` buckets.
pub fn bucket_for(address: &str, workers: NonZeroUsize) -> usize {
    hash_address(address) as usize % workers.get()
}
