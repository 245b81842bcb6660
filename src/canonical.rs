//! Canonical serialization for deterministic fingerprints.
//!
//! Graph state that participates in incremental-rebuild decisions (glob
//! results, configuration, exported variant listings) is fingerprinted
//! from a canonical byte form so re-running with unchanged inputs
//! reproduces identical output.
//!
//! ## Determinism Guarantees
//!
//! - Stable field order: struct fields serialize in declaration order
//! - Stable list order: vectors serialize in index order
//! - No `HashMap` allowed: use `BTreeMap` for maps in hashed data

use serde::Serialize;
use xxhash_rust::xxh64::{xxh64, Xxh64};

/// Serialize a value to canonical JSON bytes for hashing.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).expect("canonical serialization failed")
}

/// Compute the canonical hash of a serializable value.
pub fn canonical_hash<T: Serialize>(value: &T) -> u64 {
    xxh64(&to_canonical_bytes(value), 0)
}

/// Canonical hash rendered as a fixed-width hex string.
pub fn canonical_hash_hex<T: Serialize>(value: &T) -> String {
    format!("{:016x}", canonical_hash(value))
}

/// Hash a sequence of already-canonical byte chunks into one fingerprint.
///
/// Used where a fingerprint covers several independently serialized parts
/// (e.g. configuration values plus the accessed-key set) without building
/// an intermediate container.
pub fn combined_hash_hex<'a>(parts: impl IntoIterator<Item = &'a [u8]>) -> String {
    let mut hasher = Xxh64::new(0);
    for part in parts {
        // Length-prefix each part so ("ab","c") and ("a","bc") differ.
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    format!("{:016x}", hasher.digest())
}
