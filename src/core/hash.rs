// src/core/hash.rs

use sha2::{Digest, Sha256};

/// Computes the SHA256 hash of the given data.
pub fn sha256_hash(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

/// Computes the SHA256 hash of the given data as a lowercase hex string.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256_hash(data))
}

/// Computes the SHA256 hash of a list of byte slices concatenated together.
pub fn sha256_hash_concat(data_slices: &[&[u8]]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    for slice in data_slices {
        hasher.update(slice);
    }
    hasher.finalize().to_vec()
}

/// Computes the aggregate hash of a snapshot from its per-file content hashes.
///
/// The hashes are sorted lexicographically before being concatenated, so the
/// result depends only on the set of hashes and never on the order in which
/// the files were visited.
pub fn compute_state_hash<'a, I>(file_hashes: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut sorted: Vec<&str> = file_hashes.into_iter().collect();
    sorted.sort_unstable();
    let slices: Vec<&[u8]> = sorted.iter().map(|h| h.as_bytes()).collect();
    hex::encode(sha256_hash_concat(&slices))
}
