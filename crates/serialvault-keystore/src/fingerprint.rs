//! Key ids and payload fingerprints.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Number of digest bytes kept in a key id.
const KEY_ID_BYTES: usize = 8;

/// Derive the key id for a public key: the first 8 bytes of its SHA-256,
/// hex encoded (16 lowercase hex chars, e.g. `61abf588e52be7a3`).
pub fn key_id_for(public_key: &[u8]) -> String {
    let digest = Sha256::digest(public_key);
    hex::encode(&digest[..KEY_ID_BYTES])
}

/// Fingerprint of a signed payload: lowercase hex SHA-256 of its bytes.
pub fn fingerprint_of(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

/// Constant-time string equality, for comparing ids and fingerprints
/// derived from secret material.
pub fn constant_time_str_eq(a: &str, b: &str) -> bool {
    a.len() == b.len() && bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}
