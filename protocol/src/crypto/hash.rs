//! # Hashing Utilities
//!
//! SHA-256 and HMAC-SHA256, the only two hash constructions Bon uses.
//!
//! - **SHA-256** derives event ids, message hashes for signing, the P2
//!   wrapping key (`SHA256(P3)`) and the Schnorr challenge `e`.
//! - **HMAC-SHA256** derives deterministic signing nonces and the daily
//!   witness keys. Both are keyed derivations; plain hashing of
//!   `key || data` would be fine for SHA-256 in practice but HMAC removes
//!   the need to argue about it.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// SHA-256 of a single buffer.
///
/// ```
/// use bon_protocol::crypto::hash::sha256;
///
/// let digest = sha256(b"bon");
/// assert_eq!(digest.len(), 32);
/// ```
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256 over several buffers, as if they were concatenated.
///
/// Saves an allocation at every call site that hashes `a || b || c`.
pub fn sha256_concat(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// HMAC-SHA256 over several buffers.
pub fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> [u8; 32] {
    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(key).expect("HMAC accepts keys of any length");
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vector() {
        // NIST test vector for "abc".
        assert_eq!(
            hex::encode(sha256(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn concat_matches_single_buffer() {
        assert_eq!(sha256_concat(&[b"ab", b"c"]), sha256(b"abc"));
        assert_eq!(sha256_concat(&[]), sha256(b""));
    }

    #[test]
    fn hmac_rfc4231_case_2() {
        let tag = hmac_sha256(b"Jefe", &[b"what do ya want ", b"for nothing?"]);
        assert_eq!(
            hex::encode(tag),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn hmac_depends_on_key() {
        assert_ne!(hmac_sha256(b"k1", &[b"m"]), hmac_sha256(b"k2", &[b"m"]));
    }
}
