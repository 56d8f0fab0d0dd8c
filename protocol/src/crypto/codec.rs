//! # Share & Signature Codec
//!
//! Hex and raw-byte conversions for everything fixed-length that Bon stores
//! or ships: shares (32 bytes), public keys (32 bytes), signatures (64 bytes)
//! and challenges (16 bytes).
//!
//! All decoders are strict. A 31-byte "share" is not a share with a byte
//! missing, it is garbage, and it is rejected before it gets anywhere near
//! the interpolation code.

use thiserror::Error;

pub use crate::config::SECRET_LENGTH;

/// Errors produced while decoding fixed-length values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("invalid hex encoding")]
    InvalidHex,

    #[error("wrong length: expected {expected} bytes, got {got}")]
    WrongLength {
        /// Length the target type requires.
        expected: usize,
        /// Length that was supplied.
        got: usize,
    },
}

/// Lowercase hex, no prefix.
pub fn to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Copy a slice into a fixed-size array, rejecting any other length.
pub fn fixed_from_slice<const N: usize>(bytes: &[u8]) -> Result<[u8; N], CodecError> {
    bytes.try_into().map_err(|_| CodecError::WrongLength {
        expected: N,
        got: bytes.len(),
    })
}

/// Decode a hex string into a fixed-size array.
///
/// The intermediate `Vec` is wiped before returning, since this function
/// is also used for shares.
pub fn decode_fixed<const N: usize>(hex_str: &str) -> Result<[u8; N], CodecError> {
    let mut bytes = hex::decode(hex_str.trim()).map_err(|_| CodecError::InvalidHex)?;
    let out = fixed_from_slice::<N>(&bytes);
    zeroize::Zeroize::zeroize(&mut bytes);
    out
}

/// Short display form for logs: first 8 hex characters.
pub fn short_hex(bytes: &[u8]) -> String {
    let mut s = hex::encode(&bytes[..bytes.len().min(4)]);
    s.push('…');
    s
}

/// Serde adapter storing `[u8; N]` as a hex string.
///
/// Used with `#[serde(with = "crate::crypto::codec::hex_array")]`.
pub mod hex_array {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S, const N: usize>(bytes: &[u8; N], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<[u8; N], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        super::decode_fixed::<N>(&s).map_err(serde::de::Error::custom)
    }
}
