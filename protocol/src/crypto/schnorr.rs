//! # Schnorr Signatures over secp256k1
//!
//! Voucher keys sign three things: offers, acknowledgements and log events.
//! All three go through [`sign`] and [`verify`] in this module.
//!
//! ## Scheme
//!
//! ```text
//! k = HMAC-SHA256(d, m) mod n          deterministic nonce
//! R = k·G                              negate k if R.y is odd
//! e = SHA256(R.x || m) mod n
//! s = k + e·d mod n                    d negated if (d·G).y is odd
//! signature = R.x || s
//! ```
//!
//! Public keys and `R` travel as 32-byte x-coordinates and are always lifted
//! with even y. Signing flips `d` and `k` as needed, so callers never have
//! to care about parity. Issuance additionally normalizes fresh keys to even
//! y so that the stored shares already rebuild the canonical scalar.
//!
//! The nonce never touches an RNG. A weak RNG at signing time has leaked
//! more private keys than any broken curve.

use std::fmt;

use k256::elliptic_curve::ops::Reduce;
use k256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use k256::elliptic_curve::{Field, PrimeField};
use k256::{AffinePoint, EncodedPoint, FieldBytes, ProjectivePoint, Scalar, U256};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use super::codec::{self, CodecError};
use super::hash::{hmac_sha256, sha256, sha256_concat};
use super::secret::SecretKey;
use super::CryptoError;
use crate::config::{PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH};

// ---------------------------------------------------------------------------
// Public Key & Signature Types
// ---------------------------------------------------------------------------

/// An x-only secp256k1 public key. For vouchers this is also the id.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PublicKey(#[serde(with = "super::codec::hex_array")] [u8; PUBLIC_KEY_LENGTH]);

impl PublicKey {
    /// Wrap raw bytes. No curve check; [`verify`] rejects keys that don't lift.
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CodecError> {
        Ok(Self(codec::fixed_from_slice(bytes)?))
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, CodecError> {
        Ok(Self(codec::decode_fixed(hex_str)?))
    }

    pub fn to_hex(&self) -> String {
        codec::to_hex(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LENGTH] {
        &self.0
    }

    /// First four bytes in hex, for log lines.
    pub fn short(&self) -> String {
        codec::short_hex(&self.0)
    }

    /// Whether these bytes are the x-coordinate of a curve point.
    pub fn is_on_curve(&self) -> bool {
        lift_x(&self.0).is_some()
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// A 64-byte Schnorr signature, `R.x || s`.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(#[serde(with = "super::codec::hex_array")] [u8; SIGNATURE_LENGTH]);

impl Signature {
    pub fn from_bytes(bytes: [u8; SIGNATURE_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CodecError> {
        Ok(Self(codec::fixed_from_slice(bytes)?))
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, CodecError> {
        Ok(Self(codec::decode_fixed(hex_str)?))
    }

    pub fn to_hex(&self) -> String {
        codec::to_hex(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LENGTH] {
        &self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", codec::short_hex(&self.0))
    }
}

// ---------------------------------------------------------------------------
// Curve Helpers
// ---------------------------------------------------------------------------

/// The key as a scalar. The caller owns wiping the result.
fn scalar_from_key(key: &SecretKey) -> Result<Zeroizing<Scalar>, CryptoError> {
    let mut repr = FieldBytes::default();
    repr.copy_from_slice(key.expose());
    let scalar: Option<Scalar> = Scalar::from_repr(repr).into();
    repr.as_mut_slice().zeroize();
    match scalar.map(Zeroizing::new) {
        Some(d) if !bool::from(d.is_zero()) => Ok(d),
        _ => Err(CryptoError::InvalidPrivateKey),
    }
}

fn reduce_hash(hash: &[u8; 32]) -> Scalar {
    <Scalar as Reduce<U256>>::reduce(U256::from_be_slice(hash))
}

/// x-coordinate and y-parity of a non-identity point.
fn encode_point(point: &ProjectivePoint) -> Option<([u8; 32], bool)> {
    let encoded = point.to_affine().to_encoded_point(true);
    let bytes = encoded.as_bytes();
    if bytes.len() != 33 {
        return None;
    }
    let mut x = [0u8; 32];
    x.copy_from_slice(&bytes[1..33]);
    Some((x, bytes[0] == 0x03))
}

/// The point with this x-coordinate and even y.
fn lift_x(x: &[u8; 32]) -> Option<ProjectivePoint> {
    let mut compressed = [0u8; 33];
    compressed[0] = 0x02;
    compressed[1..].copy_from_slice(x);
    let encoded = EncodedPoint::from_bytes(compressed).ok()?;
    let affine: Option<AffinePoint> = AffinePoint::from_encoded_point(&encoded).into();
    affine.map(ProjectivePoint::from)
}

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// Derive the x-only public key for a private key.
pub fn public_key(key: &SecretKey) -> Result<PublicKey, CryptoError> {
    let d = scalar_from_key(key)?;
    let (x, _) = encode_point(&(ProjectivePoint::GENERATOR * *d))
        .ok_or(CryptoError::InvalidPrivateKey)?;
    Ok(PublicKey(x))
}

/// Rewrite `key` in place so that its public point has even y, and return
/// that public key. Keys that are not valid scalars are rejected.
pub fn normalize_even_y(key: &mut SecretKey) -> Result<PublicKey, CryptoError> {
    let d = scalar_from_key(key)?;
    let (x, odd) = encode_point(&(ProjectivePoint::GENERATOR * *d))
        .ok_or(CryptoError::InvalidPrivateKey)?;
    if odd {
        let negated = Zeroizing::new(-*d);
        let mut bytes: [u8; 32] = negated.to_bytes().into();
        key.expose_mut().copy_from_slice(&bytes);
        bytes.zeroize();
    }
    Ok(PublicKey(x))
}

/// Generate a fresh, normalized private key.
pub fn generate_key() -> (SecretKey, PublicKey) {
    loop {
        let mut key = SecretKey::random();
        // Out-of-range draws happen with probability ~2^-128.
        if let Ok(public) = normalize_even_y(&mut key) {
            return (key, public);
        }
    }
}

// ---------------------------------------------------------------------------
// Sign / Verify
// ---------------------------------------------------------------------------

/// Sign a 32-byte message hash.
pub fn sign(message_hash: &[u8; 32], key: &SecretKey) -> Result<Signature, CryptoError> {
    let mut d = scalar_from_key(key)?;
    let (_, key_odd) = encode_point(&(ProjectivePoint::GENERATOR * *d))
        .ok_or(CryptoError::InvalidPrivateKey)?;
    if key_odd {
        *d = -*d;
    }

    let nonce_bytes = Zeroizing::new(hmac_sha256(key.expose(), &[&message_hash[..]]));
    let mut k = Zeroizing::new(reduce_hash(&nonce_bytes));
    if bool::from(k.is_zero()) {
        return Err(CryptoError::DegenerateNonce);
    }

    let (rx, r_odd) = encode_point(&(ProjectivePoint::GENERATOR * *k))
        .ok_or(CryptoError::DegenerateNonce)?;
    if r_odd {
        *k = -*k;
    }

    let e = reduce_hash(&sha256_concat(&[&rx[..], &message_hash[..]]));
    let s = *k + e * *d;

    let mut out = [0u8; SIGNATURE_LENGTH];
    out[..32].copy_from_slice(&rx);
    out[32..].copy_from_slice(&s.to_bytes());
    Ok(Signature(out))
}

/// Hash an arbitrary message with SHA-256 and sign the digest.
pub fn sign_message(message: &[u8], key: &SecretKey) -> Result<Signature, CryptoError> {
    sign(&sha256(message), key)
}

/// Check `s·G == R + e·P`.
pub fn verify(message_hash: &[u8; 32], signature: &Signature, public_key: &PublicKey) -> bool {
    let Some(p) = lift_x(&public_key.0) else {
        return false;
    };

    let mut rx = [0u8; 32];
    rx.copy_from_slice(&signature.0[..32]);
    let Some(r) = lift_x(&rx) else {
        return false;
    };

    let s_repr = *FieldBytes::from_slice(&signature.0[32..]);
    let s: Option<Scalar> = Scalar::from_repr(s_repr).into();
    let Some(s) = s else {
        return false;
    };

    let e = reduce_hash(&sha256_concat(&[&rx[..], &message_hash[..]]));
    ProjectivePoint::GENERATOR * s == r + p * e
}

/// [`verify`] as a `Result`, for `?` chains.
pub fn verify_strict(
    message_hash: &[u8; 32],
    signature: &Signature,
    public_key: &PublicKey,
) -> Result<(), CryptoError> {
    if verify(message_hash, signature, public_key) {
        Ok(())
    } else {
        Err(CryptoError::SignatureInvalid)
    }
}

/// Hash-then-verify counterpart of [`sign_message`].
pub fn verify_message(message: &[u8], signature: &Signature, public_key: &PublicKey) -> bool {
    verify(&sha256(message), signature, public_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_from(byte: u8) -> SecretKey {
        SecretKey::take(&mut [byte; 32])
    }

    #[test]
    fn sign_and_verify() {
        let (key, public) = generate_key();
        let msg = sha256(b"pay the baker");
        let sig = sign(&msg, &key).unwrap();
        assert!(verify(&msg, &sig, &public));
    }

    #[test]
    fn signatures_are_deterministic() {
        let key = key_from(0x11);
        let msg = sha256(b"same message");
        assert_eq!(sign(&msg, &key).unwrap(), sign(&msg, &key).unwrap());
        let other = sha256(b"other message");
        assert_ne!(sign(&msg, &key).unwrap(), sign(&other, &key).unwrap());
    }

    #[test]
    fn odd_y_keys_still_verify() {
        // Half of all keys have odd y; sweep a few to hit both parities.
        for byte in 1..=16u8 {
            let key = key_from(byte);
            let public = public_key(&key).unwrap();
            let msg = sha256(&[byte]);
            let sig = sign(&msg, &key).unwrap();
            assert!(verify(&msg, &sig, &public), "key byte {byte}");
        }
    }

    #[test]
    fn wrong_public_key_fails() {
        let (key, _) = generate_key();
        let (_, other_public) = generate_key();
        let msg = sha256(b"msg");
        let sig = sign(&msg, &key).unwrap();
        assert!(!verify(&msg, &sig, &other_public));
    }

    #[test]
    fn flipped_bits_fail() {
        let (key, public) = generate_key();
        let msg = sha256(b"msg");
        let sig = sign(&msg, &key).unwrap();
        for idx in [0usize, 17, 31, 32, 50, 63] {
            let mut bytes = *sig.as_bytes();
            bytes[idx] ^= 0x01;
            assert!(!verify(&msg, &Signature::from_bytes(bytes), &public), "byte {idx}");
        }
        let mut tampered_msg = msg;
        tampered_msg[0] ^= 0x80;
        assert!(!verify(&tampered_msg, &sig, &public));
    }

    #[test]
    fn zero_and_overflow_keys_rejected() {
        assert_eq!(
            public_key(&key_from(0x00)).unwrap_err(),
            CryptoError::InvalidPrivateKey
        );
        assert_eq!(
            sign(&[0u8; 32], &key_from(0xFF)).unwrap_err(),
            CryptoError::InvalidPrivateKey
        );
    }

    #[test]
    fn normalization_keeps_public_key_and_forces_even_y() {
        for byte in 1..=16u8 {
            let mut key = key_from(byte);
            let before = public_key(&key).unwrap();
            let after = normalize_even_y(&mut key).unwrap();
            assert_eq!(before, after);
            let d = scalar_from_key(&key).unwrap();
            let (_, odd) = encode_point(&(ProjectivePoint::GENERATOR * *d)).unwrap();
            assert!(!odd);
        }
    }

    #[test]
    fn key_scalar_is_wiped_in_place() {
        let key = key_from(7);
        let mut d: Zeroizing<Scalar> = scalar_from_key(&key).unwrap();
        assert!(!bool::from(d.is_zero()));
        d.zeroize();
        assert!(bool::from(d.is_zero()));
        // The key itself is untouched and still signs.
        let msg = sha256(b"wiped");
        let public = public_key(&key).unwrap();
        assert!(verify(&msg, &sign(&msg, &key).unwrap(), &public));
    }

    #[test]
    fn generated_public_keys_lift() {
        let (_, public) = generate_key();
        assert!(public.is_on_curve());
    }

    #[test]
    fn non_curve_public_key_fails_verification() {
        let (key, _) = generate_key();
        let msg = sha256(b"msg");
        let sig = sign(&msg, &key).unwrap();
        // An all-0xFF x-coordinate exceeds the field prime and never lifts.
        let bogus = PublicKey::from_bytes([0xFF; 32]);
        assert!(!bogus.is_on_curve());
        assert!(!verify(&msg, &sig, &bogus));
    }

    #[test]
    fn verify_strict_maps_failure() {
        let (key, public) = generate_key();
        let msg = sha256(b"msg");
        let sig = sign(&msg, &key).unwrap();
        assert!(verify_strict(&msg, &sig, &public).is_ok());
        assert_eq!(
            verify_strict(&sha256(b"other"), &sig, &public).unwrap_err(),
            CryptoError::SignatureInvalid
        );
    }

    #[test]
    fn message_helpers_hash_first() {
        let (key, public) = generate_key();
        let sig = sign_message(b"hello", &key).unwrap();
        assert!(verify_message(b"hello", &sig, &public));
        assert!(verify(&sha256(b"hello"), &sig, &public));
        assert!(!verify_message(b"hellO", &sig, &public));
    }

    #[test]
    fn hex_roundtrips() {
        let (key, public) = generate_key();
        let sig = sign(&sha256(b"x"), &key).unwrap();
        assert_eq!(PublicKey::from_hex(&public.to_hex()).unwrap(), public);
        assert_eq!(Signature::from_hex(&sig.to_hex()).unwrap(), sig);
        assert!(Signature::from_hex("abcd").is_err());
    }
}
