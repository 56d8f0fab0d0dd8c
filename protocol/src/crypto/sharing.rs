//! # 2-of-3 Secret Sharing
//!
//! Every voucher key is split into three shares at issuance, one per role:
//!
//! | Index | Role    | Who holds it                                      |
//! |-------|---------|---------------------------------------------------|
//! | 1     | Anchor  | the issuer; needed to retire the voucher          |
//! | 2     | Bearer  | the current holder; destroyed on spend            |
//! | 3     | Witness | cached by wallets, republished daily by the market |
//!
//! Any two shares rebuild the key. One share alone is a uniformly random
//! 32-byte string that says nothing about the key.
//!
//! ## Field
//!
//! Each byte position is shared independently with a degree-1 polynomial
//! `f(x) = secret + a·x` over GF(2^8), reduced by the AES polynomial
//! `x^8 + x^4 + x^3 + x + 1` (0x11B). Every byte value is a field element, so
//! for a uniformly random `a` each share byte `f(i)` is uniform for `i ≠ 0`.
//!
//! ## Usage
//!
//! ```
//! use bon_protocol::crypto::sharing::{combine, split, ShareRole};
//!
//! let secret = [0x42u8; 32];
//! let [anchor, bearer, witness] = split(&secret);
//! assert_eq!(bearer.role(), ShareRole::Bearer);
//!
//! let key = combine(&[&bearer, &witness]).unwrap();
//! assert_eq!(key.expose(), &secret);
//! # drop(anchor);
//! ```

use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::codec::{self, CodecError};
use super::secret::SecretKey;
use crate::config::{SECRET_LENGTH, SHARE_COUNT, SHARE_THRESHOLD};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from splitting, combining, or decoding shares.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShareError {
    /// A share was not exactly [`SECRET_LENGTH`] bytes, or not valid hex.
    #[error("malformed share: {0}")]
    MalformedShare(CodecError),

    /// Fewer than two shares were supplied.
    #[error("insufficient shares: need {SHARE_THRESHOLD}, got {0}")]
    InsufficientShares(usize),

    /// The same role was supplied twice.
    #[error("duplicate share for role {0}")]
    DuplicateShare(ShareRole),

    /// A share index outside 1..=3.
    #[error("unknown share index {0}")]
    UnknownIndex(u8),
}

impl From<CodecError> for ShareError {
    fn from(err: CodecError) -> Self {
        ShareError::MalformedShare(err)
    }
}

// ---------------------------------------------------------------------------
// GF(256)
// ---------------------------------------------------------------------------

mod gf256 {
    const MODULUS: u16 = 0x11B;

    // EXP[i] = 3^i; doubled so that LOG[a] + LOG[b] indexes without a mod.
    const fn exp_table() -> [u8; 512] {
        let mut table = [0u8; 512];
        let mut val: u16 = 1;
        let mut i = 0;
        while i < 255 {
            table[i] = val as u8;
            table[i + 255] = val as u8;
            val ^= val << 1;
            if val >= 0x100 {
                val ^= MODULUS;
            }
            i += 1;
        }
        table[510] = table[0];
        table[511] = table[1];
        table
    }

    const fn log_table() -> [u8; 256] {
        let exp = exp_table();
        let mut table = [0u8; 256];
        let mut i = 0;
        while i < 255 {
            table[exp[i] as usize] = i as u8;
            i += 1;
        }
        table
    }

    static EXP: [u8; 512] = exp_table();
    static LOG: [u8; 256] = log_table();

    #[inline]
    pub fn mul(a: u8, b: u8) -> u8 {
        if a == 0 || b == 0 {
            return 0;
        }
        EXP[LOG[a as usize] as usize + LOG[b as usize] as usize]
    }

    /// `a / b`. Callers guarantee `b != 0` (distinct x-coordinates).
    #[inline]
    pub fn div(a: u8, b: u8) -> u8 {
        if a == 0 || b == 0 {
            return 0;
        }
        EXP[255 + LOG[a as usize] as usize - LOG[b as usize] as usize]
    }

    /// `f(x) = c0 + c1·x`
    #[inline]
    pub fn eval_line(c0: u8, c1: u8, x: u8) -> u8 {
        c0 ^ mul(c1, x)
    }

    /// Value at zero of the line through `(x1, y1)` and `(x2, y2)`.
    ///
    /// `L1(0) = x2 / (x1 - x2)`, `L2(0) = x1 / (x2 - x1)`; subtraction is XOR.
    #[inline]
    pub fn interpolate_at_zero(x1: u8, y1: u8, x2: u8, y2: u8) -> u8 {
        let denom = x1 ^ x2;
        mul(y1, div(x2, denom)) ^ mul(y2, div(x1, denom))
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn mul_identity_and_zero() {
            for a in 0..=255u8 {
                assert_eq!(mul(a, 1), a);
                assert_eq!(mul(a, 0), 0);
            }
        }

        #[test]
        fn div_inverts_mul() {
            for a in 1..=255u8 {
                for b in 1..=255u8 {
                    assert_eq!(div(mul(a, b), b), a);
                }
            }
        }

        #[test]
        fn aes_field_known_product() {
            // FIPS-197 section 4.2: {57} • {83} = {c1}.
            assert_eq!(mul(0x57, 0x83), 0xc1);
        }

        #[test]
        fn line_interpolation_recovers_constant() {
            for c0 in [0u8, 1, 0x7f, 0xff] {
                for c1 in [0u8, 3, 0xa5] {
                    for (x1, x2) in [(1, 2), (1, 3), (2, 3)] {
                        let y1 = eval_line(c0, c1, x1);
                        let y2 = eval_line(c0, c1, x2);
                        assert_eq!(interpolate_at_zero(x1, y1, x2, y2), c0);
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Share Types
// ---------------------------------------------------------------------------

/// Which of the three parties a share belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShareRole {
    /// P1, kept by the issuer.
    Anchor,
    /// P2, travels with the voucher.
    Bearer,
    /// P3, cached and recoverable from the network.
    Witness,
}

impl ShareRole {
    /// The x-coordinate this role's share is evaluated at.
    pub fn index(self) -> u8 {
        match self {
            ShareRole::Anchor => 1,
            ShareRole::Bearer => 2,
            ShareRole::Witness => 3,
        }
    }

    /// Inverse of [`index`](Self::index).
    pub fn from_index(index: u8) -> Result<Self, ShareError> {
        match index {
            1 => Ok(ShareRole::Anchor),
            2 => Ok(ShareRole::Bearer),
            3 => Ok(ShareRole::Witness),
            other => Err(ShareError::UnknownIndex(other)),
        }
    }
}

impl fmt::Display for ShareRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShareRole::Anchor => "P1/anchor",
            ShareRole::Bearer => "P2/bearer",
            ShareRole::Witness => "P3/witness",
        };
        f.write_str(name)
    }
}

/// One share of a voucher key.
///
/// Shares are `Clone` (a lone share reveals nothing and wallets need to
/// persist them) but they still wipe their bytes on drop. Serialized as
/// `{"role": "...", "data": "<hex>"}`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Share {
    #[zeroize(skip)]
    role: ShareRole,
    #[serde(with = "super::codec::hex_array")]
    data: [u8; SECRET_LENGTH],
}

impl Share {
    /// Build a share from raw bytes, wiping the caller's copy.
    pub fn new(role: ShareRole, data: &mut [u8; SECRET_LENGTH]) -> Self {
        let share = Self { role, data: *data };
        data.zeroize();
        share
    }

    /// Build a share from an untrusted slice.
    pub fn from_slice(role: ShareRole, bytes: &[u8]) -> Result<Self, ShareError> {
        let mut data = codec::fixed_from_slice::<SECRET_LENGTH>(bytes)?;
        Ok(Self::new(role, &mut data))
    }

    /// Decode a hex-encoded share.
    pub fn from_hex(role: ShareRole, hex_str: &str) -> Result<Self, ShareError> {
        let mut data = codec::decode_fixed::<SECRET_LENGTH>(hex_str)?;
        Ok(Self::new(role, &mut data))
    }

    /// Hex encoding of the share bytes.
    pub fn to_hex(&self) -> String {
        codec::to_hex(&self.data)
    }

    pub fn role(&self) -> ShareRole {
        self.role
    }

    pub fn as_bytes(&self) -> &[u8; SECRET_LENGTH] {
        &self.data
    }
}

impl fmt::Debug for Share {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Share({}, <redacted>)", self.role)
    }
}

// ---------------------------------------------------------------------------
// Split / Combine
// ---------------------------------------------------------------------------

/// Split a 32-byte secret into `[anchor, bearer, witness]`.
///
/// A fresh coefficient is drawn from the OS CSPRNG for every byte, so two
/// calls on the same secret return unrelated triples.
pub fn split(secret: &[u8; SECRET_LENGTH]) -> [Share; SHARE_COUNT] {
    let mut coefficients = [0u8; SECRET_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut coefficients);

    let roles = [ShareRole::Anchor, ShareRole::Bearer, ShareRole::Witness];
    let shares = roles.map(|role| {
        let x = role.index();
        let mut data = [0u8; SECRET_LENGTH];
        for (i, byte) in data.iter_mut().enumerate() {
            *byte = gf256::eval_line(secret[i], coefficients[i], x);
        }
        Share::new(role, &mut data)
    });

    coefficients.zeroize();
    shares
}

/// Rebuild the secret from any two distinct shares.
///
/// Extra shares beyond the first two are checked for duplicates and then
/// ignored; with a degree-1 polynomial they add nothing.
pub fn combine(shares: &[&Share]) -> Result<SecretKey, ShareError> {
    if shares.len() < SHARE_THRESHOLD {
        return Err(ShareError::InsufficientShares(shares.len()));
    }

    let mut seen = [false; SHARE_COUNT + 1];
    for share in shares {
        let idx = share.role.index() as usize;
        if seen[idx] {
            return Err(ShareError::DuplicateShare(share.role));
        }
        seen[idx] = true;
    }

    let (a, b) = (shares[0], shares[1]);
    let (xa, xb) = (a.role.index(), b.role.index());

    let mut secret = [0u8; SECRET_LENGTH];
    for (i, byte) in secret.iter_mut().enumerate() {
        *byte = gf256::interpolate_at_zero(xa, a.data[i], xb, b.data[i]);
    }
    Ok(SecretKey::take(&mut secret))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_secret() -> [u8; SECRET_LENGTH] {
        let mut s = [0u8; SECRET_LENGTH];
        for (i, b) in s.iter_mut().enumerate() {
            *b = (i as u8).wrapping_mul(37).wrapping_add(11);
        }
        s
    }

    #[test]
    fn every_pair_recovers_the_secret() {
        let secret = sample_secret();
        let [p1, p2, p3] = split(&secret);

        for pair in [[&p1, &p2], [&p1, &p3], [&p2, &p3], [&p3, &p1], [&p3, &p2]] {
            let key = combine(&pair).unwrap();
            assert_eq!(key.expose(), &secret);
        }
    }

    #[test]
    fn edge_secrets_recover() {
        for secret in [[0u8; SECRET_LENGTH], [0xFF; SECRET_LENGTH]] {
            let [p1, p2, _] = split(&secret);
            assert_eq!(combine(&[&p1, &p2]).unwrap().expose(), &secret);
        }
    }

    #[test]
    fn split_is_randomized() {
        let secret = sample_secret();
        let first = split(&secret);
        let second = split(&secret);
        assert_ne!(first[0].as_bytes(), second[0].as_bytes());
        assert_ne!(first[1].as_bytes(), second[1].as_bytes());
    }

    #[test]
    fn shares_carry_their_roles() {
        let [p1, p2, p3] = split(&sample_secret());
        assert_eq!(p1.role(), ShareRole::Anchor);
        assert_eq!(p2.role(), ShareRole::Bearer);
        assert_eq!(p3.role(), ShareRole::Witness);
    }

    #[test]
    fn single_share_is_rejected() {
        let [p1, _, _] = split(&sample_secret());
        assert_eq!(
            combine(&[&p1]).unwrap_err(),
            ShareError::InsufficientShares(1)
        );
        assert_eq!(combine(&[]).unwrap_err(), ShareError::InsufficientShares(0));
    }

    #[test]
    fn duplicate_role_is_rejected() {
        let [_, p2, _] = split(&sample_secret());
        let copy = p2.clone();
        assert_eq!(
            combine(&[&p2, &copy]).unwrap_err(),
            ShareError::DuplicateShare(ShareRole::Bearer)
        );
    }

    #[test]
    fn three_shares_still_combine() {
        let secret = sample_secret();
        let [p1, p2, p3] = split(&secret);
        assert_eq!(combine(&[&p2, &p3, &p1]).unwrap().expose(), &secret);
    }

    #[test]
    fn malformed_share_lengths_are_rejected() {
        let err = Share::from_slice(ShareRole::Bearer, &[0u8; 31]).unwrap_err();
        assert!(matches!(err, ShareError::MalformedShare(CodecError::WrongLength { .. })));
        assert!(Share::from_hex(ShareRole::Witness, &"00".repeat(33)).is_err());
        assert!(Share::from_hex(ShareRole::Witness, "not hex").is_err());
    }

    #[test]
    fn hex_roundtrip_preserves_role_and_bytes() {
        let [_, p2, _] = split(&sample_secret());
        let back = Share::from_hex(ShareRole::Bearer, &p2.to_hex()).unwrap();
        assert_eq!(back, p2);
    }

    #[test]
    fn role_index_mapping() {
        for role in [ShareRole::Anchor, ShareRole::Bearer, ShareRole::Witness] {
            assert_eq!(ShareRole::from_index(role.index()).unwrap(), role);
        }
        assert_eq!(ShareRole::from_index(0), Err(ShareError::UnknownIndex(0)));
        assert_eq!(ShareRole::from_index(4), Err(ShareError::UnknownIndex(4)));
    }

    #[test]
    fn share_json_uses_hex() {
        let [p1, _, _] = split(&sample_secret());
        let json = serde_json::to_value(&p1).unwrap();
        assert_eq!(json["role"], "anchor");
        assert_eq!(json["data"].as_str().unwrap().len(), SECRET_LENGTH * 2);
        let back: Share = serde_json::from_value(json).unwrap();
        assert_eq!(back, p1);
    }

    #[test]
    fn debug_redacts_share_bytes() {
        let [_, p2, _] = split(&[0xAA; SECRET_LENGTH]);
        let printed = format!("{p2:?}");
        assert!(printed.contains("redacted"));
        assert!(!printed.contains(&p2.to_hex()));
    }

    #[test]
    fn single_share_bytes_are_not_the_secret() {
        // Not a proof of secrecy, just a guard against a broken split that
        // copies the secret into a share.
        let secret = sample_secret();
        let [p1, p2, p3] = split(&secret);
        for share in [&p1, &p2, &p3] {
            assert_ne!(share.as_bytes(), &secret);
        }
    }
}
