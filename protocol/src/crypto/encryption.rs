//! # AES-256-GCM Share Sealing
//!
//! Two shares ever leave a wallet, and both leave sealed:
//!
//! - **P2 (bearer)** is sealed under `SHA256(P3)` before it goes into an
//!   Offer or a Snapshot. Only someone who already holds the witness share
//!   can open it, and holding P3 + P2 is exactly what "owning" a voucher means.
//! - **P3 (witness)** is published sealed under a *day key*,
//!   `HMAC-SHA256(market_seed, "bon-witness:" || YYYY-MM-DD)`. The ciphertext
//!   rotates every day and a leaked day key only opens that day's witnesses.
//!
//! Circulation records use the same day key through [`encrypt`] / [`decrypt`],
//! which pack `nonce || ciphertext || tag` into a single buffer.
//!
//! ## Nonce management
//!
//! Random 96-bit nonces from the OS RNG, fresh for every seal. No associated
//! data. A tag mismatch is [`CryptoError::AuthenticationFailed`] and nothing
//! else; there is no unauthenticated fallback path.

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use chrono::NaiveDate;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use super::hash::{hmac_sha256, sha256};
use super::sharing::{Share, ShareRole};
use super::CryptoError;
use crate::config::{
    AES_KEY_LENGTH, AES_NONCE_LENGTH, AES_TAG_LENGTH, SEALED_SHARE_LENGTH, SECRET_LENGTH,
    WITNESS_KEY_DOMAIN,
};

/// A 32-byte symmetric key that wipes itself on drop.
pub type SymmetricKey = Zeroizing<[u8; AES_KEY_LENGTH]>;

/// A share sealed with AES-256-GCM.
///
/// Offers carry it as `ciphertext || tag` followed by the nonce; snapshots
/// lay it out as `ciphertext · nonce · tag`. Both views are available here so
/// the wire codecs never touch the cipher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedShare {
    #[serde(with = "super::codec::hex_array")]
    pub ciphertext: [u8; SECRET_LENGTH],
    #[serde(with = "super::codec::hex_array")]
    pub nonce: [u8; AES_NONCE_LENGTH],
    #[serde(with = "super::codec::hex_array")]
    pub tag: [u8; AES_TAG_LENGTH],
}

impl SealedShare {
    /// `ciphertext || tag`, the AEAD output as most libraries return it.
    pub fn sealed_bytes(&self) -> [u8; SEALED_SHARE_LENGTH] {
        let mut out = [0u8; SEALED_SHARE_LENGTH];
        out[..SECRET_LENGTH].copy_from_slice(&self.ciphertext);
        out[SECRET_LENGTH..].copy_from_slice(&self.tag);
        out
    }

    /// Split `ciphertext || tag` back apart.
    pub fn from_sealed_bytes(
        sealed: &[u8; SEALED_SHARE_LENGTH],
        nonce: [u8; AES_NONCE_LENGTH],
    ) -> Self {
        let mut ciphertext = [0u8; SECRET_LENGTH];
        let mut tag = [0u8; AES_TAG_LENGTH];
        ciphertext.copy_from_slice(&sealed[..SECRET_LENGTH]);
        tag.copy_from_slice(&sealed[SECRET_LENGTH..]);
        Self {
            ciphertext,
            nonce,
            tag,
        }
    }
}

// ---------------------------------------------------------------------------
// Key Derivation
// ---------------------------------------------------------------------------

/// Key that seals P2: `SHA256(P3)`.
pub fn p2_key(witness: &Share) -> SymmetricKey {
    Zeroizing::new(sha256(witness.as_bytes()))
}

/// Day key for witness shares and circulation records.
///
/// ```
/// use bon_protocol::crypto::encryption::day_key;
/// use chrono::NaiveDate;
///
/// let seed = b"market seed";
/// let monday = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
/// let tuesday = monday.succ_opt().unwrap();
/// assert_ne!(*day_key(seed, monday), *day_key(seed, tuesday));
/// ```
pub fn day_key(market_seed: &[u8], date: NaiveDate) -> SymmetricKey {
    let label = date.format("%Y-%m-%d").to_string();
    Zeroizing::new(hmac_sha256(
        market_seed,
        &[WITNESS_KEY_DOMAIN, label.as_bytes()],
    ))
}

// ---------------------------------------------------------------------------
// Share Sealing
// ---------------------------------------------------------------------------

/// Seal a share under `key` with a fresh random nonce.
pub fn encrypt_share(share: &Share, key: &[u8; AES_KEY_LENGTH]) -> Result<SealedShare, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::EncryptFailed)?;

    let mut nonce = [0u8; AES_NONCE_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    let mut buffer = *share.as_bytes();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(&nonce), b"", &mut buffer)
        .map_err(|_| {
            buffer.zeroize();
            CryptoError::EncryptFailed
        })?;

    let mut tag_bytes = [0u8; AES_TAG_LENGTH];
    tag_bytes.copy_from_slice(&tag);
    Ok(SealedShare {
        ciphertext: buffer,
        nonce,
        tag: tag_bytes,
    })
}

/// Open a sealed share and tag it with the role the caller expects.
///
/// The plaintext buffer is wiped on the failure path as well.
pub fn decrypt_share(
    sealed: &SealedShare,
    key: &[u8; AES_KEY_LENGTH],
    role: ShareRole,
) -> Result<Share, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::AuthenticationFailed)?;

    let mut buffer = sealed.ciphertext;
    let tag = GenericArray::from_slice(&sealed.tag);
    if cipher
        .decrypt_in_place_detached(Nonce::from_slice(&sealed.nonce), b"", &mut buffer, tag)
        .is_err()
    {
        buffer.zeroize();
        return Err(CryptoError::AuthenticationFailed);
    }

    Ok(Share::new(role, &mut buffer))
}

// ---------------------------------------------------------------------------
// Opaque Records
// ---------------------------------------------------------------------------

/// Encrypt an arbitrary record. Returns `nonce || ciphertext || tag`.
pub fn encrypt(key: &[u8; AES_KEY_LENGTH], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::EncryptFailed)?;

    let mut nonce_bytes = [0u8; AES_NONCE_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|_| CryptoError::EncryptFailed)?;

    let mut out = Vec::with_capacity(AES_NONCE_LENGTH + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a buffer produced by [`encrypt`].
pub fn decrypt(key: &[u8; AES_KEY_LENGTH], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < AES_NONCE_LENGTH + AES_TAG_LENGTH {
        return Err(CryptoError::AuthenticationFailed);
    }

    let (nonce_bytes, ciphertext) = data.split_at(AES_NONCE_LENGTH);
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::AuthenticationFailed)?;

    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| CryptoError::AuthenticationFailed)
}
