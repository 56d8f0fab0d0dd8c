//! # Offer
//!
//! The first QR code of an offline transfer, shown by the sender.
//!
//! ```text
//! offset  len  field
//! 0       32   voucher id (x-only public key)
//! 32      48   P2 sealed under SHA256(P3): ciphertext(32) || tag(16)
//! 80      12   AES-GCM nonce
//! 92      16   challenge
//! 108     4    timestamp, u32 BE, unix seconds
//! 112     1    ttl, seconds
//! 113     64   Schnorr signature over SHA256(bytes 0..113)   [optional]
//! ```
//!
//! A 113-byte offer is the legacy unsigned variant. It still decodes, so
//! that a scanner can say *why* it refuses it, but [`Offer::verify`]
//! rejects it with [`WireError::MissingSignature`].

use crate::config::{
    AES_NONCE_LENGTH, CHALLENGE_LENGTH, OFFER_SIGNED_LENGTH, OFFER_UNSIGNED_LENGTH,
    PUBLIC_KEY_LENGTH, SEALED_SHARE_LENGTH, SIGNATURE_LENGTH,
};
use crate::crypto::encryption::SealedShare;
use crate::crypto::hash::sha256;
use crate::crypto::schnorr::{self, PublicKey, Signature};
use crate::crypto::{CryptoError, SecretKey};

use super::checksum;
use super::error::WireError;

const ID_END: usize = PUBLIC_KEY_LENGTH;
const SEALED_END: usize = ID_END + SEALED_SHARE_LENGTH;
const NONCE_END: usize = SEALED_END + AES_NONCE_LENGTH;
const CHALLENGE_END: usize = NONCE_END + CHALLENGE_LENGTH;
const TIMESTAMP_END: usize = CHALLENGE_END + 4;
const TTL_END: usize = TIMESTAMP_END + 1;

/// A decoded (or about to be encoded) transfer offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Offer {
    pub voucher_id: PublicKey,
    pub sealed_p2: SealedShare,
    pub challenge: [u8; CHALLENGE_LENGTH],
    pub timestamp: u32,
    pub ttl: u8,
    pub signature: Option<Signature>,
}

impl Offer {
    /// The bytes covered by the signature.
    pub fn unsigned_bytes(&self) -> [u8; OFFER_UNSIGNED_LENGTH] {
        let mut out = [0u8; OFFER_UNSIGNED_LENGTH];
        out[..ID_END].copy_from_slice(self.voucher_id.as_bytes());
        out[ID_END..SEALED_END].copy_from_slice(&self.sealed_p2.sealed_bytes());
        out[SEALED_END..NONCE_END].copy_from_slice(&self.sealed_p2.nonce);
        out[NONCE_END..CHALLENGE_END].copy_from_slice(&self.challenge);
        out[CHALLENGE_END..TIMESTAMP_END].copy_from_slice(&self.timestamp.to_be_bytes());
        out[TIMESTAMP_END] = self.ttl;
        out
    }

    pub fn signing_hash(&self) -> [u8; 32] {
        sha256(&self.unsigned_bytes())
    }

    /// Sign with the voucher key, replacing any existing signature.
    pub fn sign(&mut self, key: &SecretKey) -> Result<(), CryptoError> {
        self.signature = Some(schnorr::sign(&self.signing_hash(), key)?);
        Ok(())
    }

    /// Check the signature against the voucher id.
    pub fn verify(&self) -> Result<(), WireError> {
        let signature = self.signature.as_ref().ok_or(WireError::MissingSignature)?;
        if schnorr::verify(&self.signing_hash(), signature, &self.voucher_id) {
            Ok(())
        } else {
            Err(WireError::SignatureInvalid)
        }
    }

    pub fn is_expired(&self, now: u64) -> bool {
        checksum::is_expired(u64::from(self.timestamp), u64::from(self.ttl), now)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(OFFER_SIGNED_LENGTH);
        out.extend_from_slice(&self.unsigned_bytes());
        if let Some(signature) = &self.signature {
            out.extend_from_slice(signature.as_bytes());
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() != OFFER_UNSIGNED_LENGTH && bytes.len() != OFFER_SIGNED_LENGTH {
            return Err(WireError::BadLength {
                expected: OFFER_SIGNED_LENGTH,
                got: bytes.len(),
            });
        }

        let voucher_id = PublicKey::from_slice(&bytes[..ID_END]).map_err(CryptoError::from)?;

        let mut sealed = [0u8; SEALED_SHARE_LENGTH];
        sealed.copy_from_slice(&bytes[ID_END..SEALED_END]);
        let mut nonce = [0u8; AES_NONCE_LENGTH];
        nonce.copy_from_slice(&bytes[SEALED_END..NONCE_END]);

        let mut challenge = [0u8; CHALLENGE_LENGTH];
        challenge.copy_from_slice(&bytes[NONCE_END..CHALLENGE_END]);

        let mut timestamp = [0u8; 4];
        timestamp.copy_from_slice(&bytes[CHALLENGE_END..TIMESTAMP_END]);

        let signature = if bytes.len() == OFFER_SIGNED_LENGTH {
            let sig = &bytes[TTL_END..TTL_END + SIGNATURE_LENGTH];
            Some(Signature::from_slice(sig).map_err(CryptoError::from)?)
        } else {
            None
        };

        Ok(Self {
            voucher_id,
            sealed_p2: SealedShare::from_sealed_bytes(&sealed, nonce),
            challenge,
            timestamp: u32::from_be_bytes(timestamp),
            ttl: bytes[TIMESTAMP_END],
            signature,
        })
    }
}
