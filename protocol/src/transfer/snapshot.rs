//! # Snapshot (QRv2)
//!
//! A self-contained voucher in one QR code. Unlike an Offer it also carries
//! the value and issuer, so a receiver that has never seen the voucher's
//! announcement can still display what it is being handed.
//!
//! ```text
//! offset  len  field
//! 0       3    magic "BON"
//! 3       1    version 0x02
//! 4       32   voucher id
//! 36      4    value, minor units, u32 BE
//! 40      32   issuer id
//! 72      32   P2 ciphertext
//! 104     12   AES-GCM nonce
//! 116     16   AES-GCM tag
//! 132     16   challenge
//! 148     20   issuer name, UTF-8, zero padded
//! 168     4    timestamp, u32 BE, unix seconds
//! 172     64   Schnorr signature over SHA256(bytes 0..172)
//! 236     4    CRC-32 (zlib) over bytes 0..236, BE
//! ```
//!
//! Decoding checks the CRC before looking at a single field. A snapshot
//! with a bad trailer is discarded whole.

use crate::config::{
    AES_NONCE_LENGTH, AES_TAG_LENGTH, CHALLENGE_LENGTH, ISSUER_NAME_LENGTH, PUBLIC_KEY_LENGTH,
    SECRET_LENGTH, SIGNATURE_LENGTH, SNAPSHOT_LENGTH, SNAPSHOT_MAGIC, SNAPSHOT_VERSION,
};
use crate::crypto::encryption::SealedShare;
use crate::crypto::hash::sha256;
use crate::crypto::schnorr::{self, PublicKey, Signature};
use crate::crypto::{CryptoError, SecretKey};

use super::checksum::{self, CRC_LENGTH};
use super::error::WireError;

const HEADER_END: usize = 4;
const ID_END: usize = HEADER_END + PUBLIC_KEY_LENGTH;
const VALUE_END: usize = ID_END + 4;
const ISSUER_END: usize = VALUE_END + PUBLIC_KEY_LENGTH;
const CIPHERTEXT_END: usize = ISSUER_END + SECRET_LENGTH;
const NONCE_END: usize = CIPHERTEXT_END + AES_NONCE_LENGTH;
const TAG_END: usize = NONCE_END + AES_TAG_LENGTH;
const CHALLENGE_END: usize = TAG_END + CHALLENGE_LENGTH;
const NAME_END: usize = CHALLENGE_END + ISSUER_NAME_LENGTH;
const TIMESTAMP_END: usize = NAME_END + 4;
const SIGNATURE_END: usize = TIMESTAMP_END + SIGNATURE_LENGTH;

/// Everything in a snapshot except the signature and the CRC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotBody {
    pub voucher_id: PublicKey,
    pub value: u32,
    pub issuer_id: PublicKey,
    pub sealed_p2: SealedShare,
    pub challenge: [u8; CHALLENGE_LENGTH],
    pub issuer_name: String,
    pub timestamp: u32,
}

/// A signed snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub body: SnapshotBody,
    pub signature: Signature,
}

/// Cut `name` to at most `max_bytes` of UTF-8 without splitting a character.
/// NUL characters are dropped, since the field is zero padded.
pub fn truncate_name(name: &str, max_bytes: usize) -> String {
    let mut out = String::with_capacity(max_bytes);
    for ch in name.chars().filter(|c| *c != '\0') {
        if out.len() + ch.len_utf8() > max_bytes {
            break;
        }
        out.push(ch);
    }
    out
}

impl SnapshotBody {
    fn to_bytes(&self) -> [u8; TIMESTAMP_END] {
        let mut out = [0u8; TIMESTAMP_END];
        out[..3].copy_from_slice(&SNAPSHOT_MAGIC);
        out[3] = SNAPSHOT_VERSION;
        out[HEADER_END..ID_END].copy_from_slice(self.voucher_id.as_bytes());
        out[ID_END..VALUE_END].copy_from_slice(&self.value.to_be_bytes());
        out[VALUE_END..ISSUER_END].copy_from_slice(self.issuer_id.as_bytes());
        out[ISSUER_END..CIPHERTEXT_END].copy_from_slice(&self.sealed_p2.ciphertext);
        out[CIPHERTEXT_END..NONCE_END].copy_from_slice(&self.sealed_p2.nonce);
        out[NONCE_END..TAG_END].copy_from_slice(&self.sealed_p2.tag);
        out[TAG_END..CHALLENGE_END].copy_from_slice(&self.challenge);
        let name = truncate_name(&self.issuer_name, ISSUER_NAME_LENGTH);
        out[CHALLENGE_END..CHALLENGE_END + name.len()].copy_from_slice(name.as_bytes());
        out[NAME_END..TIMESTAMP_END].copy_from_slice(&self.timestamp.to_be_bytes());
        out
    }

    /// Truncate the issuer name and sign.
    pub fn sign(mut self, key: &SecretKey) -> Result<Snapshot, CryptoError> {
        self.issuer_name = truncate_name(&self.issuer_name, ISSUER_NAME_LENGTH);
        let signature = schnorr::sign(&sha256(&self.to_bytes()), key)?;
        Ok(Snapshot {
            body: self,
            signature,
        })
    }
}

impl Snapshot {
    /// Check the signature against the embedded voucher id.
    pub fn verify(&self) -> Result<(), WireError> {
        let hash = sha256(&self.body.to_bytes());
        if schnorr::verify(&hash, &self.signature, &self.body.voucher_id) {
            Ok(())
        } else {
            Err(WireError::SignatureInvalid)
        }
    }

    pub fn is_expired(&self, ttl_secs: u32, now: u64) -> bool {
        checksum::is_expired(u64::from(self.body.timestamp), u64::from(ttl_secs), now)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(SNAPSHOT_LENGTH);
        out.extend_from_slice(&self.body.to_bytes());
        out.extend_from_slice(self.signature.as_bytes());
        checksum::append_crc(&mut out);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() != SNAPSHOT_LENGTH {
            return Err(WireError::BadLength {
                expected: SNAPSHOT_LENGTH,
                got: bytes.len(),
            });
        }
        let payload = checksum::strip_crc(bytes)?;
        debug_assert_eq!(payload.len(), SNAPSHOT_LENGTH - CRC_LENGTH);

        if payload[..3] != SNAPSHOT_MAGIC {
            return Err(WireError::BadMagic);
        }
        if payload[3] != SNAPSHOT_VERSION {
            return Err(WireError::UnsupportedVersion(payload[3]));
        }

        let voucher_id =
            PublicKey::from_slice(&payload[HEADER_END..ID_END]).map_err(CryptoError::from)?;
        let issuer_id =
            PublicKey::from_slice(&payload[VALUE_END..ISSUER_END]).map_err(CryptoError::from)?;

        let mut value = [0u8; 4];
        value.copy_from_slice(&payload[ID_END..VALUE_END]);

        let mut ciphertext = [0u8; SECRET_LENGTH];
        ciphertext.copy_from_slice(&payload[ISSUER_END..CIPHERTEXT_END]);
        let mut nonce = [0u8; AES_NONCE_LENGTH];
        nonce.copy_from_slice(&payload[CIPHERTEXT_END..NONCE_END]);
        let mut tag = [0u8; AES_TAG_LENGTH];
        tag.copy_from_slice(&payload[NONCE_END..TAG_END]);

        let mut challenge = [0u8; CHALLENGE_LENGTH];
        challenge.copy_from_slice(&payload[TAG_END..CHALLENGE_END]);

        let name_field = &payload[CHALLENGE_END..NAME_END];
        let name_len = name_field
            .iter()
            .rposition(|b| *b != 0)
            .map_or(0, |last| last + 1);
        let issuer_name = std::str::from_utf8(&name_field[..name_len])
            .map_err(|_| WireError::InvalidIssuerName)?
            .to_string();

        let mut timestamp = [0u8; 4];
        timestamp.copy_from_slice(&payload[NAME_END..TIMESTAMP_END]);

        let signature = Signature::from_slice(&payload[TIMESTAMP_END..SIGNATURE_END])
            .map_err(CryptoError::from)?;

        Ok(Self {
            body: SnapshotBody {
                voucher_id,
                value: u32::from_be_bytes(value),
                issuer_id,
                sealed_p2: SealedShare {
                    ciphertext,
                    nonce,
                    tag,
                },
                challenge,
                issuer_name,
                timestamp: u32::from_be_bytes(timestamp),
            },
            signature,
        })
    }
}
