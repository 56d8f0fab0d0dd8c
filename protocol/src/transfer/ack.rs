//! # Acknowledgement
//!
//! The receiver's answer to an Offer or a Snapshot, shown back to the sender.
//!
//! ```text
//! offset  len  field
//! 0       32   voucher id
//! 32      64   signature by the voucher key over SHA256(id || challenge || status)
//! 96      1    status
//! ```
//!
//! Signing needs the voucher key, which the receiver can only rebuild after
//! opening P2 with its own P3. A valid ack is therefore proof that the
//! receiver really took custody, and it is bound to one lock challenge.

use crate::config::{ACK_LENGTH, CHALLENGE_LENGTH, PUBLIC_KEY_LENGTH};
use crate::crypto::hash::sha256_concat;
use crate::crypto::schnorr::{self, PublicKey, Signature};
use crate::crypto::{CryptoError, SecretKey};

use super::error::WireError;

/// What the receiver did with the voucher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AckStatus {
    /// The receiver declined the voucher after inspecting it.
    Rejected = 0x00,
    /// The receiver stored the voucher.
    Accepted = 0x01,
}

impl AckStatus {
    pub fn from_byte(byte: u8) -> Result<Self, WireError> {
        match byte {
            0x00 => Ok(AckStatus::Rejected),
            0x01 => Ok(AckStatus::Accepted),
            other => Err(WireError::UnknownStatus(other)),
        }
    }
}

/// A decoded acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub voucher_id: PublicKey,
    pub signature: Signature,
    pub status: AckStatus,
}

impl Ack {
    fn signing_hash(
        voucher_id: &PublicKey,
        challenge: &[u8; CHALLENGE_LENGTH],
        status: AckStatus,
    ) -> [u8; 32] {
        sha256_concat(&[&voucher_id.as_bytes()[..], &challenge[..], &[status as u8][..]])
    }

    /// Sign an ack for `challenge` with the rebuilt voucher key.
    pub fn create(
        voucher_id: PublicKey,
        challenge: &[u8; CHALLENGE_LENGTH],
        status: AckStatus,
        key: &SecretKey,
    ) -> Result<Self, CryptoError> {
        let signature = schnorr::sign(&Self::signing_hash(&voucher_id, challenge, status), key)?;
        Ok(Self {
            voucher_id,
            signature,
            status,
        })
    }

    /// Check that this ack answers `challenge` for this voucher.
    pub fn verify(&self, challenge: &[u8; CHALLENGE_LENGTH]) -> Result<(), WireError> {
        let hash = Self::signing_hash(&self.voucher_id, challenge, self.status);
        if schnorr::verify(&hash, &self.signature, &self.voucher_id) {
            Ok(())
        } else {
            Err(WireError::SignatureInvalid)
        }
    }

    pub fn encode(&self) -> [u8; ACK_LENGTH] {
        let mut out = [0u8; ACK_LENGTH];
        out[..PUBLIC_KEY_LENGTH].copy_from_slice(self.voucher_id.as_bytes());
        out[PUBLIC_KEY_LENGTH..ACK_LENGTH - 1].copy_from_slice(self.signature.as_bytes());
        out[ACK_LENGTH - 1] = self.status as u8;
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() != ACK_LENGTH {
            return Err(WireError::BadLength {
                expected: ACK_LENGTH,
                got: bytes.len(),
            });
        }
        let voucher_id =
            PublicKey::from_slice(&bytes[..PUBLIC_KEY_LENGTH]).map_err(CryptoError::from)?;
        let signature = Signature::from_slice(&bytes[PUBLIC_KEY_LENGTH..ACK_LENGTH - 1])
            .map_err(CryptoError::from)?;
        let status = AckStatus::from_byte(bytes[ACK_LENGTH - 1])?;
        Ok(Self {
            voucher_id,
            signature,
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::schnorr::generate_key;

    #[test]
    fn create_encode_decode_verify() {
        let (key, id) = generate_key();
        let challenge = [0x42; 16];
        let ack = Ack::create(id, &challenge, AckStatus::Accepted, &key).unwrap();

        let bytes = ack.encode();
        assert_eq!(bytes.len(), 97);
        assert_eq!(bytes[96], 0x01);

        let decoded = Ack::decode(&bytes).unwrap();
        assert_eq!(decoded, ack);
        assert!(decoded.verify(&challenge).is_ok());
    }

    #[test]
    fn ack_is_bound_to_challenge() {
        let (key, id) = generate_key();
        let ack = Ack::create(id, &[1; 16], AckStatus::Accepted, &key).unwrap();
        assert_eq!(ack.verify(&[2; 16]), Err(WireError::SignatureInvalid));
    }

    #[test]
    fn status_flip_invalidates_signature() {
        let (key, id) = generate_key();
        let challenge = [9; 16];
        let mut bytes = Ack::create(id, &challenge, AckStatus::Rejected, &key)
            .unwrap()
            .encode();
        bytes[96] = 0x01;
        let decoded = Ack::decode(&bytes).unwrap();
        assert_eq!(decoded.verify(&challenge), Err(WireError::SignatureInvalid));
    }

    #[test]
    fn ack_from_non_holder_rejected() {
        let (_, id) = generate_key();
        let (stranger, _) = generate_key();
        let ack = Ack::create(id, &[3; 16], AckStatus::Accepted, &stranger).unwrap();
        assert_eq!(ack.verify(&[3; 16]), Err(WireError::SignatureInvalid));
    }

    #[test]
    fn malformed_acks_rejected() {
        assert!(matches!(
            Ack::decode(&[0u8; 96]),
            Err(WireError::BadLength { .. })
        ));
        let mut bytes = [0u8; 97];
        bytes[96] = 0x07;
        assert_eq!(Ack::decode(&bytes), Err(WireError::UnknownStatus(0x07)));
    }
}
