//! # Offline Handshake
//!
//! The steps of a QR transfer, as pure functions over vouchers and wire
//! messages. Persisting state between the steps is the caller's job (the
//! [`Wallet`](crate::wallet::Wallet) does it through the ledger):
//!
//! ```text
//!   sender                                      receiver
//!   lock_for_transfer (persisted)
//!   prepare_offer ──────── Offer QR ──────────► accept_offer
//!                                               persist voucher
//!   verify_ack ◄────────── Ack QR ───────────── emit Ack
//!   confirm_transfer (persisted)
//! ```
//!
//! A snapshot replaces the offer when the receiver has never seen the
//! voucher announced; it carries value, issuer and issuer name itself.
//!
//! The voucher key is rebuilt from P2 and P3 for the length of one
//! signature and wiped when the [`SecretKey`] goes out of scope, on every
//! return path.

use tracing::debug;

use crate::config::{CHALLENGE_LENGTH, ISSUER_NAME_LENGTH};
use crate::crypto::encryption::{decrypt_share, encrypt_share, p2_key, SealedShare};
use crate::crypto::schnorr::{public_key, PublicKey};
use crate::crypto::secret::SecretKey;
use crate::crypto::sharing::{combine, Share, ShareRole};
use crate::voucher::model::{TransferLock, Voucher, VoucherStatus};

use super::ack::{Ack, AckStatus};
use super::error::WireError;
use super::offer::Offer;
use super::snapshot::{truncate_name, Snapshot, SnapshotBody};

/// Wire timestamps are u32 seconds.
fn wire_time(now: u64) -> u32 {
    u32::try_from(now).unwrap_or(u32::MAX)
}

/// Rebuild the voucher key from bearer and witness and check it is the key
/// behind `voucher_id`.
pub fn voucher_key(
    voucher_id: &PublicKey,
    bearer: &Share,
    witness: &Share,
) -> Result<SecretKey, WireError> {
    let key = combine(&[bearer, witness])?;
    if public_key(&key)? != *voucher_id {
        return Err(WireError::KeyMismatch);
    }
    Ok(key)
}

/// The lock and both shares a sender needs.
fn sender_parts(voucher: &Voucher) -> Result<(&TransferLock, &Share, &Share), WireError> {
    let lock = match (&voucher.status, &voucher.lock) {
        (VoucherStatus::LockedForTransfer, Some(lock)) => lock,
        _ => return Err(WireError::NotLocked),
    };
    let bearer = voucher.share_p2.as_ref().ok_or(WireError::MissingShare("P2"))?;
    let witness = voucher.share_p3.as_ref().ok_or(WireError::MissingShare("P3"))?;
    Ok((lock, bearer, witness))
}

// ---------------------------------------------------------------------------
// Sender
// ---------------------------------------------------------------------------

/// Build and sign the offer for a locked voucher.
pub fn prepare_offer(voucher: &Voucher, ttl: u8, now: u64) -> Result<Offer, WireError> {
    let (lock, bearer, witness) = sender_parts(voucher)?;
    let key = voucher_key(&voucher.id, bearer, witness)?;
    let sealed_p2 = encrypt_share(bearer, &p2_key(witness))?;

    let mut offer = Offer {
        voucher_id: voucher.id,
        sealed_p2,
        challenge: lock.challenge,
        timestamp: wire_time(now),
        ttl,
        signature: None,
    };
    offer.sign(&key)?;
    debug!(voucher = %voucher.id.short(), ttl, "offer prepared");
    Ok(offer)
}

/// Build and sign a self-contained snapshot for a locked voucher.
pub fn prepare_snapshot(voucher: &Voucher, now: u64) -> Result<Snapshot, WireError> {
    let (lock, bearer, witness) = sender_parts(voucher)?;
    let key = voucher_key(&voucher.id, bearer, witness)?;
    let sealed_p2 = encrypt_share(bearer, &p2_key(witness))?;

    let body = SnapshotBody {
        voucher_id: voucher.id,
        value: voucher.value,
        issuer_id: voucher.issuer,
        sealed_p2,
        challenge: lock.challenge,
        issuer_name: truncate_name(&voucher.metadata.issuer_name, ISSUER_NAME_LENGTH),
        timestamp: wire_time(now),
    };
    let snapshot = body.sign(&key)?;
    debug!(voucher = %voucher.id.short(), "snapshot prepared");
    Ok(snapshot)
}

/// Check the receiver's ack against the voucher's lock. A correctly signed
/// rejection is [`WireError::Declined`].
pub fn verify_ack(ack: &Ack, voucher: &Voucher) -> Result<(), WireError> {
    if ack.voucher_id != voucher.id {
        return Err(WireError::VoucherMismatch);
    }
    let lock = voucher.lock.as_ref().ok_or(WireError::NotLocked)?;
    ack.verify(&lock.challenge)?;
    match ack.status {
        AckStatus::Accepted => Ok(()),
        AckStatus::Rejected => Err(WireError::Declined),
    }
}

// ---------------------------------------------------------------------------
// Receiver
// ---------------------------------------------------------------------------

/// What a receiver ends up with after opening an offer or snapshot.
#[derive(Debug)]
pub struct Received {
    /// P2, opened with the receiver's P3.
    pub bearer: Share,
    /// The ack to show back. Only emit it once the voucher is persisted.
    pub ack: Ack,
}

fn open_and_acknowledge(
    voucher_id: &PublicKey,
    sealed: &SealedShare,
    challenge: &[u8; CHALLENGE_LENGTH],
    witness: &Share,
    status: AckStatus,
) -> Result<Received, WireError> {
    let bearer = decrypt_share(sealed, &p2_key(witness), ShareRole::Bearer)?;
    let key = voucher_key(voucher_id, &bearer, witness)?;
    let ack = Ack::create(*voucher_id, challenge, status, &key)?;
    Ok(Received { bearer, ack })
}

/// Open an offer with the receiver's cached P3.
///
/// Expiry is checked before anything is decrypted, then the sender's
/// signature.
pub fn accept_offer(offer: &Offer, witness: &Share, now: u64) -> Result<Received, WireError> {
    if offer.is_expired(now) {
        return Err(WireError::OfferExpired);
    }
    offer.verify()?;
    let received = open_and_acknowledge(
        &offer.voucher_id,
        &offer.sealed_p2,
        &offer.challenge,
        witness,
        AckStatus::Accepted,
    )?;
    debug!(voucher = %offer.voucher_id.short(), "offer accepted");
    Ok(received)
}

/// Open a snapshot. Snapshots carry no TTL of their own; `ttl_secs` is the
/// window this receiver accepts.
pub fn accept_snapshot(
    snapshot: &Snapshot,
    witness: &Share,
    ttl_secs: u32,
    now: u64,
) -> Result<Received, WireError> {
    if snapshot.is_expired(ttl_secs, now) {
        return Err(WireError::SnapshotExpired);
    }
    snapshot.verify()?;
    let body = &snapshot.body;
    let received = open_and_acknowledge(
        &body.voucher_id,
        &body.sealed_p2,
        &body.challenge,
        witness,
        AckStatus::Accepted,
    )?;
    debug!(voucher = %body.voucher_id.short(), value = body.value, "snapshot accepted");
    Ok(received)
}

/// Answer a valid offer with a signed rejection. The receiver still has to
/// open P2 to sign, and then discards it.
pub fn decline_offer(offer: &Offer, witness: &Share, now: u64) -> Result<Ack, WireError> {
    if offer.is_expired(now) {
        return Err(WireError::OfferExpired);
    }
    offer.verify()?;
    let Received { ack, .. } = open_and_acknowledge(
        &offer.voucher_id,
        &offer.sealed_p2,
        &offer.challenge,
        witness,
        AckStatus::Rejected,
    )?;
    Ok(ack)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::schnorr::generate_key;
    use crate::voucher::issuance::{issue_voucher, IssueRequest};
    use crate::voucher::model::VoucherMetadata;

    const NOW: u64 = 1_700_000_000;

    fn locked_voucher() -> Voucher {
        let (_, issuer) = generate_key();
        let request = IssueRequest {
            value: 1_500,
            issuer,
            validity_secs: None,
            metadata: VoucherMetadata {
                market: "lyon".into(),
                issuer_name: "Boulangerie du Vieux Port".into(),
                ..VoucherMetadata::default()
            },
        };
        let mut voucher = issue_voucher(&request, NOW - 100).unwrap();
        voucher.status = VoucherStatus::LockedForTransfer;
        voucher.lock = Some(TransferLock {
            timestamp: NOW,
            challenge: [9; 16],
            ttl_secs: 300,
        });
        voucher
    }

    fn witness(voucher: &Voucher) -> Share {
        voucher.share_p3.clone().unwrap()
    }

    #[test]
    fn offer_round_trip_through_wire() {
        let voucher = locked_voucher();
        let offer = prepare_offer(&voucher, 120, NOW).unwrap();
        let scanned = Offer::decode(&offer.encode()).unwrap();

        let received = accept_offer(&scanned, &witness(&voucher), NOW + 10).unwrap();
        assert_eq!(Some(&received.bearer), voucher.share_p2.as_ref());

        let ack = Ack::decode(&received.ack.encode()).unwrap();
        verify_ack(&ack, &voucher).unwrap();
    }

    #[test]
    fn unlocked_voucher_cannot_offer() {
        let mut voucher = locked_voucher();
        voucher.status = VoucherStatus::Active;
        voucher.lock = None;
        assert_eq!(
            prepare_offer(&voucher, 120, NOW).unwrap_err(),
            WireError::NotLocked
        );
    }

    #[test]
    fn spent_voucher_has_no_bearer_share() {
        let mut voucher = locked_voucher();
        voucher.share_p2 = None;
        assert_eq!(
            prepare_offer(&voucher, 120, NOW).unwrap_err(),
            WireError::MissingShare("P2")
        );
    }

    #[test]
    fn expired_offer_rejected_before_decryption() {
        let voucher = locked_voucher();
        let mut offer = prepare_offer(&voucher, 60, NOW).unwrap();
        // Garbage ciphertext would fail authentication; expiry must win.
        offer.sealed_p2 = SealedShare::from_sealed_bytes(&[0; 48], [0; 12]);
        assert_eq!(
            accept_offer(&offer, &witness(&voucher), NOW + 60).unwrap_err(),
            WireError::OfferExpired
        );
    }

    #[test]
    fn wrong_witness_fails_authentication() {
        let voucher = locked_voucher();
        let other = locked_voucher();
        let offer = prepare_offer(&voucher, 120, NOW).unwrap();
        assert!(matches!(
            accept_offer(&offer, &witness(&other), NOW),
            Err(WireError::Crypto(_))
        ));
    }

    #[test]
    fn unsigned_offer_is_refused() {
        let voucher = locked_voucher();
        let mut offer = prepare_offer(&voucher, 120, NOW).unwrap();
        offer.signature = None;
        let scanned = Offer::decode(&offer.encode()).unwrap();
        assert_eq!(
            accept_offer(&scanned, &witness(&voucher), NOW).unwrap_err(),
            WireError::MissingSignature
        );
    }

    #[test]
    fn ack_for_other_challenge_is_invalid() {
        let voucher = locked_voucher();
        let offer = prepare_offer(&voucher, 120, NOW).unwrap();
        let received = accept_offer(&offer, &witness(&voucher), NOW).unwrap();

        let mut relocked = voucher.clone();
        relocked.lock.as_mut().unwrap().challenge = [1; 16];
        assert_eq!(
            verify_ack(&received.ack, &relocked).unwrap_err(),
            WireError::SignatureInvalid
        );
    }

    #[test]
    fn declined_ack_is_reported() {
        let voucher = locked_voucher();
        let offer = prepare_offer(&voucher, 120, NOW).unwrap();
        let ack = decline_offer(&offer, &witness(&voucher), NOW).unwrap();
        assert_eq!(ack.status, AckStatus::Rejected);
        assert_eq!(verify_ack(&ack, &voucher).unwrap_err(), WireError::Declined);
    }

    #[test]
    fn snapshot_carries_descriptor() {
        let voucher = locked_voucher();
        let snapshot = prepare_snapshot(&voucher, NOW).unwrap();
        let scanned = Snapshot::decode(&snapshot.encode()).unwrap();
        assert_eq!(scanned.body.value, 1_500);
        assert_eq!(scanned.body.issuer_id, voucher.issuer);
        assert_eq!(scanned.body.issuer_name, "Boulangerie du Vieux");

        let received = accept_snapshot(&scanned, &witness(&voucher), 600, NOW + 5).unwrap();
        verify_ack(&received.ack, &voucher).unwrap();

        assert_eq!(
            accept_snapshot(&scanned, &witness(&voucher), 600, NOW + 600).unwrap_err(),
            WireError::SnapshotExpired
        );
    }

    #[test]
    fn tampered_voucher_id_fails_key_check() {
        let voucher = locked_voucher();
        let (_, other_id) = generate_key();
        let bearer = voucher.share_p2.clone().unwrap();
        assert!(matches!(
            voucher_key(&other_id, &bearer, &witness(&voucher)),
            Err(WireError::KeyMismatch)
        ));
    }
}
