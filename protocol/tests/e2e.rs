//! End-to-end tests for Bon.
//!
//! These walk a voucher through its whole life with real components: sled
//! stores, a shared local event log, and the QR payloads encoded to bytes
//! and decoded again between wallets, the way two phones would see them.
//!
//! Each test builds its own stores and log. Nothing is shared between tests.

use std::sync::Arc;

use bon_protocol::config::{GhostPolicy, WalletConfig};
use bon_protocol::crypto::schnorr::{generate_key, sign_message, verify_message, PublicKey};
use bon_protocol::crypto::sharing::combine;
use bon_protocol::events::{EventTransport, LocalEventLog};
use bon_protocol::storage::{MemoryStore, SledStore, VoucherStore};
use bon_protocol::transfer::{Ack, Offer, Snapshot, WireError};
use bon_protocol::voucher::{
    issue_voucher, unix_now, IssueRequest, VoucherMetadata, VoucherStatus,
};
use bon_protocol::{BonError, Wallet};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

fn config() -> WalletConfig {
    WalletConfig {
        market_name: "croix-rousse".into(),
        market_seed: hex::encode(b"marche de la croix-rousse"),
        publish_timeout_ms: 1_000,
        reconcile_timeout_ms: 1_000,
        ..WalletConfig::default()
    }
}

async fn shared_log() -> Arc<LocalEventLog> {
    let log = Arc::new(LocalEventLog::open_temporary().expect("temp log"));
    log.connect().await.expect("connect");
    log
}

fn wallet_on(
    store: Arc<dyn VoucherStore>,
    identity: PublicKey,
    log: &Arc<LocalEventLog>,
) -> Wallet {
    let transport: Arc<dyn EventTransport> = log.clone();
    Wallet::open(config(), identity, store, transport).expect("open wallet")
}

fn wallet(log: &Arc<LocalEventLog>) -> Wallet {
    let store = Arc::new(SledStore::open_temporary().expect("temp store"));
    wallet_on(store, generate_key().1, log)
}

fn metadata(name: &str) -> VoucherMetadata {
    VoucherMetadata {
        issuer_name: name.into(),
        category: Some("food".into()),
        ..VoucherMetadata::default()
    }
}

/// Sender shows an offer, receiver scans it and shows an ack, sender scans
/// that. Both QR payloads go through their byte encoding.
async fn hand_over_offer(from: &Wallet, to: &Wallet, id: &PublicKey) -> Result<(), BonError> {
    let offer_qr = from.create_offer(id)?.encode();
    let ack_qr = to.receive_offer(&Offer::decode(&offer_qr)?)?.encode();
    from.complete_transfer(&Ack::decode(&ack_qr)?).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// 1. Key Reconstruction
// ---------------------------------------------------------------------------

#[test]
fn voucher_key_rebuilds_from_bearer_and_witness() {
    let (_, issuer) = generate_key();
    let request = IssueRequest {
        value: 1_000,
        issuer,
        validity_secs: None,
        metadata: metadata("Primeur"),
    };
    let voucher = issue_voucher(&request, unix_now()).unwrap();
    let bearer = voucher.share_p2.as_ref().unwrap();
    let witness = voucher.share_p3.as_ref().unwrap();

    let key = combine(&[bearer, witness]).unwrap();
    let message = b"bon test message";
    let signature = sign_message(message, &key).unwrap();

    assert!(verify_message(message, &signature, &voucher.id));

    let (_, stranger) = generate_key();
    assert!(!verify_message(message, &signature, &stranger));

    let mut bytes = *signature.as_bytes();
    bytes[40] ^= 0x01;
    let flipped = bon_protocol::crypto::Signature::from_bytes(bytes);
    assert!(!verify_message(message, &flipped, &voucher.id));
}

// ---------------------------------------------------------------------------
// 2. Full Circulation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn voucher_circulates_and_is_redeemed() {
    let log = shared_log().await;
    let bakery = wallet(&log);
    let alice = wallet(&log);
    let bob = wallet(&log);

    let voucher = bakery.issue(1_500, None, metadata("Boulangerie")).unwrap();
    let id = voucher.id;
    bakery.announce(&id).await.unwrap();
    alice.sync_known().await.unwrap();
    bob.sync_known().await.unwrap();

    // Bakery -> Alice.
    hand_over_offer(&bakery, &alice, &id).await.unwrap();
    assert_eq!(bakery.balance(), 0);
    assert_eq!(alice.balance(), 1_500);
    alice.reconcile().await.unwrap();
    assert_eq!(alice.ledger().get(&id).unwrap().transfer_count, 1);

    // Alice -> Bob.
    hand_over_offer(&alice, &bob, &id).await.unwrap();
    assert_eq!(alice.balance(), 0);
    assert_eq!(bob.balance(), 1_500);
    bob.reconcile().await.unwrap();
    assert_eq!(bob.ledger().get(&id).unwrap().transfer_count, 2);

    // Bob -> Bakery, via a snapshot this time.
    let snapshot_qr = bob.create_snapshot(&id).unwrap().encode();
    let ack = bakery
        .receive_snapshot(&Snapshot::decode(&snapshot_qr).unwrap())
        .unwrap();
    bob.complete_transfer(&Ack::decode(&ack.encode()).unwrap())
        .await
        .unwrap();
    assert_eq!(bob.balance(), 0);
    assert_eq!(bakery.balance(), 1_500);

    // Nobody's reconciliation disagrees with what happened.
    for wallet in [&bakery, &alice, &bob] {
        let report = wallet.reconcile().await.unwrap();
        assert!(report.spent.is_empty());
        assert!(report.ghosts.is_empty());
    }
    assert_eq!(bakery.ledger().get(&id).unwrap().transfer_count, 3);

    // The bakery redeems it.
    let burned = bakery.burn(&id).await.unwrap();
    assert_eq!(burned.status, VoucherStatus::Burned);
    assert!(burned.share_p1.is_none());
    assert!(burned.share_p2.is_none());
    assert_eq!(bakery.balance(), 0);

    alice.sync_known().await.unwrap();
    assert!(alice.known().unwrap().iter().all(|k| k.retired));
}

// ---------------------------------------------------------------------------
// 3. Double Spend
// ---------------------------------------------------------------------------

#[tokio::test]
async fn spent_voucher_cannot_be_offered_again() {
    let log = shared_log().await;
    let issuer = wallet(&log);
    let receiver = wallet(&log);

    let id = issuer.issue(200, None, metadata("Epicerie")).unwrap().id;
    issuer.announce(&id).await.unwrap();
    receiver.sync_known().await.unwrap();
    hand_over_offer(&issuer, &receiver, &id).await.unwrap();

    assert!(matches!(
        issuer.create_offer(&id),
        Err(BonError::Ledger(_))
    ));
    assert!(matches!(
        issuer.create_snapshot(&id),
        Err(BonError::Ledger(_))
    ));
}

#[tokio::test]
async fn stale_ack_does_not_confirm_a_new_lock() {
    let log = shared_log().await;
    let issuer = wallet(&log);
    let receiver = wallet(&log);

    let id = issuer.issue(300, None, metadata("Fromager")).unwrap().id;
    issuer.announce(&id).await.unwrap();
    receiver.sync_known().await.unwrap();

    let first = issuer.create_offer(&id).unwrap();
    let stale_ack = receiver.receive_offer(&first).unwrap();
    issuer.cancel(&id).unwrap();

    issuer.create_offer(&id).unwrap();
    assert!(matches!(
        issuer.complete_transfer(&stale_ack).await,
        Err(BonError::Wire(WireError::SignatureInvalid))
    ));
    assert_eq!(
        issuer.ledger().get(&id).unwrap().status,
        VoucherStatus::LockedForTransfer
    );
}

// ---------------------------------------------------------------------------
// 4. Crash Recovery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn restored_backup_learns_the_spend_from_the_log() {
    let log = shared_log().await;
    let (_, identity) = generate_key();
    let issuer = wallet_on(Arc::new(MemoryStore::new()), identity, &log);
    let receiver = wallet(&log);

    let id = issuer.issue(400, None, metadata("Caviste")).unwrap().id;
    issuer.announce(&id).await.unwrap();
    receiver.sync_known().await.unwrap();

    // A backup taken while the voucher was locked.
    issuer.create_offer(&id).unwrap();
    let backup = Arc::new(MemoryStore::new());
    backup.save(&issuer.ledger().get(&id).unwrap()).unwrap();

    hand_over_offer_from_lock(&issuer, &receiver, &id).await;

    let restored = wallet_on(backup, identity, &log);
    assert_eq!(restored.balance(), 400);
    let report = restored.start().await.unwrap();
    assert_eq!(report.spent, vec![id]);
    assert_eq!(restored.balance(), 0);
    assert!(restored.ledger().get(&id).unwrap().share_p2.is_none());
}

async fn hand_over_offer_from_lock(from: &Wallet, to: &Wallet, id: &PublicKey) {
    let offer = from.current_offer(id).unwrap();
    let ack = to.receive_offer(&offer).unwrap();
    from.complete_transfer(&ack).await.unwrap();
}

#[tokio::test]
async fn received_voucher_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let log = shared_log().await;
    let issuer = wallet(&log);
    let (_, identity) = generate_key();

    let id = issuer.issue(120, None, metadata("Torrefacteur")).unwrap().id;
    issuer.announce(&id).await.unwrap();

    {
        let store = Arc::new(SledStore::open(dir.path()).unwrap());
        let receiver = wallet_on(store, identity, &log);
        receiver.sync_known().await.unwrap();
        let offer = issuer.create_offer(&id).unwrap();
        // Ack never reaches the sender: the receiver already persisted.
        receiver.receive_offer(&offer).unwrap();
    }

    let store = Arc::new(SledStore::open(dir.path()).unwrap());
    let receiver = wallet_on(store, identity, &log);
    assert_eq!(receiver.balance(), 120);
    assert!(receiver.ledger().get(&id).unwrap().is_held());
}

#[tokio::test]
async fn surface_policy_leaves_ghost_locked() {
    let log = shared_log().await;
    let store = Arc::new(MemoryStore::new());
    let transport: Arc<dyn EventTransport> = log.clone();
    let surface = Wallet::open(
        WalletConfig {
            ghost_policy: GhostPolicy::Surface,
            ..config()
        },
        generate_key().1,
        store,
        transport,
    )
    .unwrap();

    let id = surface.issue(90, None, metadata("Fleuriste")).unwrap().id;
    surface.create_offer(&id).unwrap();

    let report = surface.reconcile_at(unix_now() + 3_600).await.unwrap();
    assert_eq!(report.ghosts, vec![id]);
    assert!(report.restored.is_empty());
    assert_eq!(
        surface.ledger().get(&id).unwrap().status,
        VoucherStatus::LockedForTransfer
    );

    surface.cancel(&id).unwrap();
    assert_eq!(surface.balance(), 90);
}
