//! # Wallet
//!
//! The facade an application drives. A [`Wallet`] owns the
//! [`VoucherLedger`], borrows a [`VoucherStore`] and an [`EventTransport`],
//! and sequences every operation so that the ledger never waits on the
//! network:
//!
//! ```text
//!   sign (ephemeral key) ──► outbox ──► ledger transition ──► publish
//!                            durable     durable              may fail
//! ```
//!
//! An event that fails to publish stays in the outbox and is retried by
//! [`Wallet::flush_outbox`], which [`Wallet::reconcile`] runs first.
//!
//! ## Identity
//!
//! `identity` is this wallet's public key. It is the issuer of vouchers
//! created here and the `from_identity` of transfer records signed here;
//! reconciliation uses it to tell this wallet's spends from those of
//! earlier holders.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::circulation::{proof_event, publish_proof};
use crate::config::{
    GhostPolicy, WalletConfig, KIND_ANNOUNCEMENT, KIND_RETIREMENT, KIND_TRANSFER, KIND_WITNESS,
    SHARE_THRESHOLD,
};
use crate::crypto::encryption::{day_key, decrypt_share, encrypt_share};
use crate::crypto::schnorr::{public_key, PublicKey};
use crate::crypto::sharing::{combine, Share, ShareError, ShareRole};
use crate::crypto::SecretKey;
use crate::error::{BonError, BonResult};
use crate::events::event::{
    self, Event, EventError, Filter, RetirementRecord, TransferRecord, WitnessPayload,
};
use crate::events::transport::{fetch_stored, publish_with_timeout, EventTransport, PublishAck};
use crate::storage::db::VoucherStore;
use crate::transfer::{
    accept_offer, accept_snapshot, prepare_offer, prepare_snapshot, verify_ack, Ack, Offer,
    Snapshot, WireError,
};
use crate::voucher::issuance::{issue_voucher, IssueRequest};
use crate::voucher::ledger::{LedgerError, ReconcileReport, VoucherLedger};
use crate::voucher::model::{
    unix_now, utc_date, KnownVoucher, Voucher, VoucherDescriptor, VoucherId, VoucherMetadata,
    VoucherStatus,
};

/// Rebuild the voucher key from any two shares the wallet holds and check
/// it against the id.
fn signing_key(voucher: &Voucher) -> BonResult<SecretKey> {
    let shares: Vec<&Share> = [&voucher.share_p1, &voucher.share_p2, &voucher.share_p3]
        .into_iter()
        .flatten()
        .collect();
    if shares.len() < SHARE_THRESHOLD {
        return Err(ShareError::InsufficientShares(shares.len()).into());
    }
    let key = combine(&shares[..SHARE_THRESHOLD])?;
    if public_key(&key)? != voucher.id {
        return Err(WireError::KeyMismatch.into());
    }
    Ok(key)
}

/// Refuse a voucher whose validity ran out, before any share is decrypted.
fn ensure_unexpired(descriptor: &VoucherDescriptor, now: u64) -> BonResult<()> {
    if descriptor.is_past_expiry(now) {
        return Err(LedgerError::VoucherExpired.into());
    }
    Ok(())
}

/// A Bon wallet.
pub struct Wallet {
    config: WalletConfig,
    identity: PublicKey,
    ledger: VoucherLedger,
    store: Arc<dyn VoucherStore>,
    transport: Arc<dyn EventTransport>,
}

impl Wallet {
    /// Load the ledger from `store`. Does not touch the network.
    pub fn open(
        config: WalletConfig,
        identity: PublicKey,
        store: Arc<dyn VoucherStore>,
        transport: Arc<dyn EventTransport>,
    ) -> BonResult<Self> {
        let ledger = VoucherLedger::open(Arc::clone(&store))?;
        Ok(Self {
            config,
            identity,
            ledger,
            store,
            transport,
        })
    }

    /// Connect, reconcile and sweep expired vouchers. Run once before any
    /// new transfer.
    pub async fn start(&self) -> BonResult<ReconcileReport> {
        if let Err(e) = self.transport.connect().await {
            warn!(error = %e, "event log unavailable at startup");
        }
        let report = self.reconcile().await?;
        let expired = self.expire_due()?;
        if !expired.is_empty() {
            info!(count = expired.len(), "vouchers expired");
        }
        Ok(report)
    }

    pub fn identity(&self) -> &PublicKey {
        &self.identity
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    pub fn ledger(&self) -> &VoucherLedger {
        &self.ledger
    }

    pub fn known(&self) -> BonResult<Vec<KnownVoucher>> {
        Ok(self.store.list_known()?)
    }

    pub fn balance(&self) -> u64 {
        self.ledger.balance()
    }

    fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.config.publish_timeout_ms)
    }

    fn reconcile_timeout(&self) -> Duration {
        Duration::from_millis(self.config.reconcile_timeout_ms)
    }

    fn market_seed(&self) -> BonResult<Vec<u8>> {
        self.config
            .market_seed_bytes()
            .ok_or(BonError::MissingMarketSeed)
    }

    fn voucher(&self, id: &VoucherId) -> BonResult<Voucher> {
        Ok(self.ledger.get(id).ok_or(LedgerError::NotFound(*id))?)
    }

    async fn publish(&self, event: &Event) -> Result<PublishAck, EventError> {
        publish_with_timeout(self.transport.as_ref(), event, self.publish_timeout()).await
    }

    /// Publish an event already in the outbox and clear it on success.
    async fn publish_outboxed(&self, event: &Event) -> BonResult<()> {
        match self.publish(event).await {
            Ok(_) => {
                self.store.remove_outbox(&event.id)?;
                Ok(())
            }
            Err(source) => {
                warn!(event = %event.id_hex(), error = %source, "publish failed; kept in outbox");
                Err(BonError::Unpublished {
                    event: event.id_hex(),
                    source,
                })
            }
        }
    }

    // -- Issuance -----------------------------------------------------------

    /// Issue a voucher held entirely by this wallet.
    pub fn issue(
        &self,
        value: u32,
        validity_secs: Option<u64>,
        mut metadata: VoucherMetadata,
    ) -> BonResult<Voucher> {
        if metadata.market.is_empty() {
            metadata.market = self.config.market_name.clone();
        }
        let request = IssueRequest {
            value,
            issuer: self.identity,
            validity_secs,
            metadata,
        };
        let voucher = issue_voucher(&request, unix_now())?;
        self.ledger.insert(voucher.clone())?;
        Ok(voucher)
    }

    fn witness_event(
        &self,
        voucher: &Voucher,
        key: &SecretKey,
        seed: &[u8],
        date: NaiveDate,
        now: u64,
    ) -> BonResult<Event> {
        let witness = voucher
            .share_p3
            .as_ref()
            .ok_or(WireError::MissingShare("P3"))?;
        let sealed = encrypt_share(witness, &day_key(seed, date))?;
        let payload = WitnessPayload { date, sealed };
        Ok(event::witness(&voucher.id, &payload, key, now)?)
    }

    /// Publish the announcement and today's witness for a voucher issued here.
    pub async fn announce(&self, id: &VoucherId) -> BonResult<()> {
        let now = unix_now();
        let voucher = self.voucher(id)?;
        if !voucher.is_issued_here() {
            return Err(LedgerError::NotIssuer.into());
        }
        let seed = self.market_seed()?;

        let (announcement, witness) = {
            let key = signing_key(&voucher)?;
            let announcement = event::announcement(&voucher.descriptor(), &key, now)?;
            let witness = self.witness_event(&voucher, &key, &seed, utc_date(now), now)?;
            (announcement, witness)
        };

        self.publish(&announcement).await?;
        self.publish(&witness).await?;
        self.store.put_known(&KnownVoucher {
            descriptor: voucher.descriptor(),
            witness: voucher.share_p3.clone(),
            retired: false,
        })?;
        info!(voucher = %id.short(), "voucher announced");
        Ok(())
    }

    /// Publish the witness for `date`. Issuers do this daily so that P3
    /// stays readable under the rotating day key.
    pub async fn publish_witness(&self, id: &VoucherId, date: NaiveDate) -> BonResult<()> {
        let now = unix_now();
        let voucher = self.voucher(id)?;
        let seed = self.market_seed()?;
        let event = {
            let key = signing_key(&voucher)?;
            self.witness_event(&voucher, &key, &seed, date, now)?
        };
        self.publish(&event).await?;
        debug!(voucher = %id.short(), %date, "witness published");
        Ok(())
    }

    /// Read announcements, witnesses and retirements from the log into the
    /// known-voucher cache. Returns how many entries changed.
    pub async fn sync_known(&self) -> BonResult<usize> {
        let seed = self.market_seed()?;
        let filter = Filter::new().kinds([KIND_ANNOUNCEMENT, KIND_WITNESS, KIND_RETIREMENT]);
        let events = fetch_stored(self.transport.as_ref(), filter, self.reconcile_timeout()).await?;

        let mut known: HashMap<VoucherId, KnownVoucher> = self
            .store
            .list_known()?
            .into_iter()
            .map(|k| (k.descriptor.id, k))
            .collect();
        let mut touched = BTreeSet::new();

        for event in events.iter().filter(|e| e.kind == KIND_ANNOUNCEMENT) {
            let descriptor: VoucherDescriptor = match event.decode_content() {
                Ok(descriptor) => descriptor,
                Err(e) => {
                    warn!(event = %event.id_hex(), error = %e, "bad announcement");
                    continue;
                }
            };
            if descriptor.id != event.pubkey {
                warn!(event = %event.id_hex(), "announcement not signed by its voucher");
                continue;
            }
            let id = descriptor.id;
            known.entry(id).or_insert_with(|| {
                touched.insert(id);
                KnownVoucher {
                    descriptor,
                    witness: None,
                    retired: false,
                }
            });
        }

        for event in events.iter().filter(|e| e.kind == KIND_WITNESS) {
            let Some(entry) = known.get_mut(&event.pubkey) else {
                continue;
            };
            if entry.witness.is_some() {
                continue;
            }
            let payload: WitnessPayload = match event.decode_content() {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(event = %event.id_hex(), error = %e, "bad witness");
                    continue;
                }
            };
            match decrypt_share(&payload.sealed, &day_key(&seed, payload.date), ShareRole::Witness) {
                Ok(share) => {
                    entry.witness = Some(share);
                    touched.insert(event.pubkey);
                }
                Err(_) => debug!(event = %event.id_hex(), "witness sealed for another market"),
            }
        }

        for event in events.iter().filter(|e| e.kind == KIND_RETIREMENT) {
            if let Some(entry) = known.get_mut(&event.pubkey) {
                if !entry.retired {
                    entry.retired = true;
                    touched.insert(event.pubkey);
                }
            }
        }

        for id in &touched {
            if let Some(entry) = known.get(id) {
                self.store.put_known(entry)?;
            }
        }
        info!(changed = touched.len(), "known vouchers synced");
        Ok(touched.len())
    }

    // -- Sending ------------------------------------------------------------

    /// Lock the voucher and build the offer. The lock is durable before the
    /// offer exists; if building fails the lock is released.
    pub fn create_offer(&self, id: &VoucherId) -> BonResult<Offer> {
        let now = unix_now();
        let locked = self
            .ledger
            .lock_for_transfer_at(id, None, self.config.lock_ttl_secs, now)?;
        match prepare_offer(&locked, self.config.effective_offer_ttl(), now) {
            Ok(offer) => Ok(offer),
            Err(e) => {
                self.ledger.cancel_lock(id)?;
                Err(e.into())
            }
        }
    }

    /// Rebuild the offer for a voucher that is already locked, e.g. after
    /// the first QR code was not scanned. The ttl never outlives the lock.
    pub fn current_offer(&self, id: &VoucherId) -> BonResult<Offer> {
        let now = unix_now();
        let locked = self.ledger.live_lock(id, now)?;
        let remaining = locked
            .lock
            .as_ref()
            .map_or(0, |lock| lock.deadline().saturating_sub(now));
        let ttl = u64::from(self.config.effective_offer_ttl()).min(remaining) as u8;
        Ok(prepare_offer(&locked, ttl, now)?)
    }

    /// Lock the voucher and build a self-contained snapshot.
    pub fn create_snapshot(&self, id: &VoucherId) -> BonResult<Snapshot> {
        let now = unix_now();
        let locked = self
            .ledger
            .lock_for_transfer_at(id, None, self.config.lock_ttl_secs, now)?;
        match prepare_snapshot(&locked, now) {
            Ok(snapshot) => Ok(snapshot),
            Err(e) => {
                self.ledger.cancel_lock(id)?;
                Err(e.into())
            }
        }
    }

    /// Finish a transfer with the receiver's ack.
    ///
    /// The transfer event is signed and put in the outbox, then P2 is
    /// dropped, then the event is published. A publish failure comes back
    /// as [`BonError::Unpublished`] with the voucher already spent. A signed
    /// rejection releases the lock.
    pub async fn complete_transfer(&self, ack: &Ack) -> BonResult<Voucher> {
        let id = ack.voucher_id;
        let voucher = self.voucher(&id)?;
        match verify_ack(ack, &voucher) {
            Ok(()) => {}
            Err(WireError::Declined) => {
                self.ledger.cancel_lock(&id)?;
                info!(voucher = %id.short(), "receiver declined; lock released");
                return Err(WireError::Declined.into());
            }
            Err(e) => return Err(e.into()),
        }
        let challenge = voucher
            .lock
            .as_ref()
            .map(|lock| lock.challenge)
            .ok_or(WireError::NotLocked)?;

        let record = TransferRecord {
            voucher_id: id,
            from_identity: self.identity,
            to_identity: None,
            value: voucher.value,
            timestamp: unix_now(),
            transfer_count: voucher.transfer_count.saturating_add(1),
        };
        let event = {
            let key = signing_key(&voucher)?;
            event::transfer(&record, &key)?
        };

        self.store.push_outbox(&event)?;
        let spent = match self.ledger.confirm_transfer(&id, &challenge) {
            Ok(spent) => spent,
            Err(e) => {
                self.store.remove_outbox(&event.id)?;
                return Err(e.into());
            }
        };
        self.publish_outboxed(&event).await?;
        Ok(spent)
    }

    /// Abandon an outgoing transfer.
    pub fn cancel(&self, id: &VoucherId) -> BonResult<Voucher> {
        Ok(self.ledger.cancel_lock(id)?)
    }

    // -- Receiving ----------------------------------------------------------

    /// P3 for a voucher: the held copy if this wallet had the voucher
    /// before, else the one from the witness cache.
    fn witness_for(&self, id: &VoucherId, known: Option<&KnownVoucher>) -> BonResult<Share> {
        if let Some(share) = self.ledger.get(id).and_then(|v| v.share_p3) {
            return Ok(share);
        }
        known
            .and_then(|k| k.witness.clone())
            .ok_or_else(|| BonError::NoWitness(id.short()))
    }

    fn previous_transfer_count(&self, id: &VoucherId) -> u32 {
        self.ledger.get(id).map_or(0, |v| v.transfer_count)
    }

    /// Accept an offer. The voucher is persisted before the ack is returned.
    pub fn receive_offer(&self, offer: &Offer) -> BonResult<Ack> {
        let id = offer.voucher_id;
        let known = self
            .store
            .get_known(&id)?
            .ok_or_else(|| BonError::UnknownVoucher(id.short()))?;
        if known.retired {
            return Err(BonError::Retired(id.short()));
        }
        let now = unix_now();
        ensure_unexpired(&known.descriptor, now)?;
        let witness = self.witness_for(&id, Some(&known))?;
        let received = accept_offer(offer, &witness, now)?;

        let voucher = Voucher::received(
            known.descriptor,
            received.bearer,
            witness,
            self.previous_transfer_count(&id),
            now,
        );
        self.ledger.insert(voucher)?;
        Ok(received.ack)
    }

    /// Accept a snapshot. Works without an announcement as long as the
    /// witness is known; the descriptor is then taken from the snapshot.
    pub fn receive_snapshot(&self, snapshot: &Snapshot) -> BonResult<Ack> {
        let body = &snapshot.body;
        let id = body.voucher_id;
        let known = self.store.get_known(&id)?;
        let now = unix_now();
        if let Some(k) = &known {
            if k.retired {
                return Err(BonError::Retired(id.short()));
            }
            if k.descriptor.value != body.value || k.descriptor.issuer != body.issuer_id {
                return Err(WireError::VoucherMismatch.into());
            }
            ensure_unexpired(&k.descriptor, now)?;
        }
        let witness = self.witness_for(&id, known.as_ref())?;
        let received = accept_snapshot(snapshot, &witness, self.config.snapshot_ttl_secs, now)?;

        let descriptor = match known {
            Some(k) => k.descriptor,
            None => VoucherDescriptor {
                id,
                value: body.value,
                issuer: body.issuer_id,
                created_at: u64::from(body.timestamp),
                expires_at: None,
                metadata: VoucherMetadata {
                    market: self.config.market_name.clone(),
                    issuer_name: body.issuer_name.clone(),
                    ..VoucherMetadata::default()
                },
            },
        };
        let voucher = Voucher::received(
            descriptor,
            received.bearer,
            witness,
            self.previous_transfer_count(&id),
            now,
        );
        self.ledger.insert(voucher)?;
        Ok(received.ack)
    }

    // -- Retirement ---------------------------------------------------------

    /// Retire a voucher issued here.
    ///
    /// The retirement event must reach the log; if it does not, the burn is
    /// still recorded and the event waits in the outbox. The circulation
    /// proof is published afterwards on a best-effort basis.
    pub async fn burn(&self, id: &VoucherId) -> BonResult<Voucher> {
        let now = unix_now();
        let voucher = self.voucher(id)?;
        if voucher.status != VoucherStatus::Active {
            return Err(LedgerError::LockConflict {
                id: id.short(),
                status: voucher.status,
            }
            .into());
        }
        if !voucher.is_issued_here() {
            return Err(LedgerError::NotIssuer.into());
        }

        let record = RetirementRecord {
            voucher_id: *id,
            issuer: voucher.issuer,
            value: voucher.value,
            timestamp: now,
        };
        let (retirement, proof) = {
            let key = signing_key(&voucher)?;
            let retirement = event::retirement(&record, &key)?;
            let proof = match self.config.market_seed_bytes() {
                Some(seed) => match proof_event(&voucher, &key, &seed, utc_date(now), now) {
                    Ok(proof) => Some(proof),
                    Err(e) => {
                        warn!(voucher = %id.short(), error = %e, "circulation proof not built");
                        None
                    }
                },
                None => {
                    warn!(voucher = %id.short(), "no market seed; circulation proof skipped");
                    None
                }
            };
            (retirement, proof)
        };

        self.store.push_outbox(&retirement)?;
        let burned = match self.ledger.mark_burned(id) {
            Ok(burned) => burned,
            Err(e) => {
                self.store.remove_outbox(&retirement.id)?;
                return Err(e.into());
            }
        };
        self.publish_outboxed(&retirement).await?;

        if let Some(proof) = proof {
            publish_proof(self.transport.as_ref(), &proof, self.publish_timeout()).await;
        }
        Ok(burned)
    }

    // -- Maintenance --------------------------------------------------------

    /// Retry every event in the outbox. Returns how many were published.
    pub async fn flush_outbox(&self) -> BonResult<usize> {
        let pending = self.store.outbox()?;
        let mut published = 0;
        for event in &pending {
            match self.publish(event).await {
                Ok(_) => {
                    self.store.remove_outbox(&event.id)?;
                    published += 1;
                }
                Err(e) => warn!(event = %event.id_hex(), error = %e, "outbox publish failed"),
            }
        }
        if !pending.is_empty() {
            info!(published, pending = pending.len(), "outbox flushed");
        }
        Ok(published)
    }

    pub async fn reconcile(&self) -> BonResult<ReconcileReport> {
        self.reconcile_at(unix_now()).await
    }

    /// Flush the outbox, replay transfer records for every held voucher
    /// and reconcile. Transfer events still in the outbox count as records.
    /// When the log cannot be read, ghosts are only reported.
    pub async fn reconcile_at(&self, now: u64) -> BonResult<ReconcileReport> {
        if let Err(e) = self.flush_outbox().await {
            warn!(error = %e, "outbox flush failed");
        }

        let ids: Vec<VoucherId> = self
            .ledger
            .list()
            .into_iter()
            .filter(|v| {
                matches!(
                    v.status,
                    VoucherStatus::Active | VoucherStatus::LockedForTransfer
                )
            })
            .map(|v| v.id)
            .collect();
        if ids.is_empty() {
            return Ok(ReconcileReport::default());
        }

        let mut policy = self.config.ghost_policy;
        let filter = Filter::new().kinds([KIND_TRANSFER]).vouchers(ids);
        let mut records: Vec<TransferRecord> =
            match fetch_stored(self.transport.as_ref(), filter, self.reconcile_timeout()).await {
                Ok(events) => events.iter().filter_map(Event::as_transfer).collect(),
                Err(e) => {
                    warn!(error = %e, "event log unreadable; ghost transfers only reported");
                    policy = GhostPolicy::Surface;
                    Vec::new()
                }
            };
        records.extend(self.store.outbox()?.iter().filter_map(Event::as_transfer));

        Ok(self.ledger.reconcile(&records, &self.identity, now, policy)?)
    }

    pub fn expire_due(&self) -> BonResult<Vec<VoucherId>> {
        Ok(self.ledger.expire_due(unix_now())?)
    }
}
