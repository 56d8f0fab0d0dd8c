//! # Voucher Ledger
//!
//! The per-voucher state machine and the write-ahead lock that keeps a
//! voucher from being spent twice while its holder is offline.
//!
//! ## Write-Ahead Lock
//!
//! ```text
//!   lock_for_transfer ──► persist ──► Offer leaves the device
//!                                          │
//!            ┌─────────────────────────────┴──────────────┐
//!            ▼                                            ▼
//!   confirm_transfer(challenge)                     cancel_lock
//!   drop P2, spent, persist                         active, persist
//! ```
//!
//! Every mutation runs under one mutex around the whole collection. The
//! new state is written to the [`VoucherStore`] first and only then becomes
//! visible in memory, so a failed write leaves the voucher exactly as it
//! was. Nothing in here touches the network.
//!
//! ## Reconciliation
//!
//! At startup [`VoucherLedger::reconcile`] compares held vouchers with the
//! transfer records the log replayed:
//!
//! - a record of this wallet handing the voucher on forces `spent`, whatever
//!   the lock says;
//! - a lock past its deadline with no record is a ghost transfer, reported
//!   and handled per [`GhostPolicy`];
//! - a lock still inside its window is left alone.
//!
//! The reconciled collection replaces the stored one in a single
//! all-or-nothing write.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{GhostPolicy, CHALLENGE_LENGTH};
use crate::events::event::TransferRecord;
use crate::crypto::schnorr::PublicKey;
use crate::storage::db::{DbError, VoucherStore};

use super::model::{unix_now, unix_now_millis, TransferLock, Voucher, VoucherId, VoucherStatus};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("voucher {0} not found")]
    NotFound(VoucherId),

    /// The voucher is not in a state that allows the operation.
    #[error("voucher {id} is {status}")]
    LockConflict { id: String, status: VoucherStatus },

    #[error("challenge does not match the transfer lock")]
    ChallengeMismatch,

    #[error("transfer lock expired")]
    LockExpired,

    #[error("voucher has passed its expiry date")]
    VoucherExpired,

    /// The wallet already holds this voucher.
    #[error("voucher {0} already held")]
    AlreadyHeld(String),

    /// Only the issuer (holder of P1) can retire a voucher.
    #[error("voucher was not issued by this wallet")]
    NotIssuer,

    #[error(transparent)]
    Storage(#[from] DbError),
}

fn conflict(voucher: &Voucher) -> LedgerError {
    LedgerError::LockConflict {
        id: voucher.id.short(),
        status: voucher.status,
    }
}

/// Challenge used when the caller does not supply one: the lock time in
/// milliseconds, big-endian, followed by 8 random bytes.
pub fn default_challenge(lock_millis: u64) -> [u8; CHALLENGE_LENGTH] {
    let mut challenge = [0u8; CHALLENGE_LENGTH];
    challenge[..8].copy_from_slice(&lock_millis.to_be_bytes());
    OsRng.fill_bytes(&mut challenge[8..]);
    challenge
}

// ---------------------------------------------------------------------------
// Reconcile Report
// ---------------------------------------------------------------------------

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Forced to `spent` by a transfer record.
    pub spent: Vec<VoucherId>,
    /// Locks that expired with no record of the transfer.
    pub ghosts: Vec<VoucherId>,
    /// Ghosts put back into circulation.
    pub restored: Vec<VoucherId>,
    /// Locks still inside their window.
    pub still_locked: Vec<VoucherId>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.spent.is_empty() && self.ghosts.is_empty()
    }
}

// ---------------------------------------------------------------------------
// VoucherLedger
// ---------------------------------------------------------------------------

/// The wallet's voucher collection.
pub struct VoucherLedger {
    store: Arc<dyn VoucherStore>,
    vouchers: Mutex<BTreeMap<VoucherId, Voucher>>,
}

impl VoucherLedger {
    /// Load every stored voucher.
    pub fn open(store: Arc<dyn VoucherStore>) -> Result<Self, LedgerError> {
        let vouchers = store
            .load_all()?
            .into_iter()
            .map(|v| (v.id, v))
            .collect::<BTreeMap<_, _>>();
        debug!(count = vouchers.len(), "ledger loaded");
        Ok(Self {
            store,
            vouchers: Mutex::new(vouchers),
        })
    }

    pub fn store(&self) -> &Arc<dyn VoucherStore> {
        &self.store
    }

    pub fn get(&self, id: &VoucherId) -> Option<Voucher> {
        self.vouchers.lock().get(id).cloned()
    }

    pub fn list(&self) -> Vec<Voucher> {
        self.vouchers.lock().values().cloned().collect()
    }

    /// Vouchers whose value this wallet currently owns.
    pub fn held(&self) -> Vec<Voucher> {
        self.vouchers
            .lock()
            .values()
            .filter(|v| v.is_held())
            .cloned()
            .collect()
    }

    /// Sum of held values, in minor units.
    pub fn balance(&self) -> u64 {
        self.vouchers
            .lock()
            .values()
            .filter(|v| v.is_held())
            .map(|v| u64::from(v.value))
            .sum()
    }

    /// Apply `f` to a copy of the voucher, persist it if `f` reports a
    /// change, then publish it in memory.
    fn mutate<F>(&self, id: &VoucherId, f: F) -> Result<Voucher, LedgerError>
    where
        F: FnOnce(&mut Voucher) -> Result<bool, LedgerError>,
    {
        let mut vouchers = self.vouchers.lock();
        let mut next = vouchers
            .get(id)
            .cloned()
            .ok_or(LedgerError::NotFound(*id))?;
        if f(&mut next)? {
            self.store.save(&next)?;
            vouchers.insert(*id, next.clone());
        }
        Ok(next)
    }

    /// Record a voucher this wallet just issued or received.
    ///
    /// A voucher that left this wallet earlier (`spent`) may come back; any
    /// other existing record is a conflict. An issuer getting its own
    /// voucher back keeps P1, so it can retire it.
    pub fn insert(&self, mut voucher: Voucher) -> Result<(), LedgerError> {
        let mut vouchers = self.vouchers.lock();
        if let Some(existing) = vouchers.get(&voucher.id) {
            if existing.status != VoucherStatus::Spent {
                return Err(LedgerError::AlreadyHeld(voucher.id.short()));
            }
            if voucher.share_p1.is_none() {
                voucher.share_p1 = existing.share_p1.clone();
            }
        }
        self.store.save(&voucher)?;
        info!(voucher = %voucher.id.short(), status = %voucher.status, "voucher recorded");
        vouchers.insert(voucher.id, voucher);
        Ok(())
    }

    // -- Write-ahead lock ---------------------------------------------------

    pub fn lock_for_transfer(
        &self,
        id: &VoucherId,
        challenge: Option<[u8; CHALLENGE_LENGTH]>,
        ttl_secs: u32,
    ) -> Result<Voucher, LedgerError> {
        self.lock_for_transfer_at(id, challenge, ttl_secs, unix_now())
    }

    /// Take the transfer lock. Durable when this returns; only then may an
    /// Offer be built from the result.
    pub fn lock_for_transfer_at(
        &self,
        id: &VoucherId,
        challenge: Option<[u8; CHALLENGE_LENGTH]>,
        ttl_secs: u32,
        now: u64,
    ) -> Result<Voucher, LedgerError> {
        let locked = self.mutate(id, |v| {
            if v.status != VoucherStatus::Active || v.share_p2.is_none() {
                return Err(conflict(v));
            }
            if v.is_past_expiry(now) {
                return Err(LedgerError::VoucherExpired);
            }
            v.status = VoucherStatus::LockedForTransfer;
            v.lock = Some(TransferLock {
                timestamp: now,
                challenge: challenge.unwrap_or_else(|| default_challenge(unix_now_millis())),
                ttl_secs,
            });
            Ok(true)
        })?;
        info!(voucher = %id.short(), ttl = ttl_secs, "transfer lock taken");
        Ok(locked)
    }

    /// The voucher, if its lock is still inside its window.
    pub fn live_lock(&self, id: &VoucherId, now: u64) -> Result<Voucher, LedgerError> {
        let voucher = self.get(id).ok_or(LedgerError::NotFound(*id))?;
        match &voucher.lock {
            Some(lock) if voucher.status == VoucherStatus::LockedForTransfer => {
                if lock.is_expired(now) {
                    Err(LedgerError::LockExpired)
                } else {
                    Ok(voucher)
                }
            }
            _ => Err(conflict(&voucher)),
        }
    }

    /// Commit the transfer: P2 is gone for good and the voucher is spent.
    ///
    /// An expired lock still confirms; the ack proves the receiver has P2.
    pub fn confirm_transfer(
        &self,
        id: &VoucherId,
        challenge: &[u8; CHALLENGE_LENGTH],
    ) -> Result<Voucher, LedgerError> {
        let spent = self.mutate(id, |v| {
            let lock = match (&v.status, &v.lock) {
                (VoucherStatus::LockedForTransfer, Some(lock)) => lock,
                _ => return Err(conflict(v)),
            };
            if &lock.challenge != challenge {
                return Err(LedgerError::ChallengeMismatch);
            }
            v.share_p2 = None;
            v.transfer_count = v.transfer_count.saturating_add(1);
            v.status = VoucherStatus::Spent;
            v.lock = None;
            Ok(true)
        })?;
        info!(voucher = %id.short(), transfers = spent.transfer_count, "transfer confirmed");
        Ok(spent)
    }

    /// Release the lock. A voucher that is not locked is returned untouched.
    pub fn cancel_lock(&self, id: &VoucherId) -> Result<Voucher, LedgerError> {
        self.mutate(id, |v| {
            if v.status != VoucherStatus::LockedForTransfer {
                return Ok(false);
            }
            v.status = VoucherStatus::Active;
            v.lock = None;
            info!(voucher = %v.id.short(), "transfer lock released");
            Ok(true)
        })
    }

    // -- Terminal transitions -----------------------------------------------

    /// Retire an active voucher issued here. P1 and P2 are discarded.
    pub fn mark_burned(&self, id: &VoucherId) -> Result<Voucher, LedgerError> {
        let burned = self.mutate(id, |v| {
            if v.status != VoucherStatus::Active {
                return Err(conflict(v));
            }
            if !v.is_issued_here() {
                return Err(LedgerError::NotIssuer);
            }
            v.share_p1 = None;
            v.share_p2 = None;
            v.status = VoucherStatus::Burned;
            Ok(true)
        })?;
        info!(voucher = %id.short(), "voucher burned");
        Ok(burned)
    }

    /// Move every active voucher whose expiry has passed to `expired`.
    pub fn expire_due(&self, now: u64) -> Result<Vec<VoucherId>, LedgerError> {
        let due: Vec<VoucherId> = self
            .vouchers
            .lock()
            .values()
            .filter(|v| v.status == VoucherStatus::Active && v.is_past_expiry(now))
            .map(|v| v.id)
            .collect();

        let mut expired = Vec::with_capacity(due.len());
        for id in due {
            let changed = self.mutate(&id, |v| {
                if v.status != VoucherStatus::Active || !v.is_past_expiry(now) {
                    return Ok(false);
                }
                v.status = VoucherStatus::Expired;
                Ok(true)
            })?;
            if changed.status == VoucherStatus::Expired {
                debug!(voucher = %id.short(), "voucher expired");
                expired.push(id);
            }
        }
        Ok(expired)
    }

    // -- Reconciliation -----------------------------------------------------

    /// Reconcile held vouchers against transfer records from the log.
    ///
    /// `holder` is this wallet's identity. A record only counts as this
    /// wallet's spend when it names `holder` as sender and is not older than
    /// the moment the wallet took custody.
    pub fn reconcile(
        &self,
        records: &[TransferRecord],
        holder: &PublicKey,
        now: u64,
        policy: GhostPolicy,
    ) -> Result<ReconcileReport, LedgerError> {
        let mut vouchers = self.vouchers.lock();
        let mut next = vouchers.clone();
        let mut report = ReconcileReport::default();
        let mut changed = false;

        for voucher in next.values_mut() {
            if !matches!(
                voucher.status,
                VoucherStatus::Active | VoucherStatus::LockedForTransfer
            ) {
                continue;
            }

            let about: Vec<&TransferRecord> =
                records.iter().filter(|r| r.voucher_id == voucher.id).collect();

            // A spend of the current custody names this holder, is no older
            // than the custody and moves the count past what is held.
            let held_count = voucher.transfer_count;
            let spent_here = about.iter().any(|r| {
                r.from_identity == *holder
                    && r.timestamp >= voucher.acquired_at
                    && r.transfer_count > held_count
            });

            if let Some(count) = about.iter().map(|r| r.transfer_count).max() {
                if count > held_count {
                    voucher.transfer_count = count;
                    changed = true;
                }
            }

            if spent_here {
                info!(voucher = %voucher.id.short(), "log records transfer; marking spent");
                voucher.status = VoucherStatus::Spent;
                voucher.share_p2 = None;
                voucher.lock = None;
                report.spent.push(voucher.id);
                changed = true;
                continue;
            }

            let lock_expired = match &voucher.lock {
                Some(lock) if voucher.status == VoucherStatus::LockedForTransfer => {
                    lock.is_expired(now)
                }
                _ => continue,
            };

            if !lock_expired {
                report.still_locked.push(voucher.id);
                continue;
            }

            warn!(voucher = %voucher.id.short(), ?policy, "ghost transfer");
            report.ghosts.push(voucher.id);
            if policy == GhostPolicy::RestoreActive {
                voucher.status = VoucherStatus::Active;
                voucher.lock = None;
                report.restored.push(voucher.id);
                changed = true;
            }
        }

        if changed {
            let all: Vec<Voucher> = next.values().cloned().collect();
            self.store.replace_all(&all)?;
            *vouchers = next;
        }

        info!(
            spent = report.spent.len(),
            ghosts = report.ghosts.len(),
            restored = report.restored.len(),
            still_locked = report.still_locked.len(),
            "reconciliation finished"
        );
        Ok(report)
    }
}
