//! Voucher data model.
//!
//! A [`Voucher`] is never deleted. It moves through [`VoucherStatus`] and
//! loses shares as it goes: P2 on spend, P1 and P2 on burn.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::config::CHALLENGE_LENGTH;
use crate::crypto::schnorr::PublicKey;
use crate::crypto::sharing::Share;

/// A voucher is identified by its x-only public key.
pub type VoucherId = PublicKey;

/// Seconds since the Unix epoch.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Milliseconds since the Unix epoch.
pub fn unix_now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Calendar day (UTC) of a unix timestamp. Witness keys rotate on it.
pub fn utc_date(secs: u64) -> NaiveDate {
    let secs = i64::try_from(secs).unwrap_or(i64::MAX);
    DateTime::from_timestamp(secs, 0)
        .unwrap_or_default()
        .date_naive()
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle of a voucher in this wallet.
///
/// ```text
/// active ──lock──► locked_for_transfer ──confirm──► spent
///   ▲                    │
///   └──────cancel────────┘
/// active ──burn──► burned
/// active ──time──► expired
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoucherStatus {
    Active,
    LockedForTransfer,
    Spent,
    Burned,
    Expired,
}

impl VoucherStatus {
    /// No transition leaves a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            VoucherStatus::Spent | VoucherStatus::Burned | VoucherStatus::Expired
        )
    }
}

impl fmt::Display for VoucherStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VoucherStatus::Active => "active",
            VoucherStatus::LockedForTransfer => "locked_for_transfer",
            VoucherStatus::Spent => "spent",
            VoucherStatus::Burned => "burned",
            VoucherStatus::Expired => "expired",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Transfer Lock
// ---------------------------------------------------------------------------

/// Write-ahead record of an outgoing transfer. Present exactly while the
/// voucher is `LockedForTransfer`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLock {
    /// When the lock was taken, unix seconds.
    pub timestamp: u64,
    /// Anti-replay nonce the receiver's ack must answer.
    #[serde(with = "crate::crypto::codec::hex_array")]
    pub challenge: [u8; CHALLENGE_LENGTH],
    pub ttl_secs: u32,
}

impl TransferLock {
    pub fn deadline(&self) -> u64 {
        self.timestamp.saturating_add(u64::from(self.ttl_secs))
    }

    /// Strictly past the deadline. At exactly `timestamp + ttl` the lock is
    /// still considered live.
    pub fn is_expired(&self, now: u64) -> bool {
        now > self.deadline()
    }
}

// ---------------------------------------------------------------------------
// Voucher
// ---------------------------------------------------------------------------

/// Free-form descriptive fields. Never used for authorization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoucherMetadata {
    pub market: String,
    pub issuer_name: String,
    pub category: Option<String>,
    pub rarity: Option<String>,
}

/// Public description of a voucher, as announced by its issuer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoucherDescriptor {
    pub id: VoucherId,
    pub value: u32,
    pub issuer: PublicKey,
    pub created_at: u64,
    pub expires_at: Option<u64>,
    pub metadata: VoucherMetadata,
}

impl VoucherDescriptor {
    pub fn is_past_expiry(&self, now: u64) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }
}

/// What the market has told us about a voucher we may not hold: its
/// announcement and, once a witness event was read, its P3.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownVoucher {
    pub descriptor: VoucherDescriptor,
    pub witness: Option<Share>,
    pub retired: bool,
}

/// A voucher as this wallet knows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voucher {
    pub id: VoucherId,
    /// Value in minor currency units.
    pub value: u32,
    pub issuer: PublicKey,
    pub created_at: u64,
    pub expires_at: Option<u64>,
    /// When this wallet took custody (issuance or receipt).
    pub acquired_at: u64,
    pub status: VoucherStatus,
    /// Anchor share. Only the issuer holds it, until retirement.
    pub share_p1: Option<Share>,
    /// Bearer share. Dropped the moment a transfer is confirmed.
    pub share_p2: Option<Share>,
    /// Witness share, cached.
    pub share_p3: Option<Share>,
    /// Completed transfers this voucher has been through.
    pub transfer_count: u32,
    pub lock: Option<TransferLock>,
    pub metadata: VoucherMetadata,
}

impl Voucher {
    /// Build the holder's record for a voucher received from someone else.
    pub fn received(
        descriptor: VoucherDescriptor,
        bearer: Share,
        witness: Share,
        transfer_count: u32,
        acquired_at: u64,
    ) -> Self {
        Self {
            id: descriptor.id,
            value: descriptor.value,
            issuer: descriptor.issuer,
            created_at: descriptor.created_at,
            expires_at: descriptor.expires_at,
            acquired_at,
            status: VoucherStatus::Active,
            share_p1: None,
            share_p2: Some(bearer),
            share_p3: Some(witness),
            transfer_count,
            lock: None,
            metadata: descriptor.metadata,
        }
    }

    pub fn descriptor(&self) -> VoucherDescriptor {
        VoucherDescriptor {
            id: self.id,
            value: self.value,
            issuer: self.issuer,
            created_at: self.created_at,
            expires_at: self.expires_at,
            metadata: self.metadata.clone(),
        }
    }

    /// Whether this wallet currently owns the voucher's value.
    pub fn is_held(&self) -> bool {
        matches!(
            self.status,
            VoucherStatus::Active | VoucherStatus::LockedForTransfer
        ) && self.share_p2.is_some()
    }

    /// Whether this wallet issued the voucher and can still retire it.
    pub fn is_issued_here(&self) -> bool {
        self.share_p1.is_some()
    }

    pub fn is_past_expiry(&self, now: u64) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }
}
