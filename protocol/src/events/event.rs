//! # Signed Log Events
//!
//! Everything Bon publishes is an [`Event`] signed by the voucher key it is
//! about. The id is a hash of the canonical serialization
//!
//! ```text
//! SHA256( json([0, pubkey_hex, created_at, kind, tags, content]) )
//! ```
//!
//! and the signature is a Schnorr signature over that id. Anything read
//! back from the log goes through [`Event::verify`] first; an id or
//! signature mismatch is [`EventError::TamperedEvent`] and the event is
//! dropped.
//!
//! ## Limits of a Transfer Record
//!
//! A [`TransferRecord`] proves only that someone able to rebuild the voucher
//! key wrote it. `from_identity` is content under that signature and is not
//! signed by the wallet it names. A past holder that kept a copy of P2 can
//! therefore publish a record naming the current holder, and that holder's
//! reconciliation will count the voucher as spent. Bearer custody of P2 is
//! the trust boundary; wallet identity keys are not part of it.

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{
    KIND_ANNOUNCEMENT, KIND_RETIREMENT, KIND_TRANSFER, KIND_WITNESS, VOUCHER_TAG,
};
use crate::crypto::encryption::SealedShare;
use crate::crypto::hash::sha256;
use crate::crypto::schnorr::{self, PublicKey, Signature};
use crate::crypto::{codec, CryptoError, SecretKey};
use crate::voucher::model::{VoucherDescriptor, VoucherId};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from building, checking or moving events.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventError {
    /// Id or signature does not match the content.
    #[error("tampered event")]
    TamperedEvent,

    /// The log did not answer in time.
    #[error("event log timed out")]
    Timeout,

    #[error("not connected to the event log")]
    NotConnected,

    /// The log refused the event.
    #[error("event rejected: {0}")]
    Rejected(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed event content: {0}")]
    Malformed(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A signed entry of the public event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(with = "crate::crypto::codec::hex_array")]
    pub id: [u8; 32],
    pub pubkey: PublicKey,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: Signature,
}

impl Event {
    /// Canonical id of an event with these fields.
    pub fn compute_id(
        pubkey: &PublicKey,
        created_at: u64,
        kind: u16,
        tags: &[Vec<String>],
        content: &str,
    ) -> Result<[u8; 32], EventError> {
        let canonical = serde_json::json!([0, pubkey.to_hex(), created_at, kind, tags, content]);
        let bytes =
            serde_json::to_vec(&canonical).map_err(|e| EventError::Malformed(e.to_string()))?;
        Ok(sha256(&bytes))
    }

    /// Build and sign an event with `key`.
    pub fn sign(
        kind: u16,
        tags: Vec<Vec<String>>,
        content: String,
        created_at: u64,
        key: &SecretKey,
    ) -> Result<Self, EventError> {
        let pubkey = schnorr::public_key(key)?;
        let id = Self::compute_id(&pubkey, created_at, kind, &tags, &content)?;
        let sig = schnorr::sign(&id, key)?;
        Ok(Self {
            id,
            pubkey,
            created_at,
            kind,
            tags,
            content,
            sig,
        })
    }

    /// Recompute the id and check the signature.
    pub fn verify(&self) -> Result<(), EventError> {
        let expected = Self::compute_id(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        )?;
        if expected != self.id || !schnorr::verify(&self.id, &self.sig, &self.pubkey) {
            return Err(EventError::TamperedEvent);
        }
        Ok(())
    }

    pub fn id_hex(&self) -> String {
        codec::to_hex(&self.id)
    }

    /// First value of the first tag named `name`.
    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.first().map(String::as_str) == Some(name))
            .and_then(|tag| tag.get(1))
            .map(String::as_str)
    }

    /// The voucher this event is indexed under.
    pub fn voucher_id(&self) -> Option<VoucherId> {
        self.tag(VOUCHER_TAG)
            .and_then(|hex| PublicKey::from_hex(hex).ok())
    }

    pub fn decode_content<T: DeserializeOwned>(&self) -> Result<T, EventError> {
        serde_json::from_str(&self.content).map_err(|e| EventError::Malformed(e.to_string()))
    }

    /// The transfer record carried by this event, if it is a well-formed
    /// transfer signed by the voucher it describes.
    pub fn as_transfer(&self) -> Option<TransferRecord> {
        if self.kind != KIND_TRANSFER {
            return None;
        }
        let record: TransferRecord = self.decode_content().ok()?;
        (record.voucher_id == self.pubkey).then_some(record)
    }
}

fn voucher_tags(id: &VoucherId) -> Vec<Vec<String>> {
    vec![vec![VOUCHER_TAG.to_string(), id.to_hex()]]
}

fn to_content<T: Serialize>(value: &T) -> Result<String, EventError> {
    serde_json::to_string(value).map_err(|e| EventError::Malformed(e.to_string()))
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Content of a completed-transfer event. The only kind reconciliation acts on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub voucher_id: VoucherId,
    /// Wallet identity that gave the voucher away.
    pub from_identity: PublicKey,
    /// Wallet identity that received it, when the sender knows it.
    pub to_identity: Option<PublicKey>,
    pub value: u32,
    pub timestamp: u64,
    /// Transfer count after this hop.
    pub transfer_count: u32,
}

/// Content of a witness event: P3 sealed under the day key for `date`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WitnessPayload {
    pub date: NaiveDate,
    pub sealed: SealedShare,
}

/// Content of a retirement event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetirementRecord {
    pub voucher_id: VoucherId,
    pub issuer: PublicKey,
    pub value: u32,
    pub timestamp: u64,
}

/// Issuer's public announcement of a new voucher.
pub fn announcement(
    descriptor: &VoucherDescriptor,
    key: &SecretKey,
    now: u64,
) -> Result<Event, EventError> {
    Event::sign(
        KIND_ANNOUNCEMENT,
        voucher_tags(&descriptor.id),
        to_content(descriptor)?,
        now,
        key,
    )
}

/// Daily witness publication.
pub fn witness(
    id: &VoucherId,
    payload: &WitnessPayload,
    key: &SecretKey,
    now: u64,
) -> Result<Event, EventError> {
    let mut tags = voucher_tags(id);
    tags.push(vec!["d".to_string(), payload.date.to_string()]);
    Event::sign(KIND_WITNESS, tags, to_content(payload)?, now, key)
}

pub fn transfer(record: &TransferRecord, key: &SecretKey) -> Result<Event, EventError> {
    Event::sign(
        KIND_TRANSFER,
        voucher_tags(&record.voucher_id),
        to_content(record)?,
        record.timestamp,
        key,
    )
}

pub fn retirement(record: &RetirementRecord, key: &SecretKey) -> Result<Event, EventError> {
    Event::sign(
        KIND_RETIREMENT,
        voucher_tags(&record.voucher_id),
        to_content(record)?,
        record.timestamp,
        key,
    )
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// Subscription filter. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub kinds: Vec<u16>,
    pub voucher_ids: Vec<VoucherId>,
    pub since: Option<u64>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kinds(mut self, kinds: impl IntoIterator<Item = u16>) -> Self {
        self.kinds.extend(kinds);
        self
    }

    pub fn vouchers(mut self, ids: impl IntoIterator<Item = VoucherId>) -> Self {
        self.voucher_ids.extend(ids);
        self
    }

    pub fn since(mut self, timestamp: u64) -> Self {
        self.since = Some(timestamp);
        self
    }

    pub fn matches(&self, event: &Event) -> bool {
        if !self.kinds.is_empty() && !self.kinds.contains(&event.kind) {
            return false;
        }
        if let Some(since) = self.since {
            if event.created_at < since {
                return false;
            }
        }
        if !self.voucher_ids.is_empty() {
            match event.voucher_id() {
                Some(id) => self.voucher_ids.contains(&id),
                None => false,
            }
        } else {
            true
        }
    }
}
