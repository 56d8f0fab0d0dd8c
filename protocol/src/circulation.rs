//! # Circulation Proof
//!
//! When an issuer retires a voucher, the wallet publishes a redacted
//! summary of the voucher's life: value, number of hops, age and an
//! optional category. No identities and no per-transfer detail.
//!
//! The record is encrypted under the market's day key, so only market
//! members can read it, and signed with the voucher key, so anyone can
//! check it came from the voucher it describes.
//!
//! ```text
//! content = hex( nonce || AES-256-GCM(day_key(seed, date), json(record)) || tag )
//! tags    = [["v", voucher id], ["d", YYYY-MM-DD]]
//! ```
//!
//! Publishing the proof is best effort. A failure is logged and never
//! undoes or blocks the retirement itself.

use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{KIND_CIRCULATION_PROOF, VOUCHER_TAG};
use crate::crypto::codec;
use crate::crypto::encryption::{day_key, decrypt, encrypt};
use crate::crypto::SecretKey;
use crate::events::event::{Event, EventError};
use crate::events::transport::{publish_with_timeout, EventTransport};
use crate::voucher::model::Voucher;

/// What a retired voucher tells the market about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CirculationRecord {
    /// Minor units.
    pub value: u32,
    /// Completed transfers.
    pub hops: u32,
    /// Seconds from issuance to retirement.
    pub age_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl CirculationRecord {
    pub fn from_voucher(voucher: &Voucher, now: u64) -> Self {
        Self {
            value: voucher.value,
            hops: voucher.transfer_count,
            age_secs: now.saturating_sub(voucher.created_at),
            category: voucher.metadata.category.clone(),
        }
    }
}

/// Seal and sign a circulation proof for `voucher`.
pub fn proof_event(
    voucher: &Voucher,
    key: &SecretKey,
    market_seed: &[u8],
    date: NaiveDate,
    now: u64,
) -> Result<Event, EventError> {
    let record = CirculationRecord::from_voucher(voucher, now);
    let plaintext =
        serde_json::to_vec(&record).map_err(|e| EventError::Malformed(e.to_string()))?;
    let sealed = encrypt(&day_key(market_seed, date), &plaintext)?;

    let tags = vec![
        vec![VOUCHER_TAG.to_string(), voucher.id.to_hex()],
        vec!["d".to_string(), date.to_string()],
    ];
    Event::sign(KIND_CIRCULATION_PROOF, tags, codec::to_hex(&sealed), now, key)
}

/// Read a circulation proof with the market seed.
pub fn open_proof(event: &Event, market_seed: &[u8]) -> Result<CirculationRecord, EventError> {
    if event.kind != KIND_CIRCULATION_PROOF {
        return Err(EventError::Malformed(format!("kind {}", event.kind)));
    }
    event.verify()?;

    let date: NaiveDate = event
        .tag("d")
        .and_then(|d| d.parse().ok())
        .ok_or_else(|| EventError::Malformed("missing date tag".to_string()))?;
    let sealed =
        hex::decode(&event.content).map_err(|e| EventError::Malformed(e.to_string()))?;
    let plaintext = decrypt(&day_key(market_seed, date), &sealed)?;
    serde_json::from_slice(&plaintext).map_err(|e| EventError::Malformed(e.to_string()))
}

/// Publish a proof. Returns whether the log took it; failures only warn.
pub async fn publish_proof(
    transport: &dyn EventTransport,
    event: &Event,
    timeout: Duration,
) -> bool {
    match publish_with_timeout(transport, event, timeout).await {
        Ok(_) => {
            info!(event = %event.id_hex(), "circulation proof published");
            true
        }
        Err(e) => {
            warn!(event = %event.id_hex(), error = %e, "circulation proof not published");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::schnorr::generate_key;
    use crate::crypto::sharing::combine;
    use crate::crypto::CryptoError;
    use crate::events::local::LocalEventLog;
    use crate::voucher::issuance::{issue_voucher, IssueRequest};
    use crate::voucher::model::VoucherMetadata;

    const SEED: &[u8] = b"marche-de-la-croix-rousse";

    fn retired_voucher() -> (Voucher, SecretKey) {
        let (_, issuer) = generate_key();
        let request = IssueRequest {
            value: 2_000,
            issuer,
            validity_secs: None,
            metadata: VoucherMetadata {
                category: Some("bakery".into()),
                ..VoucherMetadata::default()
            },
        };
        let mut voucher = issue_voucher(&request, 1_000).unwrap();
        voucher.transfer_count = 4;
        let key = combine(&[
            voucher.share_p1.as_ref().unwrap(),
            voucher.share_p3.as_ref().unwrap(),
        ])
        .unwrap();
        (voucher, key)
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 14).unwrap()
    }

    #[test]
    fn proof_round_trip() {
        let (voucher, key) = retired_voucher();
        let event = proof_event(&voucher, &key, SEED, date(), 5_000).unwrap();
        assert_eq!(event.pubkey, voucher.id);
        assert_eq!(event.voucher_id(), Some(voucher.id));

        let record = open_proof(&event, SEED).unwrap();
        assert_eq!(
            record,
            CirculationRecord {
                value: 2_000,
                hops: 4,
                age_secs: 4_000,
                category: Some("bakery".into()),
            }
        );
    }

    #[test]
    fn other_market_cannot_read_proof() {
        let (voucher, key) = retired_voucher();
        let event = proof_event(&voucher, &key, SEED, date(), 5_000).unwrap();
        assert_eq!(
            open_proof(&event, b"another market").unwrap_err(),
            EventError::Crypto(CryptoError::AuthenticationFailed)
        );
    }

    #[tokio::test]
    async fn publish_failure_is_not_fatal() {
        let (voucher, key) = retired_voucher();
        let event = proof_event(&voucher, &key, SEED, date(), 5_000).unwrap();
        let log = LocalEventLog::open_temporary().unwrap();

        assert!(!publish_proof(&log, &event, Duration::from_millis(100)).await);
        log.connect().await.unwrap();
        assert!(publish_proof(&log, &event, Duration::from_millis(100)).await);
    }
}
