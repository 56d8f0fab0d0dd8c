//! # Protocol Configuration & Constants
//!
//! Every magic number in Bon lives here. Wire offsets, key lengths, default
//! time-to-live windows and event kinds are all defined once so that the
//! encoder, the decoder and the tests can never drift apart.
//!
//! Changing anything in the "Wire Format" section breaks every scanner that
//! has ever been installed in a market. Don't.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Cryptographic Parameters
// ---------------------------------------------------------------------------

/// Length of a voucher secret (a secp256k1 private scalar) and of each share.
pub const SECRET_LENGTH: usize = 32;

/// Length of an x-only secp256k1 public key. This is also the voucher id.
pub const PUBLIC_KEY_LENGTH: usize = 32;

/// Schnorr signature length: `R.x (32) || s (32)`.
pub const SIGNATURE_LENGTH: usize = 64;

/// AES-256-GCM key length in bytes.
pub const AES_KEY_LENGTH: usize = 32;

/// AES-256-GCM nonce length. 96 bits, always.
pub const AES_NONCE_LENGTH: usize = 12;

/// AES-256-GCM authentication tag length.
pub const AES_TAG_LENGTH: usize = 16;

/// A sealed share is the share bytes followed by the GCM tag.
pub const SEALED_SHARE_LENGTH: usize = SECRET_LENGTH + AES_TAG_LENGTH;

/// Anti-replay challenge length carried by locks, offers and snapshots.
pub const CHALLENGE_LENGTH: usize = 16;

/// Number of shares produced for every voucher (P1, P2, P3).
pub const SHARE_COUNT: usize = 3;

/// Shares needed to rebuild the voucher key.
pub const SHARE_THRESHOLD: usize = 2;

/// Domain prefix mixed into the daily witness key derivation.
pub const WITNESS_KEY_DOMAIN: &[u8] = b"bon-witness:";

// ---------------------------------------------------------------------------
// Wire Format
// ---------------------------------------------------------------------------

/// Snapshot magic: ASCII "BON".
pub const SNAPSHOT_MAGIC: [u8; 3] = *b"BON";

/// Snapshot layout version ("QRv2").
pub const SNAPSHOT_VERSION: u8 = 0x02;

/// Zero-padded issuer name field in a snapshot.
pub const ISSUER_NAME_LENGTH: usize = 20;

/// Offer size without the trailing signature (legacy variant).
pub const OFFER_UNSIGNED_LENGTH: usize =
    PUBLIC_KEY_LENGTH + SEALED_SHARE_LENGTH + AES_NONCE_LENGTH + CHALLENGE_LENGTH + 4 + 1;

/// Offer size with the trailing signature.
pub const OFFER_SIGNED_LENGTH: usize = OFFER_UNSIGNED_LENGTH + SIGNATURE_LENGTH;

/// Ack size: id, signature, status byte.
pub const ACK_LENGTH: usize = PUBLIC_KEY_LENGTH + SIGNATURE_LENGTH + 1;

/// Snapshot size including the CRC-32 trailer.
pub const SNAPSHOT_LENGTH: usize = 4 // magic + version
    + PUBLIC_KEY_LENGTH // id
    + 4 // value
    + PUBLIC_KEY_LENGTH // issuer id
    + SECRET_LENGTH + AES_NONCE_LENGTH + AES_TAG_LENGTH // sealed P2
    + CHALLENGE_LENGTH
    + ISSUER_NAME_LENGTH
    + 4 // timestamp
    + SIGNATURE_LENGTH
    + 4; // crc

// ---------------------------------------------------------------------------
// Timing Defaults
// ---------------------------------------------------------------------------

/// How long a transfer lock stays valid before reconciliation treats it as
/// a possible ghost transfer.
pub const DEFAULT_LOCK_TTL_SECS: u32 = 300;

/// Default offer validity. Must fit the one-byte wire field.
pub const DEFAULT_OFFER_TTL_SECS: u8 = 120;

/// Snapshots carry no TTL byte; this is the window receivers apply.
pub const DEFAULT_SNAPSHOT_TTL_SECS: u32 = 600;

/// Upper bound on a single publish round trip.
pub const DEFAULT_PUBLISH_TIMEOUT_MS: u64 = 5_000;

/// How long reconciliation waits for the log to replay stored events.
pub const DEFAULT_RECONCILE_TIMEOUT_MS: u64 = 10_000;

// ---------------------------------------------------------------------------
// Event Kinds
// ---------------------------------------------------------------------------

/// Public descriptor of a freshly issued voucher.
pub const KIND_ANNOUNCEMENT: u16 = 30_301;

/// P3 sealed under the day key.
pub const KIND_WITNESS: u16 = 30_302;

/// Completed transfer record. The only kind reconciliation acts on.
pub const KIND_TRANSFER: u16 = 30_303;

/// Retirement (burn) of a voucher.
pub const KIND_RETIREMENT: u16 = 30_304;

/// Redacted circulation summary published on retirement.
pub const KIND_CIRCULATION_PROOF: u16 = 30_305;

/// Tag name used to index events by voucher id.
pub const VOUCHER_TAG: &str = "v";

// ---------------------------------------------------------------------------
// Runtime Configuration
// ---------------------------------------------------------------------------

/// What reconciliation does with a lock that expired without any network
/// record of the transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GhostPolicy {
    /// Leave the voucher locked and report it for manual resolution.
    Surface,
    /// Report it and put the voucher back into circulation.
    RestoreActive,
}

/// Tunables for a wallet instance. Loaded from `config.json` by the node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// Name of the local market this wallet trades in.
    pub market_name: String,
    /// Hex-encoded shared market seed used for witness day keys.
    pub market_seed: String,
    /// TTL of a transfer lock in seconds.
    pub lock_ttl_secs: u32,
    /// TTL written into offers, in seconds.
    pub offer_ttl_secs: u8,
    /// Window for accepting snapshots, in seconds.
    pub snapshot_ttl_secs: u32,
    /// Publish timeout in milliseconds.
    pub publish_timeout_ms: u64,
    /// Reconciliation replay timeout in milliseconds.
    pub reconcile_timeout_ms: u64,
    /// Policy for ghost transfers found at startup.
    pub ghost_policy: GhostPolicy,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            market_name: "default".to_string(),
            market_seed: String::new(),
            lock_ttl_secs: DEFAULT_LOCK_TTL_SECS,
            offer_ttl_secs: DEFAULT_OFFER_TTL_SECS,
            snapshot_ttl_secs: DEFAULT_SNAPSHOT_TTL_SECS,
            publish_timeout_ms: DEFAULT_PUBLISH_TIMEOUT_MS,
            reconcile_timeout_ms: DEFAULT_RECONCILE_TIMEOUT_MS,
            ghost_policy: GhostPolicy::RestoreActive,
        }
    }
}

impl WalletConfig {
    /// The offer TTL actually written on the wire: never longer than the
    /// lock it rides on.
    pub fn effective_offer_ttl(&self) -> u8 {
        let lock = self.lock_ttl_secs.min(u8::MAX as u32) as u8;
        self.offer_ttl_secs.min(lock)
    }

    /// Decode the market seed. An empty seed is rejected; a wallet without
    /// a market cannot read or publish witnesses.
    pub fn market_seed_bytes(&self) -> Option<Vec<u8>> {
        let bytes = hex::decode(&self.market_seed).ok()?;
        if bytes.is_empty() {
            None
        } else {
            Some(bytes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_lengths_match_layout() {
        assert_eq!(OFFER_UNSIGNED_LENGTH, 113);
        assert_eq!(OFFER_SIGNED_LENGTH, 177);
        assert_eq!(ACK_LENGTH, 97);
        assert_eq!(SNAPSHOT_LENGTH, 240);
    }

    #[test]
    fn snapshot_magic_is_ascii() {
        assert!(SNAPSHOT_MAGIC.iter().all(|b| b.is_ascii_uppercase()));
    }

    #[test]
    fn event_kinds_are_distinct() {
        let kinds = [
            KIND_ANNOUNCEMENT,
            KIND_WITNESS,
            KIND_TRANSFER,
            KIND_RETIREMENT,
            KIND_CIRCULATION_PROOF,
        ];
        for (i, a) in kinds.iter().enumerate() {
            for b in &kinds[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn offer_ttl_never_outlives_lock() {
        let config = WalletConfig {
            lock_ttl_secs: 60,
            offer_ttl_secs: 120,
            ..WalletConfig::default()
        };
        assert_eq!(config.effective_offer_ttl(), 60);

        let config = WalletConfig::default();
        assert_eq!(config.effective_offer_ttl(), DEFAULT_OFFER_TTL_SECS);
    }

    #[test]
    fn market_seed_parsing() {
        let mut config = WalletConfig::default();
        assert!(config.market_seed_bytes().is_none());
        config.market_seed = "zz".into();
        assert!(config.market_seed_bytes().is_none());
        config.market_seed = "00ff".into();
        assert_eq!(config.market_seed_bytes(), Some(vec![0x00, 0xff]));
    }

    #[test]
    fn config_json_defaults_fill_missing_fields() {
        let config: WalletConfig = serde_json::from_str(r#"{"market_name":"lyon"}"#).unwrap();
        assert_eq!(config.market_name, "lyon");
        assert_eq!(config.lock_ttl_secs, DEFAULT_LOCK_TTL_SECS);
        assert_eq!(config.ghost_policy, GhostPolicy::RestoreActive);
    }
}
