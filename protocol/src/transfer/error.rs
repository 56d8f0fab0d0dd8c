//! Error types for the offline transfer wire format.
//!
//! Every decoder and every handshake step returns a [`WireError`]. A decoder
//! never hands back a partially parsed message: it either returns the whole
//! value or one of these.

use thiserror::Error;

use crate::crypto::{CryptoError, ShareError};

/// Errors from encoding, decoding and checking Offer / Ack / Snapshot payloads.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    /// The payload is not one of the lengths this message can have.
    #[error("bad length: expected {expected} bytes, got {got}")]
    BadLength {
        /// Length (or minimum length) the message requires.
        expected: usize,
        /// Length that was supplied.
        got: usize,
    },

    /// The snapshot does not start with the `BON` magic.
    #[error("bad magic")]
    BadMagic,

    /// The snapshot layout version is not one we can read.
    #[error("unsupported snapshot version: {0:#04x}")]
    UnsupportedVersion(u8),

    /// The CRC-32 trailer does not match the payload.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// An unsigned (legacy) offer was presented.
    #[error("offer carries no signature")]
    MissingSignature,

    /// A signature did not verify against the voucher id.
    #[error("signature invalid")]
    SignatureInvalid,

    /// The offer's `timestamp + ttl` has passed.
    #[error("offer expired")]
    OfferExpired,

    /// The snapshot is older than the acceptance window.
    #[error("snapshot expired")]
    SnapshotExpired,

    /// Ack status byte is not a known value.
    #[error("unknown ack status: {0:#04x}")]
    UnknownStatus(u8),

    /// The issuer name field is not valid UTF-8.
    #[error("issuer name is not valid UTF-8")]
    InvalidIssuerName,

    /// A message refers to a different voucher than the one in play.
    #[error("voucher mismatch")]
    VoucherMismatch,

    /// The rebuilt key does not match the voucher id.
    #[error("shares do not rebuild the voucher key")]
    KeyMismatch,

    /// The voucher holds no transfer lock to build from or answer.
    #[error("voucher is not locked for transfer")]
    NotLocked,

    /// The receiver answered with a signed rejection.
    #[error("receiver declined the voucher")]
    Declined,

    /// A share this step needs is not available.
    #[error("missing share: {0}")]
    MissingShare(&'static str),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Share(#[from] ShareError),
}
