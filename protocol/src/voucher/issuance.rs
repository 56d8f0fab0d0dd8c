//! Voucher issuance.
//!
//! A fresh key is drawn, normalized to an even-y public point, split into
//! P1/P2/P3 and dropped. The only place the full key ever exists at
//! issuance is inside the [`SecretKey`](crate::crypto::SecretKey) returned
//! by [`generate_key`], which is wiped at the end of [`issue_voucher`].

use thiserror::Error;
use tracing::info;

use crate::crypto::schnorr::{generate_key, public_key, PublicKey};
use crate::crypto::sharing::{combine, split, ShareError};
use crate::crypto::CryptoError;

use super::model::{Voucher, VoucherMetadata, VoucherStatus};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IssuanceError {
    #[error("voucher value must be positive")]
    ZeroValue,

    #[error("expiry must be after creation")]
    InvalidExpiry,

    /// The shares failed their own self-check. Should never happen.
    #[error("share self-check failed")]
    SelfCheckFailed,

    #[error(transparent)]
    Share(#[from] ShareError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// What the issuer asks for.
#[derive(Debug, Clone)]
pub struct IssueRequest {
    /// Minor units.
    pub value: u32,
    /// Identity of the issuing wallet.
    pub issuer: PublicKey,
    /// How long the voucher stays spendable, if it expires at all.
    pub validity_secs: Option<u64>,
    pub metadata: VoucherMetadata,
}

/// Create a voucher holding all three shares.
pub fn issue_voucher(request: &IssueRequest, now: u64) -> Result<Voucher, IssuanceError> {
    if request.value == 0 {
        return Err(IssuanceError::ZeroValue);
    }
    let expires_at = match request.validity_secs {
        Some(0) => return Err(IssuanceError::InvalidExpiry),
        Some(secs) => Some(now.saturating_add(secs)),
        None => None,
    };

    let (key, id) = generate_key();
    let [anchor, bearer, witness] = split(key.expose());
    drop(key);

    // Bearer + witness is the pair every later holder signs with.
    let rebuilt = combine(&[&bearer, &witness])?;
    if public_key(&rebuilt)? != id {
        return Err(IssuanceError::SelfCheckFailed);
    }
    drop(rebuilt);

    info!(voucher = %id.short(), value = request.value, "issued voucher");

    Ok(Voucher {
        id,
        value: request.value,
        issuer: request.issuer,
        created_at: now,
        expires_at,
        acquired_at: now,
        status: VoucherStatus::Active,
        share_p1: Some(anchor),
        share_p2: Some(bearer),
        share_p3: Some(witness),
        transfer_count: 0,
        lock: None,
        metadata: request.metadata.clone(),
    })
}
