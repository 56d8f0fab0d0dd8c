//! Crate-level error taxonomy.
//!
//! Each module keeps its own error enum; [`BonError`] gathers them for the
//! [`Wallet`](crate::wallet::Wallet) facade and adds the failures that only
//! exist once the pieces are composed.

use thiserror::Error;

use crate::crypto::{CryptoError, ShareError};
use crate::events::event::EventError;
use crate::storage::db::DbError;
use crate::transfer::WireError;
use crate::voucher::issuance::IssuanceError;
use crate::voucher::ledger::LedgerError;

#[derive(Debug, Error)]
pub enum BonError {
    #[error(transparent)]
    Share(#[from] ShareError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Event(#[from] EventError),

    #[error(transparent)]
    Storage(#[from] DbError),

    #[error(transparent)]
    Issuance(#[from] IssuanceError),

    /// No announcement of this voucher has been seen.
    #[error("unknown voucher {0}")]
    UnknownVoucher(String),

    /// No witness share is available to open the voucher's bearer share.
    #[error("no witness share for voucher {0}")]
    NoWitness(String),

    /// The issuer has retired the voucher.
    #[error("voucher {0} has been retired")]
    Retired(String),

    #[error("wallet has no market seed configured")]
    MissingMarketSeed,

    /// The local state change is committed but its signed event did not
    /// reach the log. The event stays in the outbox until
    /// [`Wallet::flush_outbox`](crate::wallet::Wallet::flush_outbox) succeeds.
    #[error("event {event} kept in outbox: {source}")]
    Unpublished { event: String, source: EventError },
}

pub type BonResult<T> = Result<T, BonError>;
