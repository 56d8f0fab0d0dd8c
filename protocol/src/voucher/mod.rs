//! # Vouchers
//!
//! A Bon is a bearer voucher whose key nobody holds whole. The wallet
//! keeps per voucher whichever shares it is entitled to:
//!
//! | Role    | Share | Issuer | Holder | After spend | After burn |
//! |---------|-------|--------|--------|-------------|------------|
//! | anchor  | P1    | yes    | no     | unchanged   | dropped    |
//! | bearer  | P2    | yes    | yes    | dropped     | dropped    |
//! | witness | P3    | yes    | yes    | kept        | kept       |
//!
//! - `model.rs` is the data model and status enum.
//! - `issuance.rs` creates vouchers.
//! - `ledger.rs` is the state machine, the write-ahead lock and startup
//!   reconciliation.

pub mod issuance;
pub mod ledger;
pub mod model;

pub use issuance::{issue_voucher, IssuanceError, IssueRequest};
pub use ledger::{default_challenge, LedgerError, ReconcileReport, VoucherLedger};
pub use model::{
    unix_now, utc_date, KnownVoucher, TransferLock, Voucher, VoucherDescriptor, VoucherId,
    VoucherMetadata, VoucherStatus,
};
