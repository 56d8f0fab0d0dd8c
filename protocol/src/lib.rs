// Copyright (c) 2026 Bon Contributors. MIT License.
// See LICENSE for details.

//! # Bon: Core Library
//!
//! Bon is a voucher scheme for local currencies that keeps working when
//! nobody has signal. A voucher is a secp256k1 key that nobody ever holds
//! whole: it is split 2-of-3 at issuance and rebuilt only for the instant
//! it takes to sign something.
//!
//! - **P1 (anchor)** stays with the issuer until the voucher is retired.
//! - **P2 (bearer)** is the value. Whoever holds it owns the voucher.
//! - **P3 (witness)** is public to the market, sealed under a daily key.
//!
//! A transfer hands P2 over two QR codes. The market's append-only event
//! log is consulted later, when someone is back online, to settle what
//! actually happened.
//!
//! ## Architecture
//!
//! - **crypto**: Shamir sharing, BIP-340 style Schnorr, AES-256-GCM share
//!   sealing, day keys.
//! - **transfer**: Offer / Ack / Snapshot wire formats and the handshake.
//! - **voucher**: Data model, issuance and the write-ahead ledger.
//! - **events**: Signed log events, the transport trait, a local log.
//! - **storage**: Persistent voucher store over sled.
//! - **circulation**: Redacted lifetime summary published on retirement.
//! - **wallet**: The facade tying all of the above together.
//! - **config**: Constants and wallet tunables.
//!
//! ## Ground Rules
//!
//! 1. A rebuilt voucher key lives in a zeroizing buffer and is dropped
//!    before anything touches the disk or the network.
//! 2. The ledger is written before the network is told. Always.
//! 3. Wire layouts are frozen; scanners in the field depend on them.

pub mod circulation;
pub mod config;
pub mod crypto;
pub mod error;
pub mod events;
pub mod storage;
pub mod transfer;
pub mod voucher;
pub mod wallet;

pub use config::{GhostPolicy, WalletConfig};
pub use error::{BonError, BonResult};
pub use voucher::{Voucher, VoucherId, VoucherStatus};
pub use wallet::Wallet;
