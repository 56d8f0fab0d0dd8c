//! # Offline Transfer
//!
//! A voucher changes hands face to face, over two QR codes, with neither
//! phone online. The sender shows an Offer (or a self-contained Snapshot),
//! the receiver shows an Ack back.
//!
//! ```text
//!   ┌──────────┐                                  ┌──────────┐
//!   │  Sender  │                                  │ Receiver │
//!   └────┬─────┘                                  └────┬─────┘
//!        │  lock_for_transfer, persisted               │
//!        │                                             │
//!        │  1. Offer  (id, P2 sealed under P3,         │
//!        │            challenge, ts, ttl, sig)  177 B  │
//!        ├────────────────────────────────────────────►│
//!        │                                             │  open P2 with P3
//!        │                                             │  rebuild key, persist
//!        │  2. Ack    (id, sig over challenge,         │
//!        │            status)                    97 B  │
//!        │◄────────────────────────────────────────────┤
//!        │                                             │
//!        │  confirm_transfer: drop P2, spent           │
//!        │  later: publish transfer event              │
//! ```
//!
//! ### Offer (`offer.rs`)
//! Fixed layout, optional trailing signature. Unsigned offers decode but
//! never verify.
//!
//! ### Ack (`ack.rs`)
//! Signed by the voucher key, which the receiver can only rebuild after
//! opening P2. Bound to the lock's challenge.
//!
//! ### Snapshot (`snapshot.rs`)
//! "QRv2": `BON` magic, version byte, value, issuer and issuer name carried
//! inline, 240 bytes with a CRC-32 trailer. For receivers that have never
//! seen the voucher announced.
//!
//! ### Handshake (`handshake.rs`)
//! The sender and receiver steps over the messages above.
//!
//! Payloads are raw bytes; base64 wrapping for the QR alphabet happens at
//! the display edge.

pub mod ack;
pub mod checksum;
pub mod handshake;
pub mod offer;
pub mod snapshot;

mod error;

pub use ack::{Ack, AckStatus};
pub use error::WireError;
pub use handshake::{
    accept_offer, accept_snapshot, decline_offer, prepare_offer, prepare_snapshot, verify_ack,
    voucher_key, Received,
};
pub use offer::Offer;
pub use snapshot::{Snapshot, SnapshotBody};
