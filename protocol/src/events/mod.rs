//! # Public Event Log
//!
//! The append-only log is where vouchers become publicly checkable. It is
//! never consulted to authorize a spend: the device holding two shares is
//! the write authority. The log only tells a wallet, after the fact, what
//! the rest of the market already knows.
//!
//! ```text
//!   issuer ── announcement (30301) ──┐
//!   issuer ── witness P3   (30302) ──┤
//!   holder ── transfer     (30303) ──┼──► log ──► reconcile / sync_known
//!   issuer ── retirement   (30304) ──┤
//!   issuer ── circulation  (30305) ──┘
//! ```
//!
//! - `event.rs` builds, signs and checks events and their payloads.
//! - `transport.rs` is the [`EventTransport`] seam and the helpers every
//!   caller uses (publish with a deadline, drain stored events).
//! - `local.rs` is a sled-backed log for a single machine.

pub mod event;
pub mod local;
pub mod transport;

pub use event::{
    Event, EventError, Filter, RetirementRecord, TransferRecord, WitnessPayload,
};
pub use local::LocalEventLog;
pub use transport::{
    fetch_stored, publish_with_timeout, EventTransport, PublishAck, Subscription,
    SubscriptionItem,
};
