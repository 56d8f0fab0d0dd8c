//! # Storage Module
//!
//! Persistence for a Bon wallet. One sled database per wallet, split into
//! named trees; bincode on disk, JSON only for config and debugging.
//!
//! ```text
//! VoucherLedger ──► VoucherStore ──► SledStore  (vouchers, outbox, known)
//!                                └─► MemoryStore (tests)
//! LocalEventLog ──────────────────► same sled Db (events)
//! ```

pub mod db;

pub use db::{DbError, DbResult, MemoryStore, SledStore, VoucherStore};
