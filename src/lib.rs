//! A wallet and tournament-entry ledger for competitive gaming platforms.
//!
//! User balances (cash, gems, coins and fixed-denomination vouchers) live in
//! [`database::AccountStore`] backends; the [`ledger::EntryProcessor`]
//! handles tournament joins with atomic seat and fee commits, and the
//! [`admin::AdminProcessor`] handles privileged adjustments, prize payouts
//! and tournament management, with every admin mutation recorded in an
//! append-only audit log.
//!
//! Both processors are generic over [`database::LedgerStore`], backed by
//! Postgres in production ([`PgStore`]) and by [`MemoryStore`] in tests.

/// Privileged administrative operations and the audit trail around them.
pub mod admin;
/// Traits and types used for interacting with the database.
pub mod database;
/// The error type shared across the crate.
pub mod error;
/// User-facing wallet and tournament-entry operations.
pub mod ledger;
/// Contains functions for logging.
pub mod log;

pub use admin::{Adjustment, AdjustmentKind, AdminProcessor};
pub use database::memory::MemoryStore;
pub use database::{models, PgStore};
pub use error::{LedgerError, LedgerResult};
pub use ledger::{EntryProcessor, JoinRequest};
