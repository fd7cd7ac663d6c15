//! Database module: ledger models, SQL repositories and the records store.
//!
//! This module is split into three submodules:
//! - `model`: ledger entities and view models returned by repositories.
//! - `repo`: pool setup, migrations and SQL-only integration ledger access.
//! - `records`: the SQLite-backed academic records store that produces
//!   entity snapshots.
//!
//! External modules should import from `pddikti_sync::db`; we re-export the
//! repository API and commonly used models for convenience.

pub mod model;
pub mod records;
pub mod repo;

pub use repo::*;

pub use model::{LedgerEntry, LedgerFilter, LedgerUpdate};
pub use records::{RecordsStore, SqliteRecords};
