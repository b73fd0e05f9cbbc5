//! `cellarledger-infra`: the runtime around the warehouse ledger.
//!
//! - `store`: optimistic commits, bounded contention, idempotency, publication
//! - `journal`: write-ahead journal (in memory or JSON-lines file)
//! - `service`: the public operation contract
//! - `projections`: eventually consistent read models
//! - `config`: environment-driven settings

pub mod config;
pub mod journal;
pub mod projections;
pub mod service;
pub mod store;

#[cfg(test)]
mod integration_tests;

pub use config::{ConfigError, LedgerConfig};
pub use journal::{FileJournal, InMemoryJournal, Journal, JournalEntry, JournalError};
pub use projections::{ProductStock, ProjectionWorker, StockSummaryProjection, WorkerError, WorkerHandle};
pub use service::{VerificationReport, WarehouseService};
pub use store::{ChangeBus, ChangeEnvelope, Execution, LedgerStore, STREAM};
