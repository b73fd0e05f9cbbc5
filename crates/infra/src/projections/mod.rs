//! Read models built from the committed change stream.
//!
//! Projections are eventually consistent: they follow the bus and may lag
//! the ledger. They are rebuildable from the journal and idempotent under
//! at-least-once delivery (`ProjectionRunner` skips duplicates).

pub mod stock_summary;
pub mod worker;

pub use stock_summary::{ProductStock, StockSummaryProjection};
pub use worker::{ProjectionWorker, WorkerError, WorkerHandle};
