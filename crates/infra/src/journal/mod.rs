//! Write-ahead journal of committed transactions.
//!
//! The journal is the durable source of truth: the in-memory ledger is
//! rebuilt from it on open.

pub mod file;
pub mod in_memory;
pub mod r#trait;

pub use file::FileJournal;
pub use in_memory::InMemoryJournal;
pub use r#trait::{Journal, JournalEntry, JournalError};
