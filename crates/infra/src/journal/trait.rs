use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use cellarledger_warehouse::Change;

/// One committed transaction, exactly as it was applied.
///
/// `sequence` is the commit position: 1 for the first commit, then +1 per
/// commit with no gaps. Replaying entries in sequence order through
/// `WarehouseState::apply` rebuilds the committed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub sequence: u64,
    pub committed_at: DateTime<Utc>,
    pub changes: Vec<Change>,
}

/// Journal operation error.
///
/// These are storage failures. A failed append aborts the commit it belongs
/// to; a failed load stops the store from opening.
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal io failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("journal entry could not be encoded: {0}")]
    Encode(String),

    #[error("journal is corrupt at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },

    #[error("journal sequence out of order (last={last}, found={found})")]
    OutOfOrder { last: u64, found: u64 },

    #[error("journal lock poisoned")]
    Poisoned,
}

/// Append-only log of committed transactions.
///
/// The store appends under its write lock before touching in-memory state,
/// so an entry exists for every commit that was ever visible.
///
/// Implementations must:
/// - reject an entry whose sequence is not `last + 1`
/// - make an appended entry durable before returning `Ok`
/// - return entries from `load_all` in sequence order
pub trait Journal: Send + Sync {
    fn append(&self, entry: &JournalEntry) -> Result<(), JournalError>;

    fn load_all(&self) -> Result<Vec<JournalEntry>, JournalError>;
}

impl<J> Journal for Arc<J>
where
    J: Journal + ?Sized,
{
    fn append(&self, entry: &JournalEntry) -> Result<(), JournalError> {
        (**self).append(entry)
    }

    fn load_all(&self) -> Result<Vec<JournalEntry>, JournalError> {
        (**self).load_all()
    }
}

impl<J> Journal for Box<J>
where
    J: Journal + ?Sized,
{
    fn append(&self, entry: &JournalEntry) -> Result<(), JournalError> {
        (**self).append(entry)
    }

    fn load_all(&self) -> Result<Vec<JournalEntry>, JournalError> {
        (**self).load_all()
    }
}

pub(crate) fn check_next(last: u64, found: u64) -> Result<(), JournalError> {
    if found != last + 1 {
        return Err(JournalError::OutOfOrder { last, found });
    }
    Ok(())
}
