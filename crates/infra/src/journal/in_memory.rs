use std::sync::RwLock;

use super::r#trait::{check_next, Journal, JournalEntry, JournalError};

/// In-memory journal.
///
/// Intended for tests/dev and for stores that start from a snapshot.
#[derive(Debug, Default)]
pub struct InMemoryJournal {
    entries: RwLock<Vec<JournalEntry>>,
}

impl InMemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Journal for InMemoryJournal {
    fn append(&self, entry: &JournalEntry) -> Result<(), JournalError> {
        let mut entries = self.entries.write().map_err(|_| JournalError::Poisoned)?;
        let last = entries.last().map(|e| e.sequence).unwrap_or(0);
        check_next(last, entry.sequence)?;
        entries.push(entry.clone());
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<JournalEntry>, JournalError> {
        let entries = self.entries.read().map_err(|_| JournalError::Poisoned)?;
        Ok(entries.clone())
    }
}
