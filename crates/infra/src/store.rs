//! Ledger store: optimistic, serializable commits over the warehouse state.
//!
//! ## Command execution flow
//!
//! ```text
//! CommandContext + operation
//!   ↓
//! 1. Idempotency: a key already claimed returns the original movements
//!   ↓
//! 2. Plan under the read lock (Transaction records every row version it read)
//!   ↓
//! 3. Acquire the write lock (bounded by `lock_timeout`)
//!   ↓
//! 4. Check every read version; a stale row drops the plan and retries
//!   ↓
//! 5. Stamp movement / pick list / batch numbers
//!   ↓
//! 6. Journal the entry (write-ahead; failure aborts the commit)
//!   ↓
//! 7. Apply to the committed state, then publish one envelope per change
//! ```
//!
//! The commit in steps 4-7 is the linearization point. Retries are bounded by
//! `max_commit_attempts` with exponential backoff; running out surfaces as the
//! retryable `LedgerError::Contention`.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use cellarledger_core::ExpectedVersion;
use cellarledger_events::{EventBus, EventEnvelope, InMemoryEventBus};
use cellarledger_warehouse::{
    Change, CommandContext, CommitPlan, LedgerError, LedgerResult, LedgerSnapshot, Movement, RowRef,
    Transaction, WarehouseState,
};

use crate::config::LedgerConfig;
use crate::journal::{FileJournal, InMemoryJournal, Journal, JournalEntry};

/// Stream name carried by every published envelope.
pub const STREAM: &str = "warehouse";

/// Envelope type published for each committed change.
pub type ChangeEnvelope = EventEnvelope<Change>;

/// Bus type used when the caller does not bring one.
pub type ChangeBus = InMemoryEventBus<ChangeEnvelope>;

/// Result of executing a mutating command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Execution<T> {
    /// The command committed now.
    Applied { value: T, movements: Vec<Movement> },
    /// The idempotency key was already claimed; nothing was applied and the
    /// movements of the original commit are returned.
    Replayed { movements: Vec<Movement> },
}

impl<T> Execution<T> {
    pub fn movements(&self) -> &[Movement] {
        match self {
            Execution::Applied { movements, .. } | Execution::Replayed { movements } => movements,
        }
    }

    pub fn into_movements(self) -> Vec<Movement> {
        match self {
            Execution::Applied { movements, .. } | Execution::Replayed { movements } => movements,
        }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Execution::Applied { value, .. } => Some(value),
            Execution::Replayed { .. } => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Execution::Applied { value, .. } => Some(value),
            Execution::Replayed { .. } => None,
        }
    }

    pub fn is_replayed(&self) -> bool {
        matches!(self, Execution::Replayed { .. })
    }
}

#[derive(Debug, Default)]
struct Committed {
    state: WarehouseState,
    /// Sequence of the last journal entry.
    commit_sequence: u64,
    /// Sequence of the last published change.
    change_sequence: u64,
}

enum CommitFailure {
    Stale { row: RowRef, seen: u64, current: u64 },
    Ledger(LedgerError),
}

pub struct LedgerStore<J, B = ChangeBus> {
    committed: RwLock<Committed>,
    journal: J,
    bus: B,
    config: LedgerConfig,
}

impl<J, B> core::fmt::Debug for LedgerStore<J, B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LedgerStore").field("config", &self.config).finish_non_exhaustive()
    }
}

impl LedgerStore<Box<dyn Journal>, ChangeBus> {
    /// Open the journal the configuration names (in memory when unset).
    pub fn open_configured(config: LedgerConfig) -> LedgerResult<Self> {
        let journal: Box<dyn Journal> = match &config.journal_path {
            Some(path) => Box::new(FileJournal::open(path).map_err(journal_error)?),
            None => Box::new(InMemoryJournal::new()),
        };
        Self::open(config, journal, ChangeBus::new())
    }
}

impl<B> LedgerStore<InMemoryJournal, B>
where
    B: EventBus<ChangeEnvelope>,
{
    /// Start from a snapshot with a fresh in-memory journal.
    ///
    /// Commits after this point are journaled from sequence 1; the snapshot
    /// itself is the base they replay onto.
    pub fn from_snapshot(config: LedgerConfig, snapshot: LedgerSnapshot, bus: B) -> Self {
        Self {
            committed: RwLock::new(Committed {
                state: WarehouseState::from_snapshot(snapshot),
                ..Committed::default()
            }),
            journal: InMemoryJournal::new(),
            bus,
            config,
        }
    }
}

impl<J, B> LedgerStore<J, B>
where
    J: Journal,
    B: EventBus<ChangeEnvelope>,
{
    /// Open a store by replaying every journal entry.
    pub fn open(config: LedgerConfig, journal: J, bus: B) -> LedgerResult<Self> {
        let started = Instant::now();
        let entries = journal.load_all().map_err(journal_error)?;

        let mut committed = Committed::default();
        for entry in &entries {
            committed.state.apply_all(&entry.changes).map_err(|e| {
                tracing::error!(sequence = entry.sequence, error = %e, "journal replay failed");
                e
            })?;
            committed.commit_sequence = entry.sequence;
            committed.change_sequence += entry.changes.len() as u64;
        }

        tracing::info!(
            entries = entries.len(),
            movements = committed.state.movement_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "ledger opened from journal"
        );

        Ok(Self {
            committed: RwLock::new(committed),
            journal,
            bus,
            config,
        })
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn journal(&self) -> &J {
        &self.journal
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Run `f` against a consistent snapshot of the committed state.
    ///
    /// Reads take no part in commits; the answer may be stale by the time the
    /// caller acts on it.
    pub fn read<R>(&self, f: impl FnOnce(&WarehouseState) -> R) -> LedgerResult<R> {
        let committed = self.read_lock()?;
        Ok(f(&committed.state))
    }

    pub fn snapshot(&self) -> LedgerResult<LedgerSnapshot> {
        self.read(WarehouseState::snapshot)
    }

    /// Sequence of the last committed journal entry.
    pub fn commit_sequence(&self) -> LedgerResult<u64> {
        Ok(self.read_lock()?.commit_sequence)
    }

    /// Every journaled change as an envelope, numbered from 1.
    ///
    /// Projections rebuild from this; the numbering matches what live
    /// subscribers received.
    pub fn envelopes(&self) -> LedgerResult<Vec<ChangeEnvelope>> {
        let entries = self.journal.load_all().map_err(journal_error)?;
        let mut sequence = 0u64;
        let mut envelopes = Vec::new();
        for entry in entries {
            for change in entry.changes {
                sequence += 1;
                envelopes.push(envelope(sequence, entry.committed_at, change));
            }
        }
        Ok(envelopes)
    }

    /// Plan and commit one command.
    ///
    /// `op` may run several times: once per attempt. It must only act through
    /// the transaction it is handed.
    pub fn execute<T>(
        &self,
        context: &CommandContext,
        op: impl Fn(&mut Transaction<'_>) -> LedgerResult<T>,
    ) -> LedgerResult<Execution<T>> {
        let started = Instant::now();
        let max_attempts = self.config.max_commit_attempts.max(1);
        let mut contended: Option<RowRef> = None;

        for attempt in 1..=max_attempts {
            let (value, plan) = {
                let committed = self.read_lock()?;
                if let Some(key) = &context.idempotency_key {
                    if let Some(movements) = committed.state.idempotent_movements(key) {
                        tracing::info!(idempotency_key = %key, movements = movements.len(), "idempotent replay");
                        return Ok(Execution::Replayed { movements });
                    }
                }
                let mut tx = Transaction::begin(&committed.state, context.clone());
                let value = op(&mut tx)?;
                (value, tx.into_plan()?)
            };

            if plan.is_empty() {
                return Ok(Execution::Applied {
                    value,
                    movements: Vec::new(),
                });
            }

            let Some(mut committed) = self.write_lock(Instant::now() + self.config.lock_timeout)? else {
                tracing::debug!(attempt, "write lock wait timed out");
                contended = plan.hottest_row().cloned().or(contended);
                self.back_off(attempt, max_attempts);
                continue;
            };

            match self.commit(&mut committed, plan) {
                Ok(movements) => {
                    tracing::debug!(
                        attempt,
                        sequence = committed.commit_sequence,
                        movements = movements.len(),
                        "transaction committed"
                    );
                    return Ok(Execution::Applied { value, movements });
                }
                Err(CommitFailure::Stale { row, seen, current }) => {
                    drop(committed);
                    tracing::debug!(attempt, %row, seen, current, "stale read; replanning");
                    contended = Some(row);
                    self.back_off(attempt, max_attempts);
                }
                Err(CommitFailure::Ledger(e)) => return Err(e),
            }
        }

        let waited_ms = started.elapsed().as_millis() as u64;
        let row = contended.as_ref().map(ToString::to_string);
        tracing::warn!(attempts = max_attempts, waited_ms, contended = ?row, "gave up under contention");
        Err(LedgerError::Contention {
            attempts: max_attempts,
            waited_ms,
            contended,
        })
    }

    /// Steps 4-7 of the flow; runs under the write lock.
    fn commit(&self, committed: &mut Committed, mut plan: CommitPlan) -> Result<Vec<Movement>, CommitFailure> {
        for (row, seen) in &plan.reads {
            let current = committed.state.version(row);
            if ExpectedVersion::Exact(*seen).check(current).is_err() {
                return Err(CommitFailure::Stale {
                    row: row.clone(),
                    seen: *seen,
                    current,
                });
            }
        }

        committed.state.stamp(&mut plan.changes);
        let entry = JournalEntry {
            sequence: committed.commit_sequence + 1,
            committed_at: Utc::now(),
            changes: plan.changes,
        };

        // Write-ahead: nothing becomes visible unless the entry is durable.
        if let Err(e) = self.journal.append(&entry) {
            tracing::error!(sequence = entry.sequence, error = %e, "journal append failed; commit aborted");
            return Err(CommitFailure::Ledger(journal_error(e)));
        }

        if let Err(e) = committed.state.apply_all(&entry.changes) {
            // The plan applied cleanly to a working copy at the same versions,
            // so this means the state and the journal now disagree.
            tracing::error!(sequence = entry.sequence, error = %e, "journaled entry failed to apply");
            return Err(CommitFailure::Ledger(e));
        }
        committed.commit_sequence = entry.sequence;

        let movements = entry
            .changes
            .iter()
            .filter_map(Change::movement)
            .cloned()
            .collect();

        for change in entry.changes {
            committed.change_sequence += 1;
            let envelope = envelope(committed.change_sequence, entry.committed_at, change);
            if let Err(e) = self.bus.publish(envelope) {
                tracing::warn!(sequence = committed.change_sequence, error = ?e, "change publication failed");
            }
        }

        Ok(movements)
    }

    fn back_off(&self, attempt: u32, max_attempts: u32) {
        if attempt < max_attempts {
            thread::sleep(self.config.backoff(attempt));
        }
    }

    fn read_lock(&self) -> LedgerResult<RwLockReadGuard<'_, Committed>> {
        self.committed
            .read()
            .map_err(|_| LedgerError::Journal("ledger state lock poisoned".to_string()))
    }

    /// Spin on `try_write` until `deadline`; `None` when it passes.
    fn write_lock(&self, deadline: Instant) -> LedgerResult<Option<RwLockWriteGuard<'_, Committed>>> {
        loop {
            match self.committed.try_write() {
                Ok(guard) => return Ok(Some(guard)),
                Err(TryLockError::WouldBlock) => {
                    if Instant::now() >= deadline {
                        return Ok(None);
                    }
                    thread::sleep(Duration::from_micros(50));
                }
                Err(TryLockError::Poisoned(_)) => {
                    return Err(LedgerError::Journal("ledger state lock poisoned".to_string()));
                }
            }
        }
    }
}

fn envelope(sequence: u64, committed_at: DateTime<Utc>, change: Change) -> ChangeEnvelope {
    EventEnvelope::new(Uuid::now_v7(), STREAM, sequence, committed_at, change)
}

fn journal_error(e: crate::journal::JournalError) -> LedgerError {
    LedgerError::Journal(e.to_string())
}
