//! Ledger error taxonomy.
//!
//! Every variant is a recoverable value: the caller decides whether to retry,
//! split, substitute or wait. `LedgerInconsistent` is the one that needs human
//! action, and it only blocks the affected stock line.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use cellarledger_core::DomainError;

use crate::ids::{LocationCode, LotNumber, OwnerId, PalletCode, ProductRef};
use crate::state::RowRef;
use crate::stock::StockLineKey;

pub type LedgerResult<T> = Result<T, LedgerError>;

/// What was asked for versus what the ledger could provide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortfall {
    pub product: ProductRef,
    pub owner: Option<OwnerId>,
    pub lot: Option<LotNumber>,
    pub location: Option<LocationCode>,
    pub requested_cases: u32,
    pub available_cases: u32,
}

impl Shortfall {
    pub fn missing_cases(&self) -> u32 {
        self.requested_cases.saturating_sub(self.available_cases)
    }
}

impl core::fmt::Display for Shortfall {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "product {}", self.product)?;
        if let Some(owner) = &self.owner {
            write!(f, " owner {owner}")?;
        }
        if let Some(lot) = &self.lot {
            write!(f, " lot {lot}")?;
        }
        if let Some(location) = &self.location {
            write!(f, " at {location}")?;
        }
        write!(
            f,
            ": requested {}, available {}, missing {}",
            self.requested_cases,
            self.available_cases,
            self.missing_cases()
        )
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("insufficient stock: {0}")]
    InsufficientStock(Shortfall),

    #[error("insufficient reservation on {line}: requested {requested_cases}, reserved {reserved_cases}")]
    InsufficientReservation {
        line: StockLineKey,
        requested_cases: u32,
        reserved_cases: u32,
    },

    #[error("capacity exceeded at {location}: capacity {capacity_cases}, stored {stored_cases}, incoming {incoming_cases}")]
    CapacityExceeded {
        location: LocationCode,
        capacity_cases: u32,
        stored_cases: u64,
        incoming_cases: u32,
    },

    #[error("pallet {pallet} is sealed")]
    PalletSealed { pallet: PalletCode },

    #[error("invalid transition: cannot {action} {entity} in state {from}")]
    InvalidTransition {
        entity: String,
        from: String,
        action: String,
    },

    /// `contended` is the row that last went stale, or the one the plan was
    /// waiting to write when the lock never came free.
    #[error(
        "contention{}: gave up after {attempts} attempt(s) and {waited_ms}ms",
        .contended.as_ref().map(|row| format!(" on {row}")).unwrap_or_default()
    )]
    Contention {
        attempts: u32,
        waited_ms: u64,
        contended: Option<RowRef>,
    },

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("stock line {line} is quarantined pending reconciliation")]
    LedgerInconsistent { line: StockLineKey },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("journal failure: {0}")]
    Journal(String),
}

impl LedgerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn invalid_transition(
        entity: impl ToString,
        from: impl core::fmt::Debug,
        action: impl Into<String>,
    ) -> Self {
        Self::InvalidTransition {
            entity: entity.to_string(),
            from: format!("{from:?}").to_lowercase(),
            action: action.into(),
        }
    }

    /// Whether retrying the same command later can succeed without changes.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Contention { .. })
    }
}

impl From<DomainError> for LedgerError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => Self::Validation(msg),
            DomainError::Conflict(msg) => Self::Conflict(msg),
        }
    }
}
