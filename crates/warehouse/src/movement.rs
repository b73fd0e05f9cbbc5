//! Movement log records.
//!
//! A movement names at most two stock lines: the one cases leave (`from_line`)
//! and the one they arrive on (`to_line`). Its effect on each line is fully
//! determined by the movement type, so replaying a line's movements in
//! movement-number order rebuilds the line exactly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cellarledger_core::UserId;

use crate::error::LedgerResult;
use crate::ids::{AllocationId, IdempotencyKey, LocationCode, MovementNumber, PalletCode};
use crate::stock::{LotAttributes, StockLine, StockLineKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    Receive,
    Putaway,
    Transfer,
    Reserve,
    Release,
    Pick,
    Adjust,
    Count,
    OwnershipTransfer,
    RepackOut,
    RepackIn,
    PalletAdd,
    PalletRemove,
    PalletMove,
    PalletSeal,
    PalletUnseal,
    PalletDissolve,
    PalletDispatch,
}

/// What a movement does to its `from_line`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FromEffect {
    /// Cases leave; only unreserved cases may go.
    TakeAvailable,
    /// Available cases become reserved; quantity unchanged.
    Reserve,
    /// Reserved cases become available again.
    Release,
    /// Reserved cases leave (pick).
    ConsumeReserved,
}

impl MovementType {
    pub fn as_str(self) -> &'static str {
        match self {
            MovementType::Receive => "receive",
            MovementType::Putaway => "putaway",
            MovementType::Transfer => "transfer",
            MovementType::Reserve => "reserve",
            MovementType::Release => "release",
            MovementType::Pick => "pick",
            MovementType::Adjust => "adjust",
            MovementType::Count => "count",
            MovementType::OwnershipTransfer => "ownership_transfer",
            MovementType::RepackOut => "repack_out",
            MovementType::RepackIn => "repack_in",
            MovementType::PalletAdd => "pallet_add",
            MovementType::PalletRemove => "pallet_remove",
            MovementType::PalletMove => "pallet_move",
            MovementType::PalletSeal => "pallet_seal",
            MovementType::PalletUnseal => "pallet_unseal",
            MovementType::PalletDissolve => "pallet_dissolve",
            MovementType::PalletDispatch => "pallet_dispatch",
        }
    }

    pub fn from_effect(self) -> FromEffect {
        match self {
            MovementType::Reserve => FromEffect::Reserve,
            MovementType::Release => FromEffect::Release,
            MovementType::Pick => FromEffect::ConsumeReserved,
            _ => FromEffect::TakeAvailable,
        }
    }

    /// Pallet status markers: audit entries with no stock line effect.
    pub fn is_status_marker(self) -> bool {
        matches!(
            self,
            MovementType::PalletSeal | MovementType::PalletUnseal | MovementType::PalletDissolve
        )
    }

    /// Inbound side must respect the destination's capacity.
    pub fn is_capacity_checked(self) -> bool {
        matches!(
            self,
            MovementType::Putaway | MovementType::Transfer | MovementType::PalletMove
        )
    }

    /// Movement types whose quantity is allowed to be zero.
    pub fn allows_zero_quantity(self) -> bool {
        self.is_status_marker() || self == MovementType::Count
    }
}

impl core::fmt::Display for MovementType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of a single quantity-changing operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub movement_number: MovementNumber,
    pub movement_type: MovementType,
    pub from_line: Option<StockLineKey>,
    pub to_line: Option<StockLineKey>,
    pub quantity_cases: u32,
    /// Attributes given to `to_line` when it is created or merged into.
    #[serde(default)]
    pub attributes: LotAttributes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pallet: Option<PalletCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocation: Option<AllocationId>,
    /// Physical count result (count movements only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counted_cases: Option<u32>,
    pub performed_by: UserId,
    pub performed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<IdempotencyKey>,
}

impl Movement {
    pub fn from_location(&self) -> Option<&LocationCode> {
        self.from_line.as_ref().map(|k| &k.location)
    }

    pub fn to_location(&self) -> Option<&LocationCode> {
        self.to_line.as_ref().map(|k| &k.location)
    }

    pub fn touches(&self, key: &StockLineKey) -> bool {
        self.from_line.as_ref() == Some(key) || self.to_line.as_ref() == Some(key)
    }

    pub fn touched_lines(&self) -> impl Iterator<Item = &StockLineKey> {
        self.from_line.iter().chain(self.to_line.iter())
    }

    /// Apply the outbound effect to `line` (which must be `from_line`).
    pub fn apply_from(&self, line: &mut StockLine) -> LedgerResult<()> {
        let cases = self.quantity_cases;
        match self.movement_type.from_effect() {
            FromEffect::TakeAvailable => line.take_available(cases),
            FromEffect::Reserve => line.reserve(cases),
            FromEffect::Release => line.release(cases),
            FromEffect::ConsumeReserved => line.consume_reserved(cases),
        }
    }

    /// Apply the inbound effect to `line` (which must be `to_line`).
    pub fn apply_to(&self, line: &mut StockLine) -> LedgerResult<()> {
        line.add(self.quantity_cases, &self.attributes)
    }
}

/// Rebuild one stock line from its movements.
///
/// `movements` must be in movement-number order; movements that do not touch
/// `key` are skipped. Returns `(quantity_cases, reserved_cases)`.
pub fn replay_line<'a>(
    key: &StockLineKey,
    movements: impl IntoIterator<Item = &'a Movement>,
) -> LedgerResult<(u32, u32)> {
    let mut line = StockLine::empty(key.clone(), LotAttributes::default());
    for movement in movements {
        if movement.from_line.as_ref() == Some(key) {
            movement.apply_from(&mut line)?;
        }
        if movement.to_line.as_ref() == Some(key) {
            movement.apply_to(&mut line)?;
        }
    }
    Ok((line.quantity_cases, line.reserved_cases))
}
