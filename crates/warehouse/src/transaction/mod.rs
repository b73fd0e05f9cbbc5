//! Transactions: the single gate every ledger change passes through.
//!
//! A [`Transaction`] plans against an immutable committed state. Rows are
//! copied into a private working state on first touch, and the version seen
//! at that moment is remembered. Staged changes are applied to the working
//! state immediately, so later steps of the same command see earlier ones.
//!
//! Nothing here commits. [`Transaction::into_plan`] hands the staged changes
//! and the read set to the store, which checks every read version under its
//! write lock and applies the changes, or re-runs the plan.

mod admin;
mod allocate;
mod dispatch;
mod pallets;
mod picking;
mod record;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cellarledger_core::{Aggregate, UserId};

pub use record::MovementInput;

use crate::allocation::Allocation;
use crate::dispatch::{DispatchBatch, DispatchBatchCommand};
use crate::error::{LedgerError, LedgerResult};
use crate::ids::{
    AllocationId, DispatchBatchId, IdempotencyKey, LocationCode, MovementNumber, PalletCode, PickListId,
    ProductRef,
};
use crate::location::Location;
use crate::movement::{Movement, MovementType};
use crate::pallet::{Pallet, PalletCommand};
use crate::pick_list::{PickList, PickListCommand};
use crate::state::{Change, RowRef, WarehouseState};
use crate::stock::{Holding, LotAttributes, StockLine, StockLineKey};

/// Who performs a command, when, and under which idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandContext {
    pub performed_by: UserId,
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<IdempotencyKey>,
}

impl CommandContext {
    pub fn new(performed_by: UserId) -> Self {
        Self {
            performed_by,
            at: Utc::now(),
            notes: None,
            idempotency_key: None,
        }
    }

    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.at = at;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_idempotency_key(mut self, key: IdempotencyKey) -> Self {
        self.idempotency_key = Some(key);
        self
    }

    fn has_notes(&self) -> bool {
        self.notes.as_deref().is_some_and(|n| !n.trim().is_empty())
    }
}

/// A movement before it is numbered and attributed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovementDraft {
    pub movement_type: MovementType,
    pub from_line: Option<StockLineKey>,
    pub to_line: Option<StockLineKey>,
    pub quantity_cases: u32,
    pub attributes: LotAttributes,
    pub pallet: Option<PalletCode>,
    pub allocation: Option<AllocationId>,
    pub counted_cases: Option<u32>,
}

impl MovementDraft {
    pub fn new(movement_type: MovementType, quantity_cases: u32) -> Self {
        Self {
            movement_type,
            from_line: None,
            to_line: None,
            quantity_cases,
            attributes: LotAttributes::default(),
            pallet: None,
            allocation: None,
            counted_cases: None,
        }
    }

    pub fn from(mut self, line: StockLineKey) -> Self {
        self.from_line = Some(line);
        self
    }

    pub fn to(mut self, line: StockLineKey) -> Self {
        self.to_line = Some(line);
        self
    }

    pub fn attributes(mut self, attributes: LotAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn pallet(mut self, pallet: PalletCode) -> Self {
        self.pallet = Some(pallet);
        self
    }

    pub fn allocation(mut self, allocation: AllocationId) -> Self {
        self.allocation = Some(allocation);
        self
    }

    pub fn counted(mut self, counted_cases: u32) -> Self {
        self.counted_cases = Some(counted_cases);
        self
    }
}

/// What the store needs to commit a planned transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitPlan {
    pub changes: Vec<Change>,
    /// Rows the plan depended on, with the version it saw.
    pub reads: Vec<(RowRef, u64)>,
}

impl CommitPlan {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// The row a writer most likely fights over: the first stock line read,
    /// else the first row of any kind.
    pub fn hottest_row(&self) -> Option<&RowRef> {
        self.reads
            .iter()
            .map(|(row, _)| row)
            .find(|row| matches!(row, RowRef::Line(_)))
            .or_else(|| self.reads.first().map(|(row, _)| row))
    }
}

pub struct Transaction<'a> {
    base: &'a WarehouseState,
    working: WarehouseState,
    fetched: BTreeMap<RowRef, u64>,
    reads: BTreeSet<RowRef>,
    changes: Vec<Change>,
    context: CommandContext,
}

impl<'a> Transaction<'a> {
    pub fn begin(base: &'a WarehouseState, context: CommandContext) -> Self {
        Self {
            base,
            working: WarehouseState::new(),
            fetched: BTreeMap::new(),
            reads: BTreeSet::new(),
            changes: Vec::new(),
            context,
        }
    }

    pub fn context(&self) -> &CommandContext {
        &self.context
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.context.at
    }

    pub(crate) fn base(&self) -> &WarehouseState {
        self.base
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    /// Finish planning. Claims the idempotency key when one is set.
    pub fn into_plan(mut self) -> LedgerResult<CommitPlan> {
        if let Some(key) = self.context.idempotency_key.clone() {
            let row = RowRef::Idempotency(key.clone());
            self.read(&row);
            if self.working.idempotency.contains_key(&key) {
                return Err(LedgerError::Conflict(format!(
                    "idempotency key {key} was already used"
                )));
            }
            let claim = Change::IdempotencyClaimed {
                key,
                movements: Vec::new(),
                occurred_at: self.context.at,
            };
            self.stage(claim)?;
        }
        let reads = self
            .reads
            .iter()
            .map(|row| (row.clone(), self.fetched.get(row).copied().unwrap_or(0)))
            .collect();
        Ok(CommitPlan {
            changes: self.changes,
            reads,
        })
    }

    // ---- row access ----------------------------------------------------------

    /// Bring a row into the working state without depending on its value.
    fn fetch(&mut self, row: &RowRef) {
        if !self.fetched.contains_key(row) {
            self.working.copy_row_from(self.base, row);
            self.fetched.insert(row.clone(), self.base.version(row));
        }
    }

    /// Bring a row in and make the commit depend on its version.
    fn read(&mut self, row: &RowRef) {
        self.fetch(row);
        self.reads.insert(row.clone());
    }

    pub fn line(&mut self, key: &StockLineKey) -> Option<&StockLine> {
        self.read(&RowRef::Line(key.clone()));
        self.working.lines.get(key)
    }

    /// The line, or `NotFound` when it holds nothing.
    pub fn existing_line(&mut self, key: &StockLineKey) -> LedgerResult<StockLine> {
        self.line(key)
            .cloned()
            .ok_or_else(|| LedgerError::not_found("stock line", key))
    }

    pub fn is_quarantined(&mut self, key: &StockLineKey) -> bool {
        self.read(&RowRef::Line(key.clone()));
        self.working.quarantined.contains(key)
    }

    fn ensure_not_quarantined(&mut self, key: &StockLineKey) -> LedgerResult<()> {
        if self.is_quarantined(key) {
            return Err(LedgerError::LedgerInconsistent { line: key.clone() });
        }
        Ok(())
    }

    pub fn location(&mut self, code: &LocationCode) -> LedgerResult<Location> {
        self.read(&RowRef::Location(code.clone()));
        self.working.locations.get(code).cloned()
    }

    /// A location that may receive stock.
    fn inbound_location(&mut self, code: &LocationCode) -> LedgerResult<Location> {
        let location = self.location(code)?;
        if location.archived {
            return Err(LedgerError::validation(format!("location {code} is archived")));
        }
        Ok(location)
    }

    pub fn location_load(&mut self, code: &LocationCode) -> u64 {
        self.read(&RowRef::LocationLoad(code.clone()));
        self.working.location_load(code)
    }

    pub fn pallet(&mut self, code: &PalletCode) -> LedgerResult<Pallet> {
        self.read(&RowRef::Pallet(code.clone()));
        self.working.pallet(code).cloned()
    }

    fn pallet_or_empty(&mut self, code: &PalletCode) -> Pallet {
        self.read(&RowRef::Pallet(code.clone()));
        self.working
            .pallets
            .get(code)
            .cloned()
            .unwrap_or_else(|| Pallet::empty(code.clone()))
    }

    pub fn allocation(&mut self, id: &AllocationId) -> LedgerResult<Allocation> {
        self.read(&RowRef::Allocation(*id));
        self.working.allocation(id).cloned()
    }

    pub fn pick_list(&mut self, id: &PickListId) -> LedgerResult<PickList> {
        self.read(&RowRef::PickList(*id));
        self.working.pick_list(id).cloned()
    }

    pub fn batch(&mut self, id: &DispatchBatchId) -> LedgerResult<DispatchBatch> {
        self.read(&RowRef::Batch(*id));
        self.working.batch(id).cloned()
    }

    /// Lines of a product as this transaction sees them, without depending on
    /// their versions. Callers `read` the lines they end up using.
    fn product_lines(&mut self, product: &ProductRef) -> Vec<StockLine> {
        let mut keys: BTreeSet<StockLineKey> = self
            .base
            .by_product
            .get(product)
            .cloned()
            .unwrap_or_default();
        if let Some(local) = self.working.by_product.get(product) {
            keys.extend(local.iter().cloned());
        }
        keys.into_iter()
            .filter_map(|key| {
                self.fetch(&RowRef::Line(key.clone()));
                self.working.lines.get(&key).cloned()
            })
            .collect()
    }

    // ---- staging -------------------------------------------------------------

    /// Apply a change to the working state and queue it for commit.
    fn stage(&mut self, change: Change) -> LedgerResult<()> {
        self.prefetch(&change);
        self.working.apply(&change)?;
        self.changes.push(change);
        Ok(())
    }

    /// Rows a change writes must be present before it is applied.
    fn prefetch(&mut self, change: &Change) {
        match change {
            Change::MovementRecorded { movement } => {
                for key in movement.touched_lines() {
                    self.fetch(&RowRef::Line(key.clone()));
                    self.fetch(&RowRef::LocationLoad(key.location.clone()));
                }
                if let Some(id) = movement.allocation {
                    self.fetch(&RowRef::Allocation(id));
                }
            }
            Change::Pallet { event } => self.fetch(&RowRef::Pallet(event.pallet().clone())),
            Change::PickList { event } => self.fetch(&RowRef::PickList(event.pick_list())),
            Change::Batch { event } => self.fetch(&RowRef::Batch(event.batch())),
            Change::LineQuarantined { line, .. } | Change::LineReconciled { line, .. } => {
                self.fetch(&RowRef::Line(line.clone()));
                self.fetch(&RowRef::LocationLoad(line.location.clone()));
            }
            Change::LocationRegistered { location, .. } | Change::LocationUpdated { location, .. } => {
                self.fetch(&RowRef::Location(location.code.clone()));
            }
            Change::AllocationOpened { allocation } => self.fetch(&RowRef::Allocation(allocation.id)),
            Change::IdempotencyClaimed { key, .. } => self.fetch(&RowRef::Idempotency(key.clone())),
        }
    }

    /// Validate and stage one movement.
    ///
    /// Checks that hold for every movement type live here; type-specific rules
    /// (seal state, ownership, notes) are enforced by the operation that
    /// builds the draft. Availability and reservation bounds are enforced by
    /// applying the movement to the working rows.
    pub fn stage_movement(&mut self, draft: MovementDraft) -> LedgerResult<()> {
        let movement_type = draft.movement_type;
        if draft.quantity_cases == 0 && !movement_type.allows_zero_quantity() {
            return Err(LedgerError::validation(format!(
                "{movement_type} movement needs a positive quantity"
            )));
        }
        if draft.from_line.is_some() && draft.from_line == draft.to_line {
            return Err(LedgerError::validation(format!(
                "{movement_type} movement cannot start and end on the same line"
            )));
        }
        if movement_type.is_status_marker() {
            if draft.pallet.is_none() || draft.from_line.is_some() || draft.to_line.is_some() {
                return Err(LedgerError::validation(format!(
                    "{movement_type} marker names a pallet and no stock lines"
                )));
            }
        } else if draft.from_line.is_none() && draft.to_line.is_none() {
            return Err(LedgerError::validation(format!(
                "{movement_type} movement names no stock line"
            )));
        }

        for key in draft.from_line.iter().chain(draft.to_line.iter()) {
            self.ensure_not_quarantined(key)?;
        }
        if let Some(from) = &draft.from_line {
            self.existing_line(from)?;
        }
        if let Some(to) = &draft.to_line {
            let location = self.inbound_location(&to.location)?;
            let crosses_locations = draft.from_line.as_ref().map(|f| &f.location) != Some(&to.location);
            if movement_type.is_capacity_checked() && crosses_locations {
                let stored = self.location_load(&to.location);
                location.check_capacity(stored, draft.quantity_cases)?;
            }
        }
        for key in draft.from_line.iter().chain(draft.to_line.iter()) {
            if let Holding::Pallet(code) = &key.holding {
                if draft.pallet.as_ref() != Some(code) {
                    return Err(LedgerError::validation(format!(
                        "{movement_type} on {key} must name pallet {code}"
                    )));
                }
            }
        }

        let movement = Movement {
            movement_number: MovementNumber::UNASSIGNED,
            movement_type,
            from_line: draft.from_line,
            to_line: draft.to_line,
            quantity_cases: draft.quantity_cases,
            attributes: draft.attributes,
            pallet: draft.pallet,
            allocation: draft.allocation,
            counted_cases: draft.counted_cases,
            performed_by: self.context.performed_by,
            performed_at: self.context.at,
            notes: self.context.notes.clone(),
            idempotency_key: self.context.idempotency_key.clone(),
        };
        self.stage(Change::MovementRecorded { movement })
    }

    // ---- aggregates -------------------------------------------------------

    fn run_pallet(&mut self, code: &PalletCode, command: PalletCommand) -> LedgerResult<Pallet> {
        let pallet = self.pallet_or_empty(code);
        for event in pallet.handle(&command)? {
            self.stage(Change::Pallet { event })?;
        }
        self.pallet(code)
    }

    fn run_pick_list(&mut self, id: &PickListId, command: PickListCommand) -> LedgerResult<PickList> {
        self.read(&RowRef::PickList(*id));
        let list = self
            .working
            .pick_lists
            .get(id)
            .cloned()
            .unwrap_or_else(|| PickList::empty(*id));
        for event in list.handle(&command)? {
            self.stage(Change::PickList { event })?;
        }
        self.pick_list(id)
    }

    fn run_batch(&mut self, id: &DispatchBatchId, command: DispatchBatchCommand) -> LedgerResult<DispatchBatch> {
        self.read(&RowRef::Batch(*id));
        let batch = self
            .working
            .batches
            .get(id)
            .cloned()
            .unwrap_or_else(|| DispatchBatch::empty(*id));
        for event in batch.handle(&command)? {
            self.stage(Change::Batch { event })?;
        }
        self.batch(id)
    }
}
