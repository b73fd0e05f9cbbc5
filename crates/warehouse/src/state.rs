//! Ledger state: every row of the warehouse plus the movement log.
//!
//! `WarehouseState` only changes through [`WarehouseState::apply`], one
//! [`Change`] at a time. The same `apply` drives a transaction's working copy,
//! the committed state and journal replay, so all three agree by construction.
//!
//! Every row carries a version that `apply` bumps whenever the row changes;
//! the commit path compares the versions a transaction read against the
//! committed ones.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cellarledger_core::Aggregate;
use cellarledger_events::Event;

use crate::allocation::Allocation;
use crate::dispatch::{DispatchBatch, DispatchBatchEvent};
use crate::error::{LedgerError, LedgerResult};
use crate::ids::{
    AllocationId, BatchNumber, DispatchBatchId, IdempotencyKey, LocationCode, MovementNumber, OwnerId,
    PalletCode, PickListId, PickListNumber, ProductRef,
};
use crate::location::{Location, LocationRegistry, LocationType};
use crate::movement::{FromEffect, Movement, MovementType};
use crate::pallet::{Pallet, PalletEvent};
use crate::pick_list::{PickList, PickListEvent};
use crate::stock::{AvailableStock, LotAttributes, StockLine, StockLineKey};

/// A versioned row a transaction can read.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "row", content = "key", rename_all = "snake_case")]
pub enum RowRef {
    Line(StockLineKey),
    /// Registry record of a location.
    Location(LocationCode),
    /// Summed quantity stored at a location.
    LocationLoad(LocationCode),
    Pallet(PalletCode),
    Allocation(AllocationId),
    PickList(PickListId),
    Batch(DispatchBatchId),
    Idempotency(IdempotencyKey),
}

impl core::fmt::Display for RowRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RowRef::Line(key) => write!(f, "line {key}"),
            RowRef::Location(code) => write!(f, "location {code}"),
            RowRef::LocationLoad(code) => write!(f, "load of {code}"),
            RowRef::Pallet(code) => write!(f, "pallet {code}"),
            RowRef::Allocation(id) => write!(f, "allocation {id}"),
            RowRef::PickList(id) => write!(f, "pick list {id}"),
            RowRef::Batch(id) => write!(f, "dispatch batch {id}"),
            RowRef::Idempotency(key) => write!(f, "idempotency key {key}"),
        }
    }
}

/// A committed unit of state change. Journaled and published as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum Change {
    LocationRegistered {
        location: Location,
        occurred_at: DateTime<Utc>,
    },
    LocationUpdated {
        location: Location,
        occurred_at: DateTime<Utc>,
    },
    MovementRecorded { movement: Movement },
    AllocationOpened { allocation: Allocation },
    Pallet { event: PalletEvent },
    PickList { event: PickListEvent },
    Batch { event: DispatchBatchEvent },
    LineQuarantined {
        line: StockLineKey,
        stored: (u32, u32),
        /// `None` when the movement history cannot be replayed at all.
        replayed: Option<(u32, u32)>,
        occurred_at: DateTime<Utc>,
    },
    LineReconciled {
        line: StockLineKey,
        quantity_cases: u32,
        reserved_cases: u32,
        occurred_at: DateTime<Utc>,
    },
    IdempotencyClaimed {
        key: IdempotencyKey,
        /// Filled in at commit with the numbers of the commit's movements.
        movements: Vec<MovementNumber>,
        occurred_at: DateTime<Utc>,
    },
}

impl Change {
    pub fn movement(&self) -> Option<&Movement> {
        match self {
            Change::MovementRecorded { movement } => Some(movement),
            _ => None,
        }
    }
}

impl Event for Change {
    fn event_type(&self) -> &'static str {
        match self {
            Change::LocationRegistered { .. } => "warehouse.location.registered",
            Change::LocationUpdated { .. } => "warehouse.location.updated",
            Change::MovementRecorded { .. } => "warehouse.movement.recorded",
            Change::AllocationOpened { .. } => "warehouse.allocation.opened",
            Change::Pallet { event } => event.event_type(),
            Change::PickList { event } => event.event_type(),
            Change::Batch { event } => event.event_type(),
            Change::LineQuarantined { .. } => "warehouse.line.quarantined",
            Change::LineReconciled { .. } => "warehouse.line.reconciled",
            Change::IdempotencyClaimed { .. } => "warehouse.idempotency.claimed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            Change::LocationRegistered { occurred_at, .. }
            | Change::LocationUpdated { occurred_at, .. }
            | Change::LineQuarantined { occurred_at, .. }
            | Change::LineReconciled { occurred_at, .. }
            | Change::IdempotencyClaimed { occurred_at, .. } => *occurred_at,
            Change::MovementRecorded { movement } => movement.performed_at,
            Change::AllocationOpened { allocation } => allocation.created_at,
            Change::Pallet { event } => event.occurred_at(),
            Change::PickList { event } => event.occurred_at(),
            Change::Batch { event } => event.occurred_at(),
        }
    }
}

/// Next human-readable numbers to hand out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sequences {
    pub next_movement: u64,
    pub next_pick_list: u64,
    pub next_batch: u64,
}

impl Default for Sequences {
    fn default() -> Self {
        Self {
            next_movement: 1,
            next_pick_list: 1,
            next_batch: 1,
        }
    }
}

/// Outcome of replaying one stock line against its stored row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineCheck {
    pub line: StockLineKey,
    pub stored: (u32, u32),
    pub replayed: Option<(u32, u32)>,
}

impl LineCheck {
    pub fn is_consistent(&self) -> bool {
        self.replayed == Some(self.stored)
    }
}

/// Serializable image of the whole ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub locations: Vec<Location>,
    pub lines: Vec<StockLine>,
    pub movements: Vec<Movement>,
    pub pallets: Vec<Pallet>,
    pub allocations: Vec<Allocation>,
    pub pick_lists: Vec<PickList>,
    pub batches: Vec<DispatchBatch>,
    pub idempotency: Vec<(IdempotencyKey, Vec<MovementNumber>)>,
    pub quarantined: Vec<StockLineKey>,
    pub sequences: Sequences,
}

#[derive(Debug, Clone, Default)]
pub struct WarehouseState {
    pub(crate) locations: LocationRegistry,
    pub(crate) lines: BTreeMap<StockLineKey, StockLine>,
    pub(crate) by_product: BTreeMap<ProductRef, BTreeSet<StockLineKey>>,
    pub(crate) location_loads: BTreeMap<LocationCode, u64>,
    movements: BTreeMap<MovementNumber, Movement>,
    /// Every line ever touched, with the movements that touched it.
    line_history: BTreeMap<StockLineKey, Vec<MovementNumber>>,
    pub(crate) pallets: BTreeMap<PalletCode, Pallet>,
    pub(crate) allocations: BTreeMap<AllocationId, Allocation>,
    pub(crate) pick_lists: BTreeMap<PickListId, PickList>,
    pub(crate) batches: BTreeMap<DispatchBatchId, DispatchBatch>,
    pub(crate) idempotency: BTreeMap<IdempotencyKey, Vec<MovementNumber>>,
    pub(crate) quarantined: BTreeSet<StockLineKey>,
    versions: BTreeMap<RowRef, u64>,
    sequences: Sequences,
}

impl WarehouseState {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- reads -------------------------------------------------------------

    pub fn version(&self, row: &RowRef) -> u64 {
        self.versions.get(row).copied().unwrap_or(0)
    }

    pub fn sequences(&self) -> Sequences {
        self.sequences
    }

    pub fn locations(&self) -> &LocationRegistry {
        &self.locations
    }

    pub fn get_location(&self, code: &LocationCode) -> LedgerResult<&Location> {
        self.locations.get(code)
    }

    pub fn list_by_type(&self, location_type: LocationType) -> Vec<&Location> {
        self.locations.list_by_type(location_type)
    }

    /// Summed quantity of every line at `code`.
    pub fn location_load(&self, code: &LocationCode) -> u64 {
        self.location_loads.get(code).copied().unwrap_or(0)
    }

    pub fn line(&self, key: &StockLineKey) -> Option<&StockLine> {
        self.lines.get(key)
    }

    pub fn lines(&self) -> impl Iterator<Item = &StockLine> {
        self.lines.values()
    }

    /// Lines of one product (optionally one owner), in key order.
    pub fn product_lines<'a>(
        &'a self,
        product: &ProductRef,
        owner: Option<&'a OwnerId>,
    ) -> impl Iterator<Item = &'a StockLine> + 'a {
        self.by_product
            .get(product)
            .into_iter()
            .flat_map(|keys| keys.iter())
            .filter_map(|key| self.lines.get(key))
            .filter(move |line| owner.is_none_or(|o| &line.key.owner == o))
    }

    /// Allocatable stock: loose, not quarantined, with cases available.
    pub fn get_available(&self, product: &ProductRef, owner: Option<&OwnerId>) -> Vec<AvailableStock> {
        self.product_lines(product, owner)
            .filter(|line| line.key.is_loose() && line.available_cases() > 0)
            .filter(|line| !self.quarantined.contains(&line.key))
            .map(|line| AvailableStock {
                line: line.key.clone(),
                available_cases: line.available_cases(),
                expiry_date: line.attributes.expiry_date,
            })
            .collect()
    }

    /// Total cases of a product held anywhere in the warehouse.
    pub fn total_cases(&self, product: &ProductRef) -> u64 {
        self.product_lines(product, None)
            .map(|l| u64::from(l.quantity_cases))
            .sum()
    }

    pub fn pallet(&self, code: &PalletCode) -> LedgerResult<&Pallet> {
        self.pallets
            .get(code)
            .filter(|p| p.is_created())
            .ok_or_else(|| LedgerError::not_found("pallet", code))
    }

    pub fn pallets(&self) -> impl Iterator<Item = &Pallet> {
        self.pallets.values()
    }

    pub fn allocation(&self, id: &AllocationId) -> LedgerResult<&Allocation> {
        self.allocations
            .get(id)
            .ok_or_else(|| LedgerError::not_found("allocation", id))
    }

    pub fn pick_list(&self, id: &PickListId) -> LedgerResult<&PickList> {
        self.pick_lists
            .get(id)
            .filter(|p| p.is_created())
            .ok_or_else(|| LedgerError::not_found("pick list", id))
    }

    pub fn batch(&self, id: &DispatchBatchId) -> LedgerResult<&DispatchBatch> {
        self.batches
            .get(id)
            .filter(|b| b.is_created())
            .ok_or_else(|| LedgerError::not_found("dispatch batch", id))
    }

    pub fn movement(&self, number: MovementNumber) -> LedgerResult<&Movement> {
        self.movements
            .get(&number)
            .ok_or_else(|| LedgerError::not_found("movement", number))
    }

    pub fn movement_count(&self) -> usize {
        self.movements.len()
    }

    /// Movements with a number strictly greater than `after`.
    pub fn movements_since(&self, after: MovementNumber) -> impl Iterator<Item = &Movement> {
        self.movements
            .range(MovementNumber(after.0.saturating_add(1))..)
            .map(|(_, m)| m)
    }

    /// Movements that touched `key`, in movement-number order.
    pub fn line_history<'a>(&'a self, key: &StockLineKey) -> impl Iterator<Item = &'a Movement> + 'a {
        self.line_history
            .get(key)
            .into_iter()
            .flat_map(|numbers| numbers.iter())
            .filter_map(|n| self.movements.get(n))
    }

    /// Every line that has ever been touched by a movement.
    pub fn touched_lines(&self) -> impl Iterator<Item = &StockLineKey> {
        self.line_history.keys()
    }

    pub fn is_quarantined(&self, key: &StockLineKey) -> bool {
        self.quarantined.contains(key)
    }

    pub fn quarantined(&self) -> impl Iterator<Item = &StockLineKey> {
        self.quarantined.iter()
    }

    /// Movements committed under an idempotency key, if it was used.
    pub fn idempotent_movements(&self, key: &IdempotencyKey) -> Option<Vec<Movement>> {
        self.idempotency.get(key).map(|numbers| {
            numbers
                .iter()
                .filter_map(|n| self.movements.get(n).cloned())
                .collect()
        })
    }

    /// Replay one line's history and compare it with the stored row.
    pub fn check_line(&self, key: &StockLineKey) -> LineCheck {
        let stored = self
            .lines
            .get(key)
            .map_or((0, 0), |l| (l.quantity_cases, l.reserved_cases));
        let replayed = crate::movement::replay_line(key, self.line_history(key)).ok();
        LineCheck {
            line: key.clone(),
            stored,
            replayed,
        }
    }

    // ---- commit support ------------------------------------------------------

    /// Assign movement, pick list and batch numbers to staged changes and fill
    /// idempotency claims with the numbers of the commit's movements.
    pub fn stamp(&self, changes: &mut [Change]) {
        let mut seq = self.sequences;
        let mut numbers = Vec::new();
        for change in changes.iter_mut() {
            match change {
                Change::MovementRecorded { movement } if !movement.movement_number.is_assigned() => {
                    movement.movement_number = MovementNumber(seq.next_movement);
                    seq.next_movement += 1;
                    numbers.push(movement.movement_number);
                }
                Change::PickList {
                    event: PickListEvent::Created { number, .. },
                } if !number.is_assigned() => {
                    *number = PickListNumber(seq.next_pick_list);
                    seq.next_pick_list += 1;
                }
                Change::Batch {
                    event: DispatchBatchEvent::Created { number, .. },
                } if !number.is_assigned() => {
                    *number = BatchNumber(seq.next_batch);
                    seq.next_batch += 1;
                }
                _ => {}
            }
        }
        for change in changes.iter_mut() {
            if let Change::IdempotencyClaimed { movements, .. } = change {
                *movements = numbers.clone();
            }
        }
    }

    pub fn apply_all<'a>(&mut self, changes: impl IntoIterator<Item = &'a Change>) -> LedgerResult<()> {
        for change in changes {
            self.apply(change)?;
        }
        Ok(())
    }

    /// Apply one change.
    ///
    /// Errors leave the state partially updated; callers apply to a working
    /// copy first (the transaction layer does) or replay a journal that was
    /// produced by successful applies.
    pub fn apply(&mut self, change: &Change) -> LedgerResult<()> {
        match change {
            Change::LocationRegistered { location, .. } | Change::LocationUpdated { location, .. } => {
                self.bump(RowRef::Location(location.code.clone()));
                self.locations.put(location.clone());
            }
            Change::MovementRecorded { movement } => self.apply_movement(movement)?,
            Change::AllocationOpened { allocation } => {
                self.bump(RowRef::Allocation(allocation.id));
                self.allocations.insert(allocation.id, allocation.clone());
            }
            Change::Pallet { event } => {
                let code = event.pallet().clone();
                self.bump(RowRef::Pallet(code.clone()));
                self.pallets
                    .entry(code.clone())
                    .or_insert_with(|| Pallet::empty(code))
                    .apply(event);
            }
            Change::PickList { event } => {
                let id = event.pick_list();
                if let PickListEvent::Created { number, .. } = event {
                    self.sequences.next_pick_list = self.sequences.next_pick_list.max(number.0 + 1);
                }
                self.bump(RowRef::PickList(id));
                self.pick_lists
                    .entry(id)
                    .or_insert_with(|| PickList::empty(id))
                    .apply(event);
            }
            Change::Batch { event } => {
                let id = event.batch();
                if let DispatchBatchEvent::Created { number, .. } = event {
                    self.sequences.next_batch = self.sequences.next_batch.max(number.0 + 1);
                }
                self.bump(RowRef::Batch(id));
                self.batches
                    .entry(id)
                    .or_insert_with(|| DispatchBatch::empty(id))
                    .apply(event);
            }
            Change::LineQuarantined { line, .. } => {
                self.bump(RowRef::Line(line.clone()));
                self.quarantined.insert(line.clone());
            }
            Change::LineReconciled {
                line,
                quantity_cases,
                reserved_cases,
                ..
            } => {
                if reserved_cases > quantity_cases {
                    return Err(LedgerError::validation(format!(
                        "cannot reconcile {line} to {reserved_cases} reserved of {quantity_cases}"
                    )));
                }
                let row = self.line_entry(line, &LotAttributes::default());
                let before = row.quantity_cases;
                row.quantity_cases = *quantity_cases;
                row.reserved_cases = *reserved_cases;
                self.shift_load(&line.location, before, *quantity_cases);
                self.prune(line);
                self.quarantined.remove(line);
                self.bump(RowRef::Line(line.clone()));
            }
            Change::IdempotencyClaimed { key, movements, .. } => {
                self.bump(RowRef::Idempotency(key.clone()));
                self.idempotency.insert(key.clone(), movements.clone());
            }
        }
        Ok(())
    }

    fn apply_movement(&mut self, movement: &Movement) -> LedgerResult<()> {
        if !movement.movement_type.is_status_marker() {
            if let Some(key) = &movement.from_line {
                let row = self.line_entry(key, &LotAttributes::default());
                let before = row.quantity_cases;
                let result = movement.apply_from(row);
                let after = row.quantity_cases;
                self.shift_load(&key.location, before, after);
                self.prune(key);
                result?;
                self.bump(RowRef::Line(key.clone()));
            }
            if let Some(key) = &movement.to_line {
                let row = self.line_entry(key, &movement.attributes);
                let before = row.quantity_cases;
                let result = movement.apply_to(row);
                let after = row.quantity_cases;
                self.shift_load(&key.location, before, after);
                self.prune(key);
                result?;
                self.bump(RowRef::Line(key.clone()));
            }
        }

        if let (Some(id), Some(key)) = (movement.allocation, movement.from_line.as_ref()) {
            let allocation = self
                .allocations
                .get_mut(&id)
                .ok_or_else(|| LedgerError::not_found("allocation", id))?;
            let cases = movement.quantity_cases;
            match movement.movement_type.from_effect() {
                FromEffect::Reserve => allocation.record_reserve(key, cases),
                FromEffect::Release => allocation.record_release(key, cases),
                FromEffect::ConsumeReserved => allocation.record_pick(key, cases),
                FromEffect::TakeAvailable => {}
            }
            self.bump(RowRef::Allocation(id));
        }

        // Staged movements become part of the log once numbered.
        if movement.movement_number.is_assigned() {
            let number = movement.movement_number;
            for key in movement.touched_lines() {
                self.line_history.entry(key.clone()).or_default().push(number);
            }
            self.sequences.next_movement = self.sequences.next_movement.max(number.0 + 1);
            self.movements.insert(number, movement.clone());
        }
        Ok(())
    }

    fn line_entry(&mut self, key: &StockLineKey, attributes: &LotAttributes) -> &mut StockLine {
        if !self.lines.contains_key(key) {
            self.by_product
                .entry(key.product.clone())
                .or_default()
                .insert(key.clone());
        }
        self.lines
            .entry(key.clone())
            .or_insert_with(|| StockLine::empty(key.clone(), attributes.clone()))
    }

    /// Drop a 0/0 row.
    fn prune(&mut self, key: &StockLineKey) {
        if self.lines.get(key).is_some_and(StockLine::is_empty) {
            self.lines.remove(key);
            if let Some(keys) = self.by_product.get_mut(&key.product) {
                keys.remove(key);
                if keys.is_empty() {
                    self.by_product.remove(&key.product);
                }
            }
        }
    }

    fn shift_load(&mut self, location: &LocationCode, before: u32, after: u32) {
        if before == after {
            return;
        }
        let load = self.location_loads.entry(location.clone()).or_insert(0);
        *load = (*load + u64::from(after)).saturating_sub(u64::from(before));
        if *load == 0 {
            self.location_loads.remove(location);
        }
        self.bump(RowRef::LocationLoad(location.clone()));
    }

    fn bump(&mut self, row: RowRef) {
        *self.versions.entry(row).or_insert(0) += 1;
    }

    // ---- working copies --------------------------------------------------------

    /// Copy one row from `base` into `self`, as `base` currently holds it.
    pub(crate) fn copy_row_from(&mut self, base: &WarehouseState, row: &RowRef) {
        match row {
            RowRef::Line(key) => {
                if let Some(line) = base.lines.get(key) {
                    if !self.lines.contains_key(key) {
                        self.by_product
                            .entry(key.product.clone())
                            .or_default()
                            .insert(key.clone());
                    }
                    self.lines.insert(key.clone(), line.clone());
                }
                if base.quarantined.contains(key) {
                    self.quarantined.insert(key.clone());
                }
            }
            RowRef::Location(code) => {
                if let Some(location) = base.locations.find(code) {
                    self.locations.put(location.clone());
                }
            }
            RowRef::LocationLoad(code) => {
                let load = base.location_load(code);
                if load > 0 {
                    self.location_loads.insert(code.clone(), load);
                }
            }
            RowRef::Pallet(code) => {
                if let Some(pallet) = base.pallets.get(code) {
                    self.pallets.insert(code.clone(), pallet.clone());
                }
            }
            RowRef::Allocation(id) => {
                if let Some(allocation) = base.allocations.get(id) {
                    self.allocations.insert(*id, allocation.clone());
                }
            }
            RowRef::PickList(id) => {
                if let Some(list) = base.pick_lists.get(id) {
                    self.pick_lists.insert(*id, list.clone());
                }
            }
            RowRef::Batch(id) => {
                if let Some(batch) = base.batches.get(id) {
                    self.batches.insert(*id, batch.clone());
                }
            }
            RowRef::Idempotency(key) => {
                if let Some(numbers) = base.idempotency.get(key) {
                    self.idempotency.insert(key.clone(), numbers.clone());
                }
            }
        }
    }

    // ---- snapshots ---------------------------------------------------------------

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            locations: self.locations.iter().cloned().collect(),
            lines: self.lines.values().cloned().collect(),
            movements: self.movements.values().cloned().collect(),
            pallets: self.pallets.values().cloned().collect(),
            allocations: self.allocations.values().cloned().collect(),
            pick_lists: self.pick_lists.values().cloned().collect(),
            batches: self.batches.values().cloned().collect(),
            idempotency: self
                .idempotency
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            quarantined: self.quarantined.iter().cloned().collect(),
            sequences: self.sequences,
        }
    }

    /// Rebuild state (and its indexes) from a snapshot. Row versions restart.
    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Self {
        let mut state = Self::new();
        for location in snapshot.locations {
            state.locations.put(location);
        }
        for line in snapshot.lines {
            if line.is_empty() {
                continue;
            }
            *state.location_loads.entry(line.key.location.clone()).or_insert(0) +=
                u64::from(line.quantity_cases);
            state
                .by_product
                .entry(line.key.product.clone())
                .or_default()
                .insert(line.key.clone());
            state.lines.insert(line.key.clone(), line);
        }
        for movement in snapshot.movements {
            for key in movement.touched_lines() {
                state
                    .line_history
                    .entry(key.clone())
                    .or_default()
                    .push(movement.movement_number);
            }
            state.movements.insert(movement.movement_number, movement);
        }
        for numbers in state.line_history.values_mut() {
            numbers.sort();
        }
        for pallet in snapshot.pallets {
            state.pallets.insert(pallet.code().clone(), pallet);
        }
        for allocation in snapshot.allocations {
            state.allocations.insert(allocation.id, allocation);
        }
        for list in snapshot.pick_lists {
            state.pick_lists.insert(list.id_typed(), list);
        }
        for batch in snapshot.batches {
            state.batches.insert(batch.id_typed(), batch);
        }
        state.idempotency = snapshot.idempotency.into_iter().collect();
        state.quarantined = snapshot.quarantined.into_iter().collect();
        state.sequences = snapshot.sequences;
        state
    }
}

/// Movement types `record` accepts from outside the ledger.
pub fn is_externally_recorded(movement_type: MovementType) -> bool {
    matches!(
        movement_type,
        MovementType::Receive
            | MovementType::Putaway
            | MovementType::Transfer
            | MovementType::Adjust
            | MovementType::Count
            | MovementType::OwnershipTransfer
            | MovementType::RepackOut
            | MovementType::RepackIn
    )
}

#[cfg(test)]
mod tests {
    use cellarledger_core::UserId;

    use super::*;
    use crate::ids::LotNumber;
    use crate::stock::StockRef;

    fn stock() -> StockRef {
        StockRef::new(
            ProductRef::new("101234520151200750").unwrap(),
            OwnerId::new("OWNERA").unwrap(),
            LotNumber::new("L1").unwrap(),
        )
    }

    fn loc(s: &str) -> LocationCode {
        LocationCode::new(s).unwrap()
    }

    fn movement(
        movement_type: MovementType,
        from: Option<StockLineKey>,
        to: Option<StockLineKey>,
        cases: u32,
    ) -> Change {
        Change::MovementRecorded {
            movement: Movement {
                movement_number: MovementNumber::UNASSIGNED,
                movement_type,
                from_line: from,
                to_line: to,
                quantity_cases: cases,
                attributes: LotAttributes::default(),
                pallet: None,
                allocation: None,
                counted_cases: None,
                performed_by: UserId::new(),
                performed_at: Utc::now(),
                notes: None,
                idempotency_key: None,
            },
        }
    }

    fn commit(state: &mut WarehouseState, mut changes: Vec<Change>) {
        state.stamp(&mut changes);
        state.apply_all(&changes).unwrap();
    }

    #[test]
    fn movements_maintain_lines_loads_and_history() {
        let mut state = WarehouseState::new();
        let dock = stock().at(loc("DOCK"));
        let rack = stock().at(loc("RAK-01"));
        commit(
            &mut state,
            vec![
                movement(MovementType::Receive, None, Some(dock.clone()), 10),
                movement(MovementType::Putaway, Some(dock.clone()), Some(rack.clone()), 10),
            ],
        );

        assert!(state.line(&dock).is_none(), "0/0 rows are pruned");
        assert_eq!(state.line(&rack).map(|l| l.quantity_cases), Some(10));
        assert_eq!(state.location_load(&loc("DOCK")), 0);
        assert_eq!(state.location_load(&loc("RAK-01")), 10);
        assert_eq!(state.line_history(&dock).count(), 2);
        assert_eq!(state.movements_since(MovementNumber(1)).count(), 1);
        assert_eq!(state.sequences().next_movement, 3);
        assert!(state.check_line(&dock).is_consistent());
        assert!(state.check_line(&rack).is_consistent());
    }

    #[test]
    fn versions_bump_only_for_touched_rows() {
        let mut state = WarehouseState::new();
        let rack = stock().at(loc("RAK-01"));
        let other = stock().at(loc("RAK-02"));
        commit(&mut state, vec![movement(MovementType::Receive, None, Some(rack.clone()), 5)]);

        assert_eq!(state.version(&RowRef::Line(rack.clone())), 1);
        assert_eq!(state.version(&RowRef::LocationLoad(loc("RAK-01"))), 1);
        assert_eq!(state.version(&RowRef::Line(other)), 0);
    }

    #[test]
    fn stamp_numbers_movements_and_fills_idempotency_claims() {
        let state = WarehouseState::new();
        let rack = stock().at(loc("RAK-01"));
        let key = IdempotencyKey::new("rcv-1").unwrap();
        let mut changes = vec![
            movement(MovementType::Receive, None, Some(rack.clone()), 5),
            movement(MovementType::Receive, None, Some(rack), 5),
            Change::IdempotencyClaimed {
                key,
                movements: vec![],
                occurred_at: Utc::now(),
            },
        ];
        state.stamp(&mut changes);
        match &changes[2] {
            Change::IdempotencyClaimed { movements, .. } => {
                assert_eq!(movements, &vec![MovementNumber(1), MovementNumber(2)]);
            }
            other => panic!("unexpected change: {other:?}"),
        }
    }

    #[test]
    fn snapshot_restores_indexes() {
        let mut state = WarehouseState::new();
        let rack = stock().at(loc("RAK-01"));
        commit(&mut state, vec![movement(MovementType::Receive, None, Some(rack.clone()), 7)]);

        let json = serde_json::to_string(&state.snapshot()).unwrap();
        let restored = WarehouseState::from_snapshot(serde_json::from_str(&json).unwrap());
        assert_eq!(restored.location_load(&loc("RAK-01")), 7);
        assert_eq!(restored.total_cases(&rack.product), 7);
        assert_eq!(restored.line_history(&rack).count(), 1);
        assert_eq!(restored.sequences(), state.sequences());
    }

    #[test]
    fn tampered_rows_fail_the_line_check() {
        let mut state = WarehouseState::new();
        let rack = stock().at(loc("RAK-01"));
        commit(&mut state, vec![movement(MovementType::Receive, None, Some(rack.clone()), 7)]);

        let mut snapshot = state.snapshot();
        snapshot.lines[0].quantity_cases = 9;
        let tampered = WarehouseState::from_snapshot(snapshot);
        let check = tampered.check_line(&rack);
        assert!(!check.is_consistent());
        assert_eq!(check.stored, (9, 0));
        assert_eq!(check.replayed, Some((7, 0)));
    }
}
