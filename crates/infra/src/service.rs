//! Warehouse service: the public contract of the ledger.
//!
//! Every mutating operation takes a [`CommandContext`] and runs as one
//! store transaction, returning an [`Execution`]. Reads go straight to the
//! committed state and may be stale.

use serde::{Deserialize, Serialize};

use cellarledger_core::UserId;
use cellarledger_events::EventBus;
use cellarledger_warehouse::{
    Allocation, AllocationId, AllocationOutcome, AllocationRequest, AvailableStock, CommandContext, DispatchBatch,
    DispatchBatchId, LedgerResult, LineCheck, Location, LocationCode, LocationType, Movement, MovementInput,
    MovementNumber, OrderId, OwnerId, Pallet, PalletCode, PalletOwnership, PickList, PickListId, PickReceipt,
    PickRequestLine, ProductRef, StockLine, StockLineKey, StockRef,
};

use crate::journal::Journal;
use crate::store::{ChangeBus, ChangeEnvelope, Execution, LedgerStore};

/// Result of checking every stock line against its movement history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub checked: usize,
    pub inconsistent: Vec<LineCheck>,
}

impl VerificationReport {
    pub fn is_consistent(&self) -> bool {
        self.inconsistent.is_empty()
    }
}

#[derive(Debug)]
pub struct WarehouseService<J, B = ChangeBus> {
    store: LedgerStore<J, B>,
}

impl<J, B> WarehouseService<J, B>
where
    J: Journal,
    B: EventBus<ChangeEnvelope>,
{
    pub fn new(store: LedgerStore<J, B>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &LedgerStore<J, B> {
        &self.store
    }

    pub fn into_store(self) -> LedgerStore<J, B> {
        self.store
    }

    // ---- location registry ---------------------------------------------------

    pub fn get_location(&self, code: &LocationCode) -> LedgerResult<Location> {
        self.store.read(|s| s.get_location(code).cloned())?
    }

    /// Non-archived locations of one type.
    pub fn list_by_type(&self, location_type: LocationType) -> LedgerResult<Vec<Location>> {
        self.store
            .read(|s| s.list_by_type(location_type).into_iter().cloned().collect())
    }

    pub fn register_location(&self, ctx: &CommandContext, location: Location) -> LedgerResult<Execution<()>> {
        self.store.execute(ctx, |tx| tx.register_location(location.clone()))
    }

    pub fn set_capacity(
        &self,
        ctx: &CommandContext,
        code: &LocationCode,
        capacity_cases: Option<u32>,
    ) -> LedgerResult<Execution<()>> {
        self.store.execute(ctx, |tx| tx.set_capacity(code, capacity_cases))
    }

    pub fn archive_location(&self, ctx: &CommandContext, code: &LocationCode) -> LedgerResult<Execution<()>> {
        self.store.execute(ctx, |tx| tx.archive_location(code))
    }

    // ---- stock ledger and movement log --------------------------------------

    pub fn get_available(&self, product: &ProductRef, owner: Option<&OwnerId>) -> LedgerResult<Vec<AvailableStock>> {
        self.store.read(|s| s.get_available(product, owner))
    }

    pub fn stock_line(&self, key: &StockLineKey) -> LedgerResult<Option<StockLine>> {
        self.store.read(|s| s.line(key).cloned())
    }

    /// Record an externally originated movement.
    pub fn record(&self, ctx: &CommandContext, input: MovementInput) -> LedgerResult<Execution<()>> {
        self.store.execute(ctx, |tx| tx.record(input.clone()))
    }

    pub fn movement(&self, number: MovementNumber) -> LedgerResult<Movement> {
        self.store.read(|s| s.movement(number).cloned())?
    }

    /// Movements numbered after `after`, oldest first.
    pub fn movements_since(&self, after: MovementNumber) -> LedgerResult<Vec<Movement>> {
        self.store.read(|s| s.movements_since(after).cloned().collect())
    }

    pub fn line_history(&self, key: &StockLineKey) -> LedgerResult<Vec<Movement>> {
        self.store.read(|s| s.line_history(key).cloned().collect())
    }

    // ---- allocation ------------------------------------------------------------

    pub fn allocate(&self, ctx: &CommandContext, request: AllocationRequest) -> LedgerResult<Execution<AllocationOutcome>> {
        self.store.execute(ctx, |tx| tx.allocate(request.clone()))
    }

    /// Release `cases` outstanding cases (all of them when `None`).
    pub fn release_allocation(
        &self,
        ctx: &CommandContext,
        id: &AllocationId,
        cases: Option<u32>,
    ) -> LedgerResult<Execution<u32>> {
        self.store.execute(ctx, |tx| tx.release_allocation(id, cases))
    }

    pub fn consume_allocation(&self, ctx: &CommandContext, id: &AllocationId, cases: u32) -> LedgerResult<Execution<()>> {
        self.store.execute(ctx, |tx| tx.consume_allocation(id, cases))
    }

    pub fn allocation(&self, id: &AllocationId) -> LedgerResult<Allocation> {
        self.store.read(|s| s.allocation(id).cloned())?
    }

    // ---- pallets -----------------------------------------------------------------

    pub fn pallet(&self, code: &PalletCode) -> LedgerResult<Pallet> {
        self.store.read(|s| s.pallet(code).cloned())?
    }

    pub fn create_pallet(
        &self,
        ctx: &CommandContext,
        code: &PalletCode,
        ownership: PalletOwnership,
        location: &LocationCode,
    ) -> LedgerResult<Execution<Pallet>> {
        self.store
            .execute(ctx, |tx| tx.create_pallet(code, ownership.clone(), location))
    }

    pub fn add_to_pallet(
        &self,
        ctx: &CommandContext,
        code: &PalletCode,
        line: &StockLineKey,
        cases: u32,
    ) -> LedgerResult<Execution<Pallet>> {
        self.store.execute(ctx, |tx| tx.add_to_pallet(code, line, cases))
    }

    pub fn remove_from_pallet(
        &self,
        ctx: &CommandContext,
        code: &PalletCode,
        stock: &StockRef,
        cases: u32,
    ) -> LedgerResult<Execution<Pallet>> {
        self.store.execute(ctx, |tx| tx.remove_from_pallet(code, stock, cases))
    }

    pub fn seal_pallet(&self, ctx: &CommandContext, code: &PalletCode) -> LedgerResult<Execution<Pallet>> {
        self.store.execute(ctx, |tx| tx.seal_pallet(code))
    }

    pub fn unseal_pallet(&self, ctx: &CommandContext, code: &PalletCode) -> LedgerResult<Execution<Pallet>> {
        self.store.execute(ctx, |tx| tx.unseal_pallet(code))
    }

    pub fn retrieve_pallet(&self, ctx: &CommandContext, code: &PalletCode) -> LedgerResult<Execution<Pallet>> {
        self.store.execute(ctx, |tx| tx.retrieve_pallet(code))
    }

    pub fn move_pallet(
        &self,
        ctx: &CommandContext,
        code: &PalletCode,
        to: &LocationCode,
    ) -> LedgerResult<Execution<Pallet>> {
        self.store.execute(ctx, |tx| tx.move_pallet(code, to))
    }

    pub fn dissolve_pallet(&self, ctx: &CommandContext, code: &PalletCode) -> LedgerResult<Execution<Pallet>> {
        self.store.execute(ctx, |tx| tx.dissolve_pallet(code))
    }

    pub fn dispatch_pallet(&self, ctx: &CommandContext, code: &PalletCode) -> LedgerResult<Execution<Pallet>> {
        self.store.execute(ctx, |tx| tx.dispatch_pallet(code))
    }

    // ---- pick lists ----------------------------------------------------------------

    pub fn pick_list(&self, id: &PickListId) -> LedgerResult<PickList> {
        self.store.read(|s| s.pick_list(id).cloned())?
    }

    pub fn create_pick_list(
        &self,
        ctx: &CommandContext,
        order: &OrderId,
        lines: Vec<PickRequestLine>,
    ) -> LedgerResult<Execution<PickListId>> {
        self.store.execute(ctx, |tx| tx.create_pick_list(order, lines.clone()))
    }

    pub fn start_pick_list(
        &self,
        ctx: &CommandContext,
        id: &PickListId,
        assigned_to: UserId,
    ) -> LedgerResult<Execution<PickList>> {
        self.store.execute(ctx, |tx| tx.start_pick_list(id, assigned_to))
    }

    pub fn pick_line(
        &self,
        ctx: &CommandContext,
        id: &PickListId,
        line_index: usize,
        cases: u32,
    ) -> LedgerResult<Execution<PickReceipt>> {
        self.store.execute(ctx, |tx| tx.pick_line(id, line_index, cases))
    }

    pub fn cancel_pick_list(&self, ctx: &CommandContext, id: &PickListId) -> LedgerResult<Execution<PickList>> {
        self.store.execute(ctx, |tx| tx.cancel_pick_list(id))
    }

    // ---- dispatch batches --------------------------------------------------------

    pub fn batch(&self, id: &DispatchBatchId) -> LedgerResult<DispatchBatch> {
        self.store.read(|s| s.batch(id).cloned())?
    }

    pub fn create_batch(&self, ctx: &CommandContext, destination: &str) -> LedgerResult<Execution<DispatchBatchId>> {
        self.store.execute(ctx, |tx| tx.create_batch(destination))
    }

    pub fn add_pick_list_to_batch(
        &self,
        ctx: &CommandContext,
        batch: &DispatchBatchId,
        pick_list: &PickListId,
    ) -> LedgerResult<Execution<DispatchBatch>> {
        self.store.execute(ctx, |tx| tx.add_pick_list_to_batch(batch, pick_list))
    }

    pub fn remove_pick_list_from_batch(
        &self,
        ctx: &CommandContext,
        batch: &DispatchBatchId,
        pick_list: &PickListId,
    ) -> LedgerResult<Execution<DispatchBatch>> {
        self.store
            .execute(ctx, |tx| tx.remove_pick_list_from_batch(batch, pick_list))
    }

    pub fn add_pallet_to_batch(
        &self,
        ctx: &CommandContext,
        batch: &DispatchBatchId,
        pallet: &PalletCode,
    ) -> LedgerResult<Execution<DispatchBatch>> {
        self.store.execute(ctx, |tx| tx.add_pallet_to_batch(batch, pallet))
    }

    pub fn start_batch_picking(&self, ctx: &CommandContext, batch: &DispatchBatchId) -> LedgerResult<Execution<DispatchBatch>> {
        self.store.execute(ctx, |tx| tx.start_batch_picking(batch))
    }

    pub fn stage_batch(&self, ctx: &CommandContext, batch: &DispatchBatchId) -> LedgerResult<Execution<DispatchBatch>> {
        self.store.execute(ctx, |tx| tx.stage_batch(batch))
    }

    pub fn dispatch_batch(&self, ctx: &CommandContext, batch: &DispatchBatchId) -> LedgerResult<Execution<DispatchBatch>> {
        self.store.execute(ctx, |tx| tx.dispatch_batch(batch))
    }

    pub fn deliver_batch(&self, ctx: &CommandContext, batch: &DispatchBatchId) -> LedgerResult<Execution<DispatchBatch>> {
        self.store.execute(ctx, |tx| tx.deliver_batch(batch))
    }

    pub fn cancel_batch(&self, ctx: &CommandContext, batch: &DispatchBatchId) -> LedgerResult<Execution<DispatchBatch>> {
        self.store.execute(ctx, |tx| tx.cancel_batch(batch))
    }

    // ---- verification --------------------------------------------------------------

    /// Replay one line; a mismatch quarantines it.
    pub fn verify_line(&self, ctx: &CommandContext, key: &StockLineKey) -> LedgerResult<Execution<LineCheck>> {
        let outcome = self.store.execute(ctx, |tx| tx.verify_line(key))?;
        if let Some(check) = outcome.value().filter(|c| !c.is_consistent()) {
            tracing::warn!(
                line = %key,
                stored = ?check.stored,
                replayed = ?check.replayed,
                "stock line disagrees with its movement history; quarantined"
            );
        }
        Ok(outcome)
    }

    /// Check every touched line against a read snapshot without committing
    /// anything; mismatches are reported but not quarantined.
    pub fn check_all(&self) -> LedgerResult<VerificationReport> {
        let report = self.store.read(|s| {
            let checks: Vec<LineCheck> = s.touched_lines().map(|key| s.check_line(key)).collect();
            VerificationReport {
                checked: checks.len(),
                inconsistent: checks.into_iter().filter(|c| !c.is_consistent()).collect(),
            }
        })?;
        tracing::info!(
            checked = report.checked,
            inconsistent = report.inconsistent.len(),
            "read-only ledger check finished"
        );
        Ok(report)
    }

    /// Verify every line that has ever been touched.
    ///
    /// Lines are checked against a read snapshot first; only mismatches go
    /// through a transaction (which re-checks and quarantines them).
    pub fn verify_all(&self, ctx: &CommandContext) -> LedgerResult<VerificationReport> {
        let checks: Vec<LineCheck> = self
            .store
            .read(|s| s.touched_lines().map(|key| s.check_line(key)).collect())?;

        // One idempotency key cannot cover several commits.
        let ctx = CommandContext {
            idempotency_key: None,
            ..ctx.clone()
        };
        let mut report = VerificationReport {
            checked: checks.len(),
            inconsistent: Vec::new(),
        };
        for check in checks.into_iter().filter(|c| !c.is_consistent()) {
            let confirmed = self.verify_line(&ctx, &check.line)?.into_value().unwrap_or(check);
            if !confirmed.is_consistent() {
                report.inconsistent.push(confirmed);
            }
        }

        tracing::info!(
            checked = report.checked,
            inconsistent = report.inconsistent.len(),
            "ledger verification finished"
        );
        Ok(report)
    }

    /// Realign a line with its history and lift its quarantine.
    pub fn reconcile_line(&self, ctx: &CommandContext, key: &StockLineKey) -> LedgerResult<Execution<LineCheck>> {
        let outcome = self.store.execute(ctx, |tx| tx.reconcile_line(key))?;
        tracing::info!(line = %key, performed_by = %ctx.performed_by, "stock line reconciled");
        Ok(outcome)
    }

    pub fn quarantined(&self) -> LedgerResult<Vec<StockLineKey>> {
        self.store.read(|s| s.quarantined().cloned().collect())
    }
}
