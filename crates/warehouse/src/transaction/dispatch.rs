//! Dispatch batch operations.

use crate::dispatch::{BatchPallet, BatchPickList, DispatchBatch, DispatchBatchCommand};
use crate::error::{LedgerError, LedgerResult};
use crate::ids::{DispatchBatchId, PalletCode, PickListId};
use crate::pick_list::{PickListCommand, PickListStatus};

use super::Transaction;

impl Transaction<'_> {
    pub fn create_batch(&mut self, destination: &str) -> LedgerResult<DispatchBatchId> {
        let id = DispatchBatchId::new();
        let occurred_at = self.now();
        self.run_batch(
            &id,
            DispatchBatchCommand::Create {
                destination: destination.to_string(),
                occurred_at,
            },
        )?;
        Ok(id)
    }

    pub fn add_pick_list_to_batch(&mut self, batch: &DispatchBatchId, pick_list: &PickListId) -> LedgerResult<DispatchBatch> {
        self.batch(batch)?;
        let list = self.pick_list(pick_list)?;
        let order = list
            .order()
            .cloned()
            .ok_or_else(|| LedgerError::not_found("pick list", pick_list))?;
        let occurred_at = self.now();
        self.run_pick_list(
            pick_list,
            PickListCommand::JoinBatch {
                batch: *batch,
                occurred_at,
            },
        )?;
        self.run_batch(
            batch,
            DispatchBatchCommand::AddPickList {
                member: BatchPickList {
                    pick_list: *pick_list,
                    order,
                    cases: list.total_cases(),
                },
                occurred_at,
            },
        )
    }

    pub fn remove_pick_list_from_batch(
        &mut self,
        batch: &DispatchBatchId,
        pick_list: &PickListId,
    ) -> LedgerResult<DispatchBatch> {
        let occurred_at = self.now();
        let updated = self.run_batch(
            batch,
            DispatchBatchCommand::RemovePickList {
                pick_list: *pick_list,
                occurred_at,
            },
        )?;
        self.run_pick_list(pick_list, PickListCommand::LeaveBatch { occurred_at })?;
        Ok(updated)
    }

    /// Add a sealed or retrieved pallet to a batch.
    pub fn add_pallet_to_batch(&mut self, batch: &DispatchBatchId, pallet: &PalletCode) -> LedgerResult<DispatchBatch> {
        self.batch(batch)?;
        let assigned = self.assign_pallet_to_batch(pallet, *batch)?;
        let occurred_at = self.now();
        self.run_batch(
            batch,
            DispatchBatchCommand::AddPallet {
                member: BatchPallet {
                    pallet: pallet.clone(),
                    cases: assigned.total_cases(),
                },
                occurred_at,
            },
        )
    }

    pub fn start_batch_picking(&mut self, batch: &DispatchBatchId) -> LedgerResult<DispatchBatch> {
        let occurred_at = self.now();
        self.run_batch(batch, DispatchBatchCommand::StartPicking { occurred_at })
    }

    /// Stage once every member pick list is completed.
    pub fn stage_batch(&mut self, batch: &DispatchBatchId) -> LedgerResult<DispatchBatch> {
        let current = self.batch(batch)?;
        let mut incomplete = Vec::new();
        for member in current.pick_lists() {
            if self.pick_list(&member.pick_list)?.status() != PickListStatus::Completed {
                incomplete.push(member.pick_list);
            }
        }
        let occurred_at = self.now();
        self.run_batch(
            batch,
            DispatchBatchCommand::Stage {
                incomplete,
                occurred_at,
            },
        )
    }

    /// Dispatch the batch; member pallets leave the ledger.
    pub fn dispatch_batch(&mut self, batch: &DispatchBatchId) -> LedgerResult<DispatchBatch> {
        let occurred_at = self.now();
        let dispatched = self.run_batch(batch, DispatchBatchCommand::Dispatch { occurred_at })?;
        for member in dispatched.pallets() {
            self.dispatch_pallet_with_batch(&member.pallet, *batch)?;
        }
        Ok(dispatched)
    }

    pub fn deliver_batch(&mut self, batch: &DispatchBatchId) -> LedgerResult<DispatchBatch> {
        let occurred_at = self.now();
        self.run_batch(batch, DispatchBatchCommand::Deliver { occurred_at })
    }

    /// Cancel a draft or picking batch. Open member pick lists are cancelled
    /// (releasing their reservations); completed ones stay completed.
    pub fn cancel_batch(&mut self, batch: &DispatchBatchId) -> LedgerResult<DispatchBatch> {
        let occurred_at = self.now();
        let cancelled = self.run_batch(batch, DispatchBatchCommand::Cancel { occurred_at })?;
        for member in cancelled.pick_lists() {
            if self.pick_list(&member.pick_list)?.status().is_open() {
                self.cancel_pick_list_unchecked(&member.pick_list)?;
            }
        }
        for member in cancelled.pallets() {
            self.release_pallet_from_batch(&member.pallet)?;
        }
        Ok(cancelled)
    }
}
