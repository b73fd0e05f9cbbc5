//! Pick list operations.

use cellarledger_core::UserId;

use crate::allocation::{AllocationHolder, AllocationOutcome, AllocationRequest};
use crate::error::{LedgerError, LedgerResult};
use crate::ids::{OrderId, PickListId};
use crate::pick_list::{PickList, PickListCommand, PickListLine, PickListStatus, PickReceipt, PickRequestLine};

use super::Transaction;

impl Transaction<'_> {
    /// Allocate every line in full and open a pending pick list.
    ///
    /// A line that cannot be fully allocated fails the whole command with its
    /// shortfall; nothing stays reserved.
    pub fn create_pick_list(&mut self, order: &OrderId, lines: Vec<PickRequestLine>) -> LedgerResult<PickListId> {
        if lines.is_empty() {
            return Err(LedgerError::validation("pick list needs at least one line"));
        }
        let id = PickListId::new();
        let mut pick_lines = Vec::with_capacity(lines.len());
        for line in lines {
            let outcome = self.open_allocation(AllocationRequest {
                product: line.product.clone(),
                owner: line.owner.clone(),
                quantity_cases: line.quantity_cases,
                policy: line.policy,
                holder: AllocationHolder::PickList(id),
            })?;
            let allocation = match outcome {
                AllocationOutcome::Allocated { allocation_id, .. } => allocation_id,
                AllocationOutcome::Partial { shortfall, .. } | AllocationOutcome::Unavailable { shortfall } => {
                    return Err(LedgerError::InsufficientStock(shortfall));
                }
            };
            pick_lines.push(PickListLine {
                product: line.product,
                owner: line.owner,
                quantity_cases: line.quantity_cases,
                picked_cases: 0,
                allocation,
            });
        }

        let occurred_at = self.now();
        self.run_pick_list(
            &id,
            PickListCommand::Create {
                order: order.clone(),
                lines: pick_lines,
                occurred_at,
            },
        )?;
        Ok(id)
    }

    pub fn start_pick_list(&mut self, id: &PickListId, assigned_to: UserId) -> LedgerResult<PickList> {
        self.pick_list(id)?;
        let occurred_at = self.now();
        self.run_pick_list(
            id,
            PickListCommand::Start {
                assigned_to,
                occurred_at,
            },
        )
    }

    /// Pick `cases` of one line, consuming its reservation.
    pub fn pick_line(&mut self, id: &PickListId, line_index: usize, cases: u32) -> LedgerResult<PickReceipt> {
        let list = self.pick_list(id)?;
        if list.status() != PickListStatus::InProgress {
            return Err(LedgerError::invalid_transition("pick list", list.status(), "pick"));
        }
        let line = list.line(line_index)?.clone();
        self.consume_reservation(&line.allocation, cases)?;

        let occurred_at = self.now();
        let list = self.run_pick_list(
            id,
            PickListCommand::RecordPick {
                line_index,
                cases,
                occurred_at,
            },
        )?;
        let line_complete = list.line(line_index)?.is_fully_picked();
        Ok(PickReceipt {
            pick_list: *id,
            line_index,
            picked_cases: cases,
            line_complete,
            list_complete: list.status() == PickListStatus::Completed,
        })
    }

    /// Cancel an open pick list that is not part of a dispatch batch.
    pub fn cancel_pick_list(&mut self, id: &PickListId) -> LedgerResult<PickList> {
        let list = self.pick_list(id)?;
        if let Some(batch) = list.batch() {
            return Err(LedgerError::validation(format!(
                "pick list {id} belongs to dispatch batch {batch}; remove or cancel the batch"
            )));
        }
        self.cancel_pick_list_unchecked(id)
    }

    /// Cancel and release every outstanding reservation of the list.
    pub(super) fn cancel_pick_list_unchecked(&mut self, id: &PickListId) -> LedgerResult<PickList> {
        let occurred_at = self.now();
        let list = self.run_pick_list(id, PickListCommand::Cancel { occurred_at })?;
        for line in list.lines() {
            self.release_reservation(&line.allocation, None)?;
        }
        Ok(list)
    }
}
