//! Allocation: reserve, release and consume stock through movements.

use crate::allocation::{
    rank_candidates, draw, Allocation, AllocationHolder, AllocationOutcome, AllocationRequest,
};
use crate::error::{LedgerError, LedgerResult, Shortfall};
use crate::ids::AllocationId;
use crate::movement::MovementType;
use crate::state::Change;
use crate::stock::StockLine;

use super::{MovementDraft, Transaction};

impl Transaction<'_> {
    /// Loose, non-quarantined lines of the request's product with cases available.
    fn allocation_candidates(&mut self, request: &AllocationRequest) -> Vec<StockLine> {
        let lines = self.product_lines(&request.product);
        lines
            .into_iter()
            .filter(|line| line.key.is_loose() && line.available_cases() > 0)
            .filter(|line| request.owner.as_ref().is_none_or(|o| &line.key.owner == o))
            .filter(|line| !self.working.quarantined.contains(&line.key))
            .collect()
    }

    /// Reserve stock for an order. Pick-list reservations are opened by
    /// `create_pick_list`.
    pub fn allocate(&mut self, request: AllocationRequest) -> LedgerResult<AllocationOutcome> {
        if let AllocationHolder::PickList(list) = request.holder {
            return Err(LedgerError::validation(format!(
                "reservations for pick list {list} are opened by the pick list"
            )));
        }
        self.open_allocation(request)
    }

    pub(super) fn open_allocation(&mut self, request: AllocationRequest) -> LedgerResult<AllocationOutcome> {
        if request.quantity_cases == 0 {
            return Err(LedgerError::validation("allocation needs a positive quantity"));
        }
        let ranked = rank_candidates(self.allocation_candidates(&request), request.policy);
        let drawn = draw(&ranked, request.quantity_cases);
        let allocated: u32 = drawn.iter().map(|d| d.quantity_cases).sum();

        let shortfall = Shortfall {
            product: request.product.clone(),
            owner: request.owner.clone(),
            lot: None,
            location: None,
            requested_cases: request.quantity_cases,
            available_cases: allocated,
        };
        if drawn.is_empty() {
            return Ok(AllocationOutcome::Unavailable { shortfall });
        }

        let allocation_id = AllocationId::new();
        self.stage(Change::AllocationOpened {
            allocation: Allocation {
                id: allocation_id,
                holder: request.holder.clone(),
                product: request.product.clone(),
                owner: request.owner.clone(),
                requested_cases: request.quantity_cases,
                policy: request.policy,
                lines: Vec::new(),
                created_at: self.now(),
            },
        })?;
        for line in &drawn {
            self.stage_movement(
                MovementDraft::new(MovementType::Reserve, line.quantity_cases)
                    .from(line.line.clone())
                    .allocation(allocation_id),
            )?;
        }

        if allocated < request.quantity_cases {
            Ok(AllocationOutcome::Partial {
                allocation_id,
                lines: drawn,
                shortfall,
            })
        } else {
            Ok(AllocationOutcome::Allocated {
                allocation_id,
                lines: drawn,
            })
        }
    }

    /// Release outstanding cases, last-drawn line first. `None` releases all.
    /// Returns the number of cases released. Reservations held by a pick list
    /// are released by cancelling the list.
    pub fn release_allocation(&mut self, id: &AllocationId, cases: Option<u32>) -> LedgerResult<u32> {
        self.ensure_not_pick_list_held(id, "cancel the pick list")?;
        self.release_reservation(id, cases)
    }

    pub(super) fn release_reservation(&mut self, id: &AllocationId, cases: Option<u32>) -> LedgerResult<u32> {
        if cases == Some(0) {
            return Err(LedgerError::validation("release needs a positive quantity"));
        }
        let allocation = self.allocation(id)?;
        let planned = allocation.plan_release(cases)?;
        let mut released = 0;
        for line in planned {
            released += line.quantity_cases;
            self.stage_movement(
                MovementDraft::new(MovementType::Release, line.quantity_cases)
                    .from(line.line)
                    .allocation(*id),
            )?;
        }
        Ok(released)
    }

    /// Pick reserved cases out of the ledger, in draw order. Reservations
    /// held by a pick list are consumed through `pick_line`.
    pub fn consume_allocation(&mut self, id: &AllocationId, cases: u32) -> LedgerResult<()> {
        self.ensure_not_pick_list_held(id, "pick through the pick list")?;
        self.consume_reservation(id, cases)
    }

    pub(super) fn consume_reservation(&mut self, id: &AllocationId, cases: u32) -> LedgerResult<()> {
        if cases == 0 {
            return Err(LedgerError::validation("pick needs a positive quantity"));
        }
        let allocation = self.allocation(id)?;
        for line in allocation.plan_consume(cases)? {
            self.stage_movement(
                MovementDraft::new(MovementType::Pick, line.quantity_cases)
                    .from(line.line)
                    .allocation(*id),
            )?;
        }
        Ok(())
    }

    fn ensure_not_pick_list_held(&mut self, id: &AllocationId, instead: &str) -> LedgerResult<()> {
        match self.allocation(id)?.holder {
            AllocationHolder::PickList(list) => Err(LedgerError::validation(format!(
                "allocation {id} is held by pick list {list}; {instead}"
            ))),
            AllocationHolder::Order(_) => Ok(()),
        }
    }
}
