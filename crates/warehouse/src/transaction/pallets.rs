//! Pallet operations: every status change is a pallet event plus the
//! movements that keep the pallet-holding stock lines in step.

use crate::error::{LedgerError, LedgerResult};
use crate::ids::{DispatchBatchId, LocationCode, PalletCode};
use crate::movement::MovementType;
use crate::pallet::{Pallet, PalletCommand, PalletOwnership};
use crate::stock::{Holding, LotAttributes, StockLineKey, StockRef};

use super::{MovementDraft, Transaction};

impl Transaction<'_> {
    pub fn create_pallet(
        &mut self,
        code: &PalletCode,
        ownership: PalletOwnership,
        location: &LocationCode,
    ) -> LedgerResult<Pallet> {
        self.inbound_location(location)?;
        let occurred_at = self.now();
        self.run_pallet(
            code,
            PalletCommand::Create {
                ownership,
                location: location.clone(),
                occurred_at,
            },
        )
    }

    /// Move loose cases from `line` onto the pallet.
    pub fn add_to_pallet(&mut self, code: &PalletCode, line: &StockLineKey, cases: u32) -> LedgerResult<Pallet> {
        if !line.is_loose() {
            return Err(LedgerError::validation(format!(
                "{line} is already on a pallet"
            )));
        }
        let occurred_at = self.now();
        let pallet = self.run_pallet(
            code,
            PalletCommand::AddCases {
                stock: line.stock_ref(),
                cases,
                from_location: line.location.clone(),
                occurred_at,
            },
        )?;
        let attributes = self.attributes_of(line);
        self.stage_movement(
            MovementDraft::new(MovementType::PalletAdd, cases)
                .from(line.clone())
                .to(line.with_holding(Holding::Pallet(code.clone())))
                .attributes(attributes)
                .pallet(code.clone()),
        )?;
        Ok(pallet)
    }

    /// Unload cases back to loose stock at the pallet's location.
    pub fn remove_from_pallet(&mut self, code: &PalletCode, stock: &StockRef, cases: u32) -> LedgerResult<Pallet> {
        let before = self.pallet(code)?;
        let occurred_at = self.now();
        let pallet = self.run_pallet(
            code,
            PalletCommand::RemoveCases {
                stock: stock.clone(),
                cases,
                occurred_at,
            },
        )?;
        let member_line = before.member_line(stock)?;
        self.unload(code, &member_line, cases)?;
        Ok(pallet)
    }

    pub fn seal_pallet(&mut self, code: &PalletCode) -> LedgerResult<Pallet> {
        let occurred_at = self.now();
        let pallet = self.run_pallet(code, PalletCommand::Seal { occurred_at })?;
        self.stage_marker(MovementType::PalletSeal, &pallet)?;
        Ok(pallet)
    }

    pub fn unseal_pallet(&mut self, code: &PalletCode) -> LedgerResult<Pallet> {
        let occurred_at = self.now();
        let pallet = self.run_pallet(code, PalletCommand::Unseal { occurred_at })?;
        self.stage_marker(MovementType::PalletUnseal, &pallet)?;
        Ok(pallet)
    }

    /// A sealed pallet was taken out of storage for shipping.
    pub fn retrieve_pallet(&mut self, code: &PalletCode) -> LedgerResult<Pallet> {
        let occurred_at = self.now();
        self.run_pallet(code, PalletCommand::Retrieve { occurred_at })
    }

    /// Move a whole pallet; one capacity-checked movement per member.
    pub fn move_pallet(&mut self, code: &PalletCode, to: &LocationCode) -> LedgerResult<Pallet> {
        let before = self.pallet(code)?;
        let occurred_at = self.now();
        let pallet = self.run_pallet(
            code,
            PalletCommand::Move {
                to: to.clone(),
                occurred_at,
            },
        )?;
        for member in before.members() {
            let from = before.member_line(&member.stock)?;
            let target = from.with_location(to.clone());
            let attributes = self.attributes_of(&from);
            self.stage_movement(
                MovementDraft::new(MovementType::PalletMove, member.cases)
                    .from(from)
                    .to(target)
                    .attributes(attributes)
                    .pallet(code.clone()),
            )?;
        }
        Ok(pallet)
    }

    /// Unload every member to loose stock and archive the pallet.
    pub fn dissolve_pallet(&mut self, code: &PalletCode) -> LedgerResult<Pallet> {
        let before = self.pallet(code)?;
        let occurred_at = self.now();
        let pallet = self.run_pallet(code, PalletCommand::Dissolve { occurred_at })?;
        for member in before.members() {
            let line = before.member_line(&member.stock)?;
            self.unload(code, &line, member.cases)?;
        }
        self.stage_marker_cases(MovementType::PalletDissolve, code, before.total_cases())?;
        Ok(pallet)
    }

    /// Ship a pallet on its own: every member leaves the ledger. Pallets
    /// assigned to a dispatch batch leave through `dispatch_batch`.
    pub fn dispatch_pallet(&mut self, code: &PalletCode) -> LedgerResult<Pallet> {
        self.ship_pallet(code, None)
    }

    pub(super) fn dispatch_pallet_with_batch(&mut self, code: &PalletCode, batch: DispatchBatchId) -> LedgerResult<Pallet> {
        self.ship_pallet(code, Some(batch))
    }

    fn ship_pallet(&mut self, code: &PalletCode, batch: Option<DispatchBatchId>) -> LedgerResult<Pallet> {
        let before = self.pallet(code)?;
        let occurred_at = self.now();
        let pallet = self.run_pallet(code, PalletCommand::Dispatch { batch, occurred_at })?;
        for member in before.members() {
            let line = before.member_line(&member.stock)?;
            self.stage_movement(
                MovementDraft::new(MovementType::PalletDispatch, member.cases)
                    .from(line)
                    .pallet(code.clone()),
            )?;
        }
        Ok(pallet)
    }

    pub(super) fn assign_pallet_to_batch(&mut self, code: &PalletCode, batch: DispatchBatchId) -> LedgerResult<Pallet> {
        let occurred_at = self.now();
        self.run_pallet(code, PalletCommand::AssignToBatch { batch, occurred_at })
    }

    pub(super) fn release_pallet_from_batch(&mut self, code: &PalletCode) -> LedgerResult<Pallet> {
        let occurred_at = self.now();
        self.run_pallet(code, PalletCommand::ReleaseFromBatch { occurred_at })
    }

    fn unload(&mut self, code: &PalletCode, member_line: &StockLineKey, cases: u32) -> LedgerResult<()> {
        let attributes = self.attributes_of(member_line);
        self.stage_movement(
            MovementDraft::new(MovementType::PalletRemove, cases)
                .from(member_line.clone())
                .to(member_line.with_holding(Holding::Loose))
                .attributes(attributes)
                .pallet(code.clone()),
        )
    }

    fn stage_marker(&mut self, movement_type: MovementType, pallet: &Pallet) -> LedgerResult<()> {
        self.stage_marker_cases(movement_type, pallet.code(), pallet.total_cases())
    }

    fn stage_marker_cases(&mut self, movement_type: MovementType, code: &PalletCode, cases: u32) -> LedgerResult<()> {
        self.stage_movement(MovementDraft::new(movement_type, cases).pallet(code.clone()))
    }

    fn attributes_of(&mut self, line: &StockLineKey) -> LotAttributes {
        self.line(line).map(|l| l.attributes.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::MovementInput;
    use super::*;
    use crate::ids::OwnerId;
    use crate::location::Location;
    use crate::location::LocationType;
    use crate::pallet::PalletStatus;
    use crate::state::WarehouseState;

    fn receive(state: &mut WarehouseState, owner: &str, at: &str, cases: u32) -> StockLineKey {
        run(state, ctx(), |tx| {
            tx.record(MovementInput::Receive {
                stock: stock(owner, "L1"),
                location: loc(at),
                quantity_cases: cases,
                expiry_date: None,
                is_perishable: false,
            })
        })
        .unwrap();
        stock(owner, "L1").at(loc(at))
    }

    fn pallet_code() -> PalletCode {
        PalletCode::new("PAL-0001").unwrap()
    }

    fn qty(state: &WarehouseState, key: &StockLineKey) -> u32 {
        state.line(key).map_or(0, |l| l.quantity_cases)
    }

    fn loaded_pallet(state: &mut WarehouseState) -> (StockLineKey, StockLineKey) {
        let a = receive(state, "A", "FLR-01", 20);
        let b = receive(state, "B", "FLR-01", 10);
        run(state, ctx(), |tx| {
            tx.create_pallet(&pallet_code(), PalletOwnership::Mixed, &loc("FLR-01"))?;
            tx.add_to_pallet(&pallet_code(), &a, 12)?;
            tx.add_to_pallet(&pallet_code(), &b, 10)
        })
        .unwrap();
        (a, b)
    }

    #[test]
    fn adding_to_a_pallet_moves_cases_between_holdings() {
        let mut state = warehouse();
        let (a, b) = loaded_pallet(&mut state);

        let on_pallet = a.with_holding(Holding::Pallet(pallet_code()));
        assert_eq!(qty(&state, &a), 8);
        assert_eq!(qty(&state, &on_pallet), 12);
        assert_eq!(qty(&state, &b), 0);
        assert_eq!(state.location_load(&loc("FLR-01")), 30);
        assert_eq!(state.pallet(&pallet_code()).unwrap().total_cases(), 22);
    }

    #[test]
    fn sealed_pallet_rejects_additions() {
        let mut state = warehouse();
        let (a, _) = loaded_pallet(&mut state);
        run(&mut state, ctx(), |tx| tx.seal_pallet(&pallet_code())).unwrap();

        let err = run(&mut state, ctx(), |tx| tx.add_to_pallet(&pallet_code(), &a, 1)).unwrap_err();
        assert_eq!(err, LedgerError::PalletSealed { pallet: pallet_code() });
        let marker = state
            .movements_since(crate::ids::MovementNumber(0))
            .find(|m| m.movement_type == MovementType::PalletSeal)
            .unwrap();
        assert_eq!(marker.quantity_cases, 22);
        assert_eq!(marker.pallet, Some(pallet_code()));
    }

    #[test]
    fn single_owner_pallet_rejects_other_owners() {
        let mut state = warehouse();
        let b = receive(&mut state, "B", "FLR-01", 5);
        let err = run(&mut state, ctx(), |tx| {
            tx.create_pallet(
                &pallet_code(),
                PalletOwnership::Single(OwnerId::new("A").unwrap()),
                &loc("FLR-01"),
            )?;
            tx.add_to_pallet(&pallet_code(), &b, 5)
        })
        .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
        assert!(state.pallet(&pallet_code()).is_err(), "nothing committed");
    }

    #[test]
    fn dissolve_unloads_and_archives() {
        let mut state = warehouse();
        let (a, b) = loaded_pallet(&mut state);
        let pallet = run(&mut state, ctx(), |tx| tx.dissolve_pallet(&pallet_code())).unwrap();

        assert_eq!(pallet.status(), PalletStatus::Archived);
        assert!(pallet.members().is_empty());
        assert_eq!(qty(&state, &a), 20);
        assert_eq!(qty(&state, &b), 10);
        assert!(state.line(&a.with_holding(Holding::Pallet(pallet_code()))).is_none());
    }

    #[test]
    fn moving_a_pallet_checks_destination_capacity() {
        let mut state = warehouse();
        run(&mut state, ctx(), |tx| {
            tx.register_location(Location::new(loc("RAK-09"), LocationType::Rack).with_capacity(25))
        })
        .unwrap();
        let (a, _) = loaded_pallet(&mut state);
        receive(&mut state, "C", "RAK-09", 4);

        let err = run(&mut state, ctx(), |tx| tx.move_pallet(&pallet_code(), &loc("RAK-09"))).unwrap_err();
        assert!(matches!(err, LedgerError::CapacityExceeded { .. }));

        let pallet = run(&mut state, ctx(), |tx| tx.move_pallet(&pallet_code(), &loc("RAK-02"))).unwrap();
        assert_eq!(pallet.location(), Some(&loc("RAK-02")));
        let moved = a.with_location(loc("RAK-02")).with_holding(Holding::Pallet(pallet_code()));
        assert_eq!(qty(&state, &moved), 12);
        assert_eq!(state.location_load(&loc("RAK-02")), 22);
    }

    #[test]
    fn dispatch_takes_members_out_of_the_ledger() {
        let mut state = warehouse();
        let (a, _) = loaded_pallet(&mut state);
        run(&mut state, ctx(), |tx| {
            tx.seal_pallet(&pallet_code())?;
            tx.retrieve_pallet(&pallet_code())?;
            tx.dispatch_pallet(&pallet_code())
        })
        .unwrap();

        assert_eq!(state.location_load(&loc("FLR-01")), 8);
        assert_eq!(qty(&state, &a), 8);
        assert_eq!(state.pallet(&pallet_code()).unwrap().status(), PalletStatus::Archived);
    }
}
