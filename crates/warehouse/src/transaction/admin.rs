//! Location registry maintenance and ledger verification.

use crate::error::{LedgerError, LedgerResult};
use crate::ids::LocationCode;
use crate::location::Location;
use crate::state::{Change, LineCheck, RowRef};
use crate::stock::StockLineKey;

use super::Transaction;

impl Transaction<'_> {
    pub fn register_location(&mut self, location: Location) -> LedgerResult<()> {
        let code = location.code.clone();
        if self.location(&code).is_ok() {
            return Err(LedgerError::Conflict(format!("location {code} already exists")));
        }
        if location.archived {
            return Err(LedgerError::validation(format!(
                "location {code} cannot be registered archived"
            )));
        }
        let occurred_at = self.now();
        self.stage(Change::LocationRegistered {
            location,
            occurred_at,
        })
    }

    /// Change a location's capacity. `None` makes it unbounded.
    pub fn set_capacity(&mut self, code: &LocationCode, capacity_cases: Option<u32>) -> LedgerResult<()> {
        let mut location = self.location(code)?;
        if let Some(capacity) = capacity_cases {
            let stored = self.location_load(code);
            if stored > u64::from(capacity) {
                return Err(LedgerError::CapacityExceeded {
                    location: code.clone(),
                    capacity_cases: capacity,
                    stored_cases: stored,
                    incoming_cases: 0,
                });
            }
        }
        location.capacity_cases = capacity_cases;
        let occurred_at = self.now();
        self.stage(Change::LocationUpdated {
            location,
            occurred_at,
        })
    }

    /// Retire an empty location; its history stays queryable.
    pub fn archive_location(&mut self, code: &LocationCode) -> LedgerResult<()> {
        let mut location = self.location(code)?;
        if location.archived {
            return Ok(());
        }
        let stored = self.location_load(code);
        if stored > 0 {
            return Err(LedgerError::validation(format!(
                "location {code} still holds {stored} case(s)"
            )));
        }
        location.archived = true;
        let occurred_at = self.now();
        self.stage(Change::LocationUpdated {
            location,
            occurred_at,
        })
    }

    /// Replay a line; quarantine it when the stored row disagrees.
    pub fn verify_line(&mut self, key: &StockLineKey) -> LedgerResult<LineCheck> {
        // Any movement on the line bumps its version, so the check is
        // consistent with the history it replays.
        self.read(&RowRef::Line(key.clone()));
        let check = self.base().check_line(key);
        if !check.is_consistent() && !self.is_quarantined(key) {
            let occurred_at = self.now();
            self.stage(Change::LineQuarantined {
                line: key.clone(),
                stored: check.stored,
                replayed: check.replayed,
                occurred_at,
            })?;
        }
        Ok(check)
    }

    /// Realign a line with its movement history and lift its quarantine.
    pub fn reconcile_line(&mut self, key: &StockLineKey) -> LedgerResult<LineCheck> {
        self.read(&RowRef::Line(key.clone()));
        let check = self.base().check_line(key);
        let (quantity_cases, reserved_cases) = check.replayed.ok_or_else(|| {
            LedgerError::validation(format!(
                "movement history of {key} cannot be replayed; correct it with an adjustment first"
            ))
        })?;
        if check.is_consistent() && !self.is_quarantined(key) {
            return Ok(check);
        }
        let occurred_at = self.now();
        self.stage(Change::LineReconciled {
            line: key.clone(),
            quantity_cases,
            reserved_cases,
            occurred_at,
        })?;
        Ok(check)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::{MovementDraft, MovementInput};
    use crate::location::LocationType;
    use crate::movement::MovementType;
    use crate::state::WarehouseState;

    use super::*;

    #[test]
    fn duplicate_locations_conflict() {
        let mut state = warehouse();
        let err = run(&mut state, ctx(), |tx| {
            tx.register_location(Location::new(loc("rak-01"), LocationType::Rack))
        })
        .unwrap_err();
        assert!(matches!(err, LedgerError::Conflict(_)));
    }

    #[test]
    fn capacity_cannot_drop_below_stored_cases() {
        let mut state = warehouse();
        run(&mut state, ctx(), |tx| {
            tx.stage_movement(MovementDraft::new(MovementType::Receive, 40).to(stock("A", "L1").at(loc("RAK-02"))))
        })
        .unwrap();

        let err = run(&mut state, ctx(), |tx| tx.set_capacity(&loc("RAK-02"), Some(30))).unwrap_err();
        assert_eq!(
            err,
            LedgerError::CapacityExceeded {
                location: loc("RAK-02"),
                capacity_cases: 30,
                stored_cases: 40,
                incoming_cases: 0,
            }
        );
        run(&mut state, ctx(), |tx| tx.set_capacity(&loc("RAK-02"), Some(40))).unwrap();
        assert_eq!(state.get_location(&loc("RAK-02")).unwrap().capacity_cases, Some(40));
    }

    #[test]
    fn archived_locations_reject_inbound_stock() {
        let mut state = warehouse();
        run(&mut state, ctx(), |tx| tx.archive_location(&loc("FLR-01"))).unwrap();
        assert!(state.list_by_type(LocationType::Floor).is_empty());

        let err = run(&mut state, ctx(), |tx| {
            tx.record(MovementInput::Receive {
                stock: stock("A", "L1"),
                location: loc("FLR-01"),
                quantity_cases: 1,
                expiry_date: None,
                is_perishable: false,
            })
        })
        .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[test]
    fn mismatched_line_is_quarantined_then_reconciled() {
        let mut state = warehouse();
        let line = stock("A", "L1").at(loc("RAK-02"));
        run(&mut state, ctx(), |tx| {
            tx.stage_movement(MovementDraft::new(MovementType::Receive, 12).to(line.clone()))
        })
        .unwrap();

        let mut snapshot = state.snapshot();
        if let Some(row) = snapshot.lines.iter_mut().find(|l| l.key == line) {
            row.quantity_cases = 15;
        }
        let mut state = WarehouseState::from_snapshot(snapshot);

        let check = run(&mut state, ctx(), |tx| tx.verify_line(&line)).unwrap();
        assert!(!check.is_consistent());
        assert!(state.is_quarantined(&line));

        let blocked = run(&mut state, ctx(), |tx| {
            tx.stage_movement(MovementDraft::new(MovementType::Receive, 1).to(line.clone()))
        });
        assert!(matches!(blocked, Err(LedgerError::LedgerInconsistent { .. })));

        run(&mut state, ctx(), |tx| tx.reconcile_line(&line)).unwrap();
        assert!(!state.is_quarantined(&line));
        assert_eq!(state.line(&line).map(|l| l.quantity_cases), Some(12));
        assert_eq!(state.location_load(&loc("RAK-02")), 12);
    }
}
