use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use cellarledger_events::{EventEnvelope, Projection};
use cellarledger_warehouse::{
    Change, Holding, LotAttributes, Movement, MovementType, OwnerId, ProductRef, StockLine, StockLineKey,
};

/// Reporting row: one product for one owner, across all locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductStock {
    pub product: ProductRef,
    pub owner: OwnerId,
    pub quantity_cases: u64,
    pub reserved_cases: u64,
    /// Cases held on pallets (part of `quantity_cases`).
    pub palletised_cases: u64,
    pub lines: usize,
}

impl ProductStock {
    pub fn available_cases(&self) -> u64 {
        self.quantity_cases - self.reserved_cases
    }
}

/// Stock summary read model.
///
/// Consumes committed changes and keeps its own copy of every stock line, so
/// a reconciliation (which sets a line outright) lands correctly. Disposable:
/// rebuild it with `ProjectionRunner::rebuild_from_scratch` over the journal.
#[derive(Debug, Default)]
pub struct StockSummaryProjection {
    lines: BTreeMap<StockLineKey, StockLine>,
    movements_by_type: BTreeMap<MovementType, u64>,
    skipped: u64,
}

impl StockSummaryProjection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, product: &ProductRef, owner: &OwnerId) -> Option<ProductStock> {
        self.list()
            .into_iter()
            .find(|row| &row.product == product && &row.owner == owner)
    }

    /// All non-empty product/owner rows, in product then owner order.
    pub fn list(&self) -> Vec<ProductStock> {
        let mut rows: BTreeMap<(ProductRef, OwnerId), ProductStock> = BTreeMap::new();
        for line in self.lines.values() {
            let row = rows
                .entry((line.key.product.clone(), line.key.owner.clone()))
                .or_insert_with(|| ProductStock {
                    product: line.key.product.clone(),
                    owner: line.key.owner.clone(),
                    quantity_cases: 0,
                    reserved_cases: 0,
                    palletised_cases: 0,
                    lines: 0,
                });
            row.quantity_cases += u64::from(line.quantity_cases);
            row.reserved_cases += u64::from(line.reserved_cases);
            if matches!(line.key.holding, Holding::Pallet(_)) {
                row.palletised_cases += u64::from(line.quantity_cases);
            }
            row.lines += 1;
        }
        rows.into_values().collect()
    }

    pub fn total_cases(&self, product: &ProductRef) -> u64 {
        self.lines
            .values()
            .filter(|l| &l.key.product == product)
            .map(|l| u64::from(l.quantity_cases))
            .sum()
    }

    pub fn movement_count(&self, movement_type: MovementType) -> u64 {
        self.movements_by_type.get(&movement_type).copied().unwrap_or(0)
    }

    /// Movements whose effect could not be applied to the read model.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    fn apply_movement(&mut self, movement: &Movement) {
        *self.movements_by_type.entry(movement.movement_type).or_insert(0) += 1;
        if movement.movement_type.is_status_marker() {
            return;
        }

        if let Some(key) = &movement.from_line {
            let line = self
                .lines
                .entry(key.clone())
                .or_insert_with(|| StockLine::empty(key.clone(), LotAttributes::default()));
            if let Err(e) = movement.apply_from(line) {
                self.skipped += 1;
                tracing::warn!(movement = %movement.movement_number, error = %e, "stock summary skipped outbound effect");
            }
            self.prune(key);
        }
        if let Some(key) = &movement.to_line {
            let line = self
                .lines
                .entry(key.clone())
                .or_insert_with(|| StockLine::empty(key.clone(), movement.attributes.clone()));
            if let Err(e) = movement.apply_to(line) {
                self.skipped += 1;
                tracing::warn!(movement = %movement.movement_number, error = %e, "stock summary skipped inbound effect");
            }
            self.prune(key);
        }
    }

    fn prune(&mut self, key: &StockLineKey) {
        if self.lines.get(key).is_some_and(StockLine::is_empty) {
            self.lines.remove(key);
        }
    }
}

impl Projection for StockSummaryProjection {
    type Ev = Change;

    fn apply(&mut self, envelope: &EventEnvelope<Change>) {
        match envelope.payload() {
            Change::MovementRecorded { movement } => self.apply_movement(movement),
            Change::LineReconciled {
                line,
                quantity_cases,
                reserved_cases,
                ..
            } => {
                let row = self
                    .lines
                    .entry(line.clone())
                    .or_insert_with(|| StockLine::empty(line.clone(), LotAttributes::default()));
                row.quantity_cases = *quantity_cases;
                row.reserved_cases = *reserved_cases;
                self.prune(line);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use cellarledger_core::UserId;
    use cellarledger_events::ProjectionRunner;
    use cellarledger_warehouse::{LocationCode, LotNumber, MovementNumber, StockRef};

    use super::*;

    fn key(location: &str) -> StockLineKey {
        StockRef::new(
            ProductRef::new("101234520151200750").unwrap(),
            OwnerId::new("A").unwrap(),
            LotNumber::new("L1").unwrap(),
        )
        .at(LocationCode::new(location).unwrap())
    }

    fn movement(number: u64, movement_type: MovementType, from: Option<&str>, to: Option<&str>, cases: u32) -> Change {
        Change::MovementRecorded {
            movement: Movement {
                movement_number: MovementNumber(number),
                movement_type,
                from_line: from.map(key),
                to_line: to.map(key),
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

    fn envelopes(changes: Vec<Change>) -> Vec<EventEnvelope<Change>> {
        changes
            .into_iter()
            .enumerate()
            .map(|(i, c)| EventEnvelope::new(Uuid::now_v7(), "warehouse", i as u64 + 1, Utc::now(), c))
            .collect()
    }

    #[test]
    fn movements_roll_up_per_product_and_owner() {
        let envs = envelopes(vec![
            movement(1, MovementType::Receive, None, Some("DOCK"), 12),
            movement(2, MovementType::Putaway, Some("DOCK"), Some("RAK-01"), 10),
            movement(3, MovementType::Reserve, Some("RAK-01"), None, 4),
            movement(4, MovementType::Pick, Some("RAK-01"), None, 1),
        ]);
        let (summary, cursor) = ProjectionRunner::rebuild_from_scratch(StockSummaryProjection::new, &envs).unwrap();

        let row = summary
            .get(&ProductRef::new("101234520151200750").unwrap(), &OwnerId::new("A").unwrap())
            .unwrap();
        assert_eq!((row.quantity_cases, row.reserved_cases, row.lines), (11, 3, 2));
        assert_eq!(row.available_cases(), 8);
        assert_eq!(summary.movement_count(MovementType::Putaway), 1);
        assert_eq!(cursor.unwrap().last_sequence_number(), 4);
    }

    #[test]
    fn reconciliation_overrides_the_line() {
        let mut envs = envelopes(vec![movement(1, MovementType::Receive, None, Some("DOCK"), 12)]);
        envs.push(EventEnvelope::new(
            Uuid::now_v7(),
            "warehouse",
            2,
            Utc::now(),
            Change::LineReconciled {
                line: key("DOCK"),
                quantity_cases: 0,
                reserved_cases: 0,
                occurred_at: Utc::now(),
            },
        ));
        let (summary, _) = ProjectionRunner::rebuild_from_scratch(StockSummaryProjection::new, &envs).unwrap();
        assert!(summary.list().is_empty());
    }

    #[test]
    fn impossible_effects_are_counted_not_applied() {
        let envs = envelopes(vec![movement(1, MovementType::Transfer, Some("DOCK"), None, 3)]);
        let (summary, _) = ProjectionRunner::rebuild_from_scratch(StockSummaryProjection::new, &envs).unwrap();
        assert_eq!(summary.skipped(), 1);
        assert_eq!(summary.total_cases(&ProductRef::new("101234520151200750").unwrap()), 0);
    }
}
