//! Reservation & allocation engine (pure part).
//!
//! Ranking and drawing are deterministic functions over candidate lines; the
//! transaction layer turns the drawn lines into `reserve` movements so that a
//! reservation is always backed by the movement log.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult, Shortfall};
use crate::ids::{AllocationId, OrderId, OwnerId, PickListId, ProductRef};
use crate::stock::{StockLine, StockLineKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocationPolicy {
    /// Earliest expiry first.
    Fefo,
    /// Earliest receipt first.
    Fifo,
    /// FEFO when any candidate is perishable, FIFO otherwise. In a mixed set
    /// the non-perishable lines rank after every perishable one, FIFO among
    /// themselves.
    Auto,
}

/// Who holds a reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum AllocationHolder {
    Order(OrderId),
    PickList(PickListId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRequest {
    pub product: ProductRef,
    pub owner: Option<OwnerId>,
    pub quantity_cases: u32,
    pub policy: AllocationPolicy,
    pub holder: AllocationHolder,
}

/// Per-line bookkeeping of an allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationLine {
    pub line: StockLineKey,
    pub reserved_cases: u32,
    pub picked_cases: u32,
    pub released_cases: u32,
}

impl AllocationLine {
    pub fn outstanding_cases(&self) -> u32 {
        self.reserved_cases - self.picked_cases - self.released_cases
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub id: AllocationId,
    pub holder: AllocationHolder,
    pub product: ProductRef,
    pub owner: Option<OwnerId>,
    pub requested_cases: u32,
    pub policy: AllocationPolicy,
    /// Lines in draw order.
    pub lines: Vec<AllocationLine>,
    pub created_at: DateTime<Utc>,
}

impl Allocation {
    pub fn outstanding_cases(&self) -> u32 {
        self.lines.iter().map(AllocationLine::outstanding_cases).sum()
    }

    pub fn reserved_cases(&self) -> u32 {
        self.lines.iter().map(|l| l.reserved_cases).sum()
    }

    pub fn picked_cases(&self) -> u32 {
        self.lines.iter().map(|l| l.picked_cases).sum()
    }

    pub fn is_open(&self) -> bool {
        self.outstanding_cases() > 0
    }

    fn line_mut(&mut self, key: &StockLineKey) -> &mut AllocationLine {
        if let Some(idx) = self.lines.iter().position(|l| &l.line == key) {
            return &mut self.lines[idx];
        }
        self.lines.push(AllocationLine {
            line: key.clone(),
            reserved_cases: 0,
            picked_cases: 0,
            released_cases: 0,
        });
        let last = self.lines.len() - 1;
        &mut self.lines[last]
    }

    pub(crate) fn record_reserve(&mut self, key: &StockLineKey, cases: u32) {
        self.line_mut(key).reserved_cases += cases;
    }

    pub(crate) fn record_release(&mut self, key: &StockLineKey, cases: u32) {
        self.line_mut(key).released_cases += cases;
    }

    pub(crate) fn record_pick(&mut self, key: &StockLineKey, cases: u32) {
        self.line_mut(key).picked_cases += cases;
    }

    /// Lines to release, last-drawn first. `None` releases everything outstanding.
    pub fn plan_release(&self, cases: Option<u32>) -> LedgerResult<Vec<AllocatedLine>> {
        let outstanding = self.outstanding_cases();
        let mut remaining = cases.unwrap_or(outstanding);
        if remaining > outstanding {
            return Err(LedgerError::validation(format!(
                "allocation {} has {outstanding} outstanding case(s), cannot release {remaining}",
                self.id
            )));
        }
        let mut planned = Vec::new();
        for line in self.lines.iter().rev() {
            if remaining == 0 {
                break;
            }
            let take = line.outstanding_cases().min(remaining);
            if take > 0 {
                planned.push(AllocatedLine {
                    line: line.line.clone(),
                    quantity_cases: take,
                });
                remaining -= take;
            }
        }
        Ok(planned)
    }

    /// Lines to pick from, in draw order.
    pub fn plan_consume(&self, cases: u32) -> LedgerResult<Vec<AllocatedLine>> {
        let outstanding = self.outstanding_cases();
        if cases > outstanding {
            let line = self
                .lines
                .first()
                .map(|l| l.line.clone())
                .ok_or_else(|| LedgerError::validation(format!("allocation {} is empty", self.id)))?;
            return Err(LedgerError::InsufficientReservation {
                line,
                requested_cases: cases,
                reserved_cases: outstanding,
            });
        }
        let mut remaining = cases;
        let mut planned = Vec::new();
        for line in &self.lines {
            if remaining == 0 {
                break;
            }
            let take = line.outstanding_cases().min(remaining);
            if take > 0 {
                planned.push(AllocatedLine {
                    line: line.line.clone(),
                    quantity_cases: take,
                });
                remaining -= take;
            }
        }
        Ok(planned)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatedLine {
    pub line: StockLineKey,
    pub quantity_cases: u32,
}

/// Result of an allocation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum AllocationOutcome {
    Allocated {
        allocation_id: AllocationId,
        lines: Vec<AllocatedLine>,
    },
    Partial {
        allocation_id: AllocationId,
        lines: Vec<AllocatedLine>,
        shortfall: Shortfall,
    },
    /// Nothing reserved, no allocation opened.
    Unavailable { shortfall: Shortfall },
}

impl AllocationOutcome {
    pub fn allocation_id(&self) -> Option<AllocationId> {
        match self {
            AllocationOutcome::Allocated { allocation_id, .. }
            | AllocationOutcome::Partial { allocation_id, .. } => Some(*allocation_id),
            AllocationOutcome::Unavailable { .. } => None,
        }
    }

    pub fn lines(&self) -> &[AllocatedLine] {
        match self {
            AllocationOutcome::Allocated { lines, .. } | AllocationOutcome::Partial { lines, .. } => lines,
            AllocationOutcome::Unavailable { .. } => &[],
        }
    }

    pub fn allocated_cases(&self) -> u32 {
        self.lines().iter().map(|l| l.quantity_cases).sum()
    }

    pub fn shortfall(&self) -> Option<&Shortfall> {
        match self {
            AllocationOutcome::Allocated { .. } => None,
            AllocationOutcome::Partial { shortfall, .. } | AllocationOutcome::Unavailable { shortfall } => {
                Some(shortfall)
            }
        }
    }
}

/// Resolve `Auto` against the candidate set.
pub fn effective_policy(policy: AllocationPolicy, candidates: &[StockLine]) -> AllocationPolicy {
    match policy {
        AllocationPolicy::Auto if candidates.iter().any(|l| l.attributes.is_perishable) => {
            AllocationPolicy::Fefo
        }
        AllocationPolicy::Auto => AllocationPolicy::Fifo,
        explicit => explicit,
    }
}

/// Undated sorts after every dated value.
fn earliest_first<T: Ord>(a: &Option<T>, b: &Option<T>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Order candidates for drawing.
///
/// Primary key per policy, then lower available first (drain near-empty
/// lines), then line key for determinism.
pub fn rank_candidates(mut candidates: Vec<StockLine>, policy: AllocationPolicy) -> Vec<StockLine> {
    let resolved = effective_policy(policy, &candidates);
    // Under `Auto` only perishable stock is ranked by its expiry date.
    let expiry = |line: &StockLine| match policy {
        AllocationPolicy::Auto if !line.attributes.is_perishable => None,
        _ => line.attributes.expiry_date,
    };
    candidates.sort_by(|a, b| {
        let primary = match resolved {
            AllocationPolicy::Fefo => earliest_first(&expiry(a), &expiry(b))
                .then_with(|| earliest_first(&a.attributes.received_at, &b.attributes.received_at)),
            _ => earliest_first(&a.attributes.received_at, &b.attributes.received_at),
        };
        primary
            .then_with(|| a.available_cases().cmp(&b.available_cases()))
            .then_with(|| a.key.cmp(&b.key))
    });
    candidates
}

/// Greedily draw up to `quantity_cases` from ranked lines.
pub fn draw(ranked: &[StockLine], quantity_cases: u32) -> Vec<AllocatedLine> {
    let mut remaining = quantity_cases;
    let mut drawn = Vec::new();
    for line in ranked {
        if remaining == 0 {
            break;
        }
        let take = line.available_cases().min(remaining);
        if take == 0 {
            continue;
        }
        drawn.push(AllocatedLine {
            line: line.key.clone(),
            quantity_cases: take,
        });
        remaining -= take;
    }
    drawn
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use proptest::prelude::*;

    use super::*;
    use crate::ids::{LocationCode, LotNumber};
    use crate::stock::{LotAttributes, StockRef};

    fn line(lot: &str, qty: u32, expiry: Option<(i32, u32, u32)>, received: Option<i64>, perishable: bool) -> StockLine {
        let key = StockRef::new(
            ProductRef::new("101234520151200750").unwrap(),
            OwnerId::new("OWNERA").unwrap(),
            LotNumber::new(lot).unwrap(),
        )
        .at(LocationCode::new("RAK-01").unwrap());
        let mut l = StockLine::empty(
            key,
            LotAttributes {
                expiry_date: expiry.and_then(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d)),
                is_perishable: perishable,
                received_at: received.and_then(|s| DateTime::<Utc>::from_timestamp(s, 0)),
            },
        );
        l.quantity_cases = qty;
        l
    }

    fn lots(drawn: &[AllocatedLine]) -> Vec<(String, u32)> {
        drawn
            .iter()
            .map(|d| (d.line.lot.as_str().to_string(), d.quantity_cases))
            .collect()
    }

    #[test]
    fn fefo_draws_earliest_expiry_first() {
        let candidates = vec![
            line("L2", 10, Some((2026, 1, 1)), Some(100), true),
            line("L1", 10, Some((2025, 1, 1)), Some(200), true),
        ];
        let ranked = rank_candidates(candidates, AllocationPolicy::Fefo);
        assert_eq!(
            lots(&draw(&ranked, 15)),
            vec![("L1".to_string(), 10), ("L2".to_string(), 5)]
        );
    }

    #[test]
    fn auto_uses_fifo_for_non_perishable_stock() {
        let candidates = vec![
            line("NEW", 10, Some((2025, 1, 1)), Some(500), false),
            line("OLD", 10, Some((2030, 1, 1)), Some(100), false),
        ];
        let ranked = rank_candidates(candidates, AllocationPolicy::Auto);
        assert_eq!(ranked[0].key.lot.as_str(), "OLD");
    }

    #[test]
    fn auto_ranks_non_perishable_lines_fifo_after_perishable_ones() {
        let candidates = vec![
            line("DRY-NEW", 5, Some((2025, 1, 1)), Some(300), false),
            line("WET-LATE", 5, Some((2028, 1, 1)), Some(400), true),
            line("DRY-OLD", 5, None, Some(100), false),
            line("WET-SOON", 5, Some((2026, 1, 1)), Some(500), true),
        ];
        let ranked = rank_candidates(candidates, AllocationPolicy::Auto);
        let order: Vec<_> = ranked.iter().map(|l| l.key.lot.as_str()).collect();
        assert_eq!(order, vec!["WET-SOON", "WET-LATE", "DRY-OLD", "DRY-NEW"]);
    }

    #[test]
    fn ties_drain_the_smaller_line_first() {
        let candidates = vec![
            line("BIG", 12, Some((2025, 6, 1)), Some(100), true),
            line("SMALL", 2, Some((2025, 6, 1)), Some(100), true),
        ];
        let ranked = rank_candidates(candidates, AllocationPolicy::Fefo);
        assert_eq!(lots(&draw(&ranked, 5)), vec![("SMALL".into(), 2), ("BIG".into(), 3)]);
    }

    #[test]
    fn undated_lines_rank_last() {
        let candidates = vec![
            line("UNDATED", 5, None, None, true),
            line("DATED", 5, Some((2027, 1, 1)), None, true),
        ];
        let ranked = rank_candidates(candidates, AllocationPolicy::Fefo);
        assert_eq!(ranked[0].key.lot.as_str(), "DATED");
    }

    #[test]
    fn release_plan_unwinds_from_the_last_drawn_line() {
        let first = line("L1", 10, None, None, false).key;
        let second = line("L2", 10, None, None, false).key;
        let mut allocation = Allocation {
            id: AllocationId::new(),
            holder: AllocationHolder::Order(OrderId::new("SO-1").unwrap()),
            product: first.product.clone(),
            owner: None,
            requested_cases: 15,
            policy: AllocationPolicy::Fifo,
            lines: vec![],
            created_at: Utc::now(),
        };
        allocation.record_reserve(&first, 10);
        allocation.record_reserve(&second, 5);

        let planned = allocation.plan_release(Some(7)).unwrap();
        assert_eq!(lots(&planned), vec![("L2".into(), 5), ("L1".into(), 2)]);
        assert!(allocation.plan_release(Some(16)).is_err());

        let consume = allocation.plan_consume(12).unwrap();
        assert_eq!(lots(&consume), vec![("L1".into(), 10), ("L2".into(), 2)]);
        assert!(matches!(
            allocation.plan_consume(16),
            Err(LedgerError::InsufficientReservation { reserved_cases: 15, .. })
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: drawing never takes more than requested nor more than a line has.
        #[test]
        fn draw_is_bounded_by_request_and_stock(
            quantities in prop::collection::vec(0u32..50, 0..8),
            request in 0u32..300,
        ) {
            let candidates: Vec<_> = quantities
                .iter()
                .enumerate()
                .map(|(i, q)| line(&format!("L{i}"), *q, None, Some(i as i64), false))
                .collect();
            let total: u32 = quantities.iter().sum();
            let ranked = rank_candidates(candidates.clone(), AllocationPolicy::Auto);
            let drawn = draw(&ranked, request);

            let drawn_total: u32 = drawn.iter().map(|d| d.quantity_cases).sum();
            prop_assert_eq!(drawn_total, request.min(total));
            for d in &drawn {
                let source = candidates.iter().find(|c| c.key == d.line).unwrap();
                prop_assert!(d.quantity_cases <= source.available_cases());
                prop_assert!(d.quantity_cases > 0);
            }
        }
    }
}
