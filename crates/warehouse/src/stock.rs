//! Stock lines: the quantity-bearing rows of the ledger.
//!
//! A line is keyed by product, owner, location, lot and holding (loose or on a
//! pallet). Lines change only when a movement is applied; the guard methods
//! here are the last line of defence for the `0 <= reserved <= quantity`
//! invariant and produce the caller-facing error when it would break.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult, Shortfall};
use crate::ids::{LocationCode, LotNumber, OwnerId, PalletCode, ProductRef};

/// Whether cases sit loose on a location or consolidated on a pallet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "pallet")]
pub enum Holding {
    Loose,
    Pallet(PalletCode),
}

/// Product + owner + lot: what a case is, independent of where it sits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StockRef {
    pub product: ProductRef,
    pub owner: OwnerId,
    pub lot: LotNumber,
}

impl StockRef {
    pub fn new(product: ProductRef, owner: OwnerId, lot: LotNumber) -> Self {
        Self { product, owner, lot }
    }

    pub fn at(&self, location: LocationCode) -> StockLineKey {
        StockLineKey {
            product: self.product.clone(),
            owner: self.owner.clone(),
            location,
            lot: self.lot.clone(),
            holding: Holding::Loose,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StockLineKey {
    pub product: ProductRef,
    pub owner: OwnerId,
    pub location: LocationCode,
    pub lot: LotNumber,
    pub holding: Holding,
}

impl StockLineKey {
    pub fn stock_ref(&self) -> StockRef {
        StockRef::new(self.product.clone(), self.owner.clone(), self.lot.clone())
    }

    pub fn is_loose(&self) -> bool {
        self.holding == Holding::Loose
    }

    pub fn with_location(&self, location: LocationCode) -> Self {
        Self {
            location,
            ..self.clone()
        }
    }

    pub fn with_owner(&self, owner: OwnerId) -> Self {
        Self {
            owner,
            ..self.clone()
        }
    }

    pub fn with_holding(&self, holding: Holding) -> Self {
        Self {
            holding,
            ..self.clone()
        }
    }
}

impl core::fmt::Display for StockLineKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.product, self.owner, self.location, self.lot
        )?;
        if let Holding::Pallet(code) = &self.holding {
            write!(f, "@{code}")?;
        }
        Ok(())
    }
}

/// Lot-level attributes that travel with the cases from line to line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotAttributes {
    pub expiry_date: Option<NaiveDate>,
    pub is_perishable: bool,
    /// Earliest `receive` timestamp of the stock in the line (FIFO key).
    pub received_at: Option<DateTime<Utc>>,
}

impl LotAttributes {
    /// Combine attributes when cases flow into a line that already holds some.
    pub fn merge(&mut self, incoming: &LotAttributes) {
        self.expiry_date = match (self.expiry_date, incoming.expiry_date) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.is_perishable |= incoming.is_perishable;
        self.received_at = match (self.received_at, incoming.received_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLine {
    pub key: StockLineKey,
    pub quantity_cases: u32,
    pub reserved_cases: u32,
    pub attributes: LotAttributes,
}

impl StockLine {
    pub fn empty(key: StockLineKey, attributes: LotAttributes) -> Self {
        Self {
            key,
            quantity_cases: 0,
            reserved_cases: 0,
            attributes,
        }
    }

    pub fn available_cases(&self) -> u32 {
        self.quantity_cases - self.reserved_cases
    }

    /// A 0/0 line is logically deleted.
    pub fn is_empty(&self) -> bool {
        self.quantity_cases == 0 && self.reserved_cases == 0
    }

    pub fn shortfall(&self, requested_cases: u32) -> Shortfall {
        Shortfall {
            product: self.key.product.clone(),
            owner: Some(self.key.owner.clone()),
            lot: Some(self.key.lot.clone()),
            location: Some(self.key.location.clone()),
            requested_cases,
            available_cases: self.available_cases(),
        }
    }

    pub fn add(&mut self, cases: u32, attributes: &LotAttributes) -> LedgerResult<()> {
        self.quantity_cases = self
            .quantity_cases
            .checked_add(cases)
            .ok_or_else(|| LedgerError::validation(format!("quantity overflow on {}", self.key)))?;
        self.attributes.merge(attributes);
        Ok(())
    }

    /// Remove unreserved cases.
    pub fn take_available(&mut self, cases: u32) -> LedgerResult<()> {
        if cases > self.available_cases() {
            return Err(LedgerError::InsufficientStock(self.shortfall(cases)));
        }
        self.quantity_cases -= cases;
        Ok(())
    }

    pub fn reserve(&mut self, cases: u32) -> LedgerResult<()> {
        if cases > self.available_cases() {
            return Err(LedgerError::InsufficientStock(self.shortfall(cases)));
        }
        self.reserved_cases += cases;
        Ok(())
    }

    pub fn release(&mut self, cases: u32) -> LedgerResult<()> {
        self.ensure_reserved(cases)?;
        self.reserved_cases -= cases;
        Ok(())
    }

    /// Remove reserved cases (a pick): both counters drop together.
    pub fn consume_reserved(&mut self, cases: u32) -> LedgerResult<()> {
        self.ensure_reserved(cases)?;
        self.reserved_cases -= cases;
        self.quantity_cases -= cases;
        Ok(())
    }

    fn ensure_reserved(&self, cases: u32) -> LedgerResult<()> {
        if cases > self.reserved_cases {
            return Err(LedgerError::InsufficientReservation {
                line: self.key.clone(),
                requested_cases: cases,
                reserved_cases: self.reserved_cases,
            });
        }
        Ok(())
    }
}

/// Read-side row returned by `get_available`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableStock {
    pub line: StockLineKey,
    pub available_cases: u32,
    pub expiry_date: Option<NaiveDate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> StockLineKey {
        StockRef::new(
            ProductRef::new("101234520151200750").unwrap(),
            OwnerId::new("OWNERA").unwrap(),
            LotNumber::new("L1").unwrap(),
        )
        .at(LocationCode::new("RAK-01").unwrap())
    }

    #[test]
    fn reservations_never_exceed_quantity() {
        let mut line = StockLine::empty(key(), LotAttributes::default());
        line.add(10, &LotAttributes::default()).unwrap();
        line.reserve(8).unwrap();
        assert_eq!(line.available_cases(), 2);

        let err = line.reserve(3).unwrap_err();
        match err {
            LedgerError::InsufficientStock(s) => {
                assert_eq!(s.available_cases, 2);
                assert_eq!(s.missing_cases(), 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(line.take_available(3).is_err());
        assert_eq!(line.reserved_cases, 8);
    }

    #[test]
    fn consuming_a_reservation_removes_cases() {
        let mut line = StockLine::empty(key(), LotAttributes::default());
        line.add(5, &LotAttributes::default()).unwrap();
        line.reserve(5).unwrap();
        line.consume_reserved(5).unwrap();
        assert!(line.is_empty());
        assert!(matches!(
            line.consume_reserved(1),
            Err(LedgerError::InsufficientReservation { requested_cases: 1, reserved_cases: 0, .. })
        ));
    }

    #[test]
    fn merged_attributes_keep_the_earliest_dates() {
        let early = DateTime::<Utc>::from_timestamp(1_000, 0).unwrap();
        let late = DateTime::<Utc>::from_timestamp(2_000, 0).unwrap();
        let mut attrs = LotAttributes {
            expiry_date: NaiveDate::from_ymd_opt(2026, 1, 1),
            is_perishable: false,
            received_at: Some(late),
        };
        attrs.merge(&LotAttributes {
            expiry_date: NaiveDate::from_ymd_opt(2025, 1, 1),
            is_perishable: true,
            received_at: Some(early),
        });
        assert_eq!(attrs.expiry_date, NaiveDate::from_ymd_opt(2025, 1, 1));
        assert!(attrs.is_perishable);
        assert_eq!(attrs.received_at, Some(early));
    }

    #[test]
    fn pallet_lines_render_their_holding() {
        let on_pallet = key().with_holding(Holding::Pallet(PalletCode::new("P1").unwrap()));
        assert!(on_pallet.to_string().ends_with("@P1"));
        assert!(!on_pallet.is_loose());
    }
}
