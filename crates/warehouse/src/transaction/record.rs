//! Externally originated movements (receiving, putaway, transfers,
//! adjustments, cycle counts, ownership transfers and repacks).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};
use crate::ids::{LocationCode, OwnerId};
use crate::movement::MovementType;
use crate::stock::{LotAttributes, StockLine, StockLineKey, StockRef};

use super::{MovementDraft, Transaction};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MovementInput {
    Receive {
        stock: StockRef,
        location: LocationCode,
        quantity_cases: u32,
        #[serde(default)]
        expiry_date: Option<NaiveDate>,
        #[serde(default)]
        is_perishable: bool,
    },
    Putaway {
        line: StockLineKey,
        to: LocationCode,
        quantity_cases: u32,
    },
    Transfer {
        line: StockLineKey,
        to: LocationCode,
        quantity_cases: u32,
    },
    /// Signed correction; needs notes on the command context.
    Adjust { line: StockLineKey, delta_cases: i64 },
    Count { line: StockLineKey, counted_cases: u32 },
    OwnershipTransfer {
        line: StockLineKey,
        new_owner: OwnerId,
        quantity_cases: u32,
    },
    /// Break `quantity_out` cases of one pack into `quantity_in` cases of
    /// another product/lot at the same location.
    Repack {
        line: StockLineKey,
        quantity_out: u32,
        into: StockRef,
        quantity_in: u32,
    },
}

impl Transaction<'_> {
    /// Validate and stage an externally originated movement.
    pub fn record(&mut self, input: MovementInput) -> LedgerResult<()> {
        match input {
            MovementInput::Receive {
                stock,
                location,
                quantity_cases,
                expiry_date,
                is_perishable,
            } => {
                let attributes = LotAttributes {
                    expiry_date,
                    is_perishable,
                    received_at: Some(self.now()),
                };
                self.stage_movement(
                    MovementDraft::new(MovementType::Receive, quantity_cases)
                        .to(stock.at(location))
                        .attributes(attributes),
                )
            }
            MovementInput::Putaway {
                line,
                to,
                quantity_cases,
            } => self.relocate(MovementType::Putaway, line, to, quantity_cases),
            MovementInput::Transfer {
                line,
                to,
                quantity_cases,
            } => self.relocate(MovementType::Transfer, line, to, quantity_cases),
            MovementInput::Adjust { line, delta_cases } => self.adjust(line, delta_cases),
            MovementInput::Count {
                line,
                counted_cases,
            } => self.count(line, counted_cases),
            MovementInput::OwnershipTransfer {
                line,
                new_owner,
                quantity_cases,
            } => {
                let source = self.loose_line(&line)?;
                if new_owner == line.owner {
                    return Err(LedgerError::validation(format!(
                        "{line} already belongs to {new_owner}"
                    )));
                }
                let target = line.with_owner(new_owner);
                self.stage_movement(
                    MovementDraft::new(MovementType::OwnershipTransfer, quantity_cases)
                        .from(line)
                        .to(target)
                        .attributes(source.attributes),
                )
            }
            MovementInput::Repack {
                line,
                quantity_out,
                into,
                quantity_in,
            } => {
                let source = self.loose_line(&line)?;
                if quantity_out == 0 || quantity_in == 0 {
                    return Err(LedgerError::validation("repack needs cases on both sides"));
                }
                let target = into.at(line.location.clone());
                if target == line {
                    return Err(LedgerError::validation(format!("{line} cannot be repacked into itself")));
                }
                self.stage_movement(MovementDraft::new(MovementType::RepackOut, quantity_out).from(line))?;
                self.stage_movement(
                    MovementDraft::new(MovementType::RepackIn, quantity_in)
                        .to(target)
                        .attributes(source.attributes),
                )
            }
        }
    }

    /// Loose line that exists; pallet lines only move through pallet operations.
    fn loose_line(&mut self, key: &StockLineKey) -> LedgerResult<StockLine> {
        if !key.is_loose() {
            return Err(LedgerError::validation(format!(
                "{key} is on a pallet; use the pallet operations"
            )));
        }
        self.existing_line(key)
    }

    fn relocate(
        &mut self,
        movement_type: MovementType,
        line: StockLineKey,
        to: LocationCode,
        quantity_cases: u32,
    ) -> LedgerResult<()> {
        let source = self.loose_line(&line)?;
        if line.location == to {
            return Err(LedgerError::validation(format!("{line} is already at {to}")));
        }
        let target = line.with_location(to);
        self.stage_movement(
            MovementDraft::new(movement_type, quantity_cases)
                .from(line)
                .to(target)
                .attributes(source.attributes),
        )
    }

    fn adjust(&mut self, line: StockLineKey, delta_cases: i64) -> LedgerResult<()> {
        if !self.context().has_notes() {
            return Err(LedgerError::validation("adjustments need notes explaining the reason"));
        }
        if !line.is_loose() {
            return Err(LedgerError::validation(format!(
                "{line} is on a pallet; remove the cases before adjusting"
            )));
        }
        let cases = u32::try_from(delta_cases.unsigned_abs())
            .map_err(|_| LedgerError::validation(format!("adjustment of {delta_cases} cases is out of range")))?;
        if delta_cases < 0 {
            self.stage_movement(MovementDraft::new(MovementType::Adjust, cases).from(line))
        } else {
            let attributes = self.line(&line).map(|l| l.attributes.clone()).unwrap_or_default();
            self.stage_movement(
                MovementDraft::new(MovementType::Adjust, cases)
                    .to(line)
                    .attributes(attributes),
            )
        }
    }

    /// Set a line to a physically counted quantity; the variance is recorded.
    fn count(&mut self, line: StockLineKey, counted_cases: u32) -> LedgerResult<()> {
        if !line.is_loose() {
            return Err(LedgerError::validation(format!(
                "{line} is on a pallet; count the pallet's lines after unloading"
            )));
        }
        let (book, reserved, attributes) = match self.line(&line) {
            Some(row) => (row.quantity_cases, row.reserved_cases, row.attributes.clone()),
            None => (0, 0, LotAttributes::default()),
        };
        if counted_cases < reserved {
            return Err(LedgerError::validation(format!(
                "count of {counted_cases} on {line} is below its {reserved} reserved case(s); release first"
            )));
        }

        let draft = if counted_cases < book {
            MovementDraft::new(MovementType::Count, book - counted_cases).from(line)
        } else if counted_cases > book {
            MovementDraft::new(MovementType::Count, counted_cases - book)
                .to(line)
                .attributes(attributes)
        } else {
            // Confirmation: zero variance, recorded against the line.
            MovementDraft::new(MovementType::Count, 0).from(line)
        };
        self.stage_movement(draft.counted(counted_cases))
    }
}
