//! Pallet consolidation (event-sourced aggregate).
//!
//! The pallet tracks which `(product, owner, lot)` cases it carries; the cases
//! themselves live on pallet-holding stock lines that the transaction layer
//! moves in the same commit as the pallet events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cellarledger_core::{Aggregate, AggregateRoot};
use cellarledger_events::Event;

use crate::error::{LedgerError, LedgerResult};
use crate::ids::{DispatchBatchId, LocationCode, OwnerId, PalletCode};
use crate::stock::{Holding, StockLineKey, StockRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PalletStatus {
    Active,
    Sealed,
    Retrieved,
    Archived,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "owner")]
pub enum PalletOwnership {
    Single(OwnerId),
    /// Explicitly mixed: cases of several owners may share the pallet.
    Mixed,
}

impl PalletOwnership {
    pub fn accepts(&self, owner: &OwnerId) -> bool {
        match self {
            PalletOwnership::Single(o) => o == owner,
            PalletOwnership::Mixed => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PalletMember {
    pub stock: StockRef,
    pub cases: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pallet {
    code: PalletCode,
    ownership: PalletOwnership,
    location: Option<LocationCode>,
    status: PalletStatus,
    /// Sorted by stock ref.
    members: Vec<PalletMember>,
    batch: Option<DispatchBatchId>,
    created_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Pallet {
    /// Not-yet-created instance for rehydration.
    pub fn empty(code: PalletCode) -> Self {
        Self {
            code,
            ownership: PalletOwnership::Mixed,
            location: None,
            status: PalletStatus::Active,
            members: Vec::new(),
            batch: None,
            created_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn code(&self) -> &PalletCode {
        &self.code
    }

    pub fn ownership(&self) -> &PalletOwnership {
        &self.ownership
    }

    pub fn location(&self) -> Option<&LocationCode> {
        self.location.as_ref()
    }

    pub fn status(&self) -> PalletStatus {
        self.status
    }

    pub fn members(&self) -> &[PalletMember] {
        &self.members
    }

    pub fn batch(&self) -> Option<DispatchBatchId> {
        self.batch
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn total_cases(&self) -> u32 {
        self.members.iter().map(|m| m.cases).sum()
    }

    pub fn member_cases(&self, stock: &StockRef) -> u32 {
        self.members
            .iter()
            .find(|m| &m.stock == stock)
            .map_or(0, |m| m.cases)
    }

    /// Stock line carrying `stock` on this pallet at its current location.
    pub fn member_line(&self, stock: &StockRef) -> LedgerResult<StockLineKey> {
        let location = self
            .location
            .clone()
            .ok_or_else(|| LedgerError::not_found("pallet", &self.code))?;
        Ok(stock
            .at(location)
            .with_holding(Holding::Pallet(self.code.clone())))
    }

    fn ensure_created(&self) -> LedgerResult<()> {
        if !self.created {
            return Err(LedgerError::not_found("pallet", &self.code));
        }
        Ok(())
    }

    fn ensure_open_for_changes(&self) -> LedgerResult<()> {
        match self.status {
            PalletStatus::Active => Ok(()),
            PalletStatus::Sealed => Err(LedgerError::PalletSealed {
                pallet: self.code.clone(),
            }),
            other => Err(LedgerError::invalid_transition("pallet", other, "change contents of")),
        }
    }

    fn add_member(&mut self, stock: &StockRef, cases: u32) {
        match self.members.binary_search_by(|m| m.stock.cmp(stock)) {
            Ok(idx) => self.members[idx].cases += cases,
            Err(idx) => self.members.insert(
                idx,
                PalletMember {
                    stock: stock.clone(),
                    cases,
                },
            ),
        }
    }

    fn remove_member(&mut self, stock: &StockRef, cases: u32) {
        if let Ok(idx) = self.members.binary_search_by(|m| m.stock.cmp(stock)) {
            let member = &mut self.members[idx];
            member.cases = member.cases.saturating_sub(cases);
            if member.cases == 0 {
                self.members.remove(idx);
            }
        }
    }
}

impl AggregateRoot for Pallet {
    type Id = PalletCode;

    fn id(&self) -> &Self::Id {
        &self.code
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PalletCommand {
    Create {
        ownership: PalletOwnership,
        location: LocationCode,
        occurred_at: DateTime<Utc>,
    },
    /// `from_location` is where the loose cases currently sit.
    AddCases {
        stock: StockRef,
        cases: u32,
        from_location: LocationCode,
        occurred_at: DateTime<Utc>,
    },
    RemoveCases {
        stock: StockRef,
        cases: u32,
        occurred_at: DateTime<Utc>,
    },
    Seal { occurred_at: DateTime<Utc> },
    Unseal { occurred_at: DateTime<Utc> },
    Retrieve { occurred_at: DateTime<Utc> },
    Move {
        to: LocationCode,
        occurred_at: DateTime<Utc>,
    },
    Dissolve { occurred_at: DateTime<Utc> },
    /// `batch` is set only when the pallet leaves as part of its batch; a
    /// batch member cannot be dispatched on its own.
    Dispatch {
        batch: Option<DispatchBatchId>,
        occurred_at: DateTime<Utc>,
    },
    AssignToBatch {
        batch: DispatchBatchId,
        occurred_at: DateTime<Utc>,
    },
    ReleaseFromBatch { occurred_at: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PalletEvent {
    Created {
        pallet: PalletCode,
        ownership: PalletOwnership,
        location: LocationCode,
        occurred_at: DateTime<Utc>,
    },
    CasesAdded {
        pallet: PalletCode,
        stock: StockRef,
        cases: u32,
        occurred_at: DateTime<Utc>,
    },
    CasesRemoved {
        pallet: PalletCode,
        stock: StockRef,
        cases: u32,
        occurred_at: DateTime<Utc>,
    },
    Sealed {
        pallet: PalletCode,
        occurred_at: DateTime<Utc>,
    },
    Unsealed {
        pallet: PalletCode,
        occurred_at: DateTime<Utc>,
    },
    Retrieved {
        pallet: PalletCode,
        occurred_at: DateTime<Utc>,
    },
    Moved {
        pallet: PalletCode,
        from: LocationCode,
        to: LocationCode,
        occurred_at: DateTime<Utc>,
    },
    /// Members were unloaded to loose stock; the record is kept, archived.
    Dissolved {
        pallet: PalletCode,
        occurred_at: DateTime<Utc>,
    },
    Dispatched {
        pallet: PalletCode,
        occurred_at: DateTime<Utc>,
    },
    AssignedToBatch {
        pallet: PalletCode,
        batch: DispatchBatchId,
        occurred_at: DateTime<Utc>,
    },
    ReleasedFromBatch {
        pallet: PalletCode,
        occurred_at: DateTime<Utc>,
    },
}

impl PalletEvent {
    pub fn pallet(&self) -> &PalletCode {
        match self {
            PalletEvent::Created { pallet, .. }
            | PalletEvent::CasesAdded { pallet, .. }
            | PalletEvent::CasesRemoved { pallet, .. }
            | PalletEvent::Sealed { pallet, .. }
            | PalletEvent::Unsealed { pallet, .. }
            | PalletEvent::Retrieved { pallet, .. }
            | PalletEvent::Moved { pallet, .. }
            | PalletEvent::Dissolved { pallet, .. }
            | PalletEvent::Dispatched { pallet, .. }
            | PalletEvent::AssignedToBatch { pallet, .. }
            | PalletEvent::ReleasedFromBatch { pallet, .. } => pallet,
        }
    }
}

impl Event for PalletEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PalletEvent::Created { .. } => "warehouse.pallet.created",
            PalletEvent::CasesAdded { .. } => "warehouse.pallet.cases_added",
            PalletEvent::CasesRemoved { .. } => "warehouse.pallet.cases_removed",
            PalletEvent::Sealed { .. } => "warehouse.pallet.sealed",
            PalletEvent::Unsealed { .. } => "warehouse.pallet.unsealed",
            PalletEvent::Retrieved { .. } => "warehouse.pallet.retrieved",
            PalletEvent::Moved { .. } => "warehouse.pallet.moved",
            PalletEvent::Dissolved { .. } => "warehouse.pallet.dissolved",
            PalletEvent::Dispatched { .. } => "warehouse.pallet.dispatched",
            PalletEvent::AssignedToBatch { .. } => "warehouse.pallet.assigned_to_batch",
            PalletEvent::ReleasedFromBatch { .. } => "warehouse.pallet.released_from_batch",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PalletEvent::Created { occurred_at, .. }
            | PalletEvent::CasesAdded { occurred_at, .. }
            | PalletEvent::CasesRemoved { occurred_at, .. }
            | PalletEvent::Sealed { occurred_at, .. }
            | PalletEvent::Unsealed { occurred_at, .. }
            | PalletEvent::Retrieved { occurred_at, .. }
            | PalletEvent::Moved { occurred_at, .. }
            | PalletEvent::Dissolved { occurred_at, .. }
            | PalletEvent::Dispatched { occurred_at, .. }
            | PalletEvent::AssignedToBatch { occurred_at, .. }
            | PalletEvent::ReleasedFromBatch { occurred_at, .. } => *occurred_at,
        }
    }
}

impl Aggregate for Pallet {
    type Command = PalletCommand;
    type Event = PalletEvent;
    type Error = LedgerError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PalletEvent::Created {
                pallet,
                ownership,
                location,
                occurred_at,
            } => {
                self.code = pallet.clone();
                self.ownership = ownership.clone();
                self.location = Some(location.clone());
                self.status = PalletStatus::Active;
                self.created_at = Some(*occurred_at);
                self.created = true;
            }
            PalletEvent::CasesAdded { stock, cases, .. } => self.add_member(stock, *cases),
            PalletEvent::CasesRemoved { stock, cases, .. } => self.remove_member(stock, *cases),
            PalletEvent::Sealed { .. } => self.status = PalletStatus::Sealed,
            PalletEvent::Unsealed { .. } => self.status = PalletStatus::Active,
            PalletEvent::Retrieved { .. } => self.status = PalletStatus::Retrieved,
            PalletEvent::Moved { to, .. } => self.location = Some(to.clone()),
            PalletEvent::Dissolved { .. } | PalletEvent::Dispatched { .. } => {
                self.members.clear();
                self.batch = None;
                self.status = PalletStatus::Archived;
            }
            PalletEvent::AssignedToBatch { batch, .. } => self.batch = Some(*batch),
            PalletEvent::ReleasedFromBatch { .. } => self.batch = None,
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        let pallet = self.code.clone();
        if !matches!(command, PalletCommand::Create { .. }) {
            self.ensure_created()?;
        }

        match command {
            PalletCommand::Create {
                ownership,
                location,
                occurred_at,
            } => {
                if self.created {
                    return Err(LedgerError::Conflict(format!("pallet {pallet} already exists")));
                }
                Ok(vec![PalletEvent::Created {
                    pallet,
                    ownership: ownership.clone(),
                    location: location.clone(),
                    occurred_at: *occurred_at,
                }])
            }
            PalletCommand::AddCases {
                stock,
                cases,
                from_location,
                occurred_at,
            } => {
                self.ensure_open_for_changes()?;
                if *cases == 0 {
                    return Err(LedgerError::validation("cannot add zero cases to a pallet"));
                }
                if !self.ownership.accepts(&stock.owner) {
                    return Err(LedgerError::validation(format!(
                        "pallet {pallet} is single-owner; cannot take stock of owner {}",
                        stock.owner
                    )));
                }
                if self.location.as_ref() != Some(from_location) {
                    return Err(LedgerError::validation(format!(
                        "stock at {from_location} cannot join pallet {pallet} at {}",
                        self.location.as_ref().map_or("-", |l| l.as_str())
                    )));
                }
                Ok(vec![PalletEvent::CasesAdded {
                    pallet,
                    stock: stock.clone(),
                    cases: *cases,
                    occurred_at: *occurred_at,
                }])
            }
            PalletCommand::RemoveCases {
                stock,
                cases,
                occurred_at,
            } => {
                self.ensure_open_for_changes()?;
                if *cases == 0 {
                    return Err(LedgerError::validation("cannot remove zero cases from a pallet"));
                }
                let on_pallet = self.member_cases(stock);
                if *cases > on_pallet {
                    let line = self.member_line(stock)?;
                    return Err(LedgerError::InsufficientStock(crate::error::Shortfall {
                        product: line.product,
                        owner: Some(line.owner),
                        lot: Some(line.lot),
                        location: Some(line.location),
                        requested_cases: *cases,
                        available_cases: on_pallet,
                    }));
                }
                Ok(vec![PalletEvent::CasesRemoved {
                    pallet,
                    stock: stock.clone(),
                    cases: *cases,
                    occurred_at: *occurred_at,
                }])
            }
            PalletCommand::Seal { occurred_at } => {
                if self.status != PalletStatus::Active {
                    return Err(LedgerError::invalid_transition("pallet", self.status, "seal"));
                }
                if self.members.is_empty() {
                    return Err(LedgerError::validation(format!("pallet {pallet} is empty")));
                }
                Ok(vec![PalletEvent::Sealed {
                    pallet,
                    occurred_at: *occurred_at,
                }])
            }
            PalletCommand::Unseal { occurred_at } => {
                if self.status != PalletStatus::Sealed {
                    return Err(LedgerError::invalid_transition("pallet", self.status, "unseal"));
                }
                if let Some(batch) = self.batch {
                    return Err(LedgerError::validation(format!(
                        "pallet {pallet} is assigned to dispatch batch {batch}"
                    )));
                }
                Ok(vec![PalletEvent::Unsealed {
                    pallet,
                    occurred_at: *occurred_at,
                }])
            }
            PalletCommand::Retrieve { occurred_at } => {
                if self.status != PalletStatus::Sealed {
                    return Err(LedgerError::invalid_transition("pallet", self.status, "retrieve"));
                }
                Ok(vec![PalletEvent::Retrieved {
                    pallet,
                    occurred_at: *occurred_at,
                }])
            }
            PalletCommand::Move { to, occurred_at } => {
                if self.status == PalletStatus::Archived {
                    return Err(LedgerError::invalid_transition("pallet", self.status, "move"));
                }
                let from = self
                    .location
                    .clone()
                    .ok_or_else(|| LedgerError::not_found("pallet", &pallet))?;
                if &from == to {
                    return Err(LedgerError::validation(format!("pallet {pallet} is already at {to}")));
                }
                Ok(vec![PalletEvent::Moved {
                    pallet,
                    from,
                    to: to.clone(),
                    occurred_at: *occurred_at,
                }])
            }
            PalletCommand::Dissolve { occurred_at } => {
                if self.status != PalletStatus::Active {
                    return Err(LedgerError::invalid_transition("pallet", self.status, "dissolve"));
                }
                Ok(vec![PalletEvent::Dissolved {
                    pallet,
                    occurred_at: *occurred_at,
                }])
            }
            PalletCommand::Dispatch { batch, occurred_at } => {
                if self.status == PalletStatus::Archived {
                    return Err(LedgerError::invalid_transition("pallet", self.status, "dispatch"));
                }
                match (self.batch, batch) {
                    (Some(current), None) => {
                        return Err(LedgerError::validation(format!(
                            "pallet {pallet} is assigned to dispatch batch {current}; dispatch the batch"
                        )));
                    }
                    (current, Some(requested)) if current != Some(*requested) => {
                        return Err(LedgerError::validation(format!(
                            "pallet {pallet} is not in dispatch batch {requested}"
                        )));
                    }
                    _ => {}
                }
                if self.members.is_empty() {
                    return Err(LedgerError::validation(format!("pallet {pallet} is empty")));
                }
                Ok(vec![PalletEvent::Dispatched {
                    pallet,
                    occurred_at: *occurred_at,
                }])
            }
            PalletCommand::AssignToBatch { batch, occurred_at } => {
                if !matches!(self.status, PalletStatus::Sealed | PalletStatus::Retrieved) {
                    return Err(LedgerError::invalid_transition(
                        "pallet",
                        self.status,
                        "add to dispatch batch",
                    ));
                }
                match self.batch {
                    Some(current) if current == *batch => Err(LedgerError::Conflict(format!(
                        "pallet {pallet} is already in dispatch batch {batch}"
                    ))),
                    Some(current) => Err(LedgerError::validation(format!(
                        "pallet {pallet} belongs to dispatch batch {current}"
                    ))),
                    None => Ok(vec![PalletEvent::AssignedToBatch {
                        pallet,
                        batch: *batch,
                        occurred_at: *occurred_at,
                    }]),
                }
            }
            PalletCommand::ReleaseFromBatch { occurred_at } => {
                if self.batch.is_none() {
                    return Ok(vec![]);
                }
                Ok(vec![PalletEvent::ReleasedFromBatch {
                    pallet,
                    occurred_at: *occurred_at,
                }])
            }
        }
    }
}
