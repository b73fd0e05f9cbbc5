//! Dispatch batch state machine.
//!
//! draft → picking → staged → dispatched → delivered, strictly forward;
//! cancellable only from draft or picking. Membership counters are recomputed
//! whenever a pick list or pallet joins or leaves.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cellarledger_core::{Aggregate, AggregateRoot};
use cellarledger_events::Event;

use crate::error::{LedgerError, LedgerResult};
use crate::ids::{BatchNumber, DispatchBatchId, OrderId, PalletCode, PickListId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Draft,
    Picking,
    Staged,
    Dispatched,
    Delivered,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPickList {
    pub pick_list: PickListId,
    pub order: OrderId,
    pub cases: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPallet {
    pub pallet: PalletCode,
    pub cases: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchBatch {
    id: DispatchBatchId,
    number: BatchNumber,
    destination: String,
    status: BatchStatus,
    pick_lists: Vec<BatchPickList>,
    pallets: Vec<BatchPallet>,
    order_count: usize,
    total_cases: u64,
    created_at: Option<DateTime<Utc>>,
    dispatched_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl DispatchBatch {
    pub fn empty(id: DispatchBatchId) -> Self {
        Self {
            id,
            number: BatchNumber::UNASSIGNED,
            destination: String::new(),
            status: BatchStatus::Draft,
            pick_lists: Vec::new(),
            pallets: Vec::new(),
            order_count: 0,
            total_cases: 0,
            created_at: None,
            dispatched_at: None,
            delivered_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> DispatchBatchId {
        self.id
    }

    pub fn number(&self) -> BatchNumber {
        self.number
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn status(&self) -> BatchStatus {
        self.status
    }

    pub fn pick_lists(&self) -> &[BatchPickList] {
        &self.pick_lists
    }

    pub fn pallets(&self) -> &[BatchPallet] {
        &self.pallets
    }

    /// Distinct orders across member pick lists.
    pub fn order_count(&self) -> usize {
        self.order_count
    }

    pub fn total_cases(&self) -> u64 {
        self.total_cases
    }

    pub fn dispatched_at(&self) -> Option<DateTime<Utc>> {
        self.dispatched_at
    }

    pub fn delivered_at(&self) -> Option<DateTime<Utc>> {
        self.delivered_at
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn is_empty(&self) -> bool {
        self.pick_lists.is_empty() && self.pallets.is_empty()
    }

    fn recompute_totals(&mut self) {
        let orders: BTreeSet<&OrderId> = self.pick_lists.iter().map(|p| &p.order).collect();
        self.order_count = orders.len();
        self.total_cases = self
            .pick_lists
            .iter()
            .map(|p| u64::from(p.cases))
            .chain(self.pallets.iter().map(|p| u64::from(p.cases)))
            .sum();
    }

    fn ensure_created(&self) -> LedgerResult<()> {
        if !self.created {
            return Err(LedgerError::not_found("dispatch batch", self.id));
        }
        Ok(())
    }

    fn ensure_status(&self, allowed: &[BatchStatus], action: &str) -> LedgerResult<()> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(LedgerError::invalid_transition("dispatch batch", self.status, action))
        }
    }
}

impl AggregateRoot for DispatchBatch {
    type Id = DispatchBatchId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchBatchCommand {
    Create {
        destination: String,
        occurred_at: DateTime<Utc>,
    },
    AddPickList {
        member: BatchPickList,
        occurred_at: DateTime<Utc>,
    },
    RemovePickList {
        pick_list: PickListId,
        occurred_at: DateTime<Utc>,
    },
    AddPallet {
        member: BatchPallet,
        occurred_at: DateTime<Utc>,
    },
    StartPicking { occurred_at: DateTime<Utc> },
    /// `incomplete` lists member pick lists that are not completed yet.
    Stage {
        incomplete: Vec<PickListId>,
        occurred_at: DateTime<Utc>,
    },
    Dispatch { occurred_at: DateTime<Utc> },
    Deliver { occurred_at: DateTime<Utc> },
    Cancel { occurred_at: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DispatchBatchEvent {
    Created {
        batch: DispatchBatchId,
        /// Assigned at commit.
        number: BatchNumber,
        destination: String,
        occurred_at: DateTime<Utc>,
    },
    PickListAdded {
        batch: DispatchBatchId,
        member: BatchPickList,
        occurred_at: DateTime<Utc>,
    },
    PickListRemoved {
        batch: DispatchBatchId,
        pick_list: PickListId,
        occurred_at: DateTime<Utc>,
    },
    PalletAdded {
        batch: DispatchBatchId,
        member: BatchPallet,
        occurred_at: DateTime<Utc>,
    },
    PickingStarted {
        batch: DispatchBatchId,
        occurred_at: DateTime<Utc>,
    },
    Staged {
        batch: DispatchBatchId,
        occurred_at: DateTime<Utc>,
    },
    Dispatched {
        batch: DispatchBatchId,
        occurred_at: DateTime<Utc>,
    },
    Delivered {
        batch: DispatchBatchId,
        occurred_at: DateTime<Utc>,
    },
    Cancelled {
        batch: DispatchBatchId,
        occurred_at: DateTime<Utc>,
    },
}

impl DispatchBatchEvent {
    pub fn batch(&self) -> DispatchBatchId {
        match self {
            DispatchBatchEvent::Created { batch, .. }
            | DispatchBatchEvent::PickListAdded { batch, .. }
            | DispatchBatchEvent::PickListRemoved { batch, .. }
            | DispatchBatchEvent::PalletAdded { batch, .. }
            | DispatchBatchEvent::PickingStarted { batch, .. }
            | DispatchBatchEvent::Staged { batch, .. }
            | DispatchBatchEvent::Dispatched { batch, .. }
            | DispatchBatchEvent::Delivered { batch, .. }
            | DispatchBatchEvent::Cancelled { batch, .. } => *batch,
        }
    }
}

impl Event for DispatchBatchEvent {
    fn event_type(&self) -> &'static str {
        match self {
            DispatchBatchEvent::Created { .. } => "warehouse.dispatch_batch.created",
            DispatchBatchEvent::PickListAdded { .. } => "warehouse.dispatch_batch.pick_list_added",
            DispatchBatchEvent::PickListRemoved { .. } => "warehouse.dispatch_batch.pick_list_removed",
            DispatchBatchEvent::PalletAdded { .. } => "warehouse.dispatch_batch.pallet_added",
            DispatchBatchEvent::PickingStarted { .. } => "warehouse.dispatch_batch.picking_started",
            DispatchBatchEvent::Staged { .. } => "warehouse.dispatch_batch.staged",
            DispatchBatchEvent::Dispatched { .. } => "warehouse.dispatch_batch.dispatched",
            DispatchBatchEvent::Delivered { .. } => "warehouse.dispatch_batch.delivered",
            DispatchBatchEvent::Cancelled { .. } => "warehouse.dispatch_batch.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            DispatchBatchEvent::Created { occurred_at, .. }
            | DispatchBatchEvent::PickListAdded { occurred_at, .. }
            | DispatchBatchEvent::PickListRemoved { occurred_at, .. }
            | DispatchBatchEvent::PalletAdded { occurred_at, .. }
            | DispatchBatchEvent::PickingStarted { occurred_at, .. }
            | DispatchBatchEvent::Staged { occurred_at, .. }
            | DispatchBatchEvent::Dispatched { occurred_at, .. }
            | DispatchBatchEvent::Delivered { occurred_at, .. }
            | DispatchBatchEvent::Cancelled { occurred_at, .. } => *occurred_at,
        }
    }
}

impl Aggregate for DispatchBatch {
    type Command = DispatchBatchCommand;
    type Event = DispatchBatchEvent;
    type Error = LedgerError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            DispatchBatchEvent::Created {
                batch,
                number,
                destination,
                occurred_at,
            } => {
                self.id = *batch;
                self.number = *number;
                self.destination = destination.clone();
                self.status = BatchStatus::Draft;
                self.created_at = Some(*occurred_at);
                self.created = true;
            }
            DispatchBatchEvent::PickListAdded { member, .. } => {
                self.pick_lists.push(member.clone());
                self.recompute_totals();
            }
            DispatchBatchEvent::PickListRemoved { pick_list, .. } => {
                self.pick_lists.retain(|p| &p.pick_list != pick_list);
                self.recompute_totals();
            }
            DispatchBatchEvent::PalletAdded { member, .. } => {
                self.pallets.push(member.clone());
                self.recompute_totals();
            }
            DispatchBatchEvent::PickingStarted { .. } => self.status = BatchStatus::Picking,
            DispatchBatchEvent::Staged { .. } => self.status = BatchStatus::Staged,
            DispatchBatchEvent::Dispatched { occurred_at, .. } => {
                self.status = BatchStatus::Dispatched;
                self.dispatched_at = Some(*occurred_at);
            }
            DispatchBatchEvent::Delivered { occurred_at, .. } => {
                self.status = BatchStatus::Delivered;
                self.delivered_at = Some(*occurred_at);
            }
            DispatchBatchEvent::Cancelled { .. } => self.status = BatchStatus::Cancelled,
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        let batch = self.id;
        if !matches!(command, DispatchBatchCommand::Create { .. }) {
            self.ensure_created()?;
        }

        match command {
            DispatchBatchCommand::Create {
                destination,
                occurred_at,
            } => {
                if self.created {
                    return Err(LedgerError::Conflict(format!("dispatch batch {batch} already exists")));
                }
                if destination.trim().is_empty() {
                    return Err(LedgerError::validation("dispatch batch destination cannot be empty"));
                }
                Ok(vec![DispatchBatchEvent::Created {
                    batch,
                    number: BatchNumber::UNASSIGNED,
                    destination: destination.trim().to_string(),
                    occurred_at: *occurred_at,
                }])
            }
            DispatchBatchCommand::AddPickList { member, occurred_at } => {
                self.ensure_status(&[BatchStatus::Draft, BatchStatus::Picking], "add pick list to")?;
                if self.pick_lists.iter().any(|p| p.pick_list == member.pick_list) {
                    return Err(LedgerError::Conflict(format!(
                        "pick list {} is already in dispatch batch {batch}",
                        member.pick_list
                    )));
                }
                Ok(vec![DispatchBatchEvent::PickListAdded {
                    batch,
                    member: member.clone(),
                    occurred_at: *occurred_at,
                }])
            }
            DispatchBatchCommand::RemovePickList {
                pick_list,
                occurred_at,
            } => {
                self.ensure_status(&[BatchStatus::Draft], "remove pick list from")?;
                if !self.pick_lists.iter().any(|p| &p.pick_list == pick_list) {
                    return Err(LedgerError::not_found("dispatch batch member", pick_list));
                }
                Ok(vec![DispatchBatchEvent::PickListRemoved {
                    batch,
                    pick_list: *pick_list,
                    occurred_at: *occurred_at,
                }])
            }
            DispatchBatchCommand::AddPallet { member, occurred_at } => {
                self.ensure_status(&[BatchStatus::Draft, BatchStatus::Picking], "add pallet to")?;
                if self.pallets.iter().any(|p| p.pallet == member.pallet) {
                    return Err(LedgerError::Conflict(format!(
                        "pallet {} is already in dispatch batch {batch}",
                        member.pallet
                    )));
                }
                Ok(vec![DispatchBatchEvent::PalletAdded {
                    batch,
                    member: member.clone(),
                    occurred_at: *occurred_at,
                }])
            }
            DispatchBatchCommand::StartPicking { occurred_at } => {
                self.ensure_status(&[BatchStatus::Draft], "start picking")?;
                if self.is_empty() {
                    return Err(LedgerError::validation(format!("dispatch batch {batch} is empty")));
                }
                Ok(vec![DispatchBatchEvent::PickingStarted {
                    batch,
                    occurred_at: *occurred_at,
                }])
            }
            DispatchBatchCommand::Stage {
                incomplete,
                occurred_at,
            } => {
                self.ensure_status(&[BatchStatus::Picking], "stage")?;
                if !incomplete.is_empty() {
                    return Err(LedgerError::invalid_transition(
                        "dispatch batch",
                        self.status,
                        format!("stage ({} pick list(s) incomplete)", incomplete.len()),
                    ));
                }
                Ok(vec![DispatchBatchEvent::Staged {
                    batch,
                    occurred_at: *occurred_at,
                }])
            }
            DispatchBatchCommand::Dispatch { occurred_at } => {
                self.ensure_status(&[BatchStatus::Staged], "dispatch")?;
                Ok(vec![DispatchBatchEvent::Dispatched {
                    batch,
                    occurred_at: *occurred_at,
                }])
            }
            DispatchBatchCommand::Deliver { occurred_at } => {
                self.ensure_status(&[BatchStatus::Dispatched], "deliver")?;
                Ok(vec![DispatchBatchEvent::Delivered {
                    batch,
                    occurred_at: *occurred_at,
                }])
            }
            DispatchBatchCommand::Cancel { occurred_at } => {
                self.ensure_status(&[BatchStatus::Draft, BatchStatus::Picking], "cancel")?;
                Ok(vec![DispatchBatchEvent::Cancelled {
                    batch,
                    occurred_at: *occurred_at,
                }])
            }
        }
    }
}
