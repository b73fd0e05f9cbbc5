//! Pick list state machine.
//!
//! pending → in_progress → completed, or cancelled from either open state.
//! Each line is backed by one allocation; picking consumes it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cellarledger_core::{Aggregate, AggregateRoot, UserId};
use cellarledger_events::Event;

use crate::allocation::AllocationPolicy;
use crate::error::{LedgerError, LedgerResult};
use crate::ids::{AllocationId, DispatchBatchId, OrderId, OwnerId, PickListId, PickListNumber, ProductRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PickListStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl PickListStatus {
    pub fn is_open(self) -> bool {
        matches!(self, PickListStatus::Pending | PickListStatus::InProgress)
    }
}

/// What the order asks for on one line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickRequestLine {
    pub product: ProductRef,
    pub owner: Option<OwnerId>,
    pub quantity_cases: u32,
    pub policy: AllocationPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickListLine {
    pub product: ProductRef,
    pub owner: Option<OwnerId>,
    pub quantity_cases: u32,
    pub picked_cases: u32,
    pub allocation: AllocationId,
}

impl PickListLine {
    pub fn remaining_cases(&self) -> u32 {
        self.quantity_cases - self.picked_cases
    }

    pub fn is_fully_picked(&self) -> bool {
        self.picked_cases == self.quantity_cases
    }
}

/// Result of a `pick_line` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickReceipt {
    pub pick_list: PickListId,
    pub line_index: usize,
    pub picked_cases: u32,
    pub line_complete: bool,
    pub list_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickList {
    id: PickListId,
    number: PickListNumber,
    order: Option<OrderId>,
    status: PickListStatus,
    assigned_to: Option<UserId>,
    lines: Vec<PickListLine>,
    batch: Option<DispatchBatchId>,
    created_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl PickList {
    pub fn empty(id: PickListId) -> Self {
        Self {
            id,
            number: PickListNumber::UNASSIGNED,
            order: None,
            status: PickListStatus::Pending,
            assigned_to: None,
            lines: Vec::new(),
            batch: None,
            created_at: None,
            completed_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> PickListId {
        self.id
    }

    pub fn number(&self) -> PickListNumber {
        self.number
    }

    pub fn order(&self) -> Option<&OrderId> {
        self.order.as_ref()
    }

    pub fn status(&self) -> PickListStatus {
        self.status
    }

    pub fn assigned_to(&self) -> Option<UserId> {
        self.assigned_to
    }

    pub fn lines(&self) -> &[PickListLine] {
        &self.lines
    }

    pub fn batch(&self) -> Option<DispatchBatchId> {
        self.batch
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Number of fully picked lines.
    pub fn picked_items(&self) -> usize {
        self.lines.iter().filter(|l| l.is_fully_picked()).count()
    }

    pub fn total_items(&self) -> usize {
        self.lines.len()
    }

    pub fn total_cases(&self) -> u32 {
        self.lines.iter().map(|l| l.quantity_cases).sum()
    }

    pub fn line(&self, index: usize) -> LedgerResult<&PickListLine> {
        self.lines
            .get(index)
            .ok_or_else(|| LedgerError::not_found("pick list line", format!("{}#{index}", self.id)))
    }

    fn ensure_created(&self) -> LedgerResult<()> {
        if !self.created {
            return Err(LedgerError::not_found("pick list", self.id));
        }
        Ok(())
    }
}

impl AggregateRoot for PickList {
    type Id = PickListId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PickListCommand {
    Create {
        order: OrderId,
        lines: Vec<PickListLine>,
        occurred_at: DateTime<Utc>,
    },
    Start {
        assigned_to: UserId,
        occurred_at: DateTime<Utc>,
    },
    RecordPick {
        line_index: usize,
        cases: u32,
        occurred_at: DateTime<Utc>,
    },
    Cancel { occurred_at: DateTime<Utc> },
    JoinBatch {
        batch: DispatchBatchId,
        occurred_at: DateTime<Utc>,
    },
    LeaveBatch { occurred_at: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PickListEvent {
    Created {
        pick_list: PickListId,
        /// Assigned at commit.
        number: PickListNumber,
        order: OrderId,
        lines: Vec<PickListLine>,
        occurred_at: DateTime<Utc>,
    },
    Started {
        pick_list: PickListId,
        assigned_to: UserId,
        occurred_at: DateTime<Utc>,
    },
    LinePicked {
        pick_list: PickListId,
        line_index: usize,
        cases: u32,
        occurred_at: DateTime<Utc>,
    },
    Completed {
        pick_list: PickListId,
        occurred_at: DateTime<Utc>,
    },
    Cancelled {
        pick_list: PickListId,
        occurred_at: DateTime<Utc>,
    },
    JoinedBatch {
        pick_list: PickListId,
        batch: DispatchBatchId,
        occurred_at: DateTime<Utc>,
    },
    LeftBatch {
        pick_list: PickListId,
        occurred_at: DateTime<Utc>,
    },
}

impl PickListEvent {
    pub fn pick_list(&self) -> PickListId {
        match self {
            PickListEvent::Created { pick_list, .. }
            | PickListEvent::Started { pick_list, .. }
            | PickListEvent::LinePicked { pick_list, .. }
            | PickListEvent::Completed { pick_list, .. }
            | PickListEvent::Cancelled { pick_list, .. }
            | PickListEvent::JoinedBatch { pick_list, .. }
            | PickListEvent::LeftBatch { pick_list, .. } => *pick_list,
        }
    }
}

impl Event for PickListEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PickListEvent::Created { .. } => "warehouse.pick_list.created",
            PickListEvent::Started { .. } => "warehouse.pick_list.started",
            PickListEvent::LinePicked { .. } => "warehouse.pick_list.line_picked",
            PickListEvent::Completed { .. } => "warehouse.pick_list.completed",
            PickListEvent::Cancelled { .. } => "warehouse.pick_list.cancelled",
            PickListEvent::JoinedBatch { .. } => "warehouse.pick_list.joined_batch",
            PickListEvent::LeftBatch { .. } => "warehouse.pick_list.left_batch",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PickListEvent::Created { occurred_at, .. }
            | PickListEvent::Started { occurred_at, .. }
            | PickListEvent::LinePicked { occurred_at, .. }
            | PickListEvent::Completed { occurred_at, .. }
            | PickListEvent::Cancelled { occurred_at, .. }
            | PickListEvent::JoinedBatch { occurred_at, .. }
            | PickListEvent::LeftBatch { occurred_at, .. } => *occurred_at,
        }
    }
}

impl Aggregate for PickList {
    type Command = PickListCommand;
    type Event = PickListEvent;
    type Error = LedgerError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PickListEvent::Created {
                pick_list,
                number,
                order,
                lines,
                occurred_at,
            } => {
                self.id = *pick_list;
                self.number = *number;
                self.order = Some(order.clone());
                self.lines = lines.clone();
                self.status = PickListStatus::Pending;
                self.created_at = Some(*occurred_at);
                self.created = true;
            }
            PickListEvent::Started { assigned_to, .. } => {
                self.assigned_to = Some(*assigned_to);
                self.status = PickListStatus::InProgress;
            }
            PickListEvent::LinePicked {
                line_index, cases, ..
            } => {
                if let Some(line) = self.lines.get_mut(*line_index) {
                    line.picked_cases += cases;
                }
            }
            PickListEvent::Completed { occurred_at, .. } => {
                self.status = PickListStatus::Completed;
                self.completed_at = Some(*occurred_at);
            }
            PickListEvent::Cancelled { .. } => self.status = PickListStatus::Cancelled,
            PickListEvent::JoinedBatch { batch, .. } => self.batch = Some(*batch),
            PickListEvent::LeftBatch { .. } => self.batch = None,
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        let pick_list = self.id;
        if !matches!(command, PickListCommand::Create { .. }) {
            self.ensure_created()?;
        }

        match command {
            PickListCommand::Create {
                order,
                lines,
                occurred_at,
            } => {
                if self.created {
                    return Err(LedgerError::Conflict(format!("pick list {pick_list} already exists")));
                }
                if lines.is_empty() {
                    return Err(LedgerError::validation("pick list needs at least one line"));
                }
                if lines.iter().any(|l| l.quantity_cases == 0 || l.picked_cases != 0) {
                    return Err(LedgerError::validation(
                        "pick list lines need a positive quantity and nothing picked",
                    ));
                }
                Ok(vec![PickListEvent::Created {
                    pick_list,
                    number: PickListNumber::UNASSIGNED,
                    order: order.clone(),
                    lines: lines.clone(),
                    occurred_at: *occurred_at,
                }])
            }
            PickListCommand::Start {
                assigned_to,
                occurred_at,
            } => {
                if self.status != PickListStatus::Pending {
                    return Err(LedgerError::invalid_transition("pick list", self.status, "start"));
                }
                Ok(vec![PickListEvent::Started {
                    pick_list,
                    assigned_to: *assigned_to,
                    occurred_at: *occurred_at,
                }])
            }
            PickListCommand::RecordPick {
                line_index,
                cases,
                occurred_at,
            } => {
                if self.status != PickListStatus::InProgress {
                    return Err(LedgerError::invalid_transition("pick list", self.status, "pick"));
                }
                let line = self.line(*line_index)?;
                if *cases == 0 || *cases > line.remaining_cases() {
                    return Err(LedgerError::validation(format!(
                        "line {line_index} of pick list {pick_list} has {} case(s) left to pick, got {cases}",
                        line.remaining_cases()
                    )));
                }

                let mut events = vec![PickListEvent::LinePicked {
                    pick_list,
                    line_index: *line_index,
                    cases: *cases,
                    occurred_at: *occurred_at,
                }];
                let list_complete = self.lines.iter().enumerate().all(|(idx, l)| {
                    if idx == *line_index {
                        l.picked_cases + cases == l.quantity_cases
                    } else {
                        l.is_fully_picked()
                    }
                });
                if list_complete {
                    events.push(PickListEvent::Completed {
                        pick_list,
                        occurred_at: *occurred_at,
                    });
                }
                Ok(events)
            }
            PickListCommand::Cancel { occurred_at } => {
                if !self.status.is_open() {
                    return Err(LedgerError::invalid_transition("pick list", self.status, "cancel"));
                }
                Ok(vec![PickListEvent::Cancelled {
                    pick_list,
                    occurred_at: *occurred_at,
                }])
            }
            PickListCommand::JoinBatch { batch, occurred_at } => {
                if self.status == PickListStatus::Cancelled {
                    return Err(LedgerError::invalid_transition(
                        "pick list",
                        self.status,
                        "add to dispatch batch",
                    ));
                }
                if let Some(current) = self.batch {
                    return Err(LedgerError::validation(format!(
                        "pick list {pick_list} already belongs to dispatch batch {current}"
                    )));
                }
                Ok(vec![PickListEvent::JoinedBatch {
                    pick_list,
                    batch: *batch,
                    occurred_at: *occurred_at,
                }])
            }
            PickListCommand::LeaveBatch { occurred_at } => {
                if self.batch.is_none() {
                    return Ok(vec![]);
                }
                Ok(vec![PickListEvent::LeftBatch {
                    pick_list,
                    occurred_at: *occurred_at,
                }])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(qty: u32) -> PickListLine {
        PickListLine {
            product: ProductRef::new("101234520151200750").unwrap(),
            owner: None,
            quantity_cases: qty,
            picked_cases: 0,
            allocation: AllocationId::new(),
        }
    }

    fn run(list: &mut PickList, cmd: PickListCommand) -> LedgerResult<Vec<PickListEvent>> {
        cellarledger_events::execute(list, &cmd)
    }

    fn created(lines: Vec<PickListLine>) -> PickList {
        let mut list = PickList::empty(PickListId::new());
        run(
            &mut list,
            PickListCommand::Create {
                order: OrderId::new("SO-1001").unwrap(),
                lines,
                occurred_at: Utc::now(),
            },
        )
        .unwrap();
        list
    }

    fn pick(list: &mut PickList, line_index: usize, cases: u32) -> LedgerResult<Vec<PickListEvent>> {
        run(
            list,
            PickListCommand::RecordPick {
                line_index,
                cases,
                occurred_at: Utc::now(),
            },
        )
    }

    #[test]
    fn picking_requires_the_list_to_be_started() {
        let mut list = created(vec![line(3)]);
        let err = pick(&mut list, 0, 1).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InvalidTransition {
                entity: "pick list".into(),
                from: "pending".into(),
                action: "pick".into(),
            }
        );
    }

    #[test]
    fn list_completes_when_every_line_is_fully_picked() {
        let mut list = created(vec![line(3), line(2)]);
        run(
            &mut list,
            PickListCommand::Start {
                assigned_to: UserId::new(),
                occurred_at: Utc::now(),
            },
        )
        .unwrap();

        pick(&mut list, 0, 2).unwrap();
        assert_eq!(list.picked_items(), 0);
        pick(&mut list, 0, 1).unwrap();
        assert_eq!(list.picked_items(), 1);
        assert_eq!(list.status(), PickListStatus::InProgress);

        let events = pick(&mut list, 1, 2).unwrap();
        assert!(matches!(events.last(), Some(PickListEvent::Completed { .. })));
        assert_eq!(list.status(), PickListStatus::Completed);
        assert_eq!(list.picked_items(), list.total_items());
        assert!(list.completed_at().is_some());
    }

    #[test]
    fn completed_lists_cannot_be_cancelled() {
        let mut list = created(vec![line(1)]);
        run(
            &mut list,
            PickListCommand::Start {
                assigned_to: UserId::new(),
                occurred_at: Utc::now(),
            },
        )
        .unwrap();
        pick(&mut list, 0, 1).unwrap();
        assert!(matches!(
            list.handle(&PickListCommand::Cancel { occurred_at: Utc::now() }),
            Err(LedgerError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn empty_pick_lists_are_rejected() {
        let list = PickList::empty(PickListId::new());
        let err = list
            .handle(&PickListCommand::Create {
                order: OrderId::new("SO-1").unwrap(),
                lines: vec![],
                occurred_at: Utc::now(),
            })
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }
}
