//! Warehouse inventory ledger (pure domain).
//!
//! Case-level stock of wine and spirits across locations and pallets, for
//! several owners. The movement log is the source of truth; stock lines are a
//! view that replaying the log rebuilds exactly.
//!
//! This crate performs no IO and takes no locks. Commands are planned in a
//! [`Transaction`] against a [`WarehouseState`]; committing the resulting
//! [`CommitPlan`] is the store's job (`cellarledger-infra`).

pub mod allocation;
pub mod dispatch;
pub mod error;
pub mod ids;
pub mod location;
pub mod movement;
pub mod pallet;
pub mod pick_list;
pub mod state;
pub mod stock;
pub mod transaction;

pub use allocation::{
    AllocatedLine, Allocation, AllocationHolder, AllocationLine, AllocationOutcome, AllocationPolicy,
    AllocationRequest,
};
pub use dispatch::{BatchPallet, BatchPickList, BatchStatus, DispatchBatch, DispatchBatchEvent};
pub use error::{LedgerError, LedgerResult, Shortfall};
pub use ids::{
    AllocationId, BatchNumber, DispatchBatchId, IdempotencyKey, LocationCode, LotNumber, MovementNumber,
    OrderId, OwnerId, PalletCode, PickListId, PickListNumber, ProductRef,
};
pub use location::{Location, LocationRegistry, LocationType};
pub use movement::{Movement, MovementType, replay_line};
pub use pallet::{Pallet, PalletEvent, PalletMember, PalletOwnership, PalletStatus};
pub use pick_list::{PickList, PickListEvent, PickListLine, PickListStatus, PickReceipt, PickRequestLine};
pub use state::{Change, LedgerSnapshot, LineCheck, RowRef, Sequences, WarehouseState};
pub use stock::{AvailableStock, Holding, LotAttributes, StockLine, StockLineKey, StockRef};
pub use transaction::{CommandContext, CommitPlan, MovementDraft, MovementInput, Transaction};
