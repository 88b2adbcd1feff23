//! Inventory balance accounting.
//!
//! Pure arithmetic over `InventoryRecord`s keyed by (product, warehouse, lot):
//! applying signed deltas, planning transfers, reservations and lot rotation.
//! Persistence, locking and retries live in the infra crate.

pub mod ledger;
pub mod record;
pub mod rotation;

pub use ledger::{AppliedDelta, PlannedTransfer, StockDelta, apply_delta, plan_transfer, release, reserve};
pub use record::{InventoryKey, InventoryRecord};
pub use rotation::{LotPick, LotPlan, pick_lots};
