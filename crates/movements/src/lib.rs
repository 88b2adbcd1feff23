//! Inventory movements: typed, append-only changes to stock.
//!
//! A movement is recorded as a draft, submitted, approved and completed once
//! the ledger accepted it. Corrections are new compensating movements; a
//! completed movement is never edited.

pub mod kind;
pub mod movement;
pub mod reason;
pub mod reference;

pub use kind::{Direction, MovementType};
pub use movement::{
    ApproveMovement, CancelMovement, CompleteMovement, Movement, MovementApproved,
    MovementCancelled, MovementCommand, MovementCompleted, MovementEvent, MovementId,
    MovementRecorded, MovementReferences, MovementRejected, MovementStatus, MovementSubmitted,
    RecordMovement, RejectMovement, SubmitMovement, TransferId,
};
pub use reason::{MovementReason, ReasonCatalog, RequiredReferences};
pub use reference::ReferenceNumber;
