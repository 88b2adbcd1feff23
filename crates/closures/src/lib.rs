//! Monthly inventory closures.
//!
//! A closure snapshots one warehouse for one period: opening balance, what
//! came in and went out, the calculated closing balance and, once counted,
//! the discrepancy against the physical stock.

pub mod closure;
pub mod line;

pub use closure::{
    ApproveClosure, CancelClosure, Closure, ClosureApproved, ClosureCancelled, ClosureClosed,
    ClosureCommand, ClosureEvent, ClosureId, ClosureReopened, ClosureStarted, ClosureStatus,
    ClosureSummary, FinalizeClosure, PhysicalCountRecorded, RecalculateClosure,
    ClosureRecalculated, RecordPhysicalCount, ReopenClosure, StartClosure,
};
pub use line::{ClosureLine, DEFAULT_DISCREPANCY_EPSILON, LineInputs};
