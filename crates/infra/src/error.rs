//! Errors returned by the ledger, recorder and closure services.

use rust_decimal::Decimal;
use thiserror::Error;

use bodega_core::DomainError;

use crate::command_dispatcher::DispatchError;
use crate::event_store::EventStoreError;
use crate::ledger::LedgerError;
use crate::ledger_store::LedgerStoreError;
use crate::projections::ReadModelError;

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: Decimal, available: Decimal },

    /// Another writer won the race. Safe to retry.
    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("cannot {action} while {state}")]
    StateTransition { state: String, action: String },

    #[error("not found: {0}")]
    NotFound(String),

    /// Code, SKU or id already taken.
    #[error("already exists: {0}")]
    Duplicate(String),

    /// The warehouse period is being closed or is already closed.
    #[error("period locked: {0}")]
    PeriodLocked(String),

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("storage failure: {0}")]
    Store(String),

    #[error("projection failure: {0}")]
    Projection(String),
}

impl ServiceError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::ConcurrencyConflict(_))
    }
}

impl From<DomainError> for ServiceError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => Self::Validation(msg),
            DomainError::InvariantViolation(msg) => Self::Invariant(msg),
            DomainError::NotFound => Self::NotFound("record".to_string()),
            DomainError::Conflict(msg) => Self::Duplicate(msg),
            DomainError::InsufficientStock {
                requested,
                available,
            } => Self::InsufficientStock {
                requested,
                available,
            },
            DomainError::StateTransition { state, action } => {
                Self::StateTransition { state, action }
            }
        }
    }
}

impl From<DispatchError> for ServiceError {
    fn from(value: DispatchError) -> Self {
        match value {
            DispatchError::Concurrency(msg) => Self::ConcurrencyConflict(msg),
            DispatchError::TenantIsolation(msg) => Self::TenantIsolation(msg),
            DispatchError::Validation(msg) => Self::Validation(msg),
            DispatchError::InvariantViolation(msg) => Self::Invariant(msg),
            DispatchError::NotFound => Self::NotFound("aggregate".to_string()),
            DispatchError::InsufficientStock {
                requested,
                available,
            } => Self::InsufficientStock {
                requested,
                available,
            },
            DispatchError::StateTransition { state, action } => {
                Self::StateTransition { state, action }
            }
            DispatchError::Deserialize(msg) => Self::Store(msg),
            DispatchError::Store(e) => Self::Store(e.to_string()),
            DispatchError::Publish(msg) => Self::Projection(msg),
        }
    }
}

impl From<EventStoreError> for ServiceError {
    fn from(value: EventStoreError) -> Self {
        DispatchError::from(value).into()
    }
}

impl From<LedgerError> for ServiceError {
    fn from(value: LedgerError) -> Self {
        match value {
            LedgerError::Domain(e) => e.into(),
            LedgerError::Conflict { attempts } => Self::ConcurrencyConflict(format!(
                "ledger row still changing after {attempts} attempts"
            )),
            LedgerError::Store(LedgerStoreError::Conflict { key, .. }) => {
                Self::ConcurrencyConflict(format!("ledger row {key:?} changed"))
            }
            LedgerError::Store(e) => Self::Store(e.to_string()),
        }
    }
}

impl From<ReadModelError> for ServiceError {
    fn from(value: ReadModelError) -> Self {
        match value {
            ReadModelError::TenantIsolation(msg) => Self::TenantIsolation(msg),
            other => Self::Projection(other.to_string()),
        }
    }
}
