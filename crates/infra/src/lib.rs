//! Infrastructure and application services: event store, command
//! dispatching, the inventory ledger, movement recording, period closures,
//! read models and configuration.

pub mod catalog;
pub mod closure_engine;
pub mod command_dispatcher;
pub mod config;
pub mod error;
pub mod event_store;
pub mod ledger;
pub mod ledger_store;
pub mod period_lock;
pub mod projections;
pub mod read_model;
pub mod recorder;
pub mod sequencer;
pub mod services;
pub mod workers;

pub use catalog::{Catalog, NewProduct};
pub use closure_engine::{CLOSURE_AGGREGATE, ClosureEngine};
pub use config::BodegaConfig;
pub use error::{ServiceError, ServiceResult};
pub use ledger::{InventoryLedger, LedgerPosting, StockAlert, TransferPosting};
pub use recorder::{MovementRecorder, MovementRequest, TransferOutcome, TransferRequest};
pub use services::BodegaServices;
