//! Demo and load data for bodega.
//!
//! [`DemoScenario`] replays a fixed two-month story for a Salvadoran
//! foundation; [`Factory`] generates reproducible random catalogs and
//! movement streams from a seed.

pub mod factory;
pub mod scenario;
pub mod summary;

pub use factory::{Factory, RandomRun};
pub use scenario::DemoScenario;
pub use summary::{ClosureReport, SeedSummary, WarehouseSummary};
