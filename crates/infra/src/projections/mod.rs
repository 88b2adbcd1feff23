//! Read models built from the event stream.
//!
//! Every projection is tenant-partitioned, skips redelivered events and can
//! be rebuilt by replaying the store.

pub mod cursor;
pub mod movement_journal;
pub mod product_catalog;

pub use cursor::{ReadModelError, StreamCursors};
pub use movement_journal::{
    JournalEntry, MOVEMENT_AGGREGATE, MovementJournalProjection, NetBalance, ProductActivity,
};
pub use product_catalog::{PRODUCT_AGGREGATE, ProductCatalogProjection, ProductSnapshot};
