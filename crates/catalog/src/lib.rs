//! Catalog module: units of measure, products and the warehouse hierarchy.
//!
//! Pure domain logic only: no IO, no persistence concerns.

pub mod product;
pub mod settings;
pub mod unit;
pub mod warehouse;

pub use product::{
    ActivateProduct, CreateProduct, DeactivateProduct, Product, ProductActivated,
    ProductCommand, ProductCreated, ProductDeactivated, ProductEvent, ProductId,
    ProductPricing, ProductStatus, PricingUpdated, StockLevel, StockThresholds, ThresholdsUpdated,
    UpdatePricing, UpdateThresholds, ValuationMethod,
};
pub use settings::{CompanySettings, NegativeStockPolicy, RotationStrategy, WarehouseSettings};
pub use unit::{UnitOfMeasure, UnitRegistry};
pub use warehouse::{Warehouse, WarehouseId, WarehouseKind, WarehouseRegistry, WarehouseStatus};
