use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use bodega_catalog::{ProductId, WarehouseId};
use bodega_core::{DomainError, DomainResult, ValueObject};

/// Ledger row key: one balance per (product, warehouse, lot).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InventoryKey {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub lot_number: Option<String>,
}

impl ValueObject for InventoryKey {}

impl InventoryKey {
    /// Blank lot numbers are treated as "no lot".
    pub fn new(product_id: ProductId, warehouse_id: WarehouseId, lot_number: Option<&str>) -> Self {
        let lot_number = lot_number
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string);
        Self {
            product_id,
            warehouse_id,
            lot_number,
        }
    }

    /// Same product and lot in another warehouse.
    pub fn in_warehouse(&self, warehouse_id: WarehouseId) -> Self {
        Self {
            warehouse_id,
            ..self.clone()
        }
    }
}

/// Running balance for one ledger key.
///
/// Invariants: `quantity >= 0`, `reserved_quantity <= quantity`,
/// `available_quantity == quantity - reserved_quantity`,
/// `total_value == quantity * unit_cost`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub key: InventoryKey,
    pub quantity: Decimal,
    pub reserved_quantity: Decimal,
    pub available_quantity: Decimal,
    pub unit_cost: Decimal,
    pub total_value: Decimal,
    pub expiration_date: Option<NaiveDate>,
    /// First receipt into this row (FIFO ordering).
    pub received_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Row version for optimistic concurrency; 0 means "not stored yet".
    pub version: u64,
}

impl InventoryRecord {
    pub fn empty(key: InventoryKey) -> Self {
        Self {
            key,
            quantity: Decimal::ZERO,
            reserved_quantity: Decimal::ZERO,
            available_quantity: Decimal::ZERO,
            unit_cost: Decimal::ZERO,
            total_value: Decimal::ZERO,
            expiration_date: None,
            received_at: None,
            updated_at: None,
            version: 0,
        }
    }

    pub fn is_stored(&self) -> bool {
        self.version > 0
    }

    /// Recompute derived columns after quantity, reservation or cost changed.
    pub(crate) fn recompute(&mut self) {
        if self.reserved_quantity > self.quantity {
            self.reserved_quantity = self.quantity;
        }
        self.available_quantity = (self.quantity - self.reserved_quantity).max(Decimal::ZERO);
        self.total_value = self.quantity * self.unit_cost;
    }

    pub fn check_invariants(&self) -> DomainResult<()> {
        if self.quantity < Decimal::ZERO {
            return Err(DomainError::invariant("quantity cannot be negative"));
        }
        if self.reserved_quantity < Decimal::ZERO || self.reserved_quantity > self.quantity {
            return Err(DomainError::invariant(
                "reserved quantity must be between zero and quantity",
            ));
        }
        if self.available_quantity != self.quantity - self.reserved_quantity {
            return Err(DomainError::invariant("available quantity out of sync"));
        }
        if self.total_value != self.quantity * self.unit_cost {
            return Err(DomainError::invariant("total value out of sync"));
        }
        Ok(())
    }
}
