//! Typed configuration attached to companies and warehouses.
//!
//! Known keys only; unknown keys are rejected when deserializing.

use serde::{Deserialize, Serialize};

/// What the ledger does when an outbound delta exceeds the stock on hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NegativeStockPolicy {
    /// Set quantity to zero and report the shortfall.
    #[default]
    Clamp,
    /// Refuse the movement with `InsufficientStock`.
    Reject,
}

/// Lot selection order for outbound picks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationStrategy {
    /// First in, first out (by receipt time).
    #[default]
    Fifo,
    /// First expired, first out (by expiration date).
    Fefo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct WarehouseSettings {
    pub rotation: RotationStrategy,
    pub requires_lot_tracking: bool,
    pub allows_receiving: bool,
    pub allows_dispatching: bool,
}

impl Default for WarehouseSettings {
    fn default() -> Self {
        Self {
            rotation: RotationStrategy::Fifo,
            requires_lot_tracking: false,
            allows_receiving: true,
            allows_dispatching: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CompanySettings {
    /// ISO 4217 code. El Salvador operates in USD.
    pub currency_code: String,
    pub negative_stock: NegativeStockPolicy,
    pub fiscal_year_start_month: u32,
}

impl Default for CompanySettings {
    fn default() -> Self {
        Self {
            currency_code: "USD".to_string(),
            negative_stock: NegativeStockPolicy::Clamp,
            fiscal_year_start_month: 1,
        }
    }
}
