//! Balance arithmetic for ledger rows.
//!
//! Every function takes the current row and returns the next one; nothing
//! here reads or writes storage. The infra ledger wraps these in a
//! read-modify-write loop with row versions.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use bodega_catalog::{NegativeStockPolicy, ValuationMethod};
use bodega_core::{DomainError, DomainResult};

use crate::record::{InventoryKey, InventoryRecord};

/// Scale kept for weighted-average unit costs.
const COST_SCALE: u32 = 6;

/// One signed change to one ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockDelta {
    pub key: InventoryKey,
    /// Positive for inbound, negative for outbound.
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub expiration_date: Option<NaiveDate>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedDelta {
    pub record: InventoryRecord,
    /// Signed quantity actually applied (differs from the request when clamped).
    pub applied_quantity: Decimal,
    /// Outbound quantity that could not be served (clamp policy only).
    pub shortfall: Decimal,
    /// Signed change of the row's `total_value`.
    pub value_change: Decimal,
}

impl AppliedDelta {
    pub fn was_clamped(&self) -> bool {
        self.shortfall > Decimal::ZERO
    }
}

/// Apply one delta to a row.
///
/// - inbound: quantity grows; the row takes the movement's unit cost, or the
///   weighted average of old and new cost for `Average` products
/// - outbound: quantity shrinks at the row's current cost, whatever cost the
///   delta carries; going below zero is clamped to zero or rejected
///   depending on `policy`
/// - reservations are trimmed so they never exceed the quantity on hand
pub fn apply_delta(
    current: &InventoryRecord,
    delta: &StockDelta,
    policy: NegativeStockPolicy,
    valuation: ValuationMethod,
) -> DomainResult<AppliedDelta> {
    if current.key != delta.key {
        return Err(DomainError::invariant("delta key does not match ledger row"));
    }
    if delta.quantity.is_zero() {
        return Err(DomainError::validation("delta cannot be zero"));
    }
    if delta.unit_cost < Decimal::ZERO {
        return Err(DomainError::validation("unit cost cannot be negative"));
    }

    let mut next = current.clone();
    let mut applied = delta.quantity;
    let mut shortfall = Decimal::ZERO;

    if delta.quantity > Decimal::ZERO {
        next.unit_cost = match valuation {
            ValuationMethod::Average if current.quantity > Decimal::ZERO => {
                let value = current.quantity * current.unit_cost + delta.quantity * delta.unit_cost;
                (value / (current.quantity + delta.quantity)).round_dp(COST_SCALE)
            }
            _ => delta.unit_cost,
        };
        next.quantity = current.quantity + delta.quantity;
        if next.expiration_date.is_none() {
            next.expiration_date = delta.expiration_date;
        }
        if next.received_at.is_none() || current.quantity.is_zero() {
            next.received_at = Some(delta.occurred_at);
        }
    } else {
        let requested = -delta.quantity;
        let remaining = current.quantity - requested;
        if remaining < Decimal::ZERO {
            match policy {
                NegativeStockPolicy::Reject => {
                    return Err(DomainError::insufficient_stock(requested, current.quantity));
                }
                NegativeStockPolicy::Clamp => {
                    applied = -current.quantity;
                    shortfall = -remaining;
                    next.quantity = Decimal::ZERO;
                }
            }
        } else {
            next.quantity = remaining;
        }
    }

    next.updated_at = Some(delta.occurred_at);
    next.recompute();

    let value_change = next.total_value - current.total_value;
    Ok(AppliedDelta {
        record: next,
        applied_quantity: applied,
        shortfall,
        value_change,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedTransfer {
    pub source: InventoryRecord,
    pub destination: InventoryRecord,
    /// Quantity leaving the source and entering the destination.
    pub moved: Decimal,
    pub unit_cost: Decimal,
    pub shortfall: Decimal,
    /// Signed value change of each row.
    pub source_value_change: Decimal,
    pub destination_value_change: Decimal,
}

/// Plan both sides of a transfer from the current rows.
///
/// The destination is credited with exactly what the source was debited,
/// valued at the source cost. Under `Clamp` a short source moves what it
/// has; a transfer that would move nothing is refused.
pub fn plan_transfer(
    source: &InventoryRecord,
    destination: &InventoryRecord,
    quantity: Decimal,
    policy: NegativeStockPolicy,
    destination_valuation: ValuationMethod,
    occurred_at: DateTime<Utc>,
) -> DomainResult<PlannedTransfer> {
    if quantity <= Decimal::ZERO {
        return Err(DomainError::validation("transfer quantity must be positive"));
    }
    if source.key == destination.key {
        return Err(DomainError::validation(
            "source and destination warehouse must differ",
        ));
    }
    if source.key.product_id != destination.key.product_id
        || source.key.lot_number != destination.key.lot_number
    {
        return Err(DomainError::validation(
            "a transfer moves one product lot between warehouses",
        ));
    }
    if source.quantity.is_zero() {
        return Err(DomainError::insufficient_stock(quantity, Decimal::ZERO));
    }

    let unit_cost = source.unit_cost;
    let debit = apply_delta(
        source,
        &StockDelta {
            key: source.key.clone(),
            quantity: -quantity,
            unit_cost,
            expiration_date: None,
            occurred_at,
        },
        policy,
        ValuationMethod::Fifo,
    )?;

    let moved = -debit.applied_quantity;
    let credit = apply_delta(
        destination,
        &StockDelta {
            key: destination.key.clone(),
            quantity: moved,
            unit_cost,
            expiration_date: source.expiration_date,
            occurred_at,
        },
        policy,
        destination_valuation,
    )?;

    Ok(PlannedTransfer {
        source: debit.record,
        destination: credit.record,
        moved,
        unit_cost,
        shortfall: debit.shortfall,
        source_value_change: debit.value_change,
        destination_value_change: credit.value_change,
    })
}

/// Set aside `quantity` of the available stock.
pub fn reserve(current: &InventoryRecord, quantity: Decimal) -> DomainResult<InventoryRecord> {
    if quantity <= Decimal::ZERO {
        return Err(DomainError::validation("reservation must be positive"));
    }
    if quantity > current.available_quantity {
        return Err(DomainError::insufficient_stock(
            quantity,
            current.available_quantity,
        ));
    }
    let mut next = current.clone();
    next.reserved_quantity += quantity;
    next.recompute();
    Ok(next)
}

/// Return previously reserved stock to the available pool.
pub fn release(current: &InventoryRecord, quantity: Decimal) -> DomainResult<InventoryRecord> {
    if quantity <= Decimal::ZERO {
        return Err(DomainError::validation("release must be positive"));
    }
    if quantity > current.reserved_quantity {
        return Err(DomainError::validation(format!(
            "cannot release {quantity}: only {} reserved",
            current.reserved_quantity
        )));
    }
    let mut next = current.clone();
    next.reserved_quantity -= quantity;
    next.recompute();
    Ok(next)
}
