//! Lot selection for outbound movements.

use std::cmp::Ordering;

use rust_decimal::Decimal;

use bodega_catalog::RotationStrategy;

use crate::record::{InventoryKey, InventoryRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LotPick {
    pub key: InventoryKey,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LotPlan {
    pub picks: Vec<LotPick>,
    /// Part of the request no lot could cover.
    pub shortfall: Decimal,
}

impl LotPlan {
    pub fn picked(&self) -> Decimal {
        self.picks.iter().map(|p| p.quantity).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.shortfall.is_zero()
    }
}

/// Choose which lots serve `quantity`, drawing from available stock only.
///
/// FIFO takes the oldest receipt first; FEFO takes the earliest expiration
/// first and falls back to receipt order. Rows without a date sort last.
pub fn pick_lots(records: &[InventoryRecord], quantity: Decimal, strategy: RotationStrategy) -> LotPlan {
    if quantity <= Decimal::ZERO {
        return LotPlan::default();
    }

    let mut candidates: Vec<&InventoryRecord> = records
        .iter()
        .filter(|r| r.available_quantity > Decimal::ZERO)
        .collect();
    candidates.sort_by(|a, b| match strategy {
        RotationStrategy::Fifo => by_received(a, b),
        RotationStrategy::Fefo => none_last(a.expiration_date, b.expiration_date)
            .then_with(|| by_received(a, b)),
    });

    let mut remaining = quantity;
    let mut picks = Vec::new();
    for record in candidates {
        if remaining.is_zero() {
            break;
        }
        let take = remaining.min(record.available_quantity);
        picks.push(LotPick {
            key: record.key.clone(),
            quantity: take,
        });
        remaining -= take;
    }

    LotPlan {
        picks,
        shortfall: remaining,
    }
}

fn by_received(a: &InventoryRecord, b: &InventoryRecord) -> Ordering {
    none_last(a.received_at, b.received_at).then_with(|| a.key.cmp(&b.key))
}

fn none_last<T: Ord>(a: Option<T>, b: Option<T>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
