//! The inventory ledger: posts completed movements to balance rows.
//!
//! Each post is a read-modify-write against [`LedgerStore`]. The arithmetic is
//! done by `bodega_inventory`; this module owns loading rows, committing
//! them with a version check and retrying when another writer got there
//! first. Every post stores a receipt keyed by movement id in the same
//! commit, and posting a movement that already has one returns the stored
//! result instead of touching the row again.

use std::collections::HashMap;

use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, warn};

use bodega_catalog::{NegativeStockPolicy, ProductId, StockLevel, StockThresholds, ValuationMethod, WarehouseId};
use bodega_core::{DomainError, TenantId};
use bodega_inventory::{InventoryKey, InventoryRecord, apply_delta, plan_transfer, release, reserve};
use bodega_movements::{Movement, MovementId, MovementType};

use crate::ledger_store::{LedgerStore, LedgerStoreError, PostingReceipt};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Every attempt lost the race against another writer.
    #[error("ledger row kept changing after {attempts} attempts")]
    Conflict { attempts: u32 },

    #[error(transparent)]
    Store(LedgerStoreError),
}

impl From<LedgerStoreError> for LedgerError {
    fn from(value: LedgerStoreError) -> Self {
        LedgerError::Store(value)
    }
}

/// Result of posting one movement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerPosting {
    pub record: InventoryRecord,
    /// Signed quantity that actually reached the row.
    pub applied_quantity: Decimal,
    /// Signed change of the row's total value.
    pub value_change: Decimal,
    /// Outbound quantity dropped by the clamp policy.
    pub shortfall: Decimal,
    /// The movement was posted earlier; `record` is the row as it is now.
    pub replayed: bool,
}

impl LedgerPosting {
    fn replay(receipt: PostingReceipt, record: InventoryRecord) -> Self {
        Self {
            record,
            applied_quantity: receipt.applied_quantity,
            value_change: receipt.value_change,
            shortfall: receipt.shortfall,
            replayed: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPosting {
    pub source: InventoryRecord,
    pub destination: InventoryRecord,
    pub moved: Decimal,
    pub unit_cost: Decimal,
    pub shortfall: Decimal,
    pub source_value_change: Decimal,
    pub destination_value_change: Decimal,
    pub replayed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockAlert {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub quantity: Decimal,
    pub level: StockLevel,
}

#[derive(Debug)]
pub struct InventoryLedger<L> {
    store: L,
    policy: NegativeStockPolicy,
    max_retries: u32,
}

impl<L> InventoryLedger<L> {
    pub fn new(store: L, policy: NegativeStockPolicy, max_retries: u32) -> Self {
        Self {
            store,
            policy,
            max_retries,
        }
    }

    pub fn policy(&self) -> NegativeStockPolicy {
        self.policy
    }
}

impl<L: LedgerStore> InventoryLedger<L> {
    fn current(&self, tenant_id: TenantId, key: &InventoryKey) -> Result<InventoryRecord, LedgerError> {
        Ok(self
            .store
            .get(tenant_id, key)?
            .unwrap_or_else(|| InventoryRecord::empty(key.clone())))
    }

    /// Run `attempt` until it commits, a non-conflict error occurs, or the
    /// retry budget is spent.
    fn with_retries<T>(
        &self,
        tenant_id: TenantId,
        mut attempt: impl FnMut() -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let attempts = self.max_retries + 1;
        for n in 1..=attempts {
            match attempt() {
                Err(LedgerError::Store(LedgerStoreError::Conflict { key, expected, actual })) => {
                    debug!(
                        tenant_id = %tenant_id,
                        product_id = %key.product_id,
                        warehouse_id = %key.warehouse_id,
                        expected,
                        actual,
                        attempt = n,
                        "ledger row changed underneath, retrying"
                    );
                }
                // Another caller posted the same movement first; the next
                // attempt finds its receipt.
                Err(LedgerError::Store(LedgerStoreError::AlreadyPosted(movement_id))) => {
                    debug!(
                        tenant_id = %tenant_id,
                        movement_id = %movement_id,
                        attempt = n,
                        "movement posted concurrently, replaying"
                    );
                }
                other => return other,
            }
        }
        Err(LedgerError::Conflict { attempts })
    }

    /// What the movement did to its row, if it was posted.
    pub fn receipt(
        &self,
        tenant_id: TenantId,
        movement_id: MovementId,
    ) -> Result<Option<PostingReceipt>, LedgerError> {
        Ok(self.store.receipt(tenant_id, movement_id)?)
    }

    pub fn is_posted(&self, tenant_id: TenantId, movement_id: MovementId) -> Result<bool, LedgerError> {
        Ok(self.receipt(tenant_id, movement_id)?.is_some())
    }

    /// Post one movement's delta to its (product, warehouse, lot) row.
    ///
    /// A movement that was already posted is not applied again; the stored
    /// result comes back with `replayed` set.
    pub fn apply(
        &self,
        tenant_id: TenantId,
        movement: &Movement,
        valuation: ValuationMethod,
    ) -> Result<LedgerPosting, LedgerError> {
        if movement.tenant_id() != Some(tenant_id) {
            return Err(DomainError::invariant("movement belongs to another tenant").into());
        }
        if movement.movement_type().is_some_and(MovementType::is_transfer) {
            return Err(DomainError::validation("transfer legs are posted together").into());
        }
        let delta = movement.delta()?;
        let movement_id = movement.id_typed();

        let posting = self.with_retries(tenant_id, || {
            if let Some(receipt) = self.store.receipt(tenant_id, movement_id)? {
                let record = self.current(tenant_id, &receipt.key)?;
                return Ok(LedgerPosting::replay(receipt, record));
            }
            let current = self.current(tenant_id, &delta.key)?;
            let applied = apply_delta(&current, &delta, self.policy, valuation)?;
            let receipt = PostingReceipt {
                movement_id,
                key: delta.key.clone(),
                applied_quantity: applied.applied_quantity,
                value_change: applied.value_change,
                shortfall: applied.shortfall,
            };
            let mut committed = self
                .store
                .commit(tenant_id, vec![applied.record], vec![receipt])?;
            let record = committed
                .pop()
                .ok_or_else(|| LedgerStoreError::InvalidWrite("commit returned no rows".into()))?;
            Ok(LedgerPosting {
                record,
                applied_quantity: applied.applied_quantity,
                value_change: applied.value_change,
                shortfall: applied.shortfall,
                replayed: false,
            })
        })?;

        if posting.replayed {
            debug!(
                tenant_id = %tenant_id,
                movement_id = %movement_id,
                "movement already on the ledger"
            );
        } else if posting.shortfall > Decimal::ZERO {
            warn!(
                tenant_id = %tenant_id,
                movement_id = %movement.id_typed(),
                requested = %delta.quantity,
                applied = %posting.applied_quantity,
                "outbound movement clamped at zero stock"
            );
        }
        Ok(posting)
    }

    /// Post both legs of a transfer in one commit.
    pub fn apply_transfer(
        &self,
        tenant_id: TenantId,
        outgoing: &Movement,
        incoming: &Movement,
        destination_valuation: ValuationMethod,
    ) -> Result<TransferPosting, LedgerError> {
        if outgoing.movement_type() != Some(MovementType::TransferOut)
            || incoming.movement_type() != Some(MovementType::TransferIn)
        {
            return Err(DomainError::validation("expected a transfer_out and a transfer_in leg").into());
        }
        if outgoing.tenant_id() != Some(tenant_id) || incoming.tenant_id() != Some(tenant_id) {
            return Err(DomainError::invariant("transfer leg belongs to another tenant").into());
        }
        if outgoing.transfer_id().is_none() || outgoing.transfer_id() != incoming.transfer_id() {
            return Err(DomainError::validation("transfer legs must share a transfer id").into());
        }
        if outgoing.quantity() != -incoming.quantity() {
            return Err(DomainError::validation("transfer legs must move the same quantity").into());
        }

        let source_key = outgoing.key()?;
        let destination_key = incoming.key()?;
        let quantity = incoming.quantity();
        let occurred_at = outgoing
            .occurred_at()
            .ok_or_else(DomainError::not_found)?;

        let outgoing_id = outgoing.id_typed();
        let incoming_id = incoming.id_typed();

        self.with_retries(tenant_id, || {
            match (
                self.store.receipt(tenant_id, outgoing_id)?,
                self.store.receipt(tenant_id, incoming_id)?,
            ) {
                (Some(out_receipt), Some(in_receipt)) => {
                    let moved = in_receipt.applied_quantity;
                    return Ok(TransferPosting {
                        source: self.current(tenant_id, &out_receipt.key)?,
                        destination: self.current(tenant_id, &in_receipt.key)?,
                        moved,
                        unit_cost: if moved.is_zero() {
                            Decimal::ZERO
                        } else {
                            in_receipt.value_change / moved
                        },
                        shortfall: out_receipt.shortfall,
                        source_value_change: out_receipt.value_change,
                        destination_value_change: in_receipt.value_change,
                        replayed: true,
                    });
                }
                (None, None) => {}
                _ => {
                    return Err(DomainError::invariant("only one transfer leg is on the ledger").into());
                }
            }

            let source = self.current(tenant_id, &source_key)?;
            let destination = self.current(tenant_id, &destination_key)?;
            let plan = plan_transfer(
                &source,
                &destination,
                quantity,
                self.policy,
                destination_valuation,
                occurred_at,
            )?;
            let receipts = vec![
                PostingReceipt {
                    movement_id: outgoing_id,
                    key: source_key.clone(),
                    applied_quantity: -plan.moved,
                    value_change: plan.source_value_change,
                    shortfall: plan.shortfall,
                },
                PostingReceipt {
                    movement_id: incoming_id,
                    key: destination_key.clone(),
                    applied_quantity: plan.moved,
                    value_change: plan.destination_value_change,
                    shortfall: Decimal::ZERO,
                },
            ];
            let committed = self
                .store
                .commit(tenant_id, vec![plan.source, plan.destination], receipts)?;
            let [source, destination]: [InventoryRecord; 2] = committed
                .try_into()
                .map_err(|_| LedgerStoreError::InvalidWrite("transfer commit lost a row".into()))?;
            Ok(TransferPosting {
                source,
                destination,
                moved: plan.moved,
                unit_cost: plan.unit_cost,
                shortfall: plan.shortfall,
                source_value_change: plan.source_value_change,
                destination_value_change: plan.destination_value_change,
                replayed: false,
            })
        })
    }

    pub fn balance(
        &self,
        tenant_id: TenantId,
        key: &InventoryKey,
    ) -> Result<Option<InventoryRecord>, LedgerError> {
        Ok(self.store.get(tenant_id, key)?)
    }

    pub fn warehouse_balances(
        &self,
        tenant_id: TenantId,
        warehouse_id: WarehouseId,
    ) -> Result<Vec<InventoryRecord>, LedgerError> {
        let mut rows = self.store.list(tenant_id)?;
        rows.retain(|r| r.key.warehouse_id == warehouse_id);
        Ok(rows)
    }

    pub fn product_balances(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> Result<Vec<InventoryRecord>, LedgerError> {
        let mut rows = self.store.list(tenant_id)?;
        rows.retain(|r| r.key.product_id == product_id);
        Ok(rows)
    }

    /// Products of a warehouse whose on-hand total (all lots) is outside
    /// their thresholds. Products without thresholds are skipped.
    pub fn stock_alerts(
        &self,
        tenant_id: TenantId,
        warehouse_id: WarehouseId,
        thresholds: &HashMap<ProductId, StockThresholds>,
    ) -> Result<Vec<StockAlert>, LedgerError> {
        let mut totals: HashMap<ProductId, Decimal> =
            thresholds.keys().map(|p| (*p, Decimal::ZERO)).collect();
        for row in self.warehouse_balances(tenant_id, warehouse_id)? {
            if let Some(total) = totals.get_mut(&row.key.product_id) {
                *total += row.quantity;
            }
        }

        let mut alerts: Vec<StockAlert> = totals
            .into_iter()
            .filter_map(|(product_id, quantity)| {
                let level = thresholds.get(&product_id)?.level(quantity);
                (level != StockLevel::Normal).then_some(StockAlert {
                    product_id,
                    warehouse_id,
                    quantity,
                    level,
                })
            })
            .collect();
        alerts.sort_by_key(|a| a.product_id);
        Ok(alerts)
    }

    pub fn reserve(
        &self,
        tenant_id: TenantId,
        key: &InventoryKey,
        quantity: Decimal,
    ) -> Result<InventoryRecord, LedgerError> {
        self.update_row(tenant_id, key, |row| reserve(row, quantity))
    }

    pub fn release(
        &self,
        tenant_id: TenantId,
        key: &InventoryKey,
        quantity: Decimal,
    ) -> Result<InventoryRecord, LedgerError> {
        self.update_row(tenant_id, key, |row| release(row, quantity))
    }

    fn update_row(
        &self,
        tenant_id: TenantId,
        key: &InventoryKey,
        change: impl Fn(&InventoryRecord) -> Result<InventoryRecord, DomainError>,
    ) -> Result<InventoryRecord, LedgerError> {
        self.with_retries(tenant_id, || {
            let current = self.current(tenant_id, key)?;
            let next = change(&current)?;
            self.store
                .commit(tenant_id, vec![next], vec![])?
                .pop()
                .ok_or_else(|| LedgerStoreError::InvalidWrite("commit returned no rows".into()).into())
        })
    }
}
