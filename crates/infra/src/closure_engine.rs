//! Monthly closures per warehouse.
//!
//! Lines are computed from the movement journal: the opening comes from the
//! previous period's closure when one exists, otherwise from every completed
//! movement dated before the period. Computing runs under the period's
//! closing lock, so no movement can be posted into the period meanwhile.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use tracing::info;

use bodega_catalog::{ProductId, WarehouseId};
use bodega_closures::{
    ApproveClosure, CancelClosure, Closure, ClosureCommand, ClosureId, ClosureLine, ClosureStatus,
    FinalizeClosure, LineInputs, RecalculateClosure, RecordPhysicalCount, ReopenClosure,
    StartClosure,
};
use bodega_core::{Period, TenantId, UserId};
use bodega_events::{EventBus, EventEnvelope};

use crate::command_dispatcher::CommandDispatcher;
use crate::error::{ServiceError, ServiceResult};
use crate::event_store::EventStore;
use crate::period_lock::PeriodLocks;
use crate::projections::MovementJournalProjection;
use crate::read_model::{InMemoryTenantStore, TenantStore};

pub const CLOSURE_AGGREGATE: &str = "closures.closure";

#[derive(Debug)]
pub struct ClosureEngine<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    journal: Arc<MovementJournalProjection>,
    locks: Arc<PeriodLocks>,
    /// Latest closure per (warehouse, period).
    index: InMemoryTenantStore<(WarehouseId, Period), ClosureId>,
    epsilon: Decimal,
}

impl<S, B> ClosureEngine<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(
        dispatcher: Arc<CommandDispatcher<S, B>>,
        journal: Arc<MovementJournalProjection>,
        locks: Arc<PeriodLocks>,
        epsilon: Decimal,
    ) -> Self {
        Self {
            dispatcher,
            journal,
            locks,
            index: InMemoryTenantStore::new(),
            epsilon,
        }
    }

    /// Compute (or recompute) the closure of `warehouse_id` for a month.
    ///
    /// Starts a new closure when none exists or the last one was cancelled;
    /// recalculates one that is in progress or reopened. A closed period
    /// must be reopened first.
    pub fn close_period(
        &self,
        tenant_id: TenantId,
        warehouse_id: WarehouseId,
        year: i32,
        month: u32,
        actor: UserId,
    ) -> ServiceResult<Closure> {
        let period = Period::new(year, month)?;
        let _closing = self.locks.begin_closing(tenant_id, warehouse_id, period)?;
        let lines = self.compute_lines(tenant_id, warehouse_id, period)?;

        let current = self.closure_for(tenant_id, warehouse_id, period)?;
        let closure_id = match current {
            Some(closure) if closure.status() != ClosureStatus::Cancelled => {
                let closure_id = closure.id_typed();
                if closure.status() == ClosureStatus::Closed {
                    return Err(ServiceError::StateTransition {
                        state: closure.status().to_string(),
                        action: format!("close period {period} again without reopening"),
                    });
                }
                self.send(
                    tenant_id,
                    closure_id,
                    ClosureCommand::Recalculate(RecalculateClosure {
                        tenant_id,
                        closure_id,
                        lines,
                        occurred_at: Utc::now(),
                    }),
                )?;
                closure_id
            }
            _ => {
                let closure_id = ClosureId::generate();
                self.send(
                    tenant_id,
                    closure_id,
                    ClosureCommand::Start(StartClosure {
                        tenant_id,
                        closure_id,
                        warehouse_id,
                        period,
                        epsilon: self.epsilon,
                        lines,
                        started_by: actor,
                        occurred_at: Utc::now(),
                    }),
                )?;
                self.index.upsert(tenant_id, (warehouse_id, period), closure_id);
                closure_id
            }
        };

        let closure = self.closure(tenant_id, closure_id)?;
        let summary = closure.summary();
        info!(
            tenant_id = %tenant_id,
            warehouse_id = %warehouse_id,
            closure_id = %closure_id,
            period = %period,
            products = summary.products,
            closing_quantity = %summary.total_closing_quantity,
            closing_value = %summary.total_closing_value,
            "period calculated"
        );
        Ok(closure)
    }

    pub fn record_physical_count(
        &self,
        tenant_id: TenantId,
        closure_id: ClosureId,
        product_id: ProductId,
        physical_quantity: Decimal,
        adjust: bool,
        counted_by: UserId,
    ) -> ServiceResult<Closure> {
        self.send(
            tenant_id,
            closure_id,
            ClosureCommand::RecordPhysicalCount(RecordPhysicalCount {
                tenant_id,
                closure_id,
                product_id,
                physical_quantity,
                adjust,
                counted_by,
                occurred_at: Utc::now(),
            }),
        )?;
        let closure = self.closure(tenant_id, closure_id)?;
        if let Some(line) = closure.line(product_id) {
            if line.has_discrepancy {
                info!(
                    tenant_id = %tenant_id,
                    closure_id = %closure_id,
                    product_id = %product_id,
                    calculated = %line.calculated_closing_quantity,
                    physical = %physical_quantity,
                    discrepancy = %line.discrepancy_quantity,
                    "physical count differs from calculated closing"
                );
            }
        }
        Ok(closure)
    }

    /// Approve the calculated closure. Refused when movements were posted
    /// into the period after it was calculated.
    pub fn approve(&self, tenant_id: TenantId, closure_id: ClosureId, approved_by: UserId) -> ServiceResult<Closure> {
        let closure = self.closure(tenant_id, closure_id)?;
        let (warehouse_id, period) = scope(&closure)?;
        let _closing = self.locks.begin_closing(tenant_id, warehouse_id, period)?;
        self.ensure_current(tenant_id, &closure)?;

        self.send(
            tenant_id,
            closure_id,
            ClosureCommand::Approve(ApproveClosure {
                tenant_id,
                closure_id,
                approved_by,
                occurred_at: Utc::now(),
            }),
        )?;
        info!(tenant_id = %tenant_id, closure_id = %closure_id, period = %period, "closure approved");
        self.closure(tenant_id, closure_id)
    }

    /// Close the period: no further movements are accepted for it.
    pub fn finalize(&self, tenant_id: TenantId, closure_id: ClosureId, closed_by: UserId) -> ServiceResult<Closure> {
        let closure = self.closure(tenant_id, closure_id)?;
        let (warehouse_id, period) = scope(&closure)?;
        let _closing = self.locks.begin_closing(tenant_id, warehouse_id, period)?;
        self.ensure_current(tenant_id, &closure)?;

        self.send(
            tenant_id,
            closure_id,
            ClosureCommand::Finalize(FinalizeClosure {
                tenant_id,
                closure_id,
                closed_by,
                occurred_at: Utc::now(),
            }),
        )?;
        self.locks.mark_closed(tenant_id, warehouse_id, period)?;
        info!(tenant_id = %tenant_id, closure_id = %closure_id, warehouse_id = %warehouse_id, period = %period, "period closed");
        self.closure(tenant_id, closure_id)
    }

    /// Reopen a closed period for corrections. Postings already made stay;
    /// the closure is only flagged as needing correction.
    pub fn reopen(
        &self,
        tenant_id: TenantId,
        closure_id: ClosureId,
        reason: &str,
        reopened_by: UserId,
    ) -> ServiceResult<Closure> {
        let closure = self.closure(tenant_id, closure_id)?;
        let (warehouse_id, period) = scope(&closure)?;
        self.send(
            tenant_id,
            closure_id,
            ClosureCommand::Reopen(ReopenClosure {
                tenant_id,
                closure_id,
                reason: reason.to_string(),
                reopened_by,
                occurred_at: Utc::now(),
            }),
        )?;
        self.locks.mark_open(tenant_id, warehouse_id, period)?;
        info!(tenant_id = %tenant_id, closure_id = %closure_id, period = %period, reason, "period reopened");
        self.closure(tenant_id, closure_id)
    }

    pub fn cancel(&self, tenant_id: TenantId, closure_id: ClosureId, reason: &str) -> ServiceResult<Closure> {
        self.send(
            tenant_id,
            closure_id,
            ClosureCommand::Cancel(CancelClosure {
                tenant_id,
                closure_id,
                reason: reason.to_string(),
                occurred_at: Utc::now(),
            }),
        )?;
        info!(tenant_id = %tenant_id, closure_id = %closure_id, reason, "closure cancelled");
        self.closure(tenant_id, closure_id)
    }

    pub fn closure(&self, tenant_id: TenantId, closure_id: ClosureId) -> ServiceResult<Closure> {
        let closure: Closure = self
            .dispatcher
            .load(tenant_id, closure_id.aggregate_id(), |_, id| {
                Closure::empty(ClosureId::new(id))
            })?;
        if !closure.exists() {
            return Err(ServiceError::not_found(format!("closure {closure_id}")));
        }
        Ok(closure)
    }

    /// Latest closure of `warehouse_id` for `period`, cancelled ones included.
    pub fn closure_for(
        &self,
        tenant_id: TenantId,
        warehouse_id: WarehouseId,
        period: Period,
    ) -> ServiceResult<Option<Closure>> {
        self.index
            .get(tenant_id, &(warehouse_id, period))
            .map(|id| self.closure(tenant_id, id))
            .transpose()
    }

    /// Closure lines for every product with activity in `period` or stock
    /// carried into it.
    fn compute_lines(
        &self,
        tenant_id: TenantId,
        warehouse_id: WarehouseId,
        period: Period,
    ) -> ServiceResult<Vec<ClosureLine>> {
        let mut openings: BTreeMap<ProductId, (Decimal, Decimal)> =
            match self.closure_for(tenant_id, warehouse_id, period.previous())? {
                Some(previous) if previous.status() != ClosureStatus::Cancelled => previous
                    .lines()
                    .map(|l| (l.product_id, (l.closing_quantity(), l.closing_value())))
                    .collect(),
                _ => self
                    .journal
                    .net_before(tenant_id, warehouse_id, period.starts_at())
                    .into_iter()
                    .map(|(product_id, net)| (product_id, (net.quantity, net.value)))
                    .collect(),
            };
        openings.retain(|_, (quantity, value)| !quantity.is_zero() || !value.is_zero());

        let activity = self.journal.period_activity(tenant_id, warehouse_id, period);
        let mut products: Vec<ProductId> = openings.keys().chain(activity.keys()).copied().collect();
        products.sort();
        products.dedup();

        Ok(products
            .into_iter()
            .map(|product_id| {
                let (opening_quantity, opening_value) =
                    openings.get(&product_id).copied().unwrap_or_default();
                let moved = activity.get(&product_id).copied().unwrap_or_default();
                ClosureLine::compute(
                    product_id,
                    LineInputs {
                        opening_quantity,
                        opening_value,
                        quantity_in: moved.quantity_in,
                        value_in: moved.value_in,
                        quantity_out: moved.quantity_out,
                        value_out: moved.value_out,
                    },
                )
            })
            .collect())
    }

    fn ensure_current(&self, tenant_id: TenantId, closure: &Closure) -> ServiceResult<()> {
        let (warehouse_id, period) = scope(closure)?;
        let fresh = self.compute_lines(tenant_id, warehouse_id, period)?;
        let changed = fresh.iter().any(|line| {
            closure
                .line(line.product_id)
                .is_none_or(|stored| stored.inputs() != line.inputs())
        });
        // A stored line may only lack a fresh counterpart when it is a
        // counted product without opening or activity.
        let vanished = closure.lines().any(|stored| {
            !fresh.iter().any(|line| line.product_id == stored.product_id)
                && (stored.physical_quantity.is_none() || stored.inputs() != LineInputs::default())
        });
        let stale = changed || vanished;
        if stale {
            return Err(ServiceError::ConcurrencyConflict(format!(
                "movements changed period {period} after it was calculated; recalculate it"
            )));
        }
        Ok(())
    }

    fn send(&self, tenant_id: TenantId, closure_id: ClosureId, command: ClosureCommand) -> ServiceResult<()> {
        self.dispatcher.dispatch(
            tenant_id,
            closure_id.aggregate_id(),
            CLOSURE_AGGREGATE,
            command,
            |_, id| Closure::empty(ClosureId::new(id)),
        )?;
        Ok(())
    }
}

fn scope(closure: &Closure) -> ServiceResult<(WarehouseId, Period)> {
    match (closure.warehouse_id(), closure.period()) {
        (Some(w), Some(p)) => Ok((w, p)),
        _ => Err(ServiceError::Invariant(format!(
            "closure {} lost its warehouse or period",
            closure.id_typed()
        ))),
    }
}
