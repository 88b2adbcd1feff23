//! Coordination between movement postings and period closures.
//!
//! Each (tenant, warehouse, period) slot counts postings in flight and
//! tracks whether a closure is running or finished. A closure cannot start
//! while postings are in flight, and postings are refused while a closure
//! runs or after it closed the period.
//!
//! Per warehouse the locks also keep the latest closed period. Nothing may
//! be posted at or before it: an earlier movement would change the opening
//! balances the closed period was computed from.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use bodega_catalog::WarehouseId;
use bodega_core::{Period, TenantId};

use crate::error::{ServiceError, ServiceResult};

type SlotKey = (TenantId, WarehouseId, Period);
type WarehouseKey = (TenantId, WarehouseId);

#[derive(Debug, Default, Clone, Copy)]
struct Slot {
    closing: bool,
    postings: usize,
    closed: bool,
}

#[derive(Debug, Default)]
struct Table {
    slots: HashMap<SlotKey, Slot>,
    closed_through: HashMap<WarehouseKey, Period>,
}

impl Table {
    fn closed_through(&self, tenant_id: TenantId, warehouse_id: WarehouseId) -> Option<Period> {
        self.closed_through.get(&(tenant_id, warehouse_id)).copied()
    }
}

#[derive(Debug, Default)]
pub struct PeriodLocks {
    table: Mutex<Table>,
}

impl PeriodLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> ServiceResult<MutexGuard<'_, Table>> {
        self.table
            .lock()
            .map_err(|_| ServiceError::Store("period lock table poisoned".into()))
    }

    /// Register a posting into `period`. Held until the guard drops.
    ///
    /// Refused while the period is being closed, and for any period at or
    /// before the warehouse's latest closed one.
    pub fn begin_posting(
        self: &Arc<Self>,
        tenant_id: TenantId,
        warehouse_id: WarehouseId,
        period: Period,
    ) -> ServiceResult<PostingGuard> {
        let key = (tenant_id, warehouse_id, period);
        let mut table = self.table()?;
        if let Some(through) = table.closed_through(tenant_id, warehouse_id) {
            if period <= through {
                return Err(ServiceError::PeriodLocked(format!(
                    "warehouse {warehouse_id} is closed through {through}; period {period} no longer accepts movements"
                )));
            }
        }
        let slot = table.slots.entry(key).or_default();
        if slot.closed {
            return Err(ServiceError::PeriodLocked(format!(
                "period {period} of warehouse {warehouse_id} is closed"
            )));
        }
        if slot.closing {
            return Err(ServiceError::PeriodLocked(format!(
                "period {period} of warehouse {warehouse_id} is being closed"
            )));
        }
        slot.postings += 1;
        Ok(PostingGuard {
            locks: Arc::clone(self),
            key,
        })
    }

    /// Take the exclusive closing slot for `period`.
    pub fn begin_closing(
        self: &Arc<Self>,
        tenant_id: TenantId,
        warehouse_id: WarehouseId,
        period: Period,
    ) -> ServiceResult<ClosingGuard> {
        let key = (tenant_id, warehouse_id, period);
        let mut table = self.table()?;
        let slot = table.slots.entry(key).or_default();
        if slot.closing {
            return Err(ServiceError::ConcurrencyConflict(format!(
                "period {period} of warehouse {warehouse_id} is already being closed"
            )));
        }
        if slot.postings > 0 {
            return Err(ServiceError::ConcurrencyConflict(format!(
                "{} movements are being posted into period {period}",
                slot.postings
            )));
        }
        slot.closing = true;
        Ok(ClosingGuard {
            locks: Arc::clone(self),
            key,
        })
    }

    pub fn mark_closed(
        &self,
        tenant_id: TenantId,
        warehouse_id: WarehouseId,
        period: Period,
    ) -> ServiceResult<()> {
        let mut table = self.table()?;
        table
            .slots
            .entry((tenant_id, warehouse_id, period))
            .or_default()
            .closed = true;
        let through = table.closed_through.entry((tenant_id, warehouse_id)).or_insert(period);
        *through = (*through).max(period);
        Ok(())
    }

    pub fn mark_open(
        &self,
        tenant_id: TenantId,
        warehouse_id: WarehouseId,
        period: Period,
    ) -> ServiceResult<()> {
        let mut table = self.table()?;
        if let Some(slot) = table.slots.get_mut(&(tenant_id, warehouse_id, period)) {
            slot.closed = false;
        }
        if let Some(through) = table.closed_through.get_mut(&(tenant_id, warehouse_id)) {
            if *through >= period {
                *through = period.previous();
            }
        }
        Ok(())
    }

    pub fn is_closed(
        &self,
        tenant_id: TenantId,
        warehouse_id: WarehouseId,
        period: Period,
    ) -> ServiceResult<bool> {
        let table = self.table()?;
        let covered = table
            .closed_through(tenant_id, warehouse_id)
            .is_some_and(|through| period <= through);
        Ok(covered
            || table
                .slots
                .get(&(tenant_id, warehouse_id, period))
                .is_some_and(|s| s.closed))
    }

    fn release(&self, key: &SlotKey, posting: bool) {
        if let Ok(mut table) = self.table.lock() {
            if let Some(slot) = table.slots.get_mut(key) {
                if posting {
                    slot.postings = slot.postings.saturating_sub(1);
                } else {
                    slot.closing = false;
                }
            }
        }
    }
}

#[derive(Debug)]
#[must_use = "the posting is only registered while the guard lives"]
pub struct PostingGuard {
    locks: Arc<PeriodLocks>,
    key: SlotKey,
}

impl Drop for PostingGuard {
    fn drop(&mut self) {
        self.locks.release(&self.key, true);
    }
}

#[derive(Debug)]
#[must_use = "the period is only locked while the guard lives"]
pub struct ClosingGuard {
    locks: Arc<PeriodLocks>,
    key: SlotKey,
}

impl Drop for ClosingGuard {
    fn drop(&mut self) {
        self.locks.release(&self.key, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jan() -> Period {
        Period::new(2025, 1).unwrap()
    }

    #[test]
    fn closing_blocks_postings_until_dropped() {
        let locks = Arc::new(PeriodLocks::new());
        let t = TenantId::new();
        let w = WarehouseId::generate();

        let closing = locks.begin_closing(t, w, jan()).unwrap();
        assert!(matches!(
            locks.begin_posting(t, w, jan()),
            Err(ServiceError::PeriodLocked(_))
        ));
        assert!(locks.begin_posting(t, w, jan().next()).is_ok());
        assert!(locks.begin_posting(TenantId::new(), w, jan()).is_ok());

        drop(closing);
        assert!(locks.begin_posting(t, w, jan()).is_ok());
    }

    #[test]
    fn second_closing_run_conflicts() {
        let locks = Arc::new(PeriodLocks::new());
        let t = TenantId::new();
        let w = WarehouseId::generate();

        let _first = locks.begin_closing(t, w, jan()).unwrap();
        let err = locks.begin_closing(t, w, jan()).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn in_flight_postings_hold_off_closing() {
        let locks = Arc::new(PeriodLocks::new());
        let t = TenantId::new();
        let w = WarehouseId::generate();

        let posting = locks.begin_posting(t, w, jan()).unwrap();
        assert!(locks.begin_closing(t, w, jan()).is_err());
        drop(posting);
        assert!(locks.begin_closing(t, w, jan()).is_ok());
    }

    #[test]
    fn closed_periods_refuse_postings_until_reopened() {
        let locks = Arc::new(PeriodLocks::new());
        let t = TenantId::new();
        let w = WarehouseId::generate();

        locks.mark_closed(t, w, jan()).unwrap();
        assert!(locks.is_closed(t, w, jan()).unwrap());
        assert!(locks.begin_posting(t, w, jan()).is_err());

        locks.mark_open(t, w, jan()).unwrap();
        assert!(locks.begin_posting(t, w, jan()).is_ok());
    }

    #[test]
    fn closing_a_period_freezes_everything_before_it() {
        let locks = Arc::new(PeriodLocks::new());
        let t = TenantId::new();
        let w = WarehouseId::generate();
        let december = jan().previous();

        locks.mark_closed(t, w, jan()).unwrap();
        assert!(matches!(
            locks.begin_posting(t, w, december),
            Err(ServiceError::PeriodLocked(_))
        ));
        assert!(locks.is_closed(t, w, december).unwrap());
        assert!(locks.begin_posting(t, w, jan().next()).is_ok());
        assert!(locks.begin_posting(t, WarehouseId::generate(), december).is_ok());

        // Finishing an older period does not lower the watermark.
        locks.mark_closed(t, w, december).unwrap();
        assert!(locks.begin_posting(t, w, jan()).is_err());

        locks.mark_open(t, w, jan()).unwrap();
        assert!(locks.begin_posting(t, w, jan()).is_ok());
        assert!(locks.begin_posting(t, w, december).is_err());
    }
}
