//! Journal of completed movements, the input of period closures.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;

use bodega_catalog::{ProductId, WarehouseId};
use bodega_core::{Period, TenantId};
use bodega_events::EventEnvelope;
use bodega_movements::{MovementEvent, MovementId, MovementType, TransferId};

use crate::event_store::StoredEvent;
use crate::projections::cursor::{ReadModelError, StreamCursors};
use crate::read_model::{InMemoryTenantStore, TenantStore};

pub const MOVEMENT_AGGREGATE: &str = "movements.movement";

/// One completed movement as it hit the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub movement_id: MovementId,
    pub movement_type: MovementType,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub lot_number: Option<String>,
    /// Signed quantity the ledger applied (after clamping).
    pub quantity: Decimal,
    /// Cost the ledger moved the stock at.
    pub unit_cost: Decimal,
    pub value: Decimal,
    /// Business date; decides the period.
    pub movement_date: DateTime<Utc>,
    pub confirmed_at: DateTime<Utc>,
    pub transfer_id: Option<TransferId>,
    pub reverses: Option<MovementId>,
}

/// Period totals for one product. Outbound totals are magnitudes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProductActivity {
    pub quantity_in: Decimal,
    pub value_in: Decimal,
    pub quantity_out: Decimal,
    pub value_out: Decimal,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetBalance {
    pub quantity: Decimal,
    pub value: Decimal,
}

#[derive(Debug)]
pub struct MovementJournalProjection<S = InMemoryTenantStore<MovementId, JournalEntry>>
where
    S: TenantStore<MovementId, JournalEntry>,
{
    entries: S,
    reversed_by: InMemoryTenantStore<MovementId, MovementId>,
    cursors: Mutex<StreamCursors>,
}

impl MovementJournalProjection {
    pub fn in_memory() -> Self {
        Self::new(InMemoryTenantStore::new())
    }
}

impl<S> MovementJournalProjection<S>
where
    S: TenantStore<MovementId, JournalEntry>,
{
    pub fn new(entries: S) -> Self {
        Self {
            entries,
            reversed_by: InMemoryTenantStore::new(),
            cursors: Mutex::new(StreamCursors::new()),
        }
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ReadModelError> {
        if envelope.aggregate_type() != MOVEMENT_AGGREGATE {
            return Ok(());
        }
        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let mut cursors = self.cursors.lock().map_err(|_| ReadModelError::Poisoned)?;
        if !cursors.should_apply(tenant_id, aggregate_id, seq)? {
            return Ok(());
        }

        let ev: MovementEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ReadModelError::Deserialize(e.to_string()))?;
        if ev.tenant_id() != tenant_id {
            return Err(ReadModelError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }
        if ev.movement_id().aggregate_id() != aggregate_id {
            return Err(ReadModelError::TenantIsolation(
                "event movement_id does not match envelope aggregate_id".to_string(),
            ));
        }

        if let MovementEvent::Completed(e) = ev {
            if let Some(original) = e.reverses {
                self.reversed_by.upsert(tenant_id, original, e.movement_id);
            }
            self.entries.upsert(
                tenant_id,
                e.movement_id,
                JournalEntry {
                    movement_id: e.movement_id,
                    movement_type: e.movement_type,
                    product_id: e.product_id,
                    warehouse_id: e.warehouse_id,
                    lot_number: e.lot_number,
                    quantity: e.applied_quantity,
                    unit_cost: if e.applied_quantity.is_zero() {
                        e.unit_cost
                    } else {
                        e.applied_value / e.applied_quantity
                    },
                    value: e.applied_value,
                    movement_date: e.movement_date,
                    confirmed_at: e.confirmed_at,
                    transfer_id: e.transfer_id,
                    reverses: e.reverses,
                },
            );
        }

        cursors.advance(tenant_id, aggregate_id, seq);
        Ok(())
    }

    pub fn apply_stored(&self, events: &[StoredEvent]) -> Result<(), ReadModelError> {
        events
            .iter()
            .try_for_each(|e| self.apply_envelope(&e.to_envelope()))
    }

    /// Drop the tenant's journal and replay it from `events`.
    pub fn rebuild_tenant(
        &self,
        tenant_id: TenantId,
        mut events: Vec<StoredEvent>,
    ) -> Result<(), ReadModelError> {
        if events.iter().any(|e| e.tenant_id != tenant_id) {
            return Err(ReadModelError::TenantIsolation(
                "rebuild input holds another tenant's events".to_string(),
            ));
        }
        self.entries.clear_tenant(tenant_id);
        self.reversed_by.clear_tenant(tenant_id);
        self.cursors
            .lock()
            .map_err(|_| ReadModelError::Poisoned)?
            .clear_tenant(tenant_id);

        events.sort_by_key(|e| (e.aggregate_id, e.sequence_number));
        self.apply_stored(&events)
    }

    pub fn entry(&self, tenant_id: TenantId, movement_id: MovementId) -> Option<JournalEntry> {
        self.entries.get(tenant_id, &movement_id)
    }

    /// Completed movements in business order.
    pub fn entries(&self, tenant_id: TenantId) -> Vec<JournalEntry> {
        let mut all = self.entries.list(tenant_id);
        all.sort_by_key(|e| (e.movement_date, e.confirmed_at, e.movement_id));
        all
    }

    pub fn is_reversed(&self, tenant_id: TenantId, movement_id: MovementId) -> bool {
        self.reversed_by(tenant_id, movement_id).is_some()
    }

    pub fn reversed_by(&self, tenant_id: TenantId, movement_id: MovementId) -> Option<MovementId> {
        self.reversed_by.get(tenant_id, &movement_id)
    }

    /// In/out totals per product for movements dated inside `period`.
    pub fn period_activity(
        &self,
        tenant_id: TenantId,
        warehouse_id: WarehouseId,
        period: Period,
    ) -> BTreeMap<ProductId, ProductActivity> {
        let mut out: BTreeMap<ProductId, ProductActivity> = BTreeMap::new();
        for e in self.entries.list(tenant_id) {
            if e.warehouse_id != warehouse_id || !period.contains(e.movement_date) {
                continue;
            }
            let activity = out.entry(e.product_id).or_default();
            if e.quantity > Decimal::ZERO {
                activity.quantity_in += e.quantity;
                activity.value_in += e.value;
            } else {
                activity.quantity_out -= e.quantity;
                activity.value_out -= e.value;
            }
        }
        out
    }

    /// Net quantity and value per product of movements dated before `before`.
    pub fn net_before(
        &self,
        tenant_id: TenantId,
        warehouse_id: WarehouseId,
        before: DateTime<Utc>,
    ) -> BTreeMap<ProductId, NetBalance> {
        let mut out: BTreeMap<ProductId, NetBalance> = BTreeMap::new();
        for e in self.entries.list(tenant_id) {
            if e.warehouse_id != warehouse_id || e.movement_date >= before {
                continue;
            }
            let net = out.entry(e.product_id).or_default();
            net.quantity += e.quantity;
            net.value += e.value;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bodega_core::AggregateId;
    use bodega_movements::{MovementCompleted, MovementSubmitted};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    struct Fixture {
        tenant: TenantId,
        warehouse: WarehouseId,
        product: ProductId,
        journal: MovementJournalProjection,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                tenant: TenantId::new(),
                warehouse: WarehouseId::generate(),
                product: ProductId::generate(),
                journal: MovementJournalProjection::in_memory(),
            }
        }

        fn completed(
            &self,
            id: MovementId,
            quantity: Decimal,
            day: (i32, u32, u32),
            reverses: Option<MovementId>,
        ) -> MovementEvent {
            let at = Utc.with_ymd_and_hms(day.0, day.1, day.2, 12, 0, 0).unwrap();
            MovementEvent::Completed(MovementCompleted {
                tenant_id: self.tenant,
                movement_id: id,
                movement_type: if quantity > Decimal::ZERO {
                    MovementType::Purchase
                } else {
                    MovementType::Dispatch
                },
                product_id: self.product,
                warehouse_id: self.warehouse,
                lot_number: None,
                quantity,
                applied_quantity: quantity,
                applied_value: quantity * dec!(2),
                unit_cost: dec!(2),
                movement_date: at,
                transfer_id: None,
                reverses,
                confirmed_at: at,
                occurred_at: at,
            })
        }

        fn envelope(&self, id: MovementId, seq: u64, ev: &MovementEvent) -> EventEnvelope<JsonValue> {
            EventEnvelope::new(
                Uuid::now_v7(),
                self.tenant,
                id.aggregate_id(),
                MOVEMENT_AGGREGATE,
                seq,
                serde_json::to_value(ev).unwrap(),
            )
        }

        fn post(&self, quantity: Decimal, day: (i32, u32, u32)) -> MovementId {
            let id = MovementId::generate();
            let ev = self.completed(id, quantity, day, None);
            self.journal.apply_envelope(&self.envelope(id, 1, &ev)).unwrap();
            id
        }
    }

    #[test]
    fn january_activity_and_opening() {
        let f = Fixture::new();
        f.post(dec!(40), (2024, 12, 20));
        f.post(dec!(10), (2025, 1, 10));
        f.post(dec!(-2), (2025, 1, 20));
        f.post(dec!(5), (2025, 2, 1));

        let jan = Period::new(2025, 1).unwrap();
        let activity = f.journal.period_activity(f.tenant, f.warehouse, jan);
        let a = activity[&f.product];
        assert_eq!(a.quantity_in, dec!(10));
        assert_eq!(a.quantity_out, dec!(2));
        assert_eq!(a.value_out, dec!(4));

        let opening = f.journal.net_before(f.tenant, f.warehouse, jan.starts_at());
        assert_eq!(opening[&f.product].quantity, dec!(40));
        assert_eq!(opening[&f.product].value, dec!(80));

        assert!(f
            .journal
            .period_activity(f.tenant, WarehouseId::generate(), jan)
            .is_empty());
        assert!(f.journal.period_activity(TenantId::new(), f.warehouse, jan).is_empty());
    }

    #[test]
    fn redelivery_is_ignored_and_gaps_fail() {
        let f = Fixture::new();
        let id = MovementId::generate();
        let submitted = MovementEvent::Submitted(MovementSubmitted {
            tenant_id: f.tenant,
            movement_id: id,
            occurred_at: Utc::now(),
        });
        let done = f.completed(id, dec!(3), (2025, 1, 2), None);

        f.journal.apply_envelope(&f.envelope(id, 1, &submitted)).unwrap();
        assert!(f.journal.entry(f.tenant, id).is_none());
        f.journal.apply_envelope(&f.envelope(id, 2, &done)).unwrap();
        f.journal.apply_envelope(&f.envelope(id, 2, &done)).unwrap();
        assert_eq!(f.journal.entries(f.tenant).len(), 1);

        let other = MovementId::generate();
        let err = f
            .journal
            .apply_envelope(&f.envelope(other, 3, &f.completed(other, dec!(1), (2025, 1, 3), None)))
            .unwrap_err();
        assert!(matches!(err, ReadModelError::NonMonotonicSequence { last: 0, found: 3 }));
    }

    #[test]
    fn reversals_are_indexed() {
        let f = Fixture::new();
        let original = f.post(dec!(7), (2025, 1, 5));
        let reversal = MovementId::generate();
        let ev = f.completed(reversal, dec!(-7), (2025, 1, 6), Some(original));
        f.journal.apply_envelope(&f.envelope(reversal, 1, &ev)).unwrap();

        assert!(f.journal.is_reversed(f.tenant, original));
        assert_eq!(f.journal.reversed_by(f.tenant, original), Some(reversal));
        assert!(!f.journal.is_reversed(f.tenant, reversal));
    }

    #[test]
    fn foreign_tenant_payload_is_refused() {
        let f = Fixture::new();
        let id = MovementId::generate();
        let ev = f.completed(id, dec!(1), (2025, 1, 1), None);
        let envelope = EventEnvelope::new(
            Uuid::now_v7(),
            TenantId::new(),
            id.aggregate_id(),
            MOVEMENT_AGGREGATE,
            1,
            serde_json::to_value(&ev).unwrap(),
        );
        assert!(matches!(
            f.journal.apply_envelope(&envelope),
            Err(ReadModelError::TenantIsolation(_))
        ));

        let unrelated = EventEnvelope::new(
            Uuid::now_v7(),
            f.tenant,
            AggregateId::new(),
            "closures.closure",
            1,
            JsonValue::Null,
        );
        assert!(f.journal.apply_envelope(&unrelated).is_ok());
    }
}
