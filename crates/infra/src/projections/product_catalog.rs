use std::sync::Mutex;

use serde_json::Value as JsonValue;

use bodega_catalog::{
    ProductEvent, ProductId, ProductPricing, ProductStatus, StockThresholds, ValuationMethod,
};
use bodega_core::TenantId;
use bodega_events::EventEnvelope;

use crate::event_store::StoredEvent;
use crate::projections::cursor::{ReadModelError, StreamCursors};
use crate::read_model::{InMemoryTenantStore, TenantStore};

pub const PRODUCT_AGGREGATE: &str = "catalog.product";

/// Queryable product snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductSnapshot {
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub unit: String,
    pub valuation: ValuationMethod,
    pub thresholds: StockThresholds,
    pub pricing: ProductPricing,
    pub tracks_lots: bool,
    pub tracks_expiration: bool,
    pub status: ProductStatus,
}

#[derive(Debug)]
pub struct ProductCatalogProjection<S = InMemoryTenantStore<ProductId, ProductSnapshot>>
where
    S: TenantStore<ProductId, ProductSnapshot>,
{
    store: S,
    cursors: Mutex<StreamCursors>,
}

impl ProductCatalogProjection {
    pub fn in_memory() -> Self {
        Self::new(InMemoryTenantStore::new())
    }
}

impl<S> ProductCatalogProjection<S>
where
    S: TenantStore<ProductId, ProductSnapshot>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: Mutex::new(StreamCursors::new()),
        }
    }

    pub fn get(&self, tenant_id: TenantId, product_id: ProductId) -> Option<ProductSnapshot> {
        self.store.get(tenant_id, &product_id)
    }

    /// Products ordered by SKU.
    pub fn list(&self, tenant_id: TenantId) -> Vec<ProductSnapshot> {
        let mut all = self.store.list(tenant_id);
        all.sort_by(|a, b| a.sku.cmp(&b.sku));
        all
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ReadModelError> {
        if envelope.aggregate_type() != PRODUCT_AGGREGATE {
            return Ok(());
        }
        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let mut cursors = self.cursors.lock().map_err(|_| ReadModelError::Poisoned)?;
        if !cursors.should_apply(tenant_id, aggregate_id, seq)? {
            return Ok(());
        }

        let ev: ProductEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ReadModelError::Deserialize(e.to_string()))?;
        if ev.tenant_id() != tenant_id {
            return Err(ReadModelError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }
        let product_id = ev.product_id();
        if product_id.aggregate_id() != aggregate_id {
            return Err(ReadModelError::TenantIsolation(
                "event product_id does not match envelope aggregate_id".to_string(),
            ));
        }

        let updated = match ev {
            ProductEvent::ProductCreated(e) => Some(ProductSnapshot {
                product_id,
                sku: e.sku,
                name: e.name,
                unit: e.unit,
                valuation: e.valuation,
                thresholds: e.thresholds,
                pricing: e.pricing,
                tracks_lots: e.tracks_lots,
                tracks_expiration: e.tracks_expiration,
                status: ProductStatus::Active,
            }),
            ProductEvent::PricingUpdated(e) => self
                .store
                .get(tenant_id, &product_id)
                .map(|s| ProductSnapshot { pricing: e.pricing, ..s }),
            ProductEvent::ThresholdsUpdated(e) => self
                .store
                .get(tenant_id, &product_id)
                .map(|s| ProductSnapshot { thresholds: e.thresholds, ..s }),
            ProductEvent::ProductDeactivated(_) => self
                .store
                .get(tenant_id, &product_id)
                .map(|s| ProductSnapshot { status: ProductStatus::Inactive, ..s }),
            ProductEvent::ProductActivated(_) => self
                .store
                .get(tenant_id, &product_id)
                .map(|s| ProductSnapshot { status: ProductStatus::Active, ..s }),
        };
        if let Some(snapshot) = updated {
            self.store.upsert(tenant_id, product_id, snapshot);
        }

        cursors.advance(tenant_id, aggregate_id, seq);
        Ok(())
    }

    pub fn apply_stored(&self, events: &[StoredEvent]) -> Result<(), ReadModelError> {
        events
            .iter()
            .try_for_each(|e| self.apply_envelope(&e.to_envelope()))
    }
}
