//! Command execution pipeline for event-sourced aggregates.
//!
//! ```text
//! command
//!   → load stream (tenant-scoped)
//!   → rehydrate aggregate
//!   → handle (pure, produces events)
//!   → append (optimistic concurrency)
//!   → publish to the bus
//! ```
//!
//! Events are appended before they are published. A publish failure after a
//! successful append leaves the events persisted; projections catch up by
//! replaying the store.

use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use bodega_core::{Aggregate, AggregateId, DomainError, ExpectedVersion, TenantId};
use bodega_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// The stream moved between load and append.
    #[error("concurrency conflict: {0}")]
    Concurrency(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("not found")]
    NotFound,

    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: Decimal, available: Decimal },

    #[error("cannot {action} while {state}")]
    StateTransition { state: String, action: String },

    /// A stored payload no longer matches the aggregate's event type.
    #[error("failed to deserialize stored event: {0}")]
    Deserialize(String),

    #[error(transparent)]
    Store(EventStoreError),

    /// Publication failed after the append succeeded.
    #[error("publish failed: {0}")]
    Publish(String),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg),
            EventStoreError::TenantIsolation(msg) => DispatchError::TenantIsolation(msg),
            other => DispatchError::Store(other),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => {
                DispatchError::Validation(msg)
            }
            DomainError::InvariantViolation(msg) => DispatchError::InvariantViolation(msg),
            DomainError::Conflict(msg) => DispatchError::Concurrency(msg),
            DomainError::NotFound => DispatchError::NotFound,
            DomainError::InsufficientStock {
                requested,
                available,
            } => DispatchError::InsufficientStock {
                requested,
                available,
            },
            DomainError::StateTransition { state, action } => {
                DispatchError::StateTransition { state, action }
            }
        }
    }
}

/// Runs commands against aggregates stored in `S` and publishes the
/// resulting events on `B`.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Rebuild an aggregate from its stream without handling a command.
    ///
    /// A missing stream yields the fresh aggregate from `make_aggregate`.
    pub fn load<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(tenant_id, aggregate_id)?;
        validate_loaded_stream(tenant_id, aggregate_id, &history)?;

        let mut aggregate = make_aggregate(tenant_id, aggregate_id);
        apply_history(&mut aggregate, &history)?;
        Ok(aggregate)
    }

    /// Load, handle, append and publish.
    ///
    /// Returns the committed events; an empty vector means the aggregate
    /// decided nothing changed.
    pub fn dispatch<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        command: A::Command,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: bodega_events::Event + Serialize + DeserializeOwned,
    {
        let history = self.store.load_stream(tenant_id, aggregate_id)?;
        validate_loaded_stream(tenant_id, aggregate_id, &history)?;
        let expected = ExpectedVersion::Exact(stream_version(&history));

        let mut aggregate = make_aggregate(tenant_id, aggregate_id);
        apply_history(&mut aggregate, &history)?;

        let decided = aggregate.handle(&command)?;
        if decided.is_empty() {
            return Ok(vec![]);
        }

        let aggregate_type = aggregate_type.into();
        let uncommitted = decided
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(
                    tenant_id,
                    aggregate_id,
                    aggregate_type.clone(),
                    Uuid::now_v7(),
                    ev,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, expected)?;

        for stored in &committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }

        Ok(committed)
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(
    tenant_id: TenantId,
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.tenant_id != tenant_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream holds another tenant's event at index {idx}"
            )));
        }
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream holds another aggregate's event at index {idx}"
            )));
        }
        if e.sequence_number != last + 1 {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "sequence gap in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let ev: A::Event = serde_json::from_value(stored.payload.clone())
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use bodega_catalog::{Product, ProductCommand, ProductId, ValuationMethod};
    use bodega_events::InMemoryEventBus;
    use chrono::Utc;

    use crate::event_store::InMemoryEventStore;

    type Dispatcher =
        CommandDispatcher<Arc<InMemoryEventStore>, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>;

    fn dispatcher() -> Dispatcher {
        CommandDispatcher::new(
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemoryEventBus::new()),
        )
    }

    fn create(tenant_id: TenantId, product_id: ProductId) -> ProductCommand {
        ProductCommand::CreateProduct(bodega_catalog::CreateProduct {
            tenant_id,
            product_id,
            sku: "ARZ-001".to_string(),
            name: "Arroz blanco 1 lb".to_string(),
            unit: "lb".to_string(),
            valuation: ValuationMethod::Average,
            thresholds: bodega_catalog::StockThresholds::none(),
            pricing: Default::default(),
            tracks_lots: false,
            tracks_expiration: false,
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn dispatch_persists_and_publishes() {
        let d = dispatcher();
        let sub = d.bus().subscribe();
        let tenant = TenantId::new();
        let product = ProductId::generate();

        let committed = d
            .dispatch(
                tenant,
                product.aggregate_id(),
                "catalog.product",
                create(tenant, product),
                |_, id| Product::empty(ProductId::new(id)),
            )
            .unwrap();

        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].sequence_number, 1);
        let published = sub.try_recv().unwrap();
        assert_eq!(published.aggregate_type(), "catalog.product");

        let loaded: Product = d
            .load(tenant, product.aggregate_id(), |_, id| {
                Product::empty(ProductId::new(id))
            })
            .unwrap();
        assert!(loaded.exists());
        assert_eq!(loaded.sku(), "ARZ-001");
    }

    #[test]
    fn domain_errors_keep_their_shape() {
        let d = dispatcher();
        let tenant = TenantId::new();
        let product = ProductId::generate();
        d.dispatch(
            tenant,
            product.aggregate_id(),
            "catalog.product",
            create(tenant, product),
            |_, id| Product::empty(ProductId::new(id)),
        )
        .unwrap();

        let err = d
            .dispatch(
                tenant,
                product.aggregate_id(),
                "catalog.product",
                create(tenant, product),
                |_, id| Product::empty(ProductId::new(id)),
            )
            .unwrap_err();
        assert!(matches!(err, DispatchError::Concurrency(_)));
    }

    #[test]
    fn other_tenants_see_an_empty_stream() {
        let d = dispatcher();
        let tenant = TenantId::new();
        let product = ProductId::generate();
        d.dispatch(
            tenant,
            product.aggregate_id(),
            "catalog.product",
            create(tenant, product),
            |_, id| Product::empty(ProductId::new(id)),
        )
        .unwrap();

        let other: Product = d
            .load(TenantId::new(), product.aggregate_id(), |_, id| {
                Product::empty(ProductId::new(id))
            })
            .unwrap();
        assert!(!other.exists());
    }
}
