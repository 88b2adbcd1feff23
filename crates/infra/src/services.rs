//! Wiring of the in-process service graph.

use std::io;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::info;

use bodega_core::TenantId;
use bodega_events::{EventEnvelope, InMemoryEventBus};

use crate::catalog::Catalog;
use crate::closure_engine::ClosureEngine;
use crate::command_dispatcher::CommandDispatcher;
use crate::config::BodegaConfig;
use crate::error::ServiceResult;
use crate::event_store::{EventStore, InMemoryEventStore};
use crate::ledger::InventoryLedger;
use crate::ledger_store::InMemoryLedgerStore;
use crate::period_lock::PeriodLocks;
use crate::projections::{MOVEMENT_AGGREGATE, MovementJournalProjection};
use crate::recorder::MovementRecorder;
use crate::sequencer::ReferenceSequencer;
use crate::workers::{ProjectionWorker, WorkerHandle};

pub type EnvelopeBus = InMemoryEventBus<EventEnvelope<JsonValue>>;
pub type Store = Arc<InMemoryEventStore>;
pub type Bus = Arc<EnvelopeBus>;
pub type Ledger = InventoryLedger<Arc<InMemoryLedgerStore>>;

/// Every service sharing one event store, bus, ledger and lock table.
#[derive(Debug)]
pub struct BodegaServices {
    config: BodegaConfig,
    store: Store,
    bus: Bus,
    pub catalog: Arc<Catalog<Store, Bus>>,
    pub ledger: Arc<Ledger>,
    pub recorder: MovementRecorder<Store, Bus, Arc<InMemoryLedgerStore>>,
    pub closures: ClosureEngine<Store, Bus>,
    pub journal: Arc<MovementJournalProjection>,
}

impl BodegaServices {
    pub fn in_memory(config: BodegaConfig) -> Self {
        let store: Store = Arc::new(InMemoryEventStore::new());
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let dispatcher = Arc::new(CommandDispatcher::new(Arc::clone(&store), Arc::clone(&bus)));

        let catalog = Arc::new(Catalog::new(Arc::clone(&dispatcher)));
        let ledger = Arc::new(InventoryLedger::new(
            Arc::new(InMemoryLedgerStore::new()),
            config.ledger.negative_stock,
            config.ledger.max_retries,
        ));
        let journal = Arc::new(MovementJournalProjection::in_memory());
        let locks = Arc::new(PeriodLocks::new());
        let sequencer = Arc::new(ReferenceSequencer::new(config.references.sequence_width));

        let recorder = MovementRecorder::new(
            Arc::clone(&dispatcher),
            Arc::clone(&catalog),
            Arc::clone(&ledger),
            Arc::clone(&journal),
            sequencer,
            Arc::clone(&locks),
        );
        let closures = ClosureEngine::new(
            dispatcher,
            Arc::clone(&journal),
            locks,
            config.closure.discrepancy_epsilon,
        );

        info!(
            environment = %config.environment,
            negative_stock = ?config.ledger.negative_stock,
            max_retries = config.ledger.max_retries,
            "bodega services ready"
        );
        Self {
            config,
            store,
            bus,
            catalog,
            ledger,
            recorder,
            closures,
            journal,
        }
    }

    pub fn config(&self) -> &BodegaConfig {
        &self.config
    }

    pub fn event_store(&self) -> &InMemoryEventStore {
        &self.store
    }

    /// Keep the movement journal fed from the bus on a background thread.
    ///
    /// Services already feed the journal inline; redelivered events are
    /// skipped by its cursors, so running both is safe.
    pub fn spawn_journal_worker(&self, tenant_id: Option<TenantId>) -> io::Result<WorkerHandle> {
        let journal = Arc::clone(&self.journal);
        ProjectionWorker::spawn(
            "movement-journal",
            &self.bus,
            tenant_id,
            move |envelope: EventEnvelope<JsonValue>| journal.apply_envelope(&envelope),
        )
    }

    /// Drop and replay one tenant's movement journal from the event store.
    pub fn rebuild_journal(&self, tenant_id: TenantId) -> ServiceResult<usize> {
        let events = self.store.load_by_type(tenant_id, MOVEMENT_AGGREGATE)?;
        let replayed = events.len();
        self.journal.rebuild_tenant(tenant_id, events)?;
        info!(tenant_id = %tenant_id, events = replayed, "movement journal rebuilt");
        Ok(replayed)
    }
}
