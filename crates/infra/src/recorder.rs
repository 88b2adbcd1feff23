//! Movement recording: validation, reference numbers, the approval flow and
//! posting to the inventory ledger.
//!
//! ```text
//! record ─► Draft ─► Pending ─┬─► (needs approval) return
//!                             └─► Approved ─► ledger.apply ─► Completed
//!                                                  │
//!                                                  └─ refused ─► Rejected
//! ```
//!
//! Posting, cancelling and rejecting a movement each hold a claim on its id,
//! so a movement cannot be cancelled between reaching the ledger and being
//! completed. Once the ledger holds a movement's receipt only completion is
//! left: cancel and reject are refused, and `retry_posting` completes it
//! from the receipt.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use bodega_catalog::{Product, ProductId, Warehouse, WarehouseId};
use bodega_core::{Period, TenantId, UserId};
use bodega_events::{EventBus, EventEnvelope};
use bodega_inventory::{InventoryKey, LotPlan, pick_lots};
use bodega_movements::{
    ApproveMovement, CancelMovement, CompleteMovement, Direction, Movement, MovementCommand,
    MovementId, MovementReferences, MovementStatus, MovementType, ReasonCatalog, RecordMovement,
    ReferenceNumber, RejectMovement, SubmitMovement, TransferId,
};

use crate::catalog::Catalog;
use crate::command_dispatcher::CommandDispatcher;
use crate::error::{ServiceError, ServiceResult};
use crate::event_store::EventStore;
use crate::ledger::{InventoryLedger, LedgerError};
use crate::ledger_store::LedgerStore;
use crate::period_lock::{PeriodLocks, PostingGuard};
use crate::projections::{MOVEMENT_AGGREGATE, MovementJournalProjection};
use crate::sequencer::ReferenceSequencer;

/// A movement as entered by an operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovementRequest {
    pub movement_type: MovementType,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub lot_number: Option<String>,
    pub expiration_date: Option<NaiveDate>,
    /// Signed ledger delta: positive for inbound types, negative for outbound.
    pub quantity: Decimal,
    /// Defaults to the product's standard cost (inbound) or the row's
    /// current cost (outbound). Outbound stock always leaves at the row's
    /// cost; the journal values it with what the ledger applied.
    pub unit_cost: Option<Decimal>,
    pub reason_code: String,
    pub references: MovementReferences,
    pub occurred_at: DateTime<Utc>,
    pub recorded_by: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub product_id: ProductId,
    pub from: WarehouseId,
    pub to: WarehouseId,
    pub lot_number: Option<String>,
    /// Positive quantity to move.
    pub quantity: Decimal,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub requested_by: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    pub transfer_id: TransferId,
    pub reference: ReferenceNumber,
    pub outgoing: Movement,
    pub incoming: Movement,
    pub moved: Decimal,
    /// Requested quantity the source could not supply (clamp policy).
    pub shortfall: Decimal,
}

const TRANSFER_OUT_REASON: &str = "TRASLADO_SALIDA";
const TRANSFER_IN_REASON: &str = "TRASLADO_ENTRADA";

#[derive(Debug)]
pub struct MovementRecorder<S, B, L> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    catalog: Arc<Catalog<S, B>>,
    ledger: Arc<InventoryLedger<L>>,
    journal: Arc<MovementJournalProjection>,
    sequencer: Arc<ReferenceSequencer>,
    locks: Arc<PeriodLocks>,
    claims: Mutex<HashSet<(TenantId, MovementId)>>,
}

impl<S, B, L> MovementRecorder<S, B, L>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    L: LedgerStore,
{
    pub fn new(
        dispatcher: Arc<CommandDispatcher<S, B>>,
        catalog: Arc<Catalog<S, B>>,
        ledger: Arc<InventoryLedger<L>>,
        journal: Arc<MovementJournalProjection>,
        sequencer: Arc<ReferenceSequencer>,
        locks: Arc<PeriodLocks>,
    ) -> Self {
        Self {
            dispatcher,
            catalog,
            ledger,
            journal,
            sequencer,
            locks,
            claims: Mutex::new(HashSet::new()),
        }
    }

    /// Validate, number and persist a movement, then post it unless its
    /// reason requires approval.
    pub fn record(&self, tenant_id: TenantId, request: MovementRequest) -> ServiceResult<Movement> {
        let product = self.check_product(tenant_id, request.product_id)?;
        let warehouse = self.check_warehouse(tenant_id, request.warehouse_id, request.movement_type)?;
        if request.movement_type.is_transfer() {
            return Err(ServiceError::validation(
                "transfer legs are recorded through transfer()",
            ));
        }
        let lot_number = normalized_lot(request.lot_number.as_deref());
        self.check_lot(&product, &warehouse, lot_number.as_deref())?;

        let key = InventoryKey::new(request.product_id, request.warehouse_id, lot_number.as_deref());
        let existing = self.ledger.balance(tenant_id, &key)?;
        if request.movement_type.is_inbound()
            && product.tracks_expiration()
            && request.expiration_date.is_none()
            && existing.as_ref().is_none_or(|r| r.expiration_date.is_none())
        {
            return Err(ServiceError::validation(format!(
                "product {} requires an expiration date for new lots",
                product.sku()
            )));
        }

        let reasons = self.catalog.reasons(tenant_id)?;
        let reason = reasons.validate(&request.reason_code, request.movement_type, &request.references)?;
        let requires_approval = reason.requires_approval;

        let unit_cost = match (request.unit_cost, request.movement_type.direction()) {
            (Some(cost), _) => cost,
            (None, Direction::Inbound) => product.pricing().unit_cost,
            (None, Direction::Outbound) => existing.map(|r| r.unit_cost).unwrap_or(Decimal::ZERO),
        };

        let _posting = self.begin_posting(tenant_id, request.warehouse_id, request.occurred_at)?;
        let reference =
            self.sequencer
                .next(tenant_id, request.movement_type, request.occurred_at.date_naive())?;
        let movement_id = MovementId::generate();

        self.open_movement(
            tenant_id,
            RecordMovement {
                tenant_id,
                movement_id,
                movement_type: request.movement_type,
                product_id: request.product_id,
                warehouse_id: request.warehouse_id,
                lot_number,
                expiration_date: request.expiration_date,
                quantity: request.quantity,
                unit_cost,
                reference: reference.clone(),
                reason_code: request.reason_code,
                references: request.references,
                transfer_id: None,
                reverses: None,
                recorded_by: request.recorded_by,
                occurred_at: request.occurred_at,
                recorded_at: Utc::now(),
            },
        )?;
        info!(
            tenant_id = %tenant_id,
            movement_id = %movement_id,
            reference = %reference,
            movement_type = %request.movement_type,
            "movement recorded"
        );

        if requires_approval {
            return self.movement(tenant_id, movement_id);
        }
        self.send(
            tenant_id,
            movement_id,
            MovementCommand::Approve(ApproveMovement {
                tenant_id,
                movement_id,
                approved_by: request.recorded_by,
                occurred_at: Utc::now(),
            }),
        )?;
        self.post(tenant_id, movement_id, &product)
    }

    /// Approve a pending movement and post it.
    pub fn approve(
        &self,
        tenant_id: TenantId,
        movement_id: MovementId,
        approved_by: UserId,
    ) -> ServiceResult<Movement> {
        let movement = self.movement(tenant_id, movement_id)?;
        if movement.status() != MovementStatus::Pending {
            return Err(ServiceError::StateTransition {
                state: movement.status().to_string(),
                action: "approve".to_string(),
            });
        }
        let (product_id, warehouse_id, occurred_at) = details(&movement)?;
        let product = self.check_product(tenant_id, product_id)?;
        let _posting = self.begin_posting(tenant_id, warehouse_id, occurred_at)?;

        self.send(
            tenant_id,
            movement_id,
            MovementCommand::Approve(ApproveMovement {
                tenant_id,
                movement_id,
                approved_by,
                occurred_at: Utc::now(),
            }),
        )?;
        info!(tenant_id = %tenant_id, movement_id = %movement_id, approved_by = %approved_by, "movement approved");
        self.post(tenant_id, movement_id, &product)
    }

    /// Finish an approved movement that a previous attempt left behind,
    /// either before the ledger (lost a race) or after it (completion
    /// failed). A movement already on the ledger is completed from its
    /// receipt without touching the row again.
    pub fn retry_posting(&self, tenant_id: TenantId, movement_id: MovementId) -> ServiceResult<Movement> {
        let movement = self.movement(tenant_id, movement_id)?;
        if movement.status() != MovementStatus::Approved {
            return Err(ServiceError::StateTransition {
                state: movement.status().to_string(),
                action: "post".to_string(),
            });
        }
        let (product_id, warehouse_id, occurred_at) = details(&movement)?;
        let _posting = self.begin_posting(tenant_id, warehouse_id, occurred_at)?;

        if movement.movement_type().is_some_and(MovementType::is_transfer) {
            // Legs are posted together by transfer(); only completion is retried.
            let _claim = self.claim(tenant_id, movement_id)?;
            let receipt = self.ledger.receipt(tenant_id, movement_id)?.ok_or_else(|| {
                ServiceError::StateTransition {
                    state: movement.status().to_string(),
                    action: "post a transfer leg outside its transfer".to_string(),
                }
            })?;
            self.complete(tenant_id, movement_id, receipt.applied_quantity, receipt.value_change, Utc::now())?;
            info!(tenant_id = %tenant_id, movement_id = %movement_id, "transfer leg completed from its receipt");
            return self.movement(tenant_id, movement_id);
        }

        let product = self.catalog.product(tenant_id, product_id)?;
        self.post(tenant_id, movement_id, &product)
    }

    pub fn reject(
        &self,
        tenant_id: TenantId,
        movement_id: MovementId,
        reason: &str,
    ) -> ServiceResult<Movement> {
        let _claim = self.claim(tenant_id, movement_id)?;
        self.ensure_off_ledger(tenant_id, movement_id, "reject")?;
        self.send(
            tenant_id,
            movement_id,
            MovementCommand::Reject(RejectMovement {
                tenant_id,
                movement_id,
                reason: reason.to_string(),
                occurred_at: Utc::now(),
            }),
        )?;
        info!(tenant_id = %tenant_id, movement_id = %movement_id, reason, "movement rejected");
        self.movement(tenant_id, movement_id)
    }

    pub fn cancel(
        &self,
        tenant_id: TenantId,
        movement_id: MovementId,
        reason: &str,
    ) -> ServiceResult<Movement> {
        let _claim = self.claim(tenant_id, movement_id)?;
        self.ensure_off_ledger(tenant_id, movement_id, "cancel")?;
        self.send(
            tenant_id,
            movement_id,
            MovementCommand::Cancel(CancelMovement {
                tenant_id,
                movement_id,
                reason: reason.to_string(),
                occurred_at: Utc::now(),
            }),
        )?;
        info!(tenant_id = %tenant_id, movement_id = %movement_id, reason, "movement cancelled");
        self.movement(tenant_id, movement_id)
    }

    /// Move stock between two warehouses: two legs, one reference, one
    /// ledger commit.
    pub fn transfer(&self, tenant_id: TenantId, request: TransferRequest) -> ServiceResult<TransferOutcome> {
        if request.from == request.to {
            return Err(ServiceError::validation(
                "source and destination warehouse must differ",
            ));
        }
        if request.quantity <= Decimal::ZERO {
            return Err(ServiceError::validation("transfer quantity must be positive"));
        }
        let product = self.check_product(tenant_id, request.product_id)?;
        let source = self.check_warehouse(tenant_id, request.from, MovementType::TransferOut)?;
        let destination = self.check_warehouse(tenant_id, request.to, MovementType::TransferIn)?;
        let lot_number = normalized_lot(request.lot_number.as_deref());
        self.check_lot(&product, &source, lot_number.as_deref())?;
        self.check_lot(&product, &destination, lot_number.as_deref())?;

        let source_key = InventoryKey::new(request.product_id, request.from, lot_number.as_deref());
        let source_row = self.ledger.balance(tenant_id, &source_key)?;
        let unit_cost = source_row.as_ref().map(|r| r.unit_cost).unwrap_or(Decimal::ZERO);
        let expiration_date = source_row.and_then(|r| r.expiration_date);

        let _out_guard = self.begin_posting(tenant_id, request.from, request.occurred_at)?;
        let _in_guard = self.begin_posting(tenant_id, request.to, request.occurred_at)?;

        let reference =
            self.sequencer
                .next(tenant_id, MovementType::TransferOut, request.occurred_at.date_naive())?;
        let transfer_id = TransferId::generate();
        let references = MovementReferences {
            document_number: Some(reference.to_string()),
            notes: request.notes.clone(),
            ..MovementReferences::default()
        };

        let legs = [
            (MovementType::TransferOut, request.from, -request.quantity, TRANSFER_OUT_REASON),
            (MovementType::TransferIn, request.to, request.quantity, TRANSFER_IN_REASON),
        ];
        let mut ids = Vec::with_capacity(2);
        let mut claims = Vec::with_capacity(2);
        for (movement_type, warehouse_id, quantity, reason_code) in legs {
            let movement_id = MovementId::generate();
            claims.push(self.claim(tenant_id, movement_id)?);
            let opened = self.open_movement(
                tenant_id,
                RecordMovement {
                    tenant_id,
                    movement_id,
                    movement_type,
                    product_id: request.product_id,
                    warehouse_id,
                    lot_number: lot_number.clone(),
                    expiration_date,
                    quantity,
                    unit_cost,
                    reference: reference.clone(),
                    reason_code: reason_code.to_string(),
                    references: references.clone(),
                    transfer_id: Some(transfer_id),
                    reverses: None,
                    recorded_by: request.requested_by,
                    occurred_at: request.occurred_at,
                    recorded_at: Utc::now(),
                },
            );
            if let Err(err) = opened {
                self.abandon_legs(tenant_id, transfer_id, &ids);
                return Err(err);
            }
            ids.push(movement_id);
            let approved = self.send(
                tenant_id,
                movement_id,
                MovementCommand::Approve(ApproveMovement {
                    tenant_id,
                    movement_id,
                    approved_by: request.requested_by,
                    occurred_at: Utc::now(),
                }),
            );
            if let Err(err) = approved {
                self.abandon_legs(tenant_id, transfer_id, &ids);
                return Err(err);
            }
        }
        let (out_id, in_id) = (ids[0], ids[1]);

        let outgoing = self.movement(tenant_id, out_id)?;
        let incoming = self.movement(tenant_id, in_id)?;
        let posting = match self
            .ledger
            .apply_transfer(tenant_id, &outgoing, &incoming, product.valuation())
        {
            Ok(posting) => posting,
            Err(err) => return Err(self.refuse(tenant_id, &[out_id, in_id], err)),
        };

        let out_confirmed = Utc::now();
        let in_confirmed = Utc::now().max(out_confirmed + Duration::microseconds(1));
        for (movement_id, applied_quantity, applied_value, confirmed_at) in [
            (out_id, -posting.moved, posting.source_value_change, out_confirmed),
            (in_id, posting.moved, posting.destination_value_change, in_confirmed),
        ] {
            self.complete(tenant_id, movement_id, applied_quantity, applied_value, confirmed_at)?;
        }
        drop(claims);
        info!(
            tenant_id = %tenant_id,
            transfer_id = %transfer_id,
            reference = %reference,
            from = %request.from,
            to = %request.to,
            moved = %posting.moved,
            "transfer posted"
        );

        Ok(TransferOutcome {
            transfer_id,
            reference,
            outgoing: self.movement(tenant_id, out_id)?,
            incoming: self.movement(tenant_id, in_id)?,
            moved: posting.moved,
            shortfall: posting.shortfall,
        })
    }

    /// Record and post the compensating movement of a completed one,
    /// dated now.
    pub fn reverse(
        &self,
        tenant_id: TenantId,
        movement_id: MovementId,
        reason: &str,
        actor: UserId,
    ) -> ServiceResult<Movement> {
        self.reverse_at(tenant_id, movement_id, reason, actor, Utc::now())
    }

    /// Like [`reverse`](Self::reverse), dated `occurred_at`. The date must
    /// not precede the original's and its period must be open.
    pub fn reverse_at(
        &self,
        tenant_id: TenantId,
        movement_id: MovementId,
        reason: &str,
        actor: UserId,
        occurred_at: DateTime<Utc>,
    ) -> ServiceResult<Movement> {
        let original = self.movement(tenant_id, movement_id)?;
        if original.status() != MovementStatus::Completed {
            return Err(ServiceError::StateTransition {
                state: original.status().to_string(),
                action: "reverse".to_string(),
            });
        }
        if original.reverses().is_some() {
            return Err(ServiceError::validation("a reversal cannot be reversed"));
        }
        if self.journal.is_reversed(tenant_id, movement_id) {
            return Err(ServiceError::Duplicate(format!(
                "movement {movement_id} is already reversed"
            )));
        }
        let original_type = original
            .movement_type()
            .ok_or_else(|| ServiceError::Invariant("movement without a type".into()))?;
        let reversal_type = original_type.reversal_type().ok_or_else(|| {
            ServiceError::validation("transfer legs are corrected with a new transfer")
        })?;
        let reason_code = ReasonCatalog::reversal_code(reversal_type)
            .ok_or_else(|| ServiceError::Invariant(format!("no reversal reason for {reversal_type}")))?;
        let applied = original.applied_quantity().unwrap_or(original.quantity());
        if applied.is_zero() {
            return Err(ServiceError::validation("nothing reached the ledger to reverse"));
        }
        let (product_id, warehouse_id, original_at) = details(&original)?;
        if occurred_at < original_at {
            return Err(ServiceError::validation(
                "a reversal cannot be dated before the movement it reverses",
            ));
        }
        let product = self.check_product(tenant_id, product_id)?;

        let _posting = self.begin_posting(tenant_id, warehouse_id, occurred_at)?;
        let reference = self
            .sequencer
            .next(tenant_id, reversal_type, occurred_at.date_naive())?;
        let reversal_id = MovementId::generate();
        let original_reference = original.reference().map(ToString::to_string);

        self.open_movement(
            tenant_id,
            RecordMovement {
                tenant_id,
                movement_id: reversal_id,
                movement_type: reversal_type,
                product_id,
                warehouse_id,
                lot_number: original.lot_number().map(str::to_string),
                expiration_date: original.expiration_date(),
                quantity: -applied,
                unit_cost: original.posted_unit_cost().unwrap_or(original.unit_cost()),
                reference: reference.clone(),
                reason_code: reason_code.to_string(),
                references: MovementReferences {
                    document_number: original_reference.clone(),
                    notes: Some(reason.to_string()),
                    ..MovementReferences::default()
                },
                transfer_id: None,
                reverses: Some(movement_id),
                recorded_by: actor,
                occurred_at,
                recorded_at: Utc::now(),
            },
        )?;
        self.send(
            tenant_id,
            reversal_id,
            MovementCommand::Approve(ApproveMovement {
                tenant_id,
                movement_id: reversal_id,
                approved_by: actor,
                occurred_at: Utc::now(),
            }),
        )?;
        info!(
            tenant_id = %tenant_id,
            movement_id = %reversal_id,
            reverses = %movement_id,
            reference = %reference,
            original = original_reference.as_deref().unwrap_or("-"),
            "reversal recorded"
        );
        self.post(tenant_id, reversal_id, &product)
    }

    /// Rehydrate a movement from its stream.
    pub fn movement(&self, tenant_id: TenantId, movement_id: MovementId) -> ServiceResult<Movement> {
        let movement: Movement = self
            .dispatcher
            .load(tenant_id, movement_id.aggregate_id(), |_, id| {
                Movement::empty(MovementId::new(id))
            })?;
        if !movement.exists() {
            return Err(ServiceError::not_found(format!("movement {movement_id}")));
        }
        Ok(movement)
    }

    /// Lots an outbound movement of `quantity` should draw from, in the
    /// warehouse's rotation order.
    pub fn suggest_lots(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        warehouse_id: WarehouseId,
        quantity: Decimal,
    ) -> ServiceResult<LotPlan> {
        let warehouse = self.catalog.warehouse(tenant_id, warehouse_id)?;
        let rows: Vec<_> = self
            .ledger
            .warehouse_balances(tenant_id, warehouse_id)?
            .into_iter()
            .filter(|r| r.key.product_id == product_id)
            .collect();
        Ok(pick_lots(&rows, quantity, warehouse.settings.rotation))
    }

    fn open_movement(&self, tenant_id: TenantId, record: RecordMovement) -> ServiceResult<()> {
        let movement_id = record.movement_id;
        self.send(tenant_id, movement_id, MovementCommand::Record(record))?;
        self.send(
            tenant_id,
            movement_id,
            MovementCommand::Submit(SubmitMovement {
                tenant_id,
                movement_id,
                occurred_at: Utc::now(),
            }),
        )
    }

    fn send(&self, tenant_id: TenantId, movement_id: MovementId, command: MovementCommand) -> ServiceResult<()> {
        let committed = self.dispatcher.dispatch(
            tenant_id,
            movement_id.aggregate_id(),
            MOVEMENT_AGGREGATE,
            command,
            |_, id| Movement::empty(MovementId::new(id)),
        )?;
        self.journal.apply_stored(&committed)?;
        Ok(())
    }

    /// Apply an approved movement to the ledger and complete it.
    fn post(&self, tenant_id: TenantId, movement_id: MovementId, product: &Product) -> ServiceResult<Movement> {
        let _claim = self.claim(tenant_id, movement_id)?;
        let movement = self.movement(tenant_id, movement_id)?;
        if movement.status() != MovementStatus::Approved {
            return Err(ServiceError::StateTransition {
                state: movement.status().to_string(),
                action: "post".to_string(),
            });
        }
        let posting = match self.ledger.apply(tenant_id, &movement, product.valuation()) {
            Ok(posting) => posting,
            Err(err) => return Err(self.refuse(tenant_id, &[movement_id], err)),
        };

        self.complete(
            tenant_id,
            movement_id,
            posting.applied_quantity,
            posting.value_change,
            Utc::now(),
        )?;
        info!(
            tenant_id = %tenant_id,
            movement_id = %movement_id,
            applied = %posting.applied_quantity,
            value = %posting.value_change,
            balance = %posting.record.quantity,
            replayed = posting.replayed,
            "movement posted"
        );
        self.movement(tenant_id, movement_id)
    }

    fn complete(
        &self,
        tenant_id: TenantId,
        movement_id: MovementId,
        applied_quantity: Decimal,
        applied_value: Decimal,
        confirmed_at: DateTime<Utc>,
    ) -> ServiceResult<()> {
        let completed = self.send(
            tenant_id,
            movement_id,
            MovementCommand::Complete(CompleteMovement {
                tenant_id,
                movement_id,
                applied_quantity,
                applied_value,
                confirmed_at,
                occurred_at: confirmed_at,
            }),
        );
        if let Err(err) = &completed {
            warn!(
                tenant_id = %tenant_id,
                movement_id = %movement_id,
                error = %err,
                "movement is on the ledger but not completed; retry its posting"
            );
        }
        completed
    }

    /// Refuse to cancel or reject a movement whose delta already reached
    /// the ledger.
    fn ensure_off_ledger(&self, tenant_id: TenantId, movement_id: MovementId, action: &str) -> ServiceResult<()> {
        if self.ledger.is_posted(tenant_id, movement_id)? {
            let movement = self.movement(tenant_id, movement_id)?;
            return Err(ServiceError::StateTransition {
                state: movement.status().to_string(),
                action: format!("{action} a movement already on the ledger"),
            });
        }
        Ok(())
    }

    /// Cancel the legs of a transfer that could not be fully opened.
    fn abandon_legs(&self, tenant_id: TenantId, transfer_id: TransferId, movement_ids: &[MovementId]) {
        for movement_id in movement_ids {
            let cancelled = self.send(
                tenant_id,
                *movement_id,
                MovementCommand::Cancel(CancelMovement {
                    tenant_id,
                    movement_id: *movement_id,
                    reason: format!("transfer {transfer_id} could not be opened"),
                    occurred_at: Utc::now(),
                }),
            );
            if let Err(err) = cancelled {
                warn!(tenant_id = %tenant_id, transfer_id = %transfer_id, movement_id = %movement_id, error = %err, "could not cancel transfer leg");
            }
        }
    }

    fn claim(&self, tenant_id: TenantId, movement_id: MovementId) -> ServiceResult<MovementClaim<'_>> {
        let mut held = self
            .claims
            .lock()
            .map_err(|_| ServiceError::Store("movement claim table poisoned".into()))?;
        if !held.insert((tenant_id, movement_id)) {
            return Err(ServiceError::ConcurrencyConflict(format!(
                "movement {movement_id} is being processed"
            )));
        }
        Ok(MovementClaim {
            claims: &self.claims,
            key: (tenant_id, movement_id),
        })
    }

    /// A ledger refusal rejects the movements; conflicts and storage
    /// failures leave them approved for a later retry.
    fn refuse(&self, tenant_id: TenantId, movement_ids: &[MovementId], err: LedgerError) -> ServiceError {
        let refused = matches!(err, LedgerError::Domain(_));
        let err = ServiceError::from(err);
        if !refused {
            warn!(tenant_id = %tenant_id, error = %err, "ledger posting failed, movement left approved");
            return err;
        }
        for movement_id in movement_ids {
            let rejected = self.send(
                tenant_id,
                *movement_id,
                MovementCommand::Reject(RejectMovement {
                    tenant_id,
                    movement_id: *movement_id,
                    reason: err.to_string(),
                    occurred_at: Utc::now(),
                }),
            );
            if let Err(reject_err) = rejected {
                warn!(tenant_id = %tenant_id, movement_id = %movement_id, error = %reject_err, "could not reject refused movement");
            }
        }
        warn!(tenant_id = %tenant_id, error = %err, "ledger refused movement");
        err
    }

    fn begin_posting(
        &self,
        tenant_id: TenantId,
        warehouse_id: WarehouseId,
        occurred_at: DateTime<Utc>,
    ) -> ServiceResult<PostingGuard> {
        self.locks
            .begin_posting(tenant_id, warehouse_id, Period::from_datetime(occurred_at))
    }

    fn check_product(&self, tenant_id: TenantId, product_id: ProductId) -> ServiceResult<Product> {
        let product = self.catalog.product(tenant_id, product_id)?;
        if !product.is_active() {
            return Err(ServiceError::validation(format!(
                "product {} is inactive",
                product.sku()
            )));
        }
        Ok(product)
    }

    fn check_warehouse(
        &self,
        tenant_id: TenantId,
        warehouse_id: WarehouseId,
        movement_type: MovementType,
    ) -> ServiceResult<Warehouse> {
        let warehouse = self.catalog.warehouse(tenant_id, warehouse_id)?;
        if !warehouse.is_active() {
            return Err(ServiceError::validation(format!(
                "warehouse {} is inactive",
                warehouse.code
            )));
        }
        let allowed = match movement_type.direction() {
            Direction::Inbound => warehouse.settings.allows_receiving,
            Direction::Outbound => warehouse.settings.allows_dispatching,
        };
        if !allowed {
            return Err(ServiceError::validation(format!(
                "warehouse {} does not accept {movement_type} movements",
                warehouse.code
            )));
        }
        Ok(warehouse)
    }

    fn check_lot(&self, product: &Product, warehouse: &Warehouse, lot_number: Option<&str>) -> ServiceResult<()> {
        if lot_number.is_none() && (product.tracks_lots() || warehouse.settings.requires_lot_tracking) {
            return Err(ServiceError::validation(format!(
                "a lot number is required for {} in {}",
                product.sku(),
                warehouse.code
            )));
        }
        Ok(())
    }
}

/// Exclusive hold on one movement; released on drop.
#[must_use = "the movement is only claimed while the guard lives"]
struct MovementClaim<'a> {
    claims: &'a Mutex<HashSet<(TenantId, MovementId)>>,
    key: (TenantId, MovementId),
}

impl Drop for MovementClaim<'_> {
    fn drop(&mut self) {
        if let Ok(mut held) = self.claims.lock() {
            held.remove(&self.key);
        }
    }
}

fn normalized_lot(lot: Option<&str>) -> Option<String> {
    lot.map(str::trim).filter(|l| !l.is_empty()).map(str::to_string)
}

fn details(movement: &Movement) -> ServiceResult<(ProductId, WarehouseId, DateTime<Utc>)> {
    match (movement.product_id(), movement.warehouse_id(), movement.occurred_at()) {
        (Some(p), Some(w), Some(at)) => Ok((p, w, at)),
        _ => Err(ServiceError::Invariant(format!(
            "movement {} lost its details",
            movement.id_typed()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    use bodega_catalog::{NegativeStockPolicy, ProductPricing};
    use bodega_core::{AggregateId, ExpectedVersion};
    use bodega_events::InMemoryEventBus;

    use crate::catalog::NewProduct;
    use crate::event_store::{EventStoreError, InMemoryEventStore, StoredEvent, UncommittedEvent};
    use crate::ledger_store::InMemoryLedgerStore;

    /// Event store that refuses appends matching `rule` while `failing` is set.
    struct FailingAppends {
        inner: InMemoryEventStore,
        rule: fn(&UncommittedEvent) -> bool,
        failing: AtomicBool,
    }

    impl EventStore for FailingAppends {
        fn append(
            &self,
            events: Vec<UncommittedEvent>,
            expected_version: ExpectedVersion,
        ) -> Result<Vec<StoredEvent>, EventStoreError> {
            if self.failing.load(Ordering::SeqCst) && events.iter().any(self.rule) {
                return Err(EventStoreError::Unavailable("disk full".into()));
            }
            self.inner.append(events, expected_version)
        }

        fn load_stream(
            &self,
            tenant_id: TenantId,
            aggregate_id: AggregateId,
        ) -> Result<Vec<StoredEvent>, EventStoreError> {
            self.inner.load_stream(tenant_id, aggregate_id)
        }

        fn load_by_type(
            &self,
            tenant_id: TenantId,
            aggregate_type: &str,
        ) -> Result<Vec<StoredEvent>, EventStoreError> {
            self.inner.load_by_type(tenant_id, aggregate_type)
        }
    }

    type Store = Arc<FailingAppends>;
    type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

    struct Fixture {
        store: Store,
        ledger: Arc<InventoryLedger<Arc<InMemoryLedgerStore>>>,
        journal: Arc<MovementJournalProjection>,
        recorder: MovementRecorder<Store, Bus, Arc<InMemoryLedgerStore>>,
        tenant: TenantId,
        user: UserId,
        central: WarehouseId,
        oriente: WarehouseId,
        beans: ProductId,
    }

    fn fixture(rule: fn(&UncommittedEvent) -> bool) -> Fixture {
        let store: Store = Arc::new(FailingAppends {
            inner: InMemoryEventStore::new(),
            rule,
            failing: AtomicBool::new(false),
        });
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let dispatcher = Arc::new(CommandDispatcher::new(Arc::clone(&store), bus));
        let catalog = Arc::new(Catalog::new(Arc::clone(&dispatcher)));
        let ledger = Arc::new(InventoryLedger::new(
            Arc::new(InMemoryLedgerStore::new()),
            NegativeStockPolicy::Reject,
            8,
        ));
        let journal = Arc::new(MovementJournalProjection::in_memory());
        let recorder = MovementRecorder::new(
            Arc::clone(&dispatcher),
            Arc::clone(&catalog),
            Arc::clone(&ledger),
            Arc::clone(&journal),
            Arc::new(ReferenceSequencer::new(6)),
            Arc::new(PeriodLocks::new()),
        );

        let tenant = TenantId::new();
        catalog.register_base_unit(tenant, "LB", "Libra").unwrap();
        let central = catalog
            .add_warehouse(Warehouse::general(tenant, "BC-01", "Bodega Central San Salvador"))
            .unwrap();
        let oriente = catalog
            .add_warehouse(Warehouse::general(tenant, "BC-02", "Bodega San Miguel"))
            .unwrap();
        let beans = catalog
            .create_product(
                tenant,
                NewProduct {
                    pricing: ProductPricing {
                        unit_cost: dec!(0.90),
                        sale_price: None,
                    },
                    ..NewProduct::new("FRJ-001", "Frijol rojo 1 lb", "LB")
                },
            )
            .unwrap();

        Fixture {
            store,
            ledger,
            journal,
            recorder,
            tenant,
            user: UserId::new(),
            central,
            oriente,
            beans,
        }
    }

    impl Fixture {
        fn request(&self, movement_type: MovementType, quantity: Decimal, reason: &str) -> MovementRequest {
            MovementRequest {
                movement_type,
                product_id: self.beans,
                warehouse_id: self.central,
                lot_number: None,
                expiration_date: None,
                quantity,
                unit_cost: None,
                reason_code: reason.to_string(),
                references: MovementReferences {
                    document_number: Some("CCF-000981".to_string()),
                    supplier_id: Some("PROV-GRANOS-SV".to_string()),
                    customer_id: Some("BEN-0007".to_string()),
                    notes: Some("conteo de marzo".to_string()),
                    ..MovementReferences::default()
                },
                occurred_at: Utc.with_ymd_and_hms(2025, 3, 4, 9, 0, 0).unwrap(),
                recorded_by: self.user,
            }
        }

        fn on_hand(&self, warehouse_id: WarehouseId) -> Decimal {
            self.ledger
                .balance(self.tenant, &InventoryKey::new(self.beans, warehouse_id, None))
                .unwrap()
                .map(|r| r.quantity)
                .unwrap_or_default()
        }

        fn movements(&self, status: MovementStatus) -> Vec<Movement> {
            self.store
                .load_by_type(self.tenant, MOVEMENT_AGGREGATE)
                .unwrap()
                .iter()
                .map(|e| MovementId::new(e.aggregate_id))
                .collect::<HashSet<_>>()
                .into_iter()
                .map(|id| self.recorder.movement(self.tenant, id).unwrap())
                .filter(|m| m.status() == status)
                .collect()
        }
    }

    fn completions(event: &UncommittedEvent) -> bool {
        event.event_type == "movements.movement.completed"
    }

    fn incoming_legs(event: &UncommittedEvent) -> bool {
        event.event_type == "movements.movement.recorded"
            && event.payload.to_string().contains(TRANSFER_IN_REASON)
    }

    #[test]
    fn failed_completion_is_finished_from_the_ledger_receipt() {
        let f = fixture(completions);
        f.recorder
            .record(f.tenant, f.request(MovementType::Purchase, dec!(40), "COMPRA"))
            .unwrap();

        f.store.failing.store(true, Ordering::SeqCst);
        let err = f
            .recorder
            .record(f.tenant, f.request(MovementType::Dispatch, dec!(-5), "DESPACHO"))
            .unwrap_err();
        assert!(matches!(err, ServiceError::Store(_)));

        let stuck = f.movements(MovementStatus::Approved);
        assert_eq!(stuck.len(), 1);
        let dispatch_id = stuck[0].id_typed();
        assert_eq!(f.on_hand(f.central), dec!(35));
        assert!(f.journal.entry(f.tenant, dispatch_id).is_none());

        // The delta is on the ledger: withdrawing the movement would orphan it.
        assert!(matches!(
            f.recorder.cancel(f.tenant, dispatch_id, "registrado por error"),
            Err(ServiceError::StateTransition { .. })
        ));
        assert!(matches!(
            f.recorder.reject(f.tenant, dispatch_id, "duplicado"),
            Err(ServiceError::StateTransition { .. })
        ));

        f.store.failing.store(false, Ordering::SeqCst);
        let done = f.recorder.retry_posting(f.tenant, dispatch_id).unwrap();
        assert_eq!(done.status(), MovementStatus::Completed);
        assert_eq!(done.applied_quantity(), Some(dec!(-5)));
        assert_eq!(f.on_hand(f.central), dec!(35));

        let entry = f.journal.entry(f.tenant, dispatch_id).unwrap();
        assert_eq!(entry.quantity, dec!(-5));
        assert_eq!(entry.value, dec!(-4.50));
    }

    #[test]
    fn movements_off_the_ledger_can_still_be_cancelled() {
        let f = fixture(completions);
        let pending = f
            .recorder
            .record(f.tenant, f.request(MovementType::AdjustmentIn, dec!(3), "AJUSTE_CONTEO_POS"))
            .unwrap();
        assert_eq!(pending.status(), MovementStatus::Pending);
        let cancelled = f
            .recorder
            .cancel(f.tenant, pending.id_typed(), "conteo repetido")
            .unwrap();
        assert_eq!(cancelled.status(), MovementStatus::Cancelled);
        assert!(f.recorder.retry_posting(f.tenant, pending.id_typed()).is_err());
        assert_eq!(f.on_hand(f.central), dec!(0));
    }

    #[test]
    fn transfer_leg_completion_is_retried_from_the_receipt() {
        let f = fixture(completions);
        f.recorder
            .record(f.tenant, f.request(MovementType::Purchase, dec!(20), "COMPRA"))
            .unwrap();

        f.store.failing.store(true, Ordering::SeqCst);
        let request = TransferRequest {
            product_id: f.beans,
            from: f.central,
            to: f.oriente,
            lot_number: None,
            quantity: dec!(8),
            notes: None,
            occurred_at: Utc.with_ymd_and_hms(2025, 3, 5, 9, 0, 0).unwrap(),
            requested_by: f.user,
        };
        assert!(f.recorder.transfer(f.tenant, request).is_err());
        assert_eq!(f.on_hand(f.central), dec!(12));
        assert_eq!(f.on_hand(f.oriente), dec!(8));

        f.store.failing.store(false, Ordering::SeqCst);
        for leg in f.movements(MovementStatus::Approved) {
            let done = f.recorder.retry_posting(f.tenant, leg.id_typed()).unwrap();
            assert_eq!(done.status(), MovementStatus::Completed);
        }
        assert!(f.movements(MovementStatus::Approved).is_empty());
        assert_eq!(f.on_hand(f.central), dec!(12));
        assert_eq!(f.on_hand(f.oriente), dec!(8));
    }

    #[test]
    fn failed_second_leg_cancels_the_first() {
        let f = fixture(incoming_legs);
        f.recorder
            .record(f.tenant, f.request(MovementType::Purchase, dec!(20), "COMPRA"))
            .unwrap();

        f.store.failing.store(true, Ordering::SeqCst);
        let request = TransferRequest {
            product_id: f.beans,
            from: f.central,
            to: f.oriente,
            lot_number: None,
            quantity: dec!(8),
            notes: Some("reabastecer oriente".to_string()),
            occurred_at: Utc.with_ymd_and_hms(2025, 3, 5, 9, 0, 0).unwrap(),
            requested_by: f.user,
        };
        assert!(f.recorder.transfer(f.tenant, request).is_err());

        assert!(f.movements(MovementStatus::Approved).is_empty());
        let cancelled = f.movements(MovementStatus::Cancelled);
        assert_eq!(cancelled.len(), 1);
        assert_eq!(cancelled[0].movement_type(), Some(MovementType::TransferOut));
        assert_eq!(f.on_hand(f.central), dec!(20));
        assert_eq!(f.on_hand(f.oriente), dec!(0));
    }
}
