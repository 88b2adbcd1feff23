use core::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use bodega_catalog::{ProductId, WarehouseId};
use bodega_core::{Aggregate, AggregateRoot, DomainError, DomainResult, TenantId, UserId};
use bodega_events::Event;
use bodega_inventory::{InventoryKey, StockDelta};

use crate::kind::{Direction, MovementType};
use crate::reference::ReferenceNumber;

bodega_core::aggregate_id!(
    /// Movement identifier.
    MovementId
);

bodega_core::aggregate_id!(
    /// Shared by the two legs of a transfer.
    TransferId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementStatus {
    Draft,
    Pending,
    Approved,
    Completed,
    Rejected,
    Cancelled,
}

impl MovementStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MovementStatus::Completed | MovementStatus::Rejected | MovementStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MovementStatus::Draft => "draft",
            MovementStatus::Pending => "pending",
            MovementStatus::Approved => "approved",
            MovementStatus::Completed => "completed",
            MovementStatus::Rejected => "rejected",
            MovementStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for MovementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// External references attached to a movement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementReferences {
    /// Invoice, donation certificate, delivery note...
    pub document_number: Option<String>,
    pub supplier_id: Option<String>,
    pub customer_id: Option<String>,
    pub notes: Option<String>,
}

/// Event-sourced movement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Movement {
    id: MovementId,
    tenant_id: Option<TenantId>,
    created: bool,

    movement_type: Option<MovementType>,
    product_id: Option<ProductId>,
    warehouse_id: Option<WarehouseId>,
    lot_number: Option<String>,
    expiration_date: Option<NaiveDate>,
    quantity: Decimal,
    applied_quantity: Option<Decimal>,
    applied_value: Option<Decimal>,
    unit_cost: Decimal,
    reference: Option<ReferenceNumber>,
    reason_code: String,
    references: MovementReferences,
    transfer_id: Option<TransferId>,
    reverses: Option<MovementId>,

    status: MovementStatus,
    occurred_at: Option<DateTime<Utc>>,
    created_at: Option<DateTime<Utc>>,
    submitted_at: Option<DateTime<Utc>>,
    approved_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    confirmed_at: Option<DateTime<Utc>>,
    closed_at: Option<DateTime<Utc>>,
    created_by: Option<UserId>,
    approved_by: Option<UserId>,
    status_reason: Option<String>,

    version: u64,
}

impl Movement {
    pub fn empty(id: MovementId) -> Self {
        Self {
            id,
            tenant_id: None,
            created: false,
            movement_type: None,
            product_id: None,
            warehouse_id: None,
            lot_number: None,
            expiration_date: None,
            quantity: Decimal::ZERO,
            applied_quantity: None,
            applied_value: None,
            unit_cost: Decimal::ZERO,
            reference: None,
            reason_code: String::new(),
            references: MovementReferences::default(),
            transfer_id: None,
            reverses: None,
            status: MovementStatus::Draft,
            occurred_at: None,
            created_at: None,
            submitted_at: None,
            approved_at: None,
            completed_at: None,
            confirmed_at: None,
            closed_at: None,
            created_by: None,
            approved_by: None,
            status_reason: None,
            version: 0,
        }
    }

    pub fn id_typed(&self) -> MovementId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn movement_type(&self) -> Option<MovementType> {
        self.movement_type
    }

    pub fn product_id(&self) -> Option<ProductId> {
        self.product_id
    }

    pub fn warehouse_id(&self) -> Option<WarehouseId> {
        self.warehouse_id
    }

    pub fn lot_number(&self) -> Option<&str> {
        self.lot_number.as_deref()
    }

    pub fn expiration_date(&self) -> Option<NaiveDate> {
        self.expiration_date
    }

    /// Signed ledger delta: positive inbound, negative outbound.
    pub fn quantity(&self) -> Decimal {
        self.quantity
    }

    /// What the ledger actually posted; differs from `quantity` when an
    /// outbound movement was clamped.
    pub fn applied_quantity(&self) -> Option<Decimal> {
        self.applied_quantity
    }

    /// Signed change of the ledger row's value caused by this movement.
    pub fn applied_value(&self) -> Option<Decimal> {
        self.applied_value
    }

    /// Cost as entered. Outbound movements leave the ledger at the row's
    /// cost, see [`posted_unit_cost`](Self::posted_unit_cost).
    pub fn unit_cost(&self) -> Decimal {
        self.unit_cost
    }

    /// Unit cost the ledger actually valued this movement at.
    pub fn posted_unit_cost(&self) -> Option<Decimal> {
        match (self.applied_quantity, self.applied_value) {
            (Some(q), Some(v)) if !q.is_zero() => Some(v / q),
            _ => None,
        }
    }

    pub fn reference(&self) -> Option<&ReferenceNumber> {
        self.reference.as_ref()
    }

    pub fn reason_code(&self) -> &str {
        &self.reason_code
    }

    pub fn references(&self) -> &MovementReferences {
        &self.references
    }

    pub fn transfer_id(&self) -> Option<TransferId> {
        self.transfer_id
    }

    pub fn reverses(&self) -> Option<MovementId> {
        self.reverses
    }

    pub fn status(&self) -> MovementStatus {
        self.status
    }

    pub fn occurred_at(&self) -> Option<DateTime<Utc>> {
        self.occurred_at
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn submitted_at(&self) -> Option<DateTime<Utc>> {
        self.submitted_at
    }

    pub fn approved_at(&self) -> Option<DateTime<Utc>> {
        self.approved_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Set only once the ledger accepted the movement.
    pub fn confirmed_at(&self) -> Option<DateTime<Utc>> {
        self.confirmed_at
    }

    /// When the movement was rejected or cancelled.
    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.closed_at
    }

    pub fn created_by(&self) -> Option<UserId> {
        self.created_by
    }

    pub fn approved_by(&self) -> Option<UserId> {
        self.approved_by
    }

    pub fn status_reason(&self) -> Option<&str> {
        self.status_reason.as_deref()
    }

    pub fn key(&self) -> DomainResult<InventoryKey> {
        match (self.product_id, self.warehouse_id) {
            (Some(product_id), Some(warehouse_id)) => Ok(InventoryKey::new(
                product_id,
                warehouse_id,
                self.lot_number.as_deref(),
            )),
            _ => Err(DomainError::not_found()),
        }
    }

    /// The ledger change this movement posts.
    pub fn delta(&self) -> DomainResult<StockDelta> {
        let occurred_at = self.occurred_at.ok_or_else(DomainError::not_found)?;
        Ok(StockDelta {
            key: self.key()?,
            quantity: self.quantity,
            unit_cost: self.unit_cost,
            expiration_date: self.expiration_date,
            occurred_at,
        })
    }
}

impl AggregateRoot for Movement {
    type Id = MovementId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RecordMovement (creates the draft).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMovement {
    pub tenant_id: TenantId,
    pub movement_id: MovementId,
    pub movement_type: MovementType,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub lot_number: Option<String>,
    pub expiration_date: Option<NaiveDate>,
    /// Signed: positive for inbound types, negative for outbound types.
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub reference: ReferenceNumber,
    pub reason_code: String,
    pub references: MovementReferences,
    pub transfer_id: Option<TransferId>,
    pub reverses: Option<MovementId>,
    pub recorded_by: UserId,
    /// Business time of the movement (decides its period).
    pub occurred_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitMovement {
    pub tenant_id: TenantId,
    pub movement_id: MovementId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveMovement {
    pub tenant_id: TenantId,
    pub movement_id: MovementId,
    pub approved_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectMovement {
    pub tenant_id: TenantId,
    pub movement_id: MovementId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelMovement {
    pub tenant_id: TenantId,
    pub movement_id: MovementId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CompleteMovement, issued after the ledger accepted the delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteMovement {
    pub tenant_id: TenantId,
    pub movement_id: MovementId,
    pub applied_quantity: Decimal,
    /// Signed change of the ledger row's value.
    pub applied_value: Decimal,
    pub confirmed_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovementCommand {
    Record(RecordMovement),
    Submit(SubmitMovement),
    Approve(ApproveMovement),
    Reject(RejectMovement),
    Cancel(CancelMovement),
    Complete(CompleteMovement),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRecorded {
    pub tenant_id: TenantId,
    pub movement_id: MovementId,
    pub movement_type: MovementType,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub lot_number: Option<String>,
    pub expiration_date: Option<NaiveDate>,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub reference: ReferenceNumber,
    pub reason_code: String,
    pub references: MovementReferences,
    pub transfer_id: Option<TransferId>,
    pub reverses: Option<MovementId>,
    pub recorded_by: UserId,
    pub movement_date: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementSubmitted {
    pub tenant_id: TenantId,
    pub movement_id: MovementId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementApproved {
    pub tenant_id: TenantId,
    pub movement_id: MovementId,
    pub approved_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRejected {
    pub tenant_id: TenantId,
    pub movement_id: MovementId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementCancelled {
    pub tenant_id: TenantId,
    pub movement_id: MovementId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MovementCompleted. Carries everything a journal needs so
/// projections do not have to replay the whole stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementCompleted {
    pub tenant_id: TenantId,
    pub movement_id: MovementId,
    pub movement_type: MovementType,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub lot_number: Option<String>,
    pub quantity: Decimal,
    pub applied_quantity: Decimal,
    pub applied_value: Decimal,
    pub unit_cost: Decimal,
    pub movement_date: DateTime<Utc>,
    pub transfer_id: Option<TransferId>,
    pub reverses: Option<MovementId>,
    pub confirmed_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovementEvent {
    Recorded(MovementRecorded),
    Submitted(MovementSubmitted),
    Approved(MovementApproved),
    Rejected(MovementRejected),
    Cancelled(MovementCancelled),
    Completed(MovementCompleted),
}

impl MovementEvent {
    pub fn tenant_id(&self) -> TenantId {
        match self {
            MovementEvent::Recorded(e) => e.tenant_id,
            MovementEvent::Submitted(e) => e.tenant_id,
            MovementEvent::Approved(e) => e.tenant_id,
            MovementEvent::Rejected(e) => e.tenant_id,
            MovementEvent::Cancelled(e) => e.tenant_id,
            MovementEvent::Completed(e) => e.tenant_id,
        }
    }

    pub fn movement_id(&self) -> MovementId {
        match self {
            MovementEvent::Recorded(e) => e.movement_id,
            MovementEvent::Submitted(e) => e.movement_id,
            MovementEvent::Approved(e) => e.movement_id,
            MovementEvent::Rejected(e) => e.movement_id,
            MovementEvent::Cancelled(e) => e.movement_id,
            MovementEvent::Completed(e) => e.movement_id,
        }
    }
}

impl Event for MovementEvent {
    fn event_type(&self) -> &'static str {
        match self {
            MovementEvent::Recorded(_) => "movements.movement.recorded",
            MovementEvent::Submitted(_) => "movements.movement.submitted",
            MovementEvent::Approved(_) => "movements.movement.approved",
            MovementEvent::Rejected(_) => "movements.movement.rejected",
            MovementEvent::Cancelled(_) => "movements.movement.cancelled",
            MovementEvent::Completed(_) => "movements.movement.completed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            MovementEvent::Recorded(e) => e.occurred_at,
            MovementEvent::Submitted(e) => e.occurred_at,
            MovementEvent::Approved(e) => e.occurred_at,
            MovementEvent::Rejected(e) => e.occurred_at,
            MovementEvent::Cancelled(e) => e.occurred_at,
            MovementEvent::Completed(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Movement {
    type Command = MovementCommand;
    type Event = MovementEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            MovementEvent::Recorded(e) => {
                self.id = e.movement_id;
                self.tenant_id = Some(e.tenant_id);
                self.created = true;
                self.movement_type = Some(e.movement_type);
                self.product_id = Some(e.product_id);
                self.warehouse_id = Some(e.warehouse_id);
                self.lot_number = e.lot_number.clone();
                self.expiration_date = e.expiration_date;
                self.quantity = e.quantity;
                self.unit_cost = e.unit_cost;
                self.reference = Some(e.reference.clone());
                self.reason_code = e.reason_code.clone();
                self.references = e.references.clone();
                self.transfer_id = e.transfer_id;
                self.reverses = e.reverses;
                self.created_by = Some(e.recorded_by);
                self.occurred_at = Some(e.movement_date);
                self.created_at = Some(e.occurred_at);
                self.status = MovementStatus::Draft;
            }
            MovementEvent::Submitted(e) => {
                self.status = MovementStatus::Pending;
                self.submitted_at = Some(e.occurred_at);
            }
            MovementEvent::Approved(e) => {
                self.status = MovementStatus::Approved;
                self.approved_at = Some(e.occurred_at);
                self.approved_by = Some(e.approved_by);
            }
            MovementEvent::Rejected(e) => {
                self.status = MovementStatus::Rejected;
                self.closed_at = Some(e.occurred_at);
                self.status_reason = Some(e.reason.clone());
            }
            MovementEvent::Cancelled(e) => {
                self.status = MovementStatus::Cancelled;
                self.closed_at = Some(e.occurred_at);
                self.status_reason = Some(e.reason.clone());
            }
            MovementEvent::Completed(e) => {
                self.status = MovementStatus::Completed;
                self.applied_quantity = Some(e.applied_quantity);
                self.applied_value = Some(e.applied_value);
                self.confirmed_at = Some(e.confirmed_at);
                self.completed_at = Some(e.occurred_at);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            MovementCommand::Record(cmd) => self.handle_record(cmd),
            MovementCommand::Submit(cmd) => self.handle_submit(cmd),
            MovementCommand::Approve(cmd) => self.handle_approve(cmd),
            MovementCommand::Reject(cmd) => self.handle_reject(cmd),
            MovementCommand::Cancel(cmd) => self.handle_cancel(cmd),
            MovementCommand::Complete(cmd) => self.handle_complete(cmd),
        }
    }
}

impl Movement {
    fn ensure_existing(&self, tenant_id: TenantId, movement_id: MovementId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != movement_id {
            return Err(DomainError::invariant("movement_id mismatch"));
        }
        Ok(())
    }

    fn ensure_status(&self, allowed: &[MovementStatus], action: &str) -> Result<(), DomainError> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(DomainError::state_transition(self.status, action))
        }
    }

    fn handle_record(&self, cmd: &RecordMovement) -> Result<Vec<MovementEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("movement already exists"));
        }
        if cmd.quantity.is_zero() {
            return Err(DomainError::validation("movement quantity cannot be zero"));
        }
        match cmd.movement_type.direction() {
            Direction::Inbound if cmd.quantity < Decimal::ZERO => {
                return Err(DomainError::validation(format!(
                    "{} movements take a positive quantity",
                    cmd.movement_type
                )));
            }
            Direction::Outbound if cmd.quantity > Decimal::ZERO => {
                return Err(DomainError::validation(format!(
                    "{} movements take a negative quantity",
                    cmd.movement_type
                )));
            }
            _ => {}
        }
        if cmd.unit_cost < Decimal::ZERO {
            return Err(DomainError::validation("unit cost cannot be negative"));
        }
        if cmd.reference.prefix() != cmd.movement_type.prefix() {
            return Err(DomainError::validation(format!(
                "reference {} does not match prefix {} of {} movements",
                cmd.reference,
                cmd.movement_type.prefix(),
                cmd.movement_type
            )));
        }
        if cmd.reason_code.trim().is_empty() {
            return Err(DomainError::validation("reason code cannot be empty"));
        }
        if cmd.movement_type.is_transfer() != cmd.transfer_id.is_some() {
            return Err(DomainError::validation(
                "transfer legs and only transfer legs carry a transfer id",
            ));
        }
        if cmd.reverses == Some(cmd.movement_id) {
            return Err(DomainError::validation("a movement cannot reverse itself"));
        }

        let lot_number = cmd
            .lot_number
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string);

        Ok(vec![MovementEvent::Recorded(MovementRecorded {
            tenant_id: cmd.tenant_id,
            movement_id: cmd.movement_id,
            movement_type: cmd.movement_type,
            product_id: cmd.product_id,
            warehouse_id: cmd.warehouse_id,
            lot_number,
            expiration_date: cmd.expiration_date,
            quantity: cmd.quantity,
            unit_cost: cmd.unit_cost,
            reference: cmd.reference.clone(),
            reason_code: cmd.reason_code.trim().to_uppercase(),
            references: cmd.references.clone(),
            transfer_id: cmd.transfer_id,
            reverses: cmd.reverses,
            recorded_by: cmd.recorded_by,
            movement_date: cmd.occurred_at,
            occurred_at: cmd.recorded_at,
        })])
    }

    fn handle_submit(&self, cmd: &SubmitMovement) -> Result<Vec<MovementEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.movement_id)?;
        self.ensure_status(&[MovementStatus::Draft], "submit")?;
        Ok(vec![MovementEvent::Submitted(MovementSubmitted {
            tenant_id: cmd.tenant_id,
            movement_id: cmd.movement_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_approve(&self, cmd: &ApproveMovement) -> Result<Vec<MovementEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.movement_id)?;
        self.ensure_status(&[MovementStatus::Pending], "approve")?;
        Ok(vec![MovementEvent::Approved(MovementApproved {
            tenant_id: cmd.tenant_id,
            movement_id: cmd.movement_id,
            approved_by: cmd.approved_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reject(&self, cmd: &RejectMovement) -> Result<Vec<MovementEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.movement_id)?;
        self.ensure_status(&[MovementStatus::Pending, MovementStatus::Approved], "reject")?;
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("a rejection needs a reason"));
        }
        Ok(vec![MovementEvent::Rejected(MovementRejected {
            tenant_id: cmd.tenant_id,
            movement_id: cmd.movement_id,
            reason: cmd.reason.trim().to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelMovement) -> Result<Vec<MovementEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.movement_id)?;
        self.ensure_status(&[MovementStatus::Pending, MovementStatus::Approved], "cancel")?;
        Ok(vec![MovementEvent::Cancelled(MovementCancelled {
            tenant_id: cmd.tenant_id,
            movement_id: cmd.movement_id,
            reason: cmd.reason.trim().to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_complete(&self, cmd: &CompleteMovement) -> Result<Vec<MovementEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.movement_id)?;
        self.ensure_status(&[MovementStatus::Approved], "complete")?;
        let within_request = if self.quantity > Decimal::ZERO {
            cmd.applied_quantity >= Decimal::ZERO && cmd.applied_quantity <= self.quantity
        } else {
            cmd.applied_quantity <= Decimal::ZERO && cmd.applied_quantity >= self.quantity
        };
        if !within_request {
            return Err(DomainError::invariant(format!(
                "applied quantity {} exceeds requested {}",
                cmd.applied_quantity, self.quantity
            )));
        }
        if cmd.applied_quantity.is_zero() && !cmd.applied_value.is_zero() {
            return Err(DomainError::invariant("value changed without any quantity"));
        }

        let (Some(movement_type), Some(product_id), Some(warehouse_id), Some(movement_date)) = (
            self.movement_type,
            self.product_id,
            self.warehouse_id,
            self.occurred_at,
        ) else {
            return Err(DomainError::invariant("recorded movement lost its details"));
        };

        Ok(vec![MovementEvent::Completed(MovementCompleted {
            tenant_id: cmd.tenant_id,
            movement_id: cmd.movement_id,
            movement_type,
            product_id,
            warehouse_id,
            lot_number: self.lot_number.clone(),
            quantity: self.quantity,
            applied_quantity: cmd.applied_quantity,
            applied_value: cmd.applied_value,
            unit_cost: self.unit_cost,
            movement_date,
            transfer_id: self.transfer_id,
            reverses: self.reverses,
            confirmed_at: cmd.confirmed_at,
            occurred_at: cmd.occurred_at,
        })])
    }
}
