use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use bodega_catalog::{ProductId, WarehouseId};
use bodega_core::{Aggregate, AggregateRoot, DomainError, Period, TenantId, UserId};
use bodega_events::Event;

use crate::line::{ClosureLine, DEFAULT_DISCREPANCY_EPSILON, LineInputs};

bodega_core::aggregate_id!(
    /// Closure identifier.
    ClosureId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosureStatus {
    #[serde(rename = "en_proceso")]
    InProgress,
    Approved,
    Closed,
    Reopened,
    Cancelled,
}

impl ClosureStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ClosureStatus::InProgress => "en_proceso",
            ClosureStatus::Approved => "approved",
            ClosureStatus::Closed => "closed",
            ClosureStatus::Reopened => "reopened",
            ClosureStatus::Cancelled => "cancelled",
        }
    }

    /// Whether the period is shut to new movements.
    pub fn locks_period(self) -> bool {
        self == ClosureStatus::Closed
    }
}

impl core::fmt::Display for ClosureStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosureSummary {
    pub products: usize,
    pub total_opening_quantity: Decimal,
    pub total_opening_value: Decimal,
    pub total_quantity_in: Decimal,
    pub total_quantity_out: Decimal,
    pub total_closing_quantity: Decimal,
    pub total_closing_value: Decimal,
    pub discrepancies: usize,
    pub total_discrepancy_value: Decimal,
}

/// Event-sourced closure of one warehouse for one period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Closure {
    id: ClosureId,
    tenant_id: Option<TenantId>,
    warehouse_id: Option<WarehouseId>,
    period: Option<Period>,
    created: bool,
    status: ClosureStatus,
    lines: BTreeMap<ProductId, ClosureLine>,
    epsilon: Decimal,
    needs_correction: bool,
    reopen_reason: Option<String>,
    cancel_reason: Option<String>,
    started_by: Option<UserId>,
    approved_by: Option<UserId>,
    closed_by: Option<UserId>,
    started_at: Option<DateTime<Utc>>,
    calculated_at: Option<DateTime<Utc>>,
    approved_at: Option<DateTime<Utc>>,
    closed_at: Option<DateTime<Utc>>,
    reopened_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    version: u64,
}

impl Closure {
    pub fn empty(id: ClosureId) -> Self {
        Self {
            id,
            tenant_id: None,
            warehouse_id: None,
            period: None,
            created: false,
            status: ClosureStatus::InProgress,
            lines: BTreeMap::new(),
            epsilon: DEFAULT_DISCREPANCY_EPSILON,
            needs_correction: false,
            reopen_reason: None,
            cancel_reason: None,
            started_by: None,
            approved_by: None,
            closed_by: None,
            started_at: None,
            calculated_at: None,
            approved_at: None,
            closed_at: None,
            reopened_at: None,
            cancelled_at: None,
            version: 0,
        }
    }

    pub fn id_typed(&self) -> ClosureId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn warehouse_id(&self) -> Option<WarehouseId> {
        self.warehouse_id
    }

    pub fn period(&self) -> Option<Period> {
        self.period
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn status(&self) -> ClosureStatus {
        self.status
    }

    pub fn epsilon(&self) -> Decimal {
        self.epsilon
    }

    /// Set on reopen; postings made after the original close are not reversed.
    pub fn needs_correction(&self) -> bool {
        self.needs_correction
    }

    pub fn reopen_reason(&self) -> Option<&str> {
        self.reopen_reason.as_deref()
    }

    pub fn cancel_reason(&self) -> Option<&str> {
        self.cancel_reason.as_deref()
    }

    pub fn started_by(&self) -> Option<UserId> {
        self.started_by
    }

    pub fn approved_by(&self) -> Option<UserId> {
        self.approved_by
    }

    pub fn closed_by(&self) -> Option<UserId> {
        self.closed_by
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn calculated_at(&self) -> Option<DateTime<Utc>> {
        self.calculated_at
    }

    pub fn approved_at(&self) -> Option<DateTime<Utc>> {
        self.approved_at
    }

    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.closed_at
    }

    pub fn reopened_at(&self) -> Option<DateTime<Utc>> {
        self.reopened_at
    }

    pub fn cancelled_at(&self) -> Option<DateTime<Utc>> {
        self.cancelled_at
    }

    pub fn lines(&self) -> impl Iterator<Item = &ClosureLine> {
        self.lines.values()
    }

    pub fn line(&self, product_id: ProductId) -> Option<&ClosureLine> {
        self.lines.get(&product_id)
    }

    pub fn summary(&self) -> ClosureSummary {
        self.lines.values().fold(
            ClosureSummary::default(),
            |mut s, l| {
                s.products += 1;
                s.total_opening_quantity += l.opening_quantity;
                s.total_opening_value += l.opening_value;
                s.total_quantity_in += l.quantity_in;
                s.total_quantity_out += l.quantity_out;
                s.total_closing_quantity += l.closing_quantity();
                s.total_closing_value += l.closing_value();
                if l.has_discrepancy {
                    s.discrepancies += 1;
                    s.total_discrepancy_value += l.discrepancy_value;
                }
                s
            },
        )
    }
}

impl AggregateRoot for Closure {
    type Id = ClosureId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: StartClosure. Lines are computed by the caller from the journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartClosure {
    pub tenant_id: TenantId,
    pub closure_id: ClosureId,
    pub warehouse_id: WarehouseId,
    pub period: Period,
    pub epsilon: Decimal,
    pub lines: Vec<ClosureLine>,
    pub started_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecalculateClosure. Physical counts already taken are re-applied
/// to the fresh lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecalculateClosure {
    pub tenant_id: TenantId,
    pub closure_id: ClosureId,
    pub lines: Vec<ClosureLine>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPhysicalCount {
    pub tenant_id: TenantId,
    pub closure_id: ClosureId,
    pub product_id: ProductId,
    pub physical_quantity: Decimal,
    pub adjust: bool,
    pub counted_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveClosure {
    pub tenant_id: TenantId,
    pub closure_id: ClosureId,
    pub approved_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeClosure {
    pub tenant_id: TenantId,
    pub closure_id: ClosureId,
    pub closed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReopenClosure {
    pub tenant_id: TenantId,
    pub closure_id: ClosureId,
    pub reason: String,
    pub reopened_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelClosure {
    pub tenant_id: TenantId,
    pub closure_id: ClosureId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClosureCommand {
    Start(StartClosure),
    Recalculate(RecalculateClosure),
    RecordPhysicalCount(RecordPhysicalCount),
    Approve(ApproveClosure),
    Finalize(FinalizeClosure),
    Reopen(ReopenClosure),
    Cancel(CancelClosure),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosureStarted {
    pub tenant_id: TenantId,
    pub closure_id: ClosureId,
    pub warehouse_id: WarehouseId,
    pub period: Period,
    pub epsilon: Decimal,
    pub lines: Vec<ClosureLine>,
    pub started_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosureRecalculated {
    pub tenant_id: TenantId,
    pub closure_id: ClosureId,
    pub lines: Vec<ClosureLine>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalCountRecorded {
    pub tenant_id: TenantId,
    pub closure_id: ClosureId,
    pub line: ClosureLine,
    pub counted_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosureApproved {
    pub tenant_id: TenantId,
    pub closure_id: ClosureId,
    pub approved_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosureClosed {
    pub tenant_id: TenantId,
    pub closure_id: ClosureId,
    pub closed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosureReopened {
    pub tenant_id: TenantId,
    pub closure_id: ClosureId,
    pub reason: String,
    pub reopened_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosureCancelled {
    pub tenant_id: TenantId,
    pub closure_id: ClosureId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClosureEvent {
    Started(ClosureStarted),
    Recalculated(ClosureRecalculated),
    PhysicalCountRecorded(PhysicalCountRecorded),
    Approved(ClosureApproved),
    Closed(ClosureClosed),
    Reopened(ClosureReopened),
    Cancelled(ClosureCancelled),
}

impl ClosureEvent {
    pub fn tenant_id(&self) -> TenantId {
        match self {
            ClosureEvent::Started(e) => e.tenant_id,
            ClosureEvent::Recalculated(e) => e.tenant_id,
            ClosureEvent::PhysicalCountRecorded(e) => e.tenant_id,
            ClosureEvent::Approved(e) => e.tenant_id,
            ClosureEvent::Closed(e) => e.tenant_id,
            ClosureEvent::Reopened(e) => e.tenant_id,
            ClosureEvent::Cancelled(e) => e.tenant_id,
        }
    }

    pub fn closure_id(&self) -> ClosureId {
        match self {
            ClosureEvent::Started(e) => e.closure_id,
            ClosureEvent::Recalculated(e) => e.closure_id,
            ClosureEvent::PhysicalCountRecorded(e) => e.closure_id,
            ClosureEvent::Approved(e) => e.closure_id,
            ClosureEvent::Closed(e) => e.closure_id,
            ClosureEvent::Reopened(e) => e.closure_id,
            ClosureEvent::Cancelled(e) => e.closure_id,
        }
    }
}

impl Event for ClosureEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ClosureEvent::Started(_) => "closures.closure.started",
            ClosureEvent::Recalculated(_) => "closures.closure.recalculated",
            ClosureEvent::PhysicalCountRecorded(_) => "closures.closure.physical_count_recorded",
            ClosureEvent::Approved(_) => "closures.closure.approved",
            ClosureEvent::Closed(_) => "closures.closure.closed",
            ClosureEvent::Reopened(_) => "closures.closure.reopened",
            ClosureEvent::Cancelled(_) => "closures.closure.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ClosureEvent::Started(e) => e.occurred_at,
            ClosureEvent::Recalculated(e) => e.occurred_at,
            ClosureEvent::PhysicalCountRecorded(e) => e.occurred_at,
            ClosureEvent::Approved(e) => e.occurred_at,
            ClosureEvent::Closed(e) => e.occurred_at,
            ClosureEvent::Reopened(e) => e.occurred_at,
            ClosureEvent::Cancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Closure {
    type Command = ClosureCommand;
    type Event = ClosureEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ClosureEvent::Started(e) => {
                self.id = e.closure_id;
                self.tenant_id = Some(e.tenant_id);
                self.warehouse_id = Some(e.warehouse_id);
                self.period = Some(e.period);
                self.epsilon = e.epsilon;
                self.lines = index(&e.lines);
                self.status = ClosureStatus::InProgress;
                self.started_by = Some(e.started_by);
                self.started_at = Some(e.occurred_at);
                self.calculated_at = Some(e.occurred_at);
                self.created = true;
            }
            ClosureEvent::Recalculated(e) => {
                self.lines = index(&e.lines);
                self.status = ClosureStatus::InProgress;
                self.calculated_at = Some(e.occurred_at);
                self.approved_by = None;
                self.approved_at = None;
            }
            ClosureEvent::PhysicalCountRecorded(e) => {
                self.lines.insert(e.line.product_id, e.line.clone());
            }
            ClosureEvent::Approved(e) => {
                self.status = ClosureStatus::Approved;
                self.approved_by = Some(e.approved_by);
                self.approved_at = Some(e.occurred_at);
            }
            ClosureEvent::Closed(e) => {
                self.status = ClosureStatus::Closed;
                self.closed_by = Some(e.closed_by);
                self.closed_at = Some(e.occurred_at);
            }
            ClosureEvent::Reopened(e) => {
                self.status = ClosureStatus::Reopened;
                self.needs_correction = true;
                self.reopen_reason = Some(e.reason.clone());
                self.reopened_at = Some(e.occurred_at);
            }
            ClosureEvent::Cancelled(e) => {
                self.status = ClosureStatus::Cancelled;
                self.cancel_reason = Some(e.reason.clone());
                self.cancelled_at = Some(e.occurred_at);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ClosureCommand::Start(cmd) => self.handle_start(cmd),
            ClosureCommand::Recalculate(cmd) => self.handle_recalculate(cmd),
            ClosureCommand::RecordPhysicalCount(cmd) => self.handle_count(cmd),
            ClosureCommand::Approve(cmd) => self.handle_approve(cmd),
            ClosureCommand::Finalize(cmd) => self.handle_finalize(cmd),
            ClosureCommand::Reopen(cmd) => self.handle_reopen(cmd),
            ClosureCommand::Cancel(cmd) => self.handle_cancel(cmd),
        }
    }
}

fn index(lines: &[ClosureLine]) -> BTreeMap<ProductId, ClosureLine> {
    lines.iter().map(|l| (l.product_id, l.clone())).collect()
}

fn ensure_unique(lines: &[ClosureLine]) -> Result<(), DomainError> {
    if index(lines).len() != lines.len() {
        return Err(DomainError::validation(
            "a closure holds one line per product",
        ));
    }
    Ok(())
}

impl Closure {
    fn ensure_existing(&self, tenant_id: TenantId, closure_id: ClosureId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != closure_id {
            return Err(DomainError::invariant("closure_id mismatch"));
        }
        Ok(())
    }

    fn ensure_status(&self, allowed: &[ClosureStatus], action: &str) -> Result<(), DomainError> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(DomainError::state_transition(self.status, action))
        }
    }

    fn handle_start(&self, cmd: &StartClosure) -> Result<Vec<ClosureEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("closure already exists"));
        }
        if cmd.epsilon < Decimal::ZERO {
            return Err(DomainError::validation("discrepancy epsilon cannot be negative"));
        }
        ensure_unique(&cmd.lines)?;

        Ok(vec![ClosureEvent::Started(ClosureStarted {
            tenant_id: cmd.tenant_id,
            closure_id: cmd.closure_id,
            warehouse_id: cmd.warehouse_id,
            period: cmd.period,
            epsilon: cmd.epsilon,
            lines: cmd.lines.clone(),
            started_by: cmd.started_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_recalculate(&self, cmd: &RecalculateClosure) -> Result<Vec<ClosureEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.closure_id)?;
        self.ensure_status(&[ClosureStatus::InProgress, ClosureStatus::Reopened], "recalculate")?;
        ensure_unique(&cmd.lines)?;

        let mut lines = cmd.lines.clone();
        for line in &mut lines {
            if let Some(previous) = self.lines.get(&line.product_id) {
                if let Some(physical) = previous.physical_quantity {
                    line.apply_physical_count(physical, self.epsilon, previous.adjusted)?;
                }
            }
        }
        // Counted products that no longer have activity keep their count.
        for previous in self.lines.values() {
            if previous.physical_quantity.is_some()
                && !lines.iter().any(|l| l.product_id == previous.product_id)
            {
                let mut line = ClosureLine::compute(previous.product_id, LineInputs::default());
                if let Some(physical) = previous.physical_quantity {
                    line.apply_physical_count(physical, self.epsilon, previous.adjusted)?;
                }
                lines.push(line);
            }
        }

        Ok(vec![ClosureEvent::Recalculated(ClosureRecalculated {
            tenant_id: cmd.tenant_id,
            closure_id: cmd.closure_id,
            lines,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_count(&self, cmd: &RecordPhysicalCount) -> Result<Vec<ClosureEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.closure_id)?;
        self.ensure_status(&[ClosureStatus::InProgress], "record a physical count")?;

        let mut line = self
            .lines
            .get(&cmd.product_id)
            .cloned()
            .unwrap_or_else(|| ClosureLine::compute(cmd.product_id, LineInputs::default()));
        line.apply_physical_count(cmd.physical_quantity, self.epsilon, cmd.adjust)?;

        Ok(vec![ClosureEvent::PhysicalCountRecorded(PhysicalCountRecorded {
            tenant_id: cmd.tenant_id,
            closure_id: cmd.closure_id,
            line,
            counted_by: cmd.counted_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_approve(&self, cmd: &ApproveClosure) -> Result<Vec<ClosureEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.closure_id)?;
        self.ensure_status(&[ClosureStatus::InProgress], "approve")?;
        Ok(vec![ClosureEvent::Approved(ClosureApproved {
            tenant_id: cmd.tenant_id,
            closure_id: cmd.closure_id,
            approved_by: cmd.approved_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_finalize(&self, cmd: &FinalizeClosure) -> Result<Vec<ClosureEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.closure_id)?;
        self.ensure_status(&[ClosureStatus::Approved], "close")?;
        Ok(vec![ClosureEvent::Closed(ClosureClosed {
            tenant_id: cmd.tenant_id,
            closure_id: cmd.closure_id,
            closed_by: cmd.closed_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reopen(&self, cmd: &ReopenClosure) -> Result<Vec<ClosureEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.closure_id)?;
        self.ensure_status(&[ClosureStatus::Closed], "reopen")?;
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("reopening a closure needs a reason"));
        }
        Ok(vec![ClosureEvent::Reopened(ClosureReopened {
            tenant_id: cmd.tenant_id,
            closure_id: cmd.closure_id,
            reason: cmd.reason.trim().to_string(),
            reopened_by: cmd.reopened_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelClosure) -> Result<Vec<ClosureEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.closure_id)?;
        self.ensure_status(&[ClosureStatus::InProgress, ClosureStatus::Approved], "cancel")?;
        Ok(vec![ClosureEvent::Cancelled(ClosureCancelled {
            tenant_id: cmd.tenant_id,
            closure_id: cmd.closure_id,
            reason: cmd.reason.trim().to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }
}
