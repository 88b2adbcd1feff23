//! Printable totals of a seeded tenant.

use rust_decimal::Decimal;
use serde::Serialize;

use bodega_closures::Closure;
use bodega_core::TenantId;
use bodega_infra::{BodegaServices, ServiceResult};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WarehouseSummary {
    pub code: String,
    pub name: String,
    pub stock_rows: usize,
    pub quantity: Decimal,
    pub value: Decimal,
    /// Products outside their min/max thresholds.
    pub alerts: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClosureReport {
    pub warehouse: String,
    pub period: String,
    pub status: String,
    pub products: usize,
    pub closing_quantity: Decimal,
    pub closing_value: Decimal,
    pub discrepancies: usize,
    pub discrepancy_value: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeedSummary {
    pub tenant_id: TenantId,
    pub products: usize,
    /// Completed movements in the journal.
    pub movements: usize,
    pub warehouses: Vec<WarehouseSummary>,
    pub closures: Vec<ClosureReport>,
}

impl SeedSummary {
    pub fn collect(
        services: &BodegaServices,
        tenant_id: TenantId,
        closures: &[Closure],
    ) -> ServiceResult<Self> {
        let thresholds = services.catalog.thresholds(tenant_id);
        let mut warehouses = Vec::new();
        for warehouse in services.catalog.warehouses(tenant_id)? {
            let rows = services.ledger.warehouse_balances(tenant_id, warehouse.id)?;
            let alerts = services
                .ledger
                .stock_alerts(tenant_id, warehouse.id, &thresholds)?;
            warehouses.push(WarehouseSummary {
                code: warehouse.code.clone(),
                name: warehouse.name.clone(),
                stock_rows: rows.iter().filter(|r| !r.quantity.is_zero()).count(),
                quantity: rows.iter().map(|r| r.quantity).sum(),
                value: rows.iter().map(|r| r.total_value).sum(),
                alerts: alerts.len(),
            });
        }
        warehouses.sort_by(|a, b| a.code.cmp(&b.code));

        let mut reports = Vec::new();
        for closure in closures {
            let code = match closure.warehouse_id() {
                Some(id) => services.catalog.warehouse(tenant_id, id)?.code,
                None => String::new(),
            };
            let summary = closure.summary();
            reports.push(ClosureReport {
                warehouse: code,
                period: closure.period().map(|p| p.to_string()).unwrap_or_default(),
                status: closure.status().to_string(),
                products: summary.products,
                closing_quantity: summary.total_closing_quantity,
                closing_value: summary.total_closing_value,
                discrepancies: summary.discrepancies,
                discrepancy_value: summary.total_discrepancy_value,
            });
        }

        Ok(Self {
            tenant_id,
            products: services.catalog.products(tenant_id).len(),
            movements: services.journal.entries(tenant_id).len(),
            warehouses,
            closures: reports,
        })
    }
}
