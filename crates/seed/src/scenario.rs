//! Fixed demo: a Salvadoran foundation's first two months on bodega.
//!
//! December stock is carried into January, January and February are closed
//! with physical counts. The rice line reproduces the reference closure:
//! opening 40, in 10, out 2, calculated 48, counted 45.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::info;

use bodega_catalog::{
    ProductId, ProductPricing, RotationStrategy, StockThresholds, Warehouse, WarehouseId,
    WarehouseSettings,
};
use bodega_closures::Closure;
use bodega_core::{TenantId, UserId};
use bodega_infra::{
    BodegaConfig, BodegaServices, MovementRequest, NewProduct, ServiceError, ServiceResult,
    TransferRequest,
};
use bodega_movements::{Movement, MovementReferences, MovementType};

use crate::summary::SeedSummary;

/// 08:00 in San Salvador (UTC-6).
fn at(year: i32, month: u32, day: u32) -> ServiceResult<DateTime<Utc>> {
    Utc.with_ymd_and_hms(year, month, day, 14, 0, 0)
        .single()
        .ok_or_else(|| ServiceError::validation(format!("invalid date {year}-{month}-{day}")))
}

fn date(year: i32, month: u32, day: u32) -> ServiceResult<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| ServiceError::validation(format!("invalid date {year}-{month}-{day}")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemoWarehouses {
    pub central: WarehouseId,
    pub santa_ana: WarehouseId,
    pub san_miguel: WarehouseId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemoProducts {
    pub rice: ProductId,
    pub beans: ProductId,
    pub oil: ProductId,
    pub milk: ProductId,
    pub vitamins: ProductId,
}

pub struct DemoScenario {
    pub services: BodegaServices,
    pub tenant_id: TenantId,
    pub clerk: UserId,
    pub supervisor: UserId,
    pub warehouses: DemoWarehouses,
    pub products: DemoProducts,
    pub closures: Vec<Closure>,
}

impl DemoScenario {
    pub fn run(config: BodegaConfig) -> ServiceResult<Self> {
        let services = BodegaServices::in_memory(config);
        let tenant_id = TenantId::new();
        info!(tenant_id = %tenant_id, "seeding demo tenant");

        register_units(&services, tenant_id)?;
        let warehouses = create_warehouses(&services, tenant_id)?;
        let products = create_products(&services, tenant_id)?;

        let mut demo = Self {
            services,
            tenant_id,
            clerk: UserId::new(),
            supervisor: UserId::new(),
            warehouses,
            products,
            closures: Vec::new(),
        };
        demo.december()?;
        demo.january()?;
        demo.close_month(2025, 1, &[(warehouses.central, products.rice, dec!(45))])?;
        demo.february()?;
        demo.close_month(
            2025,
            2,
            &[
                (warehouses.central, products.rice, dec!(45)),
                (warehouses.central, products.milk, dec!(50)),
            ],
        )?;
        info!(tenant_id = %tenant_id, closures = demo.closures.len(), "demo tenant seeded");
        Ok(demo)
    }

    pub fn summary(&self) -> ServiceResult<SeedSummary> {
        SeedSummary::collect(&self.services, self.tenant_id, &self.closures)
    }

    fn december(&self) -> ServiceResult<()> {
        let (w, p) = (self.warehouses, self.products);
        self.record(self.purchase(p.rice, w.central, dec!(40), dec!(0.55), "CCF-2024-0915", at(2024, 12, 20)?))?;
        Ok(())
    }

    fn january(&self) -> ServiceResult<()> {
        let (w, p) = (self.warehouses, self.products);
        let recorder = &self.services.recorder;

        self.record(self.purchase(p.oil, w.central, dec!(50), dec!(2.35), "CCF-2025-0003", at(2025, 1, 6)?))?;
        self.record(self.purchase(p.beans, w.central, dec!(100), dec!(1.10), "CCF-2025-0011", at(2025, 1, 8)?))?;
        self.record(self.donation(p.milk, w.central, "LP-2412", date(2025, 2, 15)?, dec!(8), at(2025, 1, 9)?))?;
        self.record(self.donation(p.milk, w.central, "LP-2501", date(2025, 9, 30)?, dec!(60), at(2025, 1, 9)?))?;
        self.record(self.purchase(p.rice, w.central, dec!(10), dec!(0.55), "CCF-2025-0020", at(2025, 1, 10)?))?;
        self.record(self.donation(p.vitamins, w.san_miguel, "VIT-A", date(2025, 3, 31)?, dec!(30), at(2025, 1, 12)?))?;
        self.record(self.donation(p.vitamins, w.san_miguel, "VIT-B", date(2025, 6, 30)?, dec!(40), at(2025, 1, 12)?))?;

        self.record(self.dispatch(p.rice, w.central, None, dec!(2), at(2025, 1, 15)?))?;
        self.record(MovementRequest {
            reason_code: "VENTA".to_string(),
            movement_type: MovementType::Sale,
            references: MovementReferences {
                document_number: Some("FAC-000321".to_string()),
                customer_id: Some("CLI-0101 Tienda La Esperanza".to_string()),
                ..MovementReferences::default()
            },
            ..self.dispatch(p.beans, w.central, None, dec!(12), at(2025, 1, 18)?)
        })?;

        let transfer = recorder.transfer(
            self.tenant_id,
            TransferRequest {
                product_id: p.oil,
                from: w.central,
                to: w.santa_ana,
                lot_number: None,
                quantity: dec!(10),
                notes: Some("abastecimiento de bodega fraccionaria".to_string()),
                occurred_at: at(2025, 1, 20)?,
                requested_by: self.clerk,
            },
        )?;
        info!(reference = %transfer.reference, moved = %transfer.moved, "demo transfer posted");

        // Vitamins leave San Miguel earliest expiry first.
        let plan = recorder.suggest_lots(self.tenant_id, p.vitamins, w.san_miguel, dec!(35))?;
        for pick in plan.picks {
            self.record(self.dispatch(
                p.vitamins,
                w.san_miguel,
                pick.key.lot_number.as_deref(),
                pick.quantity,
                at(2025, 1, 22)?,
            ))?;
        }

        let returned = self.record(MovementRequest {
            movement_type: MovementType::CustomerReturn,
            reason_code: "DEVOLUCION".to_string(),
            unit_cost: None,
            references: MovementReferences {
                customer_id: Some("CLI-0101 Tienda La Esperanza".to_string()),
                notes: Some("sacos con empaque danado, producto en buen estado".to_string()),
                ..MovementReferences::default()
            },
            ..self.purchase(p.beans, w.central, dec!(2), dec!(0), "", at(2025, 1, 25)?)
        })?;
        recorder.approve(self.tenant_id, returned.id_typed(), self.supervisor)?;
        Ok(())
    }

    fn february(&self) -> ServiceResult<()> {
        let (w, p) = (self.warehouses, self.products);
        let recorder = &self.services.recorder;

        let shortage = self.record(MovementRequest {
            movement_type: MovementType::AdjustmentOut,
            reason_code: "AJUSTE_CONTEO_NEG".to_string(),
            unit_cost: None,
            references: MovementReferences {
                notes: Some("faltante del conteo de enero (3 lb)".to_string()),
                ..MovementReferences::default()
            },
            ..self.dispatch(p.rice, w.central, None, dec!(3), at(2025, 2, 3)?)
        })?;
        recorder.approve(self.tenant_id, shortage.id_typed(), self.supervisor)?;

        let duplicated =
            self.record(self.purchase(p.beans, w.central, dec!(20), dec!(1.10), "CCF-2025-0044", at(2025, 2, 5)?))?;
        recorder.reverse_at(
            self.tenant_id,
            duplicated.id_typed(),
            "factura CCF-2025-0044 registrada dos veces",
            self.supervisor,
            at(2025, 2, 6)?,
        )?;

        self.record(self.dispatch(p.oil, w.santa_ana, None, dec!(4), at(2025, 2, 10)?))?;
        self.record(MovementRequest {
            movement_type: MovementType::Expiry,
            reason_code: "VENCIMIENTO".to_string(),
            unit_cost: None,
            references: MovementReferences {
                notes: Some("lote vencido el 15 de febrero".to_string()),
                ..MovementReferences::default()
            },
            ..self.dispatch(p.milk, w.central, Some("LP-2412"), dec!(8), at(2025, 2, 16)?)
        })?;
        self.record(self.dispatch(p.milk, w.central, Some("LP-2501"), dec!(10), at(2025, 2, 20)?))?;
        Ok(())
    }

    /// Calculate, count, approve and close every warehouse for one month.
    fn close_month(
        &mut self,
        year: i32,
        month: u32,
        counts: &[(WarehouseId, ProductId, Decimal)],
    ) -> ServiceResult<()> {
        let closures = &self.services.closures;
        let w = self.warehouses;
        for warehouse_id in [w.central, w.santa_ana, w.san_miguel] {
            let closure = closures.close_period(self.tenant_id, warehouse_id, year, month, self.clerk)?;
            let id = closure.id_typed();
            for (_, product_id, physical) in counts.iter().filter(|(wh, _, _)| *wh == warehouse_id) {
                closures.record_physical_count(self.tenant_id, id, *product_id, *physical, false, self.clerk)?;
            }
            closures.approve(self.tenant_id, id, self.supervisor)?;
            let closed = closures.finalize(self.tenant_id, id, self.supervisor)?;
            self.closures.push(closed);
        }
        Ok(())
    }

    fn record(&self, request: MovementRequest) -> ServiceResult<Movement> {
        self.services.recorder.record(self.tenant_id, request)
    }

    fn purchase(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
        quantity: Decimal,
        unit_cost: Decimal,
        invoice: &str,
        occurred_at: DateTime<Utc>,
    ) -> MovementRequest {
        MovementRequest {
            movement_type: MovementType::Purchase,
            product_id,
            warehouse_id,
            lot_number: None,
            expiration_date: None,
            quantity,
            unit_cost: Some(unit_cost),
            reason_code: "COMPRA".to_string(),
            references: MovementReferences {
                document_number: Some(invoice.to_string()),
                supplier_id: Some("PROV-001 Distribuidora Salvadorena".to_string()),
                ..MovementReferences::default()
            },
            occurred_at,
            recorded_by: self.clerk,
        }
    }

    fn donation(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
        lot: &str,
        expires: NaiveDate,
        quantity: Decimal,
        occurred_at: DateTime<Utc>,
    ) -> MovementRequest {
        MovementRequest {
            movement_type: MovementType::Donation,
            lot_number: Some(lot.to_string()),
            expiration_date: Some(expires),
            unit_cost: None,
            reason_code: "DONACION".to_string(),
            references: MovementReferences {
                document_number: Some("ACTA-DON-0007".to_string()),
                ..MovementReferences::default()
            },
            ..self.purchase(product_id, warehouse_id, quantity, Decimal::ZERO, "", occurred_at)
        }
    }

    /// `quantity` is the magnitude leaving the warehouse.
    fn dispatch(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
        lot: Option<&str>,
        quantity: Decimal,
        occurred_at: DateTime<Utc>,
    ) -> MovementRequest {
        MovementRequest {
            movement_type: MovementType::Dispatch,
            lot_number: lot.map(str::to_string),
            quantity: -quantity,
            unit_cost: None,
            reason_code: "DESPACHO".to_string(),
            references: MovementReferences {
                customer_id: Some("BEN-0042 Comunidad El Zapote".to_string()),
                ..MovementReferences::default()
            },
            ..self.purchase(product_id, warehouse_id, quantity, Decimal::ZERO, "", occurred_at)
        }
    }
}

fn register_units(services: &BodegaServices, tenant_id: TenantId) -> ServiceResult<()> {
    let catalog = &services.catalog;
    catalog.register_base_unit(tenant_id, "UNI", "Unidad")?;
    catalog.register_derived_unit(tenant_id, "CAJ", "Caja x 12", "UNI", dec!(12))?;
    catalog.register_base_unit(tenant_id, "KG", "Kilogramo")?;
    catalog.register_derived_unit(tenant_id, "LB", "Libra", "KG", dec!(0.453592))?;
    Ok(())
}

fn create_warehouses(services: &BodegaServices, tenant_id: TenantId) -> ServiceResult<DemoWarehouses> {
    let catalog = &services.catalog;
    let central = catalog.add_warehouse(
        Warehouse::general(tenant_id, "BC-01", "Bodega Central San Salvador").with_capacity(dec!(5000)),
    )?;
    let santa_ana = catalog.add_warehouse(Warehouse::fractional(
        tenant_id,
        central,
        "BF-01",
        "Bodega Fraccionaria Santa Ana",
    ))?;
    let san_miguel = catalog.add_warehouse(
        Warehouse::general(tenant_id, "BR-01", "Bodega Regional San Miguel").with_settings(WarehouseSettings {
            rotation: RotationStrategy::Fefo,
            requires_lot_tracking: true,
            ..WarehouseSettings::default()
        }),
    )?;
    Ok(DemoWarehouses {
        central,
        santa_ana,
        san_miguel,
    })
}

fn create_products(services: &BodegaServices, tenant_id: TenantId) -> ServiceResult<DemoProducts> {
    let catalog = &services.catalog;
    let priced = |sku: &str, name: &str, unit: &str, cost: Decimal, min: Decimal| NewProduct {
        pricing: ProductPricing {
            unit_cost: cost,
            sale_price: Some((cost * dec!(1.25)).round_dp(2)),
        },
        thresholds: StockThresholds {
            min_stock: min,
            max_stock: None,
        },
        ..NewProduct::new(sku, name, unit)
    };
    let lots = |new: NewProduct| NewProduct {
        tracks_lots: true,
        tracks_expiration: true,
        ..new
    };

    Ok(DemoProducts {
        rice: catalog.create_product(tenant_id, priced("ARZ-001", "Arroz blanco 1 lb", "LB", dec!(0.55), dec!(50)))?,
        beans: catalog.create_product(tenant_id, priced("FRJ-001", "Frijol rojo de seda 1 lb", "LB", dec!(1.10), dec!(20)))?,
        oil: catalog.create_product(tenant_id, priced("ACE-750", "Aceite vegetal 750 ml", "UNI", dec!(2.35), dec!(10)))?,
        milk: catalog.create_product(
            tenant_id,
            lots(priced("LPO-360", "Leche en polvo 360 g", "UNI", dec!(4.75), dec!(24))),
        )?,
        vitamins: catalog.create_product(
            tenant_id,
            lots(priced("VIT-PRE", "Kit de vitaminas prenatales", "UNI", dec!(3.20), dec!(20))),
        )?,
    })
}
