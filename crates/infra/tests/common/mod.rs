#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use bodega_catalog::{NegativeStockPolicy, ProductId, ProductPricing, Warehouse, WarehouseId};
use bodega_core::{TenantId, UserId};
use bodega_infra::config::BodegaConfig;
use bodega_infra::{BodegaServices, MovementRequest, NewProduct};
use bodega_movements::{MovementReferences, MovementType};

pub struct World {
    pub services: BodegaServices,
    pub tenant: TenantId,
    pub user: UserId,
    pub central: WarehouseId,
    pub santa_ana: WarehouseId,
    pub rice: ProductId,
}

pub fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 10, 0, 0).unwrap()
}

pub fn world(policy: NegativeStockPolicy) -> World {
    let mut config = BodegaConfig::default();
    config.ledger.negative_stock = policy;
    config.ledger.max_retries = 64;
    world_with(config)
}

pub fn world_with(config: BodegaConfig) -> World {
    let services = BodegaServices::in_memory(config);
    let tenant = TenantId::new();
    let catalog = &services.catalog;

    catalog.register_base_unit(tenant, "LB", "Libra").unwrap();
    let central = catalog
        .add_warehouse(Warehouse::general(tenant, "BC-01", "Bodega Central San Salvador"))
        .unwrap();
    let santa_ana = catalog
        .add_warehouse(Warehouse::fractional(
            tenant,
            central,
            "BF-01",
            "Bodega Fraccionaria Santa Ana",
        ))
        .unwrap();
    let rice = catalog
        .create_product(
            tenant,
            NewProduct {
                pricing: ProductPricing {
                    unit_cost: dec!(1.00),
                    sale_price: Some(dec!(1.25)),
                },
                ..NewProduct::new("ARZ-001", "Arroz blanco 1 lb", "LB")
            },
        )
        .unwrap();

    World {
        services,
        tenant,
        user: UserId::new(),
        central,
        santa_ana,
        rice,
    }
}

impl World {
    pub fn purchase(&self, warehouse_id: WarehouseId, quantity: Decimal, occurred_at: DateTime<Utc>) -> MovementRequest {
        MovementRequest {
            movement_type: MovementType::Purchase,
            product_id: self.rice,
            warehouse_id,
            lot_number: None,
            expiration_date: None,
            quantity,
            unit_cost: Some(dec!(1.00)),
            reason_code: "COMPRA".to_string(),
            references: MovementReferences {
                document_number: Some("CCF-001234".to_string()),
                supplier_id: Some("PROV-ARROCERA-SV".to_string()),
                ..MovementReferences::default()
            },
            occurred_at,
            recorded_by: self.user,
        }
    }

    /// Outbound dispatch; `quantity` is the magnitude.
    pub fn dispatch(&self, warehouse_id: WarehouseId, quantity: Decimal, occurred_at: DateTime<Utc>) -> MovementRequest {
        MovementRequest {
            movement_type: MovementType::Dispatch,
            unit_cost: None,
            quantity: -quantity,
            reason_code: "DESPACHO".to_string(),
            references: MovementReferences {
                customer_id: Some("BEN-0042".to_string()),
                ..MovementReferences::default()
            },
            ..self.purchase(warehouse_id, quantity, occurred_at)
        }
    }

    pub fn count_shortage(&self, warehouse_id: WarehouseId, quantity: Decimal, occurred_at: DateTime<Utc>) -> MovementRequest {
        MovementRequest {
            movement_type: MovementType::AdjustmentOut,
            unit_cost: None,
            quantity: -quantity,
            reason_code: "AJUSTE_CONTEO_NEG".to_string(),
            references: MovementReferences {
                notes: Some("faltante en conteo fisico".to_string()),
                ..MovementReferences::default()
            },
            ..self.purchase(warehouse_id, quantity, occurred_at)
        }
    }

    pub fn on_hand(&self, warehouse_id: WarehouseId) -> Decimal {
        self.services
            .ledger
            .warehouse_balances(self.tenant, warehouse_id)
            .unwrap()
            .iter()
            .filter(|r| r.key.product_id == self.rice)
            .map(|r| r.quantity)
            .sum()
    }
}
