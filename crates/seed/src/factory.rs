//! Reproducible random catalogs and movement streams.

use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use bodega_catalog::{ProductId, ProductPricing, StockThresholds, Warehouse, WarehouseId};
use bodega_core::{TenantId, UserId};
use bodega_infra::{
    BodegaConfig, BodegaServices, MovementRequest, NewProduct, ServiceError, ServiceResult,
    TransferRequest,
};
use bodega_movements::{MovementReferences, MovementType};

use crate::summary::SeedSummary;

const STAPLES: &[(&str, &str)] = &[
    ("ARZ", "Arroz"),
    ("FRJ", "Frijol"),
    ("MAI", "Maiz blanco"),
    ("AZU", "Azucar"),
    ("HAR", "Harina de trigo"),
    ("ACE", "Aceite vegetal"),
    ("AVE", "Avena"),
    ("SAL", "Sal yodada"),
    ("PAS", "Pasta"),
    ("LEC", "Leche en polvo"),
];

const PRESENTATIONS: &[&str] = &["1 lb", "2 lb", "5 lb", "500 g", "1 kg", "qq"];

const SUPPLIERS: &[&str] = &[
    "PROV-001 Distribuidora Salvadorena",
    "PROV-014 Molinos de Oriente",
    "PROV-027 Granos Cuscatlan",
];

const BENEFICIARIES: &[&str] = &[
    "BEN-0042 Comunidad El Zapote",
    "BEN-0107 Escuela Rural Mixta Las Flores",
    "BEN-0133 Clinica Comunal Chalatenango",
];

/// Random generator for products and movements, driven by a seed.
#[derive(Debug)]
pub struct Factory {
    rng: StdRng,
}

impl Factory {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn product(&mut self, index: usize) -> NewProduct {
        let (prefix, staple) = STAPLES[index % STAPLES.len()];
        let presentation = PRESENTATIONS.choose(&mut self.rng).copied().unwrap_or("1 lb");
        let cents: i64 = self.rng.gen_range(25..=900);
        let unit_cost = Decimal::new(cents, 2);
        let min: i64 = self.rng.gen_range(0..=40);
        NewProduct {
            pricing: ProductPricing {
                unit_cost,
                sale_price: Some((unit_cost * Decimal::new(130, 2)).round_dp(2)),
            },
            thresholds: StockThresholds {
                min_stock: Decimal::from(min),
                max_stock: None,
            },
            ..NewProduct::new(
                &format!("{prefix}-{index:04}"),
                &format!("{staple} {presentation}"),
                "UNI",
            )
        }
    }

    /// Whole-unit quantity in `1..=max`.
    pub fn quantity(&mut self, max: i64) -> Decimal {
        Decimal::from(self.rng.gen_range(1..=max.max(1)))
    }

    pub fn pick<T: Copy>(&mut self, items: &[T]) -> Option<T> {
        items.choose(&mut self.rng).copied()
    }

    /// Roughly 55% purchases, 30% dispatches, 15% transfers.
    fn movement_kind(&mut self) -> MovementKind {
        match self.rng.gen_range(0..100) {
            0..=54 => MovementKind::Purchase,
            55..=84 => MovementKind::Dispatch,
            _ => MovementKind::Transfer,
        }
    }

    fn supplier(&mut self) -> String {
        SUPPLIERS.choose(&mut self.rng).copied().unwrap_or(SUPPLIERS[0]).to_string()
    }

    fn beneficiary(&mut self) -> String {
        BENEFICIARIES.choose(&mut self.rng).copied().unwrap_or(BENEFICIARIES[0]).to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MovementKind {
    Purchase,
    Dispatch,
    Transfer,
}

/// A random tenant: `products` products across two warehouses and
/// `movements` movements spread over the first quarter of 2025.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RandomRun {
    pub products: usize,
    pub movements: usize,
    pub seed: u64,
}

impl RandomRun {
    pub fn run(&self, config: BodegaConfig) -> ServiceResult<(BodegaServices, SeedSummary)> {
        let services = BodegaServices::in_memory(config);
        let tenant_id = TenantId::new();
        let clerk = UserId::new();
        let mut factory = Factory::new(self.seed);
        info!(tenant_id = %tenant_id, products = self.products, movements = self.movements, seed = self.seed, "seeding random tenant");

        services.catalog.register_base_unit(tenant_id, "UNI", "Unidad")?;
        let central = services
            .catalog
            .add_warehouse(Warehouse::general(tenant_id, "BC-01", "Bodega Central San Salvador"))?;
        let fractional = services.catalog.add_warehouse(Warehouse::fractional(
            tenant_id,
            central,
            "BF-01",
            "Bodega Fraccionaria Santa Ana",
        ))?;
        let warehouses = [central, fractional];

        let mut products = Vec::with_capacity(self.products);
        for index in 0..self.products {
            products.push(services.catalog.create_product(tenant_id, factory.product(index))?);
        }

        let start = Utc
            .with_ymd_and_hms(2025, 1, 2, 14, 0, 0)
            .single()
            .ok_or_else(|| ServiceError::Invariant("seed start date".into()))?;
        let step = Duration::minutes((90 * 24 * 60 / self.movements.max(1)) as i64);

        let mut refused = 0usize;
        for n in 0..self.movements {
            let (Some(product_id), Some(warehouse_id)) =
                (factory.pick(&products), factory.pick(&warehouses))
            else {
                break;
            };
            let occurred_at = start + step * n as i32;
            let outcome = match factory.movement_kind() {
                MovementKind::Purchase => {
                    let request =
                        purchase(&mut factory, product_id, warehouse_id, clerk, occurred_at);
                    services.recorder.record(tenant_id, request).map(drop)
                }
                MovementKind::Dispatch => {
                    let request =
                        dispatch(&mut factory, product_id, warehouse_id, clerk, occurred_at);
                    services.recorder.record(tenant_id, request).map(drop)
                }
                MovementKind::Transfer => {
                    let to = if warehouse_id == central { fractional } else { central };
                    services
                        .recorder
                        .transfer(
                            tenant_id,
                            TransferRequest {
                                product_id,
                                from: warehouse_id,
                                to,
                                lot_number: None,
                                quantity: factory.quantity(25),
                                notes: None,
                                occurred_at,
                                requested_by: clerk,
                            },
                        )
                        .map(drop)
                }
            };
            match outcome {
                Ok(()) => {}
                // Reject policy refusals are part of the load.
                Err(ServiceError::InsufficientStock { requested, available }) => {
                    debug!(%requested, %available, "random movement refused");
                    refused += 1;
                }
                Err(e) => return Err(e),
            }
        }
        if refused > 0 {
            warn!(refused, "random movements refused for insufficient stock");
        }

        let summary = SeedSummary::collect(&services, tenant_id, &[])?;
        Ok((services, summary))
    }
}

fn purchase(
    factory: &mut Factory,
    product_id: ProductId,
    warehouse_id: WarehouseId,
    clerk: UserId,
    occurred_at: DateTime<Utc>,
) -> MovementRequest {
    let invoice: u32 = factory.rng.gen_range(1..=99_999);
    MovementRequest {
        movement_type: MovementType::Purchase,
        product_id,
        warehouse_id,
        lot_number: None,
        expiration_date: None,
        quantity: factory.quantity(60),
        unit_cost: None,
        reason_code: "COMPRA".to_string(),
        references: MovementReferences {
            document_number: Some(format!("CCF-{invoice:05}")),
            supplier_id: Some(factory.supplier()),
            ..MovementReferences::default()
        },
        occurred_at,
        recorded_by: clerk,
    }
}

fn dispatch(
    factory: &mut Factory,
    product_id: ProductId,
    warehouse_id: WarehouseId,
    clerk: UserId,
    occurred_at: DateTime<Utc>,
) -> MovementRequest {
    MovementRequest {
        movement_type: MovementType::Dispatch,
        product_id,
        warehouse_id,
        lot_number: None,
        expiration_date: None,
        quantity: -factory.quantity(30),
        unit_cost: None,
        reason_code: "DESPACHO".to_string(),
        references: MovementReferences {
            customer_id: Some(factory.beneficiary()),
            ..MovementReferences::default()
        },
        occurred_at,
        recorded_by: clerk,
    }
}
