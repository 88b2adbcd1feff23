//! Catalog service: products (event-sourced), units, warehouses and
//! movement reasons (per-tenant registries).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use tracing::info;

use bodega_catalog::{
    ActivateProduct, CreateProduct, DeactivateProduct, Product, ProductCommand, ProductId,
    ProductPricing, StockThresholds, UnitOfMeasure, UnitRegistry, UpdatePricing, UpdateThresholds,
    ValuationMethod, Warehouse, WarehouseId, WarehouseRegistry, WarehouseStatus,
};
use bodega_core::TenantId;
use bodega_events::{EventBus, EventEnvelope};
use bodega_movements::{MovementReason, ReasonCatalog};

use crate::command_dispatcher::CommandDispatcher;
use crate::error::{ServiceError, ServiceResult};
use crate::event_store::EventStore;
use crate::projections::{PRODUCT_AGGREGATE, ProductCatalogProjection, ProductSnapshot};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProduct {
    pub sku: String,
    pub name: String,
    pub unit: String,
    pub valuation: ValuationMethod,
    pub thresholds: StockThresholds,
    pub pricing: ProductPricing,
    pub tracks_lots: bool,
    pub tracks_expiration: bool,
}

impl NewProduct {
    pub fn new(sku: &str, name: &str, unit: &str) -> Self {
        Self {
            sku: sku.to_string(),
            name: name.to_string(),
            unit: unit.to_string(),
            valuation: ValuationMethod::Average,
            thresholds: StockThresholds::none(),
            pricing: ProductPricing::default(),
            tracks_lots: false,
            tracks_expiration: false,
        }
    }
}

#[derive(Debug)]
struct TenantCatalog {
    units: UnitRegistry,
    warehouses: WarehouseRegistry,
    reasons: ReasonCatalog,
}

impl TenantCatalog {
    fn new(tenant_id: TenantId) -> Self {
        Self {
            units: UnitRegistry::new(),
            warehouses: WarehouseRegistry::new(tenant_id),
            reasons: ReasonCatalog::standard(),
        }
    }
}

#[derive(Debug)]
pub struct Catalog<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    products: ProductCatalogProjection,
    tenants: RwLock<HashMap<TenantId, TenantCatalog>>,
}

impl<S, B> Catalog<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(dispatcher: Arc<CommandDispatcher<S, B>>) -> Self {
        Self {
            dispatcher,
            products: ProductCatalogProjection::in_memory(),
            tenants: RwLock::new(HashMap::new()),
        }
    }

    fn read<T>(
        &self,
        tenant_id: TenantId,
        f: impl FnOnce(&TenantCatalog) -> ServiceResult<T>,
    ) -> ServiceResult<T> {
        let tenants = self
            .tenants
            .read()
            .map_err(|_| ServiceError::Store("catalog lock poisoned".into()))?;
        match tenants.get(&tenant_id) {
            Some(catalog) => f(catalog),
            None => f(&TenantCatalog::new(tenant_id)),
        }
    }

    fn write<T>(
        &self,
        tenant_id: TenantId,
        f: impl FnOnce(&mut TenantCatalog) -> ServiceResult<T>,
    ) -> ServiceResult<T> {
        let mut tenants = self
            .tenants
            .write()
            .map_err(|_| ServiceError::Store("catalog lock poisoned".into()))?;
        f(tenants
            .entry(tenant_id)
            .or_insert_with(|| TenantCatalog::new(tenant_id)))
    }

    fn dispatch_product(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        command: ProductCommand,
    ) -> ServiceResult<()> {
        let committed = self.dispatcher.dispatch(
            tenant_id,
            product_id.aggregate_id(),
            PRODUCT_AGGREGATE,
            command,
            |_, id| Product::empty(ProductId::new(id)),
        )?;
        self.products.apply_stored(&committed)?;
        Ok(())
    }

    // Units

    pub fn register_base_unit(&self, tenant_id: TenantId, code: &str, name: &str) -> ServiceResult<UnitOfMeasure> {
        self.write(tenant_id, |c| Ok(c.units.register_base(code, name)?.clone()))
    }

    pub fn register_derived_unit(
        &self,
        tenant_id: TenantId,
        code: &str,
        name: &str,
        of: &str,
        factor: Decimal,
    ) -> ServiceResult<UnitOfMeasure> {
        self.write(tenant_id, |c| {
            Ok(c.units.register_derived(code, name, of, factor)?.clone())
        })
    }

    pub fn units(&self, tenant_id: TenantId) -> ServiceResult<Vec<UnitOfMeasure>> {
        self.read(tenant_id, |c| Ok(c.units.list().into_iter().cloned().collect()))
    }

    pub fn convert(
        &self,
        tenant_id: TenantId,
        quantity: Decimal,
        from: &str,
        to: &str,
    ) -> ServiceResult<Decimal> {
        self.read(tenant_id, |c| Ok(c.units.convert(quantity, from, to)?))
    }

    // Products

    pub fn create_product(&self, tenant_id: TenantId, new: NewProduct) -> ServiceResult<ProductId> {
        let unit = self.read(tenant_id, |c| Ok(c.units.get(&new.unit)?.code.clone()))?;
        let sku = new.sku.trim().to_uppercase();
        if self
            .products
            .list(tenant_id)
            .iter()
            .any(|p| p.sku.eq_ignore_ascii_case(&sku))
        {
            return Err(ServiceError::Duplicate(format!("product sku {sku}")));
        }

        let product_id = ProductId::generate();
        self.dispatch_product(
            tenant_id,
            product_id,
            ProductCommand::CreateProduct(CreateProduct {
                tenant_id,
                product_id,
                sku: sku.clone(),
                name: new.name,
                unit,
                valuation: new.valuation,
                thresholds: new.thresholds,
                pricing: new.pricing,
                tracks_lots: new.tracks_lots,
                tracks_expiration: new.tracks_expiration,
                occurred_at: Utc::now(),
            }),
        )?;
        info!(tenant_id = %tenant_id, product_id = %product_id, sku = %sku, "product created");
        Ok(product_id)
    }

    pub fn update_pricing(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        pricing: ProductPricing,
    ) -> ServiceResult<()> {
        self.dispatch_product(
            tenant_id,
            product_id,
            ProductCommand::UpdatePricing(UpdatePricing {
                tenant_id,
                product_id,
                pricing,
                occurred_at: Utc::now(),
            }),
        )
    }

    pub fn update_thresholds(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        thresholds: StockThresholds,
    ) -> ServiceResult<()> {
        self.dispatch_product(
            tenant_id,
            product_id,
            ProductCommand::UpdateThresholds(UpdateThresholds {
                tenant_id,
                product_id,
                thresholds,
                occurred_at: Utc::now(),
            }),
        )
    }

    pub fn deactivate_product(&self, tenant_id: TenantId, product_id: ProductId) -> ServiceResult<()> {
        self.dispatch_product(
            tenant_id,
            product_id,
            ProductCommand::DeactivateProduct(DeactivateProduct {
                tenant_id,
                product_id,
                occurred_at: Utc::now(),
            }),
        )
    }

    pub fn activate_product(&self, tenant_id: TenantId, product_id: ProductId) -> ServiceResult<()> {
        self.dispatch_product(
            tenant_id,
            product_id,
            ProductCommand::ActivateProduct(ActivateProduct {
                tenant_id,
                product_id,
                occurred_at: Utc::now(),
            }),
        )
    }

    /// Current product state, rebuilt from its stream.
    pub fn product(&self, tenant_id: TenantId, product_id: ProductId) -> ServiceResult<Product> {
        let product: Product = self
            .dispatcher
            .load(tenant_id, product_id.aggregate_id(), |_, id| {
                Product::empty(ProductId::new(id))
            })?;
        if !product.exists() {
            return Err(ServiceError::not_found(format!("product {product_id}")));
        }
        Ok(product)
    }

    pub fn products(&self, tenant_id: TenantId) -> Vec<ProductSnapshot> {
        self.products.list(tenant_id)
    }

    pub fn product_by_sku(&self, tenant_id: TenantId, sku: &str) -> Option<ProductSnapshot> {
        self.products
            .list(tenant_id)
            .into_iter()
            .find(|p| p.sku.eq_ignore_ascii_case(sku.trim()))
    }

    /// Thresholds of every product, as the ledger's stock alerts expect them.
    pub fn thresholds(&self, tenant_id: TenantId) -> HashMap<ProductId, StockThresholds> {
        self.products
            .list(tenant_id)
            .into_iter()
            .map(|p| (p.product_id, p.thresholds))
            .collect()
    }

    // Warehouses

    pub fn add_warehouse(&self, warehouse: Warehouse) -> ServiceResult<WarehouseId> {
        let tenant_id = warehouse.tenant_id;
        let code = warehouse.code.clone();
        let id = self.write(tenant_id, |c| Ok(c.warehouses.insert(warehouse)?))?;
        info!(tenant_id = %tenant_id, warehouse_id = %id, code = %code, "warehouse added");
        Ok(id)
    }

    pub fn warehouse(&self, tenant_id: TenantId, warehouse_id: WarehouseId) -> ServiceResult<Warehouse> {
        self.read(tenant_id, |c| {
            c.warehouses
                .get(warehouse_id)
                .cloned()
                .map_err(|_| ServiceError::not_found(format!("warehouse {warehouse_id}")))
        })
    }

    pub fn warehouse_by_code(&self, tenant_id: TenantId, code: &str) -> ServiceResult<Option<Warehouse>> {
        self.read(tenant_id, |c| Ok(c.warehouses.by_code(code).cloned()))
    }

    pub fn warehouses(&self, tenant_id: TenantId) -> ServiceResult<Vec<Warehouse>> {
        self.read(tenant_id, |c| Ok(c.warehouses.list().into_iter().cloned().collect()))
    }

    pub fn set_warehouse_status(
        &self,
        tenant_id: TenantId,
        warehouse_id: WarehouseId,
        status: WarehouseStatus,
    ) -> ServiceResult<()> {
        self.write(tenant_id, |c| Ok(c.warehouses.set_status(warehouse_id, status)?))
    }

    pub fn reparent(
        &self,
        tenant_id: TenantId,
        warehouse_id: WarehouseId,
        parent: Option<WarehouseId>,
    ) -> ServiceResult<()> {
        self.write(tenant_id, |c| Ok(c.warehouses.reparent(warehouse_id, parent)?))
    }

    // Reasons

    pub fn reasons(&self, tenant_id: TenantId) -> ServiceResult<ReasonCatalog> {
        self.read(tenant_id, |c| Ok(c.reasons.clone()))
    }

    pub fn add_reason(&self, tenant_id: TenantId, reason: MovementReason) -> ServiceResult<()> {
        self.write(tenant_id, |c| Ok(c.reasons.insert(reason)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bodega_events::InMemoryEventBus;
    use bodega_movements::MovementType;
    use rust_decimal_macros::dec;

    use crate::event_store::InMemoryEventStore;

    fn catalog() -> Catalog<InMemoryEventStore, InMemoryEventBus<EventEnvelope<JsonValue>>> {
        Catalog::new(Arc::new(CommandDispatcher::new(
            InMemoryEventStore::new(),
            InMemoryEventBus::new(),
        )))
    }

    #[test]
    fn product_needs_a_known_unit_and_unique_sku() {
        let c = catalog();
        let t = TenantId::new();
        assert!(matches!(
            c.create_product(t, NewProduct::new("ARZ-001", "Arroz", "LB")),
            Err(ServiceError::Validation(_))
        ));

        c.register_base_unit(t, "LB", "Libra").unwrap();
        let id = c.create_product(t, NewProduct::new("arz-001", "Arroz", "lb")).unwrap();
        assert!(matches!(
            c.create_product(t, NewProduct::new("ARZ-001", "Otro arroz", "LB")),
            Err(ServiceError::Duplicate(_))
        ));

        let product = c.product(t, id).unwrap();
        assert_eq!(product.sku(), "ARZ-001");
        assert_eq!(product.unit(), "LB");
        assert!(c.product(TenantId::new(), id).is_err());
        assert_eq!(c.product_by_sku(t, "arz-001").unwrap().product_id, id);
    }

    #[test]
    fn deactivation_reaches_snapshot_and_aggregate() {
        let c = catalog();
        let t = TenantId::new();
        c.register_base_unit(t, "UNI", "Unidad").unwrap();
        let id = c.create_product(t, NewProduct::new("KIT-VIT", "Kit de vitaminas", "UNI")).unwrap();

        c.deactivate_product(t, id).unwrap();
        assert!(!c.product(t, id).unwrap().is_active());
        assert!(c.deactivate_product(t, id).is_err());
        c.activate_product(t, id).unwrap();

        c.update_thresholds(
            t,
            id,
            StockThresholds {
                min_stock: dec!(20),
                max_stock: Some(dec!(500)),
            },
        )
        .unwrap();
        assert_eq!(c.thresholds(t)[&id].min_stock, dec!(20));
    }

    #[test]
    fn units_convert_within_a_base() {
        let c = catalog();
        let t = TenantId::new();
        c.register_base_unit(t, "UNI", "Unidad").unwrap();
        c.register_derived_unit(t, "CAJ", "Caja x12", "UNI", dec!(12)).unwrap();
        assert_eq!(c.convert(t, dec!(3), "CAJ", "UNI").unwrap(), dec!(36));
        assert!(c.convert(TenantId::new(), dec!(3), "CAJ", "UNI").is_err());
    }

    #[test]
    fn warehouses_and_reasons_are_per_tenant() {
        let c = catalog();
        let t = TenantId::new();
        let central = c
            .add_warehouse(Warehouse::general(t, "BC-01", "Bodega Central San Salvador"))
            .unwrap();
        c.add_warehouse(Warehouse::fractional(t, central, "BF-01", "Bodega Fraccionaria Santa Ana"))
            .unwrap();
        assert_eq!(c.warehouses(t).unwrap().len(), 2);
        assert!(c.warehouses(TenantId::new()).unwrap().is_empty());
        assert!(c.warehouse(TenantId::new(), central).is_err());

        c.set_warehouse_status(t, central, WarehouseStatus::Inactive).unwrap();
        assert!(!c.warehouse(t, central).unwrap().is_active());

        c.add_reason(t, MovementReason::new("MERMA", "Merma en bodega", MovementType::Expiry))
            .unwrap();
        assert!(c.reasons(t).unwrap().get("merma").is_some());
        assert!(c.reasons(TenantId::new()).unwrap().get("merma").is_none());
    }
}
