use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use bodega_core::{Aggregate, AggregateRoot, DomainError, TenantId};
use bodega_events::Event;

bodega_core::aggregate_id!(
    /// Product identifier (tenant-scoped via `tenant_id` fields in events/commands).
    ProductId
);

/// How outbound stock of this product is valued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValuationMethod {
    Fifo,
    Lifo,
    Average,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductStatus {
    Active,
    Inactive,
}

/// Reorder thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockThresholds {
    pub min_stock: Decimal,
    pub max_stock: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockLevel {
    BelowMinimum,
    Normal,
    AboveMaximum,
}

impl StockThresholds {
    pub fn none() -> Self {
        Self {
            min_stock: Decimal::ZERO,
            max_stock: None,
        }
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.min_stock < Decimal::ZERO {
            return Err(DomainError::validation("min_stock cannot be negative"));
        }
        if let Some(max) = self.max_stock {
            if max < self.min_stock {
                return Err(DomainError::validation("max_stock must be >= min_stock"));
            }
        }
        Ok(())
    }

    pub fn level(&self, quantity: Decimal) -> StockLevel {
        if quantity < self.min_stock {
            StockLevel::BelowMinimum
        } else if self.max_stock.is_some_and(|max| quantity > max) {
            StockLevel::AboveMaximum
        } else {
            StockLevel::Normal
        }
    }
}

/// Standard cost and list price, in the company currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProductPricing {
    pub unit_cost: Decimal,
    pub sale_price: Option<Decimal>,
}

impl ProductPricing {
    fn validate(&self) -> Result<(), DomainError> {
        if self.unit_cost < Decimal::ZERO {
            return Err(DomainError::validation("unit_cost cannot be negative"));
        }
        if self.sale_price.is_some_and(|p| p < Decimal::ZERO) {
            return Err(DomainError::validation("sale_price cannot be negative"));
        }
        Ok(())
    }
}

/// Aggregate root: Product.
///
/// `sku`, `unit` and `valuation` are fixed at creation; pricing and
/// thresholds evolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    id: ProductId,
    tenant_id: Option<TenantId>,
    sku: String,
    name: String,
    unit: String,
    valuation: ValuationMethod,
    thresholds: StockThresholds,
    pricing: ProductPricing,
    tracks_lots: bool,
    tracks_expiration: bool,
    status: ProductStatus,
    version: u64,
    created: bool,
}

impl Product {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: ProductId) -> Self {
        Self {
            id,
            tenant_id: None,
            sku: String::new(),
            name: String::new(),
            unit: String::new(),
            valuation: ValuationMethod::Average,
            thresholds: StockThresholds::none(),
            pricing: ProductPricing::default(),
            tracks_lots: false,
            tracks_expiration: false,
            status: ProductStatus::Active,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ProductId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn valuation(&self) -> ValuationMethod {
        self.valuation
    }

    pub fn thresholds(&self) -> StockThresholds {
        self.thresholds
    }

    pub fn pricing(&self) -> ProductPricing {
        self.pricing
    }

    pub fn tracks_lots(&self) -> bool {
        self.tracks_lots
    }

    pub fn tracks_expiration(&self) -> bool {
        self.tracks_expiration
    }

    pub fn status(&self) -> ProductStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.created && self.status == ProductStatus::Active
    }
}

impl AggregateRoot for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateProduct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateProduct {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub unit: String,
    pub valuation: ValuationMethod,
    pub thresholds: StockThresholds,
    pub pricing: ProductPricing,
    pub tracks_lots: bool,
    pub tracks_expiration: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdatePricing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePricing {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub pricing: ProductPricing,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateThresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateThresholds {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub thresholds: StockThresholds,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeactivateProduct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeactivateProduct {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ActivateProduct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivateProduct {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductCommand {
    CreateProduct(CreateProduct),
    UpdatePricing(UpdatePricing),
    UpdateThresholds(UpdateThresholds),
    DeactivateProduct(DeactivateProduct),
    ActivateProduct(ActivateProduct),
}

/// Event: ProductCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductCreated {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub unit: String,
    pub valuation: ValuationMethod,
    pub thresholds: StockThresholds,
    pub pricing: ProductPricing,
    pub tracks_lots: bool,
    pub tracks_expiration: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PricingUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingUpdated {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub pricing: ProductPricing,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ThresholdsUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdsUpdated {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub thresholds: StockThresholds,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProductDeactivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductDeactivated {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProductActivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductActivated {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductEvent {
    ProductCreated(ProductCreated),
    PricingUpdated(PricingUpdated),
    ThresholdsUpdated(ThresholdsUpdated),
    ProductDeactivated(ProductDeactivated),
    ProductActivated(ProductActivated),
}

impl ProductEvent {
    pub fn tenant_id(&self) -> TenantId {
        match self {
            ProductEvent::ProductCreated(e) => e.tenant_id,
            ProductEvent::PricingUpdated(e) => e.tenant_id,
            ProductEvent::ThresholdsUpdated(e) => e.tenant_id,
            ProductEvent::ProductDeactivated(e) => e.tenant_id,
            ProductEvent::ProductActivated(e) => e.tenant_id,
        }
    }

    pub fn product_id(&self) -> ProductId {
        match self {
            ProductEvent::ProductCreated(e) => e.product_id,
            ProductEvent::PricingUpdated(e) => e.product_id,
            ProductEvent::ThresholdsUpdated(e) => e.product_id,
            ProductEvent::ProductDeactivated(e) => e.product_id,
            ProductEvent::ProductActivated(e) => e.product_id,
        }
    }
}

impl Event for ProductEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProductEvent::ProductCreated(_) => "catalog.product.created",
            ProductEvent::PricingUpdated(_) => "catalog.product.pricing_updated",
            ProductEvent::ThresholdsUpdated(_) => "catalog.product.thresholds_updated",
            ProductEvent::ProductDeactivated(_) => "catalog.product.deactivated",
            ProductEvent::ProductActivated(_) => "catalog.product.activated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ProductEvent::ProductCreated(e) => e.occurred_at,
            ProductEvent::PricingUpdated(e) => e.occurred_at,
            ProductEvent::ThresholdsUpdated(e) => e.occurred_at,
            ProductEvent::ProductDeactivated(e) => e.occurred_at,
            ProductEvent::ProductActivated(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Product {
    type Command = ProductCommand;
    type Event = ProductEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ProductEvent::ProductCreated(e) => {
                self.id = e.product_id;
                self.tenant_id = Some(e.tenant_id);
                self.sku = e.sku.clone();
                self.name = e.name.clone();
                self.unit = e.unit.clone();
                self.valuation = e.valuation;
                self.thresholds = e.thresholds;
                self.pricing = e.pricing;
                self.tracks_lots = e.tracks_lots;
                self.tracks_expiration = e.tracks_expiration;
                self.status = ProductStatus::Active;
                self.created = true;
            }
            ProductEvent::PricingUpdated(e) => {
                self.pricing = e.pricing;
            }
            ProductEvent::ThresholdsUpdated(e) => {
                self.thresholds = e.thresholds;
            }
            ProductEvent::ProductDeactivated(_) => {
                self.status = ProductStatus::Inactive;
            }
            ProductEvent::ProductActivated(_) => {
                self.status = ProductStatus::Active;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ProductCommand::CreateProduct(cmd) => self.handle_create(cmd),
            ProductCommand::UpdatePricing(cmd) => self.handle_pricing(cmd),
            ProductCommand::UpdateThresholds(cmd) => self.handle_thresholds(cmd),
            ProductCommand::DeactivateProduct(cmd) => self.handle_deactivate(cmd),
            ProductCommand::ActivateProduct(cmd) => self.handle_activate(cmd),
        }
    }
}

impl Product {
    fn ensure_existing(&self, tenant_id: TenantId, product_id: ProductId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != product_id {
            return Err(DomainError::invariant("product_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateProduct) -> Result<Vec<ProductEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("product already exists"));
        }
        if cmd.sku.trim().is_empty() {
            return Err(DomainError::validation("sku cannot be empty"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if cmd.unit.trim().is_empty() {
            return Err(DomainError::validation("unit of measure cannot be empty"));
        }
        if cmd.tracks_expiration && !cmd.tracks_lots {
            return Err(DomainError::validation(
                "expiration tracking requires lot tracking",
            ));
        }
        cmd.thresholds.validate()?;
        cmd.pricing.validate()?;

        Ok(vec![ProductEvent::ProductCreated(ProductCreated {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            sku: cmd.sku.trim().to_uppercase(),
            name: cmd.name.trim().to_string(),
            unit: cmd.unit.trim().to_uppercase(),
            valuation: cmd.valuation,
            thresholds: cmd.thresholds,
            pricing: cmd.pricing,
            tracks_lots: cmd.tracks_lots,
            tracks_expiration: cmd.tracks_expiration,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_pricing(&self, cmd: &UpdatePricing) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.product_id)?;
        cmd.pricing.validate()?;
        if cmd.pricing == self.pricing {
            return Ok(vec![]);
        }
        Ok(vec![ProductEvent::PricingUpdated(PricingUpdated {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            pricing: cmd.pricing,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_thresholds(&self, cmd: &UpdateThresholds) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.product_id)?;
        cmd.thresholds.validate()?;
        if cmd.thresholds == self.thresholds {
            return Ok(vec![]);
        }
        Ok(vec![ProductEvent::ThresholdsUpdated(ThresholdsUpdated {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            thresholds: cmd.thresholds,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_deactivate(&self, cmd: &DeactivateProduct) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.product_id)?;
        if self.status == ProductStatus::Inactive {
            return Err(DomainError::state_transition("inactive", "deactivate product"));
        }
        Ok(vec![ProductEvent::ProductDeactivated(ProductDeactivated {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_activate(&self, cmd: &ActivateProduct) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.product_id)?;
        if self.status == ProductStatus::Active {
            return Err(DomainError::state_transition("active", "activate product"));
        }
        Ok(vec![ProductEvent::ProductActivated(ProductActivated {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bodega_events::execute;
    use rust_decimal_macros::dec;

    fn create_cmd(tenant_id: TenantId, product_id: ProductId) -> CreateProduct {
        CreateProduct {
            tenant_id,
            product_id,
            sku: "arr-001".to_string(),
            name: "Arroz blanco 1 lb".to_string(),
            unit: "lb".to_string(),
            valuation: ValuationMethod::Average,
            thresholds: StockThresholds {
                min_stock: dec!(20),
                max_stock: Some(dec!(500)),
            },
            pricing: ProductPricing {
                unit_cost: dec!(0.55),
                sale_price: Some(dec!(0.75)),
            },
            tracks_lots: false,
            tracks_expiration: false,
            occurred_at: Utc::now(),
        }
    }

    fn created_product() -> (Product, TenantId) {
        let tenant_id = TenantId::new();
        let product_id = ProductId::generate();
        let mut product = Product::empty(product_id);
        execute(
            &mut product,
            &ProductCommand::CreateProduct(create_cmd(tenant_id, product_id)),
        )
        .unwrap();
        (product, tenant_id)
    }

    #[test]
    fn create_normalizes_identity_fields() {
        let (product, tenant_id) = created_product();
        assert_eq!(product.sku(), "ARR-001");
        assert_eq!(product.unit(), "LB");
        assert_eq!(product.tenant_id(), Some(tenant_id));
        assert!(product.is_active());
        assert_eq!(product.version(), 1);
    }

    #[test]
    fn create_rejects_inverted_thresholds() {
        let tenant_id = TenantId::new();
        let product_id = ProductId::generate();
        let mut cmd = create_cmd(tenant_id, product_id);
        cmd.thresholds = StockThresholds {
            min_stock: dec!(10),
            max_stock: Some(dec!(5)),
        };

        let err = Product::empty(product_id)
            .handle(&ProductCommand::CreateProduct(cmd))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn expiration_requires_lots() {
        let tenant_id = TenantId::new();
        let product_id = ProductId::generate();
        let mut cmd = create_cmd(tenant_id, product_id);
        cmd.tracks_expiration = true;

        assert!(Product::empty(product_id)
            .handle(&ProductCommand::CreateProduct(cmd))
            .is_err());
    }

    #[test]
    fn create_twice_conflicts() {
        let (product, tenant_id) = created_product();
        let err = product
            .handle(&ProductCommand::CreateProduct(create_cmd(tenant_id, product.id_typed())))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn unchanged_pricing_emits_nothing() {
        let (product, tenant_id) = created_product();
        let events = product
            .handle(&ProductCommand::UpdatePricing(UpdatePricing {
                tenant_id,
                product_id: product.id_typed(),
                pricing: product.pricing(),
                occurred_at: Utc::now(),
            }))
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn deactivate_then_activate() {
        let (mut product, tenant_id) = created_product();
        let product_id = product.id_typed();

        execute(
            &mut product,
            &ProductCommand::DeactivateProduct(DeactivateProduct {
                tenant_id,
                product_id,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        assert!(!product.is_active());

        let err = product
            .handle(&ProductCommand::DeactivateProduct(DeactivateProduct {
                tenant_id,
                product_id,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::StateTransition { .. }));

        execute(
            &mut product,
            &ProductCommand::ActivateProduct(ActivateProduct {
                tenant_id,
                product_id,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        assert!(product.is_active());
        assert_eq!(product.version(), 3);
    }

    #[test]
    fn wrong_tenant_is_rejected() {
        let (product, _) = created_product();
        let err = product
            .handle(&ProductCommand::UpdateThresholds(UpdateThresholds {
                tenant_id: TenantId::new(),
                product_id: product.id_typed(),
                thresholds: StockThresholds::none(),
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn thresholds_classify_levels() {
        let t = StockThresholds {
            min_stock: dec!(20),
            max_stock: Some(dec!(100)),
        };
        assert_eq!(t.level(dec!(19.5)), StockLevel::BelowMinimum);
        assert_eq!(t.level(dec!(20)), StockLevel::Normal);
        assert_eq!(t.level(dec!(100.01)), StockLevel::AboveMaximum);
        assert_eq!(StockThresholds::none().level(dec!(1000)), StockLevel::Normal);
    }
}
