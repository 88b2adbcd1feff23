//! Warehouse hierarchy.
//!
//! General warehouses hold bulk stock; fractional warehouses hang below a
//! general one and dispatch in smaller units. Warehouses are created once and
//! rarely change beyond status, so they are plain entities held in a
//! per-tenant registry rather than event-sourced aggregates.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use bodega_core::{AggregateId, DomainError, DomainResult, Entity, TenantId};

use crate::settings::WarehouseSettings;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WarehouseId(pub AggregateId);

impl WarehouseId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn generate() -> Self {
        Self(AggregateId::new())
    }
}

impl core::fmt::Display for WarehouseId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarehouseKind {
    General,
    Fractional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarehouseStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warehouse {
    pub id: WarehouseId,
    pub tenant_id: TenantId,
    pub code: String,
    pub name: String,
    pub kind: WarehouseKind,
    pub parent: Option<WarehouseId>,
    /// Storage capacity in the warehouse's reference unit, if bounded.
    pub capacity: Option<Decimal>,
    pub status: WarehouseStatus,
    pub settings: WarehouseSettings,
}

impl Warehouse {
    pub fn general(tenant_id: TenantId, code: &str, name: &str) -> Self {
        Self {
            id: WarehouseId::generate(),
            tenant_id,
            code: code.to_string(),
            name: name.to_string(),
            kind: WarehouseKind::General,
            parent: None,
            capacity: None,
            status: WarehouseStatus::Active,
            settings: WarehouseSettings::default(),
        }
    }

    pub fn fractional(tenant_id: TenantId, parent: WarehouseId, code: &str, name: &str) -> Self {
        Self {
            kind: WarehouseKind::Fractional,
            parent: Some(parent),
            ..Self::general(tenant_id, code, name)
        }
    }

    pub fn with_capacity(mut self, capacity: Decimal) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn with_settings(mut self, settings: WarehouseSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == WarehouseStatus::Active
    }
}

impl Entity for Warehouse {
    type Id = WarehouseId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// All warehouses of one tenant, with parent/child links.
#[derive(Debug, Clone)]
pub struct WarehouseRegistry {
    tenant_id: TenantId,
    warehouses: BTreeMap<WarehouseId, Warehouse>,
}

impl WarehouseRegistry {
    pub fn new(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            warehouses: BTreeMap::new(),
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn insert(&mut self, warehouse: Warehouse) -> DomainResult<WarehouseId> {
        if warehouse.tenant_id != self.tenant_id {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.warehouses.contains_key(&warehouse.id) {
            return Err(DomainError::conflict("warehouse already exists"));
        }
        if warehouse.code.trim().is_empty() {
            return Err(DomainError::validation("warehouse code cannot be empty"));
        }
        if warehouse.name.trim().is_empty() {
            return Err(DomainError::validation("warehouse name cannot be empty"));
        }
        if self
            .warehouses
            .values()
            .any(|w| w.code.eq_ignore_ascii_case(warehouse.code.trim()))
        {
            return Err(DomainError::conflict(format!(
                "warehouse code {} already in use",
                warehouse.code
            )));
        }
        if warehouse.capacity.is_some_and(|c| c <= Decimal::ZERO) {
            return Err(DomainError::validation("capacity must be positive"));
        }
        self.check_parent(warehouse.kind, warehouse.parent)?;

        let id = warehouse.id;
        self.warehouses.insert(id, warehouse);
        Ok(id)
    }

    pub fn get(&self, id: WarehouseId) -> DomainResult<&Warehouse> {
        self.warehouses.get(&id).ok_or(DomainError::NotFound)
    }

    pub fn by_code(&self, code: &str) -> Option<&Warehouse> {
        self.warehouses
            .values()
            .find(|w| w.code.eq_ignore_ascii_case(code))
    }

    pub fn list(&self) -> Vec<&Warehouse> {
        self.warehouses.values().collect()
    }

    pub fn children(&self, id: WarehouseId) -> Vec<&Warehouse> {
        self.warehouses
            .values()
            .filter(|w| w.parent == Some(id))
            .collect()
    }

    /// Parent chain, nearest first.
    pub fn ancestors(&self, id: WarehouseId) -> DomainResult<Vec<WarehouseId>> {
        let mut out = Vec::new();
        let mut current = self.get(id)?.parent;
        while let Some(parent) = current {
            if out.contains(&parent) {
                return Err(DomainError::invariant("warehouse hierarchy contains a cycle"));
            }
            out.push(parent);
            current = self.get(parent)?.parent;
        }
        Ok(out)
    }

    /// Every warehouse below `id`, breadth first.
    pub fn descendants(&self, id: WarehouseId) -> DomainResult<Vec<WarehouseId>> {
        self.get(id)?;
        let mut out = Vec::new();
        let mut frontier = vec![id];
        while let Some(next) = frontier.pop() {
            for child in self.children(next) {
                out.push(child.id);
                frontier.insert(0, child.id);
            }
        }
        Ok(out)
    }

    pub fn reparent(&mut self, id: WarehouseId, parent: Option<WarehouseId>) -> DomainResult<()> {
        let kind = self.get(id)?.kind;
        self.check_parent(kind, parent)?;
        if let Some(p) = parent {
            if p == id || self.ancestors(p)?.contains(&id) {
                return Err(DomainError::invariant(
                    "a warehouse cannot be placed below itself",
                ));
            }
        }
        if let Some(w) = self.warehouses.get_mut(&id) {
            w.parent = parent;
        }
        Ok(())
    }

    pub fn set_status(&mut self, id: WarehouseId, status: WarehouseStatus) -> DomainResult<()> {
        let warehouse = self.warehouses.get_mut(&id).ok_or(DomainError::NotFound)?;
        warehouse.status = status;
        Ok(())
    }

    fn check_parent(&self, kind: WarehouseKind, parent: Option<WarehouseId>) -> DomainResult<()> {
        match (kind, parent) {
            (WarehouseKind::Fractional, None) => Err(DomainError::validation(
                "a fractional warehouse needs a general parent warehouse",
            )),
            (_, Some(parent_id)) => {
                let parent = self
                    .warehouses
                    .get(&parent_id)
                    .ok_or_else(|| DomainError::validation("parent warehouse does not exist"))?;
                if parent.kind != WarehouseKind::General {
                    return Err(DomainError::validation(
                        "only general warehouses can have child warehouses",
                    ));
                }
                Ok(())
            }
            (WarehouseKind::General, None) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn registry() -> (WarehouseRegistry, WarehouseId, WarehouseId, WarehouseId) {
        let tenant = TenantId::new();
        let mut reg = WarehouseRegistry::new(tenant);
        let central = reg
            .insert(Warehouse::general(tenant, "BC-SS", "Bodega Central San Salvador"))
            .unwrap();
        let regional = reg
            .insert(
                Warehouse::general(tenant, "BR-SM", "Bodega Regional San Miguel")
                    .with_capacity(dec!(5000)),
            )
            .unwrap();
        reg.reparent(regional, Some(central)).unwrap();
        let fractional = reg
            .insert(Warehouse::fractional(tenant, regional, "BF-SM", "Fraccionaria San Miguel"))
            .unwrap();
        (reg, central, regional, fractional)
    }

    #[test]
    fn walks_tree_both_ways() {
        let (reg, central, regional, fractional) = registry();
        assert_eq!(reg.ancestors(fractional).unwrap(), vec![regional, central]);
        assert_eq!(reg.descendants(central).unwrap(), vec![regional, fractional]);
        assert_eq!(reg.children(regional).len(), 1);
    }

    #[test]
    fn fractional_needs_general_parent() {
        let (mut reg, _, _, fractional) = registry();
        let tenant = reg.tenant_id();

        let mut orphan = Warehouse::fractional(tenant, fractional, "BF-X", "Orphan");
        assert!(reg.insert(orphan.clone()).is_err());

        orphan.parent = None;
        assert!(matches!(reg.insert(orphan), Err(DomainError::Validation(_))));
    }

    #[test]
    fn reparent_refuses_cycles() {
        let (mut reg, central, regional, _) = registry();
        let err = reg.reparent(central, Some(regional)).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn codes_are_unique_per_tenant() {
        let (mut reg, _, _, _) = registry();
        let tenant = reg.tenant_id();
        let err = reg
            .insert(Warehouse::general(tenant, "bc-ss", "Duplicada"))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
        assert!(reg.by_code("BC-SS").is_some());
    }

    #[test]
    fn foreign_tenant_is_rejected() {
        let (mut reg, _, _, _) = registry();
        let err = reg
            .insert(Warehouse::general(TenantId::new(), "X", "Otra"))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }
}
