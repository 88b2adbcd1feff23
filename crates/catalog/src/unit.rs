//! Units of measure and conversions between them.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use bodega_core::{DomainError, DomainResult, Entity};

/// A unit of measure.
///
/// A base unit (`UNI`, `KG`) has no `base` and a factor of one. A derived
/// unit states how many base units one of it holds: `CAJ` (box of 12) is
/// `base = UNI, factor = 12`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitOfMeasure {
    pub code: String,
    pub name: String,
    pub base: Option<String>,
    pub factor: Decimal,
}

impl UnitOfMeasure {
    pub fn is_base(&self) -> bool {
        self.base.is_none()
    }

    /// Code of the base unit this unit is measured in.
    pub fn root(&self) -> &str {
        self.base.as_deref().unwrap_or(&self.code)
    }
}

impl Entity for UnitOfMeasure {
    type Id = String;

    fn id(&self) -> &Self::Id {
        &self.code
    }
}

/// Registry of base and derived units.
///
/// Derived units may be declared relative to another derived unit; the
/// factor is folded down to the base so lookups never chain.
#[derive(Debug, Clone, Default)]
pub struct UnitRegistry {
    units: BTreeMap<String, UnitOfMeasure>,
}

impl UnitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_base(&mut self, code: &str, name: &str) -> DomainResult<&UnitOfMeasure> {
        let code = normalize_code(code)?;
        self.ensure_free(&code)?;

        let unit = UnitOfMeasure {
            code: code.clone(),
            name: name.trim().to_string(),
            base: None,
            factor: Decimal::ONE,
        };
        Ok(self.units.entry(code).or_insert(unit))
    }

    /// Register `code` as `factor` × `of`.
    pub fn register_derived(
        &mut self,
        code: &str,
        name: &str,
        of: &str,
        factor: Decimal,
    ) -> DomainResult<&UnitOfMeasure> {
        let code = normalize_code(code)?;
        self.ensure_free(&code)?;

        if factor <= Decimal::ZERO {
            return Err(DomainError::validation(format!(
                "conversion factor for {code} must be positive"
            )));
        }

        let reference = self.get(of)?;
        let unit = UnitOfMeasure {
            code: code.clone(),
            name: name.trim().to_string(),
            base: Some(reference.root().to_string()),
            factor: factor * reference.factor,
        };
        Ok(self.units.entry(code).or_insert(unit))
    }

    pub fn get(&self, code: &str) -> DomainResult<&UnitOfMeasure> {
        let key = code.trim().to_uppercase();
        self.units
            .get(&key)
            .ok_or_else(|| DomainError::validation(format!("unknown unit of measure: {code}")))
    }

    pub fn contains(&self, code: &str) -> bool {
        self.get(code).is_ok()
    }

    pub fn list(&self) -> Vec<&UnitOfMeasure> {
        self.units.values().collect()
    }

    /// Convert `quantity` expressed in `from` into `to`.
    ///
    /// Both units must share a base unit.
    pub fn convert(&self, quantity: Decimal, from: &str, to: &str) -> DomainResult<Decimal> {
        let from = self.get(from)?;
        let to = self.get(to)?;

        if from.root() != to.root() {
            return Err(DomainError::validation(format!(
                "cannot convert {} to {}: different base units",
                from.code, to.code
            )));
        }

        Ok(quantity * from.factor / to.factor)
    }

    fn ensure_free(&self, code: &str) -> DomainResult<()> {
        if self.units.contains_key(code) {
            return Err(DomainError::conflict(format!(
                "unit of measure {code} already registered"
            )));
        }
        Ok(())
    }
}

fn normalize_code(code: &str) -> DomainResult<String> {
    let code = code.trim().to_uppercase();
    if code.is_empty() {
        return Err(DomainError::validation("unit code cannot be empty"));
    }
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn registry() -> UnitRegistry {
        let mut units = UnitRegistry::new();
        units.register_base("UNI", "Unidad").unwrap();
        units.register_derived("CAJ", "Caja x12", "UNI", dec!(12)).unwrap();
        units.register_derived("FAR", "Fardo x4 cajas", "CAJ", dec!(4)).unwrap();
        units.register_base("KG", "Kilogramo").unwrap();
        units.register_derived("LB", "Libra", "KG", dec!(0.453592)).unwrap();
        units
    }

    #[test]
    fn derived_of_derived_folds_to_base() {
        let units = registry();
        let fardo = units.get("far").unwrap();
        assert_eq!(fardo.base.as_deref(), Some("UNI"));
        assert_eq!(fardo.factor, dec!(48));
    }

    #[test]
    fn converts_within_dimension() {
        let units = registry();
        assert_eq!(units.convert(dec!(2), "CAJ", "UNI").unwrap(), dec!(24));
        assert_eq!(units.convert(dec!(24), "UNI", "CAJ").unwrap(), dec!(2));
        assert_eq!(units.convert(dec!(100), "LB", "KG").unwrap(), dec!(45.3592));
    }

    #[test]
    fn refuses_cross_dimension_conversion() {
        let units = registry();
        assert!(matches!(
            units.convert(dec!(1), "KG", "UNI"),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn rejects_duplicates_and_bad_factors() {
        let mut units = registry();
        assert!(matches!(
            units.register_base("uni", "again"),
            Err(DomainError::Conflict(_))
        ));
        assert!(units.register_derived("DOC", "Docena", "UNI", dec!(0)).is_err());
        assert!(units.register_derived("QQ", "Quintal", "TON", dec!(1)).is_err());
    }

    proptest::proptest! {
        #[test]
        fn conversion_within_a_dimension_returns_to_the_start(bales in 0i64..100_000) {
            let units = registry();
            let bales = Decimal::from(bales);
            let each = units.convert(bales, "FAR", "UNI").unwrap();
            proptest::prop_assert_eq!(each, bales * dec!(48));
            proptest::prop_assert_eq!(units.convert(each, "UNI", "FAR").unwrap(), bales);
        }
    }
}
