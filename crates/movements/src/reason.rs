//! Movement reasons and the reference fields each one demands.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use bodega_core::{DomainError, DomainResult};

use crate::kind::MovementType;
use crate::movement::MovementReferences;

/// Which reference fields a reason makes mandatory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RequiredReferences {
    pub document: bool,
    pub supplier: bool,
    pub customer: bool,
    pub notes: bool,
}

impl RequiredReferences {
    pub fn none() -> Self {
        Self::default()
    }

    fn missing(&self, refs: &MovementReferences) -> Vec<&'static str> {
        let blank = |v: &Option<String>| v.as_deref().is_none_or(|s| s.trim().is_empty());
        let mut out = Vec::new();
        if self.document && blank(&refs.document_number) {
            out.push("document_number");
        }
        if self.supplier && blank(&refs.supplier_id) {
            out.push("supplier_id");
        }
        if self.customer && blank(&refs.customer_id) {
            out.push("customer_id");
        }
        if self.notes && blank(&refs.notes) {
            out.push("notes");
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementReason {
    pub code: String,
    pub name: String,
    pub movement_type: MovementType,
    pub required: RequiredReferences,
    /// Movements with this reason stop at `pending` until someone approves them.
    pub requires_approval: bool,
}

impl MovementReason {
    pub fn new(code: &str, name: &str, movement_type: MovementType) -> Self {
        Self {
            code: code.trim().to_uppercase(),
            name: name.to_string(),
            movement_type,
            required: RequiredReferences::none(),
            requires_approval: false,
        }
    }

    pub fn requiring(mut self, required: RequiredReferences) -> Self {
        self.required = required;
        self
    }

    pub fn with_approval(mut self) -> Self {
        self.requires_approval = true;
        self
    }
}

/// Reasons known to one tenant, keyed by code.
#[derive(Debug, Clone, Default)]
pub struct ReasonCatalog {
    reasons: BTreeMap<String, MovementReason>,
}

impl ReasonCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reasons every tenant starts with.
    pub fn standard() -> Self {
        let doc = RequiredReferences {
            document: true,
            ..RequiredReferences::none()
        };
        let notes = RequiredReferences {
            notes: true,
            ..RequiredReferences::none()
        };

        let mut catalog = Self::new();
        for reason in [
            MovementReason::new("COMPRA", "Compra a proveedor", MovementType::Purchase)
                .requiring(RequiredReferences {
                    supplier: true,
                    ..doc
                }),
            MovementReason::new("DONACION", "Donacion recibida", MovementType::Donation)
                .requiring(doc),
            MovementReason::new("DEVOLUCION", "Devolucion de cliente", MovementType::CustomerReturn)
                .requiring(RequiredReferences {
                    customer: true,
                    ..notes
                })
                .with_approval(),
            MovementReason::new("VENTA", "Venta", MovementType::Sale).requiring(RequiredReferences {
                customer: true,
                ..doc
            }),
            MovementReason::new("DESPACHO", "Despacho a beneficiario", MovementType::Dispatch)
                .requiring(RequiredReferences {
                    customer: true,
                    ..RequiredReferences::none()
                }),
            MovementReason::new("TRASLADO_SALIDA", "Traslado entre bodegas (salida)", MovementType::TransferOut),
            MovementReason::new("TRASLADO_ENTRADA", "Traslado entre bodegas (entrada)", MovementType::TransferIn),
            MovementReason::new("AJUSTE_CONTEO_POS", "Ajuste por conteo fisico (sobrante)", MovementType::AdjustmentIn)
                .requiring(notes)
                .with_approval(),
            MovementReason::new("AJUSTE_CONTEO_NEG", "Ajuste por conteo fisico (faltante)", MovementType::AdjustmentOut)
                .requiring(notes)
                .with_approval(),
            MovementReason::new("REVERSO_ENTRADA", "Reverso de salida", MovementType::AdjustmentIn)
                .requiring(notes),
            MovementReason::new("REVERSO_SALIDA", "Reverso de entrada", MovementType::AdjustmentOut)
                .requiring(notes),
            MovementReason::new("VENCIMIENTO", "Baja por vencimiento", MovementType::Expiry)
                .requiring(notes),
        ] {
            catalog.reasons.insert(reason.code.clone(), reason);
        }
        catalog
    }

    pub fn insert(&mut self, reason: MovementReason) -> DomainResult<()> {
        if reason.code.is_empty() {
            return Err(DomainError::validation("reason code cannot be empty"));
        }
        if self.reasons.contains_key(&reason.code) {
            return Err(DomainError::conflict(format!(
                "movement reason {} already exists",
                reason.code
            )));
        }
        self.reasons.insert(reason.code.clone(), reason);
        Ok(())
    }

    pub fn get(&self, code: &str) -> Option<&MovementReason> {
        self.reasons.get(&code.trim().to_uppercase())
    }

    pub fn list(&self) -> impl Iterator<Item = &MovementReason> {
        self.reasons.values()
    }

    /// Reason code used for compensating movements of the given type.
    pub fn reversal_code(movement_type: MovementType) -> Option<&'static str> {
        match movement_type {
            MovementType::AdjustmentIn => Some("REVERSO_ENTRADA"),
            MovementType::AdjustmentOut => Some("REVERSO_SALIDA"),
            _ => None,
        }
    }

    /// Check that `code` exists, belongs to `movement_type` and that every
    /// reference field it requires is filled in.
    pub fn validate(
        &self,
        code: &str,
        movement_type: MovementType,
        references: &MovementReferences,
    ) -> DomainResult<&MovementReason> {
        let reason = self
            .get(code)
            .ok_or_else(|| DomainError::validation(format!("unknown movement reason: {code}")))?;

        if reason.movement_type != movement_type {
            return Err(DomainError::validation(format!(
                "reason {} applies to {} movements, not {}",
                reason.code, reason.movement_type, movement_type
            )));
        }

        let missing = reason.required.missing(references);
        if !missing.is_empty() {
            return Err(DomainError::validation(format!(
                "reason {} requires: {}",
                reason.code,
                missing.join(", ")
            )));
        }

        Ok(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refs(document: Option<&str>, supplier: Option<&str>) -> MovementReferences {
        MovementReferences {
            document_number: document.map(str::to_string),
            supplier_id: supplier.map(str::to_string),
            ..MovementReferences::default()
        }
    }

    #[test]
    fn purchase_needs_invoice_and_supplier() {
        let catalog = ReasonCatalog::standard();
        let err = catalog
            .validate("compra", MovementType::Purchase, &refs(None, Some("  ")))
            .unwrap_err();
        assert_eq!(
            err,
            DomainError::validation("reason COMPRA requires: document_number, supplier_id")
        );

        let ok = catalog
            .validate("COMPRA", MovementType::Purchase, &refs(Some("CCF-001"), Some("PROV-01")))
            .unwrap();
        assert!(!ok.requires_approval);
    }

    #[test]
    fn type_mismatch_and_unknown_codes_fail() {
        let catalog = ReasonCatalog::standard();
        assert!(catalog
            .validate("VENTA", MovementType::Dispatch, &MovementReferences::default())
            .is_err());
        assert!(catalog
            .validate("NOPE", MovementType::Sale, &MovementReferences::default())
            .is_err());
    }

    #[test]
    fn standard_catalog_covers_every_type() {
        let catalog = ReasonCatalog::standard();
        for t in MovementType::ALL {
            assert!(catalog.list().any(|r| r.movement_type == t), "{t}");
        }
        for t in [MovementType::AdjustmentIn, MovementType::AdjustmentOut] {
            let code = ReasonCatalog::reversal_code(t).unwrap();
            assert_eq!(catalog.get(code).unwrap().movement_type, t);
        }
    }

    #[test]
    fn duplicate_codes_conflict() {
        let mut catalog = ReasonCatalog::standard();
        let err = catalog
            .insert(MovementReason::new("venta", "otra", MovementType::Sale))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }
}
