//! Service configuration.
//!
//! Layers, later wins:
//! 1. defaults in code
//! 2. optional file `config/{environment}` (toml, json, yaml, ...)
//! 3. environment variables prefixed `BODEGA`, `__` between sections
//!    (`BODEGA__LEDGER__NEGATIVE_STOCK=reject`)

use config::{ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;

use bodega_catalog::NegativeStockPolicy;
use bodega_closures::DEFAULT_DISCREPANCY_EPSILON;

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BodegaConfig {
    /// development, test, production
    pub environment: String,
    pub ledger: LedgerConfig,
    pub closure: ClosureConfig,
    pub references: ReferenceConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LedgerConfig {
    pub negative_stock: NegativeStockPolicy,
    /// Extra attempts after a row version conflict.
    pub max_retries: u32,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ClosureConfig {
    pub discrepancy_epsilon: Decimal,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ReferenceConfig {
    /// Minimum digits of the daily sequence (`ENT-20250115-0001`).
    pub sequence_width: usize,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    pub json: bool,
}

impl BodegaConfig {
    /// Load for the environment named by `BODEGA_ENVIRONMENT`
    /// (default `development`).
    pub fn load() -> Result<Self, ConfigError> {
        let environment =
            std::env::var("BODEGA_ENVIRONMENT").unwrap_or_else(|_| "development".into());
        Self::load_for(&environment)
    }

    pub fn load_for(environment: &str) -> Result<Self, ConfigError> {
        let config = config::Config::builder()
            .set_default("environment", environment)?
            .set_default("ledger.negative_stock", "clamp")?
            .set_default("ledger.max_retries", 3)?
            .set_default(
                "closure.discrepancy_epsilon",
                DEFAULT_DISCREPANCY_EPSILON.to_string(),
            )?
            .set_default("references.sequence_width", 4)?
            .set_default("logging.filter", "info")?
            .set_default("logging.json", true)?
            .add_source(File::with_name(&format!("config/{environment}")).required(false))
            .add_source(
                Environment::with_prefix("BODEGA")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

impl Default for BodegaConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            ledger: LedgerConfig::default(),
            closure: ClosureConfig::default(),
            references: ReferenceConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            negative_stock: NegativeStockPolicy::Clamp,
            max_retries: 3,
        }
    }
}

impl Default for ClosureConfig {
    fn default() -> Self {
        Self {
            discrepancy_epsilon: DEFAULT_DISCREPANCY_EPSILON,
        }
    }
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self { sequence_width: 4 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    #[test]
    fn defaults_match_code_defaults() {
        let loaded = BodegaConfig::load_for("unit-test-without-file").unwrap();
        let expected = BodegaConfig {
            environment: "unit-test-without-file".to_string(),
            ..BodegaConfig::default()
        };
        assert_eq!(loaded.ledger, expected.ledger);
        assert_eq!(loaded.closure, expected.closure);
        assert_eq!(loaded.references, expected.references);
        assert_eq!(loaded.environment, expected.environment);
    }

    #[test]
    fn file_values_override_defaults() {
        let raw = r#"{
            "environment": "production",
            "ledger": { "negative_stock": "reject", "max_retries": 5 },
            "closure": { "discrepancy_epsilon": "0.01" },
            "references": { "sequence_width": 6 },
            "logging": { "filter": "bodega=debug", "json": false }
        }"#;
        let cfg: BodegaConfig = config::Config::builder()
            .add_source(File::from_str(raw, FileFormat::Json))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(cfg.ledger.negative_stock, NegativeStockPolicy::Reject);
        assert_eq!(cfg.ledger.max_retries, 5);
        assert_eq!(cfg.closure.discrepancy_epsilon, Decimal::new(1, 2));
        assert_eq!(cfg.references.sequence_width, 6);
        assert!(!cfg.logging.json);
    }
}
