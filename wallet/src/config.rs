//! Wallet CLI configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use wallet_common::WalletError;
use wallet_ledger::{DatabaseConfig, LedgerConfig};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Wallet configuration.
#[derive(Debug, Clone, Default)]
pub struct WalletConfig {
    /// PostgreSQL settings. The in-memory store is used when unset.
    pub database: Option<DatabaseConfig>,
    /// Log output format.
    pub log_format: LogFormat,
    /// Ledger engine settings.
    pub ledger: LedgerConfig,
}

impl WalletConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self {
            ledger: LedgerConfig::from_env(),
            ..Self::default()
        };

        if let Ok(url) = std::env::var("DATABASE_URL") {
            let mut database = DatabaseConfig {
                url,
                ..DatabaseConfig::default()
            };

            if let Ok(max) = std::env::var("DATABASE_MAX_CONNECTIONS") {
                if let Ok(max) = max.parse() {
                    database.max_connections = max;
                }
            }

            if let Ok(min) = std::env::var("DATABASE_MIN_CONNECTIONS") {
                if let Ok(min) = min.parse() {
                    database.min_connections = min;
                }
            }

            if let Ok(secs) = std::env::var("DATABASE_ACQUIRE_TIMEOUT_SECS") {
                if let Ok(secs) = secs.parse() {
                    database.acquire_timeout = Duration::from_secs(secs);
                }
            }

            config.database = Some(database);
        }

        if let Ok(format) = std::env::var("LOG_FORMAT") {
            if format.eq_ignore_ascii_case("pretty") {
                config.log_format = LogFormat::Pretty;
            }
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), WalletError> {
        self.check().map_err(WalletError::Configuration)
    }

    fn check(&self) -> Result<(), String> {
        self.ledger.validate()?;

        if let Some(database) = &self.database {
            if database.url.trim().is_empty() {
                return Err("Database URL cannot be empty".to_string());
            }

            if database.max_connections == 0 {
                return Err("Max connections cannot be 0".to_string());
            }

            if database.min_connections > database.max_connections {
                return Err("Min connections cannot exceed max connections".to_string());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WalletConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.database.is_none());
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_database_config() {
        let mut config = WalletConfig {
            database: Some(DatabaseConfig {
                max_connections: 2,
                min_connections: 5,
                ..DatabaseConfig::default()
            }),
            ..WalletConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(WalletError::Configuration(ref msg)) if msg.contains("Min connections")
        ));

        config.database = Some(DatabaseConfig {
            url: " ".to_string(),
            ..DatabaseConfig::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_ledger_config() {
        let config = WalletConfig {
            ledger: LedgerConfig {
                operation_timeout: Duration::ZERO,
                ..LedgerConfig::default()
            },
            ..WalletConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.error_code(), "CONFIGURATION_ERROR");
        assert!(err.to_string().contains("Operation timeout cannot be 0"));
    }
}
