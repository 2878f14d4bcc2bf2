//! Ledger engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use wallet_common::{constants, Amount, WalletError};

/// What the engine accepts as a deposit, withdrawal or transfer amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmountPolicy {
    /// Reject zero and negative amounts.
    #[default]
    RequirePositive,
    /// Accept any amount.
    Unchecked,
}

impl AmountPolicy {
    /// Check `amount` against the policy.
    pub fn check(&self, amount: Amount) -> Result<(), WalletError> {
        match self {
            AmountPolicy::RequirePositive if !amount.is_positive() => {
                Err(WalletError::InvalidAmount {
                    amount,
                    reason: "amount must be greater than zero".to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Check an opening balance. Zero is always a valid opening amount.
    pub fn check_opening(&self, amount: Amount) -> Result<(), WalletError> {
        match self {
            AmountPolicy::RequirePositive if amount.is_negative() => {
                Err(WalletError::InvalidAmount {
                    amount,
                    reason: "opening balance cannot be negative".to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Parse a policy name as used in the environment.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "require_positive" | "positive" => Some(AmountPolicy::RequirePositive),
            "unchecked" | "none" => Some(AmountPolicy::Unchecked),
            _ => None,
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Deadline for each operation, including waiting for row locks.
    pub operation_timeout: Duration,
    /// Amount validation policy.
    pub amount_policy: AmountPolicy,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            operation_timeout: constants::default_operation_timeout(),
            amount_policy: AmountPolicy::default(),
        }
    }
}

impl LedgerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(ms) = std::env::var("LEDGER_OPERATION_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse() {
                config.operation_timeout = Duration::from_millis(ms);
            }
        }

        if let Ok(policy) = std::env::var("LEDGER_AMOUNT_POLICY") {
            if let Some(policy) = AmountPolicy::parse(&policy) {
                config.amount_policy = policy;
            }
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.operation_timeout.is_zero() {
            return Err("Operation timeout cannot be 0".to_string());
        }

        Ok(())
    }
}
