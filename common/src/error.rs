//! Error types for wallet ledger operations.

use crate::{Amount, AmountError, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Caller-facing ledger operations, used to give errors context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    OpenBalance,
    CheckBalance,
    Deposit,
    Withdraw,
    Transfer,
    TransactionHistory,
}

impl Operation {
    /// Stable lowercase name, used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::OpenBalance => "open_balance",
            Operation::CheckBalance => "check_balance",
            Operation::Deposit => "deposit",
            Operation::Withdraw => "withdraw",
            Operation::Transfer => "transfer",
            Operation::TransactionHistory => "transaction_history",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures reported by a balance or transaction store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No balance row for the user.
    #[error("Balance not found for user {0}")]
    NotFound(UserId),

    /// A balance row already exists for the user.
    #[error("Balance already exists for user {0}")]
    AlreadyExists(UserId),

    /// Query or statement failed.
    #[error("Database error: {0}")]
    Database(String),

    /// Begin, commit or rollback failed.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// The store cannot serve the request right now.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Main error type for wallet ledger operations.
#[derive(Error, Debug)]
pub enum WalletError {
    /// No balance record exists for the user.
    #[error("No balance found for user {0}")]
    NotFound(UserId),

    /// The user already has a balance record.
    #[error("Balance already exists for user {0}")]
    AlreadyExists(UserId),

    /// Withdrawal or transfer exceeds the available balance.
    #[error("Insufficient balance for user {user}: required {required}, available {available}")]
    InsufficientFunds {
        user: UserId,
        required: Amount,
        available: Amount,
    },

    /// Amount rejected by the configured amount policy.
    #[error("Invalid amount {amount}: {reason}")]
    InvalidAmount { amount: Amount, reason: String },

    /// Transfer request is malformed.
    #[error("Invalid transfer: {0}")]
    InvalidTransfer(String),

    /// A balance computation left the representable range.
    #[error("Arithmetic error: {0}")]
    Arithmetic(#[from] AmountError),

    /// The persistence layer failed.
    #[error("Failed to {operation} for user {user}: {source}")]
    Store {
        operation: Operation,
        user: UserId,
        #[source]
        source: StoreError,
    },

    /// The operation exceeded its deadline.
    #[error("Operation {0} timed out")]
    Timeout(Operation),

    /// The operation was cancelled before it completed.
    #[error("Operation {0} cancelled")]
    Cancelled(Operation),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl WalletError {
    /// Wrap a store failure with the operation and user it happened in.
    ///
    /// Row-level outcomes keep their own variants so callers can tell a
    /// missing balance apart from a broken store.
    pub fn from_store(operation: Operation, user: UserId, source: StoreError) -> Self {
        match source {
            StoreError::NotFound(missing) => WalletError::NotFound(missing),
            StoreError::AlreadyExists(existing) => WalletError::AlreadyExists(existing),
            source => WalletError::Store {
                operation,
                user,
                source,
            },
        }
    }

    /// Check if retrying the same request might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WalletError::Timeout(_)
                | WalletError::Store {
                    source: StoreError::Unavailable(_) | StoreError::Transaction(_),
                    ..
                }
        )
    }

    /// Get a stable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            WalletError::NotFound(_) => "NOT_FOUND",
            WalletError::AlreadyExists(_) => "ALREADY_EXISTS",
            WalletError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            WalletError::InvalidAmount { .. } => "INVALID_AMOUNT",
            WalletError::InvalidTransfer(_) => "INVALID_TRANSFER",
            WalletError::Arithmetic(_) => "ARITHMETIC_ERROR",
            WalletError::Store { .. } => "STORE_ERROR",
            WalletError::Timeout(_) => "TIMEOUT",
            WalletError::Cancelled(_) => "CANCELLED",
            WalletError::Configuration(_) => "CONFIGURATION_ERROR",
        }
    }
}

/// Result type alias for wallet ledger operations.
pub type Result<T> = std::result::Result<T, WalletError>;
