//! Operation receipts and the caller-facing response envelope.

use serde::{Deserialize, Serialize};

use wallet_common::{Amount, TransferId, UserId, WalletError};

use crate::balance::Balance;
use crate::journal::Transaction;

/// Success messages.
pub mod messages {
    pub const OPEN_BALANCE: &str = "Balance opened";
    pub const CHECK_BALANCE: &str = "Balance retrieved";
    pub const DEPOSIT: &str = "Deposit successful";
    pub const WITHDRAW: &str = "Withdrawal successful";
    pub const TRANSFER: &str = "Transfer successful";
    pub const TRANSACTION_HISTORY: &str = "Transaction history retrieved";
}

/// Outcome of a deposit or withdrawal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceChange {
    pub user_id: UserId,
    /// Balance after the operation.
    pub balance: Amount,
    /// The appended record.
    pub transaction: Transaction,
}

/// Outcome of a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub transfer_id: TransferId,
    pub sender_balance: Amount,
    pub recipient_balance: Amount,
    pub send: Transaction,
    pub receive: Transaction,
}

/// Current balance of one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceView {
    pub user_id: UserId,
    pub balance: Amount,
}

impl From<Balance> for BalanceView {
    fn from(row: Balance) -> Self {
        Self {
            user_id: row.user_id,
            balance: row.amount,
        }
    }
}

/// Uniform envelope returned to callers: a success flag, a message and,
/// on success, the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerResponse<T> {
    pub success: bool,
    pub message: String,
    /// Stable error code on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> LedgerResponse<T> {
    /// Successful response.
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            code: None,
            data: Some(data),
        }
    }

    /// Failed response, described by the error.
    pub fn failed(error: &WalletError) -> Self {
        Self {
            success: false,
            message: error.to_string(),
            code: Some(error.error_code().to_string()),
            data: None,
        }
    }

    /// Build from an operation result.
    pub fn from_result(message: impl Into<String>, result: Result<T, WalletError>) -> Self {
        match result {
            Ok(data) => Self::ok(message, data),
            Err(error) => Self::failed(&error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_envelope() {
        let response = LedgerResponse::from_result(
            messages::TRANSFER,
            Ok::<_, WalletError>(BalanceView {
                user_id: UserId::new(1),
                balance: Amount::from_minor(5_000),
            }),
        );

        assert!(response.success);
        assert_eq!(response.message, "Transfer successful");

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["data"]["balance"], "50.00");
        assert!(json.get("code").is_none());
    }

    #[test]
    fn test_failure_envelope() {
        let error = WalletError::InsufficientFunds {
            user: UserId::new(1),
            required: Amount::from_minor(15_000),
            available: Amount::from_minor(10_000),
        };
        let response = LedgerResponse::<BalanceView>::from_result(messages::WITHDRAW, Err(error));

        assert!(!response.success);
        assert!(response.message.contains("Insufficient balance"));
        assert_eq!(response.code.as_deref(), Some("INSUFFICIENT_FUNDS"));
        assert!(response.data.is_none());
    }
}
