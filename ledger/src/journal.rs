//! Transaction records for the append-only ledger log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use wallet_common::{Amount, AmountError, TransactionId, TransferId, UserId};

/// Kind of balance-affecting event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionKind {
    Deposit,
    Withdraw,
    /// Outgoing leg of a transfer.
    TransferSend,
    /// Incoming leg of a transfer.
    TransferReceive,
}

impl TransactionKind {
    /// Numeric code used by persistent stores.
    pub fn code(&self) -> i16 {
        match self {
            TransactionKind::Deposit => 0,
            TransactionKind::Withdraw => 1,
            TransactionKind::TransferSend => 2,
            TransactionKind::TransferReceive => 3,
        }
    }

    /// Decode a persisted kind code.
    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(TransactionKind::Deposit),
            1 => Some(TransactionKind::Withdraw),
            2 => Some(TransactionKind::TransferSend),
            3 => Some(TransactionKind::TransferReceive),
            _ => None,
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionKind::Deposit => "Deposit",
            TransactionKind::Withdraw => "Withdraw",
            TransactionKind::TransferSend => "TransferSend",
            TransactionKind::TransferReceive => "TransferReceive",
        };
        f.write_str(name)
    }
}

/// A transaction about to be appended. The store assigns id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub user_id: UserId,
    pub kind: TransactionKind,
    pub amount: Amount,
    pub transfer_id: Option<TransferId>,
}

impl NewTransaction {
    /// Record a deposit of `amount`.
    pub fn deposit(user_id: UserId, amount: Amount) -> Self {
        Self {
            user_id,
            kind: TransactionKind::Deposit,
            amount,
            transfer_id: None,
        }
    }

    /// Record a withdrawal of `amount`. The stored amount stays unsigned;
    /// the kind carries the direction.
    pub fn withdraw(user_id: UserId, amount: Amount) -> Self {
        Self {
            user_id,
            kind: TransactionKind::Withdraw,
            amount,
            transfer_id: None,
        }
    }

    /// Bind the record to its id and timestamp.
    pub fn into_transaction(self, id: TransactionId, timestamp: DateTime<Utc>) -> Transaction {
        Transaction {
            id,
            user_id: self.user_id,
            kind: self.kind,
            amount: self.amount,
            transfer_id: self.transfer_id,
            timestamp,
        }
    }
}

/// An immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique entry ID.
    pub id: TransactionId,
    /// Owning user.
    pub user_id: UserId,
    /// Event kind.
    pub kind: TransactionKind,
    /// Amount as recorded; negative for the sending leg of a transfer.
    pub amount: Amount,
    /// Shared by both legs of one transfer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_id: Option<TransferId>,
    /// When the entry was appended.
    pub timestamp: DateTime<Utc>,
}

impl Transaction {
    /// Effect of this entry on the owner's balance.
    pub fn signed_delta(&self) -> Amount {
        match self.kind {
            TransactionKind::Withdraw => Amount::from_minor(-self.amount.minor()),
            _ => self.amount,
        }
    }
}

/// The two entries written by one transfer.
#[derive(Debug, Clone)]
pub struct TransferLegs {
    pub transfer_id: TransferId,
    pub send: NewTransaction,
    pub receive: NewTransaction,
}

impl TransferLegs {
    /// Build both legs for moving `amount` from `from` to `to`.
    pub fn new(from: UserId, to: UserId, amount: Amount) -> Result<Self, AmountError> {
        let transfer_id = TransferId::new();
        Ok(Self {
            transfer_id,
            send: NewTransaction {
                user_id: from,
                kind: TransactionKind::TransferSend,
                amount: amount.checked_neg()?,
                transfer_id: Some(transfer_id),
            },
            receive: NewTransaction {
                user_id: to,
                kind: TransactionKind::TransferReceive,
                amount,
                transfer_id: Some(transfer_id),
            },
        })
    }

    /// Verify the legs cancel out.
    pub fn is_balanced(&self) -> bool {
        self.send
            .amount
            .checked_add(self.receive.amount)
            .map(|sum| sum.is_zero())
            .unwrap_or(false)
    }
}
