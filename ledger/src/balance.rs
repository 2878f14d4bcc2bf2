//! User balance rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use wallet_common::{Amount, UserId};

/// The single balance row owned by one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Owning user, unique across balances.
    pub user_id: UserId,
    /// Current amount.
    pub amount: Amount,
    /// When the row was provisioned.
    pub created_at: DateTime<Utc>,
}

impl Balance {
    /// Create a balance row with the given opening amount.
    pub fn open(user_id: UserId, amount: Amount) -> Self {
        Self {
            user_id,
            amount,
            created_at: Utc::now(),
        }
    }

    /// Create a zero balance.
    pub fn zero(user_id: UserId) -> Self {
        Self::open(user_id, Amount::ZERO)
    }

    /// Check if account has sufficient funds for a debit.
    ///
    /// Equal amounts pass: a balance may be withdrawn in full.
    pub fn has_sufficient_funds(&self, amount: Amount) -> bool {
        self.amount >= amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sufficient_funds_boundary() {
        let mut balance = Balance::zero(UserId::new(1));
        balance.amount = Amount::from_major(100).unwrap();

        assert!(balance.has_sufficient_funds(Amount::from_major(100).unwrap()));
        assert!(balance.has_sufficient_funds(Amount::from_major(50).unwrap()));
        assert!(!balance.has_sufficient_funds(Amount::from_minor(10001)));
    }
}
