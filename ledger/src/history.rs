//! Read-only access to a user's transaction log.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use wallet_common::{Operation, Result, UserId, WalletError};

use crate::journal::Transaction;
use crate::runner::OperationRunner;
use crate::store::{LedgerStore, UnitScope};

/// Lists a user's transactions, newest first.
pub struct TransactionHistoryReader<S: LedgerStore + ?Sized> {
    store: Arc<S>,
    runner: OperationRunner,
}

impl<S: LedgerStore + ?Sized> TransactionHistoryReader<S> {
    /// Create a reader over `store`.
    pub fn new(store: Arc<S>, runner: OperationRunner) -> Self {
        Self { store, runner }
    }

    /// Every transaction of the user, newest first. A user without
    /// transactions gets an empty list.
    #[instrument(skip(self))]
    pub async fn view_transaction_history(&self, user_id: UserId) -> Result<Vec<Transaction>> {
        self.runner
            .run(Operation::TransactionHistory, self.read(user_id))
            .await
    }

    async fn read(&self, user_id: UserId) -> Result<Vec<Transaction>> {
        const OPERATION: Operation = Operation::TransactionHistory;
        let store_error = |source| WalletError::from_store(OPERATION, user_id, source);

        let mut unit = self
            .store
            .begin(UnitScope::single(user_id))
            .await
            .map_err(store_error)?;
        let history = unit
            .get_transactions_by_user_id(user_id)
            .await
            .map_err(store_error)?;

        if let Err(error) = unit.rollback().await {
            warn!(user = %user_id, error = %error, "Rollback failed");
        }

        debug!(user = %user_id, count = history.len(), "Transaction history read");
        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::engine::LedgerEngine;
    use crate::memory::{FaultPoint, MemoryLedgerStore};
    use tokio_test::{assert_err, assert_ok};
    use wallet_common::Amount;

    #[tokio::test]
    async fn test_empty_history_is_not_an_error() {
        let store = Arc::new(MemoryLedgerStore::new());
        let engine = LedgerEngine::new(store, LedgerConfig::default());

        let history = assert_ok!(
            engine
                .history_reader()
                .view_transaction_history(UserId::new(42))
                .await
        );
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn test_store_failure() {
        let store = Arc::new(MemoryLedgerStore::new());
        let engine = LedgerEngine::new(Arc::clone(&store), LedgerConfig::default());
        let user = UserId::new(1);
        store.fail_next_for(FaultPoint::GetTransactions, user);

        let err = assert_err!(engine.history_reader().view_transaction_history(user).await);
        assert!(matches!(
            err,
            WalletError::Store {
                operation: Operation::TransactionHistory,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_transfer_legs_share_id() {
        let store = Arc::new(MemoryLedgerStore::new());
        let engine = LedgerEngine::new(store, LedgerConfig::default());
        let (alice, bob) = (UserId::new(1), UserId::new(2));
        engine.open_balance(alice, Amount::from_minor(10_000)).await.unwrap();
        engine.open_balance(bob, Amount::ZERO).await.unwrap();
        engine.transfer(alice, bob, Amount::from_minor(2_500)).await.unwrap();

        let reader = engine.history_reader();
        let sent = reader.view_transaction_history(alice).await.unwrap();
        let received = reader.view_transaction_history(bob).await.unwrap();

        assert_eq!(sent.len(), 1);
        assert_eq!(received.len(), 1);
        assert!(sent[0].transfer_id.is_some());
        assert_eq!(sent[0].transfer_id, received[0].transfer_id);
        assert_eq!(sent[0].amount, Amount::from_minor(-2_500));
    }
}
