//! Core ledger engine implementation.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use wallet_common::{Amount, Operation, Result, StoreError, UserId, WalletError};

use crate::balance::Balance;
use crate::config::LedgerConfig;
use crate::history::TransactionHistoryReader;
use crate::journal::{NewTransaction, TransferLegs};
use crate::metrics::{LedgerMetrics, MetricsSnapshot};
use crate::response::{BalanceChange, TransferReceipt};
use crate::runner::OperationRunner;
use crate::store::{LedgerStore, LedgerUnit, UnitScope};

/// The ledger engine applies deposits, withdrawals and transfers.
///
/// Each operation opens one unit on the store, scoped to the users it
/// touches, and commits balance updates and transaction records together.
/// Any failure before commit drops the unit, leaving the store unchanged.
pub struct LedgerEngine<S: LedgerStore + ?Sized> {
    store: Arc<S>,
    config: LedgerConfig,
    runner: OperationRunner,
}

impl<S: LedgerStore + ?Sized> LedgerEngine<S> {
    /// Create a new ledger engine.
    pub fn new(store: Arc<S>, config: LedgerConfig) -> Self {
        Self::with_cancellation(store, config, CancellationToken::new())
    }

    /// Create an engine whose operations stop when `shutdown` is cancelled.
    pub fn with_cancellation(store: Arc<S>, config: LedgerConfig, shutdown: CancellationToken) -> Self {
        let runner = OperationRunner::new(
            config.operation_timeout,
            shutdown,
            Arc::new(LedgerMetrics::new()),
        );

        Self {
            store,
            config,
            runner,
        }
    }

    /// Engine configuration.
    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Current metrics.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.runner.metrics().snapshot()
    }

    /// Cancel every in-flight and future operation.
    pub fn shutdown(&self) {
        info!("Shutting down ledger engine");
        self.runner.shutdown_token().cancel();
    }

    /// Reader for transaction history over the same store.
    pub fn history_reader(&self) -> TransactionHistoryReader<S> {
        TransactionHistoryReader::new(Arc::clone(&self.store), self.runner.clone())
    }

    /// Provision the balance row for a user.
    #[instrument(skip(self))]
    pub async fn open_balance(&self, user_id: UserId, initial: Amount) -> Result<Balance> {
        self.runner
            .run(Operation::OpenBalance, self.open_balance_inner(user_id, initial))
            .await
    }

    /// Current balance of a user.
    #[instrument(skip(self))]
    pub async fn check_balance(&self, user_id: UserId) -> Result<Amount> {
        self.runner
            .run(Operation::CheckBalance, async {
                self.read_balance(user_id).await.map(|row| row.amount)
            })
            .await
    }

    /// Full balance row of a user.
    #[instrument(skip(self))]
    pub async fn get_balance_record(&self, user_id: UserId) -> Result<Balance> {
        self.runner
            .run(Operation::CheckBalance, self.read_balance(user_id))
            .await
    }

    /// Add `amount` to the user's balance and record a deposit.
    #[instrument(skip(self))]
    pub async fn deposit(&self, user_id: UserId, amount: Amount) -> Result<BalanceChange> {
        self.runner
            .run(Operation::Deposit, self.deposit_inner(user_id, amount))
            .await
    }

    /// Take `amount` from the user's balance and record a withdrawal.
    #[instrument(skip(self))]
    pub async fn withdraw(&self, user_id: UserId, amount: Amount) -> Result<BalanceChange> {
        self.runner
            .run(Operation::Withdraw, self.withdraw_inner(user_id, amount))
            .await
    }

    /// Move `amount` from one user to another and record both legs.
    #[instrument(skip(self))]
    pub async fn transfer(&self, from: UserId, to: UserId, amount: Amount) -> Result<TransferReceipt> {
        self.runner
            .run(Operation::Transfer, self.transfer_inner(from, to, amount))
            .await
    }

    async fn begin(&self, operation: Operation, user_id: UserId, scope: UnitScope) -> Result<Box<dyn LedgerUnit>> {
        self.store
            .begin(scope)
            .await
            .map_err(store_error(operation, user_id))
    }

    async fn open_balance_inner(&self, user_id: UserId, initial: Amount) -> Result<Balance> {
        const OPERATION: Operation = Operation::OpenBalance;

        self.config.amount_policy.check_opening(initial)?;

        let mut unit = self.begin(OPERATION, user_id, UnitScope::single(user_id)).await?;
        let balance = Balance::open(user_id, initial);
        unit.create_balance(&balance)
            .await
            .map_err(store_error(OPERATION, user_id))?;
        unit.commit().await.map_err(store_error(OPERATION, user_id))?;

        info!(user = %user_id, amount = %initial, "Balance opened");
        Ok(balance)
    }

    async fn read_balance(&self, user_id: UserId) -> Result<Balance> {
        const OPERATION: Operation = Operation::CheckBalance;

        let mut unit = self.begin(OPERATION, user_id, UnitScope::single(user_id)).await?;
        let balance = unit
            .get_balance_record(user_id)
            .await
            .map_err(store_error(OPERATION, user_id))?;
        release(unit, OPERATION).await;

        Ok(balance)
    }

    async fn deposit_inner(&self, user_id: UserId, amount: Amount) -> Result<BalanceChange> {
        const OPERATION: Operation = Operation::Deposit;

        self.config.amount_policy.check(amount)?;

        let mut unit = self.begin(OPERATION, user_id, UnitScope::single(user_id)).await?;

        let current = unit
            .get_balance(user_id)
            .await
            .map_err(store_error(OPERATION, user_id))?;
        let new_balance = current.checked_add(amount)?;

        unit.update_balance(user_id, new_balance)
            .await
            .map_err(store_error(OPERATION, user_id))?;
        let transaction = unit
            .create_transaction(NewTransaction::deposit(user_id, amount))
            .await
            .map_err(store_error(OPERATION, user_id))?;
        unit.commit().await.map_err(store_error(OPERATION, user_id))?;

        info!(
            user = %user_id,
            amount = %amount,
            balance = %new_balance,
            transaction_id = %transaction.id,
            "Deposit committed"
        );

        Ok(BalanceChange {
            user_id,
            balance: new_balance,
            transaction,
        })
    }

    async fn withdraw_inner(&self, user_id: UserId, amount: Amount) -> Result<BalanceChange> {
        const OPERATION: Operation = Operation::Withdraw;

        self.config.amount_policy.check(amount)?;

        let mut unit = self.begin(OPERATION, user_id, UnitScope::single(user_id)).await?;

        let current = unit
            .get_balance_record(user_id)
            .await
            .map_err(store_error(OPERATION, user_id))?;
        if !current.has_sufficient_funds(amount) {
            release(unit, OPERATION).await;
            return Err(WalletError::InsufficientFunds {
                user: user_id,
                required: amount,
                available: current.amount,
            });
        }
        let new_balance = current.amount.checked_sub(amount)?;

        unit.update_balance(user_id, new_balance)
            .await
            .map_err(store_error(OPERATION, user_id))?;
        let transaction = unit
            .create_transaction(NewTransaction::withdraw(user_id, amount))
            .await
            .map_err(store_error(OPERATION, user_id))?;
        unit.commit().await.map_err(store_error(OPERATION, user_id))?;

        info!(
            user = %user_id,
            amount = %amount,
            balance = %new_balance,
            transaction_id = %transaction.id,
            "Withdrawal committed"
        );

        Ok(BalanceChange {
            user_id,
            balance: new_balance,
            transaction,
        })
    }

    async fn transfer_inner(&self, from: UserId, to: UserId, amount: Amount) -> Result<TransferReceipt> {
        const OPERATION: Operation = Operation::Transfer;

        if from == to {
            return Err(WalletError::InvalidTransfer(
                "Sender and recipient must be different users".to_string(),
            ));
        }
        self.config.amount_policy.check(amount)?;

        let mut unit = self.begin(OPERATION, from, UnitScope::pair(from, to)).await?;

        let sender = unit
            .get_balance_record(from)
            .await
            .map_err(store_error(OPERATION, from))?;
        if !sender.has_sufficient_funds(amount) {
            release(unit, OPERATION).await;
            return Err(WalletError::InsufficientFunds {
                user: from,
                required: amount,
                available: sender.amount,
            });
        }

        let recipient_balance = unit
            .get_balance(to)
            .await
            .map_err(store_error(OPERATION, to))?;

        let new_sender = sender.amount.checked_sub(amount)?;
        let new_recipient = recipient_balance.checked_add(amount)?;

        unit.update_balance(from, new_sender)
            .await
            .map_err(store_error(OPERATION, from))?;
        unit.update_balance(to, new_recipient)
            .await
            .map_err(store_error(OPERATION, to))?;

        let legs = TransferLegs::new(from, to, amount)?;
        let transfer_id = legs.transfer_id;
        debug_assert!(legs.is_balanced());

        let send = unit
            .create_transaction(legs.send)
            .await
            .map_err(store_error(OPERATION, from))?;
        let receive = unit
            .create_transaction(legs.receive)
            .await
            .map_err(store_error(OPERATION, to))?;

        unit.commit().await.map_err(store_error(OPERATION, from))?;

        info!(
            transfer_id = %transfer_id,
            from = %from,
            to = %to,
            amount = %amount,
            sender_balance = %new_sender,
            recipient_balance = %new_recipient,
            "Transfer committed"
        );

        Ok(TransferReceipt {
            transfer_id,
            sender_balance: new_sender,
            recipient_balance: new_recipient,
            send,
            receive,
        })
    }
}

fn store_error(operation: Operation, user_id: UserId) -> impl FnOnce(StoreError) -> WalletError {
    move |source| WalletError::from_store(operation, user_id, source)
}

/// Roll back a unit that has nothing to commit.
async fn release(mut unit: Box<dyn LedgerUnit>, operation: Operation) {
    match unit.rollback().await {
        Ok(()) => debug!(operation = %operation, "Unit released"),
        Err(error) => warn!(operation = %operation, error = %error, "Rollback failed"),
    }
}
