//! In-process ledger store.
//!
//! Each user row has an async mutex. A unit takes the mutexes of its scope in
//! ascending user order and keeps them until it is dropped; writes are staged
//! in the unit and applied to the shared tables on commit.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};
use tracing::{debug, warn};

use wallet_common::{time, Amount, StoreError, StoreResult, TransactionId, UserId};

use crate::balance::Balance;
use crate::journal::{NewTransaction, Transaction};
use crate::store::{BalanceStore, LedgerStore, LedgerUnit, TransactionStore, UnitScope};

/// Store operations that can be made to fail for testing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    Begin,
    GetBalance,
    UpdateBalance,
    CreateBalance,
    CreateTransaction,
    GetTransactions,
    Commit,
}

#[derive(Debug, Clone, Copy)]
struct Fault {
    point: FaultPoint,
    user: Option<UserId>,
}

#[derive(Default)]
struct Tables {
    /// Committed balance rows.
    balances: RwLock<HashMap<UserId, Balance>>,
    /// Committed transactions per user, in append order.
    transactions: RwLock<HashMap<UserId, Vec<Transaction>>>,
    /// Row locks of users currently held or awaited by some unit.
    row_locks: DashMap<UserId, Arc<RowLock<()>>>,
    /// Pending one-shot faults.
    faults: Mutex<Vec<Fault>>,
}

impl Tables {
    fn row_lock(&self, user_id: UserId) -> Arc<RowLock<()>> {
        Arc::clone(self.row_locks.entry(user_id).or_default().value())
    }

    /// Drop the lock entry once no unit holds or waits on it.
    fn prune_row_lock(&self, user_id: UserId) {
        self.row_locks
            .remove_if(&user_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    fn take_fault(&self, point: FaultPoint, user: Option<UserId>) -> StoreResult<()> {
        let mut faults = self.faults.lock();
        let hit = faults.iter().position(|fault| {
            fault.point == point && (fault.user.is_none() || fault.user == user)
        });

        match hit {
            Some(index) => {
                faults.remove(index);
                warn!(point = ?point, user = ?user, "Injected store fault");
                Err(StoreError::Unavailable(format!("injected fault at {:?}", point)))
            }
            None => Ok(()),
        }
    }
}

/// Ledger store that keeps every table in memory.
#[derive(Clone, Default)]
pub struct MemoryLedgerStore {
    tables: Arc<Tables>,
}

impl MemoryLedgerStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `point` operation fail, for any user.
    pub fn fail_next(&self, point: FaultPoint) {
        self.tables.faults.lock().push(Fault { point, user: None });
    }

    /// Make the next `point` operation on `user_id` fail.
    pub fn fail_next_for(&self, point: FaultPoint, user_id: UserId) {
        self.tables.faults.lock().push(Fault {
            point,
            user: Some(user_id),
        });
    }

    /// Committed balance row, read without taking the row lock.
    pub fn committed_balance(&self, user_id: UserId) -> Option<Balance> {
        self.tables.balances.read().get(&user_id).cloned()
    }

    /// Number of committed transactions for the user.
    pub fn committed_transaction_count(&self, user_id: UserId) -> usize {
        self.tables
            .transactions
            .read()
            .get(&user_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Number of user rows with a live lock entry.
    pub fn tracked_row_locks(&self) -> usize {
        self.tables.row_locks.len()
    }

    /// Check if some unit currently holds the user's row.
    pub fn is_row_locked(&self, user_id: UserId) -> bool {
        self.tables
            .row_locks
            .get(&user_id)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn begin(&self, scope: UnitScope) -> StoreResult<Box<dyn LedgerUnit>> {
        self.tables.take_fault(FaultPoint::Begin, None)?;

        let mut guards = Vec::with_capacity(scope.users().len());
        for user_id in scope.users() {
            let lock = self.tables.row_lock(*user_id);
            guards.push(lock.lock_owned().await);
        }

        debug!(users = ?scope.users(), "Unit opened");

        Ok(Box::new(MemoryUnit {
            tables: Arc::clone(&self.tables),
            scope,
            guards,
            staged_balances: HashMap::new(),
            staged_transactions: Vec::new(),
            finished: false,
        }))
    }
}

/// A unit of work over [`MemoryLedgerStore`].
pub struct MemoryUnit {
    tables: Arc<Tables>,
    scope: UnitScope,
    /// Released when the unit is dropped.
    guards: Vec<OwnedMutexGuard<()>>,
    staged_balances: HashMap<UserId, Balance>,
    staged_transactions: Vec<Transaction>,
    finished: bool,
}

impl MemoryUnit {
    fn ensure_open(&self) -> StoreResult<()> {
        if self.finished {
            return Err(StoreError::Transaction("unit already finished".to_string()));
        }
        Ok(())
    }

    fn ensure_in_scope(&self, user_id: UserId) -> StoreResult<()> {
        self.ensure_open()?;
        if !self.scope.contains(user_id) {
            return Err(StoreError::Transaction(format!(
                "user {} is outside the unit scope",
                user_id
            )));
        }
        Ok(())
    }

    fn current_row(&self, user_id: UserId) -> Option<Balance> {
        self.staged_balances
            .get(&user_id)
            .cloned()
            .or_else(|| self.tables.balances.read().get(&user_id).cloned())
    }

    fn last_timestamp(&self, user_id: UserId) -> Option<time::Timestamp> {
        let staged = self
            .staged_transactions
            .iter()
            .rev()
            .find(|tx| tx.user_id == user_id)
            .map(|tx| tx.timestamp);

        staged.or_else(|| {
            self.tables
                .transactions
                .read()
                .get(&user_id)
                .and_then(|log| log.last())
                .map(|tx| tx.timestamp)
        })
    }
}

#[async_trait]
impl BalanceStore for MemoryUnit {
    async fn get_balance(&mut self, user_id: UserId) -> StoreResult<Amount> {
        self.get_balance_record(user_id).await.map(|row| row.amount)
    }

    async fn get_balance_record(&mut self, user_id: UserId) -> StoreResult<Balance> {
        self.ensure_in_scope(user_id)?;
        self.tables.take_fault(FaultPoint::GetBalance, Some(user_id))?;
        self.current_row(user_id).ok_or(StoreError::NotFound(user_id))
    }

    async fn update_balance(&mut self, user_id: UserId, new_amount: Amount) -> StoreResult<()> {
        self.ensure_in_scope(user_id)?;
        self.tables.take_fault(FaultPoint::UpdateBalance, Some(user_id))?;

        let mut row = self.current_row(user_id).ok_or(StoreError::NotFound(user_id))?;
        row.amount = new_amount;
        self.staged_balances.insert(user_id, row);
        Ok(())
    }

    async fn create_balance(&mut self, balance: &Balance) -> StoreResult<()> {
        self.ensure_in_scope(balance.user_id)?;
        self.tables
            .take_fault(FaultPoint::CreateBalance, Some(balance.user_id))?;

        if self.current_row(balance.user_id).is_some() {
            return Err(StoreError::AlreadyExists(balance.user_id));
        }
        self.staged_balances.insert(balance.user_id, balance.clone());
        Ok(())
    }
}

#[async_trait]
impl TransactionStore for MemoryUnit {
    async fn create_transaction(&mut self, record: NewTransaction) -> StoreResult<Transaction> {
        self.ensure_in_scope(record.user_id)?;
        self.tables
            .take_fault(FaultPoint::CreateTransaction, Some(record.user_id))?;

        let timestamp = time::next_after(self.last_timestamp(record.user_id));
        let transaction = record.into_transaction(TransactionId::new(), timestamp);
        self.staged_transactions.push(transaction.clone());
        Ok(transaction)
    }

    async fn get_transactions_by_user_id(&mut self, user_id: UserId) -> StoreResult<Vec<Transaction>> {
        self.ensure_in_scope(user_id)?;
        self.tables
            .take_fault(FaultPoint::GetTransactions, Some(user_id))?;

        let mut history: Vec<Transaction> = self
            .tables
            .transactions
            .read()
            .get(&user_id)
            .cloned()
            .unwrap_or_default();
        history.extend(
            self.staged_transactions
                .iter()
                .filter(|tx| tx.user_id == user_id)
                .cloned(),
        );

        history.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
        Ok(history)
    }
}

#[async_trait]
impl LedgerUnit for MemoryUnit {
    async fn commit(&mut self) -> StoreResult<()> {
        self.ensure_open()?;
        self.tables.take_fault(FaultPoint::Commit, None)?;

        {
            let mut balances = self.tables.balances.write();
            let mut transactions = self.tables.transactions.write();

            for (user_id, row) in self.staged_balances.drain() {
                balances.insert(user_id, row);
            }
            for transaction in self.staged_transactions.drain(..) {
                transactions
                    .entry(transaction.user_id)
                    .or_default()
                    .push(transaction);
            }
        }

        self.finished = true;
        debug!(users = ?self.scope.users(), "Unit committed");
        Ok(())
    }

    async fn rollback(&mut self) -> StoreResult<()> {
        self.ensure_open()?;
        self.staged_balances.clear();
        self.staged_transactions.clear();
        self.finished = true;
        debug!(users = ?self.scope.users(), "Unit rolled back");
        Ok(())
    }
}

impl Drop for MemoryUnit {
    fn drop(&mut self) {
        if !self.finished {
            debug!(
                users = ?self.scope.users(),
                staged_writes = self.staged_balances.len() + self.staged_transactions.len(),
                "Unit dropped without commit, discarding writes"
            );
        }

        self.guards.clear();
        for user_id in self.scope.users() {
            self.tables.prune_row_lock(*user_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::TransactionKind;
    use std::time::Duration;

    fn amount(major: i64) -> Amount {
        Amount::from_major(major).unwrap()
    }

    async fn seeded(user: UserId, opening: Amount) -> MemoryLedgerStore {
        let store = MemoryLedgerStore::new();
        let mut unit = store.begin(UnitScope::single(user)).await.unwrap();
        unit.create_balance(&Balance::open(user, opening)).await.unwrap();
        unit.commit().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_get_missing_balance_is_not_found() {
        let store = MemoryLedgerStore::new();
        let user = UserId::new(1);
        let mut unit = store.begin(UnitScope::single(user)).await.unwrap();

        assert_eq!(unit.get_balance(user).await, Err(StoreError::NotFound(user)));
        assert_eq!(
            unit.update_balance(user, amount(5)).await,
            Err(StoreError::NotFound(user))
        );
    }

    #[tokio::test]
    async fn test_create_balance_twice_fails() {
        let user = UserId::new(1);
        let store = seeded(user, amount(10)).await;

        let mut unit = store.begin(UnitScope::single(user)).await.unwrap();
        assert_eq!(
            unit.create_balance(&Balance::zero(user)).await,
            Err(StoreError::AlreadyExists(user))
        );
    }

    #[tokio::test]
    async fn test_writes_invisible_until_commit() {
        let user = UserId::new(1);
        let store = seeded(user, amount(100)).await;

        let mut unit = store.begin(UnitScope::single(user)).await.unwrap();
        unit.update_balance(user, amount(150)).await.unwrap();
        unit.create_transaction(NewTransaction::deposit(user, amount(50)))
            .await
            .unwrap();

        // The unit sees its own writes, the committed table does not.
        assert_eq!(unit.get_balance(user).await.unwrap(), amount(150));
        assert_eq!(store.committed_balance(user).unwrap().amount, amount(100));
        assert_eq!(store.committed_transaction_count(user), 0);

        unit.commit().await.unwrap();
        assert_eq!(store.committed_balance(user).unwrap().amount, amount(150));
        assert_eq!(store.committed_transaction_count(user), 1);
    }

    #[tokio::test]
    async fn test_drop_discards_writes_and_releases_row() {
        let user = UserId::new(1);
        let store = seeded(user, amount(100)).await;

        {
            let mut unit = store.begin(UnitScope::single(user)).await.unwrap();
            unit.update_balance(user, amount(0)).await.unwrap();
            assert!(store.is_row_locked(user));
        }

        assert!(!store.is_row_locked(user));
        assert_eq!(store.committed_balance(user).unwrap().amount, amount(100));
    }

    #[tokio::test]
    async fn test_released_row_locks_are_pruned() {
        let store = MemoryLedgerStore::new();

        for id in 0..1_000 {
            let user = UserId::new(id);
            let mut unit = store.begin(UnitScope::single(user)).await.unwrap();
            assert_eq!(unit.get_balance(user).await, Err(StoreError::NotFound(user)));
        }
        assert_eq!(store.tracked_row_locks(), 0);

        let user = UserId::new(1);
        let first = store.begin(UnitScope::single(user)).await.unwrap();
        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.begin(UnitScope::single(user)).await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The waiter still shares the entry, so it survives the first release.
        drop(first);
        assert!(waiter.await.unwrap().is_ok());
        assert_eq!(store.tracked_row_locks(), 0);
    }

    #[tokio::test]
    async fn test_out_of_scope_access_rejected() {
        let user = UserId::new(1);
        let store = seeded(user, amount(100)).await;

        let mut unit = store.begin(UnitScope::single(user)).await.unwrap();
        let err = unit.get_balance(UserId::new(2)).await.unwrap_err();
        assert!(matches!(err, StoreError::Transaction(_)));
    }

    #[tokio::test]
    async fn test_second_unit_waits_for_first() {
        let user = UserId::new(1);
        let store = seeded(user, amount(100)).await;

        let first = store.begin(UnitScope::single(user)).await.unwrap();
        let blocked = tokio::time::timeout(
            Duration::from_millis(50),
            store.begin(UnitScope::single(user)),
        )
        .await;
        assert!(blocked.is_err());

        drop(first);
        let second = tokio::time::timeout(
            Duration::from_millis(50),
            store.begin(UnitScope::single(user)),
        )
        .await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn test_history_newest_first() {
        let user = UserId::new(1);
        let store = seeded(user, amount(100)).await;

        for major in [1, 2, 3] {
            let mut unit = store.begin(UnitScope::single(user)).await.unwrap();
            unit.create_transaction(NewTransaction::deposit(user, amount(major)))
                .await
                .unwrap();
            unit.commit().await.unwrap();
        }

        let mut unit = store.begin(UnitScope::single(user)).await.unwrap();
        let history = unit.get_transactions_by_user_id(user).await.unwrap();
        let amounts: Vec<Amount> = history.iter().map(|tx| tx.amount).collect();
        assert_eq!(amounts, vec![amount(3), amount(2), amount(1)]);
        assert!(history.windows(2).all(|w| w[0].timestamp > w[1].timestamp));
        assert!(history.iter().all(|tx| tx.kind == TransactionKind::Deposit));
    }

    #[tokio::test]
    async fn test_fault_is_one_shot_and_targeted() {
        let alice = UserId::new(1);
        let bob = UserId::new(2);
        let store = seeded(alice, amount(100)).await;
        store.fail_next_for(FaultPoint::GetBalance, bob);

        let mut unit = store.begin(UnitScope::pair(alice, bob)).await.unwrap();
        assert!(unit.get_balance(alice).await.is_ok());
        assert!(matches!(
            unit.get_balance(bob).await,
            Err(StoreError::Unavailable(_))
        ));
        assert_eq!(unit.get_balance(bob).await, Err(StoreError::NotFound(bob)));
    }
}
