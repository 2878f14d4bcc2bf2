//! Persistence contracts for balances and the transaction log.
//!
//! The engine never talks to a store directly: it asks a [`LedgerStore`] for
//! a [`LedgerUnit`] scoped to the users an operation touches, performs the
//! point reads, writes and appends through it, and commits. A unit that is
//! dropped without commit is rolled back and releases its rows.

use async_trait::async_trait;

use wallet_common::{Amount, StoreResult, UserId};

use crate::balance::Balance;
use crate::journal::{NewTransaction, Transaction};

/// Point access to balance rows.
#[async_trait]
pub trait BalanceStore: Send {
    /// Current amount for the user.
    async fn get_balance(&mut self, user_id: UserId) -> StoreResult<Amount>;

    /// Full balance row for the user.
    async fn get_balance_record(&mut self, user_id: UserId) -> StoreResult<Balance>;

    /// Unconditionally overwrite the user's amount.
    async fn update_balance(&mut self, user_id: UserId, new_amount: Amount) -> StoreResult<()>;

    /// Insert the user's balance row. Fails if one already exists.
    async fn create_balance(&mut self, balance: &Balance) -> StoreResult<()>;
}

/// Append-only access to the transaction log.
#[async_trait]
pub trait TransactionStore: Send {
    /// Append a record, returning it with its assigned id and timestamp.
    async fn create_transaction(&mut self, record: NewTransaction) -> StoreResult<Transaction>;

    /// All records for the user, newest first.
    async fn get_transactions_by_user_id(&mut self, user_id: UserId) -> StoreResult<Vec<Transaction>>;
}

/// One atomic unit of work over a fixed set of user rows.
#[async_trait]
pub trait LedgerUnit: BalanceStore + TransactionStore + Send {
    /// Make every write of this unit visible at once.
    async fn commit(&mut self) -> StoreResult<()>;

    /// Discard every write of this unit. Dropping the unit has the same
    /// effect.
    async fn rollback(&mut self) -> StoreResult<()>;
}

/// Factory for units of work.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open a unit holding every user in `scope` exclusively until it is
    /// committed, rolled back or dropped.
    async fn begin(&self, scope: UnitScope) -> StoreResult<Box<dyn LedgerUnit>>;
}

/// Sorted, de-duplicated set of users held by a unit.
///
/// Stores acquire rows in this order, so two units over overlapping users
/// cannot deadlock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitScope {
    users: Vec<UserId>,
}

impl UnitScope {
    /// Scope over one user.
    pub fn single(user_id: UserId) -> Self {
        Self {
            users: vec![user_id],
        }
    }

    /// Scope over two users, in either order.
    pub fn pair(a: UserId, b: UserId) -> Self {
        Self::from_users([a, b])
    }

    /// Scope over any set of users.
    pub fn from_users(users: impl IntoIterator<Item = UserId>) -> Self {
        let mut users: Vec<UserId> = users.into_iter().collect();
        users.sort_unstable();
        users.dedup();
        Self { users }
    }

    /// Users in acquisition order.
    pub fn users(&self) -> &[UserId] {
        &self.users
    }

    /// Check if the scope covers `user_id`.
    pub fn contains(&self, user_id: UserId) -> bool {
        self.users.binary_search(&user_id).is_ok()
    }
}
