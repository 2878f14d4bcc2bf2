//! PostgreSQL ledger store.
//!
//! A unit is one database transaction. `begin` locks the scoped balance rows
//! with `SELECT ... FOR UPDATE` in ascending user order; amounts are stored
//! as `BIGINT` minor units.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction as PgTransaction};
use tracing::{debug, instrument};
use uuid::Uuid;

use wallet_common::{Amount, StoreError, StoreResult, TransactionId, TransferId, UserId};

use crate::balance::Balance;
use crate::journal::{NewTransaction, Transaction, TransactionKind};
use crate::store::{BalanceStore, LedgerStore, LedgerUnit, TransactionStore, UnitScope};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS balances (
        user_id       BIGINT PRIMARY KEY,
        balance_minor BIGINT NOT NULL,
        created_at    TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS transactions (
        id           UUID PRIMARY KEY,
        user_id      BIGINT NOT NULL,
        kind         SMALLINT NOT NULL,
        amount_minor BIGINT NOT NULL,
        transfer_id  UUID,
        timestamp    TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS transactions_user_timestamp_idx
        ON transactions (user_id, timestamp DESC, id DESC)
    "#,
];

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    pub max_connections: u32,
    /// Minimum number of connections to maintain.
    pub min_connections: u32,
    /// Connection acquisition timeout.
    pub acquire_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/wallet".to_string(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// Ledger store backed by PostgreSQL.
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    /// Connect with the given configuration.
    #[instrument(skip_all)]
    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        debug!(
            max_conn = config.max_connections,
            min_conn = config.min_connections,
            "Creating connection pool"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await
            .map_err(map_sqlx_error)?;

        Ok(Self { pool })
    }

    /// Create the ledger tables if they do not exist.
    #[instrument(skip(self))]
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        }
        debug!("Ledger schema ready");
        Ok(())
    }

    /// Close the connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn begin(&self, scope: UnitScope) -> StoreResult<Box<dyn LedgerUnit>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Transaction(e.to_string()))?;

        let keys = scope
            .users()
            .iter()
            .map(|user| user_key(*user))
            .collect::<StoreResult<Vec<i64>>>()?;

        sqlx::query(
            "SELECT user_id FROM balances WHERE user_id = ANY($1) ORDER BY user_id FOR UPDATE",
        )
        .bind(keys.as_slice())
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        Ok(Box::new(PgUnit {
            tx: Some(tx),
            scope,
        }))
    }
}

/// A unit of work over [`PgLedgerStore`].
pub struct PgUnit {
    /// Dropping an uncommitted transaction rolls it back.
    tx: Option<PgTransaction<'static, Postgres>>,
    scope: UnitScope,
}

impl PgUnit {
    fn conn(&mut self, user_id: UserId) -> StoreResult<&mut PgConnection> {
        if !self.scope.contains(user_id) {
            return Err(StoreError::Transaction(format!(
                "user {} is outside the unit scope",
                user_id
            )));
        }
        self.tx
            .as_mut()
            .map(|tx| &mut **tx)
            .ok_or_else(|| StoreError::Transaction("unit already finished".to_string()))
    }
}

#[async_trait]
impl BalanceStore for PgUnit {
    async fn get_balance(&mut self, user_id: UserId) -> StoreResult<Amount> {
        self.get_balance_record(user_id).await.map(|row| row.amount)
    }

    async fn get_balance_record(&mut self, user_id: UserId) -> StoreResult<Balance> {
        let key = user_key(user_id)?;
        let conn = self.conn(user_id)?;

        let row: Option<(i64, DateTime<Utc>)> =
            sqlx::query_as("SELECT balance_minor, created_at FROM balances WHERE user_id = $1")
                .bind(key)
                .fetch_optional(conn)
                .await
                .map_err(map_sqlx_error)?;

        let (minor, created_at) = row.ok_or(StoreError::NotFound(user_id))?;
        Ok(Balance {
            user_id,
            amount: Amount::from_minor(minor),
            created_at,
        })
    }

    async fn update_balance(&mut self, user_id: UserId, new_amount: Amount) -> StoreResult<()> {
        let key = user_key(user_id)?;
        let conn = self.conn(user_id)?;

        let result = sqlx::query("UPDATE balances SET balance_minor = $1 WHERE user_id = $2")
            .bind(new_amount.minor())
            .bind(key)
            .execute(conn)
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(user_id));
        }
        Ok(())
    }

    async fn create_balance(&mut self, balance: &Balance) -> StoreResult<()> {
        let user_id = balance.user_id;
        let key = user_key(user_id)?;
        let conn = self.conn(user_id)?;

        sqlx::query(
            "INSERT INTO balances (user_id, balance_minor, created_at) VALUES ($1, $2, $3)",
        )
        .bind(key)
        .bind(balance.amount.minor())
        .bind(balance.created_at)
        .execute(conn)
        .await
        .map_err(|e| {
            if unique_violation(&e) {
                StoreError::AlreadyExists(user_id)
            } else {
                map_sqlx_error(e)
            }
        })?;

        Ok(())
    }
}

#[async_trait]
impl TransactionStore for PgUnit {
    async fn create_transaction(&mut self, record: NewTransaction) -> StoreResult<Transaction> {
        let key = user_key(record.user_id)?;
        let id = TransactionId::new();
        let conn = self.conn(record.user_id)?;

        // The owner's row is locked by this unit, so the max() below cannot
        // race with another append for the same user.
        let (timestamp,): (DateTime<Utc>,) = sqlx::query_as(
            r#"
            INSERT INTO transactions (id, user_id, kind, amount_minor, transfer_id, timestamp)
            VALUES (
                $1, $2, $3, $4, $5,
                GREATEST(
                    clock_timestamp(),
                    COALESCE(
                        (SELECT max(timestamp) FROM transactions WHERE user_id = $2),
                        '-infinity'::timestamptz
                    ) + interval '1 microsecond'
                )
            )
            RETURNING timestamp
            "#,
        )
        .bind(*id.as_uuid())
        .bind(key)
        .bind(record.kind.code())
        .bind(record.amount.minor())
        .bind(record.transfer_id.map(|transfer| *transfer.as_uuid()))
        .fetch_one(conn)
        .await
        .map_err(map_sqlx_error)?;

        Ok(record.into_transaction(id, timestamp))
    }

    async fn get_transactions_by_user_id(&mut self, user_id: UserId) -> StoreResult<Vec<Transaction>> {
        let key = user_key(user_id)?;
        let conn = self.conn(user_id)?;

        let rows: Vec<TransactionRow> = sqlx::query_as(
            r#"
            SELECT id, kind, amount_minor, transfer_id, timestamp
            FROM transactions
            WHERE user_id = $1
            ORDER BY timestamp DESC, id DESC
            "#,
        )
        .bind(key)
        .fetch_all(conn)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter()
            .map(|row| row.into_transaction(user_id))
            .collect()
    }
}

#[async_trait]
impl LedgerUnit for PgUnit {
    async fn commit(&mut self) -> StoreResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| StoreError::Transaction("unit already finished".to_string()))?;
        tx.commit()
            .await
            .map_err(|e| StoreError::Transaction(e.to_string()))
    }

    async fn rollback(&mut self) -> StoreResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| StoreError::Transaction("unit already finished".to_string()))?;
        tx.rollback()
            .await
            .map_err(|e| StoreError::Transaction(e.to_string()))
    }
}

#[derive(sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    kind: i16,
    amount_minor: i64,
    transfer_id: Option<Uuid>,
    timestamp: DateTime<Utc>,
}

impl TransactionRow {
    fn into_transaction(self, user_id: UserId) -> StoreResult<Transaction> {
        let kind = TransactionKind::from_code(self.kind).ok_or_else(|| {
            StoreError::Database(format!("unknown transaction kind {}", self.kind))
        })?;

        Ok(Transaction {
            id: TransactionId::from_uuid(self.id),
            user_id,
            kind,
            amount: Amount::from_minor(self.amount_minor),
            transfer_id: self.transfer_id.map(TransferId::from_uuid),
            timestamp: self.timestamp,
        })
    }
}

/// `BIGINT` key for a user id.
fn user_key(user_id: UserId) -> StoreResult<i64> {
    i64::try_from(user_id.get())
        .map_err(|_| StoreError::Database(format!("user id {} exceeds BIGINT range", user_id)))
}

fn unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

fn map_sqlx_error(error: sqlx::Error) -> StoreError {
    match error {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(error.to_string())
        }
        other => StoreError::Database(other.to_string()),
    }
}
