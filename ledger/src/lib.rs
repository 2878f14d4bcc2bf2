//! Wallet Ledger Engine
//!
//! Per-user balances with an append-only transaction log. Every operation
//! runs in one unit of work on a [`LedgerStore`], so a balance and its
//! transaction records change together or not at all.

pub mod balance;
pub mod config;
pub mod engine;
pub mod history;
pub mod journal;
pub mod memory;
pub mod metrics;
pub mod postgres;
pub mod response;
pub mod runner;
pub mod store;

pub use balance::Balance;
pub use config::{AmountPolicy, LedgerConfig};
pub use engine::LedgerEngine;
pub use history::TransactionHistoryReader;
pub use journal::{NewTransaction, Transaction, TransactionKind, TransferLegs};
pub use memory::{FaultPoint, MemoryLedgerStore};
pub use metrics::{LedgerMetrics, MetricsSnapshot};
pub use postgres::{DatabaseConfig, PgLedgerStore};
pub use response::{messages, BalanceChange, BalanceView, LedgerResponse, TransferReceipt};
pub use runner::OperationRunner;
pub use store::{BalanceStore, LedgerStore, LedgerUnit, TransactionStore, UnitScope};
