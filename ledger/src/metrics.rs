//! Counters for ledger operations.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use wallet_common::{Operation, WalletError};

/// Ledger metrics.
#[derive(Default)]
pub struct LedgerMetrics {
    /// Operations started.
    pub operations_total: AtomicU64,
    /// Operations that completed successfully.
    pub operations_success: AtomicU64,
    /// Operations refused by a business rule (missing balance, funds, amount).
    pub operations_rejected: AtomicU64,
    /// Operations that failed in the store, timed out or were cancelled.
    pub operations_failed: AtomicU64,
    /// Operations in progress.
    pub operations_active: AtomicU64,
    /// Committed deposits.
    pub deposits: AtomicU64,
    /// Committed withdrawals.
    pub withdrawals: AtomicU64,
    /// Committed transfers.
    pub transfers: AtomicU64,
    /// Operations abandoned at their deadline.
    pub timeouts: AtomicU64,
}

impl LedgerMetrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an operation start.
    pub fn operation_started(&self) {
        self.operations_total.fetch_add(1, Ordering::Relaxed);
        self.operations_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of an operation.
    pub fn operation_finished<T>(&self, operation: Operation, outcome: &Result<T, WalletError>) {
        self.operations_active.fetch_sub(1, Ordering::Relaxed);

        match outcome {
            Ok(_) => {
                self.operations_success.fetch_add(1, Ordering::Relaxed);
                match operation {
                    Operation::Deposit => self.deposits.fetch_add(1, Ordering::Relaxed),
                    Operation::Withdraw => self.withdrawals.fetch_add(1, Ordering::Relaxed),
                    Operation::Transfer => self.transfers.fetch_add(1, Ordering::Relaxed),
                    _ => 0,
                };
            }
            Err(
                WalletError::NotFound(_)
                | WalletError::AlreadyExists(_)
                | WalletError::InsufficientFunds { .. }
                | WalletError::InvalidAmount { .. }
                | WalletError::InvalidTransfer(_)
                | WalletError::Arithmetic(_),
            ) => {
                self.operations_rejected.fetch_add(1, Ordering::Relaxed);
            }
            Err(error) => {
                if matches!(error, WalletError::Timeout(_)) {
                    self.timeouts.fetch_add(1, Ordering::Relaxed);
                }
                self.operations_failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            operations_total: self.operations_total.load(Ordering::Relaxed),
            operations_success: self.operations_success.load(Ordering::Relaxed),
            operations_rejected: self.operations_rejected.load(Ordering::Relaxed),
            operations_failed: self.operations_failed.load(Ordering::Relaxed),
            operations_active: self.operations_active.load(Ordering::Relaxed),
            deposits: self.deposits.load(Ordering::Relaxed),
            withdrawals: self.withdrawals.load(Ordering::Relaxed),
            transfers: self.transfers.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`LedgerMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub operations_total: u64,
    pub operations_success: u64,
    pub operations_rejected: u64,
    pub operations_failed: u64,
    pub operations_active: u64,
    pub deposits: u64,
    pub withdrawals: u64,
    pub transfers: u64,
    pub timeouts: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wallet_common::UserId;

    #[test]
    fn test_outcomes_are_classified() {
        let metrics = LedgerMetrics::new();

        metrics.operation_started();
        metrics.operation_finished(Operation::Deposit, &Ok::<(), WalletError>(()));

        metrics.operation_started();
        metrics.operation_finished::<()>(
            Operation::Withdraw,
            &Err(WalletError::NotFound(UserId::new(1))),
        );

        metrics.operation_started();
        metrics.operation_finished::<()>(
            Operation::Transfer,
            &Err(WalletError::Timeout(Operation::Transfer)),
        );

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.operations_total, 3);
        assert_eq!(snapshot.operations_success, 1);
        assert_eq!(snapshot.deposits, 1);
        assert_eq!(snapshot.operations_rejected, 1);
        assert_eq!(snapshot.operations_failed, 1);
        assert_eq!(snapshot.timeouts, 1);
        assert_eq!(snapshot.operations_active, 0);
    }
}
