//! Deadline and cancellation wrapper shared by every ledger operation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use wallet_common::{Operation, Result, WalletError};

use crate::metrics::LedgerMetrics;

/// Runs operation futures under a deadline and a shutdown token.
///
/// The future is dropped when either fires, which drops any unit it holds
/// and rolls that unit back.
#[derive(Clone)]
pub struct OperationRunner {
    timeout: Duration,
    shutdown: CancellationToken,
    metrics: Arc<LedgerMetrics>,
}

impl OperationRunner {
    /// Create a runner.
    pub fn new(timeout: Duration, shutdown: CancellationToken, metrics: Arc<LedgerMetrics>) -> Self {
        Self {
            timeout,
            shutdown,
            metrics,
        }
    }

    /// Token that cancels every operation run through this runner.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Shared metrics.
    pub fn metrics(&self) -> &Arc<LedgerMetrics> {
        &self.metrics
    }

    /// Drive `fut` to completion, or fail with `Timeout` / `Cancelled`.
    pub async fn run<T, F>(&self, operation: Operation, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.metrics.operation_started();

        let outcome = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(WalletError::Cancelled(operation)),
            result = tokio::time::timeout(self.timeout, fut) => match result {
                Ok(outcome) => outcome,
                Err(_) => Err(WalletError::Timeout(operation)),
            },
        };

        if let Err(error) = &outcome {
            warn!(
                operation = %operation,
                code = error.error_code(),
                error = %error,
                "Ledger operation failed"
            );
        }

        self.metrics.operation_finished(operation, &outcome);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner(timeout: Duration) -> OperationRunner {
        OperationRunner::new(timeout, CancellationToken::new(), Arc::new(LedgerMetrics::new()))
    }

    #[tokio::test]
    async fn test_passes_result_through() {
        let runner = runner(Duration::from_secs(1));
        let value = runner.run(Operation::CheckBalance, async { Ok::<_, WalletError>(7) }).await.unwrap();
        assert_eq!(value, 7);
        assert_eq!(runner.metrics().snapshot().operations_success, 1);
    }

    #[tokio::test]
    async fn test_times_out() {
        let runner = runner(Duration::from_millis(20));
        let result: Result<()> = runner
            .run(Operation::Deposit, async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(WalletError::Timeout(Operation::Deposit))));
        assert_eq!(runner.metrics().snapshot().timeouts, 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let runner = runner(Duration::from_secs(1));
        runner.shutdown_token().cancel();

        let result = runner.run(Operation::Withdraw, async { Ok::<_, WalletError>(1) }).await;
        assert!(matches!(result, Err(WalletError::Cancelled(Operation::Withdraw))));
    }

    #[tokio::test]
    async fn test_cancelled_while_running() {
        let runner = runner(Duration::from_secs(5));
        let token = runner.shutdown_token().clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let result: Result<()> = runner
            .run(Operation::Transfer, async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(WalletError::Cancelled(Operation::Transfer))));
        assert_eq!(runner.metrics().snapshot().operations_failed, 1);
    }
}
