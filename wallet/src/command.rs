//! Ledger commands and their JSON responses.

use std::io::Write;

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use wallet_common::{Amount, UserId};
use wallet_ledger::{messages, BalanceView, LedgerEngine, LedgerResponse, LedgerStore};

/// One ledger operation.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Open a balance for a user
    Open {
        user: UserId,
        /// Opening amount
        #[arg(default_value = "0")]
        initial: Amount,
    },

    /// Show a user's balance
    Balance { user: UserId },

    /// Deposit into a user's balance
    Deposit { user: UserId, amount: Amount },

    /// Withdraw from a user's balance
    Withdraw { user: UserId, amount: Amount },

    /// Move funds between two users
    Transfer {
        from: UserId,
        to: UserId,
        amount: Amount,
    },

    /// List a user's transactions, newest first
    History { user: UserId },
}

/// A command line inside a script.
#[derive(Parser, Debug)]
#[command(no_binary_name = true)]
struct ScriptLine {
    #[command(subcommand)]
    command: Command,
}

/// Parse one script line. Blank lines and `#` comments yield `None`.
pub fn parse_line(line: &str) -> Option<Result<Command, clap::Error>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    Some(ScriptLine::try_parse_from(line.split_whitespace()).map(|parsed| parsed.command))
}

/// Run a command and render the response envelope.
pub async fn execute<S>(engine: &LedgerEngine<S>, command: Command) -> serde_json::Result<Value>
where
    S: LedgerStore + ?Sized,
{
    match command {
        Command::Open { user, initial } => render(LedgerResponse::from_result(
            messages::OPEN_BALANCE,
            engine.open_balance(user, initial).await.map(BalanceView::from),
        )),
        Command::Balance { user } => render(LedgerResponse::from_result(
            messages::CHECK_BALANCE,
            engine
                .check_balance(user)
                .await
                .map(|balance| BalanceView {
                    user_id: user,
                    balance,
                }),
        )),
        Command::Deposit { user, amount } => render(LedgerResponse::from_result(
            messages::DEPOSIT,
            engine.deposit(user, amount).await,
        )),
        Command::Withdraw { user, amount } => render(LedgerResponse::from_result(
            messages::WITHDRAW,
            engine.withdraw(user, amount).await,
        )),
        Command::Transfer { from, to, amount } => render(LedgerResponse::from_result(
            messages::TRANSFER,
            engine.transfer(from, to, amount).await,
        )),
        Command::History { user } => render(LedgerResponse::from_result(
            messages::TRANSACTION_HISTORY,
            engine.history_reader().view_transaction_history(user).await,
        )),
    }
}

/// Response for a script line that did not parse.
pub fn invalid_line(line: &str, error: &clap::Error) -> Value {
    serde_json::json!({
        "success": false,
        "message": format!("Invalid command '{}': {}", line.trim(), error.kind()),
        "code": "INVALID_COMMAND",
    })
}

/// Execute a script, one command per line, writing one response per line.
///
/// Stops reading once `shutdown` is cancelled. Returns whether every
/// executed line succeeded and the script ran to the end.
pub async fn run_script<S, R, W>(
    engine: &LedgerEngine<S>,
    reader: R,
    shutdown: &CancellationToken,
    out: &mut W,
    pretty: bool,
) -> anyhow::Result<bool>
where
    S: LedgerStore + ?Sized,
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut lines = reader.lines();
    let mut all_succeeded = true;

    while let Some(line) = lines.next_line().await? {
        if shutdown.is_cancelled() {
            warn!("Shutdown requested, stopping script");
            return Ok(false);
        }

        let response = match parse_line(&line) {
            None => continue,
            Some(Ok(command)) => execute(engine, command).await?,
            Some(Err(e)) => {
                warn!(line = %line.trim(), "Skipping invalid script line");
                invalid_line(&line, &e)
            }
        };

        all_succeeded &= response["success"] == true;
        write_response(out, &response, pretty)?;
    }

    Ok(all_succeeded)
}

/// Write one response as a JSON line.
pub fn write_response<W: Write>(out: &mut W, response: &Value, pretty: bool) -> anyhow::Result<()> {
    if pretty {
        serde_json::to_writer_pretty(&mut *out, response)?;
    } else {
        serde_json::to_writer(&mut *out, response)?;
    }
    writeln!(out)?;
    Ok(())
}

fn render<T: Serialize>(response: LedgerResponse<T>) -> serde_json::Result<Value> {
    serde_json::to_value(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use wallet_ledger::{LedgerConfig, MemoryLedgerStore};

    fn engine() -> LedgerEngine<MemoryLedgerStore> {
        LedgerEngine::new(Arc::new(MemoryLedgerStore::new()), LedgerConfig::default())
    }

    fn line(text: &str) -> Command {
        parse_line(text).unwrap().unwrap()
    }

    #[test]
    fn test_parse_line() {
        assert_eq!(
            line("transfer 1 2 50.25"),
            Command::Transfer {
                from: UserId::new(1),
                to: UserId::new(2),
                amount: Amount::from_minor(5_025),
            }
        );
        assert_eq!(
            line("  open 7 "),
            Command::Open {
                user: UserId::new(7),
                initial: Amount::ZERO,
            }
        );
        assert!(parse_line("").is_none());
        assert!(parse_line("# comment").is_none());
        assert!(parse_line("deposit one 5").unwrap().is_err());
        assert!(parse_line("deposit 1 0.001").unwrap().is_err());
    }

    #[tokio::test]
    async fn test_deposit_response() {
        let engine = engine();
        execute(&engine, line("open 1 100")).await.unwrap();

        let response = execute(&engine, line("deposit 1 50")).await.unwrap();
        assert_eq!(response["success"], true);
        assert_eq!(response["message"], "Deposit successful");
        assert_eq!(response["data"]["balance"], "150.00");
        assert_eq!(response["data"]["transaction"]["kind"], "Deposit");
    }

    #[tokio::test]
    async fn test_transfer_response() {
        let engine = engine();
        execute(&engine, line("open 1 100")).await.unwrap();
        execute(&engine, line("open 2 100")).await.unwrap();

        let response = execute(&engine, line("transfer 1 2 50")).await.unwrap();
        assert_eq!(response["success"], true);
        assert_eq!(response["message"], "Transfer successful");
        assert_eq!(response["data"]["sender_balance"], "50.00");
        assert_eq!(response["data"]["recipient_balance"], "150.00");
    }

    #[tokio::test]
    async fn test_failure_response() {
        let engine = engine();
        execute(&engine, line("open 1 100")).await.unwrap();

        let response = execute(&engine, line("withdraw 1 150")).await.unwrap();
        assert_eq!(response["success"], false);
        assert_eq!(response["code"], "INSUFFICIENT_FUNDS");
        assert!(response.get("data").is_none());

        let history = execute(&engine, line("history 1")).await.unwrap();
        assert_eq!(history["data"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_run_script() {
        let engine = engine();
        let script = "open 1 100\nopen 2 100\n\n# move funds\ntransfer 1 2 50\nwithdraw 1 150\n";
        let mut out = Vec::new();

        let all_succeeded = run_script(
            &engine,
            script.as_bytes(),
            &CancellationToken::new(),
            &mut out,
            false,
        )
        .await
        .unwrap();
        assert!(!all_succeeded);

        let responses: Vec<Value> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(responses.len(), 4);
        assert_eq!(responses[2]["data"]["sender_balance"], "50.00");
        assert_eq!(responses[3]["code"], "INSUFFICIENT_FUNDS");
    }

    #[tokio::test]
    async fn test_run_script_stops_after_shutdown() {
        let engine = engine();
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let mut out = Vec::new();

        let all_succeeded = run_script(
            &engine,
            "open 1 100\ndeposit 1 5\nbalance 1\n".as_bytes(),
            &shutdown,
            &mut out,
            false,
        )
        .await
        .unwrap();

        assert!(!all_succeeded);
        assert!(out.is_empty());
    }

    #[test]
    fn test_invalid_line() {
        let error = parse_line("frobnicate 1").unwrap().unwrap_err();
        let response = invalid_line("frobnicate 1", &error);
        assert_eq!(response["success"], false);
        assert_eq!(response["code"], "INVALID_COMMAND");
    }
}
