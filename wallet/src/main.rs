//! Wallet CLI
//!
//! Runs ledger operations against PostgreSQL when `DATABASE_URL` is set, or
//! against an in-memory store otherwise. Every command prints its response
//! envelope as JSON on stdout; logs go to stderr.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wallet_ledger::{LedgerEngine, LedgerStore, MemoryLedgerStore, PgLedgerStore};

mod command;
mod config;

use command::Command;
use config::{LogFormat, WalletConfig};

/// Wallet ledger CLI
#[derive(Parser, Debug)]
#[command(name = "wallet")]
#[command(about = "Wallet balances and transaction ledger")]
struct Args {
    /// Pretty-print JSON responses
    #[arg(long)]
    pretty: bool,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    #[command(flatten)]
    Ledger(Command),

    /// Run one command per line from a file, or stdin, against one engine
    Run {
        /// Script file
        file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    let config = WalletConfig::from_env();
    init_tracing(config.log_format);

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(e.into());
    }

    let postgres = match &config.database {
        Some(database) => {
            let store = PgLedgerStore::connect(database).await?;
            store.ensure_schema().await?;
            info!("Using PostgreSQL ledger store");
            Some(store)
        }
        None => {
            info!("DATABASE_URL not set, using in-memory ledger store");
            None
        }
    };
    let store: Arc<dyn LedgerStore> = match &postgres {
        Some(store) => Arc::new(store.clone()),
        None => Arc::new(MemoryLedgerStore::new()),
    };

    let shutdown = CancellationToken::new();
    let engine = LedgerEngine::with_cancellation(store, config.ledger.clone(), shutdown.clone());

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            signal.cancel();
        }
    });

    let mut stdout = std::io::stdout().lock();
    let all_succeeded = match args.action {
        Action::Ledger(command) => {
            let response = command::execute(&engine, command).await?;
            command::write_response(&mut stdout, &response, args.pretty)?;
            response["success"] == true
        }
        Action::Run { file: Some(path) } => {
            let file = tokio::fs::File::open(&path).await?;
            command::run_script(&engine, BufReader::new(file), &shutdown, &mut stdout, args.pretty)
                .await?
        }
        Action::Run { file: None } => {
            let stdin = BufReader::new(tokio::io::stdin());
            command::run_script(&engine, stdin, &shutdown, &mut stdout, args.pretty).await?
        }
    };

    if let Some(store) = postgres {
        store.close().await;
    }

    let metrics = engine.metrics();
    info!(
        total = metrics.operations_total,
        succeeded = metrics.operations_success,
        rejected = metrics.operations_rejected,
        failed = metrics.operations_failed,
        "Wallet session complete"
    );

    Ok(if all_succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
    );

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}
