//! trade-ledger CLI - place orders and query the simulated account.
//!
//! Every command prints one JSON document wrapped in `{ok, data, error}`.
//! Logs go to stderr.

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use trade_ledger::{telemetry, ApiResponse, Ledger, LedgerConfig, StaticQuotes};

#[derive(Parser)]
#[command(name = "trade-ledger")]
#[command(about = "Simulated single-account stock trading ledger")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ~/.trade-ledger/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// TOML quote table, overriding `quotes_file` from the config
    #[arg(long, global = true)]
    quotes: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Buy shares at the market price
    Buy {
        /// Ticker symbol
        #[arg(short, long)]
        ticker: String,
        /// Number of shares
        #[arg(short = 'n', long, allow_negative_numbers = true)]
        qty: i64,
    },
    /// Sell shares at the market price
    Sell {
        /// Ticker symbol
        #[arg(short, long)]
        ticker: String,
        /// Number of shares
        #[arg(short = 'n', long, allow_negative_numbers = true)]
        qty: i64,
    },
    /// Show cash and holdings
    Balance {
        /// Account password, if one is configured
        #[arg(short, long)]
        password: Option<String>,
    },
    /// List trades, most recent first
    Trades {
        /// First date to include (YYYY-MM-DD)
        #[arg(long)]
        start: Option<NaiveDate>,
        /// Last date to include (YYYY-MM-DD)
        #[arg(long)]
        end: Option<NaiveDate>,
    },
    /// Look up the latest price for a ticker
    Quote {
        #[arg(short, long)]
        ticker: String,
    },
}

fn render<T: Serialize>(result: trade_ledger::Result<T>) -> anyhow::Result<(String, bool)> {
    let ok = result.is_ok();
    let json = match result {
        Ok(data) => serde_json::to_string_pretty(&ApiResponse::ok(data))?,
        Err(e) => serde_json::to_string_pretty(&ApiResponse::<()>::err(e.to_string()))?,
    };
    Ok((json, ok))
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    telemetry::init("info").context("failed to initialize logging")?;
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => LedgerConfig::load_from_path(path),
        None => LedgerConfig::load(),
    }
    .context("failed to load configuration")?;

    let quotes = match cli.quotes.as_ref().or(config.quotes_file.as_ref()) {
        Some(path) => StaticQuotes::load_from_path(path)
            .with_context(|| format!("failed to load quotes from {}", path.display()))?,
        None => {
            tracing::warn!("no quote file configured, every price lookup will fail");
            StaticQuotes::new()
        }
    };

    let ledger = Ledger::open(config, Arc::new(quotes))
        .await
        .context("failed to open ledger")?;

    let (output, ok) = match cli.command {
        Commands::Buy { ticker, qty } => render(ledger.buy(&ticker, qty).await)?,
        Commands::Sell { ticker, qty } => render(ledger.sell(&ticker, qty).await)?,
        Commands::Balance { password } => render(ledger.balance(password.as_deref()).await)?,
        Commands::Trades { start, end } => render(ledger.trade_history(start, end).await)?,
        Commands::Quote { ticker } => render(ledger.quote(&ticker).await)?,
    };

    println!("{output}");
    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
