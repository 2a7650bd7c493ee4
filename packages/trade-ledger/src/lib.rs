//! Trade Ledger - simulated single-account stock trading.
//!
//! This crate provides the order-execution and ledger-consistency core of a
//! paper trading account:
//!
//! - **Order engine**: buys and sells at a resolved market price, keeping a
//!   weighted average cost basis per holding
//! - **Ledger store**: cash, holdings and trade history committed atomically,
//!   backed by SQLite or kept in memory
//! - **Queries**: balance snapshots and date-filtered trade history
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use trade_ledger::{market::StaticQuotes, store::MemoryStore, OrderEngine, QueryService};
//!
//! # async fn demo() -> trade_ledger::Result<()> {
//! let store = Arc::new(MemoryStore::new(10_000_000));
//! let quotes = Arc::new(StaticQuotes::new().with_quote("005930", "Samsung Electronics", 71_000));
//!
//! let engine = OrderEngine::new(store.clone(), quotes);
//! let receipt = engine.buy("005930", 10).await?;
//! println!("{} (cash: {})", receipt.message, receipt.available_cash);
//!
//! let balance = QueryService::new(store).balance().await?;
//! println!("Open positions: {}", balance.position_count());
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod ledger;
pub mod market;
pub mod order;
pub mod query;
pub mod store;
pub mod telemetry;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{LedgerConfig, StoreConfig};
pub use ledger::Ledger;
pub use market::{MarketData, MarketDataError, Quote, StaticQuotes};
pub use order::OrderEngine;
pub use query::QueryService;
pub use store::{LedgerStore, MemoryStore, SqliteStore, StoreError};
pub use types::{
    format_amount, ApiResponse, BalanceSnapshot, DateRange, Holding, Order, OrderReceipt,
    PortfolioItem, TradeRecord, TradeSide,
};

use chrono::NaiveDate;

/// Error types for trade-ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Quantity must be greater than zero, got {0}")]
    InvalidQuantity(i64),

    #[error("Ticker must not be empty")]
    EmptyTicker,

    #[error("Order value overflows: {qty} x {price}")]
    Overflow { qty: i64, price: i64 },

    #[error("start_date {start} is after end_date {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error(
        "Insufficient funds. Cash balance is {}, order requires {}",
        format_amount(.available),
        format_amount(.required)
    )]
    InsufficientFunds { required: i64, available: i64 },

    #[error("Insufficient holdings of {ticker}. Held: {held}, requested: {requested}")]
    InsufficientHoldings {
        ticker: String,
        held: i64,
        requested: i64,
    },

    #[error("Market data unavailable for {ticker}: {reason}")]
    MarketDataUnavailable { ticker: String, reason: String },

    #[error("Persistence failure: {0}")]
    Persistence(#[from] StoreError),

    #[error("Unauthorized: account password does not match")]
    Unauthorized,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether the request itself was malformed, independent of account state.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::InvalidQuantity(_)
                | Error::EmptyTicker
                | Error::Overflow { .. }
                | Error::InvalidRange { .. }
        )
    }
}

/// Result type for trade-ledger operations.
pub type Result<T> = std::result::Result<T, Error>;
