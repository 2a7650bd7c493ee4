//! Market data capability.
//!
//! The order engine never talks to a quote provider directly. It is handed a
//! [`MarketData`] implementation and bounds every call with a timeout.

mod static_quotes;

pub use static_quotes::StaticQuotes;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Latest trade price for a ticker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Quote {
    pub ticker: String,
    /// Display name, if the provider could resolve one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Trading date the price belongs to
    pub date: NaiveDate,
    /// Last trade (closing) price
    #[serde(rename = "close")]
    pub price: i64,
}

impl Quote {
    /// The provider's display name, unless it is missing or blank.
    pub fn resolved_name(&self) -> Option<&str> {
        self.name.as_deref().map(str::trim).filter(|n| !n.is_empty())
    }
}

/// Why a quote could not be produced.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MarketDataError {
    #[error("no market data found for ticker {0}")]
    UnknownTicker(String),

    #[error("market data provider failed: {0}")]
    Provider(String),
}

/// A source of latest prices and display names.
#[async_trait]
pub trait MarketData: Send + Sync + Debug {
    async fn quote(&self, ticker: &str) -> Result<Quote, MarketDataError>;
}
