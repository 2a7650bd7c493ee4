//! Fixed quote table, loadable from TOML.
//!
//! ```toml
//! [quotes."005930"]
//! name = "Samsung Electronics"
//! price = 71000
//! date = "2025-07-28"
//! ```

use super::{MarketData, MarketDataError, Quote};
use crate::Result;
use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

#[derive(Debug, Clone, Deserialize)]
struct QuoteEntry {
    #[serde(default)]
    name: Option<String>,
    price: i64,
    #[serde(default)]
    date: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize)]
struct QuoteFile {
    #[serde(default)]
    quotes: HashMap<String, QuoteEntry>,
}

/// In-process quote table keyed by uppercase ticker.
#[derive(Debug, Default)]
pub struct StaticQuotes {
    entries: RwLock<HashMap<String, QuoteEntry>>,
}

impl StaticQuotes {
    /// Create an empty table. Every lookup fails until quotes are added.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with_quote(self, ticker: &str, name: &str, price: i64) -> Self {
        self.insert(ticker, Some(name), price);
        self
    }

    /// Add or replace a quote.
    pub fn insert(&self, ticker: &str, name: Option<&str>, price: i64) {
        let entry = QuoteEntry {
            name: name.map(str::to_string),
            price,
            date: None,
        };
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(ticker.trim().to_uppercase(), entry);
    }

    /// Change the price of a ticker, keeping its name. Inserts if missing.
    pub fn set_price(&self, ticker: &str, price: i64) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries
            .entry(ticker.trim().to_uppercase())
            .and_modify(|e| e.price = price)
            .or_insert(QuoteEntry {
                name: None,
                price,
                date: None,
            });
    }

    /// Parse a quote table from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: QuoteFile = toml::from_str(content)?;
        let entries = file
            .quotes
            .into_iter()
            .map(|(ticker, entry)| (ticker.trim().to_uppercase(), entry))
            .collect();
        Ok(Self {
            entries: RwLock::new(entries),
        })
    }

    /// Load a quote table from a TOML file. A missing file yields an empty table.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "quote file not found, starting with no quotes");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Number of tickers in the table.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl MarketData for StaticQuotes {
    async fn quote(&self, ticker: &str) -> std::result::Result<Quote, MarketDataError> {
        let key = ticker.trim().to_uppercase();
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let entry = entries
            .get(&key)
            .ok_or_else(|| MarketDataError::UnknownTicker(key.clone()))?;

        Ok(Quote {
            ticker: key,
            name: entry.name.clone(),
            date: entry.date.unwrap_or_else(|| Local::now().date_naive()),
            price: entry.price,
        })
    }
}
