//! Core data types for the trade ledger.

use crate::{Error, Result};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Wire and storage format for trade timestamps.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Wire and storage format for calendar dates.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// A held position in a single ticker.
///
/// A holding with zero quantity never exists; selling the last share removes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Holding {
    /// Ticker symbol (uppercase)
    pub ticker: String,
    /// Display name, falls back to the ticker
    pub name: String,
    /// Number of shares held, always > 0
    pub qty: i64,
    /// Weighted average cost per share
    pub avg_price: i64,
}

impl Holding {
    /// Create a new holding.
    pub fn new(ticker: &str, name: &str, qty: i64, avg_price: i64) -> Self {
        Self {
            ticker: ticker.to_uppercase(),
            name: name.to_string(),
            qty,
            avg_price,
        }
    }

    /// Total cost basis of the position.
    pub fn total_cost(&self) -> i128 {
        i128::from(self.qty) * i128::from(self.avg_price)
    }
}

/// Per-ticker entry of a balance report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortfolioItem {
    pub qty: i64,
    pub name: String,
    pub avg_price: i64,
}

impl From<&Holding> for PortfolioItem {
    fn from(holding: &Holding) -> Self {
        Self {
            qty: holding.qty,
            name: holding.name.clone(),
            avg_price: holding.avg_price,
        }
    }
}

/// Cash balance plus every open holding, as of one committed state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct BalanceSnapshot {
    /// Cash available for new buys
    pub available_cash: i64,
    /// Holdings keyed by ticker
    pub portfolio: BTreeMap<String, PortfolioItem>,
}

impl BalanceSnapshot {
    /// Build a snapshot from a cash balance and a set of holdings.
    pub fn new<'a>(available_cash: i64, holdings: impl IntoIterator<Item = &'a Holding>) -> Self {
        Self {
            available_cash,
            portfolio: holdings
                .into_iter()
                .map(|h| (h.ticker.clone(), PortfolioItem::from(h)))
                .collect(),
        }
    }

    /// Look up a holding by ticker.
    pub fn holding(&self, ticker: &str) -> Option<Holding> {
        let ticker = ticker.to_uppercase();
        self.portfolio
            .get(&ticker)
            .map(|item| Holding::new(&ticker, &item.name, item.qty, item.avg_price))
    }

    /// Number of open holdings.
    pub fn position_count(&self) -> usize {
        self.portfolio.len()
    }
}

/// Trade direction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "buy",
            TradeSide::Sell => "sell",
        }
    }
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradeSide {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "buy" => Ok(TradeSide::Buy),
            "sell" => Ok(TradeSide::Sell),
            other => Err(format!("unknown trade type: {other}")),
        }
    }
}

/// A trade that has been computed but not yet written to the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTrade {
    pub side: TradeSide,
    pub ticker: String,
    pub name: String,
    pub qty: i64,
    pub price: i64,
    /// Average cost after a buy, or the average realized by a sell
    pub avg_price: i64,
    pub executed_at: NaiveDateTime,
}

/// An immutable entry of the trade history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TradeRecord {
    /// Insertion sequence number assigned by the store
    #[serde(skip)]
    pub id: i64,
    #[serde(rename = "type")]
    pub side: TradeSide,
    pub name: String,
    pub ticker: String,
    pub qty: i64,
    /// Execution price per share
    pub price: i64,
    /// Average cost after a buy, or the average realized by a sell
    pub avg_price: i64,
    /// When the trade was committed
    #[serde(rename = "datetime", with = "datetime_format")]
    pub executed_at: NaiveDateTime,
}

impl TradeRecord {
    /// Attach a store-assigned id to a new trade.
    pub fn from_new(id: i64, trade: NewTrade) -> Self {
        Self {
            id,
            side: trade.side,
            name: trade.name,
            ticker: trade.ticker,
            qty: trade.qty,
            price: trade.price,
            avg_price: trade.avg_price,
            executed_at: trade.executed_at,
        }
    }

    /// Calendar date of execution.
    pub fn date(&self) -> NaiveDate {
        self.executed_at.date()
    }
}

/// A buy or sell request against the account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Order {
    pub side: TradeSide,
    pub ticker: String,
    pub qty: i64,
}

impl Order {
    pub fn buy(ticker: &str, qty: i64) -> Self {
        Self {
            side: TradeSide::Buy,
            ticker: ticker.to_string(),
            qty,
        }
    }

    pub fn sell(ticker: &str, qty: i64) -> Self {
        Self {
            side: TradeSide::Sell,
            ticker: ticker.to_string(),
            qty,
        }
    }
}

/// Result of a committed order.
#[derive(Debug, Clone, Serialize)]
pub struct OrderReceipt {
    /// Human-readable confirmation
    pub message: String,
    /// Cash balance after the order
    pub available_cash: i64,
    /// The trade that was appended to the history
    #[serde(skip_serializing)]
    pub trade: TradeRecord,
}

/// Inclusive calendar-date window for trade history queries.
///
/// A missing bound leaves that side of the window open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
}

impl DateRange {
    /// Build a range, rejecting a start that falls after the end.
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<Self> {
        if let (Some(start), Some(end)) = (start, end) {
            if start > end {
                return Err(Error::InvalidRange { start, end });
            }
        }
        Ok(Self { start, end })
    }

    /// The unbounded range.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn start(&self) -> Option<NaiveDate> {
        self.start
    }

    pub fn end(&self) -> Option<NaiveDate> {
        self.end
    }

    /// Whether a date falls inside the window.
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.map_or(true, |s| date >= s) && self.end.map_or(true, |e| date <= e)
    }
}

/// API response wrapper used by the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Create a successful response.
    pub fn ok(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    /// Create an error response.
    pub fn err(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Format a currency amount with thousands separators (`1234567` -> `1,234,567`).
pub fn format_amount(amount: impl Borrow<i64>) -> String {
    let amount = *amount.borrow();
    let digits = amount.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if amount < 0 {
        out.push('-');
    }
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

pub(crate) mod datetime_format {
    use super::DATETIME_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.format(DATETIME_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, DATETIME_FORMAT).map_err(serde::de::Error::custom)
    }
}
