//! Ledger persistence.
//!
//! A [`LedgerStore`] holds the single account's cash balance, its holdings and
//! the append-only trade history. Every order lands through [`LedgerStore::commit`],
//! which writes all three facts or none of them.
//!
//! A commit carries the [`AccountView`] it was computed from. The store applies
//! it only if the account still looks exactly like that view, so two writers
//! sharing one ledger can never overwrite each other's balance.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::config::StoreConfig;
use crate::types::{BalanceSnapshot, DateRange, Holding, NewTrade, TradeRecord};
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;

/// The only account id this ledger serves.
pub const ACCOUNT_ID: i64 = 1;

/// Cash balance and, if held, the holding for one ticker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountView {
    pub cash_balance: i64,
    pub holding: Option<Holding>,
}

impl AccountView {
    /// Quantity and average cost of the holding, if any.
    pub fn position(&self) -> Option<(i64, i64)> {
        self.holding.as_ref().map(|h| (h.qty, h.avg_price))
    }
}

/// What happens to the traded ticker's holding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HoldingChange {
    /// Create or overwrite the holding.
    Upsert(Holding),
    /// The position was fully sold.
    Remove(String),
}

impl HoldingChange {
    pub fn ticker(&self) -> &str {
        match self {
            HoldingChange::Upsert(h) => &h.ticker,
            HoldingChange::Remove(t) => t,
        }
    }
}

/// New account state plus the trade that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerCommit {
    /// Account state the commit was computed from
    pub basis: AccountView,
    pub cash_balance: i64,
    pub holding: HoldingChange,
    pub trade: NewTrade,
}

impl LedgerCommit {
    /// Reject commits that would break a ledger invariant.
    pub fn check(&self) -> Result<(), StoreError> {
        if self.cash_balance < 0 {
            return Err(StoreError::Rejected(format!(
                "cash balance would become negative ({})",
                self.cash_balance
            )));
        }
        if let HoldingChange::Upsert(h) = &self.holding {
            if h.qty <= 0 {
                return Err(StoreError::Rejected(format!(
                    "holding {} would have non-positive quantity ({})",
                    h.ticker, h.qty
                )));
            }
        }
        if self.holding.ticker() != self.trade.ticker {
            return Err(StoreError::Rejected(format!(
                "holding change for {} does not match trade ticker {}",
                self.holding.ticker(),
                self.trade.ticker
            )));
        }
        if let Some(h) = &self.basis.holding {
            if h.ticker != self.trade.ticker {
                return Err(StoreError::Rejected(format!(
                    "basis holding {} does not match trade ticker {}",
                    h.ticker, self.trade.ticker
                )));
            }
        }
        if self.trade.qty <= 0 {
            return Err(StoreError::Rejected(format!(
                "trade quantity must be positive ({})",
                self.trade.qty
            )));
        }
        Ok(())
    }

    /// Fail with [`StoreError::Conflict`] unless the stored account still
    /// matches the basis.
    pub fn ensure_basis(&self, cash_balance: i64, position: Option<(i64, i64)>) -> Result<(), StoreError> {
        if cash_balance != self.basis.cash_balance || position != self.basis.position() {
            return Err(StoreError::Conflict(format!(
                "account changed since it was read (cash {} -> {}, {} {:?} -> {:?})",
                self.basis.cash_balance,
                cash_balance,
                self.trade.ticker,
                self.basis.position(),
                position
            )));
        }
        Ok(())
    }
}

/// Storage-level failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("database migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stored data is corrupt: {0}")]
    Corrupt(String),

    #[error("commit rejected: {0}")]
    Rejected(String),

    /// Another writer changed the account between read and commit.
    #[error("concurrent update: {0}")]
    Conflict(String),
}

/// Durable (or ephemeral) holder of the account, holdings and trade history.
#[async_trait]
pub trait LedgerStore: Send + Sync + Debug {
    /// Current cash balance and the holding for `ticker`, if any.
    async fn read(&self, ticker: &str) -> Result<AccountView, StoreError>;

    /// Atomically apply a balance, a holding change and a new trade record.
    ///
    /// Nothing is written and [`StoreError::Conflict`] is returned if the
    /// account no longer matches `commit.basis`. The stored timestamp is
    /// clamped so history stays non-decreasing.
    async fn commit(&self, commit: LedgerCommit) -> Result<TradeRecord, StoreError>;

    /// Cash plus every holding, from a single committed state.
    async fn balance(&self) -> Result<BalanceSnapshot, StoreError>;

    /// Trades whose date falls within `range`, most recent first.
    async fn trades(&self, range: DateRange) -> Result<Vec<TradeRecord>, StoreError>;
}

/// Open the backend selected by configuration.
///
/// The account row is created with `starting_balance` only if it does not exist yet.
pub async fn open(
    config: &StoreConfig,
    account_name: &str,
    starting_balance: i64,
) -> Result<Arc<dyn LedgerStore>, StoreError> {
    match config {
        StoreConfig::Memory => {
            tracing::info!(starting_balance, "opening in-memory ledger");
            Ok(Arc::new(MemoryStore::new(starting_balance)))
        }
        StoreConfig::Sqlite { path } => {
            tracing::info!(path = %path.display(), "opening sqlite ledger");
            let store = SqliteStore::open(path, account_name, starting_balance).await?;
            Ok(Arc::new(store))
        }
    }
}
