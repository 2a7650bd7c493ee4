//! One-stop handle wiring configuration, store, engine and queries.

use crate::config::LedgerConfig;
use crate::market::{MarketData, Quote};
use crate::order::OrderEngine;
use crate::query::QueryService;
use crate::store::{self, LedgerStore};
use crate::types::{BalanceSnapshot, OrderReceipt, TradeRecord};
use crate::Result;
use chrono::NaiveDate;
use std::sync::Arc;

/// An opened ledger: the order engine and query service over one store.
#[derive(Debug)]
pub struct Ledger {
    config: LedgerConfig,
    engine: OrderEngine,
    queries: QueryService,
}

impl Ledger {
    /// Open the configured store (creating the account if needed).
    pub async fn open(config: LedgerConfig, market: Arc<dyn MarketData>) -> Result<Self> {
        config.validate()?;
        let store = store::open(&config.store, &config.account_name, config.starting_balance).await?;
        Ok(Self::with_store(config, store, market))
    }

    /// Build a ledger over an already opened store.
    pub fn with_store(
        config: LedgerConfig,
        store: Arc<dyn LedgerStore>,
        market: Arc<dyn MarketData>,
    ) -> Self {
        let engine =
            OrderEngine::new(store.clone(), market).with_quote_timeout(config.quote_timeout());
        let queries = QueryService::new(store);
        Self {
            config,
            engine,
            queries,
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn engine(&self) -> &OrderEngine {
        &self.engine
    }

    pub fn queries(&self) -> &QueryService {
        &self.queries
    }

    pub async fn buy(&self, ticker: &str, qty: i64) -> Result<OrderReceipt> {
        self.engine.buy(ticker, qty).await
    }

    pub async fn sell(&self, ticker: &str, qty: i64) -> Result<OrderReceipt> {
        self.engine.sell(ticker, qty).await
    }

    /// Balance snapshot, gated by the configured account password.
    pub async fn balance(&self, password: Option<&str>) -> Result<BalanceSnapshot> {
        self.config.authorize(password)?;
        self.queries.balance().await
    }

    pub async fn trade_history(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<TradeRecord>> {
        self.queries.trade_history(start, end).await
    }

    pub async fn quote(&self, ticker: &str) -> Result<Quote> {
        self.engine.quote(ticker).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::market::StaticQuotes;
    use crate::Error;

    fn quotes() -> Arc<StaticQuotes> {
        Arc::new(StaticQuotes::new().with_quote("005930", "Samsung Electronics", 71_000))
    }

    #[tokio::test]
    async fn test_memory_ledger() {
        let config = LedgerConfig {
            store: StoreConfig::Memory,
            starting_balance: 1_000_000,
            ..LedgerConfig::default()
        };
        let ledger = Ledger::open(config, quotes()).await.unwrap();

        let receipt = ledger.buy("005930", 10).await.unwrap();
        assert_eq!(receipt.available_cash, 290_000);

        let balance = ledger.balance(None).await.unwrap();
        assert_eq!(balance.portfolio["005930"].qty, 10);
        assert_eq!(ledger.trade_history(None, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_balance_requires_password() {
        let config = LedgerConfig {
            store: StoreConfig::Memory,
            account_password: Some("0000".to_string()),
            ..LedgerConfig::default()
        };
        let ledger = Ledger::open(config, quotes()).await.unwrap();

        assert!(matches!(ledger.balance(Some("9999")).await, Err(Error::Unauthorized)));
        assert!(ledger.balance(Some("0000")).await.is_ok());
    }

    #[tokio::test]
    async fn test_sqlite_ledger_persists() {
        let dir = tempfile::tempdir().unwrap();
        let config = LedgerConfig {
            store: StoreConfig::Sqlite {
                path: dir.path().join("nested").join("ledger.db"),
            },
            ..LedgerConfig::default()
        };

        {
            let ledger = Ledger::open(config.clone(), quotes()).await.unwrap();
            ledger.buy("005930", 3).await.unwrap();
        }

        let reopened = Ledger::open(config, quotes()).await.unwrap();
        let balance = reopened.balance(None).await.unwrap();
        assert_eq!(balance.available_cash, 10_000_000 - 213_000);
        assert_eq!(balance.portfolio["005930"].avg_price, 71_000);
    }

    #[tokio::test]
    async fn test_open_rejects_invalid_config() {
        let config = LedgerConfig {
            store: StoreConfig::Memory,
            quote_timeout_ms: 0,
            ..LedgerConfig::default()
        };
        assert!(matches!(
            Ledger::open(config, quotes()).await,
            Err(Error::Config(_))
        ));
    }
}
