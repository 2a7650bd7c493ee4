//! Order engine.

use super::normalize_ticker;
use super::plan::{plan_buy, plan_sell, Fill};
use crate::clock::{Clock, SystemClock};
use crate::market::{MarketData, Quote};
use crate::store::{AccountView, LedgerStore, StoreError};
use crate::types::{format_amount, Order, OrderReceipt, TradeSide};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::Instrument;

/// How often an order is re-validated after another writer changed the
/// account between read and commit.
const MAX_COMMIT_ATTEMPTS: u32 = 5;

/// Default bound on a single quote lookup.
pub const DEFAULT_QUOTE_TIMEOUT: Duration = Duration::from_secs(5);

/// Executes buys and sells against a [`LedgerStore`].
///
/// Orders from one engine are serialized by an internal lock that spans the
/// account read, the computation and the commit. Other engines on the same
/// ledger are caught by the store's basis check, and the order is re-validated
/// at the same price. The quote is fetched before the lock is taken, so a slow
/// provider never blocks other orders.
#[derive(Debug)]
pub struct OrderEngine {
    store: Arc<dyn LedgerStore>,
    market: Arc<dyn MarketData>,
    clock: Arc<dyn Clock>,
    quote_timeout: Duration,
    order_lock: Mutex<()>,
}

impl OrderEngine {
    pub fn new(store: Arc<dyn LedgerStore>, market: Arc<dyn MarketData>) -> Self {
        Self {
            store,
            market,
            clock: Arc::new(SystemClock),
            quote_timeout: DEFAULT_QUOTE_TIMEOUT,
            order_lock: Mutex::new(()),
        }
    }

    /// Use a different time source for trade timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Bound quote lookups by `timeout` instead of the default.
    pub fn with_quote_timeout(mut self, timeout: Duration) -> Self {
        self.quote_timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Buy `qty` shares of `ticker` at the current market price.
    pub async fn buy(&self, ticker: &str, qty: i64) -> Result<OrderReceipt> {
        self.execute(Order::buy(ticker, qty)).await
    }

    /// Sell `qty` shares of `ticker` at the current market price.
    pub async fn sell(&self, ticker: &str, qty: i64) -> Result<OrderReceipt> {
        self.execute(Order::sell(ticker, qty)).await
    }

    /// Validate, price and commit one order. On error nothing is written.
    pub async fn execute(&self, order: Order) -> Result<OrderReceipt> {
        let span = tracing::info_span!(
            "order",
            side = %order.side,
            ticker = %order.ticker,
            qty = order.qty
        );

        async move {
            let result = self.run(&order).await;
            if let Err(e) = &result {
                tracing::warn!(error = %e, "order rejected");
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Latest quote for `ticker`, under the same timeout orders use.
    pub async fn quote(&self, ticker: &str) -> Result<Quote> {
        let ticker = normalize_ticker(ticker)?;
        self.resolve_quote(&ticker).await
    }

    async fn run(&self, order: &Order) -> Result<OrderReceipt> {
        let ticker = normalize_ticker(&order.ticker)?;
        if order.qty <= 0 {
            return Err(Error::InvalidQuantity(order.qty));
        }

        if order.side == TradeSide::Sell {
            let view = self.store.read(&ticker).await?;
            check_holdings(&ticker, &view, order.qty)?;
        }

        let quote = self.resolve_quote(&ticker).await?;

        let guard = self.order_lock.lock().await;
        let mut attempt = 1;
        let (trade, available_cash) = loop {
            let view = self.store.read(&ticker).await?;
            let fill = Fill {
                name: resolve_name(&quote, &view),
                ticker: ticker.clone(),
                qty: order.qty,
                price: quote.price,
                executed_at: self.clock.now(),
            };

            let commit = match order.side {
                TradeSide::Buy => plan_buy(&view, fill)?,
                TradeSide::Sell => plan_sell(&view, fill)?,
            };
            let available_cash = commit.cash_balance;

            match self.store.commit(commit).await {
                Ok(trade) => break (trade, available_cash),
                Err(StoreError::Conflict(reason)) if attempt < MAX_COMMIT_ATTEMPTS => {
                    tracing::debug!(attempt, %reason, "ledger changed underneath order, re-validating");
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        };
        drop(guard);

        let verb = match trade.side {
            TradeSide::Buy => "Bought",
            TradeSide::Sell => "Sold",
        };
        let message = format!(
            "{verb} {} shares of {} ({}) at market price {}",
            trade.qty,
            trade.name,
            trade.ticker,
            format_amount(trade.price)
        );

        tracing::info!(
            id = trade.id,
            price = trade.price,
            avg_price = trade.avg_price,
            available_cash,
            "order committed"
        );

        Ok(OrderReceipt {
            message,
            available_cash,
            trade,
        })
    }

    async fn resolve_quote(&self, ticker: &str) -> Result<Quote> {
        let unavailable = |reason: String| Error::MarketDataUnavailable {
            ticker: ticker.to_string(),
            reason,
        };

        let quote = match tokio::time::timeout(self.quote_timeout, self.market.quote(ticker)).await {
            Ok(Ok(quote)) => quote,
            Ok(Err(e)) => return Err(unavailable(e.to_string())),
            Err(_) => {
                tracing::warn!(ticker, timeout = ?self.quote_timeout, "quote lookup timed out");
                return Err(unavailable(format!(
                    "quote lookup timed out after {:?}",
                    self.quote_timeout
                )));
            }
        };

        if quote.price <= 0 {
            return Err(unavailable(format!("non-positive price {}", quote.price)));
        }
        Ok(quote)
    }
}

fn check_holdings(ticker: &str, view: &AccountView, requested: i64) -> Result<()> {
    let held = view.holding.as_ref().map_or(0, |h| h.qty);
    if held < requested {
        return Err(Error::InsufficientHoldings {
            ticker: ticker.to_string(),
            held,
            requested,
        });
    }
    Ok(())
}

/// Quote name, else the stored holding's name, else the ticker.
fn resolve_name(quote: &Quote, view: &AccountView) -> String {
    match (quote.resolved_name(), &view.holding) {
        (Some(name), _) => name.to_string(),
        (None, Some(holding)) => holding.name.clone(),
        (None, None) => quote.ticker.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::market::{MarketDataError, StaticQuotes};
    use crate::store::MemoryStore;
    use crate::types::DateRange;
    use async_trait::async_trait;
    use chrono::{NaiveDate, NaiveDateTime, TimeDelta};

    fn start_time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 7, 28)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        quotes: Arc<StaticQuotes>,
        clock: Arc<ManualClock>,
        engine: OrderEngine,
    }

    fn fixture(cash: i64) -> Fixture {
        let store = Arc::new(MemoryStore::new(cash));
        let quotes = Arc::new(StaticQuotes::new().with_quote("X", "Example Corp", 1_000));
        let clock = Arc::new(ManualClock::new(start_time()));
        let engine = OrderEngine::new(store.clone(), quotes.clone()).with_clock(clock.clone());
        Fixture {
            store,
            quotes,
            clock,
            engine,
        }
    }

    #[derive(Debug)]
    struct SlowQuotes(Duration);

    #[async_trait]
    impl MarketData for SlowQuotes {
        async fn quote(&self, ticker: &str) -> std::result::Result<Quote, MarketDataError> {
            tokio::time::sleep(self.0).await;
            Err(MarketDataError::Provider(format!("{ticker} never arrives")))
        }
    }

    #[tokio::test]
    async fn test_buy_then_sell_round_trip() {
        let f = fixture(10_000_000);

        let receipt = f.engine.buy("X", 10).await.unwrap();
        assert_eq!(receipt.available_cash, 9_990_000);
        assert_eq!(
            receipt.message,
            "Bought 10 shares of Example Corp (X) at market price 1,000"
        );

        f.quotes.set_price("X", 1_200);
        f.clock.advance(TimeDelta::minutes(1));
        let receipt = f.engine.sell("X", 4).await.unwrap();
        assert_eq!(receipt.available_cash, 9_994_800);
        assert_eq!(receipt.trade.avg_price, 1_000);

        let balance = f.store.balance().await.unwrap();
        let holding = balance.holding("X").unwrap();
        assert_eq!((holding.qty, holding.avg_price), (6, 1_000));

        f.quotes.set_price("X", 900);
        f.clock.advance(TimeDelta::minutes(1));
        let receipt = f.engine.sell("X", 6).await.unwrap();
        assert_eq!(receipt.available_cash, 10_000_200);
        assert_eq!(
            receipt.message,
            "Sold 6 shares of Example Corp (X) at market price 900"
        );

        let balance = f.store.balance().await.unwrap();
        assert_eq!(balance.available_cash, 10_000_200);
        assert!(balance.holding("X").is_none());

        let trades = f.store.trades(DateRange::all()).await.unwrap();
        assert_eq!(trades.len(), 3);
        assert_eq!(trades[0].price, 900);
        assert_eq!(trades[0].executed_at, start_time() + TimeDelta::minutes(2));
        assert_eq!(trades[2].side, TradeSide::Buy);
    }

    #[tokio::test]
    async fn test_insufficient_funds_changes_nothing() {
        let f = fixture(9_999);

        let err = f.engine.buy("X", 10).await.unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientFunds {
                required: 10_000,
                available: 9_999
            }
        ));
        assert_eq!(f.store.balance().await.unwrap().available_cash, 9_999);
        assert_eq!(f.store.trade_count().await, 0);
    }

    #[tokio::test]
    async fn test_oversell_changes_nothing() {
        let f = fixture(10_000_000);
        f.engine.buy("X", 6).await.unwrap();

        let err = f.engine.sell("X", 10).await.unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientHoldings {
                held: 6,
                requested: 10,
                ..
            }
        ));

        let balance = f.store.balance().await.unwrap();
        assert_eq!(balance.available_cash, 9_994_000);
        assert_eq!(balance.holding("X").unwrap().qty, 6);
        assert_eq!(f.store.trade_count().await, 1);
    }

    #[tokio::test]
    async fn test_holdings_checked_before_price() {
        let f = fixture(10_000_000);
        let err = f.engine.sell("UNLISTED", 1).await.unwrap_err();
        assert!(matches!(err, Error::InsufficientHoldings { held: 0, .. }));
    }

    #[tokio::test]
    async fn test_rejects_bad_requests() {
        let f = fixture(10_000_000);

        let err = f.engine.buy("X", 0).await.unwrap_err();
        assert!(matches!(err, Error::InvalidQuantity(0)));
        assert!(err.is_validation());

        let err = f.engine.sell("X", -3).await.unwrap_err();
        assert!(matches!(err, Error::InvalidQuantity(-3)));

        let err = f.engine.buy("  ", 1).await.unwrap_err();
        assert!(matches!(err, Error::EmptyTicker));

        let err = f.engine.buy("X", i64::MAX).await.unwrap_err();
        assert!(matches!(err, Error::Overflow { .. }));
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_unknown_ticker() {
        let f = fixture(10_000_000);
        let err = f.engine.buy("NOPE", 1).await.unwrap_err();
        assert!(matches!(err, Error::MarketDataUnavailable { ref ticker, .. } if ticker == "NOPE"));
    }

    #[tokio::test]
    async fn test_non_positive_price_is_unavailable() {
        let f = fixture(10_000_000);
        f.quotes.set_price("X", 0);
        let err = f.engine.buy("X", 1).await.unwrap_err();
        assert!(matches!(err, Error::MarketDataUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_quote_timeout() {
        let store = Arc::new(MemoryStore::new(10_000_000));
        let engine = OrderEngine::new(store.clone(), Arc::new(SlowQuotes(Duration::from_secs(5))))
            .with_quote_timeout(Duration::from_millis(20));

        let err = engine.buy("X", 1).await.unwrap_err();
        match err {
            Error::MarketDataUnavailable { reason, .. } => assert!(reason.contains("timed out")),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.trade_count().await, 0);
    }

    #[tokio::test]
    async fn test_ticker_is_normalized() {
        let f = fixture(10_000_000);
        let receipt = f.engine.buy(" x ", 1).await.unwrap();
        assert_eq!(receipt.trade.ticker, "X");
        assert!(f.store.balance().await.unwrap().portfolio.contains_key("X"));
    }

    #[tokio::test]
    async fn test_name_falls_back_to_holding_then_ticker() {
        let f = fixture(10_000_000);
        f.engine.buy("X", 2).await.unwrap();

        f.quotes.insert("X", None, 1_000);
        let receipt = f.engine.sell("X", 1).await.unwrap();
        assert_eq!(receipt.trade.name, "Example Corp");

        f.quotes.insert("Y", None, 500);
        let receipt = f.engine.buy("Y", 1).await.unwrap();
        assert_eq!(receipt.trade.name, "Y");
    }

    #[tokio::test]
    async fn test_average_rounds_half_up() {
        let f = fixture(10_000);
        f.quotes.set_price("X", 1);
        f.engine.buy("X", 1).await.unwrap();
        f.quotes.set_price("X", 2);
        let receipt = f.engine.buy("X", 1).await.unwrap();

        assert_eq!(receipt.trade.avg_price, 2);
        assert_eq!(f.store.balance().await.unwrap().holding("X").unwrap().avg_price, 2);
    }

    #[tokio::test]
    async fn test_quote_passthrough() {
        let f = fixture(10_000_000);
        let quote = f.engine.quote("x").await.unwrap();
        assert_eq!(quote.ticker, "X");
        assert_eq!(quote.price, 1_000);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_buys_debit_once() {
        let store = Arc::new(MemoryStore::new(5_000));
        let quotes = Arc::new(StaticQuotes::new().with_quote("A", "Alpha", 1_000));
        let engine = Arc::new(OrderEngine::new(store.clone(), quotes));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.buy("A", 5).await })
            })
            .collect();

        let mut ok = 0;
        let mut short = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(Error::InsufficientFunds { .. }) => short += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!((ok, short), (1, 1));
        let balance = store.balance().await.unwrap();
        assert_eq!(balance.available_cash, 0);
        assert_eq!(balance.holding("A").unwrap().qty, 5);
        assert_eq!(store.trade_count().await, 1);
    }

    /// Shared ledger whose reads stall, so both orders see the same state.
    #[derive(Debug)]
    struct SlowReads(Arc<MemoryStore>);

    #[async_trait]
    impl LedgerStore for SlowReads {
        async fn read(&self, ticker: &str) -> std::result::Result<AccountView, StoreError> {
            let view = self.0.read(ticker).await?;
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(view)
        }

        async fn commit(
            &self,
            commit: crate::store::LedgerCommit,
        ) -> std::result::Result<crate::types::TradeRecord, StoreError> {
            self.0.commit(commit).await
        }

        async fn balance(&self) -> std::result::Result<crate::types::BalanceSnapshot, StoreError> {
            self.0.balance().await
        }

        async fn trades(
            &self,
            range: DateRange,
        ) -> std::result::Result<Vec<crate::types::TradeRecord>, StoreError> {
            self.0.trades(range).await
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_two_engines_on_one_ledger_debit_once() {
        let store = Arc::new(MemoryStore::new(5_000));
        let quotes = Arc::new(StaticQuotes::new().with_quote("A", "Alpha", 1_000));
        let first = Arc::new(OrderEngine::new(
            Arc::new(SlowReads(store.clone())),
            quotes.clone(),
        ));
        let second = Arc::new(OrderEngine::new(Arc::new(SlowReads(store.clone())), quotes));

        let a = tokio::spawn(async move { first.buy("A", 5).await });
        let b = tokio::spawn(async move { second.buy("A", 5).await });
        let results = [a.await.unwrap(), b.await.unwrap()];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(Error::InsufficientFunds { .. }))));

        let balance = store.balance().await.unwrap();
        assert_eq!(balance.available_cash, 0);
        assert_eq!(balance.holding("A").unwrap().qty, 5);
        assert_eq!(store.trade_count().await, 1);
    }
}
