//! Read-only projections of the ledger.

use crate::store::LedgerStore;
use crate::types::{BalanceSnapshot, DateRange, TradeRecord};
use crate::Result;
use chrono::NaiveDate;
use std::sync::Arc;

/// Balance and trade history queries. Never blocks order execution.
#[derive(Debug, Clone)]
pub struct QueryService {
    store: Arc<dyn LedgerStore>,
}

impl QueryService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Cash balance and every open holding, from one committed state.
    pub async fn balance(&self) -> Result<BalanceSnapshot> {
        Ok(self.store.balance().await?)
    }

    /// Trades dated within `[start, end]`, most recent first.
    ///
    /// Either bound may be omitted. A start after the end is rejected.
    pub async fn trade_history(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<TradeRecord>> {
        let range = DateRange::new(start, end)?;
        let trades = self.store.trades(range).await?;
        tracing::debug!(?start, ?end, count = trades.len(), "trade history query");
        Ok(trades)
    }
}
