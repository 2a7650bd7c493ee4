//! Ephemeral ledger kept behind a single read/write lock.

use super::{AccountView, HoldingChange, LedgerCommit, LedgerStore, StoreError};
use crate::types::{BalanceSnapshot, DateRange, Holding, TradeRecord};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

#[derive(Debug)]
struct LedgerState {
    cash_balance: i64,
    holdings: BTreeMap<String, Holding>,
    trades: Vec<TradeRecord>,
}

/// In-memory ledger. State is lost when the process exits.
///
/// Commits apply under the write lock, so readers see either the state before
/// an order or the state after it. The basis check runs under the same lock,
/// which makes the store safe to share between engines.
#[derive(Debug)]
pub struct MemoryStore {
    state: RwLock<LedgerState>,
}

impl MemoryStore {
    /// Create a ledger whose account starts with `starting_balance` in cash.
    pub fn new(starting_balance: i64) -> Self {
        Self {
            state: RwLock::new(LedgerState {
                cash_balance: starting_balance,
                holdings: BTreeMap::new(),
                trades: Vec::new(),
            }),
        }
    }

    /// Number of trades recorded so far.
    pub async fn trade_count(&self) -> usize {
        self.state.read().await.trades.len()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn read(&self, ticker: &str) -> Result<AccountView, StoreError> {
        let state = self.state.read().await;
        Ok(AccountView {
            cash_balance: state.cash_balance,
            holding: state.holdings.get(ticker).cloned(),
        })
    }

    async fn commit(&self, commit: LedgerCommit) -> Result<TradeRecord, StoreError> {
        commit.check()?;

        let mut state = self.state.write().await;
        let position = state
            .holdings
            .get(&commit.trade.ticker)
            .map(|h| (h.qty, h.avg_price));
        commit.ensure_basis(state.cash_balance, position)?;

        let LedgerCommit {
            cash_balance,
            holding,
            mut trade,
            ..
        } = commit;

        if let Some(last) = state.trades.last() {
            if trade.executed_at < last.executed_at {
                trade.executed_at = last.executed_at;
            }
        }

        let id = i64::try_from(state.trades.len() + 1)
            .map_err(|_| StoreError::Rejected("trade history is full".to_string()))?;
        let record = TradeRecord::from_new(id, trade);

        state.cash_balance = cash_balance;
        match holding {
            HoldingChange::Upsert(h) => {
                state.holdings.insert(h.ticker.clone(), h);
            }
            HoldingChange::Remove(ticker) => {
                state.holdings.remove(&ticker);
            }
        }
        state.trades.push(record.clone());

        tracing::debug!(id, cash_balance, "memory ledger commit applied");
        Ok(record)
    }

    async fn balance(&self) -> Result<BalanceSnapshot, StoreError> {
        let state = self.state.read().await;
        Ok(BalanceSnapshot::new(
            state.cash_balance,
            state.holdings.values(),
        ))
    }

    async fn trades(&self, range: DateRange) -> Result<Vec<TradeRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .trades
            .iter()
            .rev()
            .filter(|t| range.contains(t.date()))
            .cloned()
            .collect())
    }
}
