//! Pure order planning: account state + fill in, ledger commit out.

use super::cost_basis::{order_value, weighted_average};
use crate::store::{AccountView, HoldingChange, LedgerCommit};
use crate::types::{Holding, NewTrade, TradeSide};
use crate::{Error, Result};
use chrono::NaiveDateTime;

/// A priced execution of an order, before it is checked against the account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fill {
    pub ticker: String,
    pub name: String,
    pub qty: i64,
    pub price: i64,
    pub executed_at: NaiveDateTime,
}

/// Debit cash and grow (or open) the holding.
pub fn plan_buy(view: &AccountView, fill: Fill) -> Result<LedgerCommit> {
    let cost = order_value(fill.qty, fill.price)?;
    if cost > view.cash_balance {
        return Err(Error::InsufficientFunds {
            required: cost,
            available: view.cash_balance,
        });
    }

    let (held_qty, held_avg) = view
        .holding
        .as_ref()
        .map_or((0, 0), |h| (h.qty, h.avg_price));
    let qty = held_qty.checked_add(fill.qty).ok_or(Error::Overflow {
        qty: fill.qty,
        price: fill.price,
    })?;
    let avg_price = weighted_average(held_qty, held_avg, fill.qty, fill.price)?;

    Ok(LedgerCommit {
        basis: view.clone(),
        cash_balance: view.cash_balance - cost,
        holding: HoldingChange::Upsert(Holding::new(&fill.ticker, &fill.name, qty, avg_price)),
        trade: NewTrade {
            side: TradeSide::Buy,
            ticker: fill.ticker,
            name: fill.name,
            qty: fill.qty,
            price: fill.price,
            avg_price,
            executed_at: fill.executed_at,
        },
    })
}

/// Credit cash and shrink (or close) the holding. The average cost is untouched.
pub fn plan_sell(view: &AccountView, fill: Fill) -> Result<LedgerCommit> {
    let holding = match &view.holding {
        Some(h) if h.qty >= fill.qty => h,
        other => {
            return Err(Error::InsufficientHoldings {
                ticker: fill.ticker,
                held: other.as_ref().map_or(0, |h| h.qty),
                requested: fill.qty,
            })
        }
    };

    let overflow = || Error::Overflow {
        qty: fill.qty,
        price: fill.price,
    };
    let revenue = order_value(fill.qty, fill.price)?;
    let cash_balance = view.cash_balance.checked_add(revenue).ok_or_else(overflow)?;

    let remaining = holding.qty - fill.qty;
    let change = if remaining == 0 {
        HoldingChange::Remove(holding.ticker.clone())
    } else {
        HoldingChange::Upsert(Holding {
            qty: remaining,
            ..holding.clone()
        })
    };

    Ok(LedgerCommit {
        basis: view.clone(),
        cash_balance,
        holding: change,
        trade: NewTrade {
            side: TradeSide::Sell,
            ticker: fill.ticker,
            name: fill.name,
            qty: fill.qty,
            price: fill.price,
            avg_price: holding.avg_price,
            executed_at: fill.executed_at,
        },
    })
}
