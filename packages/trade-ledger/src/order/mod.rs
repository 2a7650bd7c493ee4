//! Order execution.
//!
//! [`OrderEngine`] resolves a price, then runs the read-compute-commit
//! sequence for one order at a time. The arithmetic lives in [`plan`] and
//! [`cost_basis`] and has no I/O.

pub mod cost_basis;
mod engine;
pub mod plan;

pub use engine::OrderEngine;

use crate::{Error, Result};

/// Trim and uppercase a ticker, rejecting blanks.
pub fn normalize_ticker(raw: &str) -> Result<String> {
    let ticker = raw.trim();
    if ticker.is_empty() {
        return Err(Error::EmptyTicker);
    }
    Ok(ticker.to_uppercase())
}
