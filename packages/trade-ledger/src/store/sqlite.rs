//! Durable ledger on SQLite.

use super::{AccountView, HoldingChange, LedgerCommit, LedgerStore, StoreError, ACCOUNT_ID};
use crate::types::{
    BalanceSnapshot, DateRange, Holding, TradeRecord, TradeSide, DATETIME_FORMAT, DATE_FORMAT,
};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use std::fs;
use std::path::Path;
use std::time::Duration;

type HoldingRow = (String, Option<String>, i64, i64);
type TradeRow = (i64, String, String, Option<String>, i64, i64, Option<i64>, String);

/// SQLite-backed ledger. Each commit is one database transaction.
///
/// Several handles (or processes) may open the same file. Commits take the
/// database write lock before checking their basis, and a stale basis fails
/// with [`StoreError::Conflict`] instead of overwriting.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `path`, apply migrations and make sure
    /// the account row exists.
    pub async fn open(
        path: &Path,
        account_name: &str,
        starting_balance: i64,
    ) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        store.ensure_account(account_name, starting_balance).await?;
        Ok(store)
    }

    /// Apply the embedded schema migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close all pooled connections.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn ensure_account(&self, account_name: &str, starting_balance: i64) -> Result<(), StoreError> {
        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO accounts (account_id, account_name, cash_balance) VALUES (?1, ?2, ?3)",
        )
        .bind(ACCOUNT_ID)
        .bind(account_name)
        .bind(starting_balance)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted > 0 {
            tracing::info!(account_name, starting_balance, "created ledger account");
        }
        Ok(())
    }
}

fn parse_datetime(raw: &str) -> Result<NaiveDateTime, StoreError> {
    NaiveDateTime::parse_from_str(raw, DATETIME_FORMAT)
        .map_err(|e| StoreError::Corrupt(format!("bad trade_datetime {raw:?}: {e}")))
}

async fn read_position(
    tx: &mut Transaction<'_, Sqlite>,
    ticker: &str,
) -> Result<Option<(i64, i64)>, StoreError> {
    let position = sqlx::query_as::<_, (i64, i64)>(
        "SELECT qty, avg_price FROM portfolio WHERE account_id = ?1 AND ticker = ?2",
    )
    .bind(ACCOUNT_ID)
    .bind(ticker)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(position)
}

fn holding_from_row((ticker, name, qty, avg_price): HoldingRow) -> Holding {
    let name = name.unwrap_or_else(|| ticker.clone());
    Holding {
        ticker,
        name,
        qty,
        avg_price,
    }
}

fn trade_from_row(row: TradeRow) -> Result<TradeRecord, StoreError> {
    let (id, trade_type, ticker, name, qty, price, avg_price, trade_datetime) = row;
    let side = trade_type.parse::<TradeSide>().map_err(StoreError::Corrupt)?;
    let avg_price = avg_price
        .ok_or_else(|| StoreError::Corrupt(format!("trade {id} has no avg_price")))?;

    Ok(TradeRecord {
        id,
        side,
        name: name.unwrap_or_else(|| ticker.clone()),
        ticker,
        qty,
        price,
        avg_price,
        executed_at: parse_datetime(&trade_datetime)?,
    })
}

#[async_trait]
impl LedgerStore for SqliteStore {
    async fn read(&self, ticker: &str) -> Result<AccountView, StoreError> {
        let mut tx = self.pool.begin().await?;

        let cash_balance: i64 =
            sqlx::query_scalar("SELECT cash_balance FROM accounts WHERE account_id = ?1")
                .bind(ACCOUNT_ID)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| StoreError::Corrupt("account row is missing".to_string()))?;

        let holding = sqlx::query_as::<_, HoldingRow>(
            "SELECT ticker, name, qty, avg_price FROM portfolio WHERE account_id = ?1 AND ticker = ?2",
        )
        .bind(ACCOUNT_ID)
        .bind(ticker)
        .fetch_optional(&mut *tx)
        .await?
        .map(holding_from_row);

        tx.commit().await?;
        tracing::debug!(ticker, cash_balance, held = holding.is_some(), "sqlite ledger read");
        Ok(AccountView {
            cash_balance,
            holding,
        })
    }

    async fn commit(&self, commit: LedgerCommit) -> Result<TradeRecord, StoreError> {
        commit.check()?;

        // IMMEDIATE takes the write lock up front, so the basis check below
        // and the writes after it see no other writer in between. Dropping
        // `tx` on any early return rolls everything back.
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        let current: i64 =
            sqlx::query_scalar("SELECT cash_balance FROM accounts WHERE account_id = ?1")
                .bind(ACCOUNT_ID)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| StoreError::Corrupt("account row is missing".to_string()))?;
        let position = read_position(&mut tx, &commit.trade.ticker).await?;
        commit.ensure_basis(current, position)?;

        let LedgerCommit {
            cash_balance,
            holding,
            mut trade,
            ..
        } = commit;

        sqlx::query(
            "UPDATE accounts SET cash_balance = ?1, updated_at = CURRENT_TIMESTAMP WHERE account_id = ?2",
        )
        .bind(cash_balance)
        .bind(ACCOUNT_ID)
        .execute(&mut *tx)
        .await?;

        match &holding {
            HoldingChange::Upsert(h) => {
                sqlx::query(
                    r#"
                    INSERT INTO portfolio (account_id, ticker, name, qty, avg_price)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    ON CONFLICT (account_id, ticker) DO UPDATE SET
                        name = excluded.name,
                        qty = excluded.qty,
                        avg_price = excluded.avg_price,
                        updated_at = CURRENT_TIMESTAMP
                    "#,
                )
                .bind(ACCOUNT_ID)
                .bind(&h.ticker)
                .bind(&h.name)
                .bind(h.qty)
                .bind(h.avg_price)
                .execute(&mut *tx)
                .await?;
            }
            HoldingChange::Remove(ticker) => {
                sqlx::query("DELETE FROM portfolio WHERE account_id = ?1 AND ticker = ?2")
                    .bind(ACCOUNT_ID)
                    .bind(ticker)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        let last: Option<String> = sqlx::query_scalar(
            "SELECT CAST(MAX(trade_datetime) AS TEXT) FROM trade_history WHERE account_id = ?1",
        )
        .bind(ACCOUNT_ID)
        .fetch_one(&mut *tx)
        .await?;
        if let Some(last) = last.as_deref().map(parse_datetime).transpose()? {
            if trade.executed_at < last {
                trade.executed_at = last;
            }
        }

        let id = sqlx::query(
            r#"
            INSERT INTO trade_history
                (account_id, trade_type, ticker, name, qty, price, avg_price, trade_datetime)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(ACCOUNT_ID)
        .bind(trade.side.as_str())
        .bind(&trade.ticker)
        .bind(&trade.name)
        .bind(trade.qty)
        .bind(trade.price)
        .bind(trade.avg_price)
        .bind(trade.executed_at.format(DATETIME_FORMAT).to_string())
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        tx.commit().await?;
        tracing::debug!(id, cash_balance, "sqlite ledger commit applied");
        Ok(TradeRecord::from_new(id, trade))
    }

    async fn balance(&self) -> Result<BalanceSnapshot, StoreError> {
        let mut tx = self.pool.begin().await?;

        let cash_balance: i64 =
            sqlx::query_scalar("SELECT cash_balance FROM accounts WHERE account_id = ?1")
                .bind(ACCOUNT_ID)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| StoreError::Corrupt("account row is missing".to_string()))?;

        let holdings: Vec<Holding> = sqlx::query_as::<_, HoldingRow>(
            "SELECT ticker, name, qty, avg_price FROM portfolio WHERE account_id = ?1 ORDER BY ticker",
        )
        .bind(ACCOUNT_ID)
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .map(holding_from_row)
        .collect();

        tx.commit().await?;
        Ok(BalanceSnapshot::new(cash_balance, holdings.iter()))
    }

    async fn trades(&self, range: DateRange) -> Result<Vec<TradeRecord>, StoreError> {
        let start = range.start().map(|d| d.format(DATE_FORMAT).to_string());
        let end = range.end().map(|d| d.format(DATE_FORMAT).to_string());

        let rows = sqlx::query_as::<_, TradeRow>(
            r#"
            SELECT id, trade_type, ticker, name, qty, price, avg_price,
                   CAST(trade_datetime AS TEXT)
            FROM trade_history
            WHERE account_id = ?1
              AND (?2 IS NULL OR date(trade_datetime) >= ?2)
              AND (?3 IS NULL OR date(trade_datetime) <= ?3)
            ORDER BY id DESC
            "#,
        )
        .bind(ACCOUNT_ID)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(trade_from_row).collect()
    }
}
