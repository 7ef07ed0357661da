//! SQLite-backed Position Store
//!
//! Tables: tokens, locks, trades, trade_history, rpc_endpoints.
//! Token and wei amounts overflow i64, so they are stored as decimal TEXT
//! and parsed back into U256.
//!
//! Positions are keyed by (network, token address). Every write goes
//! through a single writer connection, so read-modify-write transactions
//! queue on the pool instead of failing with `database is locked`; reads
//! use their own WAL pool.
//!
//! Author: AI-Generated
//! Created: 2026-10-16

use super::{EndpointOutcome, HistoryEntry, PositionStore};
use crate::types::{
    ExitFill, FillOutcome, LockShare, NewPosition, Position, PositionStatus, Token,
};
use alloy::primitives::{Address, U256};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Lowercase 0x-hex, the canonical key form for addresses in every table
fn addr_key(address: Address) -> String {
    format!("{:#x}", address)
}

fn parse_u256(raw: &str) -> Result<U256> {
    U256::from_str(raw).map_err(|e| anyhow!("bad amount '{}': {}", raw, e))
}

/// SQLite position store
#[derive(Clone)]
pub struct SqliteStore {
    /// Reads
    pool: SqlitePool,
    /// One connection; every write and read-modify-write runs here
    writer: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a database file, e.g. `sqlite://sniper.db`
    pub async fn open(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(path)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options.clone())
            .await
            .context("Failed to connect to database")?;

        // Schema first, so readers never see a half-built database
        let store = Self { pool: writer.clone(), writer };
        store.initialize().await?;

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        info!("Position store ready: {}", path);
        Ok(Self { pool, writer: store.writer })
    }

    /// Private in-memory database (single connection, lives as long as the store)
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("Failed to open in-memory database")?;

        let store = Self { writer: pool.clone(), pool };
        store.initialize().await?;
        Ok(store)
    }

    /// Add columns that older databases are missing
    async fn run_migrations(&self) -> Result<()> {
        let table_info: Vec<(i64, String, String, i64, Option<String>, i64)> =
            sqlx::query_as("PRAGMA table_info(rpc_endpoints)")
                .fetch_all(&self.writer)
                .await
                .unwrap_or_default();

        if table_info.is_empty() {
            return Ok(());
        }

        let columns = [
            ("is_active", "INTEGER NOT NULL DEFAULT 1"),
            ("last_success", "TEXT"),
            ("last_check", "TEXT"),
            ("last_error", "TEXT"),
            ("success_count", "INTEGER NOT NULL DEFAULT 0"),
            ("error_count", "INTEGER NOT NULL DEFAULT 0"),
        ];
        for (name, ddl) in columns {
            if !table_info.iter().any(|(_, col, _, _, _, _)| col == name) {
                info!("Migrating rpc_endpoints table: adding {} column", name);
                sqlx::query(&format!("ALTER TABLE rpc_endpoints ADD COLUMN {} {}", name, ddl))
                    .execute(&self.writer)
                    .await?;
            }
        }
        Ok(())
    }

    async fn initialize(&self) -> Result<()> {
        self.run_migrations().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tokens (
                address TEXT NOT NULL,
                network TEXT NOT NULL,
                exchange TEXT NOT NULL,
                initial_price REAL NOT NULL,
                discovered_at TEXT NOT NULL,
                last_check TEXT,
                targets_hit TEXT NOT NULL DEFAULT '[]',
                PRIMARY KEY (address, network, exchange)
            )
            "#,
        )
        .execute(&self.writer)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS locks (
                token_address TEXT NOT NULL,
                network TEXT NOT NULL,
                platform TEXT NOT NULL,
                percent REAL NOT NULL,
                detected_at TEXT NOT NULL,
                PRIMARY KEY (token_address, network, platform)
            )
            "#,
        )
        .execute(&self.writer)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                token_address TEXT NOT NULL,
                network TEXT NOT NULL,
                exchange TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                entry_price REAL NOT NULL,
                highest_price REAL NOT NULL,
                amount_in TEXT NOT NULL,
                token_amount TEXT NOT NULL,
                remaining_amount TEXT NOT NULL,
                amount_out TEXT NOT NULL DEFAULT '0',
                tp_hit TEXT NOT NULL DEFAULT '[]',
                tx_hashes TEXT NOT NULL DEFAULT '[]',
                close_reason TEXT,
                open_time TEXT NOT NULL,
                close_time TEXT,
                last_update TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.writer)
        .await?;

        // At most one active position per token on each network. Older
        // databases carry a token-only index that blocked reused addresses.
        sqlx::query("DROP INDEX IF EXISTS idx_trades_one_active")
            .execute(&self.writer)
            .await?;
        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_trades_one_active_per_network
            ON trades(token_address, network) WHERE status = 'active'
            "#,
        )
        .execute(&self.writer)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trade_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                trade_id INTEGER NOT NULL,
                action TEXT NOT NULL,
                amount TEXT NOT NULL,
                price REAL NOT NULL,
                proceeds TEXT NOT NULL DEFAULT '0',
                timestamp TEXT NOT NULL,
                tx_hash TEXT NOT NULL UNIQUE,
                reason TEXT,
                FOREIGN KEY (trade_id) REFERENCES trades(id)
            )
            "#,
        )
        .execute(&self.writer)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rpc_endpoints (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                network TEXT NOT NULL,
                rpc_url TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                last_check TEXT,
                last_error TEXT,
                success_count INTEGER NOT NULL DEFAULT 0,
                error_count INTEGER NOT NULL DEFAULT 0,
                last_success TEXT,
                UNIQUE(network, rpc_url)
            )
            "#,
        )
        .execute(&self.writer)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_status ON trades(status, network, exchange)")
            .execute(&self.writer)
            .await?;

        Ok(())
    }

    fn position_from_row(row: &SqliteRow) -> Result<Position> {
        let token: String = row.try_get("token_address")?;
        let status: String = row.try_get("status")?;
        let tp_hit: String = row.try_get("tp_hit")?;
        let tx_hashes: String = row.try_get("tx_hashes")?;

        Ok(Position {
            id: row.try_get("id")?,
            token: Address::from_str(&token).map_err(|e| anyhow!("bad token address '{}': {}", token, e))?,
            network: row.try_get("network")?,
            exchange: row.try_get("exchange")?,
            status: if status == "active" { PositionStatus::Active } else { PositionStatus::Closed },
            entry_price: row.try_get("entry_price")?,
            highest_price: row.try_get("highest_price")?,
            remaining: parse_u256(&row.try_get::<String, _>("remaining_amount")?)?,
            amount_spent: parse_u256(&row.try_get::<String, _>("amount_in")?)?,
            amount_received: parse_u256(&row.try_get::<String, _>("amount_out")?)?,
            tiers_hit: serde_json::from_str::<BTreeSet<String>>(&tp_hit).unwrap_or_default(),
            close_reason: row.try_get("close_reason")?,
            tx_hashes: serde_json::from_str::<Vec<String>>(&tx_hashes).unwrap_or_default(),
            opened_at: row.try_get("open_time")?,
        })
    }
}

#[async_trait]
impl PositionStore for SqliteStore {
    async fn save_token(&self, token: &Token) -> Result<()> {
        let targets = serde_json::to_string(&token.targets_hit)?;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO tokens
                (address, network, exchange, initial_price, discovered_at, last_check, targets_hit)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(addr_key(token.address))
        .bind(&token.network)
        .bind(&token.exchange)
        .bind(token.initial_price)
        .bind(token.discovered_at)
        .bind(Utc::now())
        .bind(targets)
        .execute(&self.writer)
        .await
        .context("save_token")?;
        Ok(())
    }

    async fn save_lock(&self, token: Address, network: &str, share: &LockShare) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO locks (token_address, network, platform, percent, detected_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(addr_key(token))
        .bind(network)
        .bind(&share.platform)
        .bind(share.percent)
        .bind(Utc::now())
        .execute(&self.writer)
        .await
        .context("save_lock")?;
        Ok(())
    }

    async fn create_position(&self, new: &NewPosition) -> Result<Position> {
        let now = Utc::now();
        let tx_hashes = serde_json::to_string(&vec![new.tx_hash.clone()])?;
        let mut tx = self.writer.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO trades (
                token_address, network, exchange, status, entry_price, highest_price,
                amount_in, token_amount, remaining_amount, amount_out, tp_hit, tx_hashes,
                open_time, last_update
            ) VALUES (?, ?, ?, 'active', ?, ?, ?, ?, ?, '0', '[]', ?, ?, ?)
            "#,
        )
        .bind(addr_key(new.token))
        .bind(&new.network)
        .bind(&new.exchange)
        .bind(new.entry_price)
        .bind(new.entry_price)
        .bind(new.amount_spent.to_string())
        .bind(new.token_amount.to_string())
        .bind(new.token_amount.to_string())
        .bind(&tx_hashes)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("create_position for {:#x}", new.token))?;

        let id = result.last_insert_rowid();

        sqlx::query(
            r#"
            INSERT INTO trade_history (trade_id, action, amount, price, proceeds, timestamp, tx_hash, reason)
            VALUES (?, 'buy', ?, ?, '0', ?, ?, 'entry')
            "#,
        )
        .bind(id)
        .bind(new.token_amount.to_string())
        .bind(new.entry_price)
        .bind(now)
        .bind(&new.tx_hash)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Position {
            id,
            token: new.token,
            network: new.network.clone(),
            exchange: new.exchange.clone(),
            status: PositionStatus::Active,
            entry_price: new.entry_price,
            highest_price: new.entry_price,
            remaining: new.token_amount,
            amount_spent: new.amount_spent,
            amount_received: U256::ZERO,
            tiers_hit: BTreeSet::new(),
            close_reason: None,
            tx_hashes: vec![new.tx_hash.clone()],
            opened_at: now,
        })
    }

    async fn get_active_position(&self, network: &str, token: Address) -> Result<Option<Position>> {
        let row = sqlx::query("SELECT * FROM trades WHERE token_address = ? AND network = ? AND status = 'active'")
            .bind(addr_key(token))
            .bind(network)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::position_from_row).transpose()
    }

    async fn update_remaining(&self, fill: &ExitFill) -> Result<FillOutcome> {
        let mut tx = self.writer.begin().await?;

        let seen: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM trade_history WHERE tx_hash = ?")
            .bind(&fill.tx_hash)
            .fetch_one(&mut *tx)
            .await?;
        if seen > 0 {
            debug!("Fill {} already applied for {:#x}", fill.tx_hash, fill.token);
            return Ok(FillOutcome::Duplicate);
        }

        let row = sqlx::query("SELECT * FROM trades WHERE token_address = ? AND network = ? AND status = 'active'")
            .bind(addr_key(fill.token))
            .bind(&fill.network)
            .fetch_optional(&mut *tx)
            .await?;
        let mut position = match row.as_ref().map(Self::position_from_row).transpose()? {
            Some(p) => p,
            None => {
                return Ok(FillOutcome::Rejected(format!(
                    "no active position for {:#x} on {}",
                    fill.token, fill.network
                )))
            }
        };

        if position.remaining != fill.previous_remaining {
            return Ok(FillOutcome::Rejected(format!(
                "remaining moved: stored {} vs fill computed from {}",
                position.remaining, fill.previous_remaining
            )));
        }

        let now = Utc::now();
        position.apply_fill(fill);
        let closed = position.status == PositionStatus::Closed;

        sqlx::query(
            r#"
            UPDATE trades
            SET remaining_amount = ?,
                amount_out = ?,
                tp_hit = ?,
                tx_hashes = ?,
                status = ?,
                close_reason = ?,
                close_time = ?,
                last_update = ?
            WHERE id = ?
            "#,
        )
        .bind(position.remaining.to_string())
        .bind(position.amount_received.to_string())
        .bind(serde_json::to_string(&position.tiers_hit)?)
        .bind(serde_json::to_string(&position.tx_hashes)?)
        .bind(position.status.as_str())
        .bind(&position.close_reason)
        .bind(if closed { Some(now) } else { None })
        .bind(now)
        .bind(position.id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO trade_history (trade_id, action, amount, price, proceeds, timestamp, tx_hash, reason)
            VALUES (?, 'sell', ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(position.id)
        .bind(fill.amount_sold.to_string())
        .bind(fill.price)
        .bind(fill.proceeds.to_string())
        .bind(now)
        .bind(&fill.tx_hash)
        .bind(&fill.reason)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(FillOutcome::Applied(position))
    }

    async fn mark_tier_hit(&self, network: &str, token: Address, tier_key: &str) -> Result<()> {
        let mut tx = self.writer.begin().await?;
        let row: Option<(i64, String)> = sqlx::query_as(
            "SELECT id, tp_hit FROM trades WHERE token_address = ? AND network = ? AND status = 'active'",
        )
        .bind(addr_key(token))
        .bind(network)
        .fetch_optional(&mut *tx)
        .await?;
        let Some((id, raw)) = row else {
            warn!("mark_tier_hit: no active position for {:#x} on {}", token, network);
            return Ok(());
        };

        let mut tiers: BTreeSet<String> = serde_json::from_str(&raw).unwrap_or_default();
        if tiers.insert(tier_key.to_string()) {
            sqlx::query("UPDATE trades SET tp_hit = ?, last_update = ? WHERE id = ?")
                .bind(serde_json::to_string(&tiers)?)
                .bind(Utc::now())
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn update_high_water(&self, network: &str, token: Address, price: f64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE trades SET highest_price = ?, last_update = ?
            WHERE token_address = ? AND network = ? AND status = 'active' AND highest_price < ?
            "#,
        )
        .bind(price)
        .bind(Utc::now())
        .bind(addr_key(token))
        .bind(network)
        .bind(price)
        .execute(&self.writer)
        .await?;
        Ok(())
    }

    async fn close_position(&self, network: &str, token: Address, reason: &str) -> Result<()> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE trades SET status = 'closed', close_reason = ?, close_time = ?, last_update = ?
            WHERE token_address = ? AND network = ? AND status = 'active'
            "#,
        )
        .bind(reason)
        .bind(now)
        .bind(now)
        .bind(addr_key(token))
        .bind(network)
        .execute(&self.writer)
        .await?;

        if result.rows_affected() == 0 {
            warn!("close_position: no active position for {:#x} on {}", token, network);
        }
        Ok(())
    }

    async fn list_active_positions(
        &self,
        network: Option<&str>,
        exchange: Option<&str>,
    ) -> Result<Vec<Position>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM trades
            WHERE status = 'active'
              AND (? IS NULL OR network = ?)
              AND (? IS NULL OR exchange = ?)
            ORDER BY id
            "#,
        )
        .bind(network)
        .bind(network)
        .bind(exchange)
        .bind(exchange)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::position_from_row).collect()
    }

    async fn list_history(&self, network: &str, token: Address) -> Result<Vec<HistoryEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT h.* FROM trade_history h
            JOIN trades t ON t.id = h.trade_id
            WHERE t.token_address = ? AND t.network = ?
            ORDER BY h.id
            "#,
        )
        .bind(addr_key(token))
        .bind(network)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(HistoryEntry {
                    trade_id: row.try_get("trade_id")?,
                    action: row.try_get("action")?,
                    amount: parse_u256(&row.try_get::<String, _>("amount")?)?,
                    price: row.try_get("price")?,
                    proceeds: parse_u256(&row.try_get::<String, _>("proceeds")?)?,
                    tx_hash: row.try_get("tx_hash")?,
                    reason: row.try_get("reason")?,
                    at: row.try_get("timestamp")?,
                })
            })
            .collect()
    }

    async fn record_endpoint_outcome(&self, outcome: &EndpointOutcome) -> Result<()> {
        let last_success: Option<DateTime<Utc>> = outcome.success.then_some(outcome.at);
        sqlx::query(
            r#"
            INSERT INTO rpc_endpoints
                (network, rpc_url, is_active, last_check, last_error, success_count, error_count, last_success)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(network, rpc_url) DO UPDATE SET
                is_active = excluded.is_active,
                last_check = excluded.last_check,
                last_error = COALESCE(excluded.last_error, rpc_endpoints.last_error),
                success_count = rpc_endpoints.success_count + excluded.success_count,
                error_count = rpc_endpoints.error_count + excluded.error_count,
                last_success = COALESCE(excluded.last_success, rpc_endpoints.last_success)
            "#,
        )
        .bind(&outcome.network)
        .bind(&outcome.url)
        .bind(outcome.success)
        .bind(outcome.at)
        .bind(&outcome.error)
        .bind(if outcome.success { 1i64 } else { 0 })
        .bind(if outcome.success { 0i64 } else { 1 })
        .bind(last_success)
        .execute(&self.writer)
        .await
        .context("record_endpoint_outcome")?;
        Ok(())
    }

    async fn list_endpoints_by_recent_success(&self, network: &str) -> Result<Vec<String>> {
        let urls: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT rpc_url FROM rpc_endpoints
            WHERE network = ? AND last_success IS NOT NULL
            ORDER BY last_success DESC
            "#,
        )
        .bind(network)
        .fetch_all(&self.pool)
        .await?;
        Ok(urls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;
    use chrono::Duration;

    const TOKEN: Address = address!("1111111111111111111111111111111111111111");

    fn new_position(amount: u64) -> NewPosition {
        NewPosition {
            token: TOKEN,
            network: "bsc".to_string(),
            exchange: "pancakeswap".to_string(),
            entry_price: 1.0,
            token_amount: U256::from(amount),
            amount_spent: U256::from(5_000u64),
            tx_hash: "0xbuy".to_string(),
        }
    }

    fn fill(hash: &str, previous: u64, sold: u64, tier: Option<&str>) -> ExitFill {
        ExitFill {
            token: TOKEN,
            network: "bsc".to_string(),
            tx_hash: hash.to_string(),
            previous_remaining: U256::from(previous),
            amount_sold: U256::from(sold),
            proceeds: U256::from(sold * 2),
            price: 2.0,
            reason: "take_profit_2x".to_string(),
            tier_key: tier.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_create_and_fetch_position() {
        let store = SqliteStore::in_memory().await.unwrap();
        let created = store.create_position(&new_position(1000)).await.unwrap();
        let fetched = store.get_active_position("bsc", TOKEN).await.unwrap().unwrap();
        assert_eq!(created.id, fetched.id);
        assert_eq!(fetched.remaining, U256::from(1000));
        assert_eq!(fetched.highest_price, 1.0);
        assert_eq!(fetched.tx_hashes, vec!["0xbuy".to_string()]);
    }

    #[tokio::test]
    async fn test_second_active_position_refused() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.create_position(&new_position(1000)).await.unwrap();
        let mut again = new_position(10);
        again.tx_hash = "0xbuy2".to_string();
        assert!(store.create_position(&again).await.is_err());
    }

    #[tokio::test]
    async fn test_same_address_on_two_networks() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.create_position(&new_position(1000)).await.unwrap();
        let mut eth = new_position(40);
        eth.network = "ethereum".to_string();
        eth.exchange = "uniswap".to_string();
        eth.tx_hash = "0xbuy-eth".to_string();
        store.create_position(&eth).await.unwrap();

        store.close_position("ethereum", TOKEN, "stop_loss").await.unwrap();
        assert!(store.get_active_position("ethereum", TOKEN).await.unwrap().is_none());
        let bsc = store.get_active_position("bsc", TOKEN).await.unwrap().unwrap();
        assert_eq!(bsc.remaining, U256::from(1000));
        assert_eq!(store.list_history("ethereum", TOKEN).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fill_replay_is_idempotent() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.create_position(&new_position(1000)).await.unwrap();

        let first = fill("0xsell1", 1000, 500, Some("tp_2x"));
        match store.update_remaining(&first).await.unwrap() {
            FillOutcome::Applied(p) => {
                assert_eq!(p.remaining, U256::from(500));
                assert!(p.tiers_hit.contains("tp_2x"));
            }
            other => panic!("expected Applied, got {:?}", other),
        }

        // Same confirmation delivered twice
        assert_eq!(store.update_remaining(&first).await.unwrap(), FillOutcome::Duplicate);

        let stored = store.get_active_position("bsc", TOKEN).await.unwrap().unwrap();
        assert_eq!(stored.remaining, U256::from(500));
        assert_eq!(stored.amount_received, U256::from(1000));
        assert_eq!(store.list_history("bsc", TOKEN).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_stale_fill_rejected() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.create_position(&new_position(1000)).await.unwrap();
        store.update_remaining(&fill("0xa", 1000, 500, None)).await.unwrap();

        // Computed from the old remaining size under a different hash
        let stale = fill("0xb", 1000, 500, None);
        assert!(matches!(
            store.update_remaining(&stale).await.unwrap(),
            FillOutcome::Rejected(_)
        ));
        let stored = store.get_active_position("bsc", TOKEN).await.unwrap().unwrap();
        assert_eq!(stored.remaining, U256::from(500));
    }

    #[tokio::test]
    async fn test_full_fill_closes() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.create_position(&new_position(1000)).await.unwrap();
        let mut all = fill("0xall", 1000, 1000, None);
        all.reason = "stop_loss".to_string();

        match store.update_remaining(&all).await.unwrap() {
            FillOutcome::Applied(p) => {
                assert_eq!(p.status, PositionStatus::Closed);
                assert_eq!(p.close_reason.as_deref(), Some("stop_loss"));
            }
            other => panic!("expected Applied, got {:?}", other),
        }
        assert!(store.get_active_position("bsc", TOKEN).await.unwrap().is_none());
        assert!(store.list_active_positions(None, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_high_water_only_rises() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.create_position(&new_position(1000)).await.unwrap();
        store.update_high_water("bsc", TOKEN, 3.0).await.unwrap();
        store.update_high_water("bsc", TOKEN, 2.0).await.unwrap();
        let p = store.get_active_position("bsc", TOKEN).await.unwrap().unwrap();
        assert_eq!(p.highest_price, 3.0);
    }

    #[tokio::test]
    async fn test_tier_and_close() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.create_position(&new_position(1000)).await.unwrap();
        store.mark_tier_hit("bsc", TOKEN, "tp_3x").await.unwrap();
        store.mark_tier_hit("bsc", TOKEN, "tp_3x").await.unwrap();
        let p = store.get_active_position("bsc", TOKEN).await.unwrap().unwrap();
        assert_eq!(p.tiers_hit.len(), 1);

        store.close_position("bsc", TOKEN, "price_check_failed").await.unwrap();
        assert!(store.get_active_position("bsc", TOKEN).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_active_filter() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.create_position(&new_position(1000)).await.unwrap();
        let mut other = new_position(5);
        other.token = address!("2222222222222222222222222222222222222222");
        other.network = "ethereum".to_string();
        other.exchange = "uniswap".to_string();
        other.tx_hash = "0xbuy-eth".to_string();
        store.create_position(&other).await.unwrap();

        assert_eq!(store.list_active_positions(None, None).await.unwrap().len(), 2);
        assert_eq!(store.list_active_positions(Some("bsc"), None).await.unwrap().len(), 1);
        assert_eq!(
            store.list_active_positions(Some("ethereum"), Some("pancakeswap")).await.unwrap().len(),
            0
        );
    }

    #[tokio::test]
    async fn test_endpoint_ordering_by_recent_success() {
        let store = SqliteStore::in_memory().await.unwrap();
        let now = Utc::now();
        let outcome = |url: &str, success: bool, at: DateTime<Utc>| EndpointOutcome {
            network: "bsc".to_string(),
            url: url.to_string(),
            success,
            at,
            error: (!success).then(|| "connection refused".to_string()),
        };

        store.record_endpoint_outcome(&outcome("https://a", true, now - Duration::seconds(30))).await.unwrap();
        store.record_endpoint_outcome(&outcome("https://b", true, now - Duration::seconds(10))).await.unwrap();
        store.record_endpoint_outcome(&outcome("https://c", false, now)).await.unwrap();
        // A later failure keeps the old success timestamp
        store.record_endpoint_outcome(&outcome("https://b", false, now)).await.unwrap();

        let urls = store.list_endpoints_by_recent_success("bsc").await.unwrap();
        assert_eq!(urls, vec!["https://b".to_string(), "https://a".to_string()]);
        assert!(store.list_endpoints_by_recent_success("ethereum").await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_fills_on_file_store() {
        let path = std::env::temp_dir().join(format!(
            "pair-sniper-fills-{}-{}.db",
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        let url = format!("sqlite://{}", path.display());
        let store = SqliteStore::open(&url).await.unwrap();

        let tokens: Vec<Address> = (1..=40u8).map(Address::with_last_byte).collect();
        for (i, token) in tokens.iter().enumerate() {
            let mut position = new_position(1000);
            position.token = *token;
            position.tx_hash = format!("0xbuy{}", i);
            store.create_position(&position).await.unwrap();
        }

        let tasks: Vec<_> = tokens
            .iter()
            .enumerate()
            .map(|(i, token)| {
                let store = store.clone();
                let mut sell = fill(&format!("0xsell{}", i), 1000, 400, Some("tp_2x"));
                sell.token = *token;
                tokio::spawn(async move {
                    let applied = store.update_remaining(&sell).await;
                    let marked = store.mark_tier_hit("bsc", sell.token, "tp_3x").await;
                    (applied, marked)
                })
            })
            .collect();

        for task in futures::future::join_all(tasks).await {
            let (applied, marked) = task.unwrap();
            assert!(matches!(applied.unwrap(), FillOutcome::Applied(_)));
            marked.unwrap();
        }
        for token in &tokens {
            let p = store.get_active_position("bsc", *token).await.unwrap().unwrap();
            assert_eq!(p.remaining, U256::from(600));
            assert_eq!(p.tiers_hit.len(), 2);
        }

        drop(store);
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
        }
    }
}
