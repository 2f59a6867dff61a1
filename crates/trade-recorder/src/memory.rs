use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use trading_core::{Action, MarketConditions, TradeMemory, TradeOutcome, TrendBias};

#[derive(Debug, sqlx::FromRow)]
struct MemoryRow {
    id: i64,
    symbol: String,
    action: String,
    confidence: f64,
    rsi: f64,
    adx: f64,
    trend: String,
    ofi: f64,
    outcome: String,
    pnl_pct: Option<f64>,
    created_at: String,
}

impl MemoryRow {
    fn into_memory(self) -> TradeMemory {
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());
        TradeMemory {
            id: Some(self.id),
            symbol: self.symbol,
            conditions: MarketConditions {
                rsi: self.rsi,
                adx: self.adx,
                trend: TrendBias::from_str_lossy(&self.trend),
                ofi: self.ofi,
            },
            action: Action::parse_loose(&self.action).unwrap_or(Action::Hold),
            confidence: self.confidence,
            outcome: TradeOutcome::from_str_lossy(&self.outcome),
            pnl_pct: self.pnl_pct,
            created_at,
        }
    }
}

/// Outcome counts over the whole store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total: i64,
    pub wins: i64,
    pub losses: i64,
    pub breakeven: i64,
    pub pending: i64,
}

impl MemoryStats {
    /// Wins over decided (WIN + LOSS) trades
    pub fn win_rate(&self) -> Option<f64> {
        let decided = self.wins + self.losses;
        (decided > 0).then(|| self.wins as f64 / decided as f64)
    }
}

/// Durable trade memories: one row per entry, finalized exactly once.
#[derive(Clone)]
pub struct TradeMemoryStore {
    pool: SqlitePool,
}

const COLUMNS: &str = "id, symbol, action, confidence, rsi, adx, trend, ofi, outcome, pnl_pct, created_at";

impl TradeMemoryStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, creating the tables if needed.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool };
        store.init_tables().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_tables(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS trade_memory (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                action TEXT NOT NULL,
                confidence REAL NOT NULL,
                rsi REAL NOT NULL,
                adx REAL NOT NULL,
                trend TEXT NOT NULL,
                ofi REAL NOT NULL,
                outcome TEXT NOT NULL DEFAULT 'PENDING',
                pnl_pct REAL,
                created_at TEXT NOT NULL,
                closed_at TEXT
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trade_memory_outcome ON trade_memory(outcome)")
            .execute(&self.pool)
            .await
            .ok();
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trade_memory_symbol ON trade_memory(symbol)")
            .execute(&self.pool)
            .await
            .ok();

        Ok(())
    }

    /// Store a new entry as PENDING and return its id.
    pub async fn insert_pending(
        &self,
        symbol: &str,
        action: Action,
        confidence: f64,
        conditions: &MarketConditions,
    ) -> Result<i64> {
        if !action.is_entry() {
            bail!("only entries are remembered, got {}", action);
        }
        let result = sqlx::query(
            "INSERT INTO trade_memory (symbol, action, confidence, rsi, adx, trend, ofi, outcome, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, 'PENDING', ?)",
        )
        .bind(symbol)
        .bind(action.as_str())
        .bind(confidence)
        .bind(conditions.rsi)
        .bind(conditions.adx)
        .bind(conditions.trend.to_string())
        .bind(conditions.ofi)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Write the final outcome. Returns false when the memory was already
    /// finalized (or does not exist); a memory never changes twice.
    pub async fn finalize(&self, id: i64, outcome: TradeOutcome, pnl_pct: f64) -> Result<bool> {
        if outcome == TradeOutcome::Pending {
            bail!("cannot finalize memory {} as PENDING", id);
        }
        let result = sqlx::query(
            "UPDATE trade_memory SET outcome = ?, pnl_pct = ?, closed_at = ?
             WHERE id = ? AND outcome = 'PENDING'",
        )
        .bind(outcome.as_str())
        .bind(pnl_pct)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;

        let updated = result.rows_affected() == 1;
        if !updated {
            tracing::debug!("Memory {} already finalized, ignoring {}", id, outcome.as_str());
        }
        Ok(updated)
    }

    pub async fn get(&self, id: i64) -> Result<Option<TradeMemory>> {
        let row = sqlx::query_as::<_, MemoryRow>(&format!(
            "SELECT {} FROM trade_memory WHERE id = ?",
            COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(MemoryRow::into_memory))
    }

    /// Most recent finalized memories, newest first.
    pub async fn closed(&self, limit: i64) -> Result<Vec<TradeMemory>> {
        let rows = sqlx::query_as::<_, MemoryRow>(&format!(
            "SELECT {} FROM trade_memory WHERE outcome != 'PENDING' ORDER BY id DESC LIMIT ?",
            COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(MemoryRow::into_memory).collect())
    }

    /// Oldest pending memory for a symbol
    pub async fn pending_for(&self, symbol: &str) -> Result<Option<TradeMemory>> {
        let row = sqlx::query_as::<_, MemoryRow>(&format!(
            "SELECT {} FROM trade_memory WHERE symbol = ? AND outcome = 'PENDING' ORDER BY id ASC LIMIT 1",
            COLUMNS
        ))
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(MemoryRow::into_memory))
    }

    pub async fn stats(&self) -> Result<MemoryStats> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT outcome, COUNT(*) FROM trade_memory GROUP BY outcome")
                .fetch_all(&self.pool)
                .await?;

        let mut stats = MemoryStats::default();
        for (outcome, count) in rows {
            stats.total += count;
            match TradeOutcome::from_str_lossy(&outcome) {
                TradeOutcome::Win => stats.wins += count,
                TradeOutcome::Loss => stats.losses += count,
                TradeOutcome::Breakeven => stats.breakeven += count,
                TradeOutcome::Pending => stats.pending += count,
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_test_store() -> TradeMemoryStore {
        // One connection: every in-memory connection is its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        TradeMemoryStore::from_pool(pool).await.unwrap()
    }

    fn conditions() -> MarketConditions {
        MarketConditions {
            rsi: 42.0,
            adx: 27.0,
            trend: TrendBias::Bullish,
            ofi: 0.3,
        }
    }

    #[tokio::test]
    async fn test_insert_and_get_pending() {
        let store = setup_test_store().await;
        let id = store
            .insert_pending("BTCUSDT", Action::Buy, 0.8, &conditions())
            .await
            .unwrap();

        let memory = store.get(id).await.unwrap().unwrap();
        assert_eq!(memory.outcome, TradeOutcome::Pending);
        assert_eq!(memory.action, Action::Buy);
        assert_eq!(memory.conditions, conditions());
    }

    #[tokio::test]
    async fn test_finalize_exactly_once() {
        let store = setup_test_store().await;
        let id = store
            .insert_pending("BTCUSDT", Action::Sell, 0.7, &conditions())
            .await
            .unwrap();

        assert!(store.finalize(id, TradeOutcome::Win, 2.4).await.unwrap());
        assert!(!store.finalize(id, TradeOutcome::Loss, -1.5).await.unwrap());

        let memory = store.get(id).await.unwrap().unwrap();
        assert_eq!(memory.outcome, TradeOutcome::Win);
        assert_eq!(memory.pnl_pct, Some(2.4));
    }

    #[tokio::test]
    async fn test_rejects_pending_outcome_and_hold() {
        let store = setup_test_store().await;
        assert!(store
            .insert_pending("BTCUSDT", Action::Hold, 0.5, &conditions())
            .await
            .is_err());
        assert!(store.finalize(1, TradeOutcome::Pending, 0.0).await.is_err());
    }

    #[tokio::test]
    async fn test_closed_and_stats() {
        let store = setup_test_store().await;
        for (outcome, pnl) in [
            (TradeOutcome::Win, 3.0),
            (TradeOutcome::Loss, -1.5),
            (TradeOutcome::Breakeven, 0.1),
        ] {
            let id = store
                .insert_pending("ETHUSDT", Action::Buy, 0.75, &conditions())
                .await
                .unwrap();
            store.finalize(id, outcome, pnl).await.unwrap();
        }
        store
            .insert_pending("ETHUSDT", Action::Buy, 0.75, &conditions())
            .await
            .unwrap();

        let closed = store.closed(10).await.unwrap();
        assert_eq!(closed.len(), 3);
        assert_eq!(closed[0].outcome, TradeOutcome::Breakeven);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total, 4);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.win_rate(), Some(0.5));

        let pending = store.pending_for("ETHUSDT").await.unwrap().unwrap();
        assert_eq!(pending.outcome, TradeOutcome::Pending);
        assert!(store.pending_for("BTCUSDT").await.unwrap().is_none());
    }
}
