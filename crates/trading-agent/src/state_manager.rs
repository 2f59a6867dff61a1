use anyhow::Result;
use chrono::NaiveDate;
use sqlx::SqlitePool;
use trading_core::SessionContext;

const SESSION_KEY: &str = "session_context";
const METRICS_KEY: &str = "agent_metrics";

/// Key-value state that survives restarts: the session context (daily
/// loss, halt latch, regime) and the metrics counters.
pub struct StateManager {
    db_pool: SqlitePool,
}

impl StateManager {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    pub async fn init_tables(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS agent_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    pub async fn save_state(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO agent_state (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    pub async fn load_state(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM agent_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.db_pool)
            .await?;
        Ok(row.map(|(v,)| v))
    }

    pub async fn save_session(&self, session: &SessionContext) -> Result<()> {
        let json = serde_json::to_string(session)?;
        self.save_state(SESSION_KEY, &json).await
    }

    /// Session from the previous run, brought up to date with the current
    /// equity and day. A session saved on an earlier day comes back with
    /// its daily accumulators and halt latch reset.
    pub async fn restore_session(&self, equity: f64, today: NaiveDate) -> Result<Option<SessionContext>> {
        let Some(raw) = self.load_state(SESSION_KEY).await? else {
            return Ok(None);
        };
        let mut session: SessionContext = match serde_json::from_str(&raw) {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!("Discarding unreadable saved session: {}", e);
                return Ok(None);
            }
        };
        session.refresh_equity(equity);
        if session.roll_day(today) {
            tracing::info!("Saved session is from {}, daily limits reset", session.trading_day);
        }
        Ok(Some(session))
    }

    pub async fn save_metrics(&self, metrics_json: &serde_json::Value) -> Result<()> {
        let json_str = serde_json::to_string(metrics_json)?;
        self.save_state(METRICS_KEY, &json_str).await
    }

    pub async fn load_metrics(&self) -> Result<Option<serde_json::Value>> {
        match self.load_state(METRICS_KEY).await? {
            Some(s) => Ok(serde_json::from_str(&s).ok()),
            None => Ok(None),
        }
    }
}
