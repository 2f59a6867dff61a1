use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use trading_core::{ConsensusSignal, RegimeMode, SessionContext};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub at: DateTime<Utc>,
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalSummary {
    pub symbol: String,
    pub action: String,
    pub confidence: f64,
    pub consensus_score: f64,
    pub models: Vec<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSummary {
    pub symbol: String,
    pub side: String,
    pub state: String,
    pub entry_price: f64,
    pub pnl_pct: f64,
}

/// Display-only document for external dashboards. Never read back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub updated_at: DateTime<Utc>,
    pub exchange: String,
    pub equity: f64,
    pub start_equity: f64,
    pub session_pnl_pct: f64,
    pub daily_loss_pct: f64,
    pub regime: String,
    pub mode: RegimeMode,
    pub risk_scaler: f64,
    pub halted: bool,
    pub positions: Vec<PositionSummary>,
    pub latest_signal: Option<SignalSummary>,
    pub activity: Vec<ActivityEntry>,
}

/// Keeps the bounded activity feed and overwrites the snapshot file
/// atomically (write to a sibling temp file, then rename).
pub struct StatusWriter {
    path: PathBuf,
    max_activity: usize,
    activity: VecDeque<ActivityEntry>,
    latest_signal: Option<SignalSummary>,
}

impl StatusWriter {
    pub fn new(path: impl Into<PathBuf>, max_activity: usize) -> Self {
        Self {
            path: path.into(),
            max_activity: max_activity.max(1),
            activity: VecDeque::new(),
            latest_signal: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn push_activity(&mut self, kind: &str, message: impl Into<String>) {
        if self.activity.len() == self.max_activity {
            self.activity.pop_front();
        }
        self.activity.push_back(ActivityEntry {
            at: Utc::now(),
            kind: kind.to_string(),
            message: message.into(),
        });
    }

    pub fn set_signal(&mut self, symbol: &str, signal: &ConsensusSignal) {
        self.latest_signal = Some(SignalSummary {
            symbol: symbol.to_string(),
            action: signal.action.to_string(),
            confidence: signal.confidence,
            consensus_score: signal.consensus_score,
            models: signal.models.clone(),
            at: Utc::now(),
        });
    }

    pub fn snapshot(&self, exchange: &str, session: &SessionContext, positions: Vec<PositionSummary>) -> StatusSnapshot {
        StatusSnapshot {
            updated_at: Utc::now(),
            exchange: exchange.to_string(),
            equity: session.equity,
            start_equity: session.start_equity,
            session_pnl_pct: session.session_pnl_pct,
            daily_loss_pct: session.daily_loss_pct,
            regime: session.regime.clone(),
            mode: session.mode,
            risk_scaler: session.risk_scaler,
            halted: session.halted,
            positions,
            latest_signal: self.latest_signal.clone(),
            // Newest first for display
            activity: self.activity.iter().rev().cloned().collect(),
        }
    }

    pub async fn write(&self, snapshot: &StatusSnapshot) -> Result<()> {
        let body = serde_json::to_vec_pretty(snapshot)?;
        let tmp = self.path.with_extension("json.tmp");
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::write(&tmp, body)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("renaming onto {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_activity_feed_is_bounded() {
        let mut writer = StatusWriter::new("status.json", 3);
        for i in 0..5 {
            writer.push_activity("trade", format!("entry {}", i));
        }
        let session = SessionContext::new(1_000.0, NaiveDate::from_ymd_opt(2026, 5, 1).unwrap());
        let snapshot = writer.snapshot("paper", &session, vec![]);
        assert_eq!(snapshot.activity.len(), 3);
        assert_eq!(snapshot.activity[0].message, "entry 4");
        assert_eq!(snapshot.activity[2].message, "entry 2");
    }

    #[tokio::test]
    async fn test_write_replaces_file() {
        let dir = std::env::temp_dir().join(format!("status-test-{}", std::process::id()));
        let path = dir.join("status.json");
        let mut writer = StatusWriter::new(&path, 10);
        let session = SessionContext::new(500.0, NaiveDate::from_ymd_opt(2026, 5, 1).unwrap());

        writer.push_activity("start", "booted");
        writer.write(&writer.snapshot("paper", &session, vec![])).await.unwrap();
        writer.push_activity("trade", "BUY BTCUSDT");
        writer.write(&writer.snapshot("paper", &session, vec![])).await.unwrap();

        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: StatusSnapshot = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.activity.len(), 2);
        assert_eq!(parsed.equity, 500.0);
        assert!(!path.with_extension("json.tmp").exists());

        tokio::fs::remove_dir_all(&dir).await.ok();
    }
}
