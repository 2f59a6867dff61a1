use chrono::Utc;
use std::sync::Arc;
use tokio::task::JoinHandle;
use trading_core::Action;

use crate::ledger::{decision_hash, trade_hash, Ledger, LedgerStats, TradeProof};

/// Hash of a submitted record plus the background task delivering it
pub struct Submitted {
    pub hash: String,
    pub task: JoinHandle<()>,
}

/// Fire-and-forget front for a ledger. Hashes are computed inline so the
/// caller can chain a trade to its decision; delivery happens on a spawned
/// task and failures are only logged.
#[derive(Clone)]
pub struct Recorder {
    ledger: Arc<dyn Ledger>,
}

impl Recorder {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }

    pub fn ledger_name(&self) -> &str {
        self.ledger.name()
    }

    pub fn record_decision(&self, symbol: &str, action: Action, confidence: f64, reasoning: &str) -> Submitted {
        let hash = decision_hash(symbol, action, confidence, reasoning, Utc::now());
        let ledger = Arc::clone(&self.ledger);
        let task_hash = hash.clone();
        let reasoning = format!("{} {}: {}", action, symbol, reasoning);

        let task = tokio::spawn(async move {
            if let Err(e) = ledger.record_decision(&task_hash, &reasoning, confidence).await {
                tracing::warn!("Failed to record decision on {} ledger: {}", ledger.name(), e);
            }
        });
        Submitted { hash, task }
    }

    pub fn record_trade(
        &self,
        decision_hash: &str,
        symbol: &str,
        side: Action,
        price: f64,
        quantity: f64,
        confidence: f64,
    ) -> Submitted {
        let hash = trade_hash(decision_hash, symbol, side, price, quantity, Utc::now());
        let proof = TradeProof {
            trade_hash: hash.clone(),
            decision_hash: decision_hash.to_string(),
            symbol: symbol.to_string(),
            price,
            quantity,
            side,
            confidence,
        };
        let ledger = Arc::clone(&self.ledger);

        let task = tokio::spawn(async move {
            if let Err(e) = ledger.record_trade(&proof).await {
                tracing::warn!("Failed to record trade {} on {} ledger: {}", proof.symbol, ledger.name(), e);
            }
        });
        Submitted { hash, task }
    }

    /// Ledger counters, or None when the ledger cannot answer.
    pub async fn stats(&self) -> Option<LedgerStats> {
        match self.ledger.get_stats().await {
            Ok(stats) => Some(stats),
            Err(e) => {
                tracing::debug!("Ledger stats unavailable: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{LedgerError, LedgerResult, LogLedger, Receipt};
    use async_trait::async_trait;

    struct Broken;

    #[async_trait]
    impl Ledger for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        async fn record_decision(&self, _: &str, _: &str, _: f64) -> LedgerResult<Receipt> {
            Err(LedgerError::NotConfigured)
        }
        async fn record_trade(&self, _: &TradeProof) -> LedgerResult<Receipt> {
            Err(LedgerError::Rejected {
                status: 503,
                body: "busy".into(),
            })
        }
        async fn get_stats(&self) -> LedgerResult<LedgerStats> {
            Err(LedgerError::NotConfigured)
        }
    }

    #[tokio::test]
    async fn test_failures_never_propagate() {
        let recorder = Recorder::new(Arc::new(Broken));
        let decision = recorder.record_decision("BTCUSDT", Action::Buy, 0.8, "test");
        let trade = recorder.record_trade(&decision.hash, "BTCUSDT", Action::Buy, 100.0, 0.01, 0.8);

        assert!(decision.task.await.is_ok());
        assert!(trade.task.await.is_ok());
        assert!(recorder.stats().await.is_none());
    }

    #[tokio::test]
    async fn test_records_reach_ledger() {
        let recorder = Recorder::new(Arc::new(LogLedger::new()));
        let decision = recorder.record_decision("ETHUSDT", Action::Sell, 0.7, "2/3 SELL");
        decision.task.await.unwrap();
        let trade = recorder.record_trade(&decision.hash, "ETHUSDT", Action::Sell, 3_000.0, 0.1, 0.7);
        trade.task.await.unwrap();

        assert_ne!(decision.hash, trade.hash);
        let stats = recorder.stats().await.unwrap();
        assert_eq!(stats.decisions, 1);
        assert_eq!(stats.trades, 1);
    }
}
