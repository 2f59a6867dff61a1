use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use trading_core::Action;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("ledger rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("ledger not configured")]
    NotConfigured,
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Proof of an executed trade, linked to the decision that caused it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeProof {
    pub trade_hash: String,
    pub decision_hash: String,
    pub symbol: String,
    pub price: f64,
    pub quantity: f64,
    pub side: Action,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    /// Ledger-side reference (transaction id, log sequence, ...)
    pub reference: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerStats {
    pub decisions: u64,
    pub trades: u64,
}

/// Append-only proof sink. Callers treat every error as non-fatal.
#[async_trait]
pub trait Ledger: Send + Sync {
    fn name(&self) -> &str;

    async fn record_decision(&self, hash: &str, reasoning: &str, confidence: f64) -> LedgerResult<Receipt>;

    async fn record_trade(&self, proof: &TradeProof) -> LedgerResult<Receipt>;

    async fn get_stats(&self) -> LedgerResult<LedgerStats>;
}

/// SHA-256 over the decision fields.
pub fn decision_hash(symbol: &str, action: Action, confidence: f64, reasoning: &str, at: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(symbol.as_bytes());
    hasher.update(b"|");
    hasher.update(action.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(format!("{:.6}", confidence).as_bytes());
    hasher.update(b"|");
    hasher.update(reasoning.as_bytes());
    hasher.update(b"|");
    hasher.update(at.to_rfc3339().as_bytes());
    hex::encode(hasher.finalize())
}

/// SHA-256 over the fill, chained to its decision hash.
pub fn trade_hash(decision_hash: &str, symbol: &str, side: Action, price: f64, quantity: f64, at: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(decision_hash.as_bytes());
    hasher.update(b"|");
    hasher.update(symbol.as_bytes());
    hasher.update(b"|");
    hasher.update(side.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(format!("{:.8}|{:.8}", price, quantity).as_bytes());
    hasher.update(b"|");
    hasher.update(at.to_rfc3339().as_bytes());
    hex::encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// HTTP ledger service
// ---------------------------------------------------------------------------

/// Posts proofs to a ledger service that handles on-chain submission.
pub struct HttpLedger {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct DecisionBody<'a> {
    hash: &'a str,
    reasoning: &'a str,
    confidence: f64,
}

impl HttpLedger {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> LedgerResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn check(response: reqwest::Response) -> LedgerResult<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(LedgerError::Rejected { status, body })
    }
}

#[async_trait]
impl Ledger for HttpLedger {
    fn name(&self) -> &str {
        "http"
    }

    async fn record_decision(&self, hash: &str, reasoning: &str, confidence: f64) -> LedgerResult<Receipt> {
        let response = self
            .client
            .post(format!("{}/decisions", self.base_url))
            .json(&DecisionBody {
                hash,
                reasoning,
                confidence,
            })
            .send()
            .await?;
        Ok(Self::check(response).await?.json::<Receipt>().await?)
    }

    async fn record_trade(&self, proof: &TradeProof) -> LedgerResult<Receipt> {
        let response = self
            .client
            .post(format!("{}/trades", self.base_url))
            .json(proof)
            .send()
            .await?;
        Ok(Self::check(response).await?.json::<Receipt>().await?)
    }

    async fn get_stats(&self) -> LedgerResult<LedgerStats> {
        let response = self
            .client
            .get(format!("{}/stats", self.base_url))
            .send()
            .await?;
        Ok(Self::check(response).await?.json::<LedgerStats>().await?)
    }
}

// ---------------------------------------------------------------------------
// Log-only ledger
// ---------------------------------------------------------------------------

/// Writes proofs to the log. Used when no ledger service is configured.
#[derive(Default)]
pub struct LogLedger {
    decisions: AtomicU64,
    trades: AtomicU64,
}

impl LogLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Ledger for LogLedger {
    fn name(&self) -> &str {
        "log"
    }

    async fn record_decision(&self, hash: &str, reasoning: &str, confidence: f64) -> LedgerResult<Receipt> {
        let seq = self.decisions.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(
            "[proof] decision #{} {} ({:.0}%): {}",
            seq,
            &hash[..hash.len().min(16)],
            confidence * 100.0,
            reasoning
        );
        Ok(Receipt {
            reference: format!("log-decision-{}", seq),
        })
    }

    async fn record_trade(&self, proof: &TradeProof) -> LedgerResult<Receipt> {
        let seq = self.trades.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(
            "[proof] trade #{} {} {} {} @ {:.4} (decision {})",
            seq,
            proof.side,
            proof.quantity,
            proof.symbol,
            proof.price,
            &proof.decision_hash[..proof.decision_hash.len().min(16)]
        );
        Ok(Receipt {
            reference: format!("log-trade-{}", seq),
        })
    }

    async fn get_stats(&self) -> LedgerResult<LedgerStats> {
        Ok(LedgerStats {
            decisions: self.decisions.load(Ordering::SeqCst),
            trades: self.trades.load(Ordering::SeqCst),
        })
    }
}
