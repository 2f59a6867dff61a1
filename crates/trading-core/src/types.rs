use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// OHLCV candle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// One price level of an order book
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub size: f64,
}

/// Order-book depth snapshot, best levels first
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBook {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl OrderBook {
    pub fn mid_price(&self) -> Option<f64> {
        match (self.bids.first(), self.asks.first()) {
            (Some(b), Some(a)) => Some((b.price + a.price) / 2.0),
            _ => None,
        }
    }
}

/// Trading action proposed by a predictor or a decision stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Buy => "BUY",
            Action::Sell => "SELL",
            Action::Hold => "HOLD",
        }
    }

    /// Parse the loose spellings returned by language-model predictors.
    pub fn parse_loose(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "BUY" | "LONG" | "STRONG_BUY" | "STRONG BUY" => Some(Action::Buy),
            "SELL" | "SHORT" | "STRONG_SELL" | "STRONG SELL" => Some(Action::Sell),
            "HOLD" | "WAIT" | "NEUTRAL" | "NONE" => Some(Action::Hold),
            _ => None,
        }
    }

    pub fn is_entry(&self) -> bool {
        !matches!(self, Action::Hold)
    }

    /// Position side opened by this action, if any.
    pub fn side(&self) -> Option<Side> {
        match self {
            Action::Buy => Some(Side::Long),
            Action::Sell => Some(Side::Short),
            Action::Hold => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Discrete trend classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TrendBias {
    Bullish,
    Bearish,
    Neutral,
}

impl TrendBias {
    /// Numeric encoding used by similarity features (-1, 0, 1)
    pub fn to_unit(&self) -> f64 {
        match self {
            TrendBias::Bullish => 1.0,
            TrendBias::Bearish => -1.0,
            TrendBias::Neutral => 0.0,
        }
    }

    pub fn from_str_lossy(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "BULLISH" | "UP" => TrendBias::Bullish,
            "BEARISH" | "DOWN" => TrendBias::Bearish,
            _ => TrendBias::Neutral,
        }
    }

    /// Whether this trend points the same way as the action.
    pub fn agrees_with(&self, action: Action) -> bool {
        matches!(
            (self, action),
            (TrendBias::Bullish, Action::Buy) | (TrendBias::Bearish, Action::Sell)
        )
    }
}

impl fmt::Display for TrendBias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrendBias::Bullish => "BULLISH",
            TrendBias::Bearish => "BEARISH",
            TrendBias::Neutral => "NEUTRAL",
        };
        f.write_str(s)
    }
}

/// Position direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1 for long, -1 for short
    pub fn sign(&self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }

    pub fn opening_action(&self) -> Action {
        match self {
            Side::Long => Action::Buy,
            Side::Short => Action::Sell,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => f.write_str("LONG"),
            Side::Short => f.write_str("SHORT"),
        }
    }
}

/// Snapshot of the market for one symbol, built fresh every cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketContext {
    pub symbol: String,
    pub price: f64,
    /// Order-flow imbalance near the top of book, roughly [-1, 1]
    pub ofi: f64,
    /// 0-100
    pub rsi: f64,
    pub adx: f64,
    /// Average true range as percent of price
    pub atr_pct: f64,
    pub trend: TrendBias,
    /// Trend on the higher timeframe, when candles for it were available
    #[serde(default)]
    pub htf_trend: Option<TrendBias>,
    /// Skew of outsized resting orders, [-1, 1]
    #[serde(default)]
    pub whale_imbalance: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl MarketContext {
    pub fn conditions(&self) -> MarketConditions {
        MarketConditions {
            rsi: self.rsi,
            adx: self.adx,
            trend: self.trend,
            ofi: self.ofi,
        }
    }
}

/// Market conditions captured with a trade, used for similarity search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketConditions {
    pub rsi: f64,
    pub adx: f64,
    pub trend: TrendBias,
    pub ofi: f64,
}

impl MarketConditions {
    /// Normalized feature vector [RSI, ADX, trend, tanh(OFI)]
    pub fn features(&self) -> [f64; 4] {
        [
            (self.rsi / 100.0).clamp(0.0, 1.0),
            (self.adx / 100.0).clamp(0.0, 1.0),
            self.trend.to_unit(),
            self.ofi.tanh(),
        ]
    }

    pub fn distance(&self, other: &MarketConditions) -> f64 {
        let a = self.features();
        let b = other.features();
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y).powi(2))
            .sum::<f64>()
            .sqrt()
    }
}

/// One predictor's opinion for one cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictorVote {
    pub provider: String,
    pub model: String,
    pub action: Action,
    pub confidence: f64,
    pub rationale: String,
    #[serde(with = "duration_ms")]
    pub latency: Duration,
}

impl PredictorVote {
    pub fn new(
        provider: impl Into<String>,
        model: impl Into<String>,
        action: Action,
        confidence: f64,
        rationale: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            action,
            confidence: sanitize_confidence(confidence),
            rationale: rationale.into(),
            latency: Duration::ZERO,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

/// Aggregated committee signal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusSignal {
    pub action: Action,
    /// Mean confidence of the voters that chose `action`, [0, 1]
    pub confidence: f64,
    /// Share of voters agreeing with `action`, (0, 100]
    pub consensus_score: f64,
    pub models: Vec<String>,
    pub rationale: String,
    pub buy_votes: usize,
    pub sell_votes: usize,
    pub hold_votes: usize,
}

impl ConsensusSignal {
    pub fn total_votes(&self) -> usize {
        self.buy_votes + self.sell_votes + self.hold_votes
    }
}

/// Outcome of the risk guardian
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskVerdict {
    pub allowed: bool,
    pub action: Action,
    pub reason: String,
    pub halt: bool,
    /// Set when the guardian proposes its own action instead of vetoing
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl RiskVerdict {
    pub fn allow(action: Action, reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            action,
            reason: reason.into(),
            halt: false,
            confidence: None,
        }
    }

    pub fn hold(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            action: Action::Hold,
            reason: reason.into(),
            halt: false,
            confidence: None,
        }
    }
}

/// Position size recommendation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingResult {
    pub notional: f64,
    /// Rounded down to the instrument's lot step
    pub quantity: Decimal,
    pub stop_loss_price: f64,
    pub take_profit_price: f64,
    pub leverage: u32,
    pub win_rate: f64,
    pub kelly_fraction: f64,
}

/// Result of a closed (or still open) trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeOutcome {
    Win,
    Loss,
    Breakeven,
    Pending,
}

impl TradeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeOutcome::Win => "WIN",
            TradeOutcome::Loss => "LOSS",
            TradeOutcome::Breakeven => "BREAKEVEN",
            TradeOutcome::Pending => "PENDING",
        }
    }

    pub fn from_str_lossy(raw: &str) -> Self {
        match raw {
            "WIN" => TradeOutcome::Win,
            "LOSS" => TradeOutcome::Loss,
            "BREAKEVEN" => TradeOutcome::Breakeven,
            _ => TradeOutcome::Pending,
        }
    }
}

/// Decision memory used by the win-rate estimator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeMemory {
    pub id: Option<i64>,
    pub symbol: String,
    pub conditions: MarketConditions,
    pub action: Action,
    pub confidence: f64,
    pub outcome: TradeOutcome,
    pub pnl_pct: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// Clamp to [0, 1], mapping NaN to 0.
pub fn sanitize_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
