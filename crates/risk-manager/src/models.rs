use serde::{Deserialize, Serialize};
use trading_core::{Action, Side, TrendBias};

/// Reserved reason for a session-wide stop
pub const EMERGENCY_HALT: &str = "EMERGENCY_HALT";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardianConfig {
    /// New entries are rejected at or above this many open positions
    pub max_open_positions: usize,
    /// Daily loss (percent of day-start equity) that halts the session
    pub daily_loss_limit_pct: f64,
    /// Largest notional a single entry may request (0 disables the check)
    pub max_trade_notional: f64,
    /// SELL confirmation: minimum trend strength
    pub sell_min_adx: f64,
    /// SELL confirmation: imbalance at or below minus this value
    pub sell_ofi_threshold: f64,
    /// RSI at which a SELL is accepted without trend confirmation
    pub rsi_extreme_overbought: f64,
    /// ATR% above which BUY entries are vetoed
    pub max_buy_atr_pct: f64,
    /// RSI readings that trigger a counter-proposal
    pub exhaustion_rsi_high: f64,
    pub exhaustion_rsi_low: f64,
    /// Confidence attached to counter-proposals
    pub exhaustion_confidence: f64,
}

impl Default for GuardianConfig {
    fn default() -> Self {
        Self {
            max_open_positions: 3,
            daily_loss_limit_pct: 5.0,
            max_trade_notional: 0.0,
            sell_min_adx: 25.0,
            sell_ofi_threshold: 0.2,
            rsi_extreme_overbought: 75.0,
            max_buy_atr_pct: 3.0,
            exhaustion_rsi_high: 88.0,
            exhaustion_rsi_low: 12.0,
            exhaustion_confidence: 0.8,
        }
    }
}

/// Everything the guardian looks at for one proposal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardianInput {
    pub action: Action,
    /// Proposed notional, 0 when not yet sized
    pub size: f64,
    /// ATR% of the symbol
    pub volatility: f64,
    pub ofi: f64,
    pub trend: TrendBias,
    pub adx: f64,
    pub rsi: f64,
    pub open_positions: usize,
    /// Halt already latched on the session
    pub halted: bool,
    pub daily_loss_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarginConfig {
    /// Available margin must stay above this percent of equity
    pub buffer_pct: f64,
}

impl Default for MarginConfig {
    fn default() -> Self {
        Self { buffer_pct: 10.0 }
    }
}

/// Open position as seen by the margin check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionExposure {
    pub symbol: String,
    pub side: Side,
    pub unrealized_pnl: f64,
    pub pnl_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarginCheck {
    pub ok: bool,
    pub available: f64,
    pub required_buffer: f64,
    /// Least-profitable position to close when the buffer is breached
    pub close_candidate: Option<String>,
    pub reason: String,
}
