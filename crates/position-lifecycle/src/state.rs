use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use trading_core::{Side, TradeOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    Open,
    BreakevenArmed,
    TrailingLocked,
    Closed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Open => "OPEN",
            LifecycleState::BreakevenArmed => "BREAKEVEN_ARMED",
            LifecycleState::TrailingLocked => "TRAILING_LOCKED",
            LifecycleState::Closed => "CLOSED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenPosition {
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    pub quantity: Decimal,
    pub state: LifecycleState,
    /// Secured PnL% once trailing is locked; only ever moves up
    pub secured_floor: Option<f64>,
    pub peak_pnl_pct: f64,
    /// TradeMemory row to finalize on close
    pub memory_id: Option<i64>,
    pub opened_at: DateTime<Utc>,
    /// Found on the exchange rather than opened by this process
    pub adopted: bool,
}

impl OpenPosition {
    pub fn new(symbol: impl Into<String>, side: Side, entry_price: f64, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            entry_price,
            quantity,
            state: LifecycleState::Open,
            secured_floor: None,
            peak_pnl_pct: 0.0,
            memory_id: None,
            opened_at: Utc::now(),
            adopted: false,
        }
    }

    pub fn with_memory(mut self, memory_id: Option<i64>) -> Self {
        self.memory_id = memory_id;
        self
    }

    /// Side-adjusted percent move from entry
    pub fn pnl_pct(&self, price: f64) -> f64 {
        if self.entry_price <= 0.0 {
            return 0.0;
        }
        (price - self.entry_price) / self.entry_price * 100.0 * self.side.sign()
    }

    pub fn is_closed(&self) -> bool {
        self.state == LifecycleState::Closed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloseReason {
    StopLoss,
    Breakeven,
    TrailingStop,
    SmartExit,
    Moonshot,
    /// Closed to free margin
    Corrective,
    /// Gone from the exchange without a close from us (venue-side stop, manual close)
    External,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CloseReason::StopLoss => "STOP_LOSS",
            CloseReason::Breakeven => "BREAKEVEN",
            CloseReason::TrailingStop => "TRAILING_STOP",
            CloseReason::SmartExit => "SMART_EXIT",
            CloseReason::Moonshot => "MOONSHOT",
            CloseReason::Corrective => "CORRECTIVE",
            CloseReason::External => "EXTERNAL",
        };
        f.write_str(s)
    }
}

/// Emitted exactly once per position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseSignal {
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub entry_price: f64,
    pub reason: CloseReason,
    pub outcome: TradeOutcome,
    pub price: f64,
    pub pnl_pct: f64,
    pub memory_id: Option<i64>,
    pub detail: String,
}

impl CloseSignal {
    /// Realized PnL in quote currency at the close price
    pub fn realized_pnl(&self) -> f64 {
        let qty = self.quantity.to_f64().unwrap_or(0.0);
        (self.price - self.entry_price) * qty * self.side.sign()
    }
}

/// Live readings for one monitoring tick
#[derive(Debug, Clone, Copy)]
pub struct Tick {
    pub price: f64,
    pub rsi: Option<f64>,
    pub adx: Option<f64>,
}

impl Tick {
    pub fn price(price: f64) -> Self {
        Self {
            price,
            rsi: None,
            adx: None,
        }
    }
}
