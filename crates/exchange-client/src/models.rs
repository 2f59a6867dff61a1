use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use trading_core::Side;

// ---------------------------------------------------------------------------
// Exchange-agnostic types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub last: f64,
    pub timestamp: DateTime<Utc>,
}

/// Account equity and the margin still free for new positions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub equity: f64,
    pub available: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivePosition {
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub entry_price: f64,
    pub mark_price: f64,
    pub leverage: u32,
    pub unrealized_pnl: f64,
}

impl LivePosition {
    pub fn notional(&self) -> f64 {
        self.quantity.to_f64().unwrap_or(0.0) * self.mark_price
    }

    /// Margin locked by this position at its leverage.
    pub fn margin(&self) -> f64 {
        self.notional() / self.leverage.max(1) as f64
    }

    pub fn pnl_pct(&self) -> f64 {
        if self.entry_price <= 0.0 {
            return 0.0;
        }
        (self.mark_price - self.entry_price) / self.entry_price * 100.0 * self.side.sign()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Order side that opens a position on `side`.
    pub fn opening(side: Side) -> Self {
        match side {
            Side::Long => OrderSide::Buy,
            Side::Short => OrderSide::Sell,
        }
    }

    pub fn closing(side: Side) -> Self {
        match side {
            Side::Long => OrderSide::Sell,
            Side::Short => OrderSide::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => f.write_str("buy"),
            OrderSide::Sell => f.write_str("sell"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    /// Limit price; `None` is a market order
    pub limit_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub reduce_only: bool,
}

impl OrderRequest {
    pub fn market(symbol: impl Into<String>, side: OrderSide, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            limit_price: None,
            stop_loss: None,
            take_profit: None,
            reduce_only: false,
        }
    }

    pub fn limit(symbol: impl Into<String>, side: OrderSide, quantity: Decimal, price: f64) -> Self {
        Self {
            limit_price: Some(price),
            ..Self::market(symbol, side, quantity)
        }
    }

    pub fn with_protection(mut self, stop_loss: f64, take_profit: f64) -> Self {
        self.stop_loss = Some(stop_loss);
        self.take_profit = Some(take_profit);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Open,
    Filled,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Option<f64>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

/// Instrument trading rules
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LotSpec {
    pub lot_step: Decimal,
    pub min_quantity: Decimal,
}
