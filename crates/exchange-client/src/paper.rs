use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use trading_core::{Candle, OrderBook, Side};

use crate::error::{ExchangeError, ExchangeResult};
use crate::market_data::MarketDataSource;
use crate::models::*;
use crate::Exchange;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperConfig {
    pub starting_balance: f64,
    pub default_leverage: u32,
    pub max_open_orders: usize,
    /// Taker fee as a fraction of notional
    pub fee_rate: f64,
    pub lot_step: Decimal,
    pub min_quantity: Decimal,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            starting_balance: 1_000.0,
            default_leverage: 5,
            max_open_orders: 10,
            fee_rate: 0.0006,
            lot_step: Decimal::new(1, 3),
            min_quantity: Decimal::new(1, 3),
        }
    }
}

#[derive(Debug, Clone)]
struct PaperPosition {
    side: Side,
    quantity: Decimal,
    entry_price: f64,
    leverage: u32,
}

impl PaperPosition {
    fn qty(&self) -> f64 {
        self.quantity.to_f64().unwrap_or(0.0)
    }

    fn unrealized(&self, mark: f64) -> f64 {
        (mark - self.entry_price) * self.qty() * self.side.sign()
    }
}

#[derive(Debug, Default)]
struct Ledger {
    /// Wallet balance: deposits plus realized PnL minus fees
    wallet: f64,
    positions: HashMap<String, PaperPosition>,
    resting: Vec<Order>,
    leverage: HashMap<String, u32>,
    next_id: u64,
}

impl Ledger {
    fn order_id(&mut self) -> String {
        self.next_id += 1;
        format!("paper-{}", self.next_id)
    }
}

/// Simulated futures account. Market orders fill at the source's last
/// price; limit orders rest until cancelled.
pub struct PaperExchange {
    config: PaperConfig,
    source: Arc<dyn MarketDataSource>,
    ledger: Mutex<Ledger>,
}

impl PaperExchange {
    pub fn new(config: PaperConfig, source: Arc<dyn MarketDataSource>) -> Self {
        let ledger = Ledger {
            wallet: config.starting_balance,
            ..Default::default()
        };
        Self {
            config,
            source,
            ledger: Mutex::new(ledger),
        }
    }

    async fn marks(&self, symbols: impl Iterator<Item = String>) -> ExchangeResult<HashMap<String, f64>> {
        let mut marks = HashMap::new();
        for symbol in symbols {
            let last = self.source.ticker(&symbol).await?.last;
            marks.insert(symbol, last);
        }
        Ok(marks)
    }

    fn balance(&self, ledger: &Ledger, marks: &HashMap<String, f64>) -> AccountBalance {
        let mut equity = ledger.wallet;
        let mut locked = 0.0;
        for (symbol, p) in &ledger.positions {
            let mark = marks.get(symbol).copied().unwrap_or(p.entry_price);
            equity += p.unrealized(mark);
            locked += p.qty() * mark / p.leverage.max(1) as f64;
        }
        for order in &ledger.resting {
            let qty = order.quantity.to_f64().unwrap_or(0.0);
            let lev = ledger.leverage.get(&order.symbol).copied().unwrap_or(self.config.default_leverage);
            locked += qty * order.price.unwrap_or(0.0) / lev.max(1) as f64;
        }
        AccountBalance {
            equity,
            available: (equity - locked).max(0.0),
        }
    }

    fn fill(&self, ledger: &mut Ledger, request: &OrderRequest, price: f64, available: f64) -> ExchangeResult<Order> {
        let qty = request.quantity.to_f64().unwrap_or(0.0);
        let fee = qty * price * self.config.fee_rate;
        let leverage = ledger
            .leverage
            .get(&request.symbol)
            .copied()
            .unwrap_or(self.config.default_leverage);

        let existing = ledger.positions.get(&request.symbol).cloned();
        match existing {
            // Opposite side: reduce, close, or flip
            Some(pos) if OrderSide::closing(pos.side) == request.side => {
                let closed = request.quantity.min(pos.quantity);
                let closed_f = closed.to_f64().unwrap_or(0.0);
                ledger.wallet += (price - pos.entry_price) * closed_f * pos.side.sign() - fee;

                let remaining = pos.quantity - closed;
                let overflow = request.quantity - closed;
                if remaining > Decimal::ZERO {
                    ledger.positions.insert(
                        request.symbol.clone(),
                        PaperPosition {
                            quantity: remaining,
                            ..pos
                        },
                    );
                } else {
                    ledger.positions.remove(&request.symbol);
                    if overflow > Decimal::ZERO && !request.reduce_only {
                        ledger.positions.insert(
                            request.symbol.clone(),
                            PaperPosition {
                                side: pos.side.opposite(),
                                quantity: overflow,
                                entry_price: price,
                                leverage,
                            },
                        );
                    }
                }
            }
            _ if request.reduce_only => {
                return Err(ExchangeError::NoPosition(request.symbol.clone()));
            }
            existing => {
                let required = qty * price / leverage.max(1) as f64 + fee;
                if required > available {
                    return Err(ExchangeError::MarginRejected(format!(
                        "requires {:.2}, available {:.2}",
                        required, available
                    )));
                }
                ledger.wallet -= fee;
                let side = match request.side {
                    OrderSide::Buy => Side::Long,
                    OrderSide::Sell => Side::Short,
                };
                let merged = match existing {
                    Some(pos) => {
                        let total = pos.quantity + request.quantity;
                        let total_f = total.to_f64().unwrap_or(0.0);
                        let entry = if total_f > 0.0 {
                            (pos.entry_price * pos.qty() + price * qty) / total_f
                        } else {
                            price
                        };
                        PaperPosition {
                            side,
                            quantity: total,
                            entry_price: entry,
                            leverage,
                        }
                    }
                    None => PaperPosition {
                        side,
                        quantity: request.quantity,
                        entry_price: price,
                        leverage,
                    },
                };
                ledger.positions.insert(request.symbol.clone(), merged);
            }
        }

        Ok(Order {
            id: ledger.order_id(),
            symbol: request.symbol.clone(),
            side: request.side,
            quantity: request.quantity,
            price: Some(price),
            status: OrderStatus::Filled,
            created_at: Utc::now(),
        })
    }
}

#[async_trait]
impl Exchange for PaperExchange {
    fn name(&self) -> &str {
        "paper"
    }

    fn is_simulated(&self) -> bool {
        true
    }

    async fn ticker(&self, symbol: &str) -> ExchangeResult<Ticker> {
        self.source.ticker(symbol).await
    }

    async fn order_book(&self, symbol: &str, depth: usize) -> ExchangeResult<OrderBook> {
        self.source.order_book(symbol, depth).await
    }

    async fn candles(&self, symbol: &str, interval: &str, limit: usize) -> ExchangeResult<Vec<Candle>> {
        self.source.candles(symbol, interval, limit).await
    }

    async fn account(&self) -> ExchangeResult<AccountBalance> {
        let symbols: Vec<String> = self.ledger.lock().await.positions.keys().cloned().collect();
        let marks = self.marks(symbols.into_iter()).await?;
        let ledger = self.ledger.lock().await;
        Ok(self.balance(&ledger, &marks))
    }

    async fn positions(&self) -> ExchangeResult<Vec<LivePosition>> {
        let held: Vec<(String, PaperPosition)> = self
            .ledger
            .lock()
            .await
            .positions
            .iter()
            .map(|(s, p)| (s.clone(), p.clone()))
            .collect();
        let marks = self.marks(held.iter().map(|(s, _)| s.clone())).await?;

        Ok(held
            .into_iter()
            .map(|(symbol, p)| {
                let mark = marks.get(&symbol).copied().unwrap_or(p.entry_price);
                LivePosition {
                    unrealized_pnl: p.unrealized(mark),
                    symbol,
                    side: p.side,
                    quantity: p.quantity,
                    entry_price: p.entry_price,
                    mark_price: mark,
                    leverage: p.leverage,
                }
            })
            .collect())
    }

    async fn place_order(&self, request: &OrderRequest) -> ExchangeResult<Order> {
        if request.quantity < self.config.min_quantity {
            return Err(ExchangeError::InvalidOrder(format!(
                "quantity {} below minimum {}",
                request.quantity, self.config.min_quantity
            )));
        }
        if !(request.quantity % self.config.lot_step).is_zero() {
            return Err(ExchangeError::InvalidOrder(format!(
                "quantity {} is not a multiple of {}",
                request.quantity, self.config.lot_step
            )));
        }

        if let Some(limit) = request.limit_price {
            let mut ledger = self.ledger.lock().await;
            if ledger.resting.len() >= self.config.max_open_orders {
                return Err(ExchangeError::OrderLimitExceeded(format!(
                    "{} resting orders",
                    ledger.resting.len()
                )));
            }
            let order = Order {
                id: ledger.order_id(),
                symbol: request.symbol.clone(),
                side: request.side,
                quantity: request.quantity,
                price: Some(limit),
                status: OrderStatus::Open,
                created_at: Utc::now(),
            };
            ledger.resting.push(order.clone());
            return Ok(order);
        }

        let price = self.source.ticker(&request.symbol).await?.last;
        let symbols: Vec<String> = self.ledger.lock().await.positions.keys().cloned().collect();
        let mut marks = self.marks(symbols.into_iter()).await?;
        marks.insert(request.symbol.clone(), price);

        let mut ledger = self.ledger.lock().await;
        let available = self.balance(&ledger, &marks).available;
        let order = self.fill(&mut ledger, request, price, available)?;
        tracing::info!(
            "[paper] {} {} {} @ {:.4} (order {})",
            order.side,
            order.quantity,
            order.symbol,
            price,
            order.id
        );
        Ok(order)
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> ExchangeResult<()> {
        let mut ledger = self.ledger.lock().await;
        let before = ledger.resting.len();
        ledger.resting.retain(|o| !(o.id == order_id && o.symbol == symbol));
        if ledger.resting.len() == before {
            return Err(ExchangeError::Other(format!("order {} not found", order_id)));
        }
        Ok(())
    }

    async fn open_orders(&self, symbol: Option<&str>) -> ExchangeResult<Vec<Order>> {
        let ledger = self.ledger.lock().await;
        Ok(ledger
            .resting
            .iter()
            .filter(|o| symbol.map_or(true, |s| o.symbol == s))
            .cloned()
            .collect())
    }

    async fn flash_close(&self, symbol: &str, side: Side) -> ExchangeResult<Order> {
        let quantity = {
            let ledger = self.ledger.lock().await;
            match ledger.positions.get(symbol) {
                Some(p) if p.side == side => p.quantity,
                _ => return Err(ExchangeError::NoPosition(symbol.to_string())),
            }
        };
        let mut request = OrderRequest::market(symbol, OrderSide::closing(side), quantity);
        request.reduce_only = true;
        self.place_order(&request).await
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> ExchangeResult<()> {
        if leverage == 0 {
            return Err(ExchangeError::InvalidOrder("leverage must be at least 1".into()));
        }
        self.ledger.lock().await.leverage.insert(symbol.to_string(), leverage);
        Ok(())
    }

    async fn lot_spec(&self, _symbol: &str) -> ExchangeResult<LotSpec> {
        Ok(LotSpec {
            lot_step: self.config.lot_step,
            min_quantity: self.config.min_quantity,
        })
    }
}
