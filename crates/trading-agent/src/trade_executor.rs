use std::sync::Arc;

use chrono::{Duration, Utc};
use exchange_client::{Exchange, ExchangeError, ExchangeResult, Order, OrderRequest, OrderSide};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use trading_core::{Side, SizingResult};

/// Filled entry as the lifecycle manager needs it
#[derive(Debug, Clone)]
pub struct Execution {
    pub order_id: String,
    pub fill_price: f64,
    pub quantity: Decimal,
}

impl Execution {
    pub fn quantity_f64(&self) -> f64 {
        self.quantity.to_f64().unwrap_or(0.0)
    }
}

/// What the cycle does after an order placement failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Too many resting orders: cancel the symbol's orders and move on
    CleanupAndSkip,
    /// Venue refused the margin: give up on this symbol for the cycle
    AbortSymbol,
    /// Anything else ends the cycle
    Propagate,
}

pub fn classify_failure(error: &ExchangeError) -> FailureAction {
    match error {
        ExchangeError::OrderLimitExceeded(_) => FailureAction::CleanupAndSkip,
        ExchangeError::MarginRejected(_) => FailureAction::AbortSymbol,
        _ => FailureAction::Propagate,
    }
}

pub struct TradeExecutor {
    exchange: Arc<dyn Exchange>,
    trading_enabled: bool,
    leverage: u32,
}

impl TradeExecutor {
    pub fn new(exchange: Arc<dyn Exchange>, trading_enabled: bool, leverage: u32) -> Self {
        Self {
            exchange,
            trading_enabled,
            leverage,
        }
    }

    /// Place a market entry with stop-loss and take-profit attached.
    /// Returns `None` when trading is disabled (dry run).
    pub async fn open_position(
        &self,
        symbol: &str,
        side: Side,
        sizing: &SizingResult,
        reference_price: f64,
    ) -> ExchangeResult<Option<Execution>> {
        if !self.trading_enabled {
            tracing::info!(
                "[dry run] would open {} {} {} (~{:.2} notional)",
                side,
                sizing.quantity,
                symbol,
                sizing.notional
            );
            return Ok(None);
        }

        self.exchange.set_leverage(symbol, self.leverage).await?;

        let request = OrderRequest::market(symbol, OrderSide::opening(side), sizing.quantity)
            .with_protection(sizing.stop_loss_price, sizing.take_profit_price);

        tracing::info!(
            "Executing {} {} {} @ ~{:.4} (SL {:.4}, TP {:.4}, {}x)",
            request.side,
            sizing.quantity,
            symbol,
            reference_price,
            sizing.stop_loss_price,
            sizing.take_profit_price,
            self.leverage
        );

        let order = self.exchange.place_order(&request).await?;
        let fill_price = order.price.unwrap_or(reference_price);

        Ok(Some(Execution {
            order_id: order.id,
            fill_price,
            quantity: order.quantity,
        }))
    }

    /// Close the whole position at market. `None` when the venue has no
    /// position left to close.
    pub async fn close_position(&self, symbol: &str, side: Side) -> ExchangeResult<Option<Order>> {
        if !self.trading_enabled {
            tracing::info!("[dry run] would close {} {}", side, symbol);
            return Ok(None);
        }
        match self.exchange.flash_close(symbol, side).await {
            Ok(order) => {
                tracing::info!("Closed {} {} ({})", side, symbol, order.id);
                Ok(Some(order))
            }
            Err(ExchangeError::NoPosition(_)) => {
                tracing::warn!("{} already flat on {}", symbol, self.exchange.name());
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Cancel resting orders older than `max_age`, optionally for one
    /// symbol only. Returns how many were cancelled.
    pub async fn cancel_stale_orders(&self, symbol: Option<&str>, max_age: Duration) -> ExchangeResult<usize> {
        let cutoff = Utc::now() - max_age;
        let orders = self.exchange.open_orders(symbol).await?;

        let mut cancelled = 0;
        for order in orders.iter().filter(|o| o.created_at <= cutoff) {
            match self.exchange.cancel_order(&order.symbol, &order.id).await {
                Ok(()) => {
                    tracing::info!("Cancelled stale order {} for {}", order.id, order.symbol);
                    cancelled += 1;
                }
                Err(e) => tracing::warn!("Failed to cancel order {}: {}", order.id, e),
            }
        }
        if cancelled > 0 {
            tracing::info!("Cancelled {}/{} open orders", cancelled, orders.len());
        }
        Ok(cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exchange_client::{FixedPrices, PaperConfig, PaperExchange};
    use rust_decimal_macros::dec;

    fn paper() -> Arc<dyn Exchange> {
        let prices = Arc::new(FixedPrices::new([("BTCUSDT", 100.0)]));
        Arc::new(PaperExchange::new(PaperConfig::default(), prices))
    }

    fn sizing(quantity: Decimal) -> SizingResult {
        SizingResult {
            notional: 50.0,
            quantity,
            stop_loss_price: 98.5,
            take_profit_price: 103.0,
            leverage: 5,
            win_rate: 0.55,
            kelly_fraction: 0.05,
        }
    }

    #[tokio::test]
    async fn test_open_and_close() {
        let exchange = paper();
        let executor = TradeExecutor::new(Arc::clone(&exchange), true, 5);

        let execution = executor
            .open_position("BTCUSDT", Side::Long, &sizing(dec!(0.5)), 100.0)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(execution.quantity, dec!(0.5));
        assert_eq!(execution.fill_price, 100.0);
        assert_eq!(exchange.positions().await.unwrap().len(), 1);

        assert!(executor.close_position("BTCUSDT", Side::Long).await.unwrap().is_some());
        assert!(executor.close_position("BTCUSDT", Side::Long).await.unwrap().is_none());
        assert!(exchange.positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_places_nothing() {
        let exchange = paper();
        let executor = TradeExecutor::new(Arc::clone(&exchange), false, 5);

        let result = executor
            .open_position("BTCUSDT", Side::Long, &sizing(dec!(0.5)), 100.0)
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(exchange.positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_stale_orders() {
        let exchange = paper();
        let executor = TradeExecutor::new(Arc::clone(&exchange), true, 5);
        for price in [90.0, 91.0] {
            exchange
                .place_order(&OrderRequest::limit("BTCUSDT", OrderSide::Buy, dec!(0.1), price))
                .await
                .unwrap();
        }

        // Fresh orders survive a 15 minute cutoff
        assert_eq!(
            executor.cancel_stale_orders(None, Duration::minutes(15)).await.unwrap(),
            0
        );
        assert_eq!(
            executor
                .cancel_stale_orders(Some("BTCUSDT"), Duration::zero())
                .await
                .unwrap(),
            2
        );
        assert!(exchange.open_orders(None).await.unwrap().is_empty());
    }

    #[test]
    fn test_failure_classification() {
        assert_eq!(
            classify_failure(&ExchangeError::OrderLimitExceeded("max".into())),
            FailureAction::CleanupAndSkip
        );
        assert_eq!(
            classify_failure(&ExchangeError::MarginRejected("insufficient".into())),
            FailureAction::AbortSymbol
        );
        assert_eq!(
            classify_failure(&ExchangeError::Other("boom".into())),
            FailureAction::Propagate
        );
    }
}
