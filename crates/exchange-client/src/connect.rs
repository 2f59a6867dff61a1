use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use crate::models::AccountBalance;
use crate::Exchange;

#[derive(Debug, Clone)]
pub struct ConnectPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for ConnectPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(5),
        }
    }
}

pub struct Connection {
    pub exchange: Arc<dyn Exchange>,
    pub balance: AccountBalance,
    /// Primary unreachable, running on the simulated ledger
    pub fell_back: bool,
}

/// Fetch the balance from `primary`, retrying per `policy`. When every
/// attempt fails the process continues on `fallback` instead of exiting.
pub async fn connect_with_fallback(
    primary: Option<Arc<dyn Exchange>>,
    fallback: Arc<dyn Exchange>,
    policy: &ConnectPolicy,
) -> Result<Connection> {
    if let Some(primary) = primary {
        for attempt in 1..=policy.attempts.max(1) {
            match primary.account().await {
                Ok(balance) => {
                    tracing::info!(
                        "Connected to {} (equity {:.2}, available {:.2})",
                        primary.name(),
                        balance.equity,
                        balance.available
                    );
                    return Ok(Connection {
                        exchange: primary,
                        balance,
                        fell_back: false,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        "Balance fetch from {} failed (attempt {}/{}): {}",
                        primary.name(),
                        attempt,
                        policy.attempts,
                        e
                    );
                    if attempt < policy.attempts {
                        tokio::time::sleep(policy.delay).await;
                    }
                }
            }
        }
        tracing::error!("{} unreachable, falling back to {}", primary.name(), fallback.name());
    }

    let balance = fallback
        .account()
        .await
        .with_context(|| format!("fallback exchange {} unavailable", fallback.name()))?;
    Ok(Connection {
        exchange: fallback,
        balance,
        fell_back: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ExchangeError, ExchangeResult};
    use crate::market_data::FixedPrices;
    use crate::models::*;
    use crate::paper::{PaperConfig, PaperExchange};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use trading_core::{Candle, OrderBook, Side};

    /// Venue whose balance endpoint always fails
    struct Down {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Exchange for Down {
        fn name(&self) -> &str {
            "down"
        }
        async fn ticker(&self, _: &str) -> ExchangeResult<Ticker> {
            Err(ExchangeError::Other("down".into()))
        }
        async fn order_book(&self, _: &str, _: usize) -> ExchangeResult<OrderBook> {
            Err(ExchangeError::Other("down".into()))
        }
        async fn candles(&self, _: &str, _: &str, _: usize) -> ExchangeResult<Vec<Candle>> {
            Err(ExchangeError::Other("down".into()))
        }
        async fn account(&self) -> ExchangeResult<AccountBalance> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ExchangeError::Other("down".into()))
        }
        async fn positions(&self) -> ExchangeResult<Vec<LivePosition>> {
            Ok(vec![])
        }
        async fn place_order(&self, _: &OrderRequest) -> ExchangeResult<Order> {
            Err(ExchangeError::Other("down".into()))
        }
        async fn cancel_order(&self, _: &str, _: &str) -> ExchangeResult<()> {
            Ok(())
        }
        async fn open_orders(&self, _: Option<&str>) -> ExchangeResult<Vec<Order>> {
            Ok(vec![])
        }
        async fn flash_close(&self, symbol: &str, _: Side) -> ExchangeResult<Order> {
            Err(ExchangeError::NoPosition(symbol.into()))
        }
        async fn set_leverage(&self, _: &str, _: u32) -> ExchangeResult<()> {
            Ok(())
        }
        async fn lot_spec(&self, _: &str) -> ExchangeResult<LotSpec> {
            Err(ExchangeError::Other("down".into()))
        }
    }

    fn paper() -> Arc<dyn Exchange> {
        Arc::new(PaperExchange::new(
            PaperConfig::default(),
            Arc::new(FixedPrices::new([("BTCUSDT", 100.0)])),
        ))
    }

    #[tokio::test]
    async fn test_falls_back_after_retries() {
        let down = Arc::new(Down {
            calls: AtomicU32::new(0),
        });
        let policy = ConnectPolicy {
            attempts: 3,
            delay: Duration::from_millis(1),
        };
        let connection = connect_with_fallback(Some(down.clone() as Arc<dyn Exchange>), paper(), &policy)
            .await
            .unwrap();

        assert!(connection.fell_back);
        assert!(connection.exchange.is_simulated());
        assert_eq!(connection.balance.equity, 1_000.0);
        assert_eq!(down.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_uses_primary_when_healthy() {
        let connection = connect_with_fallback(Some(paper()), paper(), &ConnectPolicy::default())
            .await
            .unwrap();
        assert!(!connection.fell_back);
    }

    #[tokio::test]
    async fn test_no_primary_goes_straight_to_paper() {
        let connection = connect_with_fallback(None, paper(), &ConnectPolicy::default())
            .await
            .unwrap();
        assert!(connection.fell_back);
    }
}
