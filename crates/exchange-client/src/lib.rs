pub mod connect;
pub mod error;
pub mod gateway;
pub mod market_data;
pub mod models;
pub mod paper;

use async_trait::async_trait;
use trading_core::{Candle, OrderBook, Side};

pub use connect::{connect_with_fallback, ConnectPolicy, Connection};
pub use error::{ExchangeError, ExchangeResult};
pub use gateway::GatewayExchange;
pub use market_data::{FixedPrices, MarketDataSource, PublicRestSource};
pub use models::*;
pub use paper::{PaperConfig, PaperExchange};

/// Everything the trading core needs from a venue. Implementations own the
/// wire format; the core only sees these types.
#[async_trait]
pub trait Exchange: Send + Sync {
    fn name(&self) -> &str;

    /// True for the simulated ledger
    fn is_simulated(&self) -> bool {
        false
    }

    async fn ticker(&self, symbol: &str) -> ExchangeResult<Ticker>;

    async fn order_book(&self, symbol: &str, depth: usize) -> ExchangeResult<OrderBook>;

    async fn candles(&self, symbol: &str, interval: &str, limit: usize) -> ExchangeResult<Vec<Candle>>;

    async fn account(&self) -> ExchangeResult<AccountBalance>;

    async fn positions(&self) -> ExchangeResult<Vec<LivePosition>>;

    async fn place_order(&self, request: &OrderRequest) -> ExchangeResult<Order>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> ExchangeResult<()>;

    async fn open_orders(&self, symbol: Option<&str>) -> ExchangeResult<Vec<Order>>;

    /// Close the whole `side` position on `symbol` at market.
    async fn flash_close(&self, symbol: &str, side: Side) -> ExchangeResult<Order>;

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> ExchangeResult<()>;

    async fn lot_spec(&self, symbol: &str) -> ExchangeResult<LotSpec>;
}
