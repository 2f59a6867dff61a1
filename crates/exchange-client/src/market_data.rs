use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use trading_core::{BookLevel, Candle, OrderBook};

use crate::error::{ExchangeError, ExchangeResult};
use crate::models::Ticker;

/// Price feed behind the simulated ledger
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn ticker(&self, symbol: &str) -> ExchangeResult<Ticker>;
    async fn order_book(&self, symbol: &str, depth: usize) -> ExchangeResult<OrderBook>;
    async fn candles(&self, symbol: &str, interval: &str, limit: usize) -> ExchangeResult<Vec<Candle>>;
}

// ---------------------------------------------------------------------------
// Unauthenticated public futures REST endpoints
// ---------------------------------------------------------------------------

pub struct PublicRestSource {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    price: String,
}

#[derive(Debug, Deserialize)]
struct DepthResponse {
    bids: Vec<(String, String)>,
    asks: Vec<(String, String)>,
}

impl PublicRestSource {
    pub const DEFAULT_BASE_URL: &'static str = "https://fapi.binance.com";

    pub fn new(base_url: impl Into<String>, timeout: Duration) -> ExchangeResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> ExchangeResult<T> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .query(query)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ExchangeError::Other(format!("market data {}: {}", status, body)));
        }
        Ok(response.json::<T>().await?)
    }
}

fn parse_num(raw: &str) -> ExchangeResult<f64> {
    raw.parse::<f64>()
        .map_err(|_| ExchangeError::Other(format!("bad number {:?}", raw)))
}

fn levels(raw: &[(String, String)]) -> ExchangeResult<Vec<BookLevel>> {
    raw.iter()
        .map(|(p, s)| {
            Ok(BookLevel {
                price: parse_num(p)?,
                size: parse_num(s)?,
            })
        })
        .collect()
}

/// Kline rows are positional arrays: open time, open, high, low, close, volume, ...
pub(crate) fn candle_from_row(row: &Value) -> Option<Candle> {
    let cells = row.as_array()?;
    let num = |i: usize| -> Option<f64> {
        match cells.get(i)? {
            Value::String(s) => s.parse().ok(),
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    };
    let open_time = cells.first()?.as_i64()?;
    Some(Candle {
        timestamp: Utc.timestamp_millis_opt(open_time).single()?,
        open: num(1)?,
        high: num(2)?,
        low: num(3)?,
        close: num(4)?,
        volume: num(5)?,
    })
}

#[async_trait]
impl MarketDataSource for PublicRestSource {
    async fn ticker(&self, symbol: &str) -> ExchangeResult<Ticker> {
        let price: PriceResponse = self
            .get("/fapi/v1/ticker/price", &[("symbol", symbol.to_string())])
            .await?;
        Ok(Ticker {
            symbol: symbol.to_string(),
            last: parse_num(&price.price)?,
            timestamp: Utc::now(),
        })
    }

    async fn order_book(&self, symbol: &str, depth: usize) -> ExchangeResult<OrderBook> {
        let depth_response: DepthResponse = self
            .get(
                "/fapi/v1/depth",
                &[("symbol", symbol.to_string()), ("limit", depth.to_string())],
            )
            .await?;
        Ok(OrderBook {
            bids: levels(&depth_response.bids)?,
            asks: levels(&depth_response.asks)?,
        })
    }

    async fn candles(&self, symbol: &str, interval: &str, limit: usize) -> ExchangeResult<Vec<Candle>> {
        let rows: Vec<Value> = self
            .get(
                "/fapi/v1/klines",
                &[
                    ("symbol", symbol.to_string()),
                    ("interval", interval.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        Ok(rows.iter().filter_map(candle_from_row).collect())
    }
}

// ---------------------------------------------------------------------------
// Fixed prices (tests, dry runs)
// ---------------------------------------------------------------------------

/// Prices set by hand. Candles oscillate gently around the current price so
/// indicators have something to chew on.
#[derive(Default)]
pub struct FixedPrices {
    prices: RwLock<HashMap<String, f64>>,
}

impl FixedPrices {
    pub fn new<I, S>(prices: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        Self {
            prices: RwLock::new(prices.into_iter().map(|(s, p)| (s.into(), p)).collect()),
        }
    }

    pub async fn set_price(&self, symbol: &str, price: f64) {
        self.prices.write().await.insert(symbol.to_string(), price);
    }

    async fn price(&self, symbol: &str) -> ExchangeResult<f64> {
        self.prices
            .read()
            .await
            .get(symbol)
            .copied()
            .ok_or_else(|| ExchangeError::UnknownSymbol(symbol.to_string()))
    }
}

#[async_trait]
impl MarketDataSource for FixedPrices {
    async fn ticker(&self, symbol: &str) -> ExchangeResult<Ticker> {
        Ok(Ticker {
            symbol: symbol.to_string(),
            last: self.price(symbol).await?,
            timestamp: Utc::now(),
        })
    }

    async fn order_book(&self, symbol: &str, depth: usize) -> ExchangeResult<OrderBook> {
        let price = self.price(symbol).await?;
        let tick = price * 0.0001;
        let level = |i: usize, sign: f64| BookLevel {
            price: price + sign * tick * (i + 1) as f64,
            size: 1.0,
        };
        Ok(OrderBook {
            bids: (0..depth).map(|i| level(i, -1.0)).collect(),
            asks: (0..depth).map(|i| level(i, 1.0)).collect(),
        })
    }

    async fn candles(&self, symbol: &str, _interval: &str, limit: usize) -> ExchangeResult<Vec<Candle>> {
        let price = self.price(symbol).await?;
        let start: DateTime<Utc> = Utc::now() - ChronoDuration::minutes(limit as i64);
        Ok((0..limit)
            .map(|i| {
                let wobble = if i % 2 == 0 { 0.001 } else { -0.001 };
                let close = if i + 1 == limit { price } else { price * (1.0 + wobble) };
                Candle {
                    timestamp: start + ChronoDuration::minutes(i as i64),
                    open: price,
                    high: close.max(price) * 1.001,
                    low: close.min(price) * 0.999,
                    close,
                    volume: 100.0,
                }
            })
            .collect())
    }
}
