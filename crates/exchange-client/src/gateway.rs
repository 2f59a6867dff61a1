use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use trading_core::{Candle, OrderBook, Side};

use crate::error::{ExchangeError, ExchangeResult};
use crate::models::*;
use crate::Exchange;

/// Client for an order gateway that owns venue authentication and request
/// signing. Speaks plain JSON over HTTP.
pub struct GatewayExchange {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl GatewayExchange {
    pub fn new(base_url: impl Into<String>, token: Option<String>, timeout: Duration) -> ExchangeResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Create from EXCHANGE_GATEWAY_URL / EXCHANGE_GATEWAY_TOKEN, if configured.
    pub fn from_env(timeout: Duration) -> Option<ExchangeResult<Self>> {
        let base_url = std::env::var("EXCHANGE_GATEWAY_URL").ok()?;
        let token = std::env::var("EXCHANGE_GATEWAY_TOKEN").ok();
        Some(Self::new(base_url, token, timeout))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> ExchangeResult<T> {
        let response = self.authed(request).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ExchangeError::classify(format!("{}: {}", status, body)));
        }
        Ok(response.json::<T>().await?)
    }

    async fn send_empty(&self, request: RequestBuilder) -> ExchangeResult<()> {
        let response = self.authed(request).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ExchangeError::classify(format!("{}: {}", status, body)));
        }
        Ok(())
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> ExchangeResult<T> {
        self.send(self.client.post(self.url(path)).json(body)).await
    }
}

#[async_trait]
impl Exchange for GatewayExchange {
    fn name(&self) -> &str {
        "gateway"
    }

    async fn ticker(&self, symbol: &str) -> ExchangeResult<Ticker> {
        self.send(self.client.get(self.url(&format!("/ticker/{}", symbol))))
            .await
    }

    async fn order_book(&self, symbol: &str, depth: usize) -> ExchangeResult<OrderBook> {
        self.send(
            self.client
                .get(self.url(&format!("/orderbook/{}", symbol)))
                .query(&[("depth", depth)]),
        )
        .await
    }

    async fn candles(&self, symbol: &str, interval: &str, limit: usize) -> ExchangeResult<Vec<Candle>> {
        self.send(
            self.client
                .get(self.url(&format!("/candles/{}", symbol)))
                .query(&[("interval", interval.to_string()), ("limit", limit.to_string())]),
        )
        .await
    }

    async fn account(&self) -> ExchangeResult<AccountBalance> {
        self.send(self.client.get(self.url("/account"))).await
    }

    async fn positions(&self) -> ExchangeResult<Vec<LivePosition>> {
        self.send(self.client.get(self.url("/positions"))).await
    }

    async fn place_order(&self, request: &OrderRequest) -> ExchangeResult<Order> {
        self.post("/orders", request).await
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> ExchangeResult<()> {
        self.send_empty(
            self.client
                .delete(self.url(&format!("/orders/{}/{}", symbol, order_id))),
        )
        .await
    }

    async fn open_orders(&self, symbol: Option<&str>) -> ExchangeResult<Vec<Order>> {
        let mut request = self.client.get(self.url("/orders"));
        if let Some(symbol) = symbol {
            request = request.query(&[("symbol", symbol)]);
        }
        self.send(request).await
    }

    async fn flash_close(&self, symbol: &str, side: Side) -> ExchangeResult<Order> {
        self.post(&format!("/positions/{}/close", symbol), &json!({ "side": side }))
            .await
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> ExchangeResult<()> {
        self.send_empty(
            self.client
                .post(self.url("/leverage"))
                .json(&json!({ "symbol": symbol, "leverage": leverage })),
        )
        .await
    }

    async fn lot_spec(&self, symbol: &str) -> ExchangeResult<LotSpec> {
        self.send(self.client.get(self.url(&format!("/instruments/{}", symbol))))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_normalized() {
        let gateway = GatewayExchange::new("http://localhost:9000/", None, Duration::from_secs(5)).unwrap();
        assert_eq!(gateway.url("/account"), "http://localhost:9000/account");
    }
}
