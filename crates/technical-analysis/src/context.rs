use chrono::Utc;
use trading_core::{Candle, CoreError, MarketContext, OrderBook, TrendBias};

use crate::indicators::{adx, atr_percent, ema, rsi};
use crate::order_flow::{order_flow_imbalance, whale_imbalance};

/// Indicator periods and thresholds used to build a `MarketContext`
#[derive(Debug, Clone)]
pub struct ContextConfig {
    pub rsi_period: usize,
    pub adx_period: usize,
    pub atr_period: usize,
    pub fast_ema: usize,
    pub slow_ema: usize,
    /// Minimum EMA separation (percent) before a trend is called
    pub trend_band_pct: f64,
    pub book_levels: usize,
    pub whale_multiplier: f64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            adx_period: 14,
            atr_period: 14,
            fast_ema: 20,
            slow_ema: 50,
            trend_band_pct: 0.05,
            book_levels: 10,
            whale_multiplier: 5.0,
        }
    }
}

pub struct MarketContextBuilder {
    config: ContextConfig,
}

impl MarketContextBuilder {
    pub fn new(config: ContextConfig) -> Self {
        Self { config }
    }

    /// Minimum number of candles `build` needs
    pub fn min_candles(&self) -> usize {
        (self.config.adx_period * 2 + 1)
            .max(self.config.slow_ema)
            .max(self.config.rsi_period + 1)
            .max(self.config.atr_period + 1)
    }

    /// Build the per-cycle snapshot from candles, the live price and the book.
    pub fn build(
        &self,
        symbol: &str,
        price: f64,
        candles: &[Candle],
        higher_timeframe: Option<&[Candle]>,
        book: &OrderBook,
    ) -> Result<MarketContext, CoreError> {
        if !(price.is_finite() && price > 0.0) {
            return Err(CoreError::InvalidData(format!("{symbol}: price {price}")));
        }
        if candles.len() < self.min_candles() {
            return Err(CoreError::InsufficientData(format!(
                "{}: {} candles (need {})",
                symbol,
                candles.len(),
                self.min_candles()
            )));
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

        let rsi_value = rsi(&closes, self.config.rsi_period)
            .last()
            .copied()
            .unwrap_or(50.0);
        let adx_value = adx(candles, self.config.adx_period)
            .adx
            .last()
            .copied()
            .unwrap_or(0.0);
        let atr_pct = atr_percent(candles, self.config.atr_period).unwrap_or(0.0);
        let trend = self.trend_bias(&closes, price);
        let htf_trend = higher_timeframe
            .filter(|c| c.len() >= self.config.slow_ema)
            .and_then(|c| {
                let closes: Vec<f64> = c.iter().map(|c| c.close).collect();
                closes.last().map(|last| self.trend_bias(&closes, *last))
            });

        Ok(MarketContext {
            symbol: symbol.to_string(),
            price,
            ofi: order_flow_imbalance(book, self.config.book_levels),
            rsi: rsi_value.clamp(0.0, 100.0),
            adx: adx_value,
            atr_pct,
            trend,
            htf_trend,
            whale_imbalance: whale_imbalance(
                book,
                self.config.book_levels,
                self.config.whale_multiplier,
            ),
            timestamp: Utc::now(),
        })
    }

    /// Fast/slow EMA crossover with a dead band, confirmed by price location.
    pub fn trend_bias(&self, closes: &[f64], price: f64) -> TrendBias {
        let fast = ema(closes, self.config.fast_ema).last().copied();
        let slow = ema(closes, self.config.slow_ema).last().copied();
        let (Some(fast), Some(slow)) = (fast, slow) else {
            return TrendBias::Neutral;
        };
        if slow <= 0.0 {
            return TrendBias::Neutral;
        }

        let spread_pct = (fast - slow) / slow * 100.0;
        if spread_pct > self.config.trend_band_pct && price >= fast {
            TrendBias::Bullish
        } else if spread_pct < -self.config.trend_band_pct && price <= fast {
            TrendBias::Bearish
        } else {
            TrendBias::Neutral
        }
    }
}

impl Default for MarketContextBuilder {
    fn default() -> Self {
        Self::new(ContextConfig::default())
    }
}
