#[cfg(test)]
mod tests {
    use crate::context::{ContextConfig, MarketContextBuilder};
    use crate::indicators::*;
    use chrono::Utc;
    use trading_core::{BookLevel, Candle, CoreError, OrderBook, TrendBias};

    // Helper function to create sample price data
    fn sample_prices() -> Vec<f64> {
        vec![
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.42, 45.84, 46.08,
            45.89, 46.03, 45.61, 46.28, 46.28, 46.00, 46.03, 46.41, 46.22, 45.64,
        ]
    }

    // Candles on a straight line with a fixed high/low range
    fn trending_candles(count: usize, start: f64, step: f64, range: f64) -> Vec<Candle> {
        (0..count)
            .map(|i| {
                let close = start + step * i as f64;
                Candle {
                    timestamp: Utc::now() - chrono::Duration::minutes((count - i) as i64 * 15),
                    open: close - step,
                    high: close + range,
                    low: close - range,
                    close,
                    volume: 1_000.0,
                }
            })
            .collect()
    }

    fn flat_book() -> OrderBook {
        OrderBook {
            bids: vec![BookLevel { price: 99.9, size: 10.0 }],
            asks: vec![BookLevel { price: 100.1, size: 10.0 }],
        }
    }

    #[test]
    fn test_ema_basic() {
        let data = sample_prices();
        let result = ema(&data, 10);

        // One seed value plus one per remaining point
        assert_eq!(result.len(), data.len() - 10 + 1);
        let first_sma: f64 = data[..10].iter().sum::<f64>() / 10.0;
        assert!((result[0] - first_sma).abs() < 0.01);
    }

    #[test]
    fn test_ema_empty_data() {
        assert!(ema(&[], 10).is_empty());
    }

    #[test]
    fn test_ema_increases_with_uptrend() {
        let data: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let result = ema(&data, 5);

        for i in 1..result.len() {
            assert!(result[i] > result[i - 1]);
        }
    }

    #[test]
    fn test_rsi_bounds() {
        let result = rsi(&sample_prices(), 14);

        assert!(!result.is_empty());
        for value in result {
            assert!((0.0..=100.0).contains(&value));
        }
    }

    #[test]
    fn test_rsi_insufficient_data() {
        assert!(rsi(&[1.0, 2.0, 3.0], 14).is_empty());
    }

    #[test]
    fn test_rsi_overbought_on_steady_rise() {
        let data: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let result = rsi(&data, 14);
        assert!(*result.last().unwrap() > 70.0);
    }

    #[test]
    fn test_rsi_flat_series_is_neutral() {
        let data = vec![100.0; 30];
        assert_eq!(*rsi(&data, 14).last().unwrap(), 50.0);
    }

    #[test]
    fn test_atr_increases_with_volatility() {
        let calm = trending_candles(30, 100.0, 0.1, 0.5);
        let wild = trending_candles(30, 100.0, 0.1, 3.0);

        let calm_atr = atr(&calm, 14);
        let wild_atr = atr(&wild, 14);
        assert!(wild_atr.last().unwrap() > calm_atr.last().unwrap());
    }

    #[test]
    fn test_atr_percent_scales_with_price() {
        let candles = trending_candles(30, 100.0, 0.0, 1.0);
        let pct = atr_percent(&candles, 14).unwrap();
        // High-low range is 2.0 on a 100.0 close
        assert!((pct - 2.0).abs() < 0.01);
    }

    #[test]
    fn test_adx_strong_in_clean_trend() {
        let candles = trending_candles(80, 100.0, 1.0, 0.5);
        let result = adx(&candles, 14);
        assert!(!result.adx.is_empty());
        assert!(*result.adx.last().unwrap() > 40.0);
        assert!(result.plus_di.last().unwrap() > result.minus_di.last().unwrap());
    }

    #[test]
    fn test_adx_insufficient_data() {
        let candles = trending_candles(10, 100.0, 1.0, 0.5);
        assert!(adx(&candles, 14).adx.is_empty());
    }

    #[test]
    fn test_context_rejects_short_history() {
        let builder = MarketContextBuilder::default();
        let candles = trending_candles(20, 100.0, 1.0, 0.5);
        let err = builder
            .build("BTCUSDT", 120.0, &candles, None, &flat_book())
            .unwrap_err();
        assert!(matches!(err, CoreError::InsufficientData(_)));
    }

    #[test]
    fn test_context_uptrend_is_bullish() {
        let builder = MarketContextBuilder::new(ContextConfig::default());
        let candles = trending_candles(80, 100.0, 0.5, 0.4);
        let price = candles.last().unwrap().close;

        let ctx = builder
            .build("BTCUSDT", price, &candles, Some(&candles), &flat_book())
            .unwrap();

        assert_eq!(ctx.trend, TrendBias::Bullish);
        assert_eq!(ctx.htf_trend, Some(TrendBias::Bullish));
        assert!(ctx.rsi > 50.0);
        assert_eq!(ctx.ofi, 0.0);
    }

    #[test]
    fn test_context_downtrend_is_bearish() {
        let builder = MarketContextBuilder::default();
        let candles = trending_candles(80, 200.0, -0.5, 0.4);
        let price = candles.last().unwrap().close;

        let ctx = builder
            .build("ETHUSDT", price, &candles, None, &flat_book())
            .unwrap();

        assert_eq!(ctx.trend, TrendBias::Bearish);
        assert!(ctx.htf_trend.is_none());
    }
}
