use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse market classification from a price sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketRegime {
    /// Directional move up with efficient price travel
    TrendingUp,
    TrendingDown,
    /// Choppy, low efficiency
    Ranging,
    /// Large return dispersion
    Volatile,
    /// Tight, quiet market
    Calm,
    /// Not enough data
    Unknown,
}

impl MarketRegime {
    pub fn label(&self) -> &'static str {
        match self {
            MarketRegime::TrendingUp => "TRENDING_UP",
            MarketRegime::TrendingDown => "TRENDING_DOWN",
            MarketRegime::Ranging => "RANGING",
            MarketRegime::Volatile => "VOLATILE",
            MarketRegime::Calm => "CALM",
            MarketRegime::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeMetrics {
    /// Standard deviation of simple returns
    pub volatility: f64,
    /// Regression slope normalized by the mean price
    pub drift: f64,
    /// Net move / total path length, 0..1
    pub efficiency: f64,
    pub sample_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeThresholds {
    pub min_samples: usize,
    pub volatile_above: f64,
    pub calm_below: f64,
    pub trend_drift: f64,
    pub trend_efficiency: f64,
    pub range_efficiency: f64,
}

impl Default for RegimeThresholds {
    fn default() -> Self {
        Self {
            min_samples: 20,
            volatile_above: 0.03,
            calm_below: 0.002,
            trend_drift: 0.001,
            trend_efficiency: 0.4,
            range_efficiency: 0.25,
        }
    }
}

pub fn metrics(prices: &[f64]) -> RegimeMetrics {
    RegimeMetrics {
        volatility: volatility(prices),
        drift: drift(prices),
        efficiency: efficiency(prices),
        sample_size: prices.len(),
    }
}

fn returns(prices: &[f64]) -> Vec<f64> {
    prices
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect()
}

fn volatility(prices: &[f64]) -> f64 {
    let returns = returns(prices);
    if returns.len() < 2 {
        return 0.0;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
    variance.sqrt()
}

/// Least-squares slope per sample, divided by the mean price
fn drift(prices: &[f64]) -> f64 {
    let n = prices.len();
    if n < 2 {
        return 0.0;
    }
    let nf = n as f64;
    let sum_x: f64 = (0..n).map(|i| i as f64).sum();
    let sum_y: f64 = prices.iter().sum();
    let sum_xy: f64 = prices.iter().enumerate().map(|(i, p)| i as f64 * p).sum();
    let sum_x2: f64 = (0..n).map(|i| (i * i) as f64).sum();

    let denom = nf * sum_x2 - sum_x * sum_x;
    let mean = sum_y / nf;
    if denom == 0.0 || mean <= 0.0 {
        return 0.0;
    }
    (nf * sum_xy - sum_x * sum_y) / denom / mean
}

fn efficiency(prices: &[f64]) -> f64 {
    let (Some(first), Some(last)) = (prices.first(), prices.last()) else {
        return 0.0;
    };
    let path: f64 = prices.windows(2).map(|w| (w[1] - w[0]).abs()).sum();
    if path == 0.0 {
        return 0.0;
    }
    (last - first).abs() / path
}

/// Rule-based classification. Pure: same prices, same answer.
pub fn classify(prices: &[f64], thresholds: &RegimeThresholds) -> (MarketRegime, RegimeMetrics) {
    let m = metrics(prices);
    if m.sample_size < thresholds.min_samples {
        return (MarketRegime::Unknown, m);
    }

    let regime = if m.volatility > thresholds.volatile_above {
        MarketRegime::Volatile
    } else if m.drift > thresholds.trend_drift && m.efficiency > thresholds.trend_efficiency {
        MarketRegime::TrendingUp
    } else if m.drift < -thresholds.trend_drift && m.efficiency > thresholds.trend_efficiency {
        MarketRegime::TrendingDown
    } else if m.volatility < thresholds.calm_below {
        MarketRegime::Calm
    } else if m.efficiency < thresholds.range_efficiency {
        MarketRegime::Ranging
    } else {
        MarketRegime::Calm
    };

    (regime, m)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(count: usize, start: f64, step: f64) -> Vec<f64> {
        (0..count).map(|i| start + step * i as f64).collect()
    }

    #[test]
    fn test_uptrend_detection() {
        let (regime, m) = classify(&line(60, 100.0, 0.5), &RegimeThresholds::default());
        assert_eq!(regime, MarketRegime::TrendingUp);
        assert!(m.drift > 0.0);
        assert!((m.efficiency - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_downtrend_detection() {
        let (regime, _) = classify(&line(60, 200.0, -0.5), &RegimeThresholds::default());
        assert_eq!(regime, MarketRegime::TrendingDown);
    }

    #[test]
    fn test_whipsaw_is_volatile() {
        let prices: Vec<f64> = (0..40).map(|i| if i % 2 == 0 { 100.0 } else { 106.0 }).collect();
        let (regime, _) = classify(&prices, &RegimeThresholds::default());
        assert_eq!(regime, MarketRegime::Volatile);
    }

    #[test]
    fn test_chop_is_ranging() {
        let prices: Vec<f64> = (0..40).map(|i| if i % 2 == 0 { 100.0 } else { 100.8 }).collect();
        let (regime, _) = classify(&prices, &RegimeThresholds::default());
        assert_eq!(regime, MarketRegime::Ranging);
    }

    #[test]
    fn test_insufficient_data() {
        let (regime, m) = classify(&line(5, 100.0, 1.0), &RegimeThresholds::default());
        assert_eq!(regime, MarketRegime::Unknown);
        assert_eq!(m.sample_size, 5);
    }
}
