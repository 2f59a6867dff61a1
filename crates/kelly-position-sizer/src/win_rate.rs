use serde::{Deserialize, Serialize};
use trading_core::{MarketConditions, TradeMemory, TradeOutcome};

/// Blends a confidence-driven prior with outcomes of similar past trades.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WinRateEstimator {
    pub prior_base: f64,
    pub high_confidence: f64,
    pub high_confidence_bonus: f64,
    pub low_confidence: f64,
    pub low_confidence_penalty: f64,
    /// Nearest neighbours considered
    pub k: usize,
    /// Samples at which the empirical rate gets full weight
    pub full_weight_samples: usize,
}

impl Default for WinRateEstimator {
    fn default() -> Self {
        Self {
            prior_base: 0.55,
            high_confidence: 0.75,
            high_confidence_bonus: 0.05,
            low_confidence: 0.5,
            low_confidence_penalty: 0.05,
            k: 20,
            full_weight_samples: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WinRateEstimate {
    pub prior: f64,
    pub empirical: Option<f64>,
    pub samples: usize,
    /// Weight given to the empirical rate
    pub weight: f64,
    pub blended: f64,
}

impl WinRateEstimator {
    pub fn prior(&self, confidence: f64) -> f64 {
        let p = if confidence >= self.high_confidence {
            self.prior_base + self.high_confidence_bonus
        } else if confidence < self.low_confidence {
            self.prior_base - self.low_confidence_penalty
        } else {
            self.prior_base
        };
        p.clamp(0.0, 1.0)
    }

    /// Win rate among the `k` closed trades nearest to `conditions`.
    ///
    /// Only WIN and LOSS outcomes count; breakeven closes and pending trades
    /// are ignored.
    pub fn empirical(
        &self,
        conditions: &MarketConditions,
        memories: &[TradeMemory],
    ) -> Option<(f64, usize)> {
        let mut scored: Vec<(f64, bool)> = memories
            .iter()
            .filter_map(|m| match m.outcome {
                TradeOutcome::Win => Some((conditions.distance(&m.conditions), true)),
                TradeOutcome::Loss => Some((conditions.distance(&m.conditions), false)),
                _ => None,
            })
            .filter(|(d, _)| d.is_finite())
            .collect();

        if scored.is_empty() || self.k == 0 {
            return None;
        }

        scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(self.k);

        let wins = scored.iter().filter(|(_, win)| *win).count();
        Some((wins as f64 / scored.len() as f64, scored.len()))
    }

    pub fn estimate(
        &self,
        confidence: f64,
        conditions: &MarketConditions,
        memories: &[TradeMemory],
    ) -> WinRateEstimate {
        let prior = self.prior(confidence);
        let Some((empirical, samples)) = self.empirical(conditions, memories) else {
            return WinRateEstimate {
                prior,
                empirical: None,
                samples: 0,
                weight: 0.0,
                blended: prior,
            };
        };

        let weight = if self.full_weight_samples == 0 {
            1.0
        } else {
            (samples as f64 / self.full_weight_samples as f64).min(1.0)
        };
        let blended = (1.0 - weight) * prior + weight * empirical;

        log::debug!(
            "win rate: prior {:.3}, empirical {:.3} over {} samples (w={:.2}) -> {:.3}",
            prior,
            empirical,
            samples,
            weight,
            blended
        );

        WinRateEstimate {
            prior,
            empirical: Some(empirical),
            samples,
            weight,
            blended,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::Utc;
    use trading_core::{Action, TrendBias};

    fn conditions(rsi: f64) -> MarketConditions {
        MarketConditions {
            rsi,
            adx: 25.0,
            trend: TrendBias::Bullish,
            ofi: 0.1,
        }
    }

    fn memory(rsi: f64, outcome: TradeOutcome) -> TradeMemory {
        TradeMemory {
            id: None,
            symbol: "BTCUSDT".into(),
            conditions: conditions(rsi),
            action: Action::Buy,
            confidence: 0.7,
            outcome,
            pnl_pct: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_prior_tracks_confidence() {
        let est = WinRateEstimator::default();
        assert_relative_eq!(est.prior(0.8), 0.60);
        assert_relative_eq!(est.prior(0.6), 0.55);
        assert_relative_eq!(est.prior(0.4), 0.50);
    }

    #[test]
    fn test_no_history_uses_prior() {
        let est = WinRateEstimator::default().estimate(0.6, &conditions(50.0), &[]);
        assert_eq!(est.samples, 0);
        assert_relative_eq!(est.blended, 0.55);
    }

    #[test]
    fn test_partial_weight_blend() {
        // 5 wins out of 5: weight 5/20
        let memories: Vec<_> = (0..5).map(|_| memory(50.0, TradeOutcome::Win)).collect();
        let est = WinRateEstimator::default().estimate(0.6, &conditions(50.0), &memories);

        assert_relative_eq!(est.weight, 0.25);
        assert_relative_eq!(est.blended, 0.75 * 0.55 + 0.25 * 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_full_weight_after_twenty_samples() {
        let mut memories: Vec<_> = (0..12).map(|_| memory(50.0, TradeOutcome::Win)).collect();
        memories.extend((0..8).map(|_| memory(50.0, TradeOutcome::Loss)));
        let est = WinRateEstimator::default().estimate(0.9, &conditions(50.0), &memories);

        assert_relative_eq!(est.weight, 1.0);
        assert_relative_eq!(est.blended, 0.6, epsilon = 1e-12);
    }

    #[test]
    fn test_nearest_neighbours_preferred() {
        let mut memories: Vec<_> = (0..20).map(|_| memory(30.0, TradeOutcome::Win)).collect();
        memories.extend((0..20).map(|_| memory(90.0, TradeOutcome::Loss)));
        let est = WinRateEstimator::default().estimate(0.6, &conditions(32.0), &memories);

        assert_eq!(est.samples, 20);
        assert_relative_eq!(est.empirical.unwrap(), 1.0);
    }

    #[test]
    fn test_breakeven_and_pending_ignored() {
        let memories = vec![
            memory(50.0, TradeOutcome::Breakeven),
            memory(50.0, TradeOutcome::Pending),
            memory(50.0, TradeOutcome::Loss),
        ];
        let est = WinRateEstimator::default().estimate(0.6, &conditions(50.0), &memories);
        assert_eq!(est.samples, 1);
        assert_relative_eq!(est.empirical.unwrap(), 0.0);
    }
}
