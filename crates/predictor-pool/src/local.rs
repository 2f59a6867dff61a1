//! Deterministic local predictor.
//!
//! Always answers: it is the committee member that keeps a quorum alive when
//! every cloud provider is rate-limited or down.

use async_trait::async_trait;
use std::time::{Duration, Instant};
use trading_core::{Action, MarketContext, Predictor, PredictorResult, PredictorVote, TrendBias};

/// Thresholds for the rule-based scorer
#[derive(Debug, Clone)]
pub struct RuleConfig {
    pub oversold: f64,
    pub overbought: f64,
    /// Below this RSI a BUY is kept even against a bearish trend
    pub extreme_oversold: f64,
    pub ofi_threshold: f64,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            oversold: 30.0,
            overbought: 70.0,
            extreme_oversold: 20.0,
            ofi_threshold: 0.2,
        }
    }
}

/// Rule-based RSI/trend/imbalance scorer with a trend safety filter
#[derive(Debug, Clone, Default)]
pub struct RuleGuardian {
    config: RuleConfig,
}

impl RuleGuardian {
    pub fn new(config: RuleConfig) -> Self {
        Self { config }
    }

    /// Signed score: positive favors BUY, negative favors SELL.
    pub fn score(&self, ctx: &MarketContext) -> i32 {
        let mut score = 0;

        if ctx.rsi < self.config.oversold {
            score += 2;
        } else if ctx.rsi > self.config.overbought {
            score -= 2;
        }

        score += match ctx.trend {
            TrendBias::Bullish => 1,
            TrendBias::Bearish => -1,
            TrendBias::Neutral => 0,
        };

        if ctx.ofi > self.config.ofi_threshold {
            score += 1;
        } else if ctx.ofi < -self.config.ofi_threshold {
            score -= 1;
        }

        score
    }

    /// Never catch a falling knife unless it is deeply oversold.
    pub fn blocks_buy(&self, ctx: &MarketContext) -> bool {
        ctx.trend == TrendBias::Bearish && ctx.rsi >= self.config.extreme_oversold
    }

    pub fn evaluate(&self, ctx: &MarketContext) -> (Action, f64, String) {
        let score = self.score(ctx);
        let action = if score >= 2 {
            Action::Buy
        } else if score <= -2 {
            Action::Sell
        } else {
            Action::Hold
        };
        let confidence = (0.5 + 0.1 * score.abs() as f64).min(0.9);

        if action == Action::Buy && self.blocks_buy(ctx) {
            return (
                Action::Hold,
                0.5,
                format!("BUY score {} filtered by bearish trend (RSI {:.1})", score, ctx.rsi),
            );
        }

        (action, confidence, format!("rule score {}", score))
    }
}

/// Secondary model consulted by the local predictor
pub trait PatternModel: Send + Sync {
    fn name(&self) -> &str;
    fn predict(&self, ctx: &MarketContext) -> (Action, f64);
}

/// Logistic momentum model over RSI, imbalance, trend and volatility.
#[derive(Debug, Clone)]
pub struct ImbalanceMomentumModel {
    pub bias: f64,
    pub w_rsi: f64,
    pub w_ofi: f64,
    pub w_trend: f64,
    pub w_atr: f64,
    /// Probability band around 0.5 treated as HOLD
    pub neutral_band: f64,
}

impl Default for ImbalanceMomentumModel {
    fn default() -> Self {
        Self {
            bias: 0.0,
            w_rsi: -2.5,
            w_ofi: 3.0,
            w_trend: 0.8,
            w_atr: -0.3,
            neutral_band: 0.1,
        }
    }
}

impl ImbalanceMomentumModel {
    /// Probability that price moves up
    pub fn probability_up(&self, ctx: &MarketContext) -> f64 {
        let rsi_centered = (ctx.rsi - 50.0) / 50.0;
        let z = self.bias
            + self.w_rsi * rsi_centered
            + self.w_ofi * ctx.ofi.tanh()
            + self.w_trend * ctx.trend.to_unit()
            + self.w_atr * ctx.atr_pct.max(0.0);
        1.0 / (1.0 + (-z).exp())
    }
}

impl PatternModel for ImbalanceMomentumModel {
    fn name(&self) -> &str {
        "imbalance-momentum"
    }

    fn predict(&self, ctx: &MarketContext) -> (Action, f64) {
        let p = self.probability_up(ctx);
        if p >= 0.5 + self.neutral_band {
            (Action::Buy, p)
        } else if p <= 0.5 - self.neutral_band {
            (Action::Sell, 1.0 - p)
        } else {
            (Action::Hold, 1.0 - (p - 0.5).abs() * 2.0)
        }
    }
}

/// Rule guardian plus an optional pattern model. Never returns an error.
pub struct LocalPredictor {
    guardian: RuleGuardian,
    pattern: Option<Box<dyn PatternModel>>,
    /// Pattern confidence at which it may override a neutral guardian
    pub override_confidence: f64,
    pub agreement_boost: f64,
}

impl LocalPredictor {
    pub fn new(guardian: RuleGuardian, pattern: Option<Box<dyn PatternModel>>) -> Self {
        Self {
            guardian,
            pattern,
            override_confidence: 0.75,
            agreement_boost: 0.1,
        }
    }

    /// Rule guardian only
    pub fn rules_only() -> Self {
        Self::new(RuleGuardian::default(), None)
    }

    pub fn decide(&self, ctx: &MarketContext) -> (Action, f64, String) {
        let (rule_action, rule_conf, rule_reason) = self.guardian.evaluate(ctx);
        let Some(pattern) = &self.pattern else {
            return (rule_action, rule_conf, rule_reason);
        };

        let (model_action, model_conf) = pattern.predict(ctx);

        if model_action == rule_action && rule_action.is_entry() {
            let boosted = (rule_conf.max(model_conf) + self.agreement_boost).min(0.99);
            return (
                rule_action,
                boosted,
                format!("{}; {} agrees ({:.2})", rule_reason, pattern.name(), model_conf),
            );
        }

        if rule_action == Action::Hold
            && model_action.is_entry()
            && model_conf >= self.override_confidence
            && !(model_action == Action::Buy && self.guardian.blocks_buy(ctx))
        {
            return (
                model_action,
                model_conf,
                format!("{} {} at {:.2} over neutral rules", pattern.name(), model_action, model_conf),
            );
        }

        (rule_action, rule_conf, rule_reason)
    }
}

impl Default for LocalPredictor {
    fn default() -> Self {
        Self::new(
            RuleGuardian::default(),
            Some(Box::new(ImbalanceMomentumModel::default())),
        )
    }
}

#[async_trait]
impl Predictor for LocalPredictor {
    fn name(&self) -> &str {
        "local"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(1)
    }

    async fn evaluate(&self, context: &MarketContext) -> PredictorResult<PredictorVote> {
        let started = Instant::now();
        let (action, confidence, rationale) = self.decide(context);
        let model = self
            .pattern
            .as_ref()
            .map(|p| format!("rules+{}", p.name()))
            .unwrap_or_else(|| "rules".to_string());

        Ok(PredictorVote::new("local", model, action, confidence, rationale)
            .with_latency(started.elapsed()))
    }
}
