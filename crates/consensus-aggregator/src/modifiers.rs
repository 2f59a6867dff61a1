//! Bounded post-aggregation confidence adjustments.
//!
//! Each modifier returns a raw multiplicative factor that is clamped to
//! `[1 - max_penalty, 1 + max_boost]`; the chain clamps confidence to [0, 1]
//! after every step so no ordering can push it out of range. HOLD signals
//! pass through untouched.

use serde::{Deserialize, Serialize};
use trading_core::{sanitize_confidence, Action, ConsensusSignal, MarketContext};

/// Factor bounds shared by every modifier
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModifierBounds {
    pub max_boost: f64,
    pub max_penalty: f64,
}

impl Default for ModifierBounds {
    fn default() -> Self {
        Self {
            max_boost: 0.15,
            max_penalty: 0.15,
        }
    }
}

impl ModifierBounds {
    pub fn clamp(&self, factor: f64) -> f64 {
        if !factor.is_finite() {
            return 1.0;
        }
        factor.clamp(1.0 - self.max_penalty, 1.0 + self.max_boost)
    }
}

pub trait ConfidenceModifier: Send + Sync {
    fn name(&self) -> &str;

    /// Raw factor for an entry signal; 1.0 means no opinion.
    fn factor(&self, action: Action, ctx: &MarketContext) -> f64;
}

/// Direction of an entry as +1/-1
fn direction(action: Action) -> f64 {
    match action {
        Action::Buy => 1.0,
        Action::Sell => -1.0,
        Action::Hold => 0.0,
    }
}

/// Top-of-book order-flow imbalance in the direction of the trade
#[derive(Debug, Clone)]
pub struct OrderFlowModifier {
    pub threshold: f64,
    pub strength: f64,
}

impl Default for OrderFlowModifier {
    fn default() -> Self {
        Self {
            threshold: 0.2,
            strength: 0.2,
        }
    }
}

impl ConfidenceModifier for OrderFlowModifier {
    fn name(&self) -> &str {
        "order_flow"
    }

    fn factor(&self, action: Action, ctx: &MarketContext) -> f64 {
        let aligned = ctx.ofi * direction(action);
        if aligned.abs() < self.threshold {
            return 1.0;
        }
        1.0 + self.strength * aligned.clamp(-1.0, 1.0)
    }
}

/// Agreement with the higher-timeframe trend
#[derive(Debug, Clone)]
pub struct TimeframeAlignmentModifier {
    pub aligned_boost: f64,
    pub conflict_penalty: f64,
}

impl Default for TimeframeAlignmentModifier {
    fn default() -> Self {
        Self {
            aligned_boost: 0.1,
            conflict_penalty: 0.1,
        }
    }
}

impl ConfidenceModifier for TimeframeAlignmentModifier {
    fn name(&self) -> &str {
        "timeframe_alignment"
    }

    fn factor(&self, action: Action, ctx: &MarketContext) -> f64 {
        match ctx.htf_trend {
            Some(trend) if trend.agrees_with(action) => 1.0 + self.aligned_boost,
            Some(trend) if trend.to_unit() * direction(action) < 0.0 => 1.0 - self.conflict_penalty,
            _ => 1.0,
        }
    }
}

/// Skew of outsized resting orders in the direction of the trade
#[derive(Debug, Clone)]
pub struct WhaleModifier {
    pub threshold: f64,
    pub strength: f64,
}

impl Default for WhaleModifier {
    fn default() -> Self {
        Self {
            threshold: 0.3,
            strength: 0.1,
        }
    }
}

impl ConfidenceModifier for WhaleModifier {
    fn name(&self) -> &str {
        "whale"
    }

    fn factor(&self, action: Action, ctx: &MarketContext) -> f64 {
        let Some(whale) = ctx.whale_imbalance else {
            return 1.0;
        };
        let aligned = whale * direction(action);
        if aligned >= self.threshold {
            1.0 + self.strength
        } else if aligned <= -self.threshold {
            1.0 - self.strength
        } else {
            1.0
        }
    }
}

/// Audit entry for one applied modifier
#[derive(Debug, Clone, Serialize)]
pub struct AppliedModifier {
    pub name: String,
    pub factor: f64,
    pub before: f64,
    pub after: f64,
}

/// Ordered list of modifiers
pub struct ModifierChain {
    modifiers: Vec<Box<dyn ConfidenceModifier>>,
    bounds: ModifierBounds,
}

impl ModifierChain {
    pub fn new(bounds: ModifierBounds) -> Self {
        Self {
            modifiers: Vec::new(),
            bounds,
        }
    }

    pub fn with(mut self, modifier: Box<dyn ConfidenceModifier>) -> Self {
        self.modifiers.push(modifier);
        self
    }

    /// Build from a comma separated list of names, e.g. `order_flow,whale`.
    /// Unknown names are skipped with a warning.
    pub fn from_names(names: &str, bounds: ModifierBounds) -> Self {
        let mut chain = Self::new(bounds);
        for name in names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            let modifier: Box<dyn ConfidenceModifier> = match name {
                "order_flow" => Box::new(OrderFlowModifier::default()),
                "timeframe_alignment" | "mtf" => Box::new(TimeframeAlignmentModifier::default()),
                "whale" => Box::new(WhaleModifier::default()),
                other => {
                    tracing::warn!("Unknown confidence modifier '{}', skipping", other);
                    continue;
                }
            };
            chain.modifiers.push(modifier);
        }
        chain
    }

    pub fn names(&self) -> Vec<&str> {
        self.modifiers.iter().map(|m| m.name()).collect()
    }

    /// Apply every modifier in order. Returns the adjusted signal and what
    /// each modifier did.
    pub fn apply(
        &self,
        mut signal: ConsensusSignal,
        ctx: &MarketContext,
    ) -> (ConsensusSignal, Vec<AppliedModifier>) {
        let mut applied = Vec::new();
        if !signal.action.is_entry() {
            return (signal, applied);
        }

        for modifier in &self.modifiers {
            let factor = self.bounds.clamp(modifier.factor(signal.action, ctx));
            if (factor - 1.0).abs() < f64::EPSILON {
                continue;
            }
            let before = signal.confidence;
            signal.confidence = sanitize_confidence(before * factor);
            applied.push(AppliedModifier {
                name: modifier.name().to_string(),
                factor,
                before,
                after: signal.confidence,
            });
        }

        (signal, applied)
    }
}

impl Default for ModifierChain {
    fn default() -> Self {
        Self::new(ModifierBounds::default())
            .with(Box::new(OrderFlowModifier::default()))
            .with(Box::new(TimeframeAlignmentModifier::default()))
            .with(Box::new(WhaleModifier::default()))
    }
}
