use consensus_aggregator::{AppliedModifier, ModifierChain};
use risk_manager::{GuardianInput, RiskGuardian};
use serde::Serialize;
use std::fmt;
use trading_core::{Action, ConsensusSignal, MarketContext};

/// Stage that produced (or last replaced) the decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Consensus,
    Modifiers,
    ConfidenceGate,
    Guardian,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Consensus => "consensus",
            Stage::Modifiers => "modifiers",
            Stage::ConfidenceGate => "confidence_gate",
            Stage::Guardian => "guardian",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub action: Action,
    pub confidence: f64,
    pub stage: Stage,
    pub reason: String,
}

/// What one stage saw and whether it changed the decision
#[derive(Debug, Clone, Serialize)]
pub struct TrailEntry {
    pub stage: Stage,
    pub action: Action,
    pub confidence: f64,
    pub replaced: bool,
    pub note: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub decision: Decision,
    pub trail: Vec<TrailEntry>,
    pub applied: Vec<AppliedModifier>,
    /// The guardian asked for a session halt
    pub halt: bool,
}

impl PipelineResult {
    /// One-line audit string for the ledger and the log
    pub fn summary(&self) -> String {
        let path: Vec<String> = self
            .trail
            .iter()
            .map(|t| format!("{}:{}@{:.2}{}", t.stage, t.action, t.confidence, if t.replaced { "*" } else { "" }))
            .collect();
        format!("{} [{}] {}", self.decision.stage, path.join(" > "), self.decision.reason)
    }
}

/// Session facts the guardian needs beyond the market snapshot
#[derive(Debug, Clone, Copy)]
pub struct GuardianFacts {
    /// Preliminary notional of the proposed entry
    pub size: f64,
    pub open_positions: usize,
    pub halted: bool,
    pub daily_loss_pct: f64,
}

/// Priority-ordered overrides: consensus, confidence modifiers, the
/// min-confidence gate, then guardian arbitration. Each stage either passes
/// the current decision through or replaces it.
pub struct DecisionPipeline {
    modifiers: ModifierChain,
    guardian: RiskGuardian,
    min_confidence: f64,
}

impl DecisionPipeline {
    pub fn new(modifiers: ModifierChain, guardian: RiskGuardian, min_confidence: f64) -> Self {
        Self {
            modifiers,
            guardian,
            min_confidence,
        }
    }

    pub fn run(&self, signal: ConsensusSignal, ctx: &MarketContext, facts: &GuardianFacts) -> PipelineResult {
        let mut trail = Vec::with_capacity(4);
        let mut decision = Decision {
            action: signal.action,
            confidence: signal.confidence,
            stage: Stage::Consensus,
            reason: format!(
                "{}/{} voters ({:.0}% consensus)",
                match signal.action {
                    Action::Buy => signal.buy_votes,
                    Action::Sell => signal.sell_votes,
                    Action::Hold => signal.hold_votes,
                },
                signal.total_votes(),
                signal.consensus_score
            ),
        };
        trail.push(TrailEntry {
            stage: Stage::Consensus,
            action: decision.action,
            confidence: decision.confidence,
            replaced: true,
            note: signal.rationale.clone(),
        });

        // Modifiers
        let (modified, applied) = self.modifiers.apply(signal, ctx);
        let changed = !applied.is_empty();
        if changed {
            decision.confidence = modified.confidence;
            decision.stage = Stage::Modifiers;
        }
        trail.push(TrailEntry {
            stage: Stage::Modifiers,
            action: decision.action,
            confidence: decision.confidence,
            replaced: changed,
            note: applied
                .iter()
                .map(|m| format!("{} x{:.3}", m.name, m.factor))
                .collect::<Vec<_>>()
                .join(", "),
        });

        // Min-confidence gate
        let gated = decision.action.is_entry() && decision.confidence < self.min_confidence;
        if gated {
            decision = Decision {
                action: Action::Hold,
                confidence: decision.confidence,
                stage: Stage::ConfidenceGate,
                reason: format!(
                    "confidence {:.2} below minimum {:.2}",
                    decision.confidence, self.min_confidence
                ),
            };
        }
        trail.push(TrailEntry {
            stage: Stage::ConfidenceGate,
            action: decision.action,
            confidence: decision.confidence,
            replaced: gated,
            note: format!("min {:.2}", self.min_confidence),
        });

        // Guardian arbitration. Runs on HOLD too so a halt is always seen.
        let verdict = self.guardian.validate(&GuardianInput {
            action: decision.action,
            size: facts.size,
            volatility: ctx.atr_pct,
            ofi: ctx.ofi,
            trend: ctx.trend,
            adx: ctx.adx,
            rsi: ctx.rsi,
            open_positions: facts.open_positions,
            halted: facts.halted,
            daily_loss_pct: facts.daily_loss_pct,
        });

        let mut replaced = false;
        if verdict.halt || (!verdict.allowed && decision.action.is_entry()) {
            replaced = true;
            decision = Decision {
                action: Action::Hold,
                confidence: decision.confidence,
                stage: Stage::Guardian,
                reason: verdict.reason.clone(),
            };
        } else if verdict.allowed && verdict.action != decision.action && verdict.action.is_entry() {
            // Counter-proposal: higher stated confidence wins, ties to the guardian
            let guardian_confidence = verdict.confidence.unwrap_or(0.0);
            if guardian_confidence >= decision.confidence {
                replaced = true;
                decision = Decision {
                    action: verdict.action,
                    confidence: guardian_confidence,
                    stage: Stage::Guardian,
                    reason: verdict.reason.clone(),
                };
            }
        }
        trail.push(TrailEntry {
            stage: Stage::Guardian,
            action: decision.action,
            confidence: decision.confidence,
            replaced,
            note: verdict.reason,
        });

        PipelineResult {
            decision,
            trail,
            applied,
            halt: verdict.halt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use consensus_aggregator::{ModifierBounds, OrderFlowModifier};
    use risk_manager::{GuardianConfig, EMERGENCY_HALT};
    use trading_core::TrendBias;

    fn ctx(rsi: f64, ofi: f64, trend: TrendBias) -> MarketContext {
        MarketContext {
            symbol: "BTCUSDT".to_string(),
            price: 100.0,
            ofi,
            rsi,
            adx: 30.0,
            atr_pct: 1.0,
            trend,
            htf_trend: None,
            whale_imbalance: None,
            timestamp: Utc::now(),
        }
    }

    fn signal(action: Action, confidence: f64) -> ConsensusSignal {
        ConsensusSignal {
            action,
            confidence,
            consensus_score: 66.7,
            models: vec!["a".into(), "b".into(), "c".into()],
            rationale: "test".into(),
            buy_votes: if action == Action::Buy { 2 } else { 0 },
            sell_votes: if action == Action::Sell { 2 } else { 0 },
            hold_votes: 1,
        }
    }

    fn facts() -> GuardianFacts {
        GuardianFacts {
            size: 50.0,
            open_positions: 0,
            halted: false,
            daily_loss_pct: 0.0,
        }
    }

    fn pipeline(chain: ModifierChain) -> DecisionPipeline {
        DecisionPipeline::new(chain, RiskGuardian::new(GuardianConfig::default()).unwrap(), 0.6)
    }

    #[test]
    fn test_consensus_passes_through() {
        let p = pipeline(ModifierChain::new(ModifierBounds::default()));
        let result = p.run(signal(Action::Buy, 0.8), &ctx(50.0, 0.0, TrendBias::Bullish), &facts());

        assert_eq!(result.decision.action, Action::Buy);
        assert_eq!(result.decision.stage, Stage::Consensus);
        assert_eq!(result.trail.len(), 4);
        assert!(!result.halt);
    }

    #[test]
    fn test_modifier_lifts_confidence_over_gate() {
        let chain = ModifierChain::new(ModifierBounds::default()).with(Box::new(OrderFlowModifier::default()));
        let p = pipeline(chain);
        let result = p.run(signal(Action::Buy, 0.58), &ctx(50.0, 0.9, TrendBias::Bullish), &facts());

        assert_eq!(result.decision.action, Action::Buy);
        assert_eq!(result.decision.stage, Stage::Modifiers);
        assert!(result.decision.confidence > 0.58);
        assert_eq!(result.applied.len(), 1);
    }

    #[test]
    fn test_gate_turns_weak_entry_into_hold() {
        let p = pipeline(ModifierChain::new(ModifierBounds::default()));
        let result = p.run(signal(Action::Buy, 0.4), &ctx(50.0, 0.0, TrendBias::Bullish), &facts());

        assert_eq!(result.decision.action, Action::Hold);
        assert_eq!(result.decision.stage, Stage::ConfidenceGate);
    }

    #[test]
    fn test_guardian_veto_on_unconfirmed_sell() {
        let p = pipeline(ModifierChain::new(ModifierBounds::default()));
        let result = p.run(signal(Action::Sell, 0.9), &ctx(50.0, 0.3, TrendBias::Bullish), &facts());

        assert_eq!(result.decision.action, Action::Hold);
        assert_eq!(result.decision.stage, Stage::Guardian);
    }

    #[test]
    fn test_counter_proposal_wins_on_confidence() {
        let p = pipeline(ModifierChain::new(ModifierBounds::default()));
        // Default guardian counters at 0.8
        let result = p.run(signal(Action::Buy, 0.7), &ctx(92.0, 0.0, TrendBias::Bullish), &facts());
        assert_eq!(result.decision.action, Action::Sell);
        assert_eq!(result.decision.stage, Stage::Guardian);
        assert_eq!(result.decision.confidence, 0.8);

        let result = p.run(signal(Action::Buy, 0.9), &ctx(92.0, 0.0, TrendBias::Bullish), &facts());
        assert_eq!(result.decision.action, Action::Buy);
        assert_eq!(result.decision.stage, Stage::Consensus);
    }

    #[test]
    fn test_halt_applies_to_hold_too() {
        let p = pipeline(ModifierChain::new(ModifierBounds::default()));
        let halted = GuardianFacts {
            daily_loss_pct: 5.5,
            ..facts()
        };
        let result = p.run(signal(Action::Hold, 0.0), &ctx(50.0, 0.0, TrendBias::Neutral), &halted);

        assert!(result.halt);
        assert_eq!(result.decision.action, Action::Hold);
        assert!(result.decision.reason.starts_with(EMERGENCY_HALT));
        assert!(result.summary().contains("guardian"));
    }
}
