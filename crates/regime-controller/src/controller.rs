use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use trading_core::{RegimeMode, SessionContext};

use crate::advisor::{Advisory, MacroAdvisor};
use crate::regime::{classify, MarketRegime, RegimeMetrics, RegimeThresholds};

/// Inputs of one regime evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeInput {
    pub equity: f64,
    pub session_pnl_pct: f64,
    pub current_scaler: f64,
    pub current_mode: RegimeMode,
    pub rule_regime: MarketRegime,
    pub metrics: RegimeMetrics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionSource {
    Advisor,
    /// Advisor missing or failed: scaler left as it was
    Unchanged,
    RecoveryOverride,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeDecision {
    pub regime: String,
    pub mode: RegimeMode,
    pub scaler: f64,
    pub source: DecisionSource,
    pub reasoning: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeConfig {
    /// Session PnL% at or below which the recovery override stops applying
    pub catastrophic_floor_pct: f64,
    pub thresholds: RegimeThresholds,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            catastrophic_floor_pct: -10.0,
            thresholds: RegimeThresholds::default(),
        }
    }
}

/// Slow-cadence risk posture controller
pub struct RegimeController {
    config: RegimeConfig,
    advisor: Option<Arc<dyn MacroAdvisor>>,
}

impl RegimeController {
    pub fn new(config: RegimeConfig, advisor: Option<Arc<dyn MacroAdvisor>>) -> Self {
        Self { config, advisor }
    }

    pub fn has_advisor(&self) -> bool {
        self.advisor.is_some()
    }

    pub fn input(&self, session: &SessionContext, prices: &[f64]) -> RegimeInput {
        let (rule_regime, metrics) = classify(prices, &self.config.thresholds);
        RegimeInput {
            equity: session.equity,
            session_pnl_pct: session.session_pnl_pct,
            current_scaler: session.risk_scaler,
            current_mode: session.mode,
            rule_regime,
            metrics,
        }
    }

    /// Pure decision from the inputs and whatever the advisor said.
    pub fn decide(&self, input: &RegimeInput, advisory: Option<&Advisory>) -> RegimeDecision {
        let Some(advisory) = advisory else {
            return RegimeDecision {
                regime: input.rule_regime.label().to_string(),
                mode: input.current_mode,
                scaler: input.current_scaler,
                source: DecisionSource::Unchanged,
                reasoning: "advisor unavailable".to_string(),
            };
        };

        let pnl = input.session_pnl_pct;
        if pnl < 0.0 && pnl > self.config.catastrophic_floor_pct {
            return RegimeDecision {
                regime: advisory.regime.clone(),
                mode: RegimeMode::Normal,
                scaler: RegimeMode::Normal.scaler(),
                source: DecisionSource::RecoveryOverride,
                reasoning: format!(
                    "advisor said {} but session PnL {:+.2}% is recoverable: {}",
                    advisory.mode, pnl, advisory.reasoning
                ),
            };
        }

        RegimeDecision {
            regime: advisory.regime.clone(),
            mode: advisory.mode,
            scaler: advisory.mode.scaler(),
            source: DecisionSource::Advisor,
            reasoning: advisory.reasoning.clone(),
        }
    }

    /// Ask the advisor (if any) and decide. Advisor failures are logged.
    pub async fn evaluate(&self, input: &RegimeInput) -> RegimeDecision {
        let advisory = match &self.advisor {
            Some(advisor) => match advisor.advise(input).await {
                Ok(advisory) => Some(advisory),
                Err(e) => {
                    log::warn!("Macro advisor unavailable: {}", e);
                    None
                }
            },
            None => None,
        };
        self.decide(input, advisory.as_ref())
    }

    /// Evaluate against the session and write the result back.
    pub async fn run(&self, session: &mut SessionContext, prices: &[f64]) -> Result<RegimeDecision> {
        let input = self.input(session, prices);
        let decision = self.evaluate(&input).await;
        apply(&decision, session);
        log::info!(
            "Regime {} mode {} scaler {:.2} ({:?})",
            decision.regime,
            decision.mode,
            decision.scaler,
            decision.source
        );
        Ok(decision)
    }
}

pub fn apply(decision: &RegimeDecision, session: &mut SessionContext) {
    session.regime = decision.regime.clone();
    session.mode = decision.mode;
    session.set_risk_scaler(decision.scaler);
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use chrono::NaiveDate;

    struct Fixed(Option<Advisory>);

    #[async_trait]
    impl MacroAdvisor for Fixed {
        async fn advise(&self, _input: &RegimeInput) -> Result<Advisory> {
            self.0.clone().ok_or_else(|| anyhow!("offline"))
        }
    }

    fn advisory(mode: RegimeMode) -> Advisory {
        Advisory {
            regime: "RISK_OFF".into(),
            mode,
            reasoning: "test".into(),
        }
    }

    fn session(pnl_pct: f64) -> SessionContext {
        let mut s = SessionContext::new(1_000.0, NaiveDate::from_ymd_opt(2026, 5, 1).unwrap());
        s.refresh_equity(1_000.0 * (1.0 + pnl_pct / 100.0));
        s.set_risk_scaler(0.5);
        s.mode = RegimeMode::Defensive;
        s
    }

    fn prices() -> Vec<f64> {
        (0..30).map(|i| 100.0 + i as f64 * 0.2).collect()
    }

    #[test]
    fn test_mode_maps_to_scaler() {
        let controller = RegimeController::new(RegimeConfig::default(), None);
        let input = controller.input(&session(2.0), &prices());
        for (mode, scaler) in [
            (RegimeMode::Aggressive, 1.6),
            (RegimeMode::Normal, 1.0),
            (RegimeMode::Defensive, 0.5),
            (RegimeMode::Halt, 0.0),
        ] {
            let decision = controller.decide(&input, Some(&advisory(mode)));
            assert_eq!(decision.scaler, scaler);
            assert_eq!(decision.source, DecisionSource::Advisor);
        }
    }

    #[test]
    fn test_recovery_override_in_moderate_drawdown() {
        let controller = RegimeController::new(RegimeConfig::default(), None);
        let input = controller.input(&session(-4.0), &prices());
        let decision = controller.decide(&input, Some(&advisory(RegimeMode::Halt)));
        assert_eq!(decision.scaler, 1.0);
        assert_eq!(decision.source, DecisionSource::RecoveryOverride);
    }

    #[test]
    fn test_no_override_past_catastrophic_floor() {
        let controller = RegimeController::new(RegimeConfig::default(), None);
        let input = controller.input(&session(-12.0), &prices());
        let decision = controller.decide(&input, Some(&advisory(RegimeMode::Halt)));
        assert_eq!(decision.scaler, 0.0);
    }

    #[test]
    fn test_unavailable_leaves_scaler() {
        let controller = RegimeController::new(RegimeConfig::default(), None);
        let input = controller.input(&session(-4.0), &prices());
        let decision = controller.decide(&input, None);
        assert_eq!(decision.scaler, 0.5);
        assert_eq!(decision.mode, RegimeMode::Defensive);
        assert_eq!(decision.source, DecisionSource::Unchanged);
    }

    #[test]
    fn test_deterministic() {
        let controller = RegimeController::new(RegimeConfig::default(), None);
        for pnl in [-15.0, -4.0, 0.0, 3.0] {
            let input = controller.input(&session(pnl), &prices());
            for advice in [None, Some(advisory(RegimeMode::Aggressive))] {
                let a = controller.decide(&input, advice.as_ref());
                let b = controller.decide(&input, advice.as_ref());
                assert_eq!(a, b);
            }
        }
    }

    #[tokio::test]
    async fn test_failing_advisor_is_unavailable() {
        let controller = RegimeController::new(RegimeConfig::default(), Some(Arc::new(Fixed(None))));
        let mut s = session(1.0);
        let decision = controller.run(&mut s, &prices()).await.unwrap();
        assert_eq!(decision.source, DecisionSource::Unchanged);
        assert_eq!(s.risk_scaler, 0.5);
    }

    #[tokio::test]
    async fn test_run_writes_session() {
        let controller = RegimeController::new(
            RegimeConfig::default(),
            Some(Arc::new(Fixed(Some(advisory(RegimeMode::Aggressive))))),
        );
        let mut s = session(5.0);
        controller.run(&mut s, &prices()).await.unwrap();
        assert_eq!(s.risk_scaler, 1.6);
        assert_eq!(s.mode, RegimeMode::Aggressive);
        assert_eq!(s.regime, "RISK_OFF");
    }
}
