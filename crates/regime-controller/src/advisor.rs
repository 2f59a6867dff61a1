use anyhow::{anyhow, Result};
use async_trait::async_trait;
use predictor_pool::{repair_json, CompletionBackend};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use trading_core::RegimeMode;

use crate::controller::RegimeInput;

/// Macro view returned by an advisor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Advisory {
    pub regime: String,
    pub mode: RegimeMode,
    pub reasoning: String,
}

/// Optional macro-reasoning collaborator. Any error means "unavailable".
#[async_trait]
pub trait MacroAdvisor: Send + Sync {
    async fn advise(&self, input: &RegimeInput) -> Result<Advisory>;
}

/// Language-model advisor over any completion backend
pub struct LlmMacroAdvisor {
    backend: Arc<dyn CompletionBackend>,
    model: String,
}

const SYSTEM_PROMPT: &str = "You are the risk officer of a crypto futures desk. \
Reply with one JSON object only.";

impl LlmMacroAdvisor {
    pub fn new(backend: Arc<dyn CompletionBackend>, model: impl Into<String>) -> Self {
        Self {
            backend,
            model: model.into(),
        }
    }

    fn prompt(input: &RegimeInput) -> String {
        format!(
            r#"Session equity: {:.2}
Session PnL: {:+.2}%
Rule-based regime: {} (volatility {:.4}, drift {:+.5}, efficiency {:.2})
Current mode: {} (risk scaler {:.2})

Choose the desk's risk mode for the next hours. Respond ONLY with:
{{"regime": "short label", "mode": "AGGRESSIVE" | "NORMAL" | "DEFENSIVE" | "HALT", "reasoning": "one sentence"}}"#,
            input.equity,
            input.session_pnl_pct,
            input.rule_regime,
            input.metrics.volatility,
            input.metrics.drift,
            input.metrics.efficiency,
            input.current_mode,
            input.current_scaler,
        )
    }
}

/// Read `{regime, mode, reasoning}` from a repaired JSON value.
pub fn advisory_from_value(value: &Value) -> Result<Advisory> {
    let object = match value {
        Value::Array(items) => items.iter().find(|v| v.is_object()),
        other => Some(other),
    }
    .and_then(Value::as_object)
    .ok_or_else(|| anyhow!("advisory is not an object"))?;

    let text = |key: &str| {
        object
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .and_then(|(_, v)| v.as_str())
    };

    let mode = text("mode")
        .and_then(RegimeMode::parse_loose)
        .ok_or_else(|| anyhow!("advisory without a valid mode"))?;

    Ok(Advisory {
        regime: text("regime").unwrap_or("UNSPECIFIED").to_uppercase(),
        mode,
        reasoning: text("reasoning").unwrap_or_default().to_string(),
    })
}

#[async_trait]
impl MacroAdvisor for LlmMacroAdvisor {
    async fn advise(&self, input: &RegimeInput) -> Result<Advisory> {
        let raw = self
            .backend
            .complete(&self.model, SYSTEM_PROMPT, &Self::prompt(input))
            .await?;
        let (value, _) = repair_json(&raw).ok_or_else(|| anyhow!("no JSON in advisory"))?;
        advisory_from_value(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parses_advisory() {
        let advisory = advisory_from_value(&json!({
            "regime": "risk-off",
            "Mode": "defensive",
            "reasoning": "funding spikes"
        }))
        .unwrap();
        assert_eq!(advisory.mode, RegimeMode::Defensive);
        assert_eq!(advisory.regime, "RISK-OFF");
    }

    #[test]
    fn test_rejects_unknown_mode() {
        assert!(advisory_from_value(&json!({"mode": "YOLO"})).is_err());
    }

    #[test]
    fn test_accepts_wrapped_array() {
        let advisory = advisory_from_value(&json!([{"mode": "HALT"}])).unwrap();
        assert_eq!(advisory.mode, RegimeMode::Halt);
    }
}
