use anyhow::{bail, Result};
use trading_core::{Action, RiskVerdict, TrendBias};

use crate::models::{GuardianConfig, GuardianInput, EMERGENCY_HALT};

/// Deterministic rule-based validator for entry proposals.
///
/// Same input, same verdict: the guardian holds no state. Halts are latched
/// by the caller on the session and fed back through `GuardianInput::halted`.
#[derive(Debug, Clone)]
pub struct RiskGuardian {
    config: GuardianConfig,
}

impl RiskGuardian {
    pub fn new(config: GuardianConfig) -> Result<Self> {
        if config.max_open_positions == 0 {
            bail!("max_open_positions must be at least 1");
        }
        if config.daily_loss_limit_pct <= 0.0 {
            bail!("daily_loss_limit_pct must be positive, got {}", config.daily_loss_limit_pct);
        }
        if !(0.0..=1.0).contains(&config.exhaustion_confidence) {
            bail!("exhaustion_confidence must be in [0, 1]");
        }
        if config.exhaustion_rsi_low >= config.exhaustion_rsi_high {
            bail!("exhaustion RSI band is inverted");
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &GuardianConfig {
        &self.config
    }

    pub fn validate(&self, input: &GuardianInput) -> RiskVerdict {
        let cfg = &self.config;

        if input.halted || input.daily_loss_pct >= cfg.daily_loss_limit_pct {
            return RiskVerdict {
                allowed: false,
                action: Action::Hold,
                reason: format!("{} (daily loss {:.2}%)", EMERGENCY_HALT, input.daily_loss_pct),
                halt: true,
                confidence: None,
            };
        }

        if input.open_positions >= cfg.max_open_positions {
            return RiskVerdict::hold(format!(
                "position ceiling reached ({}/{})",
                input.open_positions, cfg.max_open_positions
            ));
        }

        if !input.action.is_entry() {
            return RiskVerdict::allow(Action::Hold, "nothing to validate");
        }

        if cfg.max_trade_notional > 0.0 && input.size > cfg.max_trade_notional {
            return RiskVerdict::hold(format!(
                "size {:.2} above limit {:.2}",
                input.size, cfg.max_trade_notional
            ));
        }

        // Extreme exhaustion against the proposal: the guardian speaks up
        if input.action == Action::Buy && input.rsi >= cfg.exhaustion_rsi_high {
            return counter(
                Action::Sell,
                cfg.exhaustion_confidence,
                format!(
                    "BUY into exhaustion (RSI {:.1}), guardian proposes SELL",
                    input.rsi
                ),
            );
        }
        if input.action == Action::Sell && input.rsi <= cfg.exhaustion_rsi_low {
            return counter(
                Action::Buy,
                cfg.exhaustion_confidence,
                format!(
                    "SELL into capitulation (RSI {:.1}), guardian proposes BUY",
                    input.rsi
                ),
            );
        }

        match input.action {
            Action::Buy if input.volatility > cfg.max_buy_atr_pct => RiskVerdict::hold(format!(
                "BUY vetoed: ATR {:.2}% above {:.2}%",
                input.volatility, cfg.max_buy_atr_pct
            )),
            Action::Sell => {
                let confirmed = input.trend == TrendBias::Bearish
                    && input.adx >= cfg.sell_min_adx
                    && input.ofi <= -cfg.sell_ofi_threshold;
                let extreme = input.rsi >= cfg.rsi_extreme_overbought;

                if confirmed {
                    RiskVerdict::allow(Action::Sell, "bearish trend confirmed by flow")
                } else if extreme {
                    RiskVerdict::allow(Action::Sell, format!("overbought RSI {:.1}", input.rsi))
                } else {
                    RiskVerdict::hold(format!(
                        "SELL unconfirmed (trend {}, ADX {:.1}, OFI {:+.2}, RSI {:.1})",
                        input.trend, input.adx, input.ofi, input.rsi
                    ))
                }
            }
            action => RiskVerdict::allow(action, "within limits"),
        }
    }
}

fn counter(action: Action, confidence: f64, reason: String) -> RiskVerdict {
    RiskVerdict {
        allowed: true,
        action,
        reason,
        halt: false,
        confidence: Some(confidence),
    }
}

impl Default for RiskGuardian {
    fn default() -> Self {
        Self {
            config: GuardianConfig::default(),
        }
    }
}
