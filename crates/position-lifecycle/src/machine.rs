use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use trading_core::{Side, TradeOutcome};

use crate::state::{CloseReason, CloseSignal, LifecycleState, OpenPosition, Tick};

/// PnL% thresholds driving the lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    pub stop_loss_pct: f64,
    pub breakeven_trigger_pct: f64,
    /// Retrace level that closes an armed position
    pub fee_buffer_pct: f64,
    pub trailing_trigger_pct: f64,
    pub trailing_give_back_pct: f64,
    pub smart_exit_min_profit_pct: f64,
    /// Longs exit at or above this RSI, shorts at or below 100 minus it
    pub exhaustion_rsi: f64,
    pub adx_collapse: f64,
    pub moonshot_pct: f64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            stop_loss_pct: 1.5,
            breakeven_trigger_pct: 1.5,
            fee_buffer_pct: 0.2,
            trailing_trigger_pct: 2.5,
            trailing_give_back_pct: 1.5,
            smart_exit_min_profit_pct: 0.5,
            exhaustion_rsi: 75.0,
            adx_collapse: 15.0,
            moonshot_pct: 12.0,
        }
    }
}

impl LifecycleConfig {
    pub fn validate(&self) -> Result<()> {
        if self.stop_loss_pct <= 0.0 {
            bail!("stop_loss_pct must be positive");
        }
        if self.fee_buffer_pct >= self.breakeven_trigger_pct {
            bail!("fee buffer must sit below the breakeven trigger");
        }
        if self.breakeven_trigger_pct > self.trailing_trigger_pct {
            bail!("breakeven trigger must not exceed the trailing trigger");
        }
        if self.trailing_trigger_pct >= self.moonshot_pct {
            bail!("trailing trigger must sit below the moonshot cap");
        }
        Ok(())
    }
}

/// Advance `position` by one tick. Returns a close signal at most once;
/// a closed position never produces another.
pub fn step(
    config: &LifecycleConfig,
    position: &mut OpenPosition,
    tick: &Tick,
) -> Option<CloseSignal> {
    if position.is_closed() || !(tick.price.is_finite() && tick.price > 0.0) {
        return None;
    }

    let pnl = position.pnl_pct(tick.price);
    position.peak_pnl_pct = position.peak_pnl_pct.max(pnl);

    if pnl >= config.moonshot_pct {
        return Some(close(
            position,
            tick,
            pnl,
            CloseReason::Moonshot,
            TradeOutcome::Win,
            format!("{:+.2}% beyond moonshot cap", pnl),
        ));
    }

    if pnl >= config.trailing_trigger_pct {
        let candidate = pnl - config.trailing_give_back_pct;
        let floor = position.secured_floor.map_or(candidate, |f| f.max(candidate));
        if position.state != LifecycleState::TrailingLocked {
            tracing::info!(
                "{} trailing locked at {:+.2}% (floor {:+.2}%)",
                position.symbol,
                pnl,
                floor
            );
        }
        position.state = LifecycleState::TrailingLocked;
        position.secured_floor = Some(floor);
    } else if pnl >= config.breakeven_trigger_pct && position.state == LifecycleState::Open {
        tracing::info!("{} breakeven armed at {:+.2}%", position.symbol, pnl);
        position.state = LifecycleState::BreakevenArmed;
    }

    match position.state {
        LifecycleState::TrailingLocked => {
            let floor = position.secured_floor.unwrap_or(config.fee_buffer_pct);
            if pnl <= floor {
                // A gap through the floor can land near entry; never a loss once locked
                let outcome = if pnl > config.fee_buffer_pct {
                    TradeOutcome::Win
                } else {
                    TradeOutcome::Breakeven
                };
                return Some(close(
                    position,
                    tick,
                    pnl,
                    CloseReason::TrailingStop,
                    outcome,
                    format!("retraced to {:+.2}% (floor {:+.2}%)", pnl, floor),
                ));
            }
        }
        LifecycleState::BreakevenArmed => {
            if pnl <= config.fee_buffer_pct {
                return Some(close(
                    position,
                    tick,
                    pnl,
                    CloseReason::Breakeven,
                    TradeOutcome::Breakeven,
                    format!("retraced to {:+.2}% after arming", pnl),
                ));
            }
        }
        LifecycleState::Open => {
            if pnl <= -config.stop_loss_pct {
                return Some(close(
                    position,
                    tick,
                    pnl,
                    CloseReason::StopLoss,
                    TradeOutcome::Loss,
                    format!("{:+.2}% through stop", pnl),
                ));
            }
        }
        LifecycleState::Closed => return None,
    }

    if pnl > config.smart_exit_min_profit_pct {
        let exhausted = tick.rsi.is_some_and(|rsi| match position.side {
            Side::Long => rsi >= config.exhaustion_rsi,
            Side::Short => rsi <= 100.0 - config.exhaustion_rsi,
        });
        let collapsed = tick.adx.is_some_and(|adx| adx < config.adx_collapse);

        if exhausted || collapsed {
            let why = if exhausted { "RSI exhaustion" } else { "trend collapse" };
            return Some(close(
                position,
                tick,
                pnl,
                CloseReason::SmartExit,
                TradeOutcome::Win,
                format!("{} at {:+.2}%", why, pnl),
            ));
        }
    }

    None
}

fn close(
    position: &mut OpenPosition,
    tick: &Tick,
    pnl: f64,
    reason: CloseReason,
    outcome: TradeOutcome,
    detail: String,
) -> CloseSignal {
    position.state = LifecycleState::Closed;
    CloseSignal {
        symbol: position.symbol.clone(),
        side: position.side,
        quantity: position.quantity,
        entry_price: position.entry_price,
        reason,
        outcome,
        price: tick.price,
        pnl_pct: pnl,
        memory_id: position.memory_id,
        detail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rust_decimal_macros::dec;

    fn long(entry: f64) -> OpenPosition {
        OpenPosition::new("BTCUSDT", Side::Long, entry, dec!(0.01))
    }

    fn short(entry: f64) -> OpenPosition {
        OpenPosition::new("ETHUSDT", Side::Short, entry, dec!(0.1))
    }

    #[test]
    fn test_scenario_breakeven_after_spike() {
        let cfg = LifecycleConfig::default();
        let mut pos = long(100.0);

        assert!(step(&cfg, &mut pos, &Tick::price(103.0)).is_none());
        assert_ne!(pos.state, LifecycleState::Open);

        let signal = step(&cfg, &mut pos, &Tick::price(100.05)).unwrap();
        assert_eq!(signal.outcome, TradeOutcome::Breakeven);
        assert_relative_eq!(signal.pnl_pct, 0.05, epsilon = 1e-9);
        assert!(pos.is_closed());

        // Nothing further, whatever the price does
        assert!(step(&cfg, &mut pos, &Tick::price(95.0)).is_none());
        assert!(step(&cfg, &mut pos, &Tick::price(120.0)).is_none());
    }

    #[test]
    fn test_armed_retrace_never_loss() {
        let cfg = LifecycleConfig::default();
        let mut pos = long(100.0);
        step(&cfg, &mut pos, &Tick::price(101.6));
        assert_eq!(pos.state, LifecycleState::BreakevenArmed);

        // Gap straight through the stop on the same tick
        let signal = step(&cfg, &mut pos, &Tick::price(98.0)).unwrap();
        assert_eq!(signal.reason, CloseReason::Breakeven);
        assert_eq!(signal.outcome, TradeOutcome::Breakeven);
    }

    #[test]
    fn test_stop_loss_from_open() {
        let cfg = LifecycleConfig::default();
        let mut pos = long(100.0);
        assert!(step(&cfg, &mut pos, &Tick::price(99.0)).is_none());
        let signal = step(&cfg, &mut pos, &Tick::price(98.4)).unwrap();
        assert_eq!(signal.reason, CloseReason::StopLoss);
        assert_eq!(signal.outcome, TradeOutcome::Loss);
    }

    #[test]
    fn test_short_stop_loss_on_rally() {
        let cfg = LifecycleConfig::default();
        let mut pos = short(100.0);
        let signal = step(&cfg, &mut pos, &Tick::price(101.6)).unwrap();
        assert_eq!(signal.outcome, TradeOutcome::Loss);
        assert!(signal.pnl_pct < 0.0);
    }

    #[test]
    fn test_trailing_floor_ratchets_up_only() {
        let cfg = LifecycleConfig::default();
        let mut pos = long(100.0);

        step(&cfg, &mut pos, &Tick::price(103.0));
        assert_relative_eq!(pos.secured_floor.unwrap(), 1.5, epsilon = 1e-9);

        step(&cfg, &mut pos, &Tick::price(106.0));
        assert_relative_eq!(pos.secured_floor.unwrap(), 4.5, epsilon = 1e-9);

        // Pullback above the floor keeps the floor
        assert!(step(&cfg, &mut pos, &Tick::price(105.0)).is_none());
        assert_relative_eq!(pos.secured_floor.unwrap(), 4.5, epsilon = 1e-9);

        let signal = step(&cfg, &mut pos, &Tick::price(104.4)).unwrap();
        assert_eq!(signal.reason, CloseReason::TrailingStop);
        assert_eq!(signal.outcome, TradeOutcome::Win);
    }

    #[test]
    fn test_moonshot_closes_any_state() {
        let cfg = LifecycleConfig::default();
        let mut pos = short(100.0);
        let signal = step(&cfg, &mut pos, &Tick::price(87.0)).unwrap();
        assert_eq!(signal.reason, CloseReason::Moonshot);
        assert_eq!(signal.outcome, TradeOutcome::Win);
    }

    #[test]
    fn test_smart_exit_on_exhaustion() {
        let cfg = LifecycleConfig::default();
        let mut pos = long(100.0);
        let tick = Tick {
            price: 100.8,
            rsi: Some(80.0),
            adx: Some(30.0),
        };
        let signal = step(&cfg, &mut pos, &tick).unwrap();
        assert_eq!(signal.reason, CloseReason::SmartExit);
        assert_eq!(signal.outcome, TradeOutcome::Win);
    }

    #[test]
    fn test_smart_exit_needs_min_profit() {
        let cfg = LifecycleConfig::default();
        let mut pos = long(100.0);
        let tick = Tick {
            price: 100.3,
            rsi: Some(85.0),
            adx: Some(5.0),
        };
        assert!(step(&cfg, &mut pos, &tick).is_none());
    }

    #[test]
    fn test_short_smart_exit_on_oversold() {
        let cfg = LifecycleConfig::default();
        let mut pos = short(100.0);
        let tick = Tick {
            price: 99.0,
            rsi: Some(20.0),
            adx: None,
        };
        assert_eq!(step(&cfg, &mut pos, &tick).unwrap().reason, CloseReason::SmartExit);
    }

    #[test]
    fn test_exactly_one_close_over_any_path() {
        let cfg = LifecycleConfig::default();
        let path = [100.5, 101.7, 102.9, 101.0, 100.1, 99.0, 97.0, 103.0, 113.0];
        let mut pos = long(100.0);
        let closes = path
            .iter()
            .filter_map(|p| step(&cfg, &mut pos, &Tick::price(*p)))
            .count();
        assert_eq!(closes, 1);
    }

    #[test]
    fn test_config_validation() {
        assert!(LifecycleConfig::default().validate().is_ok());
        let bad = LifecycleConfig {
            fee_buffer_pct: 2.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
