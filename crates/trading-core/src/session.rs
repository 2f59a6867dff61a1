use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper bound of the global risk scaler (AGGRESSIVE)
pub const MAX_RISK_SCALER: f64 = 1.6;

/// Global risk posture chosen by the regime controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RegimeMode {
    Aggressive,
    Normal,
    Defensive,
    Halt,
}

impl RegimeMode {
    pub fn scaler(&self) -> f64 {
        match self {
            RegimeMode::Aggressive => 1.6,
            RegimeMode::Normal => 1.0,
            RegimeMode::Defensive => 0.5,
            RegimeMode::Halt => 0.0,
        }
    }

    pub fn parse_loose(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "AGGRESSIVE" => Some(RegimeMode::Aggressive),
            "NORMAL" | "NEUTRAL" => Some(RegimeMode::Normal),
            "DEFENSIVE" | "CONSERVATIVE" => Some(RegimeMode::Defensive),
            "HALT" | "STOP" => Some(RegimeMode::Halt),
            _ => None,
        }
    }
}

impl fmt::Display for RegimeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RegimeMode::Aggressive => "AGGRESSIVE",
            RegimeMode::Normal => "NORMAL",
            RegimeMode::Defensive => "DEFENSIVE",
            RegimeMode::Halt => "HALT",
        };
        f.write_str(s)
    }
}

/// Mutable session state shared by the scan loop and the regime loop.
///
/// Owned by the single trading worker and passed explicitly to every stage
/// that reads or writes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionContext {
    pub equity: f64,
    pub start_equity: f64,
    pub session_pnl_pct: f64,
    /// Realized losses today as percent of start-of-day equity. Only grows
    /// until `roll_day` crosses a date boundary.
    pub daily_loss_pct: f64,
    pub day_start_equity: f64,
    pub trading_day: NaiveDate,
    pub risk_scaler: f64,
    pub regime: String,
    pub mode: RegimeMode,
    pub halted: bool,
    pub halt_reason: Option<String>,
}

impl SessionContext {
    pub fn new(equity: f64, today: NaiveDate) -> Self {
        Self {
            equity,
            start_equity: equity,
            session_pnl_pct: 0.0,
            daily_loss_pct: 0.0,
            day_start_equity: equity,
            trading_day: today,
            risk_scaler: 1.0,
            regime: "UNKNOWN".to_string(),
            mode: RegimeMode::Normal,
            halted: false,
            halt_reason: None,
        }
    }

    /// Apply a fresh equity reading from the exchange.
    pub fn refresh_equity(&mut self, equity: f64) {
        if equity <= 0.0 || !equity.is_finite() {
            return;
        }
        self.equity = equity;
        self.session_pnl_pct = if self.start_equity > 0.0 {
            (equity - self.start_equity) / self.start_equity * 100.0
        } else {
            0.0
        };
    }

    /// Fold a realized PnL (quote currency) into the daily-loss accumulator.
    pub fn record_realized_pnl(&mut self, pnl: f64) {
        if pnl >= 0.0 || self.day_start_equity <= 0.0 {
            return;
        }
        self.daily_loss_pct += -pnl / self.day_start_equity * 100.0;
    }

    /// Reset daily accumulators when the trading day changes. Returns true on reset.
    pub fn roll_day(&mut self, today: NaiveDate) -> bool {
        if today <= self.trading_day {
            return false;
        }
        self.trading_day = today;
        self.daily_loss_pct = 0.0;
        self.day_start_equity = self.equity;
        self.halted = false;
        self.halt_reason = None;
        true
    }

    pub fn set_risk_scaler(&mut self, scaler: f64) {
        self.risk_scaler = if scaler.is_nan() {
            0.0
        } else {
            scaler.clamp(0.0, MAX_RISK_SCALER)
        };
    }

    pub fn latch_halt(&mut self, reason: impl Into<String>) {
        self.halted = true;
        self.halt_reason = Some(reason.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    #[test]
    fn daily_loss_only_accumulates_losses() {
        let mut session = SessionContext::new(1000.0, day(1));
        session.record_realized_pnl(-10.0);
        session.record_realized_pnl(25.0);
        session.record_realized_pnl(-5.0);
        assert!((session.daily_loss_pct - 1.5).abs() < 1e-9);
    }

    #[test]
    fn roll_day_resets_accumulator_and_halt() {
        let mut session = SessionContext::new(1000.0, day(1));
        session.record_realized_pnl(-50.0);
        session.latch_halt("daily loss");
        assert!(!session.roll_day(day(1)));
        assert!(session.halted);

        assert!(session.roll_day(day(2)));
        assert_eq!(session.daily_loss_pct, 0.0);
        assert!(!session.halted);
    }

    #[test]
    fn scaler_is_clamped() {
        let mut session = SessionContext::new(1000.0, day(1));
        session.set_risk_scaler(3.0);
        assert_eq!(session.risk_scaler, MAX_RISK_SCALER);
        session.set_risk_scaler(-1.0);
        assert_eq!(session.risk_scaler, 0.0);
    }

    #[test]
    fn session_pnl_tracks_equity() {
        let mut session = SessionContext::new(1000.0, day(1));
        session.refresh_equity(950.0);
        assert!((session.session_pnl_pct + 5.0).abs() < 1e-9);
        session.refresh_equity(0.0);
        assert_eq!(session.equity, 950.0);
    }
}
