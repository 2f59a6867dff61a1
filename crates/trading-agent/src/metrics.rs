use std::collections::VecDeque;
use std::time::Instant;

use trading_core::TradeOutcome;

const RECENT_WINDOW: usize = 20;

/// Structured telemetry for the trading loop.
/// Tracks per-cycle timing, aggregate counters and a rolling trade window.
pub struct AgentMetrics {
    pub cycles_run: u64,
    pub symbols_scanned: u64,
    pub votes_received: u64,
    pub predictor_failures: u64,
    pub signals_generated: u64,
    pub no_voter_skips: u64,
    pub holds: u64,
    pub guardian_overrides: u64,
    pub sizing_aborts: u64,
    pub trades_opened: u64,
    pub trades_closed: u64,
    pub trades_failed: u64,
    pub total_pnl: f64,
    pub winning_trades: u64,
    pub losing_trades: u64,
    pub breakeven_trades: u64,

    // Per-cycle timing (last cycle)
    pub last_poll_duration_ms: u64,
    pub last_total_duration_ms: u64,

    recent_trades: VecDeque<TradeRecord>,
    log_interval_cycles: u64,
}

struct TradeRecord {
    pnl: f64,
    won: bool,
}

impl AgentMetrics {
    pub fn new(log_interval_cycles: u64) -> Self {
        Self {
            cycles_run: 0,
            symbols_scanned: 0,
            votes_received: 0,
            predictor_failures: 0,
            signals_generated: 0,
            no_voter_skips: 0,
            holds: 0,
            guardian_overrides: 0,
            sizing_aborts: 0,
            trades_opened: 0,
            trades_closed: 0,
            trades_failed: 0,
            total_pnl: 0.0,
            winning_trades: 0,
            losing_trades: 0,
            breakeven_trades: 0,
            last_poll_duration_ms: 0,
            last_total_duration_ms: 0,
            recent_trades: VecDeque::with_capacity(RECENT_WINDOW),
            log_interval_cycles,
        }
    }

    pub fn start_timer() -> Instant {
        Instant::now()
    }

    pub fn record_poll_duration(&mut self, start: Instant) {
        self.last_poll_duration_ms = start.elapsed().as_millis() as u64;
    }

    /// Count a closed trade. Breakeven closes stay out of the win rate.
    pub fn record_close(&mut self, outcome: TradeOutcome, pnl: f64) {
        self.trades_closed += 1;
        self.total_pnl += pnl;
        let won = match outcome {
            TradeOutcome::Win => {
                self.winning_trades += 1;
                true
            }
            TradeOutcome::Loss => {
                self.losing_trades += 1;
                false
            }
            TradeOutcome::Breakeven | TradeOutcome::Pending => {
                self.breakeven_trades += 1;
                return;
            }
        };

        self.recent_trades.push_back(TradeRecord { pnl, won });
        if self.recent_trades.len() > RECENT_WINDOW {
            self.recent_trades.pop_front();
        }
    }

    pub fn finish_cycle(&mut self, cycle_start: Instant) {
        self.last_total_duration_ms = cycle_start.elapsed().as_millis() as u64;
        self.cycles_run += 1;

        // Emit structured metrics periodically
        if self.log_interval_cycles > 0 && self.cycles_run % self.log_interval_cycles == 0 {
            self.log_metrics();
        }
    }

    /// Rolling win rate from the last 20 decided trades (0-100%)
    pub fn recent_win_rate(&self) -> f64 {
        if self.recent_trades.is_empty() {
            return 0.0;
        }
        let wins = self.recent_trades.iter().filter(|t| t.won).count() as f64;
        (wins / self.recent_trades.len() as f64) * 100.0
    }

    pub fn recent_avg_pnl(&self) -> f64 {
        if self.recent_trades.is_empty() {
            return 0.0;
        }
        self.recent_trades.iter().map(|t| t.pnl).sum::<f64>() / self.recent_trades.len() as f64
    }

    /// Overall win rate over WIN + LOSS (0-100%)
    pub fn overall_win_rate(&self) -> f64 {
        let total = self.winning_trades + self.losing_trades;
        if total == 0 {
            return 0.0;
        }
        (self.winning_trades as f64 / total as f64) * 100.0
    }

    /// Emit structured telemetry via tracing
    pub fn log_metrics(&self) {
        tracing::info!(
            cycles = self.cycles_run,
            symbols_scanned = self.symbols_scanned,
            votes_received = self.votes_received,
            predictor_failures = self.predictor_failures,
            signals_generated = self.signals_generated,
            holds = self.holds,
            guardian_overrides = self.guardian_overrides,
            sizing_aborts = self.sizing_aborts,
            trades_opened = self.trades_opened,
            trades_closed = self.trades_closed,
            trades_failed = self.trades_failed,
            total_pnl = format!("{:.2}", self.total_pnl),
            overall_win_rate = format!("{:.1}%", self.overall_win_rate()),
            recent_win_rate = format!("{:.1}%", self.recent_win_rate()),
            recent_avg_pnl = format!("{:.2}", self.recent_avg_pnl()),
            last_cycle_ms = self.last_total_duration_ms,
            last_poll_ms = self.last_poll_duration_ms,
            "Agent metrics summary"
        );
    }

    /// Serialize counters for state persistence
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "cycles_run": self.cycles_run,
            "symbols_scanned": self.symbols_scanned,
            "votes_received": self.votes_received,
            "predictor_failures": self.predictor_failures,
            "signals_generated": self.signals_generated,
            "no_voter_skips": self.no_voter_skips,
            "holds": self.holds,
            "guardian_overrides": self.guardian_overrides,
            "sizing_aborts": self.sizing_aborts,
            "trades_opened": self.trades_opened,
            "trades_closed": self.trades_closed,
            "trades_failed": self.trades_failed,
            "total_pnl": self.total_pnl,
            "winning_trades": self.winning_trades,
            "losing_trades": self.losing_trades,
            "breakeven_trades": self.breakeven_trades,
        })
    }

    /// Restore counters from persisted JSON. Unknown or missing keys are
    /// left at their current value.
    pub fn restore_from_json(&mut self, json: &serde_json::Value) {
        let counters: [(&str, &mut u64); 15] = [
            ("cycles_run", &mut self.cycles_run),
            ("symbols_scanned", &mut self.symbols_scanned),
            ("votes_received", &mut self.votes_received),
            ("predictor_failures", &mut self.predictor_failures),
            ("signals_generated", &mut self.signals_generated),
            ("no_voter_skips", &mut self.no_voter_skips),
            ("holds", &mut self.holds),
            ("guardian_overrides", &mut self.guardian_overrides),
            ("sizing_aborts", &mut self.sizing_aborts),
            ("trades_opened", &mut self.trades_opened),
            ("trades_closed", &mut self.trades_closed),
            ("trades_failed", &mut self.trades_failed),
            ("winning_trades", &mut self.winning_trades),
            ("losing_trades", &mut self.losing_trades),
            ("breakeven_trades", &mut self.breakeven_trades),
        ];
        for (key, field) in counters {
            if let Some(v) = json.get(key).and_then(|v| v.as_u64()) {
                *field = v;
            }
        }
        if let Some(v) = json.get("total_pnl").and_then(|v| v.as_f64()) {
            self.total_pnl = v;
        }
        tracing::info!(
            "Restored metrics from persisted state (cycles={})",
            self.cycles_run
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_breakeven_excluded_from_win_rate() {
        let mut metrics = AgentMetrics::new(0);
        metrics.record_close(TradeOutcome::Win, 12.0);
        metrics.record_close(TradeOutcome::Loss, -4.0);
        metrics.record_close(TradeOutcome::Breakeven, 0.1);

        assert_eq!(metrics.trades_closed, 3);
        assert_eq!(metrics.breakeven_trades, 1);
        assert_relative_eq!(metrics.overall_win_rate(), 50.0);
        assert_relative_eq!(metrics.recent_avg_pnl(), 4.0);
        assert_relative_eq!(metrics.total_pnl, 8.1);
    }

    #[test]
    fn test_recent_window_is_bounded() {
        let mut metrics = AgentMetrics::new(0);
        for _ in 0..5 {
            metrics.record_close(TradeOutcome::Loss, -1.0);
        }
        for _ in 0..RECENT_WINDOW {
            metrics.record_close(TradeOutcome::Win, 1.0);
        }
        assert_relative_eq!(metrics.recent_win_rate(), 100.0);
        assert!(metrics.overall_win_rate() < 100.0);
    }

    #[test]
    fn test_json_round_trip_restores_counters() {
        let mut metrics = AgentMetrics::new(0);
        metrics.cycles_run = 7;
        metrics.trades_opened = 3;
        metrics.record_close(TradeOutcome::Win, 2.5);

        let mut restored = AgentMetrics::new(0);
        restored.restore_from_json(&metrics.to_json());
        assert_eq!(restored.cycles_run, 7);
        assert_eq!(restored.trades_opened, 3);
        assert_eq!(restored.winning_trades, 1);
        assert_relative_eq!(restored.total_pnl, 2.5);
    }
}
