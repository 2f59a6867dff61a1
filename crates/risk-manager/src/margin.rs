use anyhow::{bail, Result};

use crate::models::{MarginCheck, MarginConfig, PositionExposure};

/// Keeps a safety buffer of free margin against stale exchange figures.
#[derive(Debug, Clone)]
pub struct MarginGuard {
    config: MarginConfig,
}

impl MarginGuard {
    pub fn new(config: MarginConfig) -> Result<Self> {
        if !(0.0..100.0).contains(&config.buffer_pct) {
            bail!("margin buffer must be in [0, 100), got {}", config.buffer_pct);
        }
        Ok(Self { config })
    }

    pub fn buffer_pct(&self) -> f64 {
        self.config.buffer_pct
    }

    /// Margin that must stay free for this equity
    pub fn required_buffer(&self, equity: f64) -> f64 {
        equity.max(0.0) * self.config.buffer_pct / 100.0
    }

    /// Margin usable for a new entry after honoring the buffer.
    pub fn usable_margin(&self, equity: f64, available: f64) -> f64 {
        (available - self.required_buffer(equity)).max(0.0)
    }

    pub fn check(&self, equity: f64, available: f64, positions: &[PositionExposure]) -> MarginCheck {
        let required_buffer = self.required_buffer(equity);

        if available >= required_buffer {
            return MarginCheck {
                ok: true,
                available,
                required_buffer,
                close_candidate: None,
                reason: "margin buffer intact".to_string(),
            };
        }

        let candidate = least_profitable(positions);
        let reason = match candidate {
            Some(p) => format!(
                "available {:.2} below buffer {:.2}; closing {} ({:+.2}%)",
                available, required_buffer, p.symbol, p.pnl_pct
            ),
            None => format!(
                "available {:.2} below buffer {:.2}; no position to close",
                available, required_buffer
            ),
        };
        tracing::warn!("Margin guard: {}", reason);

        MarginCheck {
            ok: false,
            available,
            required_buffer,
            close_candidate: candidate.map(|p| p.symbol.clone()),
            reason,
        }
    }
}

impl Default for MarginGuard {
    fn default() -> Self {
        Self {
            config: MarginConfig::default(),
        }
    }
}

/// Position with the lowest unrealized PnL (most losing first).
pub fn least_profitable(positions: &[PositionExposure]) -> Option<&PositionExposure> {
    positions.iter().min_by(|a, b| {
        a.unrealized_pnl
            .partial_cmp(&b.unrealized_pnl)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                a.pnl_pct
                    .partial_cmp(&b.pnl_pct)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    })
}
