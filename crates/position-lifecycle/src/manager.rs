use anyhow::Result;
use rust_decimal::Decimal;
use std::collections::HashMap;
use trading_core::Side;

use crate::machine::{step, LifecycleConfig};
use crate::state::{CloseReason, CloseSignal, LifecycleState, OpenPosition, Tick};

/// Position as reported by the exchange, used to reconcile the book
#[derive(Debug, Clone)]
pub struct ExchangePosition {
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    pub quantity: Decimal,
}

/// Tracks every open position and drives its state machine.
pub struct LifecycleManager {
    config: LifecycleConfig,
    positions: HashMap<String, OpenPosition>,
}

impl LifecycleManager {
    pub fn new(config: LifecycleConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            positions: HashMap::new(),
        })
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Start tracking a freshly filled position.
    pub fn open(&mut self, position: OpenPosition) {
        tracing::info!(
            "Tracking {} {} {} @ {:.4}",
            position.side,
            position.quantity,
            position.symbol,
            position.entry_price
        );
        self.positions.insert(position.symbol.clone(), position);
    }

    pub fn get(&self, symbol: &str) -> Option<&OpenPosition> {
        self.positions.get(symbol)
    }

    /// Link a tracked position to its trade memory (adopted positions).
    pub fn attach_memory(&mut self, symbol: &str, memory_id: i64) -> bool {
        match self.positions.get_mut(symbol) {
            Some(position) if position.memory_id.is_none() => {
                position.memory_id = Some(memory_id);
                true
            }
            _ => false,
        }
    }

    pub fn is_tracking(&self, symbol: &str) -> bool {
        self.positions.contains_key(symbol)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn positions(&self) -> impl Iterator<Item = &OpenPosition> {
        self.positions.values()
    }

    /// Evaluate one position. A close removes it from the book, so a
    /// second close for the same fill is impossible.
    pub fn on_tick(&mut self, symbol: &str, tick: &Tick) -> Option<CloseSignal> {
        let position = self.positions.get_mut(symbol)?;
        let before = position.state;
        let signal = step(&self.config, position, tick);

        if let Some(ref s) = signal {
            tracing::info!(
                "{} {} -> CLOSED ({}, {}): {}",
                symbol,
                before,
                s.reason,
                s.outcome.as_str(),
                s.detail
            );
            self.positions.remove(symbol);
        }
        signal
    }

    /// Force a close outside the state machine (margin relief).
    pub fn force_close(&mut self, symbol: &str, price: f64) -> Option<CloseSignal> {
        let position = self.positions.remove(symbol)?;
        Some(self.settle(position, price, CloseReason::Corrective, "closed to free margin"))
    }

    /// Close signal for a position that left the book outside `on_tick`.
    /// The outcome is judged against the fee buffer like a breakeven exit.
    pub fn settle(
        &self,
        mut position: OpenPosition,
        price: f64,
        reason: CloseReason,
        detail: impl Into<String>,
    ) -> CloseSignal {
        let pnl = position.pnl_pct(price);
        position.state = LifecycleState::Closed;

        let outcome = if pnl > self.config.fee_buffer_pct {
            trading_core::TradeOutcome::Win
        } else if pnl < -self.config.fee_buffer_pct {
            trading_core::TradeOutcome::Loss
        } else {
            trading_core::TradeOutcome::Breakeven
        };

        CloseSignal {
            symbol: position.symbol,
            side: position.side,
            quantity: position.quantity,
            entry_price: position.entry_price,
            reason,
            outcome,
            price,
            pnl_pct: pnl,
            memory_id: position.memory_id,
            detail: detail.into(),
        }
    }

    /// Reconcile with the exchange: adopt untracked positions and drop
    /// tracked ones the exchange no longer reports. Returns the dropped ones.
    pub fn reconcile(&mut self, live: &[ExchangePosition]) -> Vec<OpenPosition> {
        for p in live {
            if p.quantity.is_zero() || self.positions.contains_key(&p.symbol) {
                continue;
            }
            tracing::warn!(
                "Adopting untracked {} {} position ({} @ {:.4})",
                p.symbol,
                p.side,
                p.quantity,
                p.entry_price
            );
            let mut adopted = OpenPosition::new(p.symbol.clone(), p.side, p.entry_price, p.quantity);
            adopted.adopted = true;
            self.positions.insert(p.symbol.clone(), adopted);
        }

        let gone: Vec<String> = self
            .positions
            .keys()
            .filter(|s| !live.iter().any(|p| &p.symbol == *s && !p.quantity.is_zero()))
            .cloned()
            .collect();

        gone.into_iter()
            .filter_map(|symbol| {
                tracing::info!("{} no longer open on exchange", symbol);
                self.positions.remove(&symbol)
            })
            .collect()
    }
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self {
            config: LifecycleConfig::default(),
            positions: HashMap::new(),
        }
    }
}
