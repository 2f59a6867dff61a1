use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::{Duration as ChronoDuration, Utc};
use consensus_aggregator::{aggregate, ModifierBounds, ModifierChain};
use exchange_client::{AccountBalance, Exchange, LivePosition};
use kelly_position_sizer::{PositionSizer, SizingAbort, SizingRequest, WinRateEstimator};
use position_lifecycle::{
    CloseReason, CloseSignal, ExchangePosition, LifecycleConfig, LifecycleManager, OpenPosition, Tick,
};
use predictor_pool::PredictorPool;
use regime_controller::RegimeController;
use risk_manager::{least_profitable, MarginGuard, PositionExposure, RiskGuardian};
use rust_decimal::prelude::ToPrimitive;
use technical_analysis::{ContextConfig, MarketContextBuilder};
use trade_recorder::{PositionSummary, Recorder, StatusWriter, TradeMemoryStore};
use trading_core::{MarketContext, SessionContext, Side};

use crate::config::AgentConfig;
use crate::metrics::AgentMetrics;
use crate::pipeline::{DecisionPipeline, GuardianFacts, PipelineResult, Stage};
use crate::trade_executor::{classify_failure, FailureAction, TradeExecutor};

/// Collaborators built by `main` (or a test) and handed to the trader
pub struct TraderParts {
    pub config: AgentConfig,
    pub exchange: Arc<dyn Exchange>,
    pub pool: PredictorPool,
    pub regime: RegimeController,
    pub memory: TradeMemoryStore,
    pub recorder: Recorder,
    pub session: SessionContext,
}

/// The single trading worker. Owns the session and every stage of the
/// per-symbol pipeline; nothing here is shared across tasks.
pub struct Trader {
    config: AgentConfig,
    exchange: Arc<dyn Exchange>,
    executor: TradeExecutor,
    context_builder: MarketContextBuilder,
    pool: PredictorPool,
    pipeline: DecisionPipeline,
    sizer: PositionSizer,
    margin: MarginGuard,
    lifecycle: LifecycleManager,
    regime: RegimeController,
    memory: TradeMemoryStore,
    recorder: Recorder,
    status: StatusWriter,
    metrics: AgentMetrics,
    session: SessionContext,
    balance: AccountBalance,
    live: Vec<LivePosition>,
    margin_ok: bool,
}

impl Trader {
    pub fn new(parts: TraderParts) -> Result<Self> {
        let TraderParts {
            config,
            exchange,
            pool,
            regime,
            memory,
            recorder,
            session,
        } = parts;

        let context_builder = MarketContextBuilder::new(ContextConfig::default());
        if config.candle_limit < context_builder.min_candles() {
            bail!(
                "CANDLE_LIMIT {} is below the {} candles the indicators need",
                config.candle_limit,
                context_builder.min_candles()
            );
        }

        let bounds = ModifierBounds {
            max_boost: config.max_modifier_boost,
            max_penalty: config.max_modifier_boost,
        };
        let pipeline = DecisionPipeline::new(
            ModifierChain::from_names(&config.modifiers, bounds),
            RiskGuardian::new(config.guardian_config())?,
            config.min_confidence,
        );
        let sizer = PositionSizer::new(config.sizer_config(), config.kelly_config()?, WinRateEstimator::default())?;
        let margin = MarginGuard::new(config.margin_config())?;
        let lifecycle = LifecycleManager::new(LifecycleConfig {
            stop_loss_pct: config.stop_loss_pct,
            ..LifecycleConfig::default()
        })?;
        let executor = TradeExecutor::new(Arc::clone(&exchange), config.trading_enabled, config.leverage);
        let status = StatusWriter::new(&config.status_path, config.activity_max);
        let metrics = AgentMetrics::new(config.metrics_log_interval_cycles);
        let balance = AccountBalance {
            equity: session.equity,
            available: session.equity,
        };

        Ok(Self {
            config,
            exchange,
            executor,
            context_builder,
            pool,
            pipeline,
            sizer,
            margin,
            lifecycle,
            regime,
            memory,
            recorder,
            status,
            metrics,
            session,
            balance,
            live: Vec::new(),
            margin_ok: true,
        })
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn metrics(&self) -> &AgentMetrics {
        &self.metrics
    }

    pub fn metrics_mut(&mut self) -> &mut AgentMetrics {
        &mut self.metrics
    }

    pub fn push_activity(&mut self, kind: &str, message: impl Into<String>) {
        self.status.push_activity(kind, message);
    }

    /// Clear leftovers from a previous run and adopt open positions.
    pub async fn startup(&mut self) -> Result<()> {
        let max_age = ChronoDuration::seconds(self.config.stale_order_max_age_secs);
        if let Err(e) = self.executor.cancel_stale_orders(None, max_age).await {
            tracing::warn!("Failed to check for stale orders: {}", e);
        }
        self.refresh_account().await?;
        let message = format!(
            "started on {} with equity {:.2}, {} open positions",
            self.exchange.name(),
            self.session.equity,
            self.lifecycle.len()
        );
        self.status.push_activity("start", message);
        self.write_status().await
    }

    pub async fn run_cycle(&mut self) -> Result<()> {
        let cycle_start = AgentMetrics::start_timer();
        tracing::info!("Starting trading cycle...");

        self.refresh_account().await?;
        self.check_margin().await;

        let symbols = self.config.symbols.clone();
        let delay = Duration::from_millis(self.config.symbol_delay_ms);
        let mut outcome = Ok(());
        for (i, symbol) in symbols.iter().enumerate() {
            if i > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let Err(e) = self.run_symbol(symbol).await {
                outcome = Err(e);
                break;
            }
        }
        if outcome.is_ok() {
            self.monitor_off_watchlist().await;
        }

        if let Err(e) = self.write_status().await {
            tracing::warn!("Failed to write status snapshot: {}", e);
        }
        self.metrics.finish_cycle(cycle_start);
        outcome
    }

    /// Slow-cadence regime evaluation over the first watchlist symbol.
    pub async fn run_regime(&mut self) -> Result<()> {
        let Some(symbol) = self.config.symbols.first().cloned() else {
            return Ok(());
        };
        let interval = if self.config.htf_interval.is_empty() {
            &self.config.candle_interval
        } else {
            &self.config.htf_interval
        };
        let candles = self.exchange.candles(&symbol, interval, self.config.candle_limit).await?;
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

        let decision = self.regime.run(&mut self.session, &closes).await?;
        self.status.push_activity(
            "regime",
            format!(
                "{} {} scaler {:.2} ({:?}): {}",
                decision.regime, decision.mode, decision.scaler, decision.source, decision.reasoning
            ),
        );
        Ok(())
    }

    pub async fn write_status(&self) -> Result<()> {
        let positions = self
            .lifecycle
            .positions()
            .map(|p| {
                let mark = self
                    .live
                    .iter()
                    .find(|l| l.symbol == p.symbol)
                    .map(|l| l.mark_price)
                    .unwrap_or(p.entry_price);
                PositionSummary {
                    symbol: p.symbol.clone(),
                    side: p.side.to_string(),
                    state: p.state.to_string(),
                    entry_price: p.entry_price,
                    pnl_pct: p.pnl_pct(mark),
                }
            })
            .collect();
        let snapshot = self.status.snapshot(self.exchange.name(), &self.session, positions);
        self.status.write(&snapshot).await
    }

    // -----------------------------------------------------------------------
    // Account
    // -----------------------------------------------------------------------

    async fn refresh_account(&mut self) -> Result<()> {
        if self.session.roll_day(Utc::now().date_naive()) {
            tracing::info!("New trading day {}, daily limits reset", self.session.trading_day);
            self.status.push_activity("day", format!("trading day {}", self.session.trading_day));
        }

        self.balance = self.exchange.account().await?;
        self.session.refresh_equity(self.balance.equity);
        self.live = self.exchange.positions().await?;

        let snapshot: Vec<ExchangePosition> = self
            .live
            .iter()
            .map(|p| ExchangePosition {
                symbol: p.symbol.clone(),
                side: p.side,
                entry_price: p.entry_price,
                quantity: p.quantity,
            })
            .collect();

        for gone in self.lifecycle.reconcile(&snapshot) {
            // Best estimate of the exit: the venue closed it somewhere near the current price
            let price = match self.exchange.ticker(&gone.symbol).await {
                Ok(ticker) => ticker.last,
                Err(_) => gone.entry_price,
            };
            let signal = self
                .lifecycle
                .settle(gone, price, CloseReason::External, "no longer open on the exchange");
            self.handle_close(signal).await;
        }

        // Re-link adopted positions to the memory written when they were opened
        let unlinked: Vec<String> = self
            .lifecycle
            .positions()
            .filter(|p| p.memory_id.is_none())
            .map(|p| p.symbol.clone())
            .collect();
        for symbol in unlinked {
            match self.memory.pending_for(&symbol).await {
                Ok(Some(memory)) => {
                    if let Some(id) = memory.id {
                        self.lifecycle.attach_memory(&symbol, id);
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("Could not look up pending memory for {}: {}", symbol, e),
            }
        }
        Ok(())
    }

    fn exposures(&self) -> Vec<PositionExposure> {
        self.live
            .iter()
            .map(|p| PositionExposure {
                symbol: p.symbol.clone(),
                side: p.side,
                unrealized_pnl: p.unrealized_pnl,
                pnl_pct: p.pnl_pct(),
            })
            .collect()
    }

    async fn check_margin(&mut self) {
        let check = self
            .margin
            .check(self.balance.equity, self.balance.available, &self.exposures());
        self.margin_ok = check.ok;
        if check.ok {
            return;
        }

        tracing::warn!("{}", check.reason);
        self.status.push_activity("margin", check.reason.clone());
        if let Some(symbol) = check.close_candidate {
            self.corrective_close(&symbol).await;
        }
    }

    async fn corrective_close(&mut self, symbol: &str) {
        let price = match self.exchange.ticker(symbol).await {
            Ok(ticker) => ticker.last,
            Err(e) => {
                tracing::warn!("No price for corrective close of {}: {}", symbol, e);
                return;
            }
        };
        let Some(before) = self.lifecycle.get(symbol).cloned() else {
            tracing::warn!("{} is not tracked, cannot close it for margin", symbol);
            return;
        };
        if let Some(signal) = self.lifecycle.force_close(symbol, price) {
            tracing::warn!("Closing {} ({:+.2}%) to free margin", symbol, signal.pnl_pct);
            self.execute_close(before, signal).await;
        }
    }

    // -----------------------------------------------------------------------
    // Per-symbol pipeline
    // -----------------------------------------------------------------------

    async fn market_context(&self, symbol: &str) -> Result<MarketContext> {
        let ticker = self.exchange.ticker(symbol).await?;
        let candles = self
            .exchange
            .candles(symbol, &self.config.candle_interval, self.config.candle_limit)
            .await?;
        let higher = if self.config.htf_interval.is_empty() {
            None
        } else {
            match self
                .exchange
                .candles(symbol, &self.config.htf_interval, self.config.candle_limit)
                .await
            {
                Ok(candles) => Some(candles),
                Err(e) => {
                    tracing::debug!("{} higher timeframe unavailable: {}", symbol, e);
                    None
                }
            }
        };
        let book = self.exchange.order_book(symbol, self.config.book_depth).await?;

        Ok(self
            .context_builder
            .build(symbol, ticker.last, &candles, higher.as_deref(), &book)?)
    }

    async fn run_symbol(&mut self, symbol: &str) -> Result<()> {
        self.metrics.symbols_scanned += 1;

        let ctx = match self.market_context(symbol).await {
            Ok(ctx) => ctx,
            Err(e) => {
                tracing::warn!("Skipping {}: {}", symbol, e);
                return Ok(());
            }
        };

        // An open position is managed, never stacked
        if self.lifecycle.is_tracking(symbol) {
            let tick = Tick {
                price: ctx.price,
                rsi: Some(ctx.rsi),
                adx: Some(ctx.adx),
            };
            self.monitor(symbol, tick).await;
            return Ok(());
        }

        if self.session.halted {
            tracing::debug!(
                "{}: session halted ({}), no new entries",
                symbol,
                self.session.halt_reason.as_deref().unwrap_or("no reason")
            );
            return Ok(());
        }
        if !self.margin_ok {
            tracing::info!("{}: margin short, entries paused this cycle", symbol);
            return Ok(());
        }

        let poll_start = AgentMetrics::start_timer();
        let outcome = self.pool.poll(&ctx).await;
        self.metrics.record_poll_duration(poll_start);
        self.metrics.votes_received += outcome.votes.len() as u64;
        self.metrics.predictor_failures += outcome.failures.len() as u64;

        let signal = match aggregate(&outcome.votes) {
            Ok(signal) => signal,
            Err(e) => {
                self.metrics.no_voter_skips += 1;
                tracing::warn!("Skipping {}: {}", symbol, e);
                return Ok(());
            }
        };
        self.metrics.signals_generated += 1;
        self.status.set_signal(symbol, &signal);
        tracing::info!(
            "{} consensus {} ({:.2}, {:.0}% of {} voters)",
            symbol,
            signal.action,
            signal.confidence,
            signal.consensus_score,
            signal.total_votes()
        );

        // Preliminary notional for the guardian's size check
        let size = if signal.action.is_entry() {
            self.sizer
                .target_notional(
                    self.session.equity,
                    self.sizer.win_rate.prior(signal.confidence),
                    ctx.atr_pct,
                    signal.confidence,
                    self.session.risk_scaler,
                )
                .unwrap_or(0.0)
        } else {
            0.0
        };

        let result = self.pipeline.run(
            signal,
            &ctx,
            &GuardianFacts {
                size,
                open_positions: self.lifecycle.len(),
                halted: self.session.halted,
                daily_loss_pct: self.session.daily_loss_pct,
            },
        );
        tracing::debug!("{} pipeline: {}", symbol, result.summary());
        for entry in result.trail.iter().filter(|t| !t.note.is_empty()) {
            tracing::trace!("{} {}: {}", symbol, entry.stage, entry.note);
        }
        for m in &result.applied {
            tracing::debug!("{} modifier {} x{:.3}", symbol, m.name, m.factor);
        }

        if result.halt && !self.session.halted {
            tracing::error!("{}: {}", symbol, result.decision.reason);
            self.session.latch_halt(result.decision.reason.clone());
            self.status.push_activity("halt", result.decision.reason.clone());
        }
        if result.decision.stage == Stage::Guardian {
            self.metrics.guardian_overrides += 1;
        }

        let Some(side) = result.decision.action.side() else {
            self.metrics.holds += 1;
            tracing::info!(
                "{} HOLD ({}): {}",
                symbol,
                result.decision.stage,
                result.decision.reason
            );
            return Ok(());
        };

        self.enter(symbol, &ctx, side, &result).await
    }

    async fn enter(&mut self, symbol: &str, ctx: &MarketContext, side: Side, result: &PipelineResult) -> Result<()> {
        let decision = &result.decision;

        let lot = match self.exchange.lot_spec(symbol).await {
            Ok(lot) => lot,
            Err(e) => {
                tracing::warn!("Skipping {}: no lot spec: {}", symbol, e);
                return Ok(());
            }
        };
        let memories = match self.memory.closed(self.config.memory_lookback).await {
            Ok(memories) => memories,
            Err(e) => {
                tracing::warn!("Trade memory unavailable, sizing from the prior: {}", e);
                Vec::new()
            }
        };

        let request = SizingRequest {
            symbol: symbol.to_string(),
            side,
            price: ctx.price,
            equity: self.session.equity,
            usable_margin: self.margin.usable_margin(self.balance.equity, self.balance.available),
            atr_pct: ctx.atr_pct,
            confidence: decision.confidence,
            risk_scaler: self.session.risk_scaler,
            lot_step: lot.lot_step,
            conditions: ctx.conditions(),
        };
        let sizing = match self.sizer.size(&request, &memories) {
            Ok(sizing) => sizing,
            Err(abort) => {
                self.metrics.sizing_aborts += 1;
                tracing::info!("{} {} not sized: {}", symbol, decision.action, abort);
                if let SizingAbort::InsufficientMargin { .. } = abort {
                    // One corrective close per cycle: the balance is only re-read next cycle
                    self.margin_ok = false;
                    let exposures = self.exposures();
                    if let Some(worst) = least_profitable(&exposures) {
                        let worst = worst.symbol.clone();
                        self.corrective_close(&worst).await;
                    }
                }
                return Ok(());
            }
        };
        if sizing.quantity < lot.min_quantity {
            tracing::info!(
                "{} quantity {} below venue minimum {}",
                symbol,
                sizing.quantity,
                lot.min_quantity
            );
            return Ok(());
        }

        let proof = self
            .recorder
            .record_decision(symbol, decision.action, decision.confidence, &result.summary());

        let execution = match self.executor.open_position(symbol, side, &sizing, ctx.price).await {
            Ok(Some(execution)) => execution,
            Ok(None) => return Ok(()),
            Err(e) => match classify_failure(&e) {
                FailureAction::CleanupAndSkip => {
                    tracing::warn!("{}: {}, cancelling resting orders", symbol, e);
                    if let Err(err) = self
                        .executor
                        .cancel_stale_orders(Some(symbol), ChronoDuration::zero())
                        .await
                    {
                        tracing::warn!("Order cleanup for {} failed: {}", symbol, err);
                    }
                    return Ok(());
                }
                FailureAction::AbortSymbol => {
                    self.metrics.trades_failed += 1;
                    tracing::warn!("{} entry aborted: {}", symbol, e);
                    return Ok(());
                }
                FailureAction::Propagate => {
                    self.metrics.trades_failed += 1;
                    return Err(e.into());
                }
            },
        };

        let memory_id = match self
            .memory
            .insert_pending(symbol, decision.action, decision.confidence, &ctx.conditions())
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!("Failed to store trade memory for {}: {}", symbol, e);
                None
            }
        };
        tracing::info!(
            "{} opened: order {} filled {} @ {:.4}",
            symbol,
            execution.order_id,
            execution.quantity,
            execution.fill_price
        );
        self.lifecycle.open(
            OpenPosition::new(symbol, side, execution.fill_price, execution.quantity).with_memory(memory_id),
        );
        self.recorder.record_trade(
            &proof.hash,
            symbol,
            decision.action,
            execution.fill_price,
            execution.quantity_f64(),
            decision.confidence,
        );

        self.metrics.trades_opened += 1;
        self.status.push_activity(
            "open",
            format!(
                "{} {} {} @ {:.4} ({:.2} notional, conf {:.2}, via {})",
                decision.action,
                execution.quantity,
                symbol,
                execution.fill_price,
                sizing.notional,
                decision.confidence,
                decision.stage
            ),
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    async fn monitor(&mut self, symbol: &str, tick: Tick) {
        let Some(before) = self.lifecycle.get(symbol).cloned() else {
            return;
        };
        if let Some(signal) = self.lifecycle.on_tick(symbol, &tick) {
            self.execute_close(before, signal).await;
        }
    }

    /// Positions adopted from the exchange on symbols we do not scan still
    /// get stop and profit management.
    async fn monitor_off_watchlist(&mut self) {
        let extra: Vec<String> = self
            .lifecycle
            .positions()
            .map(|p| p.symbol.clone())
            .filter(|s| !self.config.symbols.contains(s))
            .collect();

        for symbol in extra {
            match self.exchange.ticker(&symbol).await {
                Ok(ticker) => self.monitor(&symbol, Tick::price(ticker.last)).await,
                Err(e) => tracing::warn!("No price for off-watchlist position {}: {}", symbol, e),
            }
        }
    }

    async fn execute_close(&mut self, before: OpenPosition, signal: CloseSignal) {
        match self.executor.close_position(&signal.symbol, signal.side).await {
            Ok(_) => {
                self.live.retain(|p| p.symbol != signal.symbol);
                self.handle_close(signal).await;
            }
            Err(e) => {
                // Still open on the venue: keep managing it
                tracing::error!("Failed to close {} ({}): {}", signal.symbol, signal.reason, e);
                self.metrics.trades_failed += 1;
                self.lifecycle.open(before);
            }
        }
    }

    async fn handle_close(&mut self, signal: CloseSignal) {
        if let Some(id) = signal.memory_id {
            if let Err(e) = self.memory.finalize(id, signal.outcome, signal.pnl_pct).await {
                tracing::warn!("Failed to finalize memory {} for {}: {}", id, signal.symbol, e);
            }
        }

        let pnl = signal.realized_pnl();
        self.session.record_realized_pnl(pnl);
        self.metrics.record_close(signal.outcome, pnl);

        let exit_action = signal.side.opposite().opening_action();
        let quantity = signal.quantity.to_f64().unwrap_or(0.0);
        let reasoning = format!("{} {}: {}", signal.reason, signal.outcome.as_str(), signal.detail);
        let proof = self.recorder.record_decision(&signal.symbol, exit_action, 1.0, &reasoning);
        self.recorder
            .record_trade(&proof.hash, &signal.symbol, exit_action, signal.price, quantity, 1.0);

        self.status.push_activity(
            "close",
            format!(
                "{} {} closed @ {:.4}: {} {:+.2}% ({:+.2})",
                signal.side,
                signal.symbol,
                signal.price,
                signal.reason,
                signal.pnl_pct,
                pnl
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use exchange_client::{FixedPrices, PaperConfig, PaperExchange};
    use regime_controller::RegimeConfig;
    use risk_manager::MarginConfig;
    use sqlx::sqlite::SqlitePoolOptions;
    use trade_recorder::LogLedger;
    use trading_core::{Action, Predictor, PredictorResult, PredictorVote};

    struct Fixed {
        name: &'static str,
        action: Action,
        confidence: f64,
    }

    #[async_trait]
    impl Predictor for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn timeout(&self) -> Duration {
            Duration::from_secs(1)
        }

        async fn evaluate(&self, _context: &MarketContext) -> PredictorResult<PredictorVote> {
            Ok(PredictorVote::new(self.name, "fixed", self.action, self.confidence, "test"))
        }
    }

    struct Harness {
        trader: Trader,
        prices: Arc<FixedPrices>,
        exchange: Arc<dyn Exchange>,
        memory: TradeMemoryStore,
    }

    async fn harness(name: &str, session: SessionContext) -> Harness {
        harness_with(name, &["BTCUSDT"], session).await
    }

    async fn harness_with(name: &str, symbols: &[&str], session: SessionContext) -> Harness {
        let mut config = AgentConfig::for_tests(symbols);
        config.max_open_positions = config.max_open_positions.max(symbols.len());
        config.status_path = std::env::temp_dir()
            .join(format!("trader-{}-{}.json", name, std::process::id()))
            .to_string_lossy()
            .into_owned();

        let prices = Arc::new(FixedPrices::new(symbols.iter().map(|s| (*s, 100.0))));
        let exchange: Arc<dyn Exchange> = Arc::new(PaperExchange::new(
            PaperConfig::default(),
            Arc::clone(&prices) as Arc<dyn exchange_client::MarketDataSource>,
        ));
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let memory = TradeMemoryStore::from_pool(db).await.unwrap();

        let pool = PredictorPool::new(vec![
            Arc::new(Fixed {
                name: "alpha",
                action: Action::Buy,
                confidence: 0.8,
            }),
            Arc::new(Fixed {
                name: "beta",
                action: Action::Buy,
                confidence: 0.8,
            }),
            Arc::new(Fixed {
                name: "gamma",
                action: Action::Hold,
                confidence: 0.5,
            }),
        ]);

        let trader = Trader::new(TraderParts {
            config,
            exchange: Arc::clone(&exchange),
            pool,
            regime: RegimeController::new(RegimeConfig::default(), None),
            memory: memory.clone(),
            recorder: Recorder::new(Arc::new(LogLedger::new())),
            session,
        })
        .unwrap();

        Harness {
            trader,
            prices,
            exchange,
            memory,
        }
    }

    fn fresh_session() -> SessionContext {
        SessionContext::new(1_000.0, Utc::now().date_naive())
    }

    #[tokio::test]
    async fn test_cycle_opens_then_closes_on_moonshot() {
        let mut h = harness("moonshot", fresh_session()).await;

        h.trader.run_cycle().await.unwrap();
        assert_eq!(h.trader.lifecycle.len(), 1);
        assert_eq!(h.exchange.positions().await.unwrap().len(), 1);
        assert_eq!(h.memory.stats().await.unwrap().pending, 1);
        assert_eq!(h.trader.metrics().trades_opened, 1);

        h.prices.set_price("BTCUSDT", 113.0).await;
        h.trader.run_cycle().await.unwrap();

        assert!(h.trader.lifecycle.is_empty());
        assert!(h.exchange.positions().await.unwrap().is_empty());
        let stats = h.memory.stats().await.unwrap();
        assert_eq!(stats.wins, 1);
        assert_eq!(stats.pending, 0);
        assert_eq!(h.trader.metrics().winning_trades, 1);
        assert_eq!(h.trader.session().daily_loss_pct, 0.0);
    }

    #[tokio::test]
    async fn test_daily_loss_latches_halt() {
        let mut session = fresh_session();
        session.record_realized_pnl(-60.0);
        let mut h = harness("halt", session).await;

        h.trader.run_cycle().await.unwrap();

        assert!(h.trader.session().halted);
        assert!(h.trader.lifecycle.is_empty());
        assert!(h.exchange.positions().await.unwrap().is_empty());

        // Halted sessions stop polling entirely
        let signals = h.trader.metrics().signals_generated;
        h.trader.run_cycle().await.unwrap();
        assert_eq!(h.trader.metrics().signals_generated, signals);
    }

    #[tokio::test]
    async fn test_venue_side_close_is_settled_as_loss() {
        let mut h = harness("external", fresh_session()).await;
        h.trader.run_cycle().await.unwrap();
        assert_eq!(h.trader.lifecycle.len(), 1);

        // Venue stop fires between cycles
        h.prices.set_price("BTCUSDT", 97.0).await;
        h.exchange.flash_close("BTCUSDT", Side::Long).await.unwrap();
        h.trader.refresh_account().await.unwrap();

        let stats = h.memory.stats().await.unwrap();
        assert_eq!(stats.losses, 1);
        assert!(h.trader.lifecycle.is_empty());
        assert!(h.trader.session().daily_loss_pct > 0.0);
        assert_eq!(h.trader.metrics().losing_trades, 1);
    }

    #[tokio::test]
    async fn test_adopted_position_relinks_pending_memory() {
        let mut h = harness("adopt", fresh_session()).await;
        h.trader.run_cycle().await.unwrap();
        let id = h.trader.lifecycle.get("BTCUSDT").unwrap().memory_id;
        assert!(id.is_some());

        // Restart: a fresh manager only knows what the exchange reports
        h.trader.lifecycle = LifecycleManager::default();
        h.trader.refresh_account().await.unwrap();

        let adopted = h.trader.lifecycle.get("BTCUSDT").unwrap();
        assert!(adopted.adopted);
        assert_eq!(adopted.memory_id, id);
    }

    #[tokio::test]
    async fn test_margin_breach_closes_and_pauses_entries() {
        let mut h = harness("margin", fresh_session()).await;
        h.trader.run_cycle().await.unwrap();
        assert_eq!(h.trader.lifecycle.len(), 1);

        // Any open position eats into a 99% buffer
        h.trader.margin = MarginGuard::new(MarginConfig { buffer_pct: 99.0 }).unwrap();

        h.trader.run_cycle().await.unwrap();
        assert!(!h.trader.margin_ok);
        assert!(h.trader.lifecycle.is_empty());
        assert!(h.exchange.positions().await.unwrap().is_empty());
        assert_eq!(h.trader.metrics().trades_closed, 1);
        assert_eq!(h.trader.metrics().trades_opened, 1);
        assert_eq!(h.memory.stats().await.unwrap().pending, 0);
    }

    #[tokio::test]
    async fn test_short_margin_closes_one_position_per_cycle() {
        let symbols = ["BTCUSDT", "ETHUSDT", "SOLUSDT", "ADAUSDT", "XRPUSDT", "DOTUSDT"];
        let mut h = harness_with("margin-once", &symbols, fresh_session()).await;

        h.trader.config.symbols.truncate(3);
        h.trader.run_cycle().await.unwrap();
        assert_eq!(h.trader.lifecycle.len(), 3);

        // Buffer intact, but too little left over to size any new entry
        let account = h.exchange.account().await.unwrap();
        let buffer_pct = (account.available - 1.0) / account.equity * 100.0;
        h.trader.margin = MarginGuard::new(MarginConfig { buffer_pct }).unwrap();
        h.trader.config.symbols = symbols.iter().map(|s| s.to_string()).collect();

        h.trader.run_cycle().await.unwrap();
        assert!(!h.trader.margin_ok);
        assert_eq!(h.trader.metrics().sizing_aborts, 1);
        assert_eq!(h.trader.metrics().trades_closed, 1);
        assert_eq!(h.trader.lifecycle.len(), 2);
        assert_eq!(h.exchange.positions().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_no_voters_skips_symbol() {
        let mut h = harness("novote", fresh_session()).await;
        h.trader.pool = PredictorPool::new(Vec::new());

        h.trader.run_cycle().await.unwrap();
        assert_eq!(h.trader.metrics().no_voter_skips, 1);
        assert!(h.trader.lifecycle.is_empty());
        assert_eq!(h.memory.stats().await.unwrap().total, 0);
    }
}
