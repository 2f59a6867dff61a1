use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use exchange_client::{connect_with_fallback, Exchange, GatewayExchange, PaperExchange, PublicRestSource};
use predictor_pool::{HttpCompletionBackend, PoolConfig, PredictorPool};
use regime_controller::{LlmMacroAdvisor, MacroAdvisor, RegimeConfig, RegimeController};
use tokio::signal::unix::SignalKind;
use tokio::time;
use trade_recorder::{HttpLedger, Ledger, LogLedger, Recorder, TradeMemoryStore};
use trading_core::SessionContext;

mod config;
mod metrics;
mod pipeline;
mod state_manager;
mod trade_executor;
mod trader;

use config::AgentConfig;
use state_manager::StateManager;
use trader::{Trader, TraderParts};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load .env, init tracing
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    // Panic hook: log panic info before crashing
    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));

    tracing::info!("Starting consensus futures trader");

    // 2. Configuration
    let config = AgentConfig::from_env()?;
    tracing::info!("Configuration loaded and validated");
    tracing::info!("  Symbols: {}", config.symbols.join(", "));
    tracing::info!(
        "  Scan every {}s, regime every {}s",
        config.scan_interval_seconds,
        config.regime_interval_seconds
    );
    tracing::info!("  Min confidence: {:.0}%", config.min_confidence * 100.0);
    tracing::info!(
        "  Trade size ${}-${} at {}x, stop {}%",
        config.min_trade,
        config.max_trade,
        config.leverage,
        config.stop_loss_pct
    );
    if !config.trading_enabled {
        tracing::warn!("TRADING_ENABLED=false: dry run, no orders will be sent");
    }

    // 3. Persistence: trade memory and agent state share one database
    let memory = TradeMemoryStore::connect(&config.database_url).await?;
    let state_manager = StateManager::new(memory.pool().clone());
    state_manager.init_tables().await?;
    tracing::info!("Trade memory ready ({})", config.database_url);

    // 4. Predictor committee
    let pool_config = PoolConfig::from_env()?;
    let pool = PredictorPool::from_config(&pool_config)?;

    // 5. Audit ledger
    let ledger: Arc<dyn Ledger> = match &config.ledger_url {
        Some(url) => Arc::new(HttpLedger::new(url.clone(), config.http_timeout())?),
        None => {
            tracing::info!("LEDGER_URL not set, decisions are logged only");
            Arc::new(LogLedger::new())
        }
    };
    let recorder = Recorder::new(ledger);

    // 6. Regime controller, with the macro advisor when a model is named
    let advisor: Option<Arc<dyn MacroAdvisor>> = match (&config.advisor_model, pool_config.providers.first()) {
        (Some(model), Some(provider)) => {
            let backend = HttpCompletionBackend::new(
                provider.base_url.clone(),
                provider.api_key.clone(),
                pool_config.timeout,
            )?;
            tracing::info!("Regime advisor: {} via {}", model, provider.name);
            Some(Arc::new(LlmMacroAdvisor::new(Arc::new(backend), model.clone())))
        }
        (Some(_), None) => {
            tracing::warn!("REGIME_ADVISOR_MODEL set but no predictor provider configured, rules only");
            None
        }
        _ => None,
    };
    let regime = RegimeController::new(RegimeConfig::default(), advisor);

    // 7. Exchange: gateway when configured, paper ledger otherwise
    let market_data = Arc::new(PublicRestSource::new(config.market_data_url.clone(), config.http_timeout())?);
    let paper: Arc<dyn Exchange> = Arc::new(PaperExchange::new(config.paper_config(), market_data));
    let primary: Option<Arc<dyn Exchange>> = match GatewayExchange::from_env(config.http_timeout()) {
        Some(gateway) => Some(Arc::new(gateway?)),
        None => None,
    };
    let connection = connect_with_fallback(primary, paper, &config.connect_policy()).await?;
    if connection.fell_back {
        tracing::warn!("Exchange gateway unreachable, running on the paper ledger");
    }
    tracing::info!(
        "Connected to {}: equity {:.2}, available {:.2}",
        connection.exchange.name(),
        connection.balance.equity,
        connection.balance.available
    );

    // 8. Session: resume today's limits or start fresh
    let today = Utc::now().date_naive();
    let session = match state_manager.restore_session(connection.balance.equity, today).await {
        Ok(Some(session)) => {
            tracing::info!(
                "Resumed session: daily loss {:.2}%, regime {} ({}), halted {}",
                session.daily_loss_pct,
                session.regime,
                session.mode,
                session.halted
            );
            session
        }
        Ok(None) => SessionContext::new(connection.balance.equity, today),
        Err(e) => {
            tracing::warn!("Failed to load saved session, starting fresh: {}", e);
            SessionContext::new(connection.balance.equity, today)
        }
    };

    let scan_every = Duration::from_secs(config.scan_interval_seconds);
    let regime_every = Duration::from_secs(config.regime_interval_seconds);

    let mut trader = Trader::new(TraderParts {
        config,
        exchange: connection.exchange,
        pool,
        regime,
        memory,
        recorder,
        session,
    })?;

    if let Ok(Some(saved)) = state_manager.load_metrics().await {
        trader.metrics_mut().restore_from_json(&saved);
    }

    trader.startup().await?;
    if let Err(e) = trader.run_regime().await {
        tracing::warn!("Initial regime evaluation failed: {}", e);
    }

    tracing::info!(
        "Trader is now running. Scanning every {}s. Press Ctrl+C to stop.",
        scan_every.as_secs()
    );

    // Main loop with graceful shutdown (SIGINT + SIGTERM)
    let mut scan_interval = time::interval(scan_every);
    let mut regime_interval = time::interval_at(time::Instant::now() + regime_every, regime_every);
    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;
    let shutdown = async {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received SIGINT");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM");
            }
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = scan_interval.tick() => {
                if let Err(e) = trader.run_cycle().await {
                    tracing::error!("Error in trading cycle: {}", e);
                    trader.push_activity("error", format!("cycle failed: {}", e));
                }
                persist(&state_manager, &trader).await;
            }
            _ = regime_interval.tick() => {
                if let Err(e) = trader.run_regime().await {
                    tracing::warn!("Regime evaluation failed: {}", e);
                }
                persist(&state_manager, &trader).await;
            }
            _ = &mut shutdown => {
                tracing::info!("Shutdown signal received, exiting gracefully...");
                persist(&state_manager, &trader).await;
                if let Err(e) = trader.write_status().await {
                    tracing::warn!("Failed to write final status: {}", e);
                }
                trader.metrics().log_metrics();
                break;
            }
        }
    }

    tracing::info!("Trader shut down.");
    Ok(())
}

async fn persist(state_manager: &StateManager, trader: &Trader) {
    if let Err(e) = state_manager.save_session(trader.session()).await {
        tracing::warn!("Failed to persist session: {}", e);
    }
    if let Err(e) = state_manager.save_metrics(&trader.metrics().to_json()).await {
        tracing::debug!("Failed to persist metrics: {}", e);
    }
}
