use anyhow::{bail, Result};
use exchange_client::{ConnectPolicy, PaperConfig, PublicRestSource};
use kelly_position_sizer::{KellyConfig, SizerConfig};
use risk_manager::{GuardianConfig, MarginConfig};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    // Watchlist and cadence
    pub symbols: Vec<String>,
    pub scan_interval_seconds: u64,   // 60
    pub symbol_delay_ms: u64,         // 2000, pause between symbols
    pub regime_interval_seconds: u64, // 3600

    // Market data
    pub candle_interval: String, // "5m"
    pub candle_limit: usize,     // 100
    pub htf_interval: String,    // "1h", empty disables the higher timeframe
    pub book_depth: usize,       // 20

    // Decision
    pub min_confidence: f64,     // 0.60
    pub modifiers: String,       // "order_flow,timeframe_alignment,whale"
    pub max_modifier_boost: f64, // 0.15
    pub trading_enabled: bool,

    // Risk
    pub max_open_positions: usize, // 3
    pub daily_loss_limit_pct: f64, // 5%
    pub margin_buffer_pct: f64,    // 10% of equity kept free

    // Sizing
    pub min_trade: f64,         // $10
    pub max_trade: f64,         // $500
    pub leverage: u32,          // 5x
    pub stop_loss_pct: f64,     // 1.5%
    pub reward_risk_ratio: f64, // 2.0
    pub kelly_multiplier: f64,  // 0.5 = half-Kelly
    pub memory_lookback: i64,   // closed memories considered for the win rate

    // Persistence and outputs
    pub database_url: String,
    pub status_path: String,
    pub activity_max: usize,
    pub metrics_log_interval_cycles: u64,
    pub stale_order_max_age_secs: i64,

    // Collaborators
    pub ledger_url: Option<String>,
    pub advisor_model: Option<String>,
    pub market_data_url: String,
    pub http_timeout_seconds: u64,
    pub connect_attempts: u32,
    pub connect_delay_seconds: u64,
    pub paper_balance: f64,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        let config = Self {
            symbols: env::var("SYMBOLS")
                .unwrap_or_else(|_| "BTCUSDT,ETHUSDT,SOLUSDT".to_string())
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect(),
            scan_interval_seconds: env::var("SCAN_INTERVAL")
                .unwrap_or_else(|_| "60".to_string())
                .parse()?,
            symbol_delay_ms: env::var("SYMBOL_DELAY_MS")
                .unwrap_or_else(|_| "2000".to_string())
                .parse()?,
            regime_interval_seconds: env::var("REGIME_INTERVAL")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()?,

            candle_interval: env::var("CANDLE_INTERVAL").unwrap_or_else(|_| "5m".to_string()),
            candle_limit: env::var("CANDLE_LIMIT")
                .unwrap_or_else(|_| "100".to_string())
                .parse()?,
            htf_interval: env::var("HTF_INTERVAL").unwrap_or_else(|_| "1h".to_string()),
            book_depth: env::var("BOOK_DEPTH")
                .unwrap_or_else(|_| "20".to_string())
                .parse()?,

            min_confidence: env::var("MIN_CONFIDENCE")
                .unwrap_or_else(|_| "0.60".to_string())
                .parse()?,
            modifiers: env::var("CONFIDENCE_MODIFIERS")
                .unwrap_or_else(|_| "order_flow,timeframe_alignment,whale".to_string()),
            max_modifier_boost: env::var("MAX_MODIFIER_BOOST")
                .unwrap_or_else(|_| "0.15".to_string())
                .parse()?,
            trading_enabled: env::var("TRADING_ENABLED")
                .unwrap_or_else(|_| "true".to_string())
                .parse()?,

            max_open_positions: env::var("MAX_OPEN_POSITIONS")
                .unwrap_or_else(|_| "3".to_string())
                .parse()?,
            daily_loss_limit_pct: env::var("DAILY_LOSS_LIMIT")
                .unwrap_or_else(|_| "5.0".to_string())
                .parse()?,
            margin_buffer_pct: env::var("MARGIN_BUFFER")
                .unwrap_or_else(|_| "10.0".to_string())
                .parse()?,

            min_trade: env::var("MIN_TRADE")
                .unwrap_or_else(|_| "10.0".to_string())
                .parse()?,
            max_trade: env::var("MAX_TRADE")
                .unwrap_or_else(|_| "500.0".to_string())
                .parse()?,
            leverage: env::var("LEVERAGE")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,
            stop_loss_pct: env::var("STOP_LOSS_PCT")
                .unwrap_or_else(|_| "1.5".to_string())
                .parse()?,
            reward_risk_ratio: env::var("REWARD_RISK_RATIO")
                .unwrap_or_else(|_| "2.0".to_string())
                .parse()?,
            kelly_multiplier: env::var("KELLY_MULTIPLIER")
                .unwrap_or_else(|_| "0.5".to_string())
                .parse()?,
            memory_lookback: env::var("MEMORY_LOOKBACK")
                .unwrap_or_else(|_| "500".to_string())
                .parse()?,

            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:trader.db".to_string()),
            status_path: env::var("STATUS_PATH").unwrap_or_else(|_| "status.json".to_string()),
            activity_max: env::var("ACTIVITY_MAX")
                .unwrap_or_else(|_| "50".to_string())
                .parse()?,
            metrics_log_interval_cycles: env::var("METRICS_LOG_INTERVAL")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,
            stale_order_max_age_secs: env::var("STALE_ORDER_MAX_AGE")
                .unwrap_or_else(|_| "900".to_string())
                .parse()?,

            ledger_url: env::var("LEDGER_URL").ok().filter(|s| !s.is_empty()),
            advisor_model: env::var("REGIME_ADVISOR_MODEL").ok().filter(|s| !s.is_empty()),
            market_data_url: env::var("MARKET_DATA_URL")
                .unwrap_or_else(|_| PublicRestSource::DEFAULT_BASE_URL.to_string()),
            http_timeout_seconds: env::var("HTTP_TIMEOUT")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,
            connect_attempts: env::var("CONNECT_ATTEMPTS")
                .unwrap_or_else(|_| "3".to_string())
                .parse()?,
            connect_delay_seconds: env::var("CONNECT_DELAY")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,
            paper_balance: env::var("PAPER_BALANCE")
                .unwrap_or_else(|_| "1000.0".to_string())
                .parse()?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject combinations the components would refuse later anyway, with
    /// the env var names in the message.
    pub fn validate(&self) -> Result<()> {
        if self.symbols.is_empty() {
            bail!("SYMBOLS must name at least one symbol");
        }
        if self.scan_interval_seconds == 0 || self.regime_interval_seconds == 0 {
            bail!("SCAN_INTERVAL and REGIME_INTERVAL must be positive");
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            bail!("MIN_CONFIDENCE must be in [0, 1], got {}", self.min_confidence);
        }
        if !(0.0..1.0).contains(&self.max_modifier_boost) {
            bail!("MAX_MODIFIER_BOOST must be in [0, 1)");
        }
        if self.min_trade <= 0.0 || self.min_trade > self.max_trade {
            bail!("MIN_TRADE must be positive and at most MAX_TRADE");
        }
        if self.leverage == 0 {
            bail!("LEVERAGE must be at least 1");
        }
        if !(0.0..100.0).contains(&self.margin_buffer_pct) {
            bail!("MARGIN_BUFFER must be in [0, 100)");
        }
        if self.paper_balance <= 0.0 {
            bail!("PAPER_BALANCE must be positive");
        }
        Ok(())
    }

    pub fn guardian_config(&self) -> GuardianConfig {
        GuardianConfig {
            max_open_positions: self.max_open_positions,
            daily_loss_limit_pct: self.daily_loss_limit_pct,
            max_trade_notional: self.max_trade,
            ..GuardianConfig::default()
        }
    }

    pub fn margin_config(&self) -> MarginConfig {
        MarginConfig {
            buffer_pct: self.margin_buffer_pct,
        }
    }

    pub fn sizer_config(&self) -> SizerConfig {
        SizerConfig {
            reward_risk_ratio: self.reward_risk_ratio,
            stop_loss_pct: self.stop_loss_pct,
            min_trade: self.min_trade,
            max_trade: self.max_trade,
            leverage: self.leverage,
            ..SizerConfig::default()
        }
    }

    pub fn kelly_config(&self) -> Result<KellyConfig> {
        let defaults = KellyConfig::default();
        KellyConfig::new(self.kelly_multiplier, defaults.min_fraction, defaults.max_fraction)
    }

    pub fn paper_config(&self) -> PaperConfig {
        PaperConfig {
            starting_balance: self.paper_balance,
            default_leverage: self.leverage,
            ..PaperConfig::default()
        }
    }

    pub fn connect_policy(&self) -> ConnectPolicy {
        ConnectPolicy {
            attempts: self.connect_attempts.max(1),
            delay: Duration::from_secs(self.connect_delay_seconds),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }
}

#[cfg(test)]
impl AgentConfig {
    /// Defaults without touching the process environment
    pub fn for_tests(symbols: &[&str]) -> Self {
        Self {
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            scan_interval_seconds: 60,
            symbol_delay_ms: 0,
            regime_interval_seconds: 3600,
            candle_interval: "5m".to_string(),
            candle_limit: 100,
            htf_interval: "1h".to_string(),
            book_depth: 20,
            min_confidence: 0.6,
            modifiers: String::new(),
            max_modifier_boost: 0.15,
            trading_enabled: true,
            max_open_positions: 3,
            daily_loss_limit_pct: 5.0,
            margin_buffer_pct: 10.0,
            min_trade: 10.0,
            max_trade: 500.0,
            leverage: 5,
            stop_loss_pct: 1.5,
            reward_risk_ratio: 2.0,
            kelly_multiplier: 0.5,
            memory_lookback: 500,
            database_url: "sqlite::memory:".to_string(),
            status_path: "status.json".to_string(),
            activity_max: 50,
            metrics_log_interval_cycles: 0,
            stale_order_max_age_secs: 900,
            ledger_url: None,
            advisor_model: None,
            market_data_url: PublicRestSource::DEFAULT_BASE_URL.to_string(),
            http_timeout_seconds: 10,
            connect_attempts: 1,
            connect_delay_seconds: 0,
            paper_balance: 1000.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(AgentConfig::for_tests(&["BTCUSDT"]).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AgentConfig::for_tests(&[]);
        assert!(config.validate().is_err());

        config = AgentConfig::for_tests(&["BTCUSDT"]);
        config.min_trade = 600.0;
        assert!(config.validate().is_err());

        config = AgentConfig::for_tests(&["BTCUSDT"]);
        config.min_confidence = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_component_configs_follow_agent_values() {
        let mut config = AgentConfig::for_tests(&["BTCUSDT"]);
        config.max_open_positions = 2;
        config.leverage = 10;

        assert_eq!(config.guardian_config().max_open_positions, 2);
        assert_eq!(config.sizer_config().leverage, 10);
        assert_eq!(config.paper_config().default_leverage, 10);
        assert_eq!(config.kelly_config().unwrap().multiplier, 0.5);
    }
}
