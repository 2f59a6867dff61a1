pub mod backoff;
pub mod cloud;
pub mod error;
pub mod local;
pub mod pool;
pub mod repair;

pub use backoff::BackoffPolicy;
pub use cloud::{build_prompt, CloudPredictor, CompletionBackend, HttpCompletionBackend};
pub use local::{ImbalanceMomentumModel, LocalPredictor, PatternModel, RuleConfig, RuleGuardian};
pub use pool::{PoolOutcome, PredictorOutcome, PredictorPool};
pub use repair::{repair_json, vote_from_text, vote_from_value, RepairStrategy};

use anyhow::{Context, Result};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use trading_core::Predictor;

/// One cloud provider and its model fallback chain
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub name: String,
    pub base_url: String,
    pub api_key: String,
    pub models: Vec<String>,
}

/// Configuration for the predictor committee
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub providers: Vec<ProviderConfig>,
    pub timeout: Duration,
    pub backoff: BackoffPolicy,
    pub local_enabled: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            timeout: Duration::from_secs(20),
            backoff: BackoffPolicy::default(),
            local_enabled: true,
        }
    }
}

fn default_base_url(provider: &str) -> Option<&'static str> {
    match provider {
        "groq" => Some("https://api.groq.com/openai/v1"),
        "openrouter" => Some("https://openrouter.ai/api/v1"),
        "openai" => Some("https://api.openai.com/v1"),
        "deepseek" => Some("https://api.deepseek.com/v1"),
        "mistral" => Some("https://api.mistral.ai/v1"),
        "together" => Some("https://api.together.xyz/v1"),
        _ => None,
    }
}

impl PoolConfig {
    /// Reads `PREDICTOR_PROVIDERS` (comma separated) and, per provider,
    /// `{NAME}_API_KEY`, `{NAME}_BASE_URL` and `{NAME}_MODELS`.
    /// Providers without an API key are skipped.
    pub fn from_env() -> Result<Self> {
        let names = env::var("PREDICTOR_PROVIDERS").unwrap_or_else(|_| "groq,openrouter".to_string());

        let mut providers = Vec::new();
        for name in names.split(',').map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty()) {
            let prefix = name.to_uppercase();
            let Ok(api_key) = env::var(format!("{}_API_KEY", prefix)) else {
                tracing::warn!("{}_API_KEY not set, {} predictor disabled", prefix, name);
                continue;
            };

            let base_url = match env::var(format!("{}_BASE_URL", prefix)) {
                Ok(url) => url,
                Err(_) => default_base_url(&name)
                    .with_context(|| format!("{}_BASE_URL required for provider {}", prefix, name))?
                    .to_string(),
            };

            let models: Vec<String> = env::var(format!("{}_MODELS", prefix))
                .with_context(|| format!("{}_MODELS required for provider {}", prefix, name))?
                .split(',')
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect();

            providers.push(ProviderConfig {
                name,
                base_url,
                api_key,
                models,
            });
        }

        Ok(Self {
            providers,
            timeout: Duration::from_secs(
                env::var("PREDICTOR_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "20".to_string())
                    .parse()?,
            ),
            backoff: BackoffPolicy::new(
                Duration::from_millis(
                    env::var("PREDICTOR_BACKOFF_MS")
                        .unwrap_or_else(|_| "2000".to_string())
                        .parse()?,
                ),
                env::var("PREDICTOR_MAX_RETRIES")
                    .unwrap_or_else(|_| "2".to_string())
                    .parse()?,
            ),
            local_enabled: env::var("LOCAL_PREDICTOR_ENABLED")
                .unwrap_or_else(|_| "true".to_string())
                .parse()?,
        })
    }
}

impl PredictorPool {
    /// Build the committee described by `config`.
    pub fn from_config(config: &PoolConfig) -> Result<Self> {
        let mut predictors: Vec<Arc<dyn Predictor>> = Vec::new();

        for provider in &config.providers {
            let backend = HttpCompletionBackend::new(
                provider.base_url.clone(),
                provider.api_key.clone(),
                config.timeout,
            )?;
            predictors.push(Arc::new(CloudPredictor::new(
                provider.name.clone(),
                provider.models.clone(),
                Arc::new(backend),
                config.backoff,
                config.timeout,
            )));
        }

        if config.local_enabled {
            predictors.push(Arc::new(LocalPredictor::default()));
        }

        if predictors.is_empty() {
            anyhow::bail!("No predictors configured");
        }

        tracing::info!(
            "Predictor pool: {}",
            predictors.iter().map(|p| p.name()).collect::<Vec<_>>().join(", ")
        );
        Ok(Self::new(predictors))
    }
}
