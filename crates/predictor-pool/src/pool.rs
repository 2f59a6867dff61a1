use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use trading_core::{MarketContext, Predictor, PredictorError, PredictorVote};

/// What one predictor produced for one cycle
#[derive(Debug, Clone)]
pub enum PredictorOutcome {
    Vote(PredictorVote),
    ParseError { provider: String, message: String },
    ProviderError { provider: String, error: PredictorError },
    Timeout { provider: String, after: Duration },
}

impl PredictorOutcome {
    fn from_result(provider: &str, result: Result<PredictorVote, PredictorError>) -> Self {
        match result {
            Ok(vote) => PredictorOutcome::Vote(vote),
            Err(PredictorError::Parse(message)) => PredictorOutcome::ParseError {
                provider: provider.to_string(),
                message,
            },
            Err(PredictorError::Timeout(after)) => PredictorOutcome::Timeout {
                provider: provider.to_string(),
                after,
            },
            Err(error) => PredictorOutcome::ProviderError {
                provider: provider.to_string(),
                error,
            },
        }
    }

    pub fn provider(&self) -> &str {
        match self {
            PredictorOutcome::Vote(v) => &v.provider,
            PredictorOutcome::ParseError { provider, .. }
            | PredictorOutcome::ProviderError { provider, .. }
            | PredictorOutcome::Timeout { provider, .. } => provider,
        }
    }
}

/// All outcomes of one fan-out, split into votes and failures
#[derive(Debug, Clone, Default)]
pub struct PoolOutcome {
    /// Sorted by provider so aggregation input is stable
    pub votes: Vec<PredictorVote>,
    pub failures: Vec<PredictorOutcome>,
}

impl PoolOutcome {
    pub fn voters(&self) -> usize {
        self.votes.len()
    }
}

/// Runs every registered predictor concurrently, each under its own timeout.
#[derive(Clone, Default)]
pub struct PredictorPool {
    predictors: Vec<Arc<dyn Predictor>>,
}

impl PredictorPool {
    pub fn new(predictors: Vec<Arc<dyn Predictor>>) -> Self {
        Self { predictors }
    }

    pub fn push(&mut self, predictor: Arc<dyn Predictor>) {
        self.predictors.push(predictor);
    }

    pub fn len(&self) -> usize {
        self.predictors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predictors.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.predictors.iter().map(|p| p.name().to_string()).collect()
    }

    /// Fan out to all predictors and collect whatever answers in time.
    pub async fn poll(&self, context: &MarketContext) -> PoolOutcome {
        let mut tasks = JoinSet::new();
        let shared = Arc::new(context.clone());

        for predictor in &self.predictors {
            let predictor = Arc::clone(predictor);
            let context = Arc::clone(&shared);
            tasks.spawn(async move {
                let name = predictor.name().to_string();
                let limit = predictor.timeout();
                let result = match tokio::time::timeout(limit, predictor.evaluate(&context)).await {
                    Ok(result) => result,
                    Err(_) => Err(PredictorError::Timeout(limit)),
                };
                PredictorOutcome::from_result(&name, result)
            });
        }

        let mut outcome = PoolOutcome::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(PredictorOutcome::Vote(vote)) => {
                    tracing::debug!(
                        "{} {}/{}: {} ({:.2}) in {:?}",
                        context.symbol,
                        vote.provider,
                        vote.model,
                        vote.action,
                        vote.confidence,
                        vote.latency
                    );
                    outcome.votes.push(vote);
                }
                Ok(failure) => {
                    tracing::warn!("{} predictor failed: {:?}", context.symbol, failure);
                    outcome.failures.push(failure);
                }
                Err(e) => tracing::error!("Predictor task panicked: {}", e),
            }
        }

        outcome.votes.sort_by(|a, b| a.provider.cmp(&b.provider));
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::time::Instant;
    use trading_core::{Action, PredictorResult, TrendBias};

    struct Scripted {
        name: &'static str,
        delay: Duration,
        result: Result<(Action, f64), PredictorError>,
    }

    #[async_trait]
    impl Predictor for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        fn timeout(&self) -> Duration {
            Duration::from_millis(100)
        }

        async fn evaluate(&self, _context: &MarketContext) -> PredictorResult<PredictorVote> {
            tokio::time::sleep(self.delay).await;
            self.result
                .clone()
                .map(|(action, conf)| PredictorVote::new(self.name, "m", action, conf, ""))
        }
    }

    fn context() -> MarketContext {
        MarketContext {
            symbol: "SOLUSDT".into(),
            price: 150.0,
            ofi: 0.0,
            rsi: 50.0,
            adx: 20.0,
            atr_pct: 1.0,
            trend: TrendBias::Neutral,
            htf_trend: None,
            whale_imbalance: None,
            timestamp: Utc::now(),
        }
    }

    fn scripted(
        name: &'static str,
        delay_ms: u64,
        result: Result<(Action, f64), PredictorError>,
    ) -> Arc<dyn Predictor> {
        Arc::new(Scripted {
            name,
            delay: Duration::from_millis(delay_ms),
            result,
        })
    }

    #[tokio::test]
    async fn collects_partial_results() {
        let pool = PredictorPool::new(vec![
            scripted("b", 0, Ok((Action::Buy, 0.7))),
            scripted("a", 5, Ok((Action::Sell, 0.6))),
            scripted("c", 0, Err(PredictorError::Parse("junk".into()))),
            scripted("d", 0, Err(PredictorError::Quota("429".into()))),
            scripted("e", 1_000, Ok((Action::Buy, 0.9))),
        ]);

        let started = Instant::now();
        let outcome = pool.poll(&context()).await;

        assert!(started.elapsed() < Duration::from_millis(900));
        assert_eq!(outcome.voters(), 2);
        assert_eq!(outcome.votes[0].provider, "a");
        assert_eq!(outcome.failures.len(), 3);
        assert!(outcome
            .failures
            .iter()
            .any(|f| matches!(f, PredictorOutcome::Timeout { provider, .. } if provider == "e")));
        assert!(outcome
            .failures
            .iter()
            .any(|f| matches!(f, PredictorOutcome::ParseError { .. })));
        assert!(outcome
            .failures
            .iter()
            .any(|f| matches!(f, PredictorOutcome::ProviderError { .. })));
    }

    #[tokio::test]
    async fn empty_pool_yields_nothing() {
        let outcome = PredictorPool::default().poll(&context()).await;
        assert_eq!(outcome.voters(), 0);
        assert!(outcome.failures.is_empty());
    }
}
