use async_trait::async_trait;
use std::time::Duration;

use crate::{MarketContext, PredictorResult, PredictorVote};

/// A committee member that turns a market snapshot into a vote.
#[async_trait]
pub trait Predictor: Send + Sync {
    /// Provider name used for logging and vote attribution
    fn name(&self) -> &str;

    /// Upper bound the pool enforces on `evaluate`
    fn timeout(&self) -> Duration;

    async fn evaluate(&self, context: &MarketContext) -> PredictorResult<PredictorVote>;
}
