use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use trading_core::{MarketContext, Predictor, PredictorError, PredictorResult, PredictorVote};

use crate::backoff::BackoffPolicy;
use crate::error::{from_status, from_transport};
use crate::repair::vote_from_text;

/// Raw text completion against one model.
///
/// Implemented over HTTP for real providers; tests substitute scripted
/// backends to exercise the fallback chain.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, model: &str, system: &str, prompt: &str) -> PredictorResult<String>;
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible `/chat/completions` backend
#[derive(Clone)]
pub struct HttpCompletionBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl HttpCompletionBackend {
    pub fn new(base_url: String, api_key: String, timeout: Duration) -> PredictorResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PredictorError::NotConfigured(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            timeout,
        })
    }
}

#[async_trait]
impl CompletionBackend for HttpCompletionBackend {
    async fn complete(&self, model: &str, system: &str, prompt: &str) -> PredictorResult<String> {
        let request = ChatRequest {
            model: model.to_string(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            temperature: 0.2,
            max_tokens: 300,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| from_transport(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(from_status(status, &body));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| from_transport(e, self.timeout))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| PredictorError::Parse("empty completion".into()))
    }
}

const SYSTEM_PROMPT: &str = "You are a disciplined crypto futures analyst. \
Answer with a single JSON object and nothing else.";

/// Render the market snapshot as the user prompt.
pub fn build_prompt(context: &MarketContext) -> String {
    let htf = context
        .htf_trend
        .map(|t| t.to_string())
        .unwrap_or_else(|| "n/a".to_string());
    let whale = context
        .whale_imbalance
        .map(|w| format!("{:+.2}", w))
        .unwrap_or_else(|| "n/a".to_string());

    format!(
        r#"Symbol: {symbol}
Price: {price}
RSI(14): {rsi:.1}
ADX(14): {adx:.1}
ATR%: {atr:.2}
Trend: {trend} (higher timeframe: {htf})
Order-flow imbalance: {ofi:+.2}
Whale imbalance: {whale}

Decide whether to open a position now. Respond ONLY with:
{{"action": "BUY" | "SELL" | "HOLD", "confidence": 0.0-1.0, "reasoning": "one sentence"}}"#,
        symbol = context.symbol,
        price = context.price,
        rsi = context.rsi,
        adx = context.adx,
        atr = context.atr_pct,
        trend = context.trend,
        htf = htf,
        ofi = context.ofi,
        whale = whale,
    )
}

/// Cloud predictor that walks an ordered model chain.
///
/// Quota/availability failures move to the next model after the backoff
/// cooldown; any other failure abandons the predictor for this cycle.
pub struct CloudPredictor {
    name: String,
    models: Vec<String>,
    backend: Arc<dyn CompletionBackend>,
    backoff: BackoffPolicy,
    timeout: Duration,
}

impl CloudPredictor {
    pub fn new(
        name: impl Into<String>,
        models: Vec<String>,
        backend: Arc<dyn CompletionBackend>,
        backoff: BackoffPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            models,
            backend,
            backoff,
            timeout,
        }
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }
}

#[async_trait]
impl Predictor for CloudPredictor {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn evaluate(&self, context: &MarketContext) -> PredictorResult<PredictorVote> {
        let prompt = build_prompt(context);
        let started = Instant::now();
        let mut last_error =
            PredictorError::NotConfigured(format!("{}: empty model chain", self.name));

        for (attempt, model) in self.models.iter().enumerate() {
            if !self.backoff.allows(attempt) {
                break;
            }
            if attempt > 0 {
                self.backoff.cooldown().await;
            }

            match self.backend.complete(model, SYSTEM_PROMPT, &prompt).await {
                Ok(text) => {
                    let vote = vote_from_text(&text, &self.name, model)?;
                    return Ok(vote.with_latency(started.elapsed()));
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!("{}/{} unavailable ({}), trying next model", self.name, model, e);
                    last_error = e;
                }
                Err(e) => {
                    tracing::debug!("{}/{} failed: {}", self.name, model, e);
                    return Err(e);
                }
            }
        }

        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Mutex;
    use trading_core::{Action, TrendBias};

    /// Replays canned results and records which models were asked.
    struct ScriptedBackend {
        replies: Mutex<Vec<PredictorResult<String>>>,
        asked: Mutex<Vec<String>>,
    }

    impl ScriptedBackend {
        fn new(mut replies: Vec<PredictorResult<String>>) -> Self {
            replies.reverse();
            Self {
                replies: Mutex::new(replies),
                asked: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CompletionBackend for ScriptedBackend {
        async fn complete(&self, model: &str, _system: &str, _prompt: &str) -> PredictorResult<String> {
            self.asked.lock().unwrap().push(model.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(PredictorError::Provider("script exhausted".into())))
        }
    }

    fn context() -> MarketContext {
        MarketContext {
            symbol: "BTCUSDT".into(),
            price: 64_000.0,
            ofi: 0.3,
            rsi: 41.0,
            adx: 27.0,
            atr_pct: 0.8,
            trend: TrendBias::Bullish,
            htf_trend: None,
            whale_imbalance: None,
            timestamp: Utc::now(),
        }
    }

    fn predictor(backend: Arc<ScriptedBackend>, retries: u32) -> CloudPredictor {
        CloudPredictor::new(
            "groq",
            vec!["primary".into(), "secondary".into(), "tertiary".into()],
            backend,
            BackoffPolicy::new(Duration::ZERO, retries),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn falls_back_on_quota() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Err(PredictorError::Quota("429".into())),
            Ok(r#"{"action":"BUY","confidence":0.7,"reasoning":"ok"}"#.into()),
        ]));
        let vote = predictor(backend.clone(), 2).evaluate(&context()).await.unwrap();

        assert_eq!(vote.action, Action::Buy);
        assert_eq!(vote.model, "secondary");
        assert_eq!(*backend.asked.lock().unwrap(), vec!["primary", "secondary"]);
    }

    #[tokio::test]
    async fn abandons_on_provider_error() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Err(PredictorError::Provider("400".into())),
            Ok(r#"{"action":"BUY"}"#.into()),
        ]));
        let err = predictor(backend.clone(), 2).evaluate(&context()).await.unwrap_err();

        assert!(matches!(err, PredictorError::Provider(_)));
        assert_eq!(backend.asked.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn retry_budget_limits_chain() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Err(PredictorError::Quota("a".into())),
            Err(PredictorError::Unavailable("b".into())),
            Ok(r#"{"action":"SELL"}"#.into()),
        ]));
        let err = predictor(backend.clone(), 1).evaluate(&context()).await.unwrap_err();

        assert!(matches!(err, PredictorError::Unavailable(_)));
        assert_eq!(backend.asked.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unparseable_reply_yields_parse_error() {
        let backend = Arc::new(ScriptedBackend::new(vec![Ok("no idea".into())]));
        let err = predictor(backend, 2).evaluate(&context()).await.unwrap_err();
        assert!(matches!(err, PredictorError::Parse(_)));
    }

    #[test]
    fn prompt_mentions_indicators() {
        let prompt = build_prompt(&context());
        assert!(prompt.contains("BTCUSDT"));
        assert!(prompt.contains("RSI(14): 41.0"));
        assert!(prompt.contains("BULLISH"));
    }
}
