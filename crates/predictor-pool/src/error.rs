use std::time::Duration;

use reqwest::StatusCode;
use trading_core::PredictorError;

/// Map a transport error onto the predictor taxonomy.
pub fn from_transport(err: reqwest::Error, timeout: Duration) -> PredictorError {
    if err.is_timeout() {
        PredictorError::Timeout(timeout)
    } else if err.is_connect() {
        PredictorError::Unavailable(err.to_string())
    } else if err.is_decode() {
        PredictorError::Parse(err.to_string())
    } else {
        PredictorError::Provider(err.to_string())
    }
}

/// Classify a non-success HTTP response.
///
/// Quota and availability problems are retryable against the next model in
/// the chain; everything else abandons the predictor for this cycle.
pub fn from_status(status: StatusCode, body: &str) -> PredictorError {
    let lower = body.to_ascii_lowercase();
    let detail = format!("{}: {}", status, body.chars().take(200).collect::<String>());

    if status == StatusCode::TOO_MANY_REQUESTS
        || lower.contains("quota")
        || lower.contains("rate limit")
        || lower.contains("rate_limit")
        || lower.contains("resource_exhausted")
    {
        return PredictorError::Quota(detail);
    }

    if matches!(
        status,
        StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY | StatusCode::GATEWAY_TIMEOUT
    ) || status.as_u16() == 529
        || lower.contains("overloaded")
        || lower.contains("model_not_found")
        || lower.contains("decommissioned")
    {
        return PredictorError::Unavailable(detail);
    }

    PredictorError::Provider(detail)
}
