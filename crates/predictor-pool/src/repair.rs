//! Recovery of structured votes from free-form model output.
//!
//! Language models wrap JSON in prose, markdown fences, or stop mid-object
//! when they run out of tokens. `repair_json` tries a fixed sequence of
//! strategies and returns the first one that parses; `vote_from_text` then
//! normalizes whatever shape came back into a `PredictorVote`.

use serde_json::{Map, Value};
use trading_core::{Action, PredictorError, PredictorResult, PredictorVote};

/// Which strategy produced the parsed value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairStrategy {
    AsIs,
    StrippedFences,
    FirstObject,
    FirstArray,
    Balanced,
}

/// Parse `raw` as JSON, trying progressively more invasive repairs.
pub fn repair_json(raw: &str) -> Option<(Value, RepairStrategy)> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some((value, RepairStrategy::AsIs));
    }

    let unfenced = strip_fences(trimmed);
    if let Ok(value) = serde_json::from_str::<Value>(&unfenced) {
        return Some((value, RepairStrategy::StrippedFences));
    }

    if let Some(object) = extract_delimited(&unfenced, '{', '}') {
        if let Ok(value) = serde_json::from_str::<Value>(object) {
            return Some((value, RepairStrategy::FirstObject));
        }
    }

    if let Some(array) = extract_delimited(&unfenced, '[', ']') {
        if let Ok(value) = serde_json::from_str::<Value>(array) {
            return Some((value, RepairStrategy::FirstArray));
        }
    }

    let start = unfenced.find(['{', '[']).unwrap_or(0);
    let balanced = balance(&unfenced[start..]);
    serde_json::from_str::<Value>(&balanced)
        .ok()
        .map(|value| (value, RepairStrategy::Balanced))
}

/// Remove markdown code fences and their language tags.
pub fn strip_fences(text: &str) -> String {
    let mut out = text.to_string();
    for fence in ["```json", "```JSON", "```javascript", "```"] {
        out = out.replace(fence, "");
    }
    out.trim().to_string()
}

/// First `open ... close` span with matching depth, honoring JSON strings.
fn extract_delimited(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            c if c == open => depth += 1,
            c if c == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Close an unterminated string and append the missing closers.
fn balance(text: &str) -> String {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for ch in text.chars() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.last() == Some(&ch) {
                    stack.pop();
                }
            }
            _ => {}
        }
    }

    let mut out = text.trim_end().to_string();
    if in_string {
        if escaped {
            out.pop();
        }
        out.push('"');
    }

    // A dangling separator cannot be closed directly
    let trimmed_len = out.trim_end_matches(|c: char| c.is_whitespace() || c == ',').len();
    out.truncate(trimmed_len);
    if out.ends_with(':') {
        out.push_str("null");
    }

    while let Some(closer) = stack.pop() {
        out.push(closer);
    }
    out
}

/// Turn raw model text into a vote, or a parse failure.
pub fn vote_from_text(text: &str, provider: &str, model: &str) -> PredictorResult<PredictorVote> {
    let (value, strategy) = repair_json(text).ok_or_else(|| {
        PredictorError::Parse(format!("no JSON in response: {}", preview(text)))
    })?;
    if strategy != RepairStrategy::AsIs {
        tracing::debug!("{}/{} response repaired via {:?}", provider, model, strategy);
    }
    vote_from_value(&value, provider, model)
}

/// Normalize a parsed value (object, array of objects, or positional array).
pub fn vote_from_value(value: &Value, provider: &str, model: &str) -> PredictorResult<PredictorVote> {
    match value {
        Value::Object(map) => vote_from_object(map, provider, model),
        Value::Array(items) => {
            if let Some(Value::Object(map)) = items.iter().find(|v| v.is_object()) {
                return vote_from_object(map, provider, model);
            }
            let action = items
                .first()
                .and_then(Value::as_str)
                .and_then(Action::parse_loose)
                .ok_or_else(|| PredictorError::Parse("array without an action".into()))?;
            let confidence = items.get(1).and_then(number_of).map(normalize_confidence);
            Ok(PredictorVote::new(
                provider,
                model,
                action,
                confidence.unwrap_or(0.5),
                "",
            ))
        }
        other => Err(PredictorError::Parse(format!(
            "unexpected JSON shape: {}",
            preview(&other.to_string())
        ))),
    }
}

fn vote_from_object(
    map: &Map<String, Value>,
    provider: &str,
    model: &str,
) -> PredictorResult<PredictorVote> {
    let field = |names: &[&str]| -> Option<&Value> {
        map.iter()
            .find(|(k, _)| names.iter().any(|n| k.eq_ignore_ascii_case(n)))
            .map(|(_, v)| v)
    };

    let action = field(&["action", "signal", "decision", "recommendation"])
        .and_then(Value::as_str)
        .and_then(Action::parse_loose)
        .ok_or_else(|| PredictorError::Parse("missing or unknown action".into()))?;

    let confidence = field(&["confidence", "probability", "score"])
        .and_then(number_of)
        .map(normalize_confidence)
        .unwrap_or(0.5);

    let rationale = field(&["reasoning", "rationale", "reason", "explanation"])
        .and_then(Value::as_str)
        .unwrap_or_default();

    Ok(PredictorVote::new(provider, model, action, confidence, rationale))
}

fn number_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse().ok(),
        _ => None,
    }
}

/// Accept both 0-1 and 0-100 scales.
fn normalize_confidence(raw: f64) -> f64 {
    if raw > 1.0 && raw <= 100.0 {
        raw / 100.0
    } else {
        raw
    }
}

fn preview(text: &str) -> String {
    text.chars().take(80).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_clean_json_as_is() {
        let (value, strategy) = repair_json(r#"{"action":"BUY","confidence":0.8}"#).unwrap();
        assert_eq!(strategy, RepairStrategy::AsIs);
        assert_eq!(value["action"], "BUY");
    }

    #[test]
    fn strips_markdown_fences() {
        let text = "```json\n{\"action\": \"SELL\", \"confidence\": 0.7}\n```";
        let (value, strategy) = repair_json(text).unwrap();
        assert_eq!(strategy, RepairStrategy::StrippedFences);
        assert_eq!(value["action"], "SELL");
    }

    #[test]
    fn extracts_object_from_prose() {
        let text = r#"My analysis: {"action": "HOLD", "reasoning": "range {bound}"} -- done"#;
        let (value, strategy) = repair_json(text).unwrap();
        assert_eq!(strategy, RepairStrategy::FirstObject);
        assert_eq!(value["reasoning"], "range {bound}");
    }

    #[test]
    fn extracts_array_when_no_object() {
        let text = r#"Answer: ["BUY", 0.66] as requested"#;
        let (value, strategy) = repair_json(text).unwrap();
        assert_eq!(strategy, RepairStrategy::FirstArray);
        assert!(value.is_array());
    }

    #[test]
    fn balances_truncated_output() {
        let text = r#"{"action": "BUY", "confidence": 0.9, "reasoning": "momentum is stro"#;
        let (value, strategy) = repair_json(text).unwrap();
        assert_eq!(strategy, RepairStrategy::Balanced);
        assert_eq!(value["confidence"], 0.9);
    }

    #[test]
    fn balances_dangling_separator() {
        let text = r#"{"action": "SELL", "levels": [1, 2,"#;
        let (value, _) = repair_json(text).unwrap();
        assert_eq!(value["levels"][1], 2);
    }

    #[test]
    fn gives_up_on_garbage() {
        assert!(repair_json("I cannot help with that.").is_none());
        assert!(repair_json("   ").is_none());
    }

    #[test]
    fn vote_accepts_percent_confidence_and_aliases() {
        let vote = vote_from_text(
            r#"{"Signal": "long", "probability": "72%", "reason": "breakout"}"#,
            "groq",
            "llama",
        )
        .unwrap();
        assert_eq!(vote.action, Action::Buy);
        assert!((vote.confidence - 0.72).abs() < 1e-9);
        assert_eq!(vote.rationale, "breakout");
    }

    #[test]
    fn vote_from_positional_array() {
        let vote = vote_from_text(r#"["SELL", 0.6]"#, "p", "m").unwrap();
        assert_eq!(vote.action, Action::Sell);
        assert!((vote.confidence - 0.6).abs() < 1e-9);
    }

    #[test]
    fn unknown_action_is_parse_error() {
        let err = vote_from_text(r#"{"action": "MAYBE"}"#, "p", "m").unwrap_err();
        assert!(matches!(err, PredictorError::Parse(_)));
    }

    #[test]
    fn confidence_clamped_into_unit_range() {
        let vote = vote_from_text(r#"{"action": "BUY", "confidence": 250}"#, "p", "m").unwrap();
        assert_eq!(vote.confidence, 1.0);
    }
}
