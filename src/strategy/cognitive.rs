//! Cognitive-layer attacks: hallucination and context overflow.
//!
//! Hallucination rewrites tool responses with plausible-but-wrong values
//! while preserving the JSON key set and structure; context overflow pads
//! the last LLM message with filler to probe context-window behavior.

use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::Rng;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::error::StrategyError;
use crate::flow::Flow;
use crate::strategy::{Strategy, StrategyContext};

// ============================================================================
// Hallucination
// ============================================================================

/// Hallucination rewrite mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HallucinationMode {
    /// Scale numerics by a random factor in `[0.8, 1.2)`; nudge dates ±7 days.
    #[default]
    SwapEntities,
    /// Negate numeric leaves.
    InvertNumbers,
    /// Shift date leaves by a configured offset.
    ShiftDates,
}

fn default_date_offset() -> i64 {
    7
}

/// Parameters for [`HallucinationStrategy`].
#[derive(Debug, Clone, Deserialize)]
pub struct HallucinationConfig {
    /// Rewrite mode.
    #[serde(default)]
    pub mode: HallucinationMode,
    /// Day offset for `shift_dates`.
    #[serde(default = "default_date_offset")]
    pub date_offset_days: i64,
}

/// Injects false but plausible data into tool responses.
#[derive(Debug)]
pub struct HallucinationStrategy {
    config: HallucinationConfig,
}

impl HallucinationStrategy {
    /// Builds the strategy from scenario params.
    ///
    /// # Errors
    ///
    /// Returns a message when params do not deserialize.
    pub fn from_params(
        params: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Self, String> {
        let config: HallucinationConfig =
            serde_json::from_value(serde_json::Value::Object(params.clone()))
                .map_err(|e| format!("hallucination params: {e}"))?;
        Ok(Self { config })
    }

    fn rewrite(&self, value: &mut Value, rng: &mut StdRng) -> usize {
        match value {
            Value::Number(n) => {
                let Some(f) = n.as_f64() else { return 0 };
                let replaced = match self.config.mode {
                    HallucinationMode::SwapEntities => {
                        let factor = rng.gen_range(0.8..1.2);
                        serde_json::Number::from_f64(f * factor).map(Value::Number)
                    }
                    HallucinationMode::InvertNumbers => match n.as_i64() {
                        Some(i) => i
                            .checked_neg()
                            .map(Value::from)
                            .or_else(|| serde_json::Number::from_f64(-f).map(Value::Number)),
                        None => serde_json::Number::from_f64(-f).map(Value::Number),
                    },
                    HallucinationMode::ShiftDates => None,
                };
                if let Some(replaced) = replaced {
                    *value = replaced;
                    1
                } else {
                    0
                }
            }
            Value::String(s) => {
                let shifted = match self.config.mode {
                    HallucinationMode::SwapEntities => {
                        let sign = if rng.gen::<bool>() { 7 } else { -7 };
                        shift_date_string(s, sign)
                    }
                    HallucinationMode::ShiftDates => {
                        shift_date_string(s, self.config.date_offset_days)
                    }
                    HallucinationMode::InvertNumbers => None,
                };
                if let Some(shifted) = shifted {
                    *s = shifted;
                    1
                } else {
                    0
                }
            }
            Value::Object(map) => map.values_mut().map(|v| self.rewrite(v, rng)).sum(),
            Value::Array(items) => items.iter_mut().map(|v| self.rewrite(v, rng)).sum(),
            _ => 0,
        }
    }
}

/// Shifts an ISO `YYYY-MM-DD` prefix by `days`; non-dates return `None`.
fn shift_date_string(s: &str, days: i64) -> Option<String> {
    if s.len() < 10 {
        return None;
    }
    let (prefix, rest) = s.split_at(10);
    let date = NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()?;
    let shifted = date.checked_add_signed(chrono::Duration::days(days))?;
    Some(format!("{}{rest}", shifted.format("%Y-%m-%d")))
}

#[async_trait::async_trait]
impl Strategy for HallucinationStrategy {
    fn kind(&self) -> &'static str {
        "hallucination"
    }

    async fn intercept_response(
        &self,
        flow: &mut Flow,
        cx: &mut StrategyContext<'_>,
    ) -> Result<bool, StrategyError> {
        let Some(response) = flow.response.as_mut() else {
            return Ok(false);
        };
        let Some(mut body) = response.json_body() else {
            return Ok(false);
        };

        let keys_before = collect_keys(&body);
        let rewritten = self.rewrite(&mut body, cx.rng);
        if rewritten == 0 {
            return Ok(false);
        }
        debug_assert_eq!(keys_before, collect_keys(&body));

        let bytes = serde_json::to_vec(&body)?;
        response.set_body(bytes);
        info!(rewritten, mode = ?self.config.mode, "hallucination injected into response");
        Ok(true)
    }
}

/// Key-set signature used to assert structure preservation.
fn collect_keys(value: &Value) -> Vec<String> {
    fn walk(value: &Value, prefix: &str, out: &mut Vec<String>) {
        match value {
            Value::Object(map) => {
                for (k, v) in map {
                    let path = format!("{prefix}.{k}");
                    out.push(path.clone());
                    walk(v, &path, out);
                }
            }
            Value::Array(items) => {
                for (i, v) in items.iter().enumerate() {
                    walk(v, &format!("{prefix}[{i}]"), out);
                }
            }
            _ => {}
        }
    }
    let mut out = Vec::new();
    walk(value, "$", &mut out);
    out
}

// ============================================================================
// Context overflow
// ============================================================================

/// Filler generation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowMode {
    /// Cycled A–Z0–9 block.
    #[default]
    RepeatingChars,
    /// Space-joined lorem words.
    RandomWords,
    /// Random alphanumeric noise.
    Gibberish,
}

fn default_token_count() -> usize {
    7500
}

/// Parameters for [`ContextOverflowStrategy`].
#[derive(Debug, Clone, Deserialize)]
pub struct ContextOverflowConfig {
    /// Approximate tokens of filler to append (~4 chars per token).
    #[serde(default = "default_token_count")]
    pub token_count: usize,
    /// Filler style.
    #[serde(default)]
    pub mode: OverflowMode,
}

/// Appends filler to the last message content of an LLM request.
///
/// Messages are never reordered; only the final `content` grows.
#[derive(Debug)]
pub struct ContextOverflowStrategy {
    config: ContextOverflowConfig,
}

impl ContextOverflowStrategy {
    /// Builds the strategy from scenario params.
    ///
    /// # Errors
    ///
    /// Returns a message when params do not deserialize.
    pub fn from_params(
        params: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Self, String> {
        let config: ContextOverflowConfig =
            serde_json::from_value(serde_json::Value::Object(params.clone()))
                .map_err(|e| format!("context_overflow params: {e}"))?;
        Ok(Self { config })
    }

    fn filler(&self, rng: &mut StdRng) -> String {
        let char_count = self.config.token_count.saturating_mul(4);
        match self.config.mode {
            OverflowMode::RepeatingChars => {
                const CHARS: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
                CHARS
                    .chars()
                    .cycle()
                    .take(char_count)
                    .collect()
            }
            OverflowMode::RandomWords => {
                const WORDS: &[&str] = &[
                    "lorem", "ipsum", "dolor", "sit", "amet", "consectetur", "adipiscing",
                    "elit", "sed", "do", "eiusmod", "tempor", "incididunt", "ut", "labore",
                ];
                let mut out = String::with_capacity(char_count + 8);
                while out.len() < char_count {
                    if !out.is_empty() {
                        out.push(' ');
                    }
                    out.push_str(WORDS[rng.gen_range(0..WORDS.len())]);
                }
                out.truncate(char_count);
                out
            }
            OverflowMode::Gibberish => {
                const ALPHABET: &[u8] =
                    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789 \n";
                (0..char_count)
                    .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
                    .collect()
            }
        }
    }
}

#[async_trait::async_trait]
impl Strategy for ContextOverflowStrategy {
    fn kind(&self) -> &'static str {
        "context_overflow"
    }

    async fn intercept_request(
        &self,
        flow: &mut Flow,
        cx: &mut StrategyContext<'_>,
    ) -> Result<bool, StrategyError> {
        let Some(mut body) = flow.request.json_body() else {
            return Ok(false);
        };
        let Some(messages) = body.get_mut("messages").and_then(Value::as_array_mut) else {
            return Ok(false);
        };
        let Some(last) = messages.last_mut() else {
            return Ok(false);
        };

        let filler = self.filler(cx.rng);
        let appended = match last.get_mut("content") {
            Some(Value::String(content)) => {
                content.push_str("\n\n");
                content.push_str(&filler);
                true
            }
            // Block-structured content: extend the last text block.
            Some(Value::Array(blocks)) => {
                let mut done = false;
                for block in blocks.iter_mut().rev() {
                    if let Some(Value::String(text)) = block.get_mut("text") {
                        text.push_str("\n\n");
                        text.push_str(&filler);
                        done = true;
                        break;
                    }
                }
                done
            }
            _ => false,
        };

        if !appended {
            return Ok(false);
        }

        let bytes = serde_json::to_vec(&body)?;
        flow.request.set_body(bytes);
        info!(
            tokens = self.config.token_count,
            mode = ?self.config.mode,
            "context overflow filler appended"
        );
        Ok(true)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{FlowRequest, FlowResponse};
    use crate::strategy::testutil;

    fn params(json: &str) -> serde_json::Map<String, serde_json::Value> {
        serde_json::from_str(json).unwrap()
    }

    fn flow_with_response(body: &[u8]) -> Flow {
        let mut flow = Flow::new(FlowRequest::new("GET", "http://x/", vec![], b""));
        flow.response = Some(FlowResponse::synthesize(
            200,
            "OK",
            "application/json",
            body.to_vec(),
        ));
        flow
    }

    #[tokio::test]
    async fn swap_entities_scales_numbers_and_keeps_structure() {
        let s = HallucinationStrategy::from_params(&params(r#"{"mode": "swap_entities"}"#))
            .unwrap();
        let mut f = flow_with_response(br#"{"price": 100.0, "seats": 10, "label": "economy"}"#);
        let mut rng = testutil::rng();
        let mut cx = testutil::context(&mut rng);

        assert!(s.intercept_response(&mut f, &mut cx).await.unwrap());
        let body: Value = serde_json::from_slice(&f.response.as_ref().unwrap().body).unwrap();
        let price = body["price"].as_f64().unwrap();
        assert!((80.0..120.0).contains(&price));
        assert_ne!(price, 100.0);
        assert_eq!(body["label"], "economy");
        assert_eq!(body.as_object().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn swap_entities_nudges_dates_seven_days() {
        let s = HallucinationStrategy::from_params(&params(r#"{"mode": "swap_entities"}"#))
            .unwrap();
        let mut f = flow_with_response(br#"{"departure": "2026-12-25"}"#);
        let mut rng = testutil::rng();
        let mut cx = testutil::context(&mut rng);

        assert!(s.intercept_response(&mut f, &mut cx).await.unwrap());
        let body: Value = serde_json::from_slice(&f.response.as_ref().unwrap().body).unwrap();
        let date = body["departure"].as_str().unwrap();
        assert!(date == "2026-12-18" || date == "2027-01-01");
    }

    #[tokio::test]
    async fn invert_numbers_negates() {
        let s = HallucinationStrategy::from_params(&params(r#"{"mode": "invert_numbers"}"#))
            .unwrap();
        let mut f = flow_with_response(br#"{"balance": 250, "rate": 1.5}"#);
        let mut rng = testutil::rng();
        let mut cx = testutil::context(&mut rng);

        assert!(s.intercept_response(&mut f, &mut cx).await.unwrap());
        let body: Value = serde_json::from_slice(&f.response.as_ref().unwrap().body).unwrap();
        assert_eq!(body["balance"], -250);
        assert!((body["rate"].as_f64().unwrap() + 1.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn shift_dates_uses_configured_offset() {
        let s = HallucinationStrategy::from_params(&params(
            r#"{"mode": "shift_dates", "date_offset_days": 30}"#,
        ))
        .unwrap();
        let mut f = flow_with_response(br#"{"checkin": "2026-06-01", "note": "x"}"#);
        let mut rng = testutil::rng();
        let mut cx = testutil::context(&mut rng);

        assert!(s.intercept_response(&mut f, &mut cx).await.unwrap());
        let body: Value = serde_json::from_slice(&f.response.as_ref().unwrap().body).unwrap();
        assert_eq!(body["checkin"], "2026-07-01");
        assert_eq!(body["note"], "x");
    }

    #[tokio::test]
    async fn non_json_response_untouched() {
        let s = HallucinationStrategy::from_params(&params("{}")).unwrap();
        let mut f = flow_with_response(b"plain 42 text");
        let mut rng = testutil::rng();
        let mut cx = testutil::context(&mut rng);
        assert!(!s.intercept_response(&mut f, &mut cx).await.unwrap());
    }

    #[test]
    fn date_shift_handles_suffixes_and_rejects_non_dates() {
        assert_eq!(
            shift_date_string("2026-01-31", 1).as_deref(),
            Some("2026-02-01")
        );
        assert_eq!(
            shift_date_string("2026-01-01T10:00:00Z", 1).as_deref(),
            Some("2026-01-02T10:00:00Z")
        );
        assert_eq!(shift_date_string("not a date", 1), None);
        assert_eq!(shift_date_string("2026-13-01", 1), None);
    }

    #[tokio::test]
    async fn overflow_appends_to_last_message_only() {
        let s = ContextOverflowStrategy::from_params(&params(r#"{"token_count": 100}"#)).unwrap();
        let mut f = Flow::new(FlowRequest::new(
            "POST",
            "http://llm/v1/chat",
            vec![],
            br#"{"model":"m","messages":[{"role":"system","content":"sys"},{"role":"user","content":"hi"}]}"#,
        ));
        let mut rng = testutil::rng();
        let mut cx = testutil::context(&mut rng);

        assert!(s.intercept_request(&mut f, &mut cx).await.unwrap());
        let body: Value = serde_json::from_slice(&f.request.body).unwrap();
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["content"], "sys");
        let last = messages[1]["content"].as_str().unwrap();
        assert!(last.starts_with("hi\n\n"));
        assert!(last.len() >= 400);
    }

    #[tokio::test]
    async fn overflow_extends_last_text_block() {
        let s = ContextOverflowStrategy::from_params(&params(r#"{"token_count": 10}"#)).unwrap();
        let mut f = Flow::new(FlowRequest::new(
            "POST",
            "http://llm/v1/messages",
            vec![],
            br#"{"model":"m","messages":[{"role":"user","content":[{"type":"text","text":"question"}]}]}"#,
        ));
        let mut rng = testutil::rng();
        let mut cx = testutil::context(&mut rng);

        assert!(s.intercept_request(&mut f, &mut cx).await.unwrap());
        let body: Value = serde_json::from_slice(&f.request.body).unwrap();
        let text = body["messages"][0]["content"][0]["text"].as_str().unwrap();
        assert!(text.starts_with("question\n\n"));
    }

    #[tokio::test]
    async fn overflow_skips_bodies_without_messages() {
        let s = ContextOverflowStrategy::from_params(&params("{}")).unwrap();
        let mut f = Flow::new(FlowRequest::new(
            "POST",
            "http://tool/go",
            vec![],
            br#"{"action":"x"}"#,
        ));
        let mut rng = testutil::rng();
        let mut cx = testutil::context(&mut rng);
        assert!(!s.intercept_request(&mut f, &mut cx).await.unwrap());
    }

    #[tokio::test]
    async fn filler_modes_produce_requested_volume() {
        for mode in ["repeating_chars", "random_words", "gibberish"] {
            let s = ContextOverflowStrategy::from_params(&params(&format!(
                r#"{{"token_count": 50, "mode": "{mode}"}}"#
            )))
            .unwrap();
            let mut rng = testutil::rng();
            let filler = s.filler(&mut rng);
            assert_eq!(filler.len(), 200, "mode {mode}");
        }
    }
}
