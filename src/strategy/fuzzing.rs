//! Schema-aware tool-call fuzzing.
//!
//! Parses JSON request bodies, detects field kinds from their names, and
//! replaces values according to the configured fuzz type. Handles flat tool
//! bodies as well as OpenAI `tool_calls[].function.arguments` (including
//! JSON-encoded argument strings) and Anthropic `tool_use` content blocks.
//! The output is always valid JSON with the original structure.

use rand::rngs::StdRng;
use rand::Rng;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::info;

use crate::error::StrategyError;
use crate::flow::Flow;
use crate::strategy::{Strategy, StrategyContext};

const SQL_PAYLOADS: &[&str] = &[
    "' OR '1'='1",
    "'; DROP TABLE users; --",
    "' UNION SELECT * FROM users --",
    "1' OR '1'='1",
    "admin'--",
];

const XSS_PAYLOADS: &[&str] = &[
    "<script>alert('XSS')</script>",
    "<img src=x onerror=alert(1)>",
    "javascript:alert(document.cookie)",
];

/// How detected fields are replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FuzzType {
    /// Replace with a value of the wrong type.
    #[default]
    SchemaViolation,
    /// Replace with JSON null.
    NullInjection,
    /// Replace with the MIN/MAX of the detected type.
    Boundary,
    /// Replace with a SQL injection payload.
    SqlInjection,
    /// Replace with an XSS payload.
    Xss,
}

/// Field kind inferred from the field name (value type as fallback).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Date,
    Numeric,
    Text,
}

/// Parameters for [`FuzzingStrategy`].
#[derive(Debug, Clone, Deserialize)]
pub struct FuzzingConfig {
    /// Replacement policy.
    #[serde(default)]
    pub fuzz_type: FuzzType,
    /// Optional substring filter on the request URL.
    #[serde(default)]
    pub target_endpoint: Option<String>,
}

/// Schema-aware request fuzzer for tool endpoints.
#[derive(Debug)]
pub struct FuzzingStrategy {
    config: FuzzingConfig,
}

impl FuzzingStrategy {
    /// Builds the strategy from scenario params.
    ///
    /// # Errors
    ///
    /// Returns a message when params do not deserialize.
    pub fn from_params(
        params: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Self, String> {
        let config: FuzzingConfig =
            serde_json::from_value(serde_json::Value::Object(params.clone()))
                .map_err(|e| format!("mcp_fuzzing params: {e}"))?;
        Ok(Self { config })
    }

    /// Fuzzes the top-level fields of one argument object.
    fn fuzz_object(&self, map: &mut Map<String, Value>, rng: &mut StdRng) -> usize {
        let mut fuzzed = 0;
        for (name, value) in map.iter_mut() {
            let Some(kind) = detect_field_kind(name, value) else {
                continue;
            };
            if let Some(replacement) = self.replacement(kind, value, rng) {
                *value = replacement;
                fuzzed += 1;
            }
        }
        fuzzed
    }

    fn replacement(&self, kind: FieldKind, value: &Value, rng: &mut StdRng) -> Option<Value> {
        let out = match self.config.fuzz_type {
            FuzzType::NullInjection => Value::Null,
            FuzzType::SqlInjection => {
                Value::String(SQL_PAYLOADS[rng.gen_range(0..SQL_PAYLOADS.len())].to_string())
            }
            FuzzType::Xss => {
                Value::String(XSS_PAYLOADS[rng.gen_range(0..XSS_PAYLOADS.len())].to_string())
            }
            FuzzType::SchemaViolation => match kind {
                // Wrong type for the detected schema.
                FieldKind::Date => Value::from(rng.gen_range(0..1_000_000)),
                FieldKind::Numeric => match value {
                    Value::Number(n) => Value::String(format!("{n}abc")),
                    _ => Value::String("NaNabc".to_string()),
                },
                FieldKind::Text => Value::from(rng.gen_range(-1_000_000..0)),
            },
            FuzzType::Boundary => match kind {
                FieldKind::Date => Value::String(
                    if rng.gen::<bool>() {
                        "9999-12-31"
                    } else {
                        "0001-01-01"
                    }
                    .to_string(),
                ),
                FieldKind::Numeric => {
                    Value::from(if rng.gen::<bool>() { i64::MAX } else { i64::MIN })
                }
                FieldKind::Text => {
                    if rng.gen::<bool>() {
                        Value::String(String::new())
                    } else {
                        Value::String("A".repeat(65_536))
                    }
                }
            },
        };
        Some(out)
    }

    /// Descends into tool-call carrier formats and fuzzes argument objects.
    fn fuzz_body(&self, body: &mut Value, rng: &mut StdRng) -> usize {
        let Some(root) = body.as_object_mut() else {
            return 0;
        };

        // Flat tool body: no carrier keys, fuzz the fields directly.
        if !root.contains_key("messages")
            && !root.contains_key("tool_calls")
            && !root.contains_key("function_call")
        {
            return self.fuzz_object(root, rng);
        }

        let mut fuzzed = 0;

        if let Some(calls) = root.get_mut("tool_calls").and_then(Value::as_array_mut) {
            for call in calls {
                fuzzed += self.fuzz_tool_call(call, rng);
            }
        }
        if let Some(call) = root.get_mut("function_call") {
            fuzzed += self.fuzz_arguments(call, rng);
        }

        if let Some(messages) = root.get_mut("messages").and_then(Value::as_array_mut) {
            for message in messages {
                let Some(msg) = message.as_object_mut() else {
                    continue;
                };
                if let Some(calls) = msg.get_mut("tool_calls").and_then(Value::as_array_mut) {
                    for call in calls {
                        fuzzed += self.fuzz_tool_call(call, rng);
                    }
                }
                if let Some(call) = msg.get_mut("function_call") {
                    fuzzed += self.fuzz_arguments(call, rng);
                }
                // Anthropic format: content blocks with type == "tool_use".
                if let Some(blocks) = msg.get_mut("content").and_then(Value::as_array_mut) {
                    for block in blocks {
                        if block.get("type").and_then(Value::as_str) == Some("tool_use") {
                            if let Some(input) =
                                block.get_mut("input").and_then(Value::as_object_mut)
                            {
                                fuzzed += self.fuzz_object(input, rng);
                            }
                        }
                    }
                }
            }
        }

        fuzzed
    }

    fn fuzz_tool_call(&self, call: &mut Value, rng: &mut StdRng) -> usize {
        call.get_mut("function")
            .map_or(0, |function| self.fuzz_arguments(function, rng))
    }

    /// Fuzzes a `{"arguments": ...}` holder where arguments may be an object
    /// or a JSON-encoded string (the OpenAI wire form).
    fn fuzz_arguments(&self, holder: &mut Value, rng: &mut StdRng) -> usize {
        let Some(arguments) = holder.get_mut("arguments") else {
            return 0;
        };
        match arguments {
            Value::Object(map) => self.fuzz_object(map, rng),
            Value::String(encoded) => {
                let Ok(mut parsed) = serde_json::from_str::<Value>(encoded) else {
                    return 0;
                };
                let Some(map) = parsed.as_object_mut() else {
                    return 0;
                };
                let fuzzed = self.fuzz_object(map, rng);
                if fuzzed > 0 {
                    if let Ok(reencoded) = serde_json::to_string(&parsed) {
                        *encoded = reencoded;
                    }
                }
                fuzzed
            }
            _ => 0,
        }
    }
}

/// Field kind from the name; falls back to the value's own type.
fn detect_field_kind(name: &str, value: &Value) -> Option<FieldKind> {
    let lower = name.to_ascii_lowercase();

    if lower == "date" || lower.ends_with("_date") || lower.ends_with("_at") {
        return Some(FieldKind::Date);
    }
    if matches!(lower.as_str(), "count" | "quantity" | "price") || lower.ends_with("_id") {
        return Some(FieldKind::Numeric);
    }
    if matches!(lower.as_str(), "query" | "text") || lower.ends_with("_name") {
        return Some(FieldKind::Text);
    }

    match value {
        Value::Number(_) => Some(FieldKind::Numeric),
        Value::String(s) if looks_like_date(s) => Some(FieldKind::Date),
        Value::String(_) => Some(FieldKind::Text),
        _ => None,
    }
}

fn looks_like_date(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() >= 10
        && b[..4].iter().all(u8::is_ascii_digit)
        && b[4] == b'-'
        && b[5..7].iter().all(u8::is_ascii_digit)
        && b[7] == b'-'
        && b[8..10].iter().all(u8::is_ascii_digit)
}

#[async_trait::async_trait]
impl Strategy for FuzzingStrategy {
    fn kind(&self) -> &'static str {
        "mcp_fuzzing"
    }

    async fn intercept_request(
        &self,
        flow: &mut Flow,
        cx: &mut StrategyContext<'_>,
    ) -> Result<bool, StrategyError> {
        if let Some(endpoint) = &self.config.target_endpoint {
            if !flow.request.url.contains(endpoint.as_str()) {
                return Ok(false);
            }
        }
        let Some(mut body) = flow.request.json_body() else {
            return Ok(false);
        };

        let fuzzed = self.fuzz_body(&mut body, cx.rng);
        if fuzzed == 0 {
            return Ok(false);
        }

        let bytes = serde_json::to_vec(&body)?;
        flow.request.set_body(bytes);
        info!(fuzzed, fuzz_type = ?self.config.fuzz_type, "schema-aware fuzzing applied");
        Ok(true)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FlowRequest;
    use crate::strategy::testutil;

    fn strategy(json: &str) -> FuzzingStrategy {
        FuzzingStrategy::from_params(&serde_json::from_str(json).unwrap()).unwrap()
    }

    fn flow(body: &[u8]) -> Flow {
        Flow::new(FlowRequest::new(
            "POST",
            "http://tools/search_flights",
            vec![("Content-Type".to_string(), "application/json".to_string())],
            body,
        ))
    }

    async fn run(strategy: &FuzzingStrategy, flow: &mut Flow) -> bool {
        let mut rng = testutil::rng();
        let mut cx = testutil::context(&mut rng);
        strategy.intercept_request(flow, &mut cx).await.unwrap()
    }

    #[tokio::test]
    async fn schema_violation_breaks_types_but_not_json() {
        let s = strategy(r#"{"fuzz_type": "schema_violation"}"#);
        let mut f = flow(br#"{"date": "2026-12-25", "count": 3}"#);
        assert!(run(&s, &mut f).await);

        let body: Value = serde_json::from_slice(&f.request.body).unwrap();
        // Date became a non-date, count became a non-integer, structure kept.
        assert!(!body["date"].is_string() || !looks_like_date(body["date"].as_str().unwrap()));
        assert!(!body["count"].is_i64());
        assert_eq!(body.as_object().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn null_injection_nulls_detected_fields() {
        let s = strategy(r#"{"fuzz_type": "null_injection"}"#);
        let mut f = flow(br#"{"query": "rome", "price": 10}"#);
        assert!(run(&s, &mut f).await);
        let body: Value = serde_json::from_slice(&f.request.body).unwrap();
        assert!(body["query"].is_null());
        assert!(body["price"].is_null());
    }

    #[tokio::test]
    async fn boundary_uses_type_extremes() {
        let s = strategy(r#"{"fuzz_type": "boundary"}"#);
        let mut f = flow(br#"{"count": 3}"#);
        assert!(run(&s, &mut f).await);
        let body: Value = serde_json::from_slice(&f.request.body).unwrap();
        let n = body["count"].as_i64().unwrap();
        assert!(n == i64::MAX || n == i64::MIN);
    }

    #[tokio::test]
    async fn sql_payloads_land_in_fields() {
        let s = strategy(r#"{"fuzz_type": "sql_injection"}"#);
        let mut f = flow(br#"{"query": "rome"}"#);
        assert!(run(&s, &mut f).await);
        let body: Value = serde_json::from_slice(&f.request.body).unwrap();
        let injected = body["query"].as_str().unwrap();
        assert!(SQL_PAYLOADS.contains(&injected));
    }

    #[tokio::test]
    async fn descends_into_openai_tool_calls() {
        let s = strategy(r#"{"fuzz_type": "null_injection"}"#);
        let mut f = flow(
            br#"{"messages":[{"role":"assistant","tool_calls":[{"function":{"name":"search","arguments":"{\"date\":\"2026-12-25\"}"}}]}]}"#,
        );
        assert!(run(&s, &mut f).await);
        let body: Value = serde_json::from_slice(&f.request.body).unwrap();
        let args = body["messages"][0]["tool_calls"][0]["function"]["arguments"]
            .as_str()
            .unwrap();
        let parsed: Value = serde_json::from_str(args).unwrap();
        assert!(parsed["date"].is_null());
    }

    #[tokio::test]
    async fn descends_into_anthropic_tool_use() {
        let s = strategy(r#"{"fuzz_type": "null_injection"}"#);
        let mut f = flow(
            br#"{"messages":[{"role":"assistant","content":[{"type":"tool_use","name":"book","input":{"flight_id":"F1"}}]}]}"#,
        );
        assert!(run(&s, &mut f).await);
        let body: Value = serde_json::from_slice(&f.request.body).unwrap();
        assert!(body["messages"][0]["content"][0]["input"]["flight_id"].is_null());
    }

    #[tokio::test]
    async fn endpoint_filter_gates_application() {
        let s = strategy(r#"{"target_endpoint": "/book_ticket"}"#);
        let mut f = flow(br#"{"date": "2026-12-25"}"#);
        assert!(!run(&s, &mut f).await);
    }

    #[tokio::test]
    async fn non_json_body_skipped() {
        let s = strategy("{}");
        let mut f = flow(b"plain text");
        assert!(!run(&s, &mut f).await);
    }

    #[test]
    fn field_kind_detection() {
        assert_eq!(
            detect_field_kind("departure_date", &Value::Null),
            Some(FieldKind::Date)
        );
        assert_eq!(
            detect_field_kind("created_at", &Value::Null),
            Some(FieldKind::Date)
        );
        assert_eq!(
            detect_field_kind("flight_id", &Value::Null),
            Some(FieldKind::Numeric)
        );
        assert_eq!(
            detect_field_kind("price", &Value::Null),
            Some(FieldKind::Numeric)
        );
        assert_eq!(
            detect_field_kind("first_name", &Value::Null),
            Some(FieldKind::Text)
        );
        assert_eq!(
            detect_field_kind("misc", &Value::from(3)),
            Some(FieldKind::Numeric)
        );
        assert_eq!(
            detect_field_kind("misc", &Value::String("2026-01-02".to_string())),
            Some(FieldKind::Date)
        );
        assert_eq!(detect_field_kind("misc", &Value::Bool(true)), None);
    }
}
