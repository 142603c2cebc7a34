//! HTTP error injection.

use serde::Deserialize;
use tracing::info;

use crate::error::StrategyError;
use crate::flow::{Flow, FlowResponse};
use crate::strategy::{Strategy, StrategyContext};

fn default_status() -> u16 {
    500
}

/// Parameters for [`ErrorInjectStrategy`].
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorInjectConfig {
    /// Status code of the synthesized response.
    #[serde(default = "default_status")]
    pub status: u16,
    /// Response body; defaults to a JSON error document.
    #[serde(default)]
    pub body: Option<String>,
    /// Extra response headers.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
}

/// Short-circuits the flow with a synthesized error response.
///
/// Runs request-side: the upstream leg is never attempted.
#[derive(Debug)]
pub struct ErrorInjectStrategy {
    config: ErrorInjectConfig,
}

impl ErrorInjectStrategy {
    /// Builds the strategy from scenario params.
    ///
    /// # Errors
    ///
    /// Returns a message when params do not deserialize or the status code
    /// is outside the HTTP range.
    pub fn from_params(
        params: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Self, String> {
        let config: ErrorInjectConfig =
            serde_json::from_value(serde_json::Value::Object(params.clone()))
                .map_err(|e| format!("error params: {e}"))?;
        if !(100..=599).contains(&config.status) {
            return Err(format!("status {} outside 100..=599", config.status));
        }
        Ok(Self { config })
    }
}

/// Reason phrase for a synthesized status.
fn reason_for(status: u16) -> &'static str {
    match status {
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Chaos Injection",
    }
}

#[async_trait::async_trait]
impl Strategy for ErrorInjectStrategy {
    fn kind(&self) -> &'static str {
        "error"
    }

    async fn intercept_request(
        &self,
        flow: &mut Flow,
        _cx: &mut StrategyContext<'_>,
    ) -> Result<bool, StrategyError> {
        let (body, content_type) = match &self.config.body {
            Some(body) => (body.clone().into_bytes(), "text/plain"),
            None => (
                serde_json::to_vec(&serde_json::json!({
                    "error": "simulated server error",
                    "code": self.config.status,
                    "type": "chaos_engineering",
                }))?,
                "application/json",
            ),
        };

        let mut response = FlowResponse::synthesize(
            self.config.status,
            reason_for(self.config.status),
            content_type,
            body,
        );
        for (k, v) in &self.config.headers {
            response.set_header(k, v);
        }

        info!(status = self.config.status, "short-circuiting with injected error");
        flow.response = Some(response);
        flow.metadata.short_circuit = true;
        Ok(true)
    }
}
