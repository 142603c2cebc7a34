//! Group failure: fail every flow from a matching agent role.

use regex::Regex;
use serde::Deserialize;
use tracing::info;

use crate::error::StrategyError;
use crate::flow::{Flow, FlowResponse};
use crate::strategy::{Strategy, StrategyContext};

fn default_status() -> u16 {
    503
}

/// Parameters for [`GroupFailureStrategy`].
#[derive(Debug, Clone, Deserialize)]
pub struct GroupFailureConfig {
    /// Regex matched against the flow's `agent_role`.
    pub target_role: String,
    /// Status of the synthesized response.
    #[serde(default = "default_status")]
    pub status: u16,
    /// Response body; defaults to a JSON error document.
    #[serde(default)]
    pub body: Option<String>,
}

/// Short-circuits flows whose agent role matches the configured pattern.
#[derive(Debug)]
pub struct GroupFailureStrategy {
    config: GroupFailureConfig,
    role_pattern: Regex,
}

impl GroupFailureStrategy {
    /// Builds the strategy from scenario params.
    ///
    /// # Errors
    ///
    /// Returns a message when params do not deserialize or `target_role` is
    /// not a valid regex.
    pub fn from_params(
        params: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Self, String> {
        let config: GroupFailureConfig =
            serde_json::from_value(serde_json::Value::Object(params.clone()))
                .map_err(|e| format!("group_failure params: {e}"))?;
        let role_pattern = Regex::new(&config.target_role)
            .map_err(|e| format!("group_failure target_role: {e}"))?;
        if !(100..=599).contains(&config.status) {
            return Err(format!("status {} outside 100..=599", config.status));
        }
        Ok(Self {
            config,
            role_pattern,
        })
    }
}

#[async_trait::async_trait]
impl Strategy for GroupFailureStrategy {
    fn kind(&self) -> &'static str {
        "group_failure"
    }

    async fn intercept_request(
        &self,
        flow: &mut Flow,
        _cx: &mut StrategyContext<'_>,
    ) -> Result<bool, StrategyError> {
        let Some(role) = flow.metadata.agent_role.as_deref() else {
            return Ok(false);
        };
        if !self.role_pattern.is_match(role) {
            return Ok(false);
        }

        let (body, content_type) = match &self.config.body {
            Some(body) => (body.clone().into_bytes(), "text/plain"),
            None => (
                serde_json::to_vec(&serde_json::json!({
                    "error": "group failure injected",
                    "role": role,
                }))?,
                "application/json",
            ),
        };

        info!(role, status = self.config.status, "group failure short-circuit");
        flow.response = Some(FlowResponse::synthesize(
            self.config.status,
            "Service Unavailable",
            content_type,
            body,
        ));
        flow.metadata.short_circuit = true;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FlowRequest;
    use crate::strategy::testutil;

    fn strategy(json: &str) -> GroupFailureStrategy {
        GroupFailureStrategy::from_params(&serde_json::from_str(json).unwrap()).unwrap()
    }

    fn flow_with_role(role: Option<&str>) -> Flow {
        let mut flow = Flow::new(FlowRequest::new("POST", "http://x/work", vec![], b"{}"));
        flow.metadata.agent_role = role.map(str::to_string);
        flow
    }

    #[tokio::test]
    async fn matching_role_fails() {
        let s = strategy(r#"{"target_role": "worker-.*", "status": 503, "body": "no workers"}"#);
        let mut f = flow_with_role(Some("worker-2"));
        let mut rng = testutil::rng();
        let mut cx = testutil::context(&mut rng);

        assert!(s.intercept_request(&mut f, &mut cx).await.unwrap());
        assert!(f.metadata.short_circuit);
        let resp = f.response.as_ref().unwrap();
        assert_eq!(resp.status, 503);
        assert_eq!(&resp.body[..], b"no workers");
    }

    #[tokio::test]
    async fn non_matching_role_untouched() {
        let s = strategy(r#"{"target_role": "worker-.*"}"#);
        let mut f = flow_with_role(Some("supervisor"));
        let mut rng = testutil::rng();
        let mut cx = testutil::context(&mut rng);
        assert!(!s.intercept_request(&mut f, &mut cx).await.unwrap());
        assert!(f.response.is_none());
    }

    #[tokio::test]
    async fn missing_role_untouched() {
        let s = strategy(r#"{"target_role": ".*"}"#);
        let mut f = flow_with_role(None);
        let mut rng = testutil::rng();
        let mut cx = testutil::context(&mut rng);
        assert!(!s.intercept_request(&mut f, &mut cx).await.unwrap());
    }

    #[test]
    fn missing_target_role_rejected() {
        let params: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str("{}").unwrap();
        assert!(GroupFailureStrategy::from_params(&params).is_err());
    }

    #[test]
    fn invalid_role_regex_rejected() {
        let params: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(r#"{"target_role": "("}"#).unwrap();
        assert!(GroupFailureStrategy::from_params(&params).is_err());
    }
}
