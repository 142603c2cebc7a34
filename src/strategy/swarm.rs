//! Swarm disruption: attacks on inter-agent communication.
//!
//! Triggers only on flows classified `AGENT_TO_AGENT` (the matcher's
//! `target_subtype` gate narrows further). Three attack types: message
//! mutation, consensus delay, and agent isolation.

use std::collections::BTreeMap;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::Rng;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::classify::{TrafficSubtype, TrafficType};
use crate::error::StrategyError;
use crate::flow::{Flow, FlowResponse};
use crate::strategy::{Strategy, StrategyContext, Suspension};

/// Attack flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackType {
    /// Mutate fields of the inter-agent message body.
    #[default]
    MessageMutation,
    /// Delay consensus-vote messages.
    ConsensusDelay,
    /// Cut isolated agents off with a 503.
    AgentIsolation,
}

fn default_consensus_delay() -> f64 {
    3.0
}

/// Parameters for [`SwarmDisruptionStrategy`].
#[derive(Debug, Clone, Deserialize)]
pub struct SwarmConfig {
    /// Attack flavor.
    #[serde(default)]
    pub attack_type: AttackType,
    /// Field-name → replacement-value rules for `message_mutation`.
    /// Without rules, the default rule flips booleans and jitters numerics.
    #[serde(default)]
    pub mutation_rules: Option<BTreeMap<String, Value>>,
    /// Suspension in seconds for `consensus_delay`.
    #[serde(default = "default_consensus_delay")]
    pub consensus_delay: f64,
    /// Sender agent ids cut off by `agent_isolation`.
    #[serde(default)]
    pub isolated_agents: Vec<String>,
}

/// Disrupts agent-to-agent traffic.
#[derive(Debug)]
pub struct SwarmDisruptionStrategy {
    config: SwarmConfig,
}

impl SwarmDisruptionStrategy {
    /// Builds the strategy from scenario params.
    ///
    /// # Errors
    ///
    /// Returns a message when params do not deserialize or the delay is
    /// negative.
    pub fn from_params(
        params: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Self, String> {
        let config: SwarmConfig =
            serde_json::from_value(serde_json::Value::Object(params.clone()))
                .map_err(|e| format!("swarm_disruption params: {e}"))?;
        if !config.consensus_delay.is_finite() || config.consensus_delay < 0.0 {
            return Err(format!(
                "consensus_delay {} must be >= 0",
                config.consensus_delay
            ));
        }
        Ok(Self { config })
    }

    fn mutate_message(&self, body: &mut Value, rng: &mut StdRng) -> usize {
        if let Some(rules) = &self.config.mutation_rules {
            let Some(map) = body.as_object_mut() else {
                return 0;
            };
            let mut mutated = 0;
            for (field, replacement) in rules {
                if let Some(slot) = map.get_mut(field) {
                    *slot = replacement.clone();
                    mutated += 1;
                }
            }
            mutated
        } else {
            default_mutation(body, rng)
        }
    }
}

/// Default mutation rule: flip booleans, jitter numerics by ±20% (floats)
/// or ±1 (integers).
fn default_mutation(value: &mut Value, rng: &mut StdRng) -> usize {
    match value {
        Value::Bool(b) => {
            *b = !*b;
            1
        }
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                let delta: i64 = if rng.gen::<bool>() { 1 } else { -1 };
                *value = Value::from(i + delta);
                1
            } else if let Some(f) = n.as_f64() {
                let factor = 1.0 + rng.gen_range(-0.2..0.2);
                serde_json::Number::from_f64(f * factor).map_or(0, |jittered| {
                    *value = Value::Number(jittered);
                    1
                })
            } else {
                0
            }
        }
        Value::Object(map) => map.values_mut().map(|v| default_mutation(v, rng)).sum(),
        Value::Array(items) => items.iter_mut().map(|v| default_mutation(v, rng)).sum(),
        _ => 0,
    }
}

/// Sender agent id: header `X-Agent-Id` first, body `sender_agent`/`sender`
/// second.
fn sender_agent_id(flow: &Flow) -> Option<String> {
    if let Some(id) = flow.request.header("X-Agent-Id") {
        if !id.is_empty() {
            return Some(id.to_string());
        }
    }
    let body = flow.request.json_body()?;
    body.get("sender_agent")
        .or_else(|| body.get("sender"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

#[async_trait::async_trait]
impl Strategy for SwarmDisruptionStrategy {
    fn kind(&self) -> &'static str {
        "swarm_disruption"
    }

    async fn intercept_request(
        &self,
        flow: &mut Flow,
        cx: &mut StrategyContext<'_>,
    ) -> Result<bool, StrategyError> {
        if flow.metadata.traffic_type != TrafficType::AgentToAgent {
            return Ok(false);
        }

        match self.config.attack_type {
            AttackType::MessageMutation => {
                let Some(mut body) = flow.request.json_body() else {
                    return Ok(false);
                };
                let mutated = self.mutate_message(&mut body, cx.rng);
                if mutated == 0 {
                    return Ok(false);
                }
                let bytes = serde_json::to_vec(&body)?;
                flow.request.set_body(bytes);
                flow.metadata.attack_tags.push("swarm:message_mutation");
                info!(mutated, "inter-agent message mutated");
                Ok(true)
            }
            AttackType::ConsensusDelay => {
                if flow.metadata.traffic_subtype != TrafficSubtype::ConsensusVote {
                    return Ok(false);
                }
                info!(delay_s = self.config.consensus_delay, "delaying consensus vote");
                let outcome = cx
                    .suspend(Duration::from_secs_f64(self.config.consensus_delay))
                    .await;
                if outcome == Suspension::Cancelled {
                    flow.metadata.cancelled = true;
                }
                flow.metadata.attack_tags.push("swarm:consensus_delay");
                Ok(true)
            }
            AttackType::AgentIsolation => {
                let Some(sender) = sender_agent_id(flow) else {
                    return Ok(false);
                };
                if !self.config.isolated_agents.contains(&sender) {
                    return Ok(false);
                }
                let body = serde_json::to_vec(&serde_json::json!({
                    "error": "agent isolated from swarm",
                    "agent": sender,
                }))?;
                flow.response = Some(FlowResponse::synthesize(
                    503,
                    "Service Unavailable",
                    "application/json",
                    body,
                ));
                flow.metadata.short_circuit = true;
                flow.metadata.attack_tags.push("swarm:agent_isolation");
                info!(agent = %sender, "isolated agent cut off");
                Ok(true)
            }
        }
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
    use std::time::Instant;

    fn strategy(json: &str) -> SwarmDisruptionStrategy {
        SwarmDisruptionStrategy::from_params(&serde_json::from_str(json).unwrap()).unwrap()
    }

    fn agent_flow(headers: Vec<(&str, &str)>, body: &[u8]) -> Flow {
        let mut flow = Flow::new(FlowRequest::new(
            "POST",
            "http://swarm/messages",
            headers
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body,
        ));
        flow.metadata.traffic_type = TrafficType::AgentToAgent;
        flow
    }

    async fn run(s: &SwarmDisruptionStrategy, f: &mut Flow) -> bool {
        let mut rng = testutil::rng();
        let mut cx = testutil::context(&mut rng);
        s.intercept_request(f, &mut cx).await.unwrap()
    }

    #[tokio::test]
    async fn non_agent_flows_untouched() {
        let s = strategy("{}");
        let mut f = agent_flow(vec![], br#"{"ready": true}"#);
        f.metadata.traffic_type = TrafficType::ToolCall;
        assert!(!run(&s, &mut f).await);
    }

    #[tokio::test]
    async fn default_mutation_flips_and_jitters() {
        let s = strategy(r#"{"attack_type": "message_mutation"}"#);
        let mut f = agent_flow(vec![], br#"{"ready": true, "round": 4}"#);
        assert!(run(&s, &mut f).await);
        let body: Value = serde_json::from_slice(&f.request.body).unwrap();
        assert_eq!(body["ready"], false);
        let round = body["round"].as_i64().unwrap();
        assert!(round == 3 || round == 5);
    }

    #[tokio::test]
    async fn explicit_mutation_rules_replace_fields() {
        let s = strategy(
            r#"{"attack_type": "message_mutation", "mutation_rules": {"task": "poisoned", "priority": 0}}"#,
        );
        let mut f = agent_flow(
            vec![],
            br#"{"task": "review", "priority": 9, "untouched": "x"}"#,
        );
        assert!(run(&s, &mut f).await);
        let body: Value = serde_json::from_slice(&f.request.body).unwrap();
        assert_eq!(body["task"], "poisoned");
        assert_eq!(body["priority"], 0);
        assert_eq!(body["untouched"], "x");
    }

    #[tokio::test]
    async fn consensus_delay_only_on_vote_subtype() {
        let s = strategy(r#"{"attack_type": "consensus_delay", "consensus_delay": 0.05}"#);

        let mut f = agent_flow(vec![], b"{}");
        assert!(!run(&s, &mut f).await);

        f.metadata.traffic_subtype = TrafficSubtype::ConsensusVote;
        let start = Instant::now();
        assert!(run(&s, &mut f).await);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn isolation_cuts_off_listed_sender() {
        let s = strategy(
            r#"{"attack_type": "agent_isolation", "isolated_agents": ["agent-7"]}"#,
        );
        let mut f = agent_flow(vec![("X-Agent-Id", "agent-7")], b"{}");
        assert!(run(&s, &mut f).await);
        assert!(f.metadata.short_circuit);
        assert_eq!(f.response.as_ref().unwrap().status, 503);
    }

    #[tokio::test]
    async fn isolation_reads_sender_from_body() {
        let s = strategy(
            r#"{"attack_type": "agent_isolation", "isolated_agents": ["agent-3"]}"#,
        );
        let mut f = agent_flow(vec![], br#"{"sender_agent": "agent-3"}"#);
        assert!(run(&s, &mut f).await);
        assert_eq!(f.response.as_ref().unwrap().status, 503);
    }

    #[tokio::test]
    async fn isolation_spares_unlisted_sender() {
        let s = strategy(
            r#"{"attack_type": "agent_isolation", "isolated_agents": ["agent-7"]}"#,
        );
        let mut f = agent_flow(vec![("X-Agent-Id", "agent-8")], b"{}");
        assert!(!run(&s, &mut f).await);
        assert!(f.response.is_none());
    }
}
