//! Traffic classification.
//!
//! Tags each flow with a [`TrafficType`] and [`TrafficSubtype`] so strategies
//! can target tool calls, LLM calls, and inter-agent messages separately.
//! Priority order: explicit headers, then rule-pack URL patterns (agent, llm,
//! tool — longer pattern wins, ties broken by plan order), then JSON body
//! shape, else `UNKNOWN`. Classification happens once per flow and is
//! immutable afterwards.

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::flow::Flow;
use crate::plan::schema::{ChaosPlan, ClassifierRules};

/// Bodies larger than this are not parsed for classification.
const MAX_CLASSIFIED_BODY: usize = 1_000_000;

// ============================================================================
// Types
// ============================================================================

/// Classified purpose of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrafficType {
    /// Agent calling an external tool or API.
    #[serde(rename = "TOOL_CALL")]
    ToolCall,
    /// Agent calling an LLM service.
    #[serde(rename = "LLM_API")]
    LlmApi,
    /// Inter-agent communication.
    #[serde(rename = "AGENT_TO_AGENT")]
    AgentToAgent,
    /// Unclassified.
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl TrafficType {
    /// Wire name, as stored in events and tapes.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ToolCall => "TOOL_CALL",
            Self::LlmApi => "LLM_API",
            Self::AgentToAgent => "AGENT_TO_AGENT",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Parses a wire name; unknown strings map to `Unknown`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "TOOL_CALL" => Self::ToolCall,
            "LLM_API" => Self::LlmApi,
            "AGENT_TO_AGENT" => Self::AgentToAgent,
            _ => Self::Unknown,
        }
    }
}

/// Finer-grained class for inter-agent traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficSubtype {
    /// Supervisor dispatching work to a worker.
    SupervisorToWorker,
    /// Consensus/voting round message.
    ConsensusVote,
    /// Generic worker-to-worker message.
    WorkerCommunication,
    /// AutoGen-framework message shape.
    AutogenMessage,
    /// Swarm-framework message shape.
    SwarmMessage,
    /// No subtype.
    None,
}

impl TrafficSubtype {
    /// Wire name, as stored in events and tapes.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SupervisorToWorker => "supervisor_to_worker",
            Self::ConsensusVote => "consensus_vote",
            Self::WorkerCommunication => "worker_communication",
            Self::AutogenMessage => "autogen_message",
            Self::SwarmMessage => "swarm_message",
            Self::None => "none",
        }
    }

    /// Parses a wire name; unknown strings map to `None`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "supervisor_to_worker" => Self::SupervisorToWorker,
            "consensus_vote" => Self::ConsensusVote,
            "worker_communication" => Self::WorkerCommunication,
            "autogen_message" => Self::AutogenMessage,
            "swarm_message" => Self::SwarmMessage,
            _ => Self::None,
        }
    }
}

// ============================================================================
// Classifier
// ============================================================================

/// One compiled URL pattern with its plan-order rank for tie-breaking.
#[derive(Debug)]
struct RankedPattern {
    regex: Regex,
    /// Length of the source pattern; longer patterns win within a category.
    pattern_len: usize,
    /// Insertion order; lower wins ties.
    rank: usize,
}

/// Compiled rule set shared by all flows under one plan snapshot.
///
/// Stateless after construction; classification never allocates beyond the
/// optional body parse.
#[derive(Debug, Default)]
pub struct Classifier {
    agent_patterns: Vec<RankedPattern>,
    llm_patterns: Vec<RankedPattern>,
    tool_patterns: Vec<RankedPattern>,
}

impl Classifier {
    /// Compiles the classifier from a plan's override rules and rule packs.
    ///
    /// Patterns that fail to compile were already rejected by validation;
    /// any stragglers are skipped.
    #[must_use]
    pub fn from_plan(plan: &ChaosPlan) -> Self {
        let mut classifier = Self::default();
        let mut rank = 0usize;

        if let Some(rules) = &plan.classifier_rules {
            classifier.absorb(rules, &mut rank);
        }
        for pack in &plan.classifier_rule_packs {
            classifier.absorb(&pack.rules, &mut rank);
        }

        debug!(
            agent = classifier.agent_patterns.len(),
            llm = classifier.llm_patterns.len(),
            tool = classifier.tool_patterns.len(),
            "classifier compiled"
        );
        classifier
    }

    fn absorb(&mut self, rules: &ClassifierRules, rank: &mut usize) {
        for (patterns, bucket) in [
            (&rules.agent_patterns, &mut self.agent_patterns),
            (&rules.llm_patterns, &mut self.llm_patterns),
            (&rules.tool_patterns, &mut self.tool_patterns),
        ] {
            for p in patterns {
                if let Ok(regex) = Regex::new(p) {
                    bucket.push(RankedPattern {
                        regex,
                        pattern_len: p.len(),
                        rank: *rank,
                    });
                }
                *rank += 1;
            }
        }
    }

    /// Classifies a flow and writes the result into its metadata.
    ///
    /// Also extracts `agent_role` (header `X-Agent-Role` first, body
    /// `agent_role`/`role` second).
    pub fn classify(&self, flow: &mut Flow) {
        let body = parse_body(flow);

        flow.metadata.agent_role = extract_agent_role(flow, body.as_ref());

        let (traffic_type, subtype) = self.classify_inner(flow, body.as_ref());
        flow.metadata.traffic_type = traffic_type;
        flow.metadata.traffic_subtype = subtype;

        debug!(
            traffic_type = traffic_type.as_str(),
            subtype = subtype.as_str(),
            "flow classified"
        );
    }

    fn classify_inner(
        &self,
        flow: &Flow,
        body: Option<&serde_json::Value>,
    ) -> (TrafficType, TrafficSubtype) {
        // 1. Header signal wins over everything.
        if is_truthy(flow.request.header("X-Agent-To-Agent"))
            || is_truthy(flow.request.header("X-Swarm-Message"))
        {
            let subtype = flow
                .request
                .header("X-Agent-Subtype")
                .map(TrafficSubtype::parse)
                .filter(|s| *s != TrafficSubtype::None)
                .unwrap_or_else(|| detect_agent_subtype(flow, body));
            return (TrafficType::AgentToAgent, subtype);
        }

        // 2. Rule-pack URL match: agent, then llm, then tool.
        let url = &flow.request.url;
        if best_match(&self.agent_patterns, url).is_some() {
            return (
                TrafficType::AgentToAgent,
                detect_agent_subtype(flow, body),
            );
        }
        if best_match(&self.llm_patterns, url).is_some() {
            return (TrafficType::LlmApi, TrafficSubtype::None);
        }
        if best_match(&self.tool_patterns, url).is_some() {
            return (TrafficType::ToolCall, TrafficSubtype::None);
        }

        // 3. Body structure.
        if let Some(body) = body {
            if is_agent_body(body) {
                return (
                    TrafficType::AgentToAgent,
                    detect_agent_subtype(flow, Some(body)),
                );
            }
            if body.get("messages").is_some_and(serde_json::Value::is_array)
                && body.get("model").is_some()
            {
                return (TrafficType::LlmApi, TrafficSubtype::None);
            }
            return (TrafficType::ToolCall, TrafficSubtype::None);
        }

        (TrafficType::Unknown, TrafficSubtype::None)
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn is_truthy(value: Option<&str>) -> bool {
    value.is_some_and(|v| v.eq_ignore_ascii_case("true") || v == "1")
}

/// Parses the request body as JSON when small enough; oversized or broken
/// bodies are skipped and counted, never fatal.
fn parse_body(flow: &Flow) -> Option<serde_json::Value> {
    let body = &flow.request.body;
    if body.is_empty() || body.len() > MAX_CLASSIFIED_BODY {
        return None;
    }
    match serde_json::from_slice(body) {
        Ok(v) => Some(v),
        Err(_) => {
            metrics::counter!("chaosproxy_classifier_errors_total").increment(1);
            None
        }
    }
}

/// Best match in a category: longest pattern first, then plan order.
fn best_match<'a>(patterns: &'a [RankedPattern], url: &str) -> Option<&'a RankedPattern> {
    patterns
        .iter()
        .filter(|p| p.regex.is_match(url))
        .min_by(|a, b| {
            b.pattern_len
                .cmp(&a.pattern_len)
                .then(a.rank.cmp(&b.rank))
        })
}

/// AutoGen/Swarm message shape: explicit sender+recipient pair, or a
/// messages array with assistant/tool roles plus an `agent_id`.
fn is_agent_body(body: &serde_json::Value) -> bool {
    if body.get("sender_agent").is_some() && body.get("recipient_agent").is_some() {
        return true;
    }
    if body.get("agent_id").is_some() {
        if let Some(messages) = body.get("messages").and_then(|m| m.as_array()) {
            return messages.iter().any(|m| {
                matches!(
                    m.get("role").and_then(|r| r.as_str()),
                    Some("assistant" | "tool")
                )
            });
        }
    }
    false
}

/// Subtype detection for inter-agent flows.
fn detect_agent_subtype(flow: &Flow, body: Option<&serde_json::Value>) -> TrafficSubtype {
    let role = flow
        .metadata
        .agent_role
        .as_deref()
        .or_else(|| flow.request.header("X-Agent-Role"))
        .unwrap_or("");
    if role.contains("supervisor") {
        return TrafficSubtype::SupervisorToWorker;
    }
    if let Some(body) = body {
        if let Some(sender_role) = body.get("sender_role").and_then(|v| v.as_str()) {
            if sender_role.contains("supervisor") {
                return TrafficSubtype::SupervisorToWorker;
            }
        }
    }

    if flow.request.url.contains("/vote") || body.is_some_and(|b| b.get("vote").is_some()) {
        return TrafficSubtype::ConsensusVote;
    }

    if let Some(body) = body {
        if body.get("sender").is_some() && body.get("receiver").is_some() {
            return TrafficSubtype::AutogenMessage;
        }
        if body.get("swarm_id").is_some() {
            return TrafficSubtype::SwarmMessage;
        }
    }
    if is_truthy(flow.request.header("X-Swarm-Message")) {
        return TrafficSubtype::SwarmMessage;
    }

    TrafficSubtype::WorkerCommunication
}

/// Agent role: header `X-Agent-Role` first, body `agent_role`/`role` second.
fn extract_agent_role(flow: &Flow, body: Option<&serde_json::Value>) -> Option<String> {
    if let Some(role) = flow.request.header("X-Agent-Role") {
        if !role.is_empty() {
            return Some(role.to_string());
        }
    }
    let body = body?;
    body.get("agent_role")
        .or_else(|| body.get("role"))
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// ============================================================================
// Tests
// ============================================================================
