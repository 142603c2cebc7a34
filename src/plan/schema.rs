//! Chaos plan schema.
//!
//! Typed serde model for the declarative YAML plan: targets (what to
//! attack), scenarios (how to attack), classifier rules, and replay masking
//! configuration. Validation lives in [`crate::plan::loader`]; this module
//! only defines the shape and defaults.

use serde::{Deserialize, Serialize};

/// JSONPath expressions masked out of request bodies before fingerprinting.
///
/// These cover the volatile fields agent frameworks stamp into every
/// request; masking them keeps fingerprints stable across replay runs.
pub const DEFAULT_REPLAY_IGNORE_PATHS: &[&str] = &[
    "$.timestamp",
    "$.created_at",
    "$.date",
    "$.uuid",
    "$.trace_id",
    "$.request_id",
];

fn default_version() -> String {
    "1.0".to_string()
}

fn default_enabled() -> bool {
    true
}

fn default_probability() -> f64 {
    1.0
}

fn default_ignore_paths() -> Vec<String> {
    DEFAULT_REPLAY_IGNORE_PATHS
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}

// ============================================================================
// Targets
// ============================================================================

/// What a target's pattern is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    /// Pattern is a regex over the full request URL.
    HttpEndpoint,
    /// Pattern is a regex over the classified traffic type, for LLM flows.
    LlmInput,
    /// Pattern is a regex over the classified traffic type, for tool flows.
    ToolCall,
    /// Pattern is a regex over the flow's `agent_role` metadata.
    AgentRole,
    /// Pattern is a regex over the URL, for user-defined groupings.
    Custom,
}

/// A chaos target: a named pattern describing which flows a strategy
/// applies to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    /// Unique, nonempty identifier referenced by scenarios.
    pub name: String,
    /// What the pattern matches against.
    #[serde(rename = "type")]
    pub target_type: TargetType,
    /// Regex pattern (compiled at plan load).
    pub pattern: String,
    /// Optional human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

// ============================================================================
// Scenarios
// ============================================================================

/// A strategy instance: a named, configured mutation bound to one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Unique scenario identifier (appears in `applied_strategies`).
    pub name: String,
    /// Strategy type tag (e.g. `latency`, `error`, `mcp_fuzzing`).
    #[serde(rename = "type")]
    pub strategy_type: String,
    /// Name of the target this scenario applies to.
    pub target_ref: String,
    /// Disabled scenarios are skipped by the matcher.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Probability in `[0, 1]` of applying the strategy to a matched flow.
    #[serde(default = "default_probability")]
    pub probability: f64,
    /// Strategy-specific parameters.
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl Scenario {
    /// Optional traffic-subtype restriction carried in `params`.
    #[must_use]
    pub fn target_subtype(&self) -> Option<&str> {
        self.params.get("target_subtype").and_then(|v| v.as_str())
    }
}

// ============================================================================
// Classifier rules
// ============================================================================

/// Regex pattern lists the classifier matches URLs against, by category.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassifierRules {
    /// Patterns identifying LLM API traffic.
    #[serde(default)]
    pub llm_patterns: Vec<String>,
    /// Patterns identifying tool-call traffic.
    #[serde(default)]
    pub tool_patterns: Vec<String>,
    /// Patterns identifying inter-agent traffic.
    #[serde(default)]
    pub agent_patterns: Vec<String>,
}

/// A named bundle of classifier rules.
///
/// Strict classifier mode refuses to load a plan without at least one pack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierRulePack {
    /// Rule pack name (for diagnostics only).
    pub name: String,
    /// The pack's patterns.
    pub rules: ClassifierRules,
}

// ============================================================================
// Replay configuration
// ============================================================================

/// Masking applied before request fingerprinting so volatile fields do not
/// break replay matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// JSONPath expressions masked to a sentinel in JSON request bodies.
    #[serde(default = "default_ignore_paths")]
    pub ignore_paths: Vec<String>,
    /// Query parameter names removed from the URL before hashing.
    #[serde(default)]
    pub ignore_params: Vec<String>,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            ignore_paths: default_ignore_paths(),
            ignore_params: Vec::new(),
        }
    }
}

// ============================================================================
// Plan metadata and root
// ============================================================================

/// Free-form experiment metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanMetadata {
    /// Display name of the experiment.
    #[serde(default)]
    pub name: String,
    /// Experiment identifier; keys the deterministic per-flow RNG.
    #[serde(default)]
    pub experiment_id: String,
    /// Optional long-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A complete chaos plan.
///
/// Immutable once compiled; installed process-wide as an atomic snapshot.
/// Reloads must strictly advance `revision`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChaosPlan {
    /// Plan schema version.
    #[serde(default = "default_version")]
    pub version: String,
    /// Monotonically increasing revision counter.
    #[serde(default)]
    pub revision: u64,
    /// Experiment metadata.
    #[serde(default)]
    pub metadata: PlanMetadata,
    /// Ordered targets.
    #[serde(default)]
    pub targets: Vec<Target>,
    /// Ordered scenarios; execution order is plan order.
    #[serde(default)]
    pub scenarios: Vec<Scenario>,
    /// Optional single-rule-set classifier override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classifier_rules: Option<ClassifierRules>,
    /// Classifier rule packs; mandatory in strict classifier mode.
    #[serde(default)]
    pub classifier_rule_packs: Vec<ClassifierRulePack>,
    /// Replay masking configuration.
    #[serde(default)]
    pub replay_config: ReplayConfig,
}

impl ChaosPlan {
    /// Looks up a target by name.
    #[must_use]
    pub fn target(&self, name: &str) -> Option<&Target> {
        self.targets.iter().find(|t| t.name == name)
    }

    /// Experiment identifier used to key the per-flow RNG seed.
    ///
    /// Falls back to the plan name, then to a fixed default, so seeds stay
    /// deterministic even for minimally specified plans.
    #[must_use]
    pub fn experiment_id(&self) -> &str {
        if !self.metadata.experiment_id.is_empty() {
            &self.metadata.experiment_id
        } else if !self.metadata.name.is_empty() {
            &self.metadata.name
        } else {
            "chaos_plan"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_plan_parses_with_defaults() {
        let plan: ChaosPlan = serde_yaml::from_str("{}").unwrap();
        assert_eq!(plan.version, "1.0");
        assert_eq!(plan.revision, 0);
        assert!(plan.targets.is_empty());
        assert!(plan.scenarios.is_empty());
        assert_eq!(plan.experiment_id(), "chaos_plan");
        assert!(!plan.replay_config.ignore_paths.is_empty());
    }

    #[test]
    fn scenario_defaults() {
        let yaml = r"
targets:
  - name: api
    type: http_endpoint
    pattern: 'http://api/.*'
scenarios:
  - name: slow
    type: latency
    target_ref: api
";
        let plan: ChaosPlan = serde_yaml::from_str(yaml).unwrap();
        let s = &plan.scenarios[0];
        assert!(s.enabled);
        assert!((s.probability - 1.0).abs() < f64::EPSILON);
        assert!(s.params.is_empty());
        assert_eq!(s.target_subtype(), None);
    }

    #[test]
    fn target_type_snake_case() {
        let t: Target = serde_yaml::from_str(
            "name: roles\ntype: agent_role\npattern: 'worker-.*'",
        )
        .unwrap();
        assert_eq!(t.target_type, TargetType::AgentRole);
    }

    #[test]
    fn target_subtype_read_from_params() {
        let yaml = r"
name: isolate
type: swarm_disruption
target_ref: swarm
params:
  target_subtype: consensus_vote
";
        let s: Scenario = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(s.target_subtype(), Some("consensus_vote"));
    }

    #[test]
    fn experiment_id_falls_back_to_name() {
        let yaml = "metadata:\n  name: payment-chaos\n";
        let plan: ChaosPlan = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(plan.experiment_id(), "payment-chaos");
    }
}
