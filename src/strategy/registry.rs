//! Strategy registry: tag string → constructor, resolved at plan load.
//!
//! Per-flow dispatch never looks anything up; the compiled plan holds
//! constructed `Arc<dyn Strategy>` instances.

use std::sync::Arc;

use crate::plan::loader::LoaderOptions;
use crate::plan::schema::Scenario;
use crate::strategy::cognitive::{ContextOverflowStrategy, HallucinationStrategy};
use crate::strategy::corruption::CorruptionStrategy;
use crate::strategy::error_inject::ErrorInjectStrategy;
use crate::strategy::fuzzing::FuzzingStrategy;
use crate::strategy::group::GroupFailureStrategy;
use crate::strategy::latency::LatencyStrategy;
use crate::strategy::rag::{RagBuildError, RagPhantomStrategy};
use crate::strategy::swarm::SwarmDisruptionStrategy;
use crate::strategy::Strategy;

/// Canonical strategy type tags, as accepted in plan `type` fields.
const KINDS: &[&str] = &[
    "latency",
    "error",
    "data_corruption",
    "mcp_fuzzing",
    "hallucination",
    "context_overflow",
    "rag_phantom",
    "swarm_disruption",
    "group_failure",
];

/// Construction failure for one scenario.
#[derive(Debug)]
pub enum BuildError {
    /// Bad parameters; becomes a validation issue at the scenario's path.
    Invalid {
        /// Human-readable problem description.
        message: String,
    },
    /// JSONPath outside the supported subset under strict replay mode.
    UnsupportedJsonPath {
        /// Description including the offending expression.
        expr: String,
    },
}

/// Whether `kind` names a registered strategy type.
#[must_use]
pub fn is_known_kind(kind: &str) -> bool {
    KINDS.contains(&canonical(kind))
}

/// The canonical tag list, for diagnostics.
#[must_use]
pub fn known_kinds() -> Vec<&'static str> {
    KINDS.to_vec()
}

/// Maps accepted aliases onto canonical tags.
fn canonical(kind: &str) -> &str {
    match kind {
        "error_injection" => "error",
        "corruption" => "data_corruption",
        "phantom_document" => "rag_phantom",
        other => other,
    }
}

/// Constructs the strategy instance for a scenario.
///
/// # Errors
///
/// Returns [`BuildError`] when the scenario's params are malformed, or when
/// a JSONPath parameter falls outside the supported subset in strict mode.
pub fn create_strategy(
    scenario: &Scenario,
    opts: &LoaderOptions,
) -> Result<Arc<dyn Strategy>, BuildError> {
    let invalid = |message: String| BuildError::Invalid { message };
    let params = &scenario.params;

    let strategy: Arc<dyn Strategy> = match canonical(&scenario.strategy_type) {
        "latency" => Arc::new(LatencyStrategy::from_params(params).map_err(invalid)?),
        "error" => Arc::new(ErrorInjectStrategy::from_params(params).map_err(invalid)?),
        "data_corruption" => Arc::new(CorruptionStrategy::from_params(params).map_err(invalid)?),
        "mcp_fuzzing" => Arc::new(FuzzingStrategy::from_params(params).map_err(invalid)?),
        "hallucination" => Arc::new(HallucinationStrategy::from_params(params).map_err(invalid)?),
        "context_overflow" => {
            Arc::new(ContextOverflowStrategy::from_params(params).map_err(invalid)?)
        }
        "rag_phantom" => Arc::new(
            RagPhantomStrategy::from_params(params, opts.replay_strict).map_err(|e| match e {
                RagBuildError::Invalid(message) => BuildError::Invalid { message },
                RagBuildError::UnsupportedPath(expr) => BuildError::UnsupportedJsonPath { expr },
            })?,
        ),
        "swarm_disruption" => {
            Arc::new(SwarmDisruptionStrategy::from_params(params).map_err(invalid)?)
        }
        "group_failure" => Arc::new(GroupFailureStrategy::from_params(params).map_err(invalid)?),
        other => {
            return Err(BuildError::Invalid {
                message: format!("unknown strategy type '{other}'"),
            });
        }
    };

    Ok(strategy)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario(strategy_type: &str, params: &str) -> Scenario {
        Scenario {
            name: "s".to_string(),
            strategy_type: strategy_type.to_string(),
            target_ref: "t".to_string(),
            enabled: true,
            probability: 1.0,
            params: serde_json::from_str(params).unwrap(),
        }
    }

    #[test]
    fn all_canonical_kinds_construct() {
        let opts = LoaderOptions::default();
        for (kind, params) in [
            ("latency", "{}"),
            ("error", "{}"),
            ("data_corruption", "{}"),
            ("mcp_fuzzing", "{}"),
            ("hallucination", "{}"),
            ("context_overflow", "{}"),
            ("rag_phantom", "{}"),
            ("swarm_disruption", "{}"),
            ("group_failure", r#"{"target_role": "worker-.*"}"#),
        ] {
            let built = create_strategy(&scenario(kind, params), &opts);
            assert!(built.is_ok(), "kind {kind} failed to build");
            assert!(is_known_kind(kind));
        }
    }

    #[test]
    fn aliases_resolve() {
        assert!(is_known_kind("error_injection"));
        assert!(is_known_kind("phantom_document"));
        assert!(is_known_kind("corruption"));
        let opts = LoaderOptions::default();
        let s = create_strategy(&scenario("error_injection", "{}"), &opts).unwrap();
        assert_eq!(s.kind(), "error");
    }

    #[test]
    fn unknown_kind_rejected() {
        assert!(!is_known_kind("chaos_monkey"));
        let opts = LoaderOptions::default();
        assert!(matches!(
            create_strategy(&scenario("chaos_monkey", "{}"), &opts),
            Err(BuildError::Invalid { .. })
        ));
    }

    #[test]
    fn bad_params_surface_as_invalid() {
        let opts = LoaderOptions::default();
        let err = create_strategy(&scenario("latency", r#"{"delay": -2}"#), &opts);
        assert!(matches!(err, Err(BuildError::Invalid { .. })));
    }

    #[test]
    fn strict_jsonpath_surfaces_as_unsupported() {
        let opts = LoaderOptions {
            classifier_strict: false,
            replay_strict: true,
        };
        let err = create_strategy(
            &scenario("rag_phantom", r#"{"target_json_path": "$..deep"}"#),
            &opts,
        );
        assert!(matches!(err, Err(BuildError::UnsupportedJsonPath { .. })));
    }
}
