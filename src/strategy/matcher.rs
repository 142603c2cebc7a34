//! Strategy matching: which scenarios fire for a flow, in plan order.
//!
//! The per-flow RNG is seeded from `HMAC-SHA256(experiment_id, fingerprint)`
//! so probability draws are reproducible: the same plan, experiment, and
//! request sequence produce the same chaos under record and replay.

use hmac::{Hmac, Mac};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::Sha256;

use crate::flow::Flow;
use crate::plan::schema::TargetType;
use crate::plan::{CompiledPlan, CompiledTarget};
use crate::tape::fingerprint::RequestFingerprint;

type HmacSha256 = Hmac<Sha256>;

/// Derives the deterministic per-flow seed.
#[must_use]
pub fn flow_seed(experiment_id: &str, fingerprint: &RequestFingerprint) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(experiment_id.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(fingerprint.seed_material().as_bytes());
    mac.finalize().into_bytes().into()
}

/// Builds the flow RNG from its seed.
#[must_use]
pub fn flow_rng(experiment_id: &str, fingerprint: &RequestFingerprint) -> StdRng {
    StdRng::from_seed(flow_seed(experiment_id, fingerprint))
}

/// Resolves the ordered strategy execution list for a flow.
///
/// Per scenario in plan order: skip when disabled, apply the target test for
/// the target's type, require the subtype when declared, then draw
/// `u ~ Uniform[0,1)` and keep the scenario iff `u < probability`.
/// Returns indices into `plan.scenarios`.
#[must_use]
pub fn match_strategies(plan: &CompiledPlan, flow: &Flow, rng: &mut StdRng) -> Vec<usize> {
    let mut matched = Vec::new();

    for (i, scenario) in plan.scenarios.iter().enumerate() {
        if !scenario.enabled {
            continue;
        }

        let target = &plan.targets[scenario.target_index];
        if !target_matches(target, flow) {
            continue;
        }

        if let Some(required) = &scenario.target_subtype {
            if flow.metadata.traffic_subtype.as_str() != required {
                continue;
            }
        }

        let u: f64 = rng.gen();
        if u < scenario.probability {
            matched.push(i);
        }
    }

    matched
}

/// Applies a target's test to a flow.
fn target_matches(target: &CompiledTarget, flow: &Flow) -> bool {
    match target.target_type {
        TargetType::HttpEndpoint | TargetType::Custom => target.regex.is_match(&flow.request.url),
        TargetType::ToolCall | TargetType::LlmInput => {
            target.regex.is_match(flow.metadata.traffic_type.as_str())
        }
        TargetType::AgentRole => flow
            .metadata
            .agent_role
            .as_deref()
            .is_some_and(|role| target.regex.is_match(role)),
    }
}

// ============================================================================
// Tests
// ============================================================================
