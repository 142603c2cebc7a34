//! Plan loading, validation, and compilation.
//!
//! Loading is staged: read, YAML parse, total validation (every issue in the
//! document is collected before failing), then compilation of regexes,
//! classifier rules, replay masks, and strategy instances into an immutable
//! [`CompiledPlan`].

use std::collections::HashSet;
use std::path::Path;

use regex::Regex;
use tracing::{info, warn};

use crate::classify::Classifier;
use crate::error::{PlanLoadError, ValidationIssue};
use crate::jsonpath::JsonPath;
use crate::plan::schema::{ChaosPlan, ClassifierRules};
use crate::plan::{CompiledPlan, CompiledScenario, CompiledTarget};
use crate::strategy::registry;

// ============================================================================
// Options
// ============================================================================

/// Strictness flags controlling validation behavior.
#[derive(Debug, Clone, Default)]
pub struct LoaderOptions {
    /// Require at least one classifier rule pack (`CHAOS_CLASSIFIER_STRICT`).
    pub classifier_strict: bool,
    /// Reject JSONPath expressions outside the supported subset instead of
    /// dropping them with a warning (`CHAOS_REPLAY_STRICT`, default on).
    pub replay_strict: bool,
}

impl LoaderOptions {
    /// Reads strictness flags from the environment.
    ///
    /// Classifier strictness is opt-in; replay strictness is opt-out.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            classifier_strict: env_flag("CHAOS_CLASSIFIER_STRICT", false),
            replay_strict: env_flag("CHAOS_REPLAY_STRICT", true),
        }
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name).map_or(default, |v| {
        matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
    })
}

// ============================================================================
// Public operations
// ============================================================================

/// Loads and validates a plan from a YAML file.
///
/// # Errors
///
/// Returns [`PlanLoadError`] if the file cannot be read, fails to parse, or
/// fails validation. All validation issues are reported at once.
pub fn load_plan(path: &Path, opts: &LoaderOptions) -> Result<ChaosPlan, PlanLoadError> {
    let bytes = std::fs::read(path).map_err(|e| PlanLoadError::Read {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let plan = parse_and_validate(&bytes, &path.display().to_string(), opts)?;
    info!(
        path = %path.display(),
        revision = plan.revision,
        targets = plan.targets.len(),
        scenarios = plan.scenarios.len(),
        "plan loaded"
    );
    Ok(plan)
}

/// Validates plan bytes without touching the filesystem.
///
/// # Errors
///
/// Same failure modes as [`load_plan`], with `<inline>` as the path.
pub fn validate_plan(bytes: &[u8], opts: &LoaderOptions) -> Result<ChaosPlan, PlanLoadError> {
    parse_and_validate(bytes, "<inline>", opts)
}

/// Compiles a validated plan into its immutable runtime form.
///
/// # Errors
///
/// Returns [`PlanLoadError`] for problems only detectable at construction
/// time (strategy parameter shapes, strict-mode JSONPath rejections).
pub fn compile(plan: ChaosPlan, opts: &LoaderOptions) -> Result<CompiledPlan, PlanLoadError> {
    let mut issues = Vec::new();

    let mut targets = Vec::with_capacity(plan.targets.len());
    for (i, t) in plan.targets.iter().enumerate() {
        match Regex::new(&t.pattern) {
            Ok(regex) => targets.push(CompiledTarget {
                name: t.name.clone(),
                target_type: t.target_type,
                regex,
            }),
            Err(e) => issues.push(ValidationIssue {
                path: format!("targets[{i}].pattern"),
                message: format!("invalid regex: {e}"),
            }),
        }
    }

    let mut scenarios = Vec::with_capacity(plan.scenarios.len());
    for (i, s) in plan.scenarios.iter().enumerate() {
        let Some(target_index) = plan.targets.iter().position(|t| t.name == s.target_ref) else {
            // Unresolved refs are caught by validation; guard anyway.
            issues.push(ValidationIssue {
                path: format!("scenarios[{i}].target_ref"),
                message: format!("unknown target '{}'", s.target_ref),
            });
            continue;
        };

        match registry::create_strategy(s, opts) {
            Ok(strategy) => scenarios.push(CompiledScenario {
                name: s.name.clone(),
                strategy_type: s.strategy_type.clone(),
                enabled: s.enabled,
                probability: s.probability,
                target_index,
                target_subtype: s.target_subtype().map(str::to_string),
                strategy,
            }),
            Err(registry::BuildError::UnsupportedJsonPath { expr }) => {
                return Err(PlanLoadError::UnsupportedJsonPath {
                    path: format!("scenarios[{i}].params"),
                    expr,
                });
            }
            Err(registry::BuildError::Invalid { message }) => issues.push(ValidationIssue {
                path: format!("scenarios[{i}].params"),
                message,
            }),
        }
    }

    let mut ignore_paths = Vec::new();
    for (i, expr) in plan.replay_config.ignore_paths.iter().enumerate() {
        match JsonPath::parse(expr) {
            Ok(p) => ignore_paths.push(p),
            Err(e) if opts.replay_strict => {
                return Err(PlanLoadError::UnsupportedJsonPath {
                    path: format!("replay_config.ignore_paths[{i}]"),
                    expr: e,
                });
            }
            Err(e) => {
                warn!(expr, error = %e, "dropping unsupported replay ignore path");
            }
        }
    }

    if !issues.is_empty() {
        return Err(PlanLoadError::Validation {
            path: "<compile>".to_string(),
            issues,
        });
    }

    let classifier = Classifier::from_plan(&plan);

    Ok(CompiledPlan {
        spec: plan,
        targets,
        scenarios,
        classifier,
        ignore_paths,
    })
}

// ============================================================================
// Validation
// ============================================================================

fn parse_and_validate(
    bytes: &[u8],
    path: &str,
    opts: &LoaderOptions,
) -> Result<ChaosPlan, PlanLoadError> {
    let text = std::str::from_utf8(bytes).map_err(|e| PlanLoadError::Parse {
        path: path.to_string(),
        message: format!("not valid UTF-8: {e}"),
    })?;

    // Strip a UTF-8 BOM if present.
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    if text.trim().is_empty() {
        return Err(PlanLoadError::Parse {
            path: path.to_string(),
            message: "plan document is empty".to_string(),
        });
    }

    let plan: ChaosPlan = serde_yaml::from_str(text).map_err(|e| PlanLoadError::Parse {
        path: path.to_string(),
        message: e.to_string(),
    })?;

    let issues = validate(&plan, opts);
    if !issues.is_empty() {
        return Err(PlanLoadError::Validation {
            path: path.to_string(),
            issues,
        });
    }

    if opts.classifier_strict && plan.classifier_rule_packs.is_empty() {
        return Err(PlanLoadError::MissingRulePacks);
    }

    Ok(plan)
}

/// Collects every validation issue in the plan, in document order.
#[must_use]
pub fn validate(plan: &ChaosPlan, _opts: &LoaderOptions) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    let mut target_names: HashSet<&str> = HashSet::new();
    for (i, t) in plan.targets.iter().enumerate() {
        if t.name.trim().is_empty() {
            issues.push(ValidationIssue {
                path: format!("targets[{i}].name"),
                message: "target name must be nonempty".to_string(),
            });
        } else if !target_names.insert(t.name.as_str()) {
            issues.push(ValidationIssue {
                path: format!("targets[{i}].name"),
                message: format!("duplicate target name '{}'", t.name),
            });
        }

        if t.pattern.trim().is_empty() {
            issues.push(ValidationIssue {
                path: format!("targets[{i}].pattern"),
                message: "pattern must be nonempty".to_string(),
            });
        } else if let Err(e) = Regex::new(&t.pattern) {
            issues.push(ValidationIssue {
                path: format!("targets[{i}].pattern"),
                message: format!("invalid regex: {e}"),
            });
        }
    }

    let mut scenario_names: HashSet<&str> = HashSet::new();
    for (i, s) in plan.scenarios.iter().enumerate() {
        if s.name.trim().is_empty() {
            issues.push(ValidationIssue {
                path: format!("scenarios[{i}].name"),
                message: "scenario name must be nonempty".to_string(),
            });
        } else if !scenario_names.insert(s.name.as_str()) {
            issues.push(ValidationIssue {
                path: format!("scenarios[{i}].name"),
                message: format!("duplicate scenario name '{}'", s.name),
            });
        }

        if !registry::is_known_kind(&s.strategy_type) {
            issues.push(ValidationIssue {
                path: format!("scenarios[{i}].type"),
                message: format!(
                    "unknown strategy type '{}' (known: {})",
                    s.strategy_type,
                    registry::known_kinds().join(", ")
                ),
            });
        }

        if plan.target(&s.target_ref).is_none() {
            issues.push(ValidationIssue {
                path: format!("scenarios[{i}].target_ref"),
                message: format!("unknown target '{}'", s.target_ref),
            });
        }

        if !s.probability.is_finite() || !(0.0..=1.0).contains(&s.probability) {
            issues.push(ValidationIssue {
                path: format!("scenarios[{i}].probability"),
                message: format!("probability {} outside [0, 1]", s.probability),
            });
        }
    }

    if let Some(rules) = &plan.classifier_rules {
        validate_rules(rules, "classifier_rules", &mut issues);
    }
    for (i, pack) in plan.classifier_rule_packs.iter().enumerate() {
        validate_rules(
            &pack.rules,
            &format!("classifier_rule_packs[{i}].rules"),
            &mut issues,
        );
    }

    issues
}

fn validate_rules(rules: &ClassifierRules, prefix: &str, issues: &mut Vec<ValidationIssue>) {
    for (key, patterns) in [
        ("llm_patterns", &rules.llm_patterns),
        ("tool_patterns", &rules.tool_patterns),
        ("agent_patterns", &rules.agent_patterns),
    ] {
        for (i, p) in patterns.iter().enumerate() {
            if let Err(e) = Regex::new(p) {
                issues.push(ValidationIssue {
                    path: format!("{prefix}.{key}[{i}]"),
                    message: format!("invalid regex: {e}"),
                });
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
