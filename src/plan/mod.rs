//! Chaos plan: schema, loader, and the installed-plan handle.
//!
//! Plans are parsed and validated up front, compiled into an immutable
//! [`CompiledPlan`] (regexes, classifier, strategy instances), and installed
//! process-wide behind [`PlanHandle`]. Readers take a stable snapshot at the
//! start of each flow; installs swap the snapshot pointer atomically, so
//! in-flight flows keep the plan they started with.

pub mod loader;
pub mod schema;

use std::sync::{Arc, RwLock};

use regex::Regex;

use crate::classify::Classifier;
use crate::error::PlanLoadError;
use crate::jsonpath::JsonPath;
use crate::strategy::Strategy;

pub use schema::{
    ChaosPlan, ClassifierRulePack, ClassifierRules, PlanMetadata, ReplayConfig, Scenario, Target,
    TargetType,
};

// ============================================================================
// Compiled form
// ============================================================================

/// A target with its pattern compiled.
#[derive(Debug)]
pub struct CompiledTarget {
    /// Target name (unique within the plan).
    pub name: String,
    /// What the pattern matches against.
    pub target_type: TargetType,
    /// Compiled pattern.
    pub regex: Regex,
}

/// A scenario bound to its target index and constructed strategy.
///
/// Targets are referenced by index, not name, so the compiled form holds no
/// name-resolution graph.
pub struct CompiledScenario {
    /// Scenario name (appears in `applied_strategies`).
    pub name: String,
    /// Strategy type tag.
    pub strategy_type: String,
    /// Disabled scenarios are skipped by the matcher.
    pub enabled: bool,
    /// Trigger probability in `[0, 1]`.
    pub probability: f64,
    /// Index into [`CompiledPlan::targets`].
    pub target_index: usize,
    /// Optional traffic-subtype restriction.
    pub target_subtype: Option<String>,
    /// The constructed strategy instance.
    pub strategy: Arc<dyn Strategy>,
}

impl std::fmt::Debug for CompiledScenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledScenario")
            .field("name", &self.name)
            .field("strategy_type", &self.strategy_type)
            .field("enabled", &self.enabled)
            .field("probability", &self.probability)
            .field("target_index", &self.target_index)
            .finish_non_exhaustive()
    }
}

/// An immutable, fully compiled chaos plan snapshot.
#[derive(Debug)]
pub struct CompiledPlan {
    /// The validated source plan.
    pub spec: ChaosPlan,
    /// Compiled targets, in plan order.
    pub targets: Vec<CompiledTarget>,
    /// Compiled scenarios, in plan order (the strategy execution order).
    pub scenarios: Vec<CompiledScenario>,
    /// Classifier compiled from the plan's rule packs and overrides.
    pub classifier: Classifier,
    /// Compiled replay masks (invalid ones already rejected or dropped).
    pub ignore_paths: Vec<JsonPath>,
}

impl CompiledPlan {
    /// Revision of the underlying plan.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.spec.revision
    }
}

// ============================================================================
// Installed-plan handle
// ============================================================================

/// Process-wide atomic snapshot pointer for the installed plan.
///
/// `snapshot()` hands out a cheap `Arc` clone; `install()` swaps the pointer
/// under a write lock held only for the pointer exchange. Flows that already
/// took a snapshot keep it for their whole lifetime.
#[derive(Debug)]
pub struct PlanHandle {
    inner: RwLock<Arc<CompiledPlan>>,
}

impl PlanHandle {
    /// Creates a handle over an initial plan.
    #[must_use]
    pub fn new(initial: CompiledPlan) -> Self {
        Self {
            inner: RwLock::new(Arc::new(initial)),
        }
    }

    /// Takes a stable reference to the current plan.
    #[must_use]
    pub fn snapshot(&self) -> Arc<CompiledPlan> {
        Arc::clone(&self.inner.read().expect("plan lock poisoned"))
    }

    /// Atomically installs a new plan.
    ///
    /// # Errors
    ///
    /// Rejects plans whose revision does not strictly advance the installed
    /// one; the installed plan stays unchanged on failure.
    pub fn install(&self, plan: CompiledPlan) -> Result<Arc<CompiledPlan>, PlanLoadError> {
        let mut guard = self.inner.write().expect("plan lock poisoned");
        let installed = guard.revision();
        let offered = plan.revision();
        if offered <= installed {
            return Err(PlanLoadError::RevisionNotMonotonic { installed, offered });
        }
        let arc = Arc::new(plan);
        *guard = Arc::clone(&arc);
        Ok(arc)
    }
}

#[cfg(test)]
mod tests {
    use super::loader::{self, LoaderOptions};
    use super::*;

    fn compiled(yaml: &str) -> CompiledPlan {
        let opts = LoaderOptions::default();
        let plan = loader::validate_plan(yaml.as_bytes(), &opts).unwrap();
        loader::compile(plan, &opts).unwrap()
    }

    #[test]
    fn install_requires_strictly_increasing_revision() {
        let handle = PlanHandle::new(compiled("revision: 3"));
        let err = handle.install(compiled("revision: 3")).unwrap_err();
        assert!(matches!(
            err,
            PlanLoadError::RevisionNotMonotonic {
                installed: 3,
                offered: 3
            }
        ));
        assert_eq!(handle.snapshot().revision(), 3);

        handle.install(compiled("revision: 4")).unwrap();
        assert_eq!(handle.snapshot().revision(), 4);
    }

    #[test]
    fn snapshot_survives_install() {
        let handle = PlanHandle::new(compiled("revision: 1"));
        let old = handle.snapshot();
        handle.install(compiled("revision: 2")).unwrap();
        // The flow that took `old` still sees revision 1.
        assert_eq!(old.revision(), 1);
        assert_eq!(handle.snapshot().revision(), 2);
    }
}
