//! Error types for chaosproxy.
//!
//! The data path is fail-open by construction: strategy, classifier, and
//! event-pipeline failures are recorded and counted but never cross the
//! interceptor boundary. Only initialization and graceful-shutdown failures
//! map to a process exit code.

use std::path::PathBuf;
use thiserror::Error;

// ============================================================================
// Exit Codes
// ============================================================================

/// Exit codes for the `chaosproxy` executable.
pub struct ExitCode;

impl ExitCode {
    /// Successful execution.
    pub const SUCCESS: i32 = 0;

    /// Chaos plan failed to load or validate at startup.
    pub const PLAN_ERROR: i32 = 1;

    /// Control-plane port could not be bound.
    pub const BIND_ERROR: i32 = 2;

    /// Tape could not be read, decrypted, or flushed.
    pub const TAPE_ERROR: i32 = 3;

    /// A strict-mode dependency requirement was not met.
    pub const STRICT_DEP_ERROR: i32 = 4;
}

// ============================================================================
// Top-Level Error
// ============================================================================

/// Top-level error type aggregating all startup/shutdown failure domains.
#[derive(Debug, Error)]
pub enum ChaosProxyError {
    /// Plan loading or validation error.
    #[error(transparent)]
    Plan(#[from] PlanLoadError),

    /// Control-plane error (bind failure, bad listener address).
    #[error(transparent)]
    Control(#[from] ControlPlaneError),

    /// Tape storage error.
    #[error(transparent)]
    Tape(#[from] TapeError),

    /// A strict-mode environment flag is set but its requirement is unmet.
    #[error("strict mode requirement not met: {0}")]
    StrictDependency(String),

    /// I/O error outside the tape and plan domains.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChaosProxyError {
    /// Returns the process exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Plan(PlanLoadError::UnsupportedJsonPath { .. }) => ExitCode::STRICT_DEP_ERROR,
            Self::Plan(_) => ExitCode::PLAN_ERROR,
            Self::Control(_) => ExitCode::BIND_ERROR,
            Self::Tape(e) => e.exit_code(),
            Self::StrictDependency(_) => ExitCode::STRICT_DEP_ERROR,
            Self::Io(_) => ExitCode::TAPE_ERROR,
        }
    }
}

// ============================================================================
// Plan Errors
// ============================================================================

/// A single validation issue found while checking a chaos plan.
///
/// Plan validation is total: every issue in the document is collected
/// before the load fails, so one reload round-trip surfaces all problems.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Path to the offending field (e.g. `scenarios[2].target_ref`).
    pub path: String,
    /// Description of the problem.
    pub message: String,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Chaos plan loading and validation errors.
///
/// Fatal at startup; non-fatal on reload (the installed plan stays).
#[derive(Debug, Error)]
pub enum PlanLoadError {
    /// Plan file could not be read.
    #[error("cannot read plan {path}: {message}")]
    Read {
        /// Path to the plan file.
        path: PathBuf,
        /// Underlying I/O message.
        message: String,
    },

    /// YAML parsing failed.
    #[error("parse error in {path}: {message}")]
    Parse {
        /// Path to the plan file (or `<inline>` for byte validation).
        path: String,
        /// Parser message, with line info when available.
        message: String,
    },

    /// Schema or cross-reference validation failed.
    #[error("plan validation failed for {path} ({} issue(s))", issues.len())]
    Validation {
        /// Path to the plan file (or `<inline>`).
        path: String,
        /// Every issue found, in document order.
        issues: Vec<ValidationIssue>,
    },

    /// A reloaded plan did not advance the revision counter.
    #[error("plan revision {offered} does not advance installed revision {installed}")]
    RevisionNotMonotonic {
        /// Revision of the currently installed plan.
        installed: u64,
        /// Revision of the rejected plan.
        offered: u64,
    },

    /// Strict classifier mode requires at least one rule pack.
    #[error("classifier strict mode is enabled but the plan has no classifier_rule_packs")]
    MissingRulePacks,

    /// Strict replay mode rejects JSONPath expressions outside the
    /// supported subset instead of falling back to a partial match.
    #[error("unsupported JSONPath '{expr}' at {path} (strict replay mode)")]
    UnsupportedJsonPath {
        /// Location of the expression in the plan.
        path: String,
        /// The offending expression.
        expr: String,
    },
}

// ============================================================================
// Strategy Errors
// ============================================================================

/// Error raised inside a strategy implementation.
///
/// Never propagated to the interceptor: the pipeline records the error code
/// on the flow's event, skips the strategy, and continues.
#[derive(Debug, Error)]
pub enum StrategyError {
    /// Body could not be parsed or re-serialized as JSON.
    #[error("JSON handling failed: {0}")]
    Json(String),

    /// The mutation itself failed part-way.
    #[error("mutation failed: {0}")]
    Mutation(String),

    /// A configured JSONPath is outside the supported subset.
    #[error("unsupported JSONPath expression: {0}")]
    InvalidJsonPath(String),

    /// The suspension was cancelled by the interceptor.
    #[error("suspension cancelled")]
    Cancelled,
}

impl StrategyError {
    /// Stable machine-readable code recorded on the flow event.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Json(_) => "E_STRATEGY_JSON",
            Self::Mutation(_) => "E_MUTATION_FAILED",
            Self::InvalidJsonPath(_) => "E_INVALID_JSONPATH",
            Self::Cancelled => "E_CANCELLED",
        }
    }
}

impl From<serde_json::Error> for StrategyError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

// ============================================================================
// Tape Errors
// ============================================================================

/// Tape storage errors.
///
/// Fatal when the recorder cannot flush in RECORD mode; append failures are
/// buffered and retried at the next flush.
#[derive(Debug, Error)]
pub enum TapeError {
    /// Tape file I/O failed.
    #[error("tape I/O error at {path}: {message}")]
    Io {
        /// Tape file path.
        path: PathBuf,
        /// Underlying I/O message.
        message: String,
    },

    /// Tape payload failed to encrypt or decrypt.
    #[error("tape crypto failure: {0}")]
    Crypto(String),

    /// `CHAOS_TAPE_KEY` is missing or malformed for an encrypted tape.
    #[error("tape key error: {0}")]
    Key(String),

    /// Tape JSON could not be decoded.
    #[error("tape decode error: {0}")]
    Decode(String),
}

impl TapeError {
    const fn exit_code(&self) -> i32 {
        match self {
            Self::Key(_) => ExitCode::STRICT_DEP_ERROR,
            _ => ExitCode::TAPE_ERROR,
        }
    }
}

// ============================================================================
// Control Plane Errors
// ============================================================================

/// Control-plane startup and request errors.
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    /// The listener could not bind.
    #[error("control plane bind failed on {addr}: {message}")]
    Bind {
        /// Requested bind address.
        addr: String,
        /// Underlying message.
        message: String,
    },

    /// Request failed authentication (401 to the caller, counted).
    #[error("unauthorized: {0}")]
    Auth(String),
}

/// Result alias for fallible chaosproxy operations.
pub type Result<T> = std::result::Result<T, ChaosProxyError>;

// ============================================================================
// Tests
// ============================================================================
