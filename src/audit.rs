//! Append-only audit log for control-plane actions.
//!
//! Records plan loads and reloads, strategy enable/disable diffs, mode
//! switches, and auth denials as one JSON object per line at the path given
//! by `CHAOS_AUDIT_LOG`. Disabled (and free) when the variable is unset.
//! Write failures are dropped; auditing must never take down the data path.

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;
use tracing::warn;

use crate::redact::Redactor;

/// One audit record.
#[derive(Debug, Serialize)]
struct AuditRecord<'a> {
    t: String,
    actor: &'a str,
    action: &'a str,
    resource: &'a str,
    outcome: &'a str,
}

/// Audit sink shared by the control plane and the engine.
pub struct AuditLog {
    writer: Option<Mutex<BufWriter<std::fs::File>>>,
    redactor: Arc<Redactor>,
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("enabled", &self.writer.is_some())
            .finish_non_exhaustive()
    }
}

impl AuditLog {
    /// Opens the audit log at `path` in append mode.
    ///
    /// On open failure the log degrades to disabled with a warning.
    #[must_use]
    pub fn at_path(path: &Path, redactor: Arc<Redactor>) -> Self {
        let writer = match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Some(Mutex::new(BufWriter::new(file))),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "audit log disabled: cannot open sink");
                None
            }
        };
        Self { writer, redactor }
    }

    /// Builds the sink from `CHAOS_AUDIT_LOG`; unset means disabled.
    #[must_use]
    pub fn from_env(redactor: Arc<Redactor>) -> Self {
        match std::env::var("CHAOS_AUDIT_LOG") {
            Ok(path) if !path.is_empty() => Self::at_path(Path::new(&path), redactor),
            _ => Self::disabled(redactor),
        }
    }

    /// A sink that drops every record.
    #[must_use]
    pub const fn disabled(redactor: Arc<Redactor>) -> Self {
        Self {
            writer: None,
            redactor,
        }
    }

    /// Whether records are being persisted.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.writer.is_some()
    }

    /// Appends one record; all fields pass through the redactor.
    pub fn record(&self, actor: &str, action: &str, resource: &str, outcome: &str) {
        let Some(writer) = &self.writer else {
            return;
        };

        let record = AuditRecord {
            t: Utc::now().to_rfc3339(),
            actor: &self.redactor.redact(actor),
            action,
            resource: &self.redactor.redact(resource),
            outcome,
        };

        if let Ok(mut w) = writer.lock() {
            if let Ok(line) = serde_json::to_string(&record) {
                let _ = writeln!(w, "{line}");
                let _ = w.flush();
            }
        }
    }
}
