//! JSONL event log sink.
//!
//! One JSON object per line, append-only, flushed per event so external
//! scorecard tooling can tail the file live. Serialization or I/O failures
//! are dropped — observability never takes down the data path.

use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::events::Event;

/// Thread-safe JSONL writer for events.
pub struct EventLogSink {
    writer: Mutex<BufWriter<Box<dyn Write + Send>>>,
    #[cfg(test)]
    buffer: Option<Arc<Mutex<Vec<u8>>>>,
}

impl std::fmt::Debug for EventLogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLogSink").finish_non_exhaustive()
    }
}

impl EventLogSink {
    /// Creates a sink over an arbitrary writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
            #[cfg(test)]
            buffer: None,
        }
    }

    /// Opens (or creates) the sink file at `path` in append mode.
    ///
    /// # Errors
    ///
    /// Returns the I/O error when the file cannot be opened.
    pub fn at_path(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self::new(Box::new(file)))
    }

    /// A sink that discards every event.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(Box::new(std::io::sink()))
    }

    /// An in-memory sink capturing output for tests.
    #[cfg(test)]
    #[must_use]
    pub fn to_vec() -> Self {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let writer = SharedVec(Arc::clone(&buffer));
        Self {
            writer: Mutex::new(BufWriter::new(Box::new(writer))),
            buffer: Some(buffer),
        }
    }

    /// Captured output, for tests built with [`Self::to_vec`].
    #[cfg(test)]
    #[must_use]
    pub fn contents(&self) -> String {
        // Flush buffered bytes into the shared vec first.
        self.flush();
        self.buffer.as_ref().map_or_else(String::new, |buffer| {
            String::from_utf8_lossy(&buffer.lock().unwrap()).into_owned()
        })
    }

    /// Writes one event as a JSON line.
    pub fn write(&self, event: &Event) {
        let Ok(line) = serde_json::to_string(event) else {
            warn!(seq = event.seq, "failed to serialize event; dropping");
            return;
        };
        if let Ok(mut w) = self.writer.lock() {
            let _ = writeln!(w, "{line}");
            let _ = w.flush();
        }
    }

    /// Flushes buffered output.
    pub fn flush(&self) {
        if let Ok(mut w) = self.writer.lock() {
            let _ = w.flush();
        }
    }
}

#[cfg(test)]
struct SharedVec(Arc<Mutex<Vec<u8>>>);

#[cfg(test)]
impl Write for SharedVec {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
