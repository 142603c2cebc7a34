//! Tape recorder: single-writer, in-memory append, flush at shutdown.
//!
//! Appends serialize on the recorder's lock; sequence numbers come from the
//! engine's global counter so tape entries and events share one ordering.
//! Recorded response headers and text bodies pass through the PII redactor
//! before they can reach disk. Failed flushes keep the buffer intact so a
//! retry can succeed.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::error::TapeError;
use crate::redact::Redactor;
use crate::tape::crypto;
use crate::tape::fingerprint::RequestFingerprint;
use crate::tape::model::{ChaosContext, ResponseSnapshot, Tape, TapeEntry};

/// Records request/response pairs into an in-memory tape.
pub struct TapeRecorder {
    path: PathBuf,
    tape: Mutex<Tape>,
    key: Option<[u8; 32]>,
    redactor: Arc<Redactor>,
}

impl std::fmt::Debug for TapeRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TapeRecorder")
            .field("path", &self.path)
            .field("encrypted", &self.key.is_some())
            .finish_non_exhaustive()
    }
}

impl TapeRecorder {
    /// Creates a recorder that will flush to `path`.
    ///
    /// `key` enables at-rest encryption (normally from `CHAOS_TAPE_KEY`).
    #[must_use]
    pub fn new(path: &Path, key: Option<[u8; 32]>, redactor: Arc<Redactor>) -> Self {
        info!(path = %path.display(), encrypted = key.is_some(), "tape recorder opened");
        Self {
            path: path.to_path_buf(),
            tape: Mutex::new(Tape::new()),
            key,
            redactor,
        }
    }

    /// Appends one entry.
    ///
    /// `sequence` comes from the engine's global atomic counter; entries are
    /// appended in response order, which is what playback FIFO consumption
    /// relies on.
    pub fn record(
        &self,
        fingerprint: RequestFingerprint,
        mut response: ResponseSnapshot,
        chaos_context: ChaosContext,
        sequence: u64,
    ) {
        response.headers = self.redactor.redact_headers(&response.headers);
        if is_text_like(&response) {
            if let Ok(text) = std::str::from_utf8(&response.body) {
                let (redacted, hits) = self.redactor.redact_counting(text);
                if hits > 0 {
                    response.body = redacted.into_bytes();
                }
            }
        }

        let entry = TapeEntry {
            fingerprint,
            response,
            chaos_context,
            timestamp: chrono::Utc::now().to_rfc3339(),
            sequence,
        };

        let mut tape = self.tape.lock().expect("tape lock poisoned");
        tape.entries.push(entry);
        debug!(sequence, entries = tape.entries.len(), "tape entry recorded");
    }

    /// Number of buffered entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tape.lock().expect("tape lock poisoned").entries.len()
    }

    /// Whether the tape is still empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flushes the tape to disk as a single JSON document.
    ///
    /// Writes to a temporary sibling first, then renames into place, so a
    /// crashed flush never leaves a half-written tape. The in-memory buffer
    /// is kept either way; flushing twice is safe.
    ///
    /// # Errors
    ///
    /// Returns [`TapeError`] on serialization, encryption, or I/O failure.
    /// Fatal in RECORD mode at shutdown; callers may retry.
    pub fn flush(&self) -> Result<(), TapeError> {
        let payload = {
            let tape = self.tape.lock().expect("tape lock poisoned");
            serde_json::to_vec_pretty(&*tape)
                .map_err(|e| TapeError::Decode(format!("serialize failed: {e}")))?
        };

        let bytes = match &self.key {
            Some(key) => crypto::encrypt(key, &payload)?,
            None => payload,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| TapeError::Io {
                    path: self.path.clone(),
                    message: e.to_string(),
                })?;
            }
        }

        let tmp = self.path.with_extension("tape.tmp");
        std::fs::write(&tmp, &bytes).map_err(|e| TapeError::Io {
            path: tmp.clone(),
            message: e.to_string(),
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|e| TapeError::Io {
            path: self.path.clone(),
            message: e.to_string(),
        })?;

        info!(path = %self.path.display(), entries = self.len(), "tape flushed");
        Ok(())
    }

    /// Tape file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn is_text_like(response: &ResponseSnapshot) -> bool {
    response
        .headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
        .map(|(_, v)| v.to_ascii_lowercase())
        .is_some_and(|ct| {
            ct.contains("json")
                || ct.starts_with("text/")
                || ct.contains("xml")
                || ct.contains("x-www-form-urlencoded")
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fingerprint(n: u8) -> RequestFingerprint {
        RequestFingerprint {
            method: "post".to_string(),
            url: format!("http://x/{n}"),
            body_hash: "b".to_string(),
            headers_hash: "h".to_string(),
        }
    }

    fn snapshot(body: &[u8]) -> ResponseSnapshot {
        ResponseSnapshot {
            status: 200,
            reason: "OK".to_string(),
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: body.to_vec(),
            content_encoding: None,
        }
    }

    fn recorder(dir: &Path) -> TapeRecorder {
        TapeRecorder::new(
            &dir.join("session.tape"),
            None,
            Arc::new(Redactor::new(true)),
        )
    }

    #[test]
    fn records_in_order_and_flushes() {
        let dir = tempdir().unwrap();
        let rec = recorder(dir.path());
        rec.record(fingerprint(1), snapshot(b"{}"), ChaosContext::default(), 0);
        rec.record(fingerprint(2), snapshot(b"{}"), ChaosContext::default(), 1);
        assert_eq!(rec.len(), 2);
        rec.flush().unwrap();

        let raw = std::fs::read(rec.path()).unwrap();
        let tape: Tape = serde_json::from_slice(&raw).unwrap();
        assert_eq!(tape.entries.len(), 2);
        assert_eq!(tape.entries[0].sequence, 0);
        assert_eq!(tape.entries[1].sequence, 1);
    }

    #[test]
    fn recorded_bodies_are_redacted() {
        let dir = tempdir().unwrap();
        let rec = recorder(dir.path());
        rec.record(
            fingerprint(1),
            snapshot(br#"{"owner":"alice@example.com"}"#),
            ChaosContext::default(),
            0,
        );
        rec.flush().unwrap();
        let content = std::fs::read_to_string(rec.path()).unwrap();
        let tape: Tape = serde_json::from_str(&content).unwrap();
        let body = String::from_utf8(tape.entries[0].response.body.clone()).unwrap();
        assert!(body.contains("<email>"));
        assert!(!body.contains("alice@example.com"));
    }

    #[test]
    fn encrypted_flush_round_trips() {
        let dir = tempdir().unwrap();
        let key = crypto::key_from_str("secret");
        let rec = TapeRecorder::new(
            &dir.path().join("enc.tape"),
            Some(key),
            Arc::new(Redactor::new(true)),
        );
        rec.record(fingerprint(1), snapshot(b"{}"), ChaosContext::default(), 0);
        rec.flush().unwrap();

        let raw = std::fs::read(rec.path()).unwrap();
        assert!(raw.starts_with(crypto::MAGIC));
        let opened = crypto::open(Some(&key), &raw).unwrap();
        let tape: Tape = serde_json::from_slice(&opened).unwrap();
        assert_eq!(tape.entries.len(), 1);
    }

    #[test]
    fn flush_is_repeatable() {
        let dir = tempdir().unwrap();
        let rec = recorder(dir.path());
        rec.record(fingerprint(1), snapshot(b"{}"), ChaosContext::default(), 0);
        rec.flush().unwrap();
        rec.record(fingerprint(2), snapshot(b"{}"), ChaosContext::default(), 1);
        rec.flush().unwrap();

        let raw = std::fs::read(rec.path()).unwrap();
        let tape: Tape = serde_json::from_slice(&raw).unwrap();
        assert_eq!(tape.entries.len(), 2);
    }
}
