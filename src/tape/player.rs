//! Tape player: load once, serve FIFO, never touch the network.
//!
//! All entries are loaded and indexed at construction. Exact matches pop
//! from a per-fingerprint FIFO queue; when the exact index is exhausted a
//! partial index keyed by `(method, normalized_url)` catches requests whose
//! bodies or headers drifted since recording. Anything else synthesizes a
//! 404 documenting the missing fingerprint — a terminal state for the flow.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

use tracing::{debug, info, warn};

use crate::error::TapeError;
use crate::flow::FlowResponse;
use crate::tape::crypto;
use crate::tape::fingerprint::RequestFingerprint;
use crate::tape::model::{Tape, TapeEntry};

/// Consumption state behind a short lock: which entries remain, per index.
#[derive(Debug)]
struct PlayerState {
    exact: HashMap<RequestFingerprint, VecDeque<usize>>,
    partial: HashMap<(String, String), VecDeque<usize>>,
    consumed: Vec<bool>,
}

/// Read-only tape playback.
#[derive(Debug)]
pub struct TapePlayer {
    entries: Vec<TapeEntry>,
    state: Mutex<PlayerState>,
}

impl TapePlayer {
    /// Loads and indexes a tape file.
    ///
    /// # Errors
    ///
    /// Returns [`TapeError`] when the file cannot be read, decrypted, or
    /// decoded.
    pub fn load(path: &Path, key: Option<[u8; 32]>) -> Result<Self, TapeError> {
        let raw = std::fs::read(path).map_err(|e| TapeError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let payload = crypto::open(key.as_ref(), &raw)?;
        let tape: Tape = serde_json::from_slice(&payload)
            .map_err(|e| TapeError::Decode(format!("invalid tape JSON: {e}")))?;

        let player = Self::from_tape(tape);
        info!(
            path = %path.display(),
            entries = player.entries.len(),
            "tape loaded for playback"
        );
        Ok(player)
    }

    /// Builds a player from an in-memory tape (tests, embedding).
    #[must_use]
    pub fn from_tape(tape: Tape) -> Self {
        let entries = tape.entries;
        let mut exact: HashMap<RequestFingerprint, VecDeque<usize>> = HashMap::new();
        let mut partial: HashMap<(String, String), VecDeque<usize>> = HashMap::new();

        for (i, entry) in entries.iter().enumerate() {
            exact
                .entry(entry.fingerprint.clone())
                .or_default()
                .push_back(i);
            partial
                .entry((entry.fingerprint.method.clone(), entry.fingerprint.url.clone()))
                .or_default()
                .push_back(i);
        }

        let consumed = vec![false; entries.len()];
        Self {
            entries,
            state: Mutex::new(PlayerState {
                exact,
                partial,
                consumed,
            }),
        }
    }

    /// Number of entries on the tape.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the tape has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serves the next matching entry for `fingerprint`, FIFO per queue.
    ///
    /// Exact fingerprint match first; `(method, url)` partial match as the
    /// fallback; `None` is a tape miss.
    #[must_use]
    pub fn serve(&self, fingerprint: &RequestFingerprint) -> Option<&TapeEntry> {
        let mut guard = self.state.lock().expect("player lock poisoned");
        let PlayerState {
            exact,
            partial,
            consumed,
        } = &mut *guard;

        if let Some(index) = pop_unconsumed(exact.get_mut(fingerprint), consumed) {
            consumed[index] = true;
            debug!(sequence = self.entries[index].sequence, "exact tape match");
            return Some(&self.entries[index]);
        }

        let key = (fingerprint.method.clone(), fingerprint.url.clone());
        if let Some(index) = pop_unconsumed(partial.get_mut(&key), consumed) {
            consumed[index] = true;
            warn!(
                method = %fingerprint.method,
                url = %fingerprint.url,
                sequence = self.entries[index].sequence,
                "partial tape match (body or headers drifted since recording)"
            );
            return Some(&self.entries[index]);
        }

        warn!(
            method = %fingerprint.method,
            url = %fingerprint.url,
            "tape miss"
        );
        None
    }

    /// Synthesizes the terminal 404 returned on a tape miss.
    #[must_use]
    pub fn synthesize_miss(fingerprint: &RequestFingerprint) -> FlowResponse {
        let body = serde_json::json!({
            "error": "no matching entry in tape",
            "fingerprint": {
                "method": fingerprint.method,
                "url": fingerprint.url,
                "body_hash": fingerprint.body_hash,
                "headers_hash": fingerprint.headers_hash,
            },
        });
        FlowResponse::synthesize(
            404,
            "Not Found",
            "application/json",
            serde_json::to_vec(&body).unwrap_or_default(),
        )
    }
}

/// Pops the first not-yet-consumed index from a queue, skipping indices the
/// other index already served.
fn pop_unconsumed(queue: Option<&mut VecDeque<usize>>, consumed: &[bool]) -> Option<usize> {
    let queue = queue?;
    while let Some(index) = queue.pop_front() {
        if !consumed[index] {
            return Some(index);
        }
    }
    None
}

// ============================================================================
// Tests
// ============================================================================
