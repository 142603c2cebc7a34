//! Tape file format: one JSON document per tape.
//!
//! Response bodies are hex-encoded so tapes stay valid JSON regardless of
//! payload content. The chaos context carried by each entry is what makes
//! replay deterministic: classification and applied-strategy metadata are
//! restored from the tape, not recomputed.

use serde::{Deserialize, Serialize};

use crate::flow::FlowResponse;
use crate::tape::fingerprint::RequestFingerprint;

/// Current tape format version.
pub const TAPE_VERSION: &str = "1.0";

/// Recorder identifier stamped into tape metadata.
pub const RECORDER_VERSION: &str = concat!("chaosproxy/", env!("CARGO_PKG_VERSION"));

// ============================================================================
// Hex body codec
// ============================================================================

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = String::with_capacity(bytes.len() * 2);
        for byte in bytes {
            s.push_str(&format!("{byte:02x}"));
        }
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s.len() % 2 != 0 {
            return Err(serde::de::Error::custom("odd-length hex body"));
        }
        (0..s.len())
            .step_by(2)
            .map(|i| {
                u8::from_str_radix(&s[i..i + 2], 16)
                    .map_err(|e| serde::de::Error::custom(format!("bad hex body: {e}")))
            })
            .collect()
    }
}

// ============================================================================
// Entries
// ============================================================================

/// Snapshot of a response, sufficient to reconstruct it byte-for-byte.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseSnapshot {
    /// HTTP status code.
    pub status: u16,
    /// Reason phrase.
    pub reason: String,
    /// Response headers in wire order.
    pub headers: Vec<(String, String)>,
    /// Response body (hex in the file).
    #[serde(with = "hex_bytes")]
    pub body: Vec<u8>,
    /// `Content-Encoding` at record time, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_encoding: Option<String>,
}

impl ResponseSnapshot {
    /// Captures a snapshot from a flow response.
    #[must_use]
    pub fn capture(response: &FlowResponse) -> Self {
        Self {
            status: response.status,
            reason: response.reason.clone(),
            headers: response.headers.clone(),
            body: response.body.to_vec(),
            content_encoding: response.header("Content-Encoding").map(str::to_string),
        }
    }

    /// Reconstructs the response for playback.
    #[must_use]
    pub fn restore(&self) -> FlowResponse {
        let mut response = FlowResponse {
            status: self.status,
            reason: self.reason.clone(),
            headers: self.headers.clone(),
            body: bytes::Bytes::from(self.body.clone()),
        };
        if let Some(encoding) = &self.content_encoding {
            response.set_header("Content-Encoding", encoding);
        }
        response
    }
}

/// Chaos metadata recorded alongside each response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChaosContext {
    /// Strategy names applied to the recorded flow, in order.
    #[serde(default)]
    pub applied_strategies: Vec<String>,
    /// Whether any strategy mutated the recorded flow.
    #[serde(default)]
    pub chaos_applied: bool,
    /// Traffic type wire name at record time.
    #[serde(default)]
    pub traffic_type: Option<String>,
    /// Traffic subtype wire name at record time.
    #[serde(default)]
    pub traffic_subtype: Option<String>,
    /// Agent role at record time.
    #[serde(default)]
    pub agent_role: Option<String>,
}

/// One request/response pair in a tape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TapeEntry {
    /// Fingerprint of the recorded request.
    pub fingerprint: RequestFingerprint,
    /// Recorded response.
    pub response: ResponseSnapshot,
    /// Chaos metadata for deterministic replay.
    pub chaos_context: ChaosContext,
    /// RFC 3339 record timestamp.
    pub timestamp: String,
    /// Global sequence number at record time (strictly increasing).
    pub sequence: u64,
}

/// Tape metadata header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TapeMetadata {
    /// When recording started.
    pub created_at: String,
    /// Recorder build that produced the tape.
    pub recorder_version: String,
}

/// A complete recorded session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tape {
    /// Tape format version.
    pub version: String,
    /// Recording metadata.
    pub metadata: TapeMetadata,
    /// Entries in record order.
    pub entries: Vec<TapeEntry>,
}

impl Tape {
    /// Creates an empty tape stamped with the current time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: TAPE_VERSION.to_string(),
            metadata: TapeMetadata {
                created_at: chrono::Utc::now().to_rfc3339(),
                recorder_version: RECORDER_VERSION.to_string(),
            },
            entries: Vec::new(),
        }
    }
}

impl Default for Tape {
    fn default() -> Self {
        Self::new()
    }
}
