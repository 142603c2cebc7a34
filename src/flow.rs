//! The flow object exchanged with the interception framework.
//!
//! The framework owns one [`Flow`] per intercepted request and hands it to
//! [`crate::engine::ChaosEngine::on_request`] before the upstream leg and to
//! [`crate::engine::ChaosEngine::on_response`] after it. Everything the core
//! decides about a flow (classification, matched strategies, fingerprint,
//! short-circuiting) lives on the flow itself, so no per-flow state is held
//! anywhere else.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use rand::rngs::StdRng;

use crate::classify::{TrafficSubtype, TrafficType};
use crate::plan::CompiledPlan;
use crate::tape::fingerprint::RequestFingerprint;

// ============================================================================
// Request / response halves
// ============================================================================

/// Mutable request half of a flow.
#[derive(Debug, Clone)]
pub struct FlowRequest {
    /// HTTP method as received (any case).
    pub method: String,
    /// Full request URL.
    pub url: String,
    /// Header pairs in wire order.
    pub headers: Vec<(String, String)>,
    /// Raw request body.
    pub body: Bytes,
}

impl FlowRequest {
    /// Builds a request from parts; bodies are copied into [`Bytes`].
    #[must_use]
    pub fn new(method: &str, url: &str, headers: Vec<(String, String)>, body: &[u8]) -> Self {
        Self {
            method: method.to_string(),
            url: url.to_string(),
            headers,
            body: Bytes::copy_from_slice(body),
        }
    }

    /// First header value with the given name, case-insensitive.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Replaces the body and keeps `Content-Length` consistent.
    pub fn set_body(&mut self, body: Vec<u8>) {
        let len = body.len();
        self.body = Bytes::from(body);
        self.set_header("Content-Length", &len.to_string());
    }

    /// Sets or replaces a header, case-insensitive on the name.
    pub fn set_header(&mut self, name: &str, value: &str) {
        if let Some(slot) = self
            .headers
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
        {
            slot.1 = value.to_string();
        } else {
            self.headers.push((name.to_string(), value.to_string()));
        }
    }

    /// Parses the body as JSON, if it is one.
    #[must_use]
    pub fn json_body(&self) -> Option<serde_json::Value> {
        if self.body.is_empty() {
            return None;
        }
        serde_json::from_slice(&self.body).ok()
    }
}

/// Mutable response half of a flow.
#[derive(Debug, Clone)]
pub struct FlowResponse {
    /// HTTP status code.
    pub status: u16,
    /// Reason phrase.
    pub reason: String,
    /// Header pairs in wire order.
    pub headers: Vec<(String, String)>,
    /// Raw response body.
    pub body: Bytes,
}

impl FlowResponse {
    /// First header value with the given name, case-insensitive.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Sets or replaces a header, case-insensitive on the name.
    pub fn set_header(&mut self, name: &str, value: &str) {
        if let Some(slot) = self
            .headers
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
        {
            slot.1 = value.to_string();
        } else {
            self.headers.push((name.to_string(), value.to_string()));
        }
    }

    /// Replaces the body and keeps `Content-Length` consistent.
    pub fn set_body(&mut self, body: Vec<u8>) {
        let len = body.len();
        self.body = Bytes::from(body);
        self.set_header("Content-Length", &len.to_string());
    }

    /// Parses the body as JSON, if it is one.
    #[must_use]
    pub fn json_body(&self) -> Option<serde_json::Value> {
        if self.body.is_empty() {
            return None;
        }
        serde_json::from_slice(&self.body).ok()
    }

    /// Builds a synthesized response the interceptor returns verbatim.
    #[must_use]
    pub fn synthesize(status: u16, reason: &str, content_type: &str, body: Vec<u8>) -> Self {
        let len = body.len();
        Self {
            status,
            reason: reason.to_string(),
            headers: vec![
                ("Content-Type".to_string(), content_type.to_string()),
                ("Content-Length".to_string(), len.to_string()),
            ],
            body: Bytes::from(body),
        }
    }
}

// ============================================================================
// Metadata
// ============================================================================

/// Classification and chaos bookkeeping attached to a flow.
#[derive(Debug, Clone)]
pub struct FlowMetadata {
    /// Classified traffic type; written once, immutable afterwards.
    pub traffic_type: TrafficType,
    /// Classified traffic subtype.
    pub traffic_subtype: TrafficSubtype,
    /// Agent role, when extractable (header first, body second).
    pub agent_role: Option<String>,
    /// Names of strategies applied to this flow, in application order.
    pub applied_strategies: Vec<String>,
    /// Whether any strategy mutated the flow.
    pub chaos_applied: bool,
    /// Request fingerprint, computed before matching.
    pub fingerprint: Option<RequestFingerprint>,
    /// Global flow sequence number.
    pub sequence: u64,
    /// Set when a strategy synthesized the response; the interceptor must
    /// skip the upstream leg.
    pub short_circuit: bool,
    /// Set when a suspension was cancelled mid-delay.
    pub cancelled: bool,
    /// Error codes recorded by failed strategies (flow continued).
    pub error_codes: Vec<&'static str>,
    /// Attack tags for scorecard accounting: the kind of each applied
    /// strategy, plus refined tags like `swarm:agent_isolation`.
    pub attack_tags: Vec<&'static str>,
}

impl Default for FlowMetadata {
    fn default() -> Self {
        Self {
            traffic_type: TrafficType::Unknown,
            traffic_subtype: TrafficSubtype::None,
            agent_role: None,
            applied_strategies: Vec::new(),
            chaos_applied: false,
            fingerprint: None,
            sequence: 0,
            short_circuit: false,
            cancelled: false,
            error_codes: Vec::new(),
            attack_tags: Vec::new(),
        }
    }
}

impl FlowMetadata {
    /// Records a strategy application, once per strategy name.
    pub fn record_applied(&mut self, name: &str) {
        if !self.applied_strategies.iter().any(|s| s == name) {
            self.applied_strategies.push(name.to_string());
        }
        self.chaos_applied = true;
    }
}

/// Per-flow engine state threaded between the request and response hooks.
///
/// Kept opaque to the interceptor; the engine is its only reader.
#[derive(Default)]
pub struct ChaosState {
    /// Plan snapshot taken at request time.
    pub(crate) plan: Option<Arc<CompiledPlan>>,
    /// Indices into the snapshot's scenario list, in plan order.
    pub(crate) matched: Vec<usize>,
    /// Deterministic per-flow RNG (seeded from the fingerprint).
    pub(crate) rng: Option<StdRng>,
    /// Request-hook entry time, for latency accounting.
    pub(crate) started: Option<Instant>,
    /// Set when the flow was served from the tape in the request hook.
    pub(crate) played_back: bool,
}

impl std::fmt::Debug for ChaosState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChaosState")
            .field("matched", &self.matched)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Flow
// ============================================================================

/// One intercepted request/response exchange.
#[derive(Debug)]
pub struct Flow {
    /// The outbound request (mutable until forwarded).
    pub request: FlowRequest,
    /// The response, once received or synthesized.
    pub response: Option<FlowResponse>,
    /// Classification and chaos bookkeeping.
    pub metadata: FlowMetadata,
    /// Engine-internal per-flow state.
    pub(crate) chaos: ChaosState,
}

impl Flow {
    /// Creates a flow around a request.
    #[must_use]
    pub fn new(request: FlowRequest) -> Self {
        Self {
            request,
            response: None,
            metadata: FlowMetadata::default(),
            chaos: ChaosState::default(),
        }
    }
}
