//! Deterministic request fingerprinting.
//!
//! A fingerprint is the 4-tuple `(method, normalized_url, body_hash,
//! stable_headers_hash)`. Normalization strips volatile query parameters,
//! masks volatile JSON body paths to a sentinel, and excludes volatile
//! headers, so the same logical request hashes identically at record and
//! replay time.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::flow::FlowRequest;
use crate::jsonpath::JsonPath;

/// Headers excluded from `stable_headers_hash`.
pub const VOLATILE_HEADERS: &[&str] = &[
    "date",
    "if-modified-since",
    "if-none-match",
    "x-request-id",
    "x-correlation-id",
    "user-agent",
    "authorization",
];

/// Sentinel written over masked body fields before hashing.
pub const MASK_SENTINEL: &str = "<ignored>";

/// Hex-encodes a SHA-256 digest of `data`.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    let mut s = String::with_capacity(64);
    for byte in digest {
        s.push_str(&format!("{byte:02x}"));
    }
    s
}

/// Masking configuration borrowed from the compiled plan.
#[derive(Debug, Clone, Copy, Default)]
pub struct Normalization<'a> {
    /// JSONPath masks applied to JSON request bodies.
    pub ignore_paths: &'a [JsonPath],
    /// Query parameter names removed before hashing (case-insensitive).
    pub ignore_params: &'a [String],
}

/// Deterministic identifier for a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestFingerprint {
    /// Lowercased HTTP method.
    pub method: String,
    /// Normalized URL (sorted query, ignored params removed).
    pub url: String,
    /// SHA-256 hex of the (masked) body; hash of the empty string when
    /// there is no body.
    pub body_hash: String,
    /// SHA-256 hex over the stable header set.
    pub headers_hash: String,
}

impl RequestFingerprint {
    /// Computes the fingerprint of a request under the given normalization.
    #[must_use]
    pub fn compute(request: &FlowRequest, norm: Normalization<'_>) -> Self {
        Self {
            method: request.method.to_ascii_lowercase(),
            url: normalize_url(&request.url, norm.ignore_params),
            body_hash: body_hash(&request.body, norm.ignore_paths),
            headers_hash: stable_headers_hash(&request.headers),
        }
    }

    /// Canonical byte string fed to the per-flow seed HMAC.
    #[must_use]
    pub fn seed_material(&self) -> String {
        format!(
            "{}\n{}\n{}\n{}",
            self.method, self.url, self.body_hash, self.headers_hash
        )
    }
}

/// Sorts the query string and drops ignored parameters.
///
/// The URL is treated as `prefix ? query [# fragment]`; the fragment is
/// dropped (it never reaches the server) and blank values are kept.
fn normalize_url(url: &str, ignore_params: &[String]) -> String {
    let without_fragment = url.split('#').next().unwrap_or(url);
    let Some((prefix, query)) = without_fragment.split_once('?') else {
        return without_fragment.to_string();
    };
    if query.is_empty() {
        return prefix.to_string();
    }

    let mut pairs: Vec<(&str, Option<&str>)> = query
        .split('&')
        .filter(|p| !p.is_empty())
        .map(|p| match p.split_once('=') {
            Some((k, v)) => (k, Some(v)),
            None => (p, None),
        })
        .filter(|(k, _)| {
            !ignore_params
                .iter()
                .any(|ignored| ignored.eq_ignore_ascii_case(k))
        })
        .collect();

    if pairs.is_empty() {
        return prefix.to_string();
    }

    pairs.sort_unstable();
    let query: Vec<String> = pairs
        .iter()
        .map(|(k, v)| match v {
            Some(v) => format!("{k}={v}"),
            None => (*k).to_string(),
        })
        .collect();
    format!("{prefix}?{}", query.join("&"))
}

/// Hashes the body, masking ignored JSON paths first.
///
/// Masking re-serializes through `serde_json`, whose map keys are ordered,
/// so the masked form is canonical. Non-JSON bodies hash as raw bytes.
fn body_hash(body: &[u8], ignore_paths: &[JsonPath]) -> String {
    if body.is_empty() {
        return sha256_hex(b"");
    }
    if !ignore_paths.is_empty() {
        if let Ok(mut value) = serde_json::from_slice::<serde_json::Value>(body) {
            let mut masked = 0usize;
            for path in ignore_paths {
                masked += path.for_each_mut(&mut value, |v| {
                    *v = serde_json::Value::String(MASK_SENTINEL.to_string());
                });
            }
            if masked > 0 {
                if let Ok(canonical) = serde_json::to_vec(&value) {
                    return sha256_hex(&canonical);
                }
            }
        }
    }
    sha256_hex(body)
}

/// Hashes the stable header set: `k:v` lines, keys lowercased and sorted,
/// volatile headers excluded.
fn stable_headers_hash(headers: &[(String, String)]) -> String {
    let mut lines: Vec<String> = headers
        .iter()
        .filter(|(k, _)| {
            let lower = k.to_ascii_lowercase();
            !VOLATILE_HEADERS.contains(&lower.as_str())
        })
        .map(|(k, v)| format!("{}:{v}", k.to_ascii_lowercase()))
        .collect();
    lines.sort_unstable();
    sha256_hex(lines.join("\n").as_bytes())
}

// ============================================================================
// Tests
// ============================================================================
