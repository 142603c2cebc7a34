//! Control plane: token-guarded operations on a separate port.
//!
//! Routes: `GET /healthz` (always 200), `POST /plan` (validate + install),
//! `POST /mode` (live/record/playback), `GET /scorecard`, and `GET /events`
//! (the SSE dashboard fan-out). Mutating and read endpoints other than
//! `/healthz` require `X-Chaos-Token` (constant-time compare) and, when
//! `CHAOS_JWT_STRICT` is on, a valid HS256 bearer token.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tokio::net::TcpListener;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::audit::AuditLog;
use crate::engine::{ChaosEngine, Mode};
use crate::error::{ChaosProxyError, ControlPlaneError, PlanLoadError};

type HmacSha256 = Hmac<Sha256>;

// ============================================================================
// Auth
// ============================================================================

/// Authentication configuration for the control plane.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// Shared token expected in `X-Chaos-Token`; `None` disables the check.
    pub token: Option<String>,
    /// HS256 secret for strict JWT validation; `None` disables the check.
    pub jwt_secret: Option<String>,
}

impl AuthConfig {
    /// Reads auth configuration from the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ChaosProxyError::StrictDependency`] when `CHAOS_JWT_STRICT`
    /// is enabled without `CHAOS_JWT_SECRET`.
    pub fn from_env() -> Result<Self, ChaosProxyError> {
        let token = std::env::var("CHAOS_CONTROL_TOKEN").ok().filter(|t| !t.is_empty());
        if token.is_none() {
            warn!("CHAOS_CONTROL_TOKEN is not set; control plane accepts unauthenticated requests");
        }

        let jwt_strict = std::env::var("CHAOS_JWT_STRICT")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false);
        let jwt_secret = std::env::var("CHAOS_JWT_SECRET").ok().filter(|s| !s.is_empty());

        if jwt_strict && jwt_secret.is_none() {
            return Err(ChaosProxyError::StrictDependency(
                "CHAOS_JWT_STRICT is enabled but CHAOS_JWT_SECRET is not set".to_string(),
            ));
        }

        Ok(Self {
            token,
            jwt_secret: if jwt_strict { jwt_secret } else { None },
        })
    }

    /// Checks a request's credentials.
    ///
    /// # Errors
    ///
    /// Returns [`ControlPlaneError::Auth`] describing the failed check.
    pub fn authorize(&self, headers: &HeaderMap) -> Result<(), ControlPlaneError> {
        if let Some(expected) = &self.token {
            let presented = headers
                .get("x-chaos-token")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            // Constant-time compare; length differences still reject.
            let matches: bool = presented
                .as_bytes()
                .ct_eq(expected.as_bytes())
                .into();
            if !matches {
                return Err(ControlPlaneError::Auth("bad or missing X-Chaos-Token".to_string()));
            }
        }

        if let Some(secret) = &self.jwt_secret {
            let bearer = headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .ok_or_else(|| ControlPlaneError::Auth("missing bearer token".to_string()))?;
            validate_hs256(bearer, secret)?;
        }

        Ok(())
    }
}

/// Validates an HS256 JWT: signature over `header.payload`, plus `exp` when
/// present.
fn validate_hs256(token: &str, secret: &str) -> Result<(), ControlPlaneError> {
    let auth_err = |m: &str| ControlPlaneError::Auth(m.to_string());
    let b64 = base64::engine::general_purpose::URL_SAFE_NO_PAD;

    let mut parts = token.split('.');
    let (Some(header), Some(payload), Some(signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(auth_err("malformed JWT"));
    };

    let signature = b64
        .decode(signature)
        .map_err(|_| auth_err("bad JWT signature encoding"))?;

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| auth_err("bad JWT secret"))?;
    mac.update(header.as_bytes());
    mac.update(b".");
    mac.update(payload.as_bytes());
    mac.verify_slice(&signature)
        .map_err(|_| auth_err("JWT signature mismatch"))?;

    let payload = b64
        .decode(payload)
        .map_err(|_| auth_err("bad JWT payload encoding"))?;
    let claims: serde_json::Value =
        serde_json::from_slice(&payload).map_err(|_| auth_err("bad JWT payload"))?;
    if let Some(exp) = claims.get("exp").and_then(serde_json::Value::as_i64) {
        if exp <= chrono::Utc::now().timestamp() {
            return Err(auth_err("JWT expired"));
        }
    }

    Ok(())
}

// ============================================================================
// Server
// ============================================================================

/// Shared state for the control-plane handlers.
#[derive(Clone)]
pub struct ControlState {
    /// The engine operated on.
    pub engine: Arc<ChaosEngine>,
    /// Auth configuration.
    pub auth: Arc<AuthConfig>,
    /// Audit sink for auth denials and control actions.
    pub audit: Arc<AuditLog>,
}

/// Builds the control-plane router.
#[must_use]
pub fn router(state: ControlState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/plan", post(install_plan))
        .route("/mode", post(switch_mode))
        .route("/scorecard", get(scorecard))
        .route("/events", get(events))
        .with_state(state)
}

/// Binds the control plane and spawns its serve loop.
///
/// # Errors
///
/// Returns [`ControlPlaneError::Bind`] when the listener cannot bind.
pub async fn serve(
    addr: &str,
    state: ControlState,
    cancel: CancellationToken,
) -> Result<SocketAddr, ControlPlaneError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ControlPlaneError::Bind {
            addr: addr.to_string(),
            message: e.to_string(),
        })?;
    let bound = listener.local_addr().map_err(|e| ControlPlaneError::Bind {
        addr: addr.to_string(),
        message: e.to_string(),
    })?;

    let app = router(state);
    tokio::spawn(async move {
        let shutdown = async move { cancel.cancelled().await };
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            warn!(error = %e, "control plane exited with error");
        }
    });

    info!(%bound, "control plane listening");
    Ok(bound)
}

// ============================================================================
// Handlers
// ============================================================================

fn unauthorized(state: &ControlState, path: &str, reason: &str) -> axum::response::Response {
    metrics::counter!("chaosproxy_control_auth_failures_total").increment(1);
    state.audit.record("anonymous", "AUTH", path, "denied");
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({"error": reason})),
    )
        .into_response()
}

async fn healthz(State(state): State<ControlState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "mode": state.engine.mode().as_str(),
        "plan_revision": state.engine.plan_revision(),
        "uptime_s": state.engine.uptime_s(),
    }))
}

async fn install_plan(
    State(state): State<ControlState>,
    headers: HeaderMap,
    body: String,
) -> axum::response::Response {
    if let Err(e) = state.auth.authorize(&headers) {
        return unauthorized(&state, "/plan", &e.to_string());
    }

    match state.engine.install_plan_bytes(body.as_bytes()) {
        Ok(revision) => Json(serde_json::json!({"installed": true, "revision": revision}))
            .into_response(),
        Err(PlanLoadError::Validation { issues, .. }) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "installed": false,
                "errors": issues.iter().map(ToString::to_string).collect::<Vec<_>>(),
            })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"installed": false, "errors": [e.to_string()]})),
        )
            .into_response(),
    }
}

/// Body of `POST /mode`.
#[derive(Debug, Deserialize)]
struct ModeRequest {
    mode: String,
    #[serde(default)]
    tape_path: Option<String>,
}

async fn switch_mode(
    State(state): State<ControlState>,
    headers: HeaderMap,
    Json(request): Json<ModeRequest>,
) -> axum::response::Response {
    if let Err(e) = state.auth.authorize(&headers) {
        return unauthorized(&state, "/mode", &e.to_string());
    }

    let Some(mode) = Mode::parse(&request.mode) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": format!("unknown mode '{}'", request.mode)})),
        )
            .into_response();
    };

    let tape_path = request.tape_path.as_deref().map(std::path::Path::new);
    match state.engine.set_mode(mode, tape_path) {
        Ok(()) => Json(serde_json::json!({"mode": mode.as_str()})).into_response(),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

async fn scorecard(
    State(state): State<ControlState>,
    headers: HeaderMap,
) -> axum::response::Response {
    if let Err(e) = state.auth.authorize(&headers) {
        return unauthorized(&state, "/scorecard", &e.to_string());
    }
    Json(state.engine.pipeline().scorecard.snapshot()).into_response()
}

async fn events(
    State(state): State<ControlState>,
    headers: HeaderMap,
) -> axum::response::Response {
    if let Err(e) = state.auth.authorize(&headers) {
        return unauthorized(&state, "/events", &e.to_string());
    }

    let rx = state.engine.pipeline().dashboard.subscribe();
    let stream = BroadcastStream::new(rx).map_while(|item| match item {
        Ok(event) => Some(SseEvent::default().json_data(&event)),
        // A lagged subscriber exceeded its buffer: drop the connection.
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            warn!(skipped, "dropping slow dashboard subscriber");
            None
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

// ============================================================================
// Tests
// ============================================================================
