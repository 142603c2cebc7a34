//! Control-plane HTTP surface: health, auth, plan reload, mode, scorecard.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;

use chaosproxy::control::{self, AuthConfig, ControlState};
use chaosproxy::engine::Mode;
use chaosproxy::redact::Redactor;
use tokio_util::sync::CancellationToken;

use common::{flow, json_response, Harness};

const PLAN: &str = r"
revision: 1
metadata:
  experiment_id: cp-1
targets:
  - name: api
    type: http_endpoint
    pattern: '.*'
scenarios:
  - name: latency
    type: latency
    target_ref: api
    params:
      delay: 0.0
";

async fn start(harness: &Harness, token: Option<&str>) -> (SocketAddr, CancellationToken) {
    let cancel = CancellationToken::new();
    let state = ControlState {
        engine: Arc::clone(&harness.engine),
        auth: Arc::new(AuthConfig {
            token: token.map(str::to_string),
            jwt_secret: None,
        }),
        audit: Arc::new(chaosproxy::audit::AuditLog::disabled(Arc::new(
            Redactor::new(true),
        ))),
    };
    let addr = control::serve("127.0.0.1:0", state, cancel.clone())
        .await
        .expect("control plane should bind");
    (addr, cancel)
}

#[tokio::test]
async fn healthz_reports_mode_and_revision_without_auth() {
    let harness = Harness::new(PLAN, Mode::Live, None);
    let (addr, cancel) = start(&harness, Some("tok")).await;

    let body: serde_json::Value = reqwest::get(format!("http://{addr}/healthz"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["mode"], "live");
    assert_eq!(body["plan_revision"], 1);
    assert!(body["uptime_s"].is_u64());

    cancel.cancel();
    harness.finish().await;
}

#[tokio::test]
async fn token_is_required_and_constant_time_checked() {
    let harness = Harness::new(PLAN, Mode::Live, None);
    let (addr, cancel) = start(&harness, Some("s3cret")).await;
    let client = reqwest::Client::new();

    let denied = client
        .get(format!("http://{addr}/scorecard"))
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status(), 401);

    let wrong = client
        .get(format!("http://{addr}/scorecard"))
        .header("X-Chaos-Token", "guess")
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), 401);

    let allowed = client
        .get(format!("http://{addr}/scorecard"))
        .header("X-Chaos-Token", "s3cret")
        .send()
        .await
        .unwrap();
    assert_eq!(allowed.status(), 200);

    cancel.cancel();
    harness.finish().await;
}

#[tokio::test]
async fn plan_install_validates_and_advances_revision() {
    let harness = Harness::new(PLAN, Mode::Live, None);
    let (addr, cancel) = start(&harness, None).await;
    let client = reqwest::Client::new();

    // Same revision: rejected, plan unchanged.
    let stale = client
        .post(format!("http://{addr}/plan"))
        .body(PLAN.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(stale.status(), 400);
    assert_eq!(harness.engine.plan_revision(), 1);

    // Broken plan: all issues reported.
    let broken = client
        .post(format!("http://{addr}/plan"))
        .body("revision: 2\nscenarios:\n  - name: s\n    type: nope\n    target_ref: gone\n")
        .send()
        .await
        .unwrap();
    assert_eq!(broken.status(), 400);
    let body: serde_json::Value = broken.json().await.unwrap();
    assert!(body["errors"].as_array().unwrap().len() >= 2);

    // Valid higher revision: installed.
    let updated = PLAN.replace("revision: 1", "revision: 2");
    let ok = client
        .post(format!("http://{addr}/plan"))
        .body(updated)
        .send()
        .await
        .unwrap();
    assert_eq!(ok.status(), 200);
    assert_eq!(harness.engine.plan_revision(), 2);

    cancel.cancel();
    harness.finish().await;
}

#[tokio::test]
async fn mode_switch_requires_tape_for_playback() {
    let harness = Harness::new(PLAN, Mode::Live, None);
    let (addr, cancel) = start(&harness, None).await;
    let client = reqwest::Client::new();

    let refused = client
        .post(format!("http://{addr}/mode"))
        .json(&serde_json::json!({"mode": "playback"}))
        .send()
        .await
        .unwrap();
    assert_eq!(refused.status(), 400);
    assert_eq!(harness.engine.mode(), Mode::Live);

    let unknown = client
        .post(format!("http://{addr}/mode"))
        .json(&serde_json::json!({"mode": "turbo"}))
        .send()
        .await
        .unwrap();
    assert_eq!(unknown.status(), 400);

    cancel.cancel();
    harness.finish().await;
}

#[tokio::test]
async fn scorecard_reflects_processed_flows() {
    let harness = Harness::new(PLAN, Mode::Live, None);

    for _ in 0..3 {
        harness
            .run_flow(flow("GET", "http://api/x", &[], b""), |_| {
                json_response(b"{}")
            })
            .await;
    }
    // Let the pump drain.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let (addr, cancel) = start(&harness, None).await;
    let body: serde_json::Value = reqwest::get(format!("http://{addr}/scorecard"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["total_requests"], 3);
    assert_eq!(body["chaos_injections"], 3);

    cancel.cancel();
    harness.finish().await;
}
