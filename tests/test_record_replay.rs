//! Record → playback determinism.

mod common;

use chaosproxy::engine::Mode;
use chaosproxy::flow::FlowResponse;
use common::{flow, json_response, Harness};

const PLAN: &str = r"
metadata:
  experiment_id: rr-1
targets:
  - name: api
    type: http_endpoint
    pattern: 'http://api/.*'
scenarios:
  - name: hallucination
    type: hallucination
    target_ref: api
    probability: 1.0
    params:
      mode: invert_numbers
";

fn requests() -> Vec<(&'static str, &'static str, &'static [u8])> {
    vec![
        ("POST", "http://api/search_flights", br#"{"q":"rome"}"#),
        ("POST", "http://api/search_flights", br#"{"q":"paris"}"#),
        ("POST", "http://api/book_ticket", br#"{"flight_id":"F1"}"#),
    ]
}

#[tokio::test]
async fn playback_reproduces_recorded_bytes_and_strategies() {
    let dir = tempfile::tempdir().unwrap();
    let tape_path = dir.path().join("session.tape");

    // --- RECORD ---
    let recorder = Harness::new(PLAN, Mode::Record, Some(&tape_path));
    let mut recorded: Vec<(Vec<u8>, Vec<String>)> = Vec::new();
    for (method, url, body) in requests() {
        let done = recorder
            .run_flow(flow(method, url, &[], body), |f| {
                // Upstream echoes a numeric payload derived from the URL.
                let n = f.request.url.len() as i64;
                json_response(format!(r#"{{"result": {n}}}"#).as_bytes())
            })
            .await;
        let response = done.response.as_ref().unwrap();
        recorded.push((
            response.body.to_vec(),
            done.metadata.applied_strategies.clone(),
        ));
        // The hallucination strategy inverted the upstream number.
        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert!(body["result"].as_i64().unwrap() < 0);
    }
    recorder.engine.shutdown().unwrap();
    recorder.finish().await;
    assert!(tape_path.exists());

    // --- PLAYBACK ---
    let player = Harness::new(PLAN, Mode::Playback, Some(&tape_path));
    for ((method, url, body), (expected_body, expected_strategies)) in
        requests().into_iter().zip(recorded)
    {
        let done = player
            .run_flow(flow(method, url, &[], body), |_| {
                panic!("playback must not reach upstream")
            })
            .await;
        let response = done.response.as_ref().unwrap();
        assert_eq!(response.body.to_vec(), expected_body);
        assert_eq!(done.metadata.applied_strategies, expected_strategies);
        assert!(done.metadata.chaos_applied);
    }
    player.finish().await;
}

#[tokio::test]
async fn empty_tape_serves_404_for_everything() {
    let dir = tempfile::tempdir().unwrap();
    let tape_path = dir.path().join("empty.tape");

    // Record nothing, flush an empty tape.
    let recorder = Harness::new(PLAN, Mode::Record, Some(&tape_path));
    recorder.engine.shutdown().unwrap();
    recorder.finish().await;

    let player = Harness::new(PLAN, Mode::Playback, Some(&tape_path));
    let done = player
        .run_flow(flow("GET", "http://api/anything", &[], b""), |_| {
            panic!("no upstream in playback")
        })
        .await;
    let response = done.response.as_ref().unwrap();
    assert_eq!(response.status, 404);
    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert!(body["fingerprint"]["url"]
        .as_str()
        .unwrap()
        .contains("http://api/anything"));
    player.finish().await;
}

#[tokio::test]
async fn duplicate_fingerprints_replay_fifo() {
    let dir = tempfile::tempdir().unwrap();
    let tape_path = dir.path().join("dup.tape");

    let recorder = Harness::new(PLAN, Mode::Record, Some(&tape_path));
    for n in [1i64, 2] {
        recorder
            .run_flow(flow("GET", "http://api/poll", &[], b""), move |_| {
                json_response(format!(r#"{{"tick": {n}}}"#).as_bytes())
            })
            .await;
    }
    recorder.engine.shutdown().unwrap();
    recorder.finish().await;

    let player = Harness::new(PLAN, Mode::Playback, Some(&tape_path));
    let mut ticks = Vec::new();
    for _ in 0..2 {
        let done = player
            .run_flow(flow("GET", "http://api/poll", &[], b""), |_| {
                panic!("no upstream")
            })
            .await;
        let body: serde_json::Value =
            serde_json::from_slice(&done.response.as_ref().unwrap().body).unwrap();
        ticks.push(body["tick"].as_i64().unwrap());
    }
    // Recorded responses were inverted to -1, -2; playback preserves order.
    assert_eq!(ticks, vec![-1, -2]);

    // Third identical request exhausts the queue.
    let done = player
        .run_flow(flow("GET", "http://api/poll", &[], b""), |_| {
            panic!("no upstream")
        })
        .await;
    assert_eq!(done.response.as_ref().unwrap().status, 404);
    player.finish().await;
}

#[tokio::test]
async fn mode_switch_record_to_playback_flushes_tape() {
    let dir = tempfile::tempdir().unwrap();
    let tape_path = dir.path().join("switch.tape");

    let harness = Harness::new(PLAN, Mode::Record, Some(&tape_path));
    harness
        .run_flow(flow("GET", "http://api/x", &[], b""), |_| {
            json_response(br#"{"v": 1}"#)
        })
        .await;

    // record → playback over the same tape path.
    harness
        .engine
        .set_mode(Mode::Playback, Some(&tape_path))
        .unwrap();
    assert_eq!(harness.engine.mode(), Mode::Playback);

    let done = harness
        .run_flow(flow("GET", "http://api/x", &[], b""), |_| {
            panic!("no upstream after switch")
        })
        .await;
    let body: serde_json::Value =
        serde_json::from_slice(&done.response.as_ref().unwrap().body).unwrap();
    assert_eq!(body["v"], -1);
    harness.finish().await;
}

#[tokio::test]
async fn playback_restores_classification_from_tape() {
    let dir = tempfile::tempdir().unwrap();
    let tape_path = dir.path().join("class.tape");

    let recorder = Harness::new(PLAN, Mode::Record, Some(&tape_path));
    recorder
        .run_flow(
            flow(
                "POST",
                "http://api/msg",
                &[("X-Agent-To-Agent", "true"), ("X-Agent-Role", "planner")],
                b"{}",
            ),
            |_| FlowResponse::synthesize(200, "OK", "application/json", b"{}".to_vec()),
        )
        .await;
    recorder.engine.shutdown().unwrap();
    recorder.finish().await;

    let player = Harness::new(PLAN, Mode::Playback, Some(&tape_path));
    // Replay WITHOUT the classification headers: metadata comes off the tape.
    let done = player
        .run_flow(flow("POST", "http://api/msg", &[], b"{}"), |_| {
            panic!("no upstream")
        })
        .await;
    assert_eq!(done.metadata.traffic_type.as_str(), "AGENT_TO_AGENT");
    assert_eq!(done.metadata.agent_role.as_deref(), Some("planner"));
    player.finish().await;
}
