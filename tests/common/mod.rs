//! Shared helpers for the integration suite.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chaosproxy::audit::AuditLog;
use chaosproxy::engine::{ChaosEngine, EngineOptions, Mode};
use chaosproxy::events::sink::EventLogSink;
use chaosproxy::events::{EventBus, EventPipeline, DEFAULT_BUS_CAPACITY};
use chaosproxy::flow::{Flow, FlowRequest, FlowResponse};
use chaosproxy::plan::loader::{self, LoaderOptions};
use chaosproxy::plan::CompiledPlan;
use chaosproxy::redact::Redactor;

/// Compiles a plan from YAML, panicking on any validation issue.
pub fn compile_plan(yaml: &str) -> CompiledPlan {
    let opts = LoaderOptions::default();
    let plan = loader::validate_plan(yaml.as_bytes(), &opts).expect("plan should validate");
    loader::compile(plan, &opts).expect("plan should compile")
}

/// Everything a test needs to drive an engine and observe its output.
pub struct Harness {
    pub engine: Arc<ChaosEngine>,
    pub bus: Arc<EventBus>,
    pub pipeline: EventPipeline,
    pub pump: tokio::task::JoinHandle<()>,
}

impl Harness {
    /// Builds an engine in the given mode over the given plan.
    pub fn new(yaml: &str, mode: Mode, tape_path: Option<&std::path::Path>) -> Self {
        let bus = EventBus::new(DEFAULT_BUS_CAPACITY);
        let (pipeline, pump) = EventPipeline::spawn(Arc::clone(&bus), EventLogSink::noop());

        let redactor = Arc::new(Redactor::new(true));
        let engine = ChaosEngine::new(EngineOptions {
            plan: compile_plan(yaml),
            mode,
            tape_path: tape_path.map(std::path::Path::to_path_buf),
            loader_opts: LoaderOptions::default(),
            redactor: Arc::clone(&redactor),
            audit: Arc::new(AuditLog::disabled(redactor)),
            pipeline: pipeline.clone(),
            default_deadline: Some(Duration::from_secs(30)),
        })
        .expect("engine should build");

        Self {
            engine: Arc::new(engine),
            bus,
            pipeline,
            pump,
        }
    }

    /// Runs a full request/response cycle, simulating the upstream leg with
    /// `upstream` when the flow was not short-circuited.
    pub async fn run_flow<F>(&self, mut flow: Flow, upstream: F) -> Flow
    where
        F: FnOnce(&Flow) -> FlowResponse,
    {
        self.engine.on_request(&mut flow).await;
        if !flow.metadata.short_circuit && flow.response.is_none() {
            flow.response = Some(upstream(&flow));
        }
        self.engine.on_response(&mut flow).await;
        flow
    }

    /// Closes the pipeline and waits for the pump to drain.
    pub async fn finish(self) -> EventPipeline {
        self.bus.close();
        self.pump.await.expect("pump should not panic");
        self.pipeline
    }
}

/// Builds a request flow.
pub fn flow(method: &str, url: &str, headers: &[(&str, &str)], body: &[u8]) -> Flow {
    Flow::new(FlowRequest::new(
        method,
        url,
        headers
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect(),
        body,
    ))
}

/// A plain 200 JSON upstream response.
pub fn json_response(body: &[u8]) -> FlowResponse {
    FlowResponse::synthesize(200, "OK", "application/json", body.to_vec())
}
