//! The chaos engine: per-flow pipeline and mode management.
//!
//! The interception framework calls [`ChaosEngine::on_request`] before the
//! upstream leg and [`ChaosEngine::on_response`] after it. Within one flow
//! the order is fixed: classify → fingerprint → (playback: serve tape) |
//! (match → request-side strategies in plan order) → upstream →
//! response-side strategies in plan order → record → emit. Both hooks are
//! fail-open: no data-path error ever reaches the interceptor.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::audit::AuditLog;
use crate::error::{ChaosProxyError, PlanLoadError, TapeError};
use crate::events::{Event, EventPhase, EventPipeline};
use crate::flow::Flow;
use crate::plan::loader::{self, LoaderOptions};
use crate::plan::{CompiledPlan, PlanHandle};
use crate::redact::Redactor;
use crate::strategy::{matcher, StrategyContext};
use crate::tape::fingerprint::{Normalization, RequestFingerprint};
use crate::tape::model::{ChaosContext, ResponseSnapshot};
use crate::tape::{crypto, TapePlayer, TapeRecorder};

// ============================================================================
// Mode
// ============================================================================

/// Proxy operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Mutate live traffic; no tape involved.
    Live,
    /// Mutate live traffic and record every flow to a tape.
    Record,
    /// Serve every flow from a tape; no upstream traffic.
    Playback,
}

impl Mode {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Record => "record",
            Self::Playback => "playback",
        }
    }

    /// Parses a wire name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "live" => Some(Self::Live),
            "record" => Some(Self::Record),
            "playback" => Some(Self::Playback),
            _ => None,
        }
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Options for constructing a [`ChaosEngine`].
pub struct EngineOptions {
    /// Initial compiled plan.
    pub plan: CompiledPlan,
    /// Initial mode.
    pub mode: Mode,
    /// Tape path (required for record and playback modes).
    pub tape_path: Option<PathBuf>,
    /// Strictness flags used for plan reloads.
    pub loader_opts: LoaderOptions,
    /// Shared PII redactor.
    pub redactor: Arc<Redactor>,
    /// Audit sink.
    pub audit: Arc<AuditLog>,
    /// Event pipeline handles.
    pub pipeline: EventPipeline,
    /// Plan-wide default deadline for strategy suspensions.
    pub default_deadline: Option<Duration>,
}

/// Mode-dependent tape machinery, swapped as a unit.
enum TapeState {
    Idle,
    Recording(Arc<TapeRecorder>),
    Playing(Arc<TapePlayer>),
}

/// The chaos-injection core.
pub struct ChaosEngine {
    plan: PlanHandle,
    mode: RwLock<Mode>,
    tape: RwLock<TapeState>,
    sequence: AtomicU64,
    loader_opts: LoaderOptions,
    redactor: Arc<Redactor>,
    audit: Arc<AuditLog>,
    pipeline: EventPipeline,
    cancel: CancellationToken,
    default_deadline: Option<Duration>,
    started: Instant,
}

impl ChaosEngine {
    /// Builds the engine, opening the tape machinery for the initial mode.
    ///
    /// # Errors
    ///
    /// Returns [`ChaosProxyError`] when record/playback mode is requested
    /// without a tape path, or the tape cannot be loaded.
    pub fn new(opts: EngineOptions) -> Result<Self, ChaosProxyError> {
        let tape = match opts.mode {
            Mode::Live => TapeState::Idle,
            Mode::Record => {
                let path = opts.tape_path.as_deref().ok_or_else(|| {
                    ChaosProxyError::Tape(TapeError::Io {
                        path: PathBuf::from("<unset>"),
                        message: "record mode requires a tape path".to_string(),
                    })
                })?;
                TapeState::Recording(Arc::new(TapeRecorder::new(
                    path,
                    crypto::key_from_env()?,
                    Arc::clone(&opts.redactor),
                )))
            }
            Mode::Playback => {
                let path = opts.tape_path.as_deref().ok_or_else(|| {
                    ChaosProxyError::Tape(TapeError::Io {
                        path: PathBuf::from("<unset>"),
                        message: "playback mode requires a tape path".to_string(),
                    })
                })?;
                TapeState::Playing(Arc::new(TapePlayer::load(path, crypto::key_from_env()?)?))
            }
        };

        info!(mode = opts.mode.as_str(), revision = opts.plan.revision(), "chaos engine ready");
        Ok(Self {
            plan: PlanHandle::new(opts.plan),
            mode: RwLock::new(opts.mode),
            tape: RwLock::new(tape),
            sequence: AtomicU64::new(0),
            loader_opts: opts.loader_opts,
            redactor: opts.redactor,
            audit: opts.audit,
            pipeline: opts.pipeline,
            cancel: CancellationToken::new(),
            default_deadline: opts.default_deadline,
            started: Instant::now(),
        })
    }

    /// Current mode.
    #[must_use]
    pub fn mode(&self) -> Mode {
        *self.mode.read().expect("mode lock poisoned")
    }

    /// Revision of the installed plan.
    #[must_use]
    pub fn plan_revision(&self) -> u64 {
        self.plan.snapshot().revision()
    }

    /// Seconds since the engine was constructed.
    #[must_use]
    pub fn uptime_s(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Scorecard handle.
    #[must_use]
    pub fn pipeline(&self) -> &EventPipeline {
        &self.pipeline
    }

    /// Cancellation token propagated into strategy suspensions.
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    // ------------------------------------------------------------------
    // Control-plane operations
    // ------------------------------------------------------------------

    /// Validates plan bytes and installs the plan on success.
    ///
    /// The installed plan is untouched on any failure.
    ///
    /// # Errors
    ///
    /// Returns [`PlanLoadError`] with every validation issue, or the
    /// revision-monotonicity rejection.
    pub fn install_plan_bytes(&self, bytes: &[u8]) -> Result<u64, PlanLoadError> {
        let plan = loader::validate_plan(bytes, &self.loader_opts)?;
        let compiled = loader::compile(plan, &self.loader_opts)?;
        let installed = self.plan.install(compiled);
        match &installed {
            Ok(plan) => {
                self.audit.record(
                    "control-plane",
                    "CONFIG_CHANGE",
                    &format!("revision:{}", plan.revision()),
                    "installed",
                );
                info!(revision = plan.revision(), "plan installed");
            }
            Err(e) => {
                self.audit
                    .record("control-plane", "CONFIG_CHANGE", "plan", "rejected");
                warn!(error = %e, "plan install rejected; previous plan stays active");
            }
        }
        installed.map(|p| p.revision())
    }

    /// Switches the operating mode.
    ///
    /// Leaving record mode flushes the tape; entering record or playback
    /// requires a tape path.
    ///
    /// # Errors
    ///
    /// Returns [`ChaosProxyError`] when the tape path is missing, the tape
    /// cannot be loaded, or the outgoing recorder fails to flush.
    pub fn set_mode(&self, mode: Mode, tape_path: Option<&Path>) -> Result<(), ChaosProxyError> {
        let current = self.mode();
        if current == mode {
            return Ok(());
        }

        // Flush the outgoing recorder first so a record→playback switch can
        // load the tape it just produced.
        if let TapeState::Recording(recorder) = &*self.tape.read().expect("tape lock poisoned") {
            recorder.flush()?;
        }

        let next = match mode {
            Mode::Live => TapeState::Idle,
            Mode::Record => {
                let path = tape_path.ok_or_else(|| {
                    ChaosProxyError::Tape(TapeError::Io {
                        path: PathBuf::from("<unset>"),
                        message: "record mode requires a tape path".to_string(),
                    })
                })?;
                TapeState::Recording(Arc::new(TapeRecorder::new(
                    path,
                    crypto::key_from_env()?,
                    Arc::clone(&self.redactor),
                )))
            }
            Mode::Playback => {
                let path = tape_path.ok_or_else(|| {
                    ChaosProxyError::Tape(TapeError::Io {
                        path: PathBuf::from("<unset>"),
                        message: "playback mode requires a tape path".to_string(),
                    })
                })?;
                TapeState::Playing(Arc::new(TapePlayer::load(path, crypto::key_from_env()?)?))
            }
        };

        *self.tape.write().expect("tape lock poisoned") = next;
        *self.mode.write().expect("mode lock poisoned") = mode;

        self.audit.record(
            "control-plane",
            "MODE_CHANGE",
            &format!("{}->{}", current.as_str(), mode.as_str()),
            "ok",
        );
        info!(from = current.as_str(), to = mode.as_str(), "mode switched");
        Ok(())
    }

    /// Graceful shutdown: cancel in-flight suspensions and flush the tape.
    ///
    /// # Errors
    ///
    /// Returns [`ChaosProxyError::Tape`] when the final flush fails — fatal
    /// in record mode.
    pub fn shutdown(&self) -> Result<(), ChaosProxyError> {
        self.cancel.cancel();
        if let TapeState::Recording(recorder) = &*self.tape.read().expect("tape lock poisoned") {
            recorder.flush()?;
            info!(entries = recorder.len(), "tape flushed at shutdown");
        }
        self.pipeline.scorecard.emit_summary();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Interception hooks
    // ------------------------------------------------------------------

    /// Request hook: classify, fingerprint, playback or match + mutate.
    ///
    /// Fail-open: internal errors are logged and counted; the flow always
    /// proceeds.
    pub async fn on_request(&self, flow: &mut Flow) {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        flow.metadata.sequence = seq;
        flow.chaos.started = Some(Instant::now());

        let plan = self.plan.snapshot();
        flow.chaos.plan = Some(Arc::clone(&plan));

        plan.classifier.classify(flow);

        let fingerprint = RequestFingerprint::compute(
            &flow.request,
            Normalization {
                ignore_paths: &plan.ignore_paths,
                ignore_params: &plan.spec.replay_config.ignore_params,
            },
        );
        flow.metadata.fingerprint = Some(fingerprint.clone());

        self.emit(flow, EventPhase::Request, None);
        metrics::counter!("chaosproxy_requests_total").increment(1);

        if self.mode() == Mode::Playback {
            self.serve_playback(flow, &fingerprint);
            return;
        }

        let mut rng = matcher::flow_rng(plan.spec.experiment_id(), &fingerprint);
        flow.chaos.matched = matcher::match_strategies(&plan, flow, &mut rng);
        flow.chaos.rng = Some(rng);

        self.apply_side(flow, &plan, true).await;

        if flow.metadata.chaos_applied {
            self.emit(flow, EventPhase::Chaos, None);
        }
    }

    /// Response hook: response-side strategies, recording, final event.
    pub async fn on_response(&self, flow: &mut Flow) {
        // Playback flows were fully served in the request hook.
        if flow.chaos.played_back {
            return;
        }

        let plan = match &flow.chaos.plan {
            Some(plan) => Arc::clone(plan),
            // on_response without on_request: nothing sensible to do.
            None => return,
        };

        let applied_before = flow.metadata.applied_strategies.len();
        self.apply_side(flow, &plan, false).await;
        if flow.metadata.applied_strategies.len() > applied_before {
            self.emit(flow, EventPhase::Chaos, None);
        }

        if self.mode() == Mode::Record {
            self.record_flow(flow);
        }

        let status = flow.response.as_ref().map(|r| r.status);
        self.emit_with_status(flow, EventPhase::Response, status, None);
    }

    /// Applies one side's strategies in plan order, fail-open per strategy.
    async fn apply_side(&self, flow: &mut Flow, plan: &Arc<CompiledPlan>, request_side: bool) {
        let matched = flow.chaos.matched.clone();
        for index in matched {
            if request_side && flow.metadata.short_circuit {
                // A synthesized response is final for the request side.
                break;
            }
            let scenario = &plan.scenarios[index];

            let Some(rng) = flow.chaos.rng.as_mut() else {
                return;
            };
            // The borrow checker cannot see that the strategy only touches
            // request/response/metadata, so temporarily take the RNG out.
            let mut rng = std::mem::replace(rng, rand::SeedableRng::from_seed([0u8; 32]));
            let mut cx = StrategyContext {
                rng: &mut rng,
                cancel: self.cancel.child_token(),
                deadline: self
                    .default_deadline
                    .and_then(|d| flow.chaos.started.map(|s| s + d)),
            };

            let result = if request_side {
                scenario.strategy.intercept_request(flow, &mut cx).await
            } else {
                scenario.strategy.intercept_response(flow, &mut cx).await
            };

            if let Some(slot) = flow.chaos.rng.as_mut() {
                *slot = rng;
            }

            match result {
                Ok(true) => {
                    flow.metadata.record_applied(&scenario.name);
                    push_tag(flow, scenario.strategy.kind());
                    metrics::counter!(
                        "chaosproxy_chaos_injections_total",
                        "strategy" => scenario.strategy_type.clone()
                    )
                    .increment(1);
                }
                Ok(false) => {}
                Err(e) => {
                    let code = e.code();
                    flow.metadata.error_codes.push(code);
                    metrics::counter!(
                        "chaosproxy_chaos_error_codes_total",
                        "code" => code
                    )
                    .increment(1);
                    error!(
                        scenario = %scenario.name,
                        error = %e,
                        "strategy failed; skipping and continuing"
                    );
                    self.emit(flow, EventPhase::Error, Some(code.to_string()));
                }
            }
        }
    }

    /// Serves a playback flow from the tape (or a synthesized 404 miss).
    fn serve_playback(&self, flow: &mut Flow, fingerprint: &RequestFingerprint) {
        flow.chaos.played_back = true;
        flow.metadata.short_circuit = true;

        let tape = self.tape.read().expect("tape lock poisoned");
        let TapeState::Playing(player) = &*tape else {
            error!("playback mode without a loaded tape player");
            flow.response = Some(TapePlayer::synthesize_miss(fingerprint));
            self.emit_with_status(flow, EventPhase::Response, Some(404), Some("E_TAPE_MISS".to_string()));
            return;
        };

        match player.serve(fingerprint) {
            Some(entry) => {
                flow.response = Some(entry.response.restore());

                // Restore recorded chaos metadata for deterministic replay.
                let ctx = &entry.chaos_context;
                flow.metadata.applied_strategies = ctx.applied_strategies.clone();
                flow.metadata.chaos_applied = ctx.chaos_applied;
                if let Some(t) = &ctx.traffic_type {
                    flow.metadata.traffic_type = crate::classify::TrafficType::parse(t);
                }
                if let Some(s) = &ctx.traffic_subtype {
                    flow.metadata.traffic_subtype = crate::classify::TrafficSubtype::parse(s);
                }
                if ctx.agent_role.is_some() {
                    flow.metadata.agent_role = ctx.agent_role.clone();
                }

                let status = entry.response.status;
                self.emit_with_status(flow, EventPhase::Response, Some(status), None);
            }
            None => {
                metrics::counter!("chaosproxy_tape_miss_total").increment(1);
                flow.response = Some(TapePlayer::synthesize_miss(fingerprint));
                self.emit_with_status(
                    flow,
                    EventPhase::Response,
                    Some(404),
                    Some("E_TAPE_MISS".to_string()),
                );
            }
        }
    }

    /// Records a completed flow to the tape.
    fn record_flow(&self, flow: &Flow) {
        let tape = self.tape.read().expect("tape lock poisoned");
        let TapeState::Recording(recorder) = &*tape else {
            return;
        };
        let (Some(fingerprint), Some(response)) =
            (flow.metadata.fingerprint.clone(), flow.response.as_ref())
        else {
            return;
        };

        recorder.record(
            fingerprint,
            ResponseSnapshot::capture(response),
            ChaosContext {
                applied_strategies: flow.metadata.applied_strategies.clone(),
                chaos_applied: flow.metadata.chaos_applied,
                traffic_type: Some(flow.metadata.traffic_type.as_str().to_string()),
                traffic_subtype: Some(flow.metadata.traffic_subtype.as_str().to_string()),
                agent_role: flow.metadata.agent_role.clone(),
            },
            flow.metadata.sequence,
        );
    }

    // ------------------------------------------------------------------
    // Event emission
    // ------------------------------------------------------------------

    fn emit(&self, flow: &Flow, phase: EventPhase, error_code: Option<String>) {
        let status = flow.response.as_ref().map(|r| r.status);
        self.emit_with_status(flow, phase, status, error_code);
    }

    fn emit_with_status(
        &self,
        flow: &Flow,
        phase: EventPhase,
        status: Option<u16>,
        error_code: Option<String>,
    ) {
        let (url_redacted, pii_hits) = self.redactor.redact_counting(&flow.request.url);
        let latency_ms = flow
            .chaos
            .started
            .map_or(0, |s| u64::try_from(s.elapsed().as_millis()).unwrap_or(u64::MAX));

        // Events and tape entries share one atomic counter, so event
        // sequence numbers strictly increase within (and across) flows.
        self.pipeline.bus.publish(Event {
            t: chrono::Utc::now().to_rfc3339(),
            seq: self.sequence.fetch_add(1, Ordering::SeqCst),
            phase,
            traffic_type: flow.metadata.traffic_type.as_str().to_string(),
            traffic_subtype: flow.metadata.traffic_subtype.as_str().to_string(),
            agent_role: flow.metadata.agent_role.clone(),
            url_redacted,
            method: flow.request.method.clone(),
            status,
            applied_strategies: flow.metadata.applied_strategies.clone(),
            chaos_applied: flow.metadata.chaos_applied,
            latency_ms,
            error_code,
            attack_tags: flow
                .metadata
                .attack_tags
                .iter()
                .map(|t| (*t).to_string())
                .collect(),
            pii_hits: pii_hits as u64,
        });
    }
}

fn push_tag(flow: &mut Flow, tag: &'static str) {
    if !flow.metadata.attack_tags.contains(&tag) {
        flow.metadata.attack_tags.push(tag);
    }
}
