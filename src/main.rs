//! chaosproxy executable: load the plan, start the pipeline and control
//! plane, and run until interrupted.

use std::process::ExitCode as ProcessExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use chaosproxy::audit::AuditLog;
use chaosproxy::cli::{self, Cli, ModeArg};
use chaosproxy::control::{self, AuthConfig, ControlState};
use chaosproxy::engine::{ChaosEngine, EngineOptions, Mode};
use chaosproxy::error::{ChaosProxyError, ExitCode};
use chaosproxy::events::{sink::EventLogSink, EventBus, EventPipeline, DEFAULT_BUS_CAPACITY};
use chaosproxy::plan::loader::{self, LoaderOptions};
use chaosproxy::redact::Redactor;

fn main() -> ProcessExitCode {
    let cli = Cli::parse();
    let verbosity = if cli.quiet { 0 } else { cli.verbose.max(1) };
    cli::init_logging(cli.log_format, verbosity);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start runtime");
            return ProcessExitCode::from(1);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ProcessExitCode::from(u8::try_from(ExitCode::SUCCESS).unwrap_or(0)),
        Err(e) => {
            error!(error = %e, "fatal");
            ProcessExitCode::from(u8::try_from(e.exit_code()).unwrap_or(1))
        }
    }
}

async fn run(cli: Cli) -> Result<(), ChaosProxyError> {
    let loader_opts = LoaderOptions::from_env();

    let plan = loader::load_plan(&cli.plan, &loader_opts)?;
    let compiled = loader::compile(plan, &loader_opts)?;

    if cli.check {
        info!(revision = compiled.revision(), "plan is valid");
        return Ok(());
    }

    // Fail fast on strict-mode auth misconfiguration.
    let auth = Arc::new(AuthConfig::from_env()?);

    if let Some(port) = cli.metrics_port {
        if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(([127, 0, 0, 1], port))
            .install()
        {
            return Err(ChaosProxyError::Control(
                chaosproxy::error::ControlPlaneError::Bind {
                    addr: format!("127.0.0.1:{port}"),
                    message: e.to_string(),
                },
            ));
        }
    }

    let redactor = Arc::new(Redactor::from_env());
    let audit = Arc::new(AuditLog::from_env(Arc::clone(&redactor)));

    let bus = EventBus::new(DEFAULT_BUS_CAPACITY);
    let sink = EventLogSink::at_path(&cli.event_log)?;
    let (pipeline, pump) = EventPipeline::spawn(Arc::clone(&bus), sink);

    let mode = match cli.mode {
        ModeArg::Live => Mode::Live,
        ModeArg::Record => Mode::Record,
        ModeArg::Playback => Mode::Playback,
    };

    let engine = Arc::new(ChaosEngine::new(EngineOptions {
        plan: compiled,
        mode,
        tape_path: cli.tape.clone(),
        loader_opts,
        redactor,
        audit: Arc::clone(&audit),
        pipeline,
        default_deadline: Some(Duration::from_secs_f64(cli.suspension_deadline)),
    })?);

    let shutdown = CancellationToken::new();
    let control_state = ControlState {
        engine: Arc::clone(&engine),
        auth,
        audit,
    };
    control::serve(&cli.control_listen, control_state, shutdown.clone()).await?;

    info!(
        mode = mode.as_str(),
        control = %cli.control_listen,
        "chaosproxy running; press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await.map_err(ChaosProxyError::Io)?;
    info!("shutting down");

    shutdown.cancel();
    let shutdown_result = engine.shutdown();
    bus.close();
    let _ = pump.await;

    shutdown_result
}
