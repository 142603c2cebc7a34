//! chaosproxy — chaos-engineering interception core for AI-agent traffic.
//!
//! An HTTP interception framework hands mutable flows to
//! [`engine::ChaosEngine::on_request`] and [`engine::ChaosEngine::on_response`];
//! the engine classifies each flow, matches it against the installed
//! [`plan::ChaosPlan`], applies the matched chaos strategies, records or
//! replays deterministic tapes, and emits structured events consumed by the
//! log sink, the dashboard fan-out, and the scorecard aggregator.

pub mod audit;
pub mod classify;
pub mod cli;
pub mod control;
pub mod engine;
pub mod error;
pub mod events;
pub mod flow;
pub mod jsonpath;
pub mod plan;
pub mod redact;
pub mod strategy;
pub mod tape;
