//! Latency injection.

use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::error::StrategyError;
use crate::flow::Flow;
use crate::strategy::{Strategy, StrategyContext, Suspension};

/// Which side of the flow the delay suspends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// Delay before the upstream leg.
    #[default]
    Request,
    /// Delay after the upstream leg.
    Response,
}

fn default_delay() -> f64 {
    5.0
}

/// Parameters for [`LatencyStrategy`].
#[derive(Debug, Clone, Deserialize)]
pub struct LatencyConfig {
    /// Delay in seconds.
    #[serde(default = "default_delay")]
    pub delay: f64,
    /// Side to suspend on.
    #[serde(default)]
    pub side: Side,
}

/// Suspends the flow for a configured delay.
///
/// Fails soft: a cancelled suspension tags the flow `cancelled` and lets it
/// proceed immediately.
#[derive(Debug)]
pub struct LatencyStrategy {
    config: LatencyConfig,
}

impl LatencyStrategy {
    /// Builds the strategy from scenario params.
    ///
    /// # Errors
    ///
    /// Returns a message when params do not deserialize or the delay is
    /// negative or non-finite.
    pub fn from_params(
        params: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Self, String> {
        let config: LatencyConfig =
            serde_json::from_value(serde_json::Value::Object(params.clone()))
                .map_err(|e| format!("latency params: {e}"))?;
        if !config.delay.is_finite() || config.delay < 0.0 {
            return Err(format!("latency delay {} must be >= 0", config.delay));
        }
        Ok(Self { config })
    }

    async fn apply(&self, flow: &mut Flow, cx: &mut StrategyContext<'_>) -> bool {
        info!(delay_s = self.config.delay, "injecting latency");
        let outcome = cx.suspend(Duration::from_secs_f64(self.config.delay)).await;
        if outcome == Suspension::Cancelled {
            flow.metadata.cancelled = true;
        }
        true
    }
}

#[async_trait::async_trait]
impl Strategy for LatencyStrategy {
    fn kind(&self) -> &'static str {
        "latency"
    }

    async fn intercept_request(
        &self,
        flow: &mut Flow,
        cx: &mut StrategyContext<'_>,
    ) -> Result<bool, StrategyError> {
        if self.config.side != Side::Request {
            return Ok(false);
        }
        Ok(self.apply(flow, cx).await)
    }

    async fn intercept_response(
        &self,
        flow: &mut Flow,
        cx: &mut StrategyContext<'_>,
    ) -> Result<bool, StrategyError> {
        if self.config.side != Side::Response {
            return Ok(false);
        }
        Ok(self.apply(flow, cx).await)
    }
}
