//! The chaos strategy library.
//!
//! Every strategy implements the same capability set — a request-side and a
//! response-side interceptor, either of which may be a no-op — and is safe
//! under concurrent invocation on distinct flows. Strategies own no per-flow
//! state: randomness comes from the flow's deterministic RNG, suspensions
//! from the flow's cancellation token and deadline. A strategy that fails
//! internally records an error code and leaves the flow untouched; the
//! pipeline continues.

pub mod cognitive;
pub mod corruption;
pub mod error_inject;
pub mod fuzzing;
pub mod group;
pub mod latency;
pub mod matcher;
pub mod rag;
pub mod registry;
pub mod swarm;

use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use tokio_util::sync::CancellationToken;

use crate::error::StrategyError;
use crate::flow::Flow;

/// Per-invocation context handed to a strategy.
///
/// Borrows the flow's deterministic RNG so every draw is attributable to the
/// flow's seed, and carries the cancellation token and deadline every
/// suspension must honor.
pub struct StrategyContext<'a> {
    /// Deterministic per-flow RNG.
    pub rng: &'a mut StdRng,
    /// Cancelled when the interceptor aborts the flow.
    pub cancel: CancellationToken,
    /// Flow deadline; suspensions are capped to it.
    pub deadline: Option<Instant>,
}

/// Outcome of a cooperative suspension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suspension {
    /// Slept the full requested duration.
    Completed,
    /// Cut short by the deadline.
    DeadlineCapped,
    /// Cancelled by the interceptor; the flow proceeds immediately.
    Cancelled,
}

impl StrategyContext<'_> {
    /// Suspends the flow for `duration`, capped at the deadline and
    /// cancellable at any point.
    pub async fn suspend(&self, duration: Duration) -> Suspension {
        let (capped, deadline_hit) = match self.deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining < duration {
                    (remaining, true)
                } else {
                    (duration, false)
                }
            }
            None => (duration, false),
        };

        tokio::select! {
            () = self.cancel.cancelled() => Suspension::Cancelled,
            () = tokio::time::sleep(capped) => {
                if deadline_hit {
                    Suspension::DeadlineCapped
                } else {
                    Suspension::Completed
                }
            }
        }
    }
}

/// Uniform capability set for chaos strategies.
///
/// Both hooks default to no-ops; a strategy overrides the side(s) it acts
/// on. Returning `Ok(true)` marks the strategy as applied on the flow.
#[async_trait::async_trait]
pub trait Strategy: Send + Sync {
    /// Strategy type tag (matches the plan's `type` field).
    fn kind(&self) -> &'static str;

    /// Mutates the outbound request, or short-circuits the flow.
    async fn intercept_request(
        &self,
        _flow: &mut Flow,
        _cx: &mut StrategyContext<'_>,
    ) -> Result<bool, StrategyError> {
        Ok(false)
    }

    /// Mutates the inbound response.
    async fn intercept_response(
        &self,
        _flow: &mut Flow,
        _cx: &mut StrategyContext<'_>,
    ) -> Result<bool, StrategyError> {
        Ok(false)
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use rand::SeedableRng;

    /// RNG with a fixed seed for strategy tests.
    pub fn rng() -> StdRng {
        StdRng::from_seed([7u8; 32])
    }

    /// Context with no deadline and a fresh cancel token.
    pub fn context(rng: &mut StdRng) -> StrategyContext<'_> {
        StrategyContext {
            rng,
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[tokio::test]
    async fn suspend_completes_without_deadline() {
        let mut rng = StdRng::from_seed([0u8; 32]);
        let cx = StrategyContext {
            rng: &mut rng,
            cancel: CancellationToken::new(),
            deadline: None,
        };
        let outcome = cx.suspend(Duration::from_millis(5)).await;
        assert_eq!(outcome, Suspension::Completed);
    }

    #[tokio::test]
    async fn suspend_caps_at_deadline() {
        let mut rng = StdRng::from_seed([0u8; 32]);
        let cx = StrategyContext {
            rng: &mut rng,
            cancel: CancellationToken::new(),
            deadline: Some(Instant::now() + Duration::from_millis(10)),
        };
        let start = Instant::now();
        let outcome = cx.suspend(Duration::from_secs(30)).await;
        assert_eq!(outcome, Suspension::DeadlineCapped);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn suspend_returns_promptly_on_cancel() {
        let mut rng = StdRng::from_seed([0u8; 32]);
        let cancel = CancellationToken::new();
        let cx = StrategyContext {
            rng: &mut rng,
            cancel: cancel.clone(),
            deadline: None,
        };
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            cancel.cancel();
        });
        let start = Instant::now();
        let outcome = cx.suspend(Duration::from_secs(60)).await;
        assert_eq!(outcome, Suspension::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.await.unwrap();
    }
}
