//! Response data corruption.

use rand::Rng;
use serde::Deserialize;
use tracing::info;

use crate::error::StrategyError;
use crate::flow::Flow;
use crate::strategy::{Strategy, StrategyContext};

/// Corruption mode for JSON bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorruptionMode {
    /// Jitter numeric leaves by ±`jitter_pct`.
    #[default]
    Jitter,
    /// Flip boolean leaves with probability `flip_prob`.
    Flip,
    /// Truncate arrays to their first half.
    Truncate,
}

fn default_jitter_pct() -> f64 {
    0.2
}

fn default_flip_prob() -> f64 {
    0.3
}

fn default_byte_flips() -> usize {
    8
}

/// Parameters for [`CorruptionStrategy`].
#[derive(Debug, Clone, Deserialize)]
pub struct CorruptionConfig {
    /// JSON corruption mode.
    #[serde(default)]
    pub mode: CorruptionMode,
    /// Relative jitter applied to numeric leaves.
    #[serde(default = "default_jitter_pct")]
    pub jitter_pct: f64,
    /// Per-leaf flip probability for booleans.
    #[serde(default = "default_flip_prob")]
    pub flip_prob: f64,
    /// Bytes flipped at random positions in non-JSON bodies.
    #[serde(default = "default_byte_flips")]
    pub byte_flips: usize,
}

/// Corrupts response payloads: structured mutation for JSON, random byte
/// flips for anything else.
#[derive(Debug)]
pub struct CorruptionStrategy {
    config: CorruptionConfig,
}

impl CorruptionStrategy {
    /// Builds the strategy from scenario params.
    ///
    /// # Errors
    ///
    /// Returns a message when params do not deserialize or ranges are bad.
    pub fn from_params(
        params: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Self, String> {
        let config: CorruptionConfig =
            serde_json::from_value(serde_json::Value::Object(params.clone()))
                .map_err(|e| format!("data_corruption params: {e}"))?;
        if !(0.0..=1.0).contains(&config.flip_prob) {
            return Err(format!("flip_prob {} outside [0, 1]", config.flip_prob));
        }
        if !config.jitter_pct.is_finite() || config.jitter_pct < 0.0 {
            return Err(format!("jitter_pct {} must be >= 0", config.jitter_pct));
        }
        Ok(Self { config })
    }

    fn corrupt_json(&self, value: &mut serde_json::Value, rng: &mut rand::rngs::StdRng) -> usize {
        match self.config.mode {
            CorruptionMode::Jitter => jitter_numbers(value, self.config.jitter_pct, rng),
            CorruptionMode::Flip => flip_booleans(value, self.config.flip_prob, rng),
            CorruptionMode::Truncate => truncate_arrays(value),
        }
    }
}

fn jitter_numbers(
    value: &mut serde_json::Value,
    pct: f64,
    rng: &mut rand::rngs::StdRng,
) -> usize {
    match value {
        serde_json::Value::Number(n) => {
            let Some(f) = n.as_f64() else { return 0 };
            let factor = 1.0 + rng.gen_range(-pct..pct);
            if let Some(jittered) = serde_json::Number::from_f64(f * factor) {
                *value = serde_json::Value::Number(jittered);
                1
            } else {
                0
            }
        }
        serde_json::Value::Object(map) => map
            .values_mut()
            .map(|v| jitter_numbers(v, pct, rng))
            .sum(),
        serde_json::Value::Array(items) => items
            .iter_mut()
            .map(|v| jitter_numbers(v, pct, rng))
            .sum(),
        _ => 0,
    }
}

fn flip_booleans(
    value: &mut serde_json::Value,
    prob: f64,
    rng: &mut rand::rngs::StdRng,
) -> usize {
    match value {
        serde_json::Value::Bool(b) => {
            if rng.gen::<f64>() < prob {
                *b = !*b;
                1
            } else {
                0
            }
        }
        serde_json::Value::Object(map) => map
            .values_mut()
            .map(|v| flip_booleans(v, prob, rng))
            .sum(),
        serde_json::Value::Array(items) => items
            .iter_mut()
            .map(|v| flip_booleans(v, prob, rng))
            .sum(),
        _ => 0,
    }
}

fn truncate_arrays(value: &mut serde_json::Value) -> usize {
    match value {
        serde_json::Value::Array(items) if items.len() > 1 => {
            let keep = items.len() / 2;
            items.truncate(keep);
            1 + items.iter_mut().map(truncate_arrays).sum::<usize>()
        }
        serde_json::Value::Array(items) => items.iter_mut().map(truncate_arrays).sum(),
        serde_json::Value::Object(map) => map.values_mut().map(truncate_arrays).sum(),
        _ => 0,
    }
}

#[async_trait::async_trait]
impl Strategy for CorruptionStrategy {
    fn kind(&self) -> &'static str {
        "data_corruption"
    }

    async fn intercept_response(
        &self,
        flow: &mut Flow,
        cx: &mut StrategyContext<'_>,
    ) -> Result<bool, StrategyError> {
        let Some(response) = flow.response.as_mut() else {
            return Ok(false);
        };
        if response.body.is_empty() {
            return Ok(false);
        }

        if let Some(mut value) = response.json_body() {
            let mutated = self.corrupt_json(&mut value, cx.rng);
            if mutated == 0 {
                return Ok(false);
            }
            let body = serde_json::to_vec(&value)?;
            response.set_body(body);
            info!(mutated, mode = ?self.config.mode, "corrupted JSON response");
            return Ok(true);
        }

        // Binary body: flip bytes at random positions.
        let mut body = response.body.to_vec();
        let flips = self.config.byte_flips.min(body.len());
        if flips == 0 {
            return Ok(false);
        }
        for _ in 0..flips {
            let pos = cx.rng.gen_range(0..body.len());
            body[pos] ^= 1 << cx.rng.gen_range(0..8);
        }
        response.set_body(body);
        info!(flips, "corrupted binary response");
        Ok(true)
    }
}
