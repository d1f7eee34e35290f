use serde::Deserialize;
use tracing::info;

use crate::error::{Error, Result};

const TOKENS_PER_UNIT: f64 = 1_000_000.0;

/// Token counts reported by the remote model for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct UsageCounts {
    #[serde(rename = "prompt_tokens")]
    pub input_tokens: u64,
    #[serde(rename = "completion_tokens")]
    pub output_tokens: u64,
}

/// Static USD prices per million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            input_per_million: 2.0,
            output_per_million: 8.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostBreakdown {
    pub usage: UsageCounts,
    pub frame_count: usize,
    pub input_cost: f64,
    pub output_cost: f64,
    pub total_cost: f64,
    pub cost_per_frame: f64,
}

impl CostBreakdown {
    /// Fails with [`Error::EmptyResult`] when no frames were sampled.
    pub fn compute(usage: UsageCounts, frame_count: usize, pricing: &Pricing) -> Result<Self> {
        if frame_count == 0 {
            return Err(Error::EmptyResult);
        }

        let input_cost = usage.input_tokens as f64 / TOKENS_PER_UNIT * pricing.input_per_million;
        let output_cost = usage.output_tokens as f64 / TOKENS_PER_UNIT * pricing.output_per_million;
        let total_cost = input_cost + output_cost;
        let cost_per_frame = total_cost / frame_count as f64;

        info!(
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            total_cost,
            cost_per_frame,
            "cost computed"
        );

        Ok(Self {
            usage,
            frame_count,
            input_cost,
            output_cost,
            total_cost,
            cost_per_frame,
        })
    }

    pub fn total_tokens(&self) -> u64 {
        self.usage.input_tokens + self.usage.output_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn reference_breakdown() {
        let usage = UsageCounts {
            input_tokens: 5100,
            output_tokens: 300,
        };
        let cost = CostBreakdown::compute(usage, 30, &Pricing::default()).unwrap();

        assert!(approx(cost.input_cost, 0.0102), "input {}", cost.input_cost);
        assert!(approx(cost.output_cost, 0.0024), "output {}", cost.output_cost);
        assert!(approx(cost.total_cost, 0.0126), "total {}", cost.total_cost);
        assert!(approx(cost.cost_per_frame, 0.00042), "per frame {}", cost.cost_per_frame);
        assert_eq!(cost.total_tokens(), 5400);
    }

    #[test]
    fn zero_frames_is_empty_result() {
        let usage = UsageCounts {
            input_tokens: 100,
            output_tokens: 10,
        };
        let err = CostBreakdown::compute(usage, 0, &Pricing::default()).unwrap_err();
        assert!(matches!(err, Error::EmptyResult));
    }

    #[test]
    fn custom_prices_apply() {
        let usage = UsageCounts {
            input_tokens: 1_000_000,
            output_tokens: 500_000,
        };
        let pricing = Pricing {
            input_per_million: 0.15,
            output_per_million: 0.6,
        };
        let cost = CostBreakdown::compute(usage, 4, &pricing).unwrap();
        assert!(approx(cost.total_cost, 0.45));
        assert!(approx(cost.cost_per_frame, 0.1125));
    }

    #[test]
    fn usage_parses_from_response_fields() {
        let usage: UsageCounts =
            serde_json::from_str(r#"{"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}"#)
                .unwrap();
        assert_eq!(usage.input_tokens, 12);
        assert_eq!(usage.output_tokens, 3);
    }
}
