//! Model pricing table.
//!
//! Costs are in nanodollars (1e-9 USD) per token so that summing many small
//! calls stays exact; records store the USD conversion.

/// Pricing for one model family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelPricing {
    pub input_nanos_per_token: i64,
    pub output_nanos_per_token: i64,
}

impl ModelPricing {
    const fn new(input: i64, output: i64) -> Self {
        Self {
            input_nanos_per_token: input,
            output_nanos_per_token: output,
        }
    }

    /// Saturates instead of overflowing on absurd token counts.
    pub fn cost_nanos(&self, input_tokens: i64, output_tokens: i64) -> i64 {
        let input = input_tokens.max(0).saturating_mul(self.input_nanos_per_token);
        let output = output_tokens.max(0).saturating_mul(self.output_nanos_per_token);
        input.saturating_add(output)
    }
}

// Claude 3.5 Sonnet / Sonnet 4: $3.00/1M input, $15.00/1M output
const SONNET: ModelPricing = ModelPricing::new(3_000, 15_000);
// Claude 3.5 Haiku: $0.80/1M input, $4.00/1M output
const HAIKU_35: ModelPricing = ModelPricing::new(800, 4_000);
// Claude 3 Haiku: $0.25/1M input, $1.25/1M output
const HAIKU_3: ModelPricing = ModelPricing::new(250, 1_250);
// Claude 3 Opus / Opus 4: $15.00/1M input, $75.00/1M output
const OPUS: ModelPricing = ModelPricing::new(15_000, 75_000);

/// Model id prefix → pricing. Longest matching prefix wins.
const PRICE_TABLE: &[(&str, ModelPricing)] = &[
    ("claude-3-5-sonnet", SONNET),
    ("claude-3-7-sonnet", SONNET),
    ("claude-sonnet-4", SONNET),
    ("claude-3-5-haiku", HAIKU_35),
    ("claude-3-haiku", HAIKU_3),
    ("claude-3-opus", OPUS),
    ("claude-opus-4", OPUS),
];

/// Pricing for `model`; unknown models are charged at Sonnet rates.
pub fn pricing_for(model: &str) -> ModelPricing {
    PRICE_TABLE
        .iter()
        .filter(|(prefix, _)| model.starts_with(prefix))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, pricing)| *pricing)
        .unwrap_or(SONNET)
}

pub fn cost_usd(model: &str, input_tokens: i64, output_tokens: i64) -> f64 {
    pricing_for(model).cost_nanos(input_tokens, output_tokens) as f64 / 1e9
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sonnet_rates() {
        // 1000 in × $3/M + 500 out × $15/M = $0.0105
        let cost = cost_usd("claude-3-5-sonnet-20241022", 1000, 500);
        assert!((cost - 0.0105).abs() < 1e-12);
    }

    #[test]
    fn unknown_model_uses_default() {
        assert_eq!(pricing_for("some-new-model"), SONNET);
        assert_eq!(pricing_for("claude-3-haiku-20240307"), HAIKU_3);
    }

    #[test]
    fn huge_token_counts_saturate() {
        assert_eq!(OPUS.cost_nanos(i64::MAX, 1), i64::MAX);
        assert_eq!(SONNET.cost_nanos(i64::MAX / 2, i64::MAX / 2), i64::MAX);
        assert_eq!(HAIKU_3.cost_nanos(i64::MIN, 4), 5_000);
    }

    #[test]
    fn zero_tokens_cost_nothing() {
        assert_eq!(cost_usd("claude-3-opus-20240229", 0, 0), 0.0);
    }
}
