use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use solroute_commons::error::ErrorCode;

use crate::error::{RouterError, RouterResult};
use crate::model::{NormalizedQuote, RankedQuote, RouteScore};

/// Weighting of the five scoring dimensions. Must sum to 1.0.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreWeights {
    pub output_amount: f64,
    pub fees: f64,
    pub gas_estimate: f64,
    pub latency: f64,
    pub reliability: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            output_amount: 0.40,
            fees: 0.25,
            gas_estimate: 0.15,
            latency: 0.15,
            reliability: 0.05,
        }
    }
}

impl ScoreWeights {
    /// Scores only order routes; a weight vector that does not sum to 1.0
    /// silently reshapes that order, so it is rejected at startup.
    pub fn validate(&self) -> RouterResult<()> {
        let sum = self.output_amount + self.fees + self.gas_estimate + self.latency + self.reliability;
        if (sum - 1.0).abs() > 1e-9 {
            return Err(RouterError::from_code(
                ErrorCode::ConfigError,
                format!("performance weights must sum to 1.0, got {sum}"),
            ));
        }
        if [self.output_amount, self.fees, self.gas_estimate, self.latency, self.reliability]
            .iter()
            .any(|w| *w < 0.0)
        {
            return Err(RouterError::from_code(
                ErrorCode::ConfigError,
                "performance weights must be non-negative",
            ));
        }
        Ok(())
    }
}

/// Normalization envelopes for the raw metrics. Values past an envelope
/// saturate at 1.0.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreNormalization {
    /// Output-amount envelope in base units.
    pub output_envelope: f64,
    /// Platform-fee ratio (fee / input) that saturates the fee score.
    pub fee_saturation: f64,
    /// Compute-budget envelope.
    pub gas_envelope: f64,
    /// Latency envelope in milliseconds.
    pub latency_envelope_ms: f64,
    /// Assumed compute budget when the upstream does not report one.
    pub default_gas: f64,
}

impl Default for ScoreNormalization {
    fn default() -> Self {
        Self {
            output_envelope: 1e12,
            fee_saturation: 0.01,
            gas_envelope: 200_000.0,
            latency_envelope_ms: 3_000.0,
            default_gas: 100_000.0,
        }
    }
}

/// Static per-provider reliability, in [0,1].
#[derive(Debug, Clone)]
pub struct ReliabilityTable {
    by_provider: HashMap<String, f64>,
    fallback: f64,
}

impl Default for ReliabilityTable {
    fn default() -> Self {
        let mut by_provider = HashMap::new();
        by_provider.insert("jupiter".to_string(), 0.95);
        by_provider.insert("okx".to_string(), 0.90);
        Self {
            by_provider,
            fallback: 0.85,
        }
    }
}

impl ReliabilityTable {
    pub fn with_provider(mut self, provider: impl Into<String>, reliability: f64) -> Self {
        self.by_provider.insert(provider.into(), reliability.clamp(0.0, 1.0));
        self
    }

    pub fn reliability_for(&self, provider: &str) -> f64 {
        self.by_provider.get(provider).copied().unwrap_or(self.fallback)
    }
}

fn saturate(value: f64, envelope: f64) -> f64 {
    if envelope <= 0.0 {
        return 1.0;
    }
    (value / envelope).clamp(0.0, 1.0)
}

/// Scores one quote. Lower-is-better dimensions store their normalized
/// magnitude; the weighted total inverts them.
pub fn score_quote(
    quote: &NormalizedQuote,
    provider: &str,
    response_time_ms: u64,
    weights: &ScoreWeights,
    norm: &ScoreNormalization,
    reliability: &ReliabilityTable,
) -> RouteScore {
    let out_amount = quote.out_amount.parse::<f64>().unwrap_or(0.0);
    let in_amount = quote.in_amount.parse::<f64>().unwrap_or(0.0);

    let output_amount = saturate(out_amount, norm.output_envelope);

    let fees = match &quote.platform_fee {
        Some(fee) if in_amount > 0.0 => {
            let fee_amount = fee.amount.parse::<f64>().unwrap_or(0.0);
            saturate(fee_amount / in_amount, norm.fee_saturation)
        }
        _ => 0.0,
    };

    let gas = quote.gas_estimate.map(|g| g as f64).unwrap_or(norm.default_gas);
    let gas_estimate = saturate(gas, norm.gas_envelope);

    let latency = saturate(response_time_ms as f64, norm.latency_envelope_ms);

    let reliability = reliability.reliability_for(provider);

    let total_score = weights.output_amount * output_amount
        + weights.fees * (1.0 - fees)
        + weights.gas_estimate * (1.0 - gas_estimate)
        + weights.latency * (1.0 - latency)
        + weights.reliability * reliability;

    RouteScore {
        output_amount,
        fees,
        gas_estimate,
        latency,
        reliability,
        total_score: total_score.clamp(0.0, 1.0),
    }
}

/// Ordering metric under the active policy. Latency-biased requests trade
/// output for responsiveness.
pub fn policy_metric(score: &RouteScore, favor_low_latency: bool) -> f64 {
    if favor_low_latency {
        0.6 * (1.0 - score.latency) + 0.4 * score.output_amount
    } else {
        score.total_score
    }
}

/// Sorts descending by the policy metric; ties break on provider name for
/// deterministic output.
pub fn rank_quotes(quotes: &mut [RankedQuote], favor_low_latency: bool) {
    quotes.sort_by(|a, b| {
        let ma = policy_metric(&a.score, favor_low_latency);
        let mb = policy_metric(&b.score, favor_low_latency);
        mb.partial_cmp(&ma)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.provider.cmp(&b.provider))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PlatformFee, RouteStep, SwapMode};

    fn quote(out_amount: &str) -> NormalizedQuote {
        NormalizedQuote {
            input_mint: "SOL".to_string(),
            output_mint: "USDC".to_string(),
            in_amount: "1000000000".to_string(),
            out_amount: out_amount.to_string(),
            other_amount_threshold: out_amount.to_string(),
            swap_mode: SwapMode::ExactIn,
            slippage_bps: 50,
            platform_fee: None,
            price_impact_pct: "0.02".to_string(),
            route_plan: vec![RouteStep {
                amm_key: "pool".to_string(),
                label: None,
                input_mint: "SOL".to_string(),
                output_mint: "USDC".to_string(),
                in_amount: "1000000000".to_string(),
                out_amount: out_amount.to_string(),
                fee_amount: None,
            }],
            gas_estimate: None,
            time_taken_ms: 10,
            context_slot: None,
        }
    }

    fn score(q: &NormalizedQuote, response_time_ms: u64) -> RouteScore {
        score_quote(
            q,
            "jupiter",
            response_time_ms,
            &ScoreWeights::default(),
            &ScoreNormalization::default(),
            &ReliabilityTable::default(),
        )
    }

    #[test]
    fn default_weights_sum_to_one() {
        ScoreWeights::default().validate().expect("defaults valid");
    }

    #[test]
    fn skewed_weights_are_rejected() {
        let bad = ScoreWeights {
            output_amount: 0.5,
            fees: 0.5,
            gas_estimate: 0.5,
            latency: 0.0,
            reliability: 0.0,
        };
        assert!(bad.validate().is_err());

        let negative = ScoreWeights {
            output_amount: 1.2,
            fees: -0.2,
            gas_estimate: 0.0,
            latency: 0.0,
            reliability: 0.0,
        };
        assert!(negative.validate().is_err());
    }

    #[test]
    fn higher_output_scores_strictly_higher() {
        let low = score(&quote("145500000"), 250);
        let high = score(&quote("145670000"), 250);
        assert!(high.total_score > low.total_score);
    }

    #[test]
    fn higher_latency_scores_strictly_lower() {
        let fast = score(&quote("145670000"), 250);
        let slow = score(&quote("145670000"), 400);
        assert!(fast.total_score > slow.total_score);
    }

    #[test]
    fn platform_fee_lowers_the_score() {
        let free = score(&quote("145670000"), 250);

        let mut fee_quote = quote("145670000");
        fee_quote.platform_fee = Some(PlatformFee {
            amount: "5000000".to_string(),
            fee_bps: 50,
        });
        let taxed = score(&fee_quote, 250);
        assert!(free.total_score > taxed.total_score);
        assert!(taxed.fees > 0.0);
    }

    #[test]
    fn reported_gas_above_default_lowers_the_score() {
        let default_gas = score(&quote("145670000"), 250);

        let mut heavy = quote("145670000");
        heavy.gas_estimate = Some(180_000);
        let heavy_score = score(&heavy, 250);
        assert!(default_gas.total_score > heavy_score.total_score);
    }

    #[test]
    fn sub_scores_saturate_at_one() {
        let mut q = quote("9999999999999999");
        q.gas_estimate = Some(5_000_000);
        let s = score(&q, 60_000);
        assert_eq!(s.output_amount, 1.0);
        assert_eq!(s.gas_estimate, 1.0);
        assert_eq!(s.latency, 1.0);
    }

    #[test]
    fn unknown_provider_gets_fallback_reliability() {
        let table = ReliabilityTable::default();
        assert_eq!(table.reliability_for("jupiter"), 0.95);
        assert_eq!(table.reliability_for("okx"), 0.90);
        assert_eq!(table.reliability_for("mystery"), 0.85);
    }

    fn ranked(provider: &str, out_amount: &str, response_time_ms: u64) -> RankedQuote {
        let q = quote(out_amount);
        let s = score_quote(
            &q,
            provider,
            response_time_ms,
            &ScoreWeights::default(),
            &ScoreNormalization::default(),
            &ReliabilityTable::default(),
        );
        RankedQuote {
            provider: provider.to_string(),
            quote: q,
            response_time_ms,
            score: s,
            is_cached: false,
        }
    }

    #[test]
    fn ranking_is_descending_with_lexicographic_tie_break() {
        let mut quotes = vec![
            ranked("okx", "145500000", 250),
            ranked("jupiter", "145670000", 250),
        ];
        rank_quotes(&mut quotes, false);
        assert_eq!(quotes[0].provider, "jupiter");

        // Identical quotes: provider name decides deterministically.
        let mut tied = vec![ranked("okx", "145670000", 250), ranked("jupiter", "145670000", 250)];
        // Same provider-independent dimensions, different reliability; force a
        // true tie by scoring through the same provider label.
        tied[0].score = tied[1].score;
        rank_quotes(&mut tied, false);
        assert_eq!(tied[0].provider, "jupiter");
    }

    #[test]
    fn latency_policy_prefers_the_fast_branch() {
        let slow_rich = ranked("jupiter", "145670000", 900);
        let fast_poor = ranked("okx", "140000000", 80);
        let mut quotes = vec![slow_rich, fast_poor];

        rank_quotes(&mut quotes, true);
        assert_eq!(quotes[0].provider, "okx");
        assert!(
            policy_metric(&quotes[0].score, true) >= policy_metric(&quotes[1].score, true),
            "best route must lead under the policy metric"
        );
    }
}
