//! Model pricing and per-call cost estimation.

use serde::{Deserialize, Serialize};

/// USD price per million tokens for one model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pricing {
    pub input_usd_per_1m: f64,
    pub output_usd_per_1m: f64,
}

const MODEL_PRICING: &[(&str, Pricing)] = &[(
    "gpt-4o-mini",
    Pricing {
        input_usd_per_1m: 0.15,
        output_usd_per_1m: 0.60,
    },
)];

pub fn pricing_for(model: &str) -> Option<Pricing> {
    MODEL_PRICING
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, p)| *p)
}

/// Estimated cost of a call, rounded to micro-dollars.
///
/// Returns `None` when the model has no pricing entry. Missing token counts count as zero.
pub fn estimate_cost_usd(
    model: &str,
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
) -> Option<f64> {
    let pricing = pricing_for(model)?;
    let cost = input_tokens.unwrap_or(0) as f64 * (pricing.input_usd_per_1m / 1_000_000.0)
        + output_tokens.unwrap_or(0) as f64 * (pricing.output_usd_per_1m / 1_000_000.0);
    Some((cost * 1e6).round() / 1e6)
}

/// How the cost booked against the ledger was arrived at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostBasis {
    /// Computed from reported token usage and the pricing table.
    Measured,
    /// The provider reported no token usage; the fallback estimate was booked.
    UnknownUsage,
    /// The model has no pricing entry; the fallback estimate was booked.
    UnknownPricing,
}

/// A cost to add to the ledger, tagged with where it came from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CallCost {
    pub usd: f64,
    pub basis: CostBasis,
}

/// Resolve the cost of one call, falling back to `fallback_usd` when it cannot be measured.
pub fn resolve_call_cost(
    model: &str,
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
    fallback_usd: f64,
) -> CallCost {
    if input_tokens.is_none() && output_tokens.is_none() {
        return CallCost {
            usd: fallback_usd,
            basis: CostBasis::UnknownUsage,
        };
    }
    match estimate_cost_usd(model, input_tokens, output_tokens) {
        Some(usd) => CallCost {
            usd,
            basis: CostBasis::Measured,
        },
        None => CallCost {
            usd: fallback_usd,
            basis: CostBasis::UnknownPricing,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_cost_for_known_model() {
        // 1000 * 0.15e-6 + 500 * 0.6e-6 = 0.00015 + 0.0003
        let cost = estimate_cost_usd("gpt-4o-mini", Some(1000), Some(500)).unwrap();
        assert!((cost - 0.00045).abs() < 1e-12);
    }

    #[test]
    fn test_estimate_cost_unknown_model_is_none() {
        assert_eq!(estimate_cost_usd("other-model", Some(1), Some(1)), None);
    }

    #[test]
    fn test_estimate_cost_rounds_to_micro_dollars() {
        let cost = estimate_cost_usd("gpt-4o-mini", Some(1), Some(1)).unwrap();
        assert_eq!(cost, 0.000001);
    }

    #[test]
    fn test_resolve_call_cost_distinguishes_fallback_reasons() {
        let unknown_usage = resolve_call_cost("gpt-4o-mini", None, None, 0.001);
        assert_eq!(unknown_usage.basis, CostBasis::UnknownUsage);
        assert_eq!(unknown_usage.usd, 0.001);

        let unknown_pricing = resolve_call_cost("mystery", Some(10), Some(10), 0.001);
        assert_eq!(unknown_pricing.basis, CostBasis::UnknownPricing);
        assert_eq!(unknown_pricing.usd, 0.001);

        let measured = resolve_call_cost("gpt-4o-mini", Some(2000), None, 0.001);
        assert_eq!(measured.basis, CostBasis::Measured);
        assert!((measured.usd - 0.0003).abs() < 1e-12);
    }
}
