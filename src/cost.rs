//! Token usage accounting and cost calculation.
//!
//! Converts the usage object reported by an OpenAI-compatible upstream into a
//! USD cost under a per-model pricing table. Pricing is expressed in dollars
//! per million tokens, with a reduced rate for prompt tokens served from the
//! upstream's cache.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Token usage reported by the upstream.
///
/// All fields are optional: absence means "unknown" and contributes zero to
/// the cost. Cached tokens arrive nested under `prompt_tokens_details`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Usage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens_details: Option<PromptTokensDetails>,
}

/// Breakdown of prompt tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct PromptTokensDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_tokens: Option<u64>,
}

impl Usage {
    /// Cached prompt tokens, treating absence as zero.
    pub fn cached_tokens(&self) -> u64 {
        self.prompt_tokens_details
            .as_ref()
            .and_then(|d| d.cached_tokens)
            .unwrap_or(0)
    }
}

/// Per-model pricing in USD per million tokens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct CostConfig {
    /// Rate for non-cached prompt tokens.
    #[serde(default)]
    pub input: f64,
    /// Rate for cached prompt tokens.
    #[serde(default)]
    pub cached: f64,
    /// Rate for completion tokens.
    #[serde(default)]
    pub output: f64,
}

/// Pricing table keyed by model identifier (lowercase).
///
/// The `default` entry is a struct field rather than a map key so it always
/// exists; it stays all-zero unless overridden in config, which makes
/// unrecognized models non-billable.
#[derive(Debug, Clone, Deserialize)]
pub struct PricingTable {
    #[serde(default)]
    pub models: HashMap<String, CostConfig>,
    #[serde(default)]
    pub default: CostConfig,
}

impl Default for PricingTable {
    fn default() -> Self {
        let mut models = HashMap::new();
        models.insert(
            "glm-4.5-air".to_string(),
            CostConfig {
                input: 0.2,
                cached: 0.03,
                output: 1.1,
            },
        );
        models.insert(
            "glm-4.6".to_string(),
            CostConfig {
                input: 0.6,
                cached: 0.11,
                output: 2.2,
            },
        );
        Self {
            models,
            default: CostConfig::default(),
        }
    }
}

impl PricingTable {
    /// Look up pricing by case-insensitive exact match, falling back to the
    /// default entry for unrecognized models.
    pub fn lookup(&self, model: &str) -> &CostConfig {
        self.models
            .get(&model.to_lowercase())
            .unwrap_or(&self.default)
    }

    /// Lowercase all model keys so lookup is case-insensitive regardless of
    /// how the config file spells them.
    pub fn normalize(&mut self) {
        let models = std::mem::take(&mut self.models);
        self.models = models
            .into_iter()
            .map(|(k, v)| (k.to_lowercase(), v))
            .collect();
    }
}

/// Round to 6 decimal places of currency precision.
fn round6(value: f64) -> f64 {
    (value * 1e6).round() / 1e6
}

/// Compute the total USD cost for a request.
///
/// Returns `None` when no usage object was observed. Cached tokens are billed
/// at the cached rate and subtracted from billable input tokens.
///
/// A computed total of exactly zero also returns `None`: downstream consumers
/// rely on `None` meaning "not billable / unknown", so a zero-priced model is
/// indistinguishable from absent usage. Preserve this convention.
pub fn calculate_cost(pricing: &PricingTable, model: &str, usage: Option<&Usage>) -> Option<f64> {
    let usage = usage?;
    let rates = pricing.lookup(model);

    let prompt = usage.prompt_tokens.unwrap_or(0) as f64;
    let completion = usage.completion_tokens.unwrap_or(0) as f64;
    let cached = usage.cached_tokens() as f64;

    let (input_cost, cached_cost) = if cached > 0.0 {
        (
            ((prompt - cached) / 1e6) * rates.input,
            (cached / 1e6) * rates.cached,
        )
    } else {
        ((prompt / 1e6) * rates.input, 0.0)
    };
    let output_cost = (completion / 1e6) * rates.output;

    // Round before the zero check: a total that rounds to 0.000000 is
    // reported as not billable.
    let total = round6(input_cost + cached_cost + output_cost);
    if total > 0.0 {
        Some(total)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn glm_pricing() -> PricingTable {
        let mut models = HashMap::new();
        models.insert(
            "glm-4.6".to_string(),
            CostConfig {
                input: 0.6,
                cached: 0.11,
                output: 2.2,
            },
        );
        PricingTable {
            models,
            default: CostConfig::default(),
        }
    }

    fn usage(prompt: u64, completion: u64, cached: Option<u64>) -> Usage {
        Usage {
            prompt_tokens: Some(prompt),
            completion_tokens: Some(completion),
            total_tokens: Some(prompt + completion),
            prompt_tokens_details: cached.map(|c| PromptTokensDetails {
                cached_tokens: Some(c),
            }),
        }
    }

    #[test]
    fn absent_usage_is_none_not_zero() {
        let pricing = glm_pricing();
        assert_eq!(calculate_cost(&pricing, "glm-4.6", None), None);
    }

    #[test]
    fn cached_tokens_billed_at_reduced_rate() {
        let pricing = glm_pricing();
        let u = usage(1000, 500, Some(200));
        // 800/1e6*0.6 + 200/1e6*0.11 + 500/1e6*2.2
        assert_eq!(calculate_cost(&pricing, "glm-4.6", Some(&u)), Some(0.001602));
    }

    #[test]
    fn no_cached_tokens_bills_full_prompt() {
        let pricing = glm_pricing();
        let u = usage(1000, 500, None);
        // 1000/1e6*0.6 + 500/1e6*2.2
        assert_eq!(calculate_cost(&pricing, "glm-4.6", Some(&u)), Some(0.0017));
    }

    #[test]
    fn zero_cached_tokens_same_as_absent() {
        let pricing = glm_pricing();
        let with_zero = usage(1000, 500, Some(0));
        let without = usage(1000, 500, None);
        assert_eq!(
            calculate_cost(&pricing, "glm-4.6", Some(&with_zero)),
            calculate_cost(&pricing, "glm-4.6", Some(&without)),
        );
    }

    #[test]
    fn model_match_is_case_insensitive() {
        let pricing = glm_pricing();
        let u = usage(1000, 500, None);
        assert_eq!(
            calculate_cost(&pricing, "GLM-4.6", Some(&u)),
            calculate_cost(&pricing, "glm-4.6", Some(&u)),
        );
    }

    #[test]
    fn unknown_model_falls_back_to_zero_default() {
        let pricing = glm_pricing();
        let u = usage(1_000_000, 1_000_000, None);
        assert_eq!(calculate_cost(&pricing, "gpt-4o", Some(&u)), None);
    }

    #[test]
    fn zero_total_reported_as_none() {
        let pricing = glm_pricing();
        let u = usage(0, 0, None);
        assert_eq!(calculate_cost(&pricing, "glm-4.6", Some(&u)), None);
    }

    #[test]
    fn missing_token_fields_treated_as_zero() {
        let pricing = glm_pricing();
        let u = Usage {
            completion_tokens: Some(500),
            ..Default::default()
        };
        // Only output tokens contribute: 500/1e6*2.2
        assert_eq!(calculate_cost(&pricing, "glm-4.6", Some(&u)), Some(0.0011));
    }

    #[test]
    fn rounds_to_six_decimals() {
        let mut pricing = glm_pricing();
        pricing.models.insert(
            "tiny".to_string(),
            CostConfig {
                input: 0.0000019,
                cached: 0.0,
                output: 0.0,
            },
        );
        let u = usage(1, 0, None);
        // 1/1e6 * 0.0000019 rounds below 1e-6 precision to zero -> None
        assert_eq!(calculate_cost(&pricing, "tiny", Some(&u)), None);
    }

    #[test]
    fn normalize_lowercases_model_keys() {
        let mut pricing = PricingTable {
            models: HashMap::from([(
                "GLM-4.6".to_string(),
                CostConfig {
                    input: 0.6,
                    cached: 0.11,
                    output: 2.2,
                },
            )]),
            default: CostConfig::default(),
        };
        pricing.normalize();
        assert!(pricing.models.contains_key("glm-4.6"));
        assert!(!pricing.models.contains_key("GLM-4.6"));
    }

    #[test]
    fn usage_deserializes_nested_cached_tokens() {
        let u: Usage = serde_json::from_str(
            r#"{"prompt_tokens":1000,"completion_tokens":500,"total_tokens":1500,
                "prompt_tokens_details":{"cached_tokens":200}}"#,
        )
        .unwrap();
        assert_eq!(u.cached_tokens(), 200);
        assert_eq!(u.prompt_tokens, Some(1000));
    }

    #[test]
    fn builtin_pricing_covers_glm_models() {
        let pricing = PricingTable::default();
        assert_eq!(pricing.lookup("glm-4.6").input, 0.6);
        assert_eq!(pricing.lookup("glm-4.5-air").output, 1.1);
        assert_eq!(pricing.lookup("nonexistent").input, 0.0);
    }
}
