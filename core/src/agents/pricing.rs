//! Rough cost estimate in THB. Token counts are approximated from character
//! length since the vendors report usage inconsistently (ThaiLLM not at all).

use super::registry::price_for;
use crate::config::THB_RATE;

pub fn approx_tokens(text: &str) -> f64 {
    text.chars().count() as f64 / 3.0
}

pub fn calculate_cost(pricing_key: &str, input: &str, output: &str) -> f64 {
    let (input_price, output_price) = price_for(pricing_key);
    let in_tokens = approx_tokens(input);
    let out_tokens = approx_tokens(output);
    let usd = (in_tokens / 1e6 * input_price) + (out_tokens / 1e6 * output_price);
    usd * THB_RATE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approx_tokens_counts_characters_not_bytes() {
        assert_eq!(approx_tokens("abc"), 1.0);
        // Thai script is three bytes per character in UTF-8.
        assert_eq!(approx_tokens("ศาล"), 1.0);
    }

    #[test]
    fn cost_is_monotonic_in_input_length() {
        let mut previous = 0.0;
        for n in [0usize, 1, 10, 300, 3_000, 30_000] {
            let cost = calculate_cost("typhoon", &"ก".repeat(n), "answer");
            assert!(cost >= previous, "{cost} < {previous} at {n}");
            previous = cost;
        }
        assert!(calculate_cost("claude", &"x".repeat(3_000), "") > calculate_cost("claude", "x", ""));
    }

    #[test]
    fn known_price_matches_table() {
        // 3M characters in, nothing out: one million tokens at $0.10.
        let cost = calculate_cost("typhoon", &"x".repeat(3_000_000), "");
        assert!((cost - 0.10 * THB_RATE).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_is_free() {
        assert_eq!(calculate_cost("mystery", "in", "out"), 0.0);
    }
}
