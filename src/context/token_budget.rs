//! Token budget enforcement for the injected prompt field
//!
//! The budget for a placeholder is what remains of the model's input window
//! after the system prompt, the user template rendered with an empty
//! placeholder, and a safety margin:
//! - safety margin = max(safety_min_tokens, round(safety_ratio * max_input_tokens))
//! - allowed = max(min_allowed_tokens, max_input_tokens - overhead - safety margin)
//!
//! The `min_allowed_tokens` floor always wins, so a tiny window can still
//! produce a prompt larger than the nominal budget.

use super::tokenizer::Tokenizer;
use crate::prompt::format_strict;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use tracing::debug;

/// Safety parameters for placeholder truncation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TruncationPolicy {
    pub safety_ratio: f64,
    pub safety_min_tokens: usize,
    pub min_allowed_tokens: usize,
}

impl Default for TruncationPolicy {
    fn default() -> Self {
        Self {
            safety_ratio: 0.1,
            safety_min_tokens: 64,
            min_allowed_tokens: 128,
        }
    }
}

impl TruncationPolicy {
    /// Safety margin reserved out of the input window
    pub fn safety_margin(&self, max_input_tokens: usize) -> usize {
        let proportional = (self.safety_ratio * max_input_tokens as f64).round();
        let proportional = if proportional.is_finite() && proportional > 0.0 {
            proportional as usize
        } else {
            0
        };
        self.safety_min_tokens.max(proportional)
    }
}

/// Token accounting for one placeholder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceholderBudget {
    pub overhead: usize,
    pub safety_margin: usize,
    pub allowed: usize,
}

/// Compute how many tokens the placeholder content may use
pub fn placeholder_budget(
    tokenizer: &dyn Tokenizer,
    max_input_tokens: usize,
    system_prompt: &str,
    user_template: &str,
    placeholder_key: &str,
    policy: &TruncationPolicy,
) -> PlaceholderBudget {
    // Other unresolved placeholders make the render fail; measure the raw template then.
    let empty_user = format_strict(user_template, |key| (key == placeholder_key).then_some(""))
        .map(Cow::Owned)
        .unwrap_or(Cow::Borrowed(user_template));

    let overhead = tokenizer.count(system_prompt) + tokenizer.count(&empty_user);
    let safety_margin = policy.safety_margin(max_input_tokens);
    let allowed = policy.min_allowed_tokens.max(
        max_input_tokens
            .saturating_sub(overhead)
            .saturating_sub(safety_margin),
    );

    PlaceholderBudget {
        overhead,
        safety_margin,
        allowed,
    }
}

/// Truncate `text` so the rendered prompt fits the model input window.
///
/// Text that already fits is returned borrowed and byte-identical.
pub fn truncate_text_for_prompt<'a>(
    tokenizer: &dyn Tokenizer,
    max_input_tokens: usize,
    system_prompt: &str,
    user_template: &str,
    placeholder_key: &str,
    text: &'a str,
    policy: &TruncationPolicy,
) -> Cow<'a, str> {
    let budget = placeholder_budget(
        tokenizer,
        max_input_tokens,
        system_prompt,
        user_template,
        placeholder_key,
        policy,
    );

    let ids = tokenizer.encode(text);
    if ids.len() <= budget.allowed {
        return Cow::Borrowed(text);
    }

    debug!(
        "Truncating '{}' from {} to {} tokens (overhead {}, margin {})",
        placeholder_key,
        ids.len(),
        budget.allowed,
        budget.overhead,
        budget.safety_margin
    );

    Cow::Owned(tokenizer.decode(&ids[..budget.allowed]))
}
