//! Per-model context window limits
//!
//! Values are conservative figures taken from public model cards. A model that
//! is not listed gets the table's default.

use serde::{Deserialize, Serialize};

/// Input and output token limits for a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenLimits {
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl TokenLimits {
    pub const fn new(input_tokens: usize, output_tokens: usize) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }
}

/// Fallback for locally served checkpoints
pub const DEFAULT_LOCAL_LIMITS: TokenLimits = TokenLimits::new(8192, 1024);

/// Fallback for OpenAI models
pub const DEFAULT_OPENAI_LIMITS: TokenLimits = TokenLimits::new(8192, 4096);

/// Locally hosted transformer chat models
pub const LOCAL_MODEL_LIMITS: &[(&str, TokenLimits)] = &[
    ("google/gemma-3-27b-it", TokenLimits::new(8192, 2048)),
    ("meta-llama/CodeLlama-34B-Instruct-hf", TokenLimits::new(16384, 4096)),
    ("Qwen/Qwen3-32B", TokenLimits::new(32768, 2048)),
    ("Qwen/Qwen3-Coder-30B-A3B-Instruct", TokenLimits::new(32768, 16384)),
    ("google/gemma-3-1b-it", TokenLimits::new(8192, 2048)),
];

/// OpenAI hosted models
pub const OPENAI_MODEL_LIMITS: &[(&str, TokenLimits)] = &[
    ("gpt-4o", TokenLimits::new(128000, 16384)),
    ("gpt-4o-mini", TokenLimits::new(128000, 16384)),
    ("gpt-4", TokenLimits::new(8192, 8192)),
];

/// Resolve limits by exact name, then case-insensitive name, then the
/// longest matching prefix, then the default.
pub fn resolve_limits(
    model_name: &str,
    table: &[(&str, TokenLimits)],
    default: TokenLimits,
) -> TokenLimits {
    if let Some((_, limits)) = table.iter().find(|(name, _)| *name == model_name) {
        return *limits;
    }

    let lowered = model_name.to_lowercase();
    if let Some((_, limits)) = table
        .iter()
        .find(|(name, _)| name.to_lowercase() == lowered)
    {
        return *limits;
    }

    table
        .iter()
        .filter(|(name, _)| lowered.starts_with(&name.to_lowercase()))
        .max_by_key(|(name, _)| name.len())
        .map(|(_, limits)| *limits)
        .unwrap_or(default)
}

/// Limits for a locally served checkpoint
pub fn local_limits(model_name: &str) -> TokenLimits {
    resolve_limits(model_name, LOCAL_MODEL_LIMITS, DEFAULT_LOCAL_LIMITS)
}

/// Limits for an OpenAI model
pub fn openai_limits(model_name: &str) -> TokenLimits {
    resolve_limits(model_name, OPENAI_MODEL_LIMITS, DEFAULT_OPENAI_LIMITS)
}
