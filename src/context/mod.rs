//! Context window management
//!
//! Tokenizers, per-model token limits, and the placeholder budgeter that fits
//! one dataset field into a model's input window.

pub mod limits;
pub mod token_budget;
pub mod tokenizer;

pub use limits::{local_limits, openai_limits, resolve_limits, TokenLimits};
pub use token_budget::{placeholder_budget, truncate_text_for_prompt, PlaceholderBudget, TruncationPolicy};
pub use tokenizer::{TiktokenTokenizer, TokenId, Tokenizer};
