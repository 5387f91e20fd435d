//! Prompt templates: placeholder rendering and on-disk template files

pub mod store;
pub mod template;

pub use store::{PromptError, PromptPair, PromptStore, StagePrompts};
pub use template::{contains_placeholder, format_strict, safe_format, TemplateError};
