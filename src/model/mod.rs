//! Model collaborators
//!
//! The pipeline only needs a tokenizer, the model's token limits, and a
//! `generate(conversation) -> text` call. How the model is hosted is up to
//! the implementation.

pub mod factory;
pub mod openai;

pub use factory::{create_model, is_openai_model, mask_secret};
pub use openai::{ChatEndpoint, ModelFamily, OpenAiChatModel};

use crate::context::{TokenLimits, Tokenizer};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Conversation role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One conversation entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Sampling parameters for one generation call
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub max_new_tokens: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_repetition_penalty")]
    pub repetition_penalty: f32,
}

fn default_temperature() -> f32 { 0.7 }
fn default_top_p() -> f32 { 0.9 }
fn default_repetition_penalty() -> f32 { 1.05 }

impl GenerationParams {
    pub fn new(max_new_tokens: usize) -> Self {
        Self {
            max_new_tokens,
            temperature: default_temperature(),
            top_p: default_top_p(),
            repetition_penalty: default_repetition_penalty(),
        }
    }
}

/// Model errors
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Initialization error: {0}")]
    InitializationError(String),

    #[error("API key not set for model '{model}'. Set {env_hint} in your environment or .env file")]
    MissingApiKey { model: String, env_hint: &'static str },

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// A chat model the pipeline can drive
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Model identifier
    fn name(&self) -> &str;

    /// Input/output limits, fixed for the lifetime of the model
    fn token_limits(&self) -> TokenLimits;

    /// Tokenizer used for prompt budgeting
    fn tokenizer(&self) -> &dyn Tokenizer;

    /// Generate a completion; `None` uses the model's full output budget
    async fn generate(
        &self,
        messages: &[Message],
        params: Option<&GenerationParams>,
    ) -> Result<String, ModelError>;
}
