//! Model construction from a model identifier

use super::{ChatEndpoint, ChatModel, ModelError, ModelFamily, OpenAiChatModel};
use crate::config::LlmConfig;
use crate::context::{local_limits, openai_limits};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const OPENAI_PREFIXES: &[&str] = &[
    "gpt-",
    "chatgpt",
    "text-davinci",
    "text-curie",
    "text-babbage",
    "text-ada",
    "o1-",
];

/// Whether the identifier names an OpenAI-hosted model
pub fn is_openai_model(model_name: &str) -> bool {
    let lowered = model_name.to_lowercase();
    lowered == "o1" || OPENAI_PREFIXES.iter().any(|p| lowered.starts_with(p))
}

/// Mask a secret for log output, keeping only its edges
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

/// Build the chat model for `model_name`.
///
/// OpenAI identifiers go to the OpenAI API and require a key; everything else
/// is served by the local OpenAI-compatible endpoint.
pub fn create_model(model_name: &str, config: &LlmConfig) -> Result<Arc<dyn ChatModel>, ModelError> {
    let timeout = config.timeout_secs.map(Duration::from_secs);

    let model = if is_openai_model(model_name) {
        let api_key = config
            .openai_api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ModelError::MissingApiKey {
                model: model_name.to_string(),
                env_hint: "OPENAI_API_KEY",
            })?;
        info!("Using OpenAI API key {}", mask_secret(&api_key));

        let mut endpoint = ChatEndpoint::new(&config.openai_api_url).with_api_key(Some(api_key));
        endpoint.timeout = timeout;
        endpoint.max_retries = config.max_retries;

        OpenAiChatModel::new(
            model_name,
            ModelFamily::for_openai_model(model_name),
            openai_limits(model_name),
            endpoint,
        )?
    } else {
        let mut endpoint =
            ChatEndpoint::new(&config.local_endpoint).with_api_key(config.local_api_key.clone());
        endpoint.timeout = timeout;
        endpoint.max_retries = config.max_retries;

        OpenAiChatModel::new(model_name, ModelFamily::Local, local_limits(model_name), endpoint)?
    };

    Ok(Arc::new(model))
}
