//! OpenAI-compatible chat completions client
//!
//! Serves both OpenAI-hosted models and local inference servers that expose
//! the same `/chat/completions` API (vLLM, TGI) for transformer checkpoints.

use super::{ChatModel, GenerationParams, Message, ModelError};
use crate::context::{TiktokenTokenizer, TokenLimits, Tokenizer};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How the endpoint expects sampling parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    /// Standard OpenAI chat models
    OpenAi,
    /// `o1*` / `gpt-5*`: `max_completion_tokens` only, no sampling knobs
    OpenAiReasoning,
    /// Local OpenAI-compatible server, accepts `repetition_penalty` directly
    Local,
}

impl ModelFamily {
    pub fn for_openai_model(model_name: &str) -> Self {
        if model_name.starts_with("o1") || model_name.starts_with("gpt-5") {
            ModelFamily::OpenAiReasoning
        } else {
            ModelFamily::OpenAi
        }
    }
}

/// Endpoint settings for one model
pub struct ChatEndpoint {
    pub url: String,
    pub api_key: Option<Secret<String>>,
    pub timeout: Option<Duration>,
    pub max_retries: usize,
    pub retry_backoff: Duration,
}

impl ChatEndpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: None,
            timeout: None,
            max_retries: 0,
            retry_backoff: Duration::from_millis(500),
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.map(Secret::new);
        self
    }
}

/// Chat model backed by an OpenAI-compatible HTTP API
pub struct OpenAiChatModel {
    http: Client,
    endpoint: ChatEndpoint,
    model_name: String,
    family: ModelFamily,
    limits: TokenLimits,
    tokenizer: TiktokenTokenizer,
}

impl OpenAiChatModel {
    pub fn new(
        model_name: impl Into<String>,
        family: ModelFamily,
        limits: TokenLimits,
        endpoint: ChatEndpoint,
    ) -> Result<Self, ModelError> {
        let model_name = model_name.into();

        let mut builder = Client::builder();
        if let Some(timeout) = endpoint.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| ModelError::InitializationError(e.to_string()))?;

        let tokenizer = TiktokenTokenizer::for_model(&model_name)
            .map_err(|e| ModelError::InitializationError(e.to_string()))?;

        info!("Initialized chat model {} ({:?}) at {}", model_name, family, endpoint.url);

        Ok(Self {
            http,
            endpoint,
            model_name,
            family,
            limits,
            tokenizer,
        })
    }

    pub fn family(&self) -> ModelFamily {
        self.family
    }

    fn build_request<'a>(
        &'a self,
        messages: &'a [Message],
        params: &GenerationParams,
    ) -> ChatCompletionRequest<'a> {
        let max_tokens = params.max_new_tokens.min(self.limits.output_tokens);
        let mut request = ChatCompletionRequest {
            model: &self.model_name,
            messages,
            max_tokens: None,
            max_completion_tokens: None,
            temperature: None,
            top_p: None,
            frequency_penalty: None,
            repetition_penalty: None,
        };

        match self.family {
            ModelFamily::OpenAiReasoning => {
                request.max_completion_tokens = Some(max_tokens);
            }
            ModelFamily::OpenAi => {
                request.max_tokens = Some(max_tokens);
                request.temperature = Some(params.temperature);
                request.top_p = Some(params.top_p);
                request.frequency_penalty = Some((params.repetition_penalty - 1.0).max(0.0));
            }
            ModelFamily::Local => {
                request.max_tokens = Some(max_tokens);
                request.temperature = Some(params.temperature);
                request.top_p = Some(params.top_p);
                request.repetition_penalty = Some(params.repetition_penalty);
            }
        }

        request
    }

    async fn send_once(&self, request: &ChatCompletionRequest<'_>) -> Result<String, ModelError> {
        let mut req = self.http.post(&self.endpoint.url).json(request);

        if let Some(ref api_key) = self.endpoint.api_key {
            req = req.bearer_auth(api_key.expose_secret());
        }

        let response = req
            .send()
            .await
            .map_err(|e| ModelError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::ApiError(format!("HTTP {}: {}", status, body)));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::InvalidResponse("No choices in response".to_string()))?;

        Ok(choice
            .message
            .content
            .map(|c| c.trim().to_string())
            .unwrap_or_default())
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    fn name(&self) -> &str {
        &self.model_name
    }

    fn token_limits(&self) -> TokenLimits {
        self.limits
    }

    fn tokenizer(&self) -> &dyn Tokenizer {
        &self.tokenizer
    }

    async fn generate(
        &self,
        messages: &[Message],
        params: Option<&GenerationParams>,
    ) -> Result<String, ModelError> {
        let params = params
            .copied()
            .unwrap_or_else(|| GenerationParams::new(self.limits.output_tokens));
        let request = self.build_request(messages, &params);

        debug!(
            "Sending {} messages to {} (max tokens {})",
            messages.len(),
            self.model_name,
            params.max_new_tokens.min(self.limits.output_tokens)
        );

        let mut attempt = 0;
        loop {
            match self.send_once(&request).await {
                Ok(completion) => return Ok(completion),
                Err(e) if attempt < self.endpoint.max_retries => {
                    attempt += 1;
                    let backoff = retry_delay(self.endpoint.retry_backoff, attempt);
                    warn!("Generation attempt {} failed: {}, retrying in {:?}", attempt, e, backoff);
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    error!("Generation failed: {}", e);
                    return Err(e);
                }
            }
        }
    }
}

/// Highest doubling applied to the base backoff
const MAX_BACKOFF_EXPONENT: usize = 16;

/// Exponential backoff for the 1-based retry `attempt`
fn retry_delay(base: Duration, attempt: usize) -> Duration {
    let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT) as u32;
    base.saturating_mul(2u32.saturating_pow(exponent))
}

// OpenAI-compatible API types
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    repetition_penalty: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn model_for(server: &mockito::Server, name: &str, family: ModelFamily) -> OpenAiChatModel {
        let endpoint = ChatEndpoint::new(format!("{}/v1/chat/completions", server.url()))
            .with_api_key(Some("sk-test".to_string()));
        OpenAiChatModel::new(name, family, TokenLimits::new(8192, 1024), endpoint).unwrap()
    }

    fn reply(content: serde_json::Value) -> String {
        json!({"choices": [{"message": {"role": "assistant", "content": content}}]}).to_string()
    }

    #[test]
    fn test_family_detection() {
        assert_eq!(ModelFamily::for_openai_model("o1-mini"), ModelFamily::OpenAiReasoning);
        assert_eq!(ModelFamily::for_openai_model("gpt-5"), ModelFamily::OpenAiReasoning);
        assert_eq!(ModelFamily::for_openai_model("gpt-4o"), ModelFamily::OpenAi);
    }

    #[tokio::test]
    async fn test_standard_request_shape_and_trimmed_reply() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(Matcher::PartialJson(json!({
                "model": "gpt-4o",
                "max_tokens": 1024,
                "messages": [
                    {"role": "system", "content": "sys"},
                    {"role": "user", "content": "fix it"}
                ]
            })))
            .with_status(200)
            .with_body(reply(json!("  patched code\n")))
            .create_async()
            .await;

        let model = model_for(&server, "gpt-4o", ModelFamily::OpenAi);
        let params = GenerationParams::new(4096);
        let out = model
            .generate(&[Message::system("sys"), Message::user("fix it")], Some(&params))
            .await
            .unwrap();

        assert_eq!(out, "patched code");
        mock.assert_async().await;
    }

    #[test]
    fn test_frequency_penalty_conversion() {
        let server = mockito::Server::new();
        let model = model_for(&server, "gpt-4o", ModelFamily::OpenAi);
        let messages = [Message::user("hi")];
        let request = model.build_request(&messages, &GenerationParams::new(100));
        let value = serde_json::to_value(&request).unwrap();
        let penalty = value["frequency_penalty"].as_f64().unwrap();
        assert!((penalty - 0.05).abs() < 1e-6);
        assert_eq!(value["max_tokens"], 100);
        assert!(value.get("repetition_penalty").is_none());
    }

    #[test]
    fn test_reasoning_models_send_completion_budget_only() {
        let server = mockito::Server::new();
        let model = model_for(&server, "o1-preview", ModelFamily::OpenAiReasoning);
        let messages = [Message::user("hi")];
        let value = serde_json::to_value(model.build_request(&messages, &GenerationParams::new(5000))).unwrap();
        assert_eq!(value["max_completion_tokens"], 1024);
        assert!(value.get("max_tokens").is_none());
        assert!(value.get("temperature").is_none());
    }

    #[test]
    fn test_local_servers_receive_repetition_penalty() {
        let server = mockito::Server::new();
        let model = model_for(&server, "Qwen/Qwen3-32B", ModelFamily::Local);
        let messages = [Message::user("hi")];
        let value = serde_json::to_value(model.build_request(&messages, &GenerationParams::new(10))).unwrap();
        assert!(value.get("frequency_penalty").is_none());
        assert!((value["repetition_penalty"].as_f64().unwrap() - 1.05).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_null_content_is_empty() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_body(reply(serde_json::Value::Null))
            .create_async()
            .await;

        let model = model_for(&server, "gpt-4o", ModelFamily::OpenAi);
        let out = model.generate(&[Message::user("hi")], None).await.unwrap();
        assert_eq!(out, "");
    }

    #[tokio::test]
    async fn test_http_error_is_reported() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(429)
            .with_body("rate limited")
            .create_async()
            .await;

        let model = model_for(&server, "gpt-4o", ModelFamily::OpenAi);
        let err = model.generate(&[Message::user("hi")], None).await.unwrap_err();
        assert!(matches!(err, ModelError::ApiError(ref msg) if msg.contains("429")));
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let mut server = mockito::Server::new_async().await;
        let failing = server
            .mock("POST", "/v1/chat/completions")
            .with_status(503)
            .expect(1)
            .create_async()
            .await;
        let ok = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_body(reply(json!("done")))
            .create_async()
            .await;

        let mut endpoint = ChatEndpoint::new(format!("{}/v1/chat/completions", server.url()));
        endpoint.max_retries = 1;
        endpoint.retry_backoff = Duration::from_millis(1);
        let model = OpenAiChatModel::new("gpt-4o", ModelFamily::OpenAi, TokenLimits::new(8192, 1024), endpoint).unwrap();

        assert_eq!(model.generate(&[Message::user("hi")], None).await.unwrap(), "done");
        failing.assert_async().await;
        ok.assert_async().await;
    }

    #[test]
    fn test_retry_delay_doubles_then_caps() {
        let base = Duration::from_millis(10);
        assert_eq!(retry_delay(base, 1), Duration::from_millis(10));
        assert_eq!(retry_delay(base, 3), Duration::from_millis(40));
        assert_eq!(retry_delay(base, 17), retry_delay(base, 200));
        assert_eq!(retry_delay(Duration::ZERO, 64), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_many_retries_against_failing_server() {
        let mut server = mockito::Server::new_async().await;
        let failing = server
            .mock("POST", "/v1/chat/completions")
            .with_status(500)
            .expect(41)
            .create_async()
            .await;

        let mut endpoint = ChatEndpoint::new(format!("{}/v1/chat/completions", server.url()));
        endpoint.max_retries = 40;
        endpoint.retry_backoff = Duration::ZERO;
        let model = OpenAiChatModel::new("gpt-4o", ModelFamily::OpenAi, TokenLimits::new(8192, 1024), endpoint).unwrap();

        let err = model.generate(&[Message::user("hi")], None).await.unwrap_err();
        assert!(matches!(err, ModelError::ApiError(ref msg) if msg.contains("500")));
        failing.assert_async().await;
    }
}
