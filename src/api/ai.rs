use async_trait::async_trait;
use openai_api_rs::v1::{api::OpenAIClient, chat_completion};
use std::env;
use std::time::Duration;
use thiserror::Error;

const AI_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum AiError {
    #[error("ai request failed: {0}")]
    Upstream(String),
    #[error("ai request timed out")]
    Timeout,
    #[error("ai returned an empty completion")]
    Empty,
}

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub prompt: String,
    pub system_prompt: String,
    pub temperature: f64,
    pub max_tokens: i64,
}

/// Opaque text-generation collaborator. May fail, may return non-JSON;
/// callers parse defensively.
#[async_trait]
pub trait AiClient: Send + Sync {
    async fn generate(&self, request: &GenerateRequest) -> Result<String, AiError>;
}

pub struct OpenRouterClient {
    model: String,
}

impl OpenRouterClient {
    pub fn from_env() -> Self {
        let model = env::var("OPENROUTER_MODEL").unwrap_or_else(|_| "openai/gpt-4o-mini".to_string());
        Self { model }
    }

    fn create_client(&self) -> Result<OpenAIClient, AiError> {
        let api_key = env::var("OPENROUTER_API_KEY")
            .map_err(|_| AiError::Upstream("OPENROUTER_API_KEY not set".to_string()))?;
        OpenAIClient::builder()
            .with_endpoint("https://openrouter.ai/api/v1")
            .with_api_key(api_key)
            .build()
            .map_err(|e| AiError::Upstream(e.to_string()))
    }
}

#[async_trait]
impl AiClient for OpenRouterClient {
    async fn generate(&self, request: &GenerateRequest) -> Result<String, AiError> {
        let client = self.create_client()?;

        let messages = vec![
            chat_completion::ChatCompletionMessage {
                role: chat_completion::MessageRole::system,
                content: chat_completion::Content::Text(request.system_prompt.clone()),
                name: None,
                tool_calls: None,
                tool_call_id: None,
            },
            chat_completion::ChatCompletionMessage {
                role: chat_completion::MessageRole::user,
                content: chat_completion::Content::Text(request.prompt.clone()),
                name: None,
                tool_calls: None,
                tool_call_id: None,
            },
        ];

        let completion_request =
            chat_completion::ChatCompletionRequest::new(self.model.clone(), messages)
                .temperature(request.temperature)
                .max_tokens(request.max_tokens);

        let result = tokio::time::timeout(AI_TIMEOUT, client.chat_completion(completion_request))
            .await
            .map_err(|_| AiError::Timeout)?
            .map_err(|e| AiError::Upstream(e.to_string()))?;

        result
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .filter(|text| !text.trim().is_empty())
            .ok_or(AiError::Empty)
    }
}
