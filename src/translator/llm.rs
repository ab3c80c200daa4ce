use async_trait::async_trait;
use reqwest::{Client, header};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum TranslationError {
    #[error("No language model API key is configured")]
    NotConfigured,
    #[error("Language model request failed: {0}")]
    Request(String),
    #[error("Language model returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Language model response contained no SQL")]
    NoSql,
    #[error("{0}")]
    Context(String),
    #[error("Failed to render prompt: {0}")]
    Prompt(String),
}

/// A chat-style completion endpoint.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_prompt: &str)
    -> Result<String, TranslationError>;
}

#[derive(Debug, Clone)]
pub struct ChatModelSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
    pub max_tokens: u32,
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiChatModel {
    client: Client,
    settings: ChatModelSettings,
}

impl OpenAiChatModel {
    pub fn new(settings: ChatModelSettings) -> Result<Self, TranslationError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| TranslationError::Request(e.to_string()))?;
        Ok(Self { client, settings })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        )
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize, Debug)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize, Debug)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize, Debug)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatResponse {
    fn first_content(self) -> Result<String, TranslationError> {
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or(TranslationError::NoSql)
    }
}

#[async_trait]
impl LanguageModel for OpenAiChatModel {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, TranslationError> {
        let api_key = self
            .settings
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or(TranslationError::NotConfigured)?;

        let request = ChatRequest {
            model: &self.settings.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            temperature: 0.0,
            max_tokens: self.settings.max_tokens,
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(api_key)
            .header(header::CONTENT_TYPE, "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TranslationError::Request(format!(
                        "timed out after {} seconds",
                        self.settings.timeout.as_secs()
                    ))
                } else {
                    TranslationError::Request(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            return Err(TranslationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<ChatResponse>()
            .await
            .map_err(|e| TranslationError::Request(format!("unreadable response: {e}")))?
            .first_content()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn settings(api_key: Option<&str>) -> ChatModelSettings {
        ChatModelSettings {
            api_key: api_key.map(str::to_string),
            base_url: "https://api.openai.com/v1/".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            timeout: Duration::from_secs(60),
            max_tokens: 500,
        }
    }

    #[tokio::test]
    async fn test_missing_api_key_is_not_configured() {
        let model = OpenAiChatModel::new(settings(None)).unwrap();
        let err = model.complete("system", "user").await.unwrap_err();
        assert!(matches!(err, TranslationError::NotConfigured));
    }

    #[test]
    fn test_endpoint_joins_base_url() {
        let model = OpenAiChatModel::new(settings(Some("sk-test"))).unwrap();
        assert_eq!(model.endpoint(), "https://api.openai.com/v1/chat/completions");
    }

    #[test]
    fn test_first_content_reads_first_choice() {
        let response: ChatResponse = serde_json::from_value(json!({
            "choices": [
                { "message": { "role": "assistant", "content": "  SELECT 1  " } },
                { "message": { "role": "assistant", "content": "SELECT 2" } }
            ]
        }))
        .unwrap();
        assert_eq!(response.first_content().unwrap(), "SELECT 1");
    }

    #[test]
    fn test_empty_choices_yield_no_sql() {
        let response: ChatResponse = serde_json::from_value(json!({ "choices": [] })).unwrap();
        assert!(matches!(response.first_content(), Err(TranslationError::NoSql)));

        let response: ChatResponse =
            serde_json::from_value(json!({ "choices": [{ "message": { "content": null } }] }))
                .unwrap();
        assert!(matches!(response.first_content(), Err(TranslationError::NoSql)));
    }
}
