//! Language model collaborator
//!
//! The model only ever produces text. Everything it says is parsed and
//! validated downstream before it can reach the database.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{Config, ConfigError, LlmConfig};

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("OpenAI request failed: {0}")]
    Api(#[from] OpenAIError),

    #[error("No response from model")]
    EmptyResponse,
}

/// One earlier exchange: what the model said and what it was told back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub raw: String,
    pub feedback: String,
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Propose a query specification for `question`, given the failed turns so far
    async fn propose(&self, system: &str, question: &str, history: &[Turn]) -> Result<String, LlmError>;

    async fn summarize(&self, prompt: &str) -> Result<String, LlmError>;
}

pub struct OpenAiModel {
    client: Client<OpenAIConfig>,
    settings: LlmConfig,
}

impl OpenAiModel {
    /// Fails when `OPENAI_API_KEY` is not set
    pub fn from_config(settings: &LlmConfig) -> Result<Self, ConfigError> {
        let api_key = Config::get_openai_api_key()?;
        let mut openai = OpenAIConfig::new().with_api_key(api_key);
        if let Some(base) = &settings.api_base {
            openai = openai.with_api_base(base);
        }
        Ok(Self {
            client: Client::with_config(openai),
            settings: settings.clone(),
        })
    }

    async fn complete(&self, messages: Vec<ChatCompletionRequestMessage>) -> Result<String, LlmError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(self.settings.model.as_str())
            .messages(messages)
            .temperature(self.settings.temperature)
            .max_completion_tokens(self.settings.max_tokens)
            .build()?;

        let response = self.client.chat().create(request).await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(LlmError::EmptyResponse)
    }
}

#[async_trait]
impl LanguageModel for OpenAiModel {
    async fn propose(&self, system: &str, question: &str, history: &[Turn]) -> Result<String, LlmError> {
        let mut messages = vec![
            ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system)
                    .build()?,
            ),
            ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(question)
                    .build()?,
            ),
        ];

        for turn in history {
            messages.push(ChatCompletionRequestMessage::Assistant(
                ChatCompletionRequestAssistantMessageArgs::default()
                    .content(turn.raw.as_str())
                    .build()?,
            ));
            messages.push(ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(turn.feedback.as_str())
                    .build()?,
            ));
        }

        debug!(model = %self.settings.model, turns = history.len(), "Requesting specification");
        let content = self.complete(messages).await?;
        info!(attempt = history.len() + 1, response = %content, "Model response");
        Ok(content)
    }

    async fn summarize(&self, prompt: &str) -> Result<String, LlmError> {
        let messages = vec![ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content(prompt)
                .build()?,
        )];
        self.complete(messages).await
    }
}

/// Cut the JSON object out of a model reply, dropping markdown fences and chatter
pub fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();
    let unfenced = match trimmed.strip_prefix("```") {
        Some(rest) => {
            // skip the info string (`json`) up to the first newline
            let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
            body.trim_end().strip_suffix("```").unwrap_or(body).trim()
        }
        None => trimmed,
    };

    match (unfenced.find('{'), unfenced.rfind('}')) {
        (Some(start), Some(end)) if start < end => &unfenced[start..=end],
        _ => unfenced,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_plain() {
        assert_eq!(extract_json(r#" {"a": 1} "#), r#"{"a": 1}"#);
    }

    #[test]
    fn test_extract_fenced() {
        let text = "```json\n{\"root_entity\": \"Order\"}\n```";
        assert_eq!(extract_json(text), r#"{"root_entity": "Order"}"#);
    }

    #[test]
    fn test_extract_with_chatter() {
        let text = "Here is the query:\n{\"limit\": 5}\nHope this helps.";
        assert_eq!(extract_json(text), r#"{"limit": 5}"#);
    }

    #[test]
    fn test_extract_without_object() {
        assert_eq!(extract_json("no json here"), "no json here");
    }
}
