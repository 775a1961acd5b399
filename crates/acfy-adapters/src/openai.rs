//! OpenAI chat-completions client.

use acfy_storage::{FetchError, HttpClientConfig, HttpFetcher};
use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::TextGenerator;

pub const DEFAULT_MODEL: &str = "gpt-4o";
const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenAiConfig {
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: default_model(),
            api_base: default_api_base(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatResponse {
    pub(crate) fn first_content(self) -> Option<String> {
        self.choices.into_iter().next().and_then(|c| c.message.content)
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: HttpFetcher,
    config: OpenAiConfig,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig, http: HttpClientConfig) -> anyhow::Result<Self> {
        Ok(Self {
            http: HttpFetcher::new(http)?,
            config,
        })
    }
}

#[async_trait]
impl TextGenerator for OpenAiClient {
    #[instrument(level = "info", skip(self, prompt), fields(model = %self.config.model, prompt_chars = prompt.len()))]
    async fn complete(&self, prompt: &str) -> Result<String, FetchError> {
        let url = format!("{}/chat/completions", self.config.api_base.trim_end_matches('/'));
        let body = ChatRequest {
            model: &self.config.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
        };
        let request = self
            .http
            .request(Method::POST, &url)
            .bearer_auth(&self.config.api_key)
            .json(&body);
        let response = self.http.send(request).await?;
        let parsed: ChatResponse = response.json()?;

        let content = parsed
            .first_content()
            .ok_or_else(|| FetchError::fatal(&url, "completion returned no choices"))?;
        debug!(chars = content.len(), "completion received");
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_is_a_single_user_message() {
        let body = ChatRequest {
            model: DEFAULT_MODEL,
            messages: [ChatMessage {
                role: "user",
                content: "write headlines",
            }],
        };
        let value = serde_json::to_value(&body).expect("serialize");
        assert_eq!(value["model"], "gpt-4o");
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["messages"].as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn fixture_completion_yields_first_choice() {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../fixtures/openai/rsa_completion.json");
        let parsed: ChatResponse = crate::read_json_file(path).expect("fixture");
        let content = parsed.first_content().expect("content");
        assert!(content.starts_with("```json"));
        assert!(content.contains("headlines"));
    }

    #[test]
    fn empty_choice_list_has_no_content() {
        let parsed: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).expect("parse");
        assert_eq!(parsed.first_content(), None);
    }
}
