//! Chat-completions collaborator over HTTP (Azure OpenAI or OpenAI).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{prompts, CodeGenerator, FixRequest};
use crate::error::{CodemendError, Result};

const DEFAULT_AZURE_API_VERSION: &str = "2023-05-15";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Which endpoint flavour to call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatProvider {
    Azure {
        endpoint: String,
        deployment: String,
        api_version: String,
    },
    OpenAi {
        base_url: String,
        model: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatConfig {
    pub provider: ChatProvider,
    pub api_key: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl ChatConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Azure settings win when any Azure variable is set; otherwise OpenAI.
    /// The error lists every missing required variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let azure = [
            "AZURE_OPENAI_API_KEY",
            "AZURE_OPENAI_ENDPOINT",
            "AZURE_OPENAI_CHAT_DEPLOYMENT_NAME",
        ];
        let azure_values: Vec<Option<String>> = azure.iter().map(|n| get(*n)).collect();
        let wants_azure = azure_values.iter().any(Option::is_some) || get("OPENAI_API_KEY").is_none();

        if wants_azure {
            let missing: Vec<&str> = azure
                .iter()
                .zip(&azure_values)
                .filter(|(_, v)| v.is_none())
                .map(|(n, _)| *n)
                .collect();
            if !missing.is_empty() {
                return Err(CodemendError::Config(format!(
                    "missing environment variables: {}",
                    missing.join(", ")
                )));
            }
            let mut values = azure_values.into_iter().flatten();
            let (Some(api_key), Some(endpoint), Some(deployment)) =
                (values.next(), values.next(), values.next())
            else {
                return Err(CodemendError::Config("incomplete Azure OpenAI settings".to_string()));
            };
            return Ok(Self {
                provider: ChatProvider::Azure {
                    endpoint: endpoint.trim_end_matches('/').to_string(),
                    deployment,
                    api_version: get("AZURE_OPENAI_API_VERSION")
                        .unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.to_string()),
                },
                api_key,
                temperature: 0.2,
                max_tokens: 2000,
            });
        }

        let api_key = get("OPENAI_API_KEY")
            .ok_or_else(|| CodemendError::Config("missing environment variables: OPENAI_API_KEY".to_string()))?;
        Ok(Self {
            provider: ChatProvider::OpenAi {
                base_url: get("OPENAI_BASE_URL")
                    .map(|u| u.trim_end_matches('/').to_string())
                    .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
                model: get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            },
            api_key,
            temperature: 0.2,
            max_tokens: 2000,
        })
    }

    fn url(&self) -> String {
        match &self.provider {
            ChatProvider::Azure {
                endpoint,
                deployment,
                api_version,
            } => format!(
                "{endpoint}/openai/deployments/{deployment}/chat/completions?api-version={api_version}"
            ),
            ChatProvider::OpenAi { base_url, .. } => format!("{base_url}/chat/completions"),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: Vec<Message<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    content: Option<String>,
}

/// [`CodeGenerator`] backed by a chat-completions endpoint.
pub struct ChatGenerator {
    config: ChatConfig,
    http: reqwest::Client,
}

impl ChatGenerator {
    pub fn new(config: ChatConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("codemend/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(ChatConfig::from_env()?)
    }

    async fn complete(&self, user: &str) -> Result<String> {
        let model = match &self.config.provider {
            ChatProvider::OpenAi { model, .. } => Some(model.as_str()),
            ChatProvider::Azure { .. } => None,
        };
        let body = ChatRequest {
            model,
            messages: vec![
                Message {
                    role: "system",
                    content: prompts::SYSTEM_PROMPT,
                },
                Message {
                    role: "user",
                    content: user,
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let request = self.http.post(self.config.url()).json(&body);
        let request = match self.config.provider {
            ChatProvider::Azure { .. } => request.header("api-key", &self.config.api_key),
            ChatProvider::OpenAi { .. } => request.bearer_auth(&self.config.api_key),
        };
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(CodemendError::Generation(format!(
                "chat completion failed with status {status}: {}",
                text.chars().take(500).collect::<String>()
            )));
        }

        let parsed: ChatResponse = serde_json::from_str(&text)?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(CodemendError::Generation(
                "chat completion returned no content".to_string(),
            ));
        }
        debug!(chars = content.len(), "chat completion received");
        Ok(content)
    }
}

#[async_trait]
impl CodeGenerator for ChatGenerator {
    async fn generate(&self, task: &str) -> Result<String> {
        self.complete(&prompts::generation_prompt(task)).await
    }

    async fn fix(&self, request: &FixRequest) -> Result<String> {
        self.complete(&prompts::fix_prompt(request)).await
    }

    async fn synthesize_input(&self, code: &str, language: &str) -> Result<String> {
        self.complete(&prompts::input_synthesis_prompt(code, language)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_azure_config_defaults_api_version() {
        let config = ChatConfig::from_lookup(lookup(&[
            ("AZURE_OPENAI_API_KEY", "k"),
            ("AZURE_OPENAI_ENDPOINT", "https://example.openai.azure.com/"),
            ("AZURE_OPENAI_CHAT_DEPLOYMENT_NAME", "gpt"),
        ]))
        .unwrap();
        assert_eq!(
            config.url(),
            "https://example.openai.azure.com/openai/deployments/gpt/chat/completions?api-version=2023-05-15"
        );
    }

    #[test]
    fn test_partial_azure_config_lists_missing() {
        let err = ChatConfig::from_lookup(lookup(&[("AZURE_OPENAI_API_KEY", "k")])).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("AZURE_OPENAI_ENDPOINT"));
        assert!(text.contains("AZURE_OPENAI_CHAT_DEPLOYMENT_NAME"));
        assert!(!text.contains("AZURE_OPENAI_API_KEY,"));
    }

    #[test]
    fn test_openai_fallback() {
        let config = ChatConfig::from_lookup(lookup(&[("OPENAI_API_KEY", "sk")])).unwrap();
        assert_eq!(config.url(), "https://api.openai.com/v1/chat/completions");
        assert!(matches!(config.provider, ChatProvider::OpenAi { ref model, .. } if model == "gpt-4o-mini"));
    }

    #[test]
    fn test_nothing_set_asks_for_azure() {
        let err = ChatConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, CodemendError::Config(_)));
        assert!(err.to_string().contains("AZURE_OPENAI_API_KEY"));
    }
}
