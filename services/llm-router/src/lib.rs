//! Picks the chat-completions transport for a configured model route.

mod chat;

use std::sync::Arc;
use std::time::Duration;

use ai_agent::LanguageModelClient;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use chat::ChatCompletionsClient;

pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    #[default]
    OpenRouter,
    /// Any server speaking the OpenAI chat-completions protocol.
    OpenAiCompatible,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRoute {
    #[serde(default)]
    pub provider: Provider,
    #[serde(default = "ModelRoute::default_model")]
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default = "ModelRoute::default_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl ModelRoute {
    fn default_model() -> String {
        DEFAULT_MODEL.to_string()
    }

    fn default_timeout_secs() -> u64 {
        60
    }
}

impl Default for ModelRoute {
    fn default() -> Self {
        Self {
            provider: Provider::OpenRouter,
            model: Self::default_model(),
            base_url: None,
            api_key: None,
            request_timeout_secs: Self::default_timeout_secs(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouterError {
    #[error("no API key configured for {0:?}; set OPENROUTER_API_KEY or model.api_key")]
    MissingApiKey(Provider),
    #[error("provider {0:?} requires model.base_url")]
    MissingBaseUrl(Provider),
    #[error("model name is empty")]
    MissingModel,
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

#[derive(Clone)]
pub struct LlmRouter {
    http: Client,
}

impl LlmRouter {
    pub fn new() -> Result<Self, RouterError> {
        let http = Client::builder()
            .user_agent(concat!("browser-agent/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| RouterError::Client(err.to_string()))?;
        Ok(Self { http })
    }

    pub fn route(&self, route: &ModelRoute) -> Result<Arc<dyn LanguageModelClient>, RouterError> {
        if route.model.trim().is_empty() {
            return Err(RouterError::MissingModel);
        }
        let timeout = Duration::from_secs(route.request_timeout_secs.max(1));
        let api_key = route.api_key.as_deref().filter(|key| !key.is_empty());

        let client = match route.provider {
            Provider::OpenRouter => {
                let api_key = api_key.ok_or(RouterError::MissingApiKey(Provider::OpenRouter))?;
                let base_url = route.base_url.as_deref().unwrap_or(OPENROUTER_BASE_URL);
                ChatCompletionsClient::new(
                    self.http.clone(),
                    base_url,
                    route.model.clone(),
                    Some(api_key),
                    timeout,
                )
                .with_header("X-Title", "browser-agent")
            }
            Provider::OpenAiCompatible => {
                let base_url = route
                    .base_url
                    .as_deref()
                    .ok_or(RouterError::MissingBaseUrl(Provider::OpenAiCompatible))?;
                ChatCompletionsClient::new(
                    self.http.clone(),
                    base_url,
                    route.model.clone(),
                    api_key,
                    timeout,
                )
            }
        };
        Ok(Arc::new(client))
    }
}
