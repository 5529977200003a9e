use std::time::Duration;

use ai_agent::{
    ChatMessage, LanguageModelClient, LanguageModelRequest, LanguageModelResponse,
    LanguageModelUsage, ModelError,
};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
    total_tokens: Option<u32>,
}

/// Text completions over any OpenAI-compatible `/chat/completions` endpoint.
pub struct ChatCompletionsClient {
    http: Client,
    endpoint: String,
    model: String,
    auth_header: Option<String>,
    extra_headers: Vec<(&'static str, String)>,
    timeout: Duration,
}

impl ChatCompletionsClient {
    pub fn new(
        http: Client,
        base_url: &str,
        model: impl Into<String>,
        api_key: Option<&str>,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.into(),
            auth_header: api_key.map(|key| format!("Bearer {key}")),
            extra_headers: Vec::new(),
            timeout,
        }
    }

    pub fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.extra_headers.push((name, value.into()));
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl LanguageModelClient for ChatCompletionsClient {
    async fn complete(
        &self,
        request: &LanguageModelRequest,
    ) -> Result<LanguageModelResponse, ModelError> {
        let body = ChatRequest {
            model: &self.model,
            messages: &request.messages,
            temperature: request.options.temperature,
            max_tokens: request.options.max_tokens,
        };

        let mut builder = self
            .http
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&body);
        if let Some(auth) = &self.auth_header {
            builder = builder.header("Authorization", auth);
        }
        for (name, value) in &self.extra_headers {
            builder = builder.header(*name, value);
        }

        debug!(endpoint = %self.endpoint, model = %self.model, messages = request.messages.len(), "sending chat completion");
        let response = builder.send().await.map_err(classify_transport)?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(classify_status(status, detail));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|err| ModelError::Upstream(format!("unreadable completion body: {err}")))?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ModelError::Upstream("completion contained no message".into()))?;

        let usage = parsed
            .usage
            .map(|usage| LanguageModelUsage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            })
            .unwrap_or_default();
        Ok(LanguageModelResponse { text, usage })
    }
}

fn classify_transport(err: reqwest::Error) -> ModelError {
    if err.is_timeout() {
        ModelError::Timeout(err.to_string())
    } else {
        ModelError::Upstream(err.to_string())
    }
}

fn classify_status(status: StatusCode, detail: String) -> ModelError {
    let message = if detail.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {detail}")
    };
    match status {
        StatusCode::TOO_MANY_REQUESTS => ModelError::RateLimited(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ModelError::Timeout(message),
        _ => ModelError::Upstream(message),
    }
}
