use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::tool::ToolDescription;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelOptions {
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            temperature: 0.4,
            max_tokens: Some(1024),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Role-tagged conversation plus the tool schemas the model may choose from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageModelRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub tools: Vec<ToolDescription>,
    #[serde(default)]
    pub options: ModelOptions,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LanguageModelUsage {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageModelResponse {
    pub text: String,
    pub usage: LanguageModelUsage,
}

impl LanguageModelResponse {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: LanguageModelUsage::default(),
        }
    }
}

/// Raw text transport to a language model. Implementations classify their
/// own failures into [`ModelError`] variants.
#[async_trait]
pub trait LanguageModelClient: Send + Sync {
    async fn complete(
        &self,
        request: &LanguageModelRequest,
    ) -> Result<LanguageModelResponse, ModelError>;
}
