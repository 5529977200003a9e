use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use jsonschema::{Draft, JSONSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Static classification a tool declares about its own side effects. The
/// confirmation gate reads this, never anything the model says.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DangerCategory {
    None,
    Financial,
    Destructive,
    AccountModifying,
}

impl DangerCategory {
    pub const ALL: [DangerCategory; 4] = [
        Self::None,
        Self::Financial,
        Self::Destructive,
        Self::AccountModifying,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Financial => "financial",
            Self::Destructive => "destructive",
            Self::AccountModifying => "account-modifying",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "none" => Some(Self::None),
            "financial" => Some(Self::Financial),
            "destructive" => Some(Self::Destructive),
            "account-modifying" | "account_modifying" => Some(Self::AccountModifying),
            _ => None,
        }
    }

    pub fn is_dangerous(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl FromStr for DangerCategory {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value).ok_or(())
    }
}

impl fmt::Display for DangerCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescription {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub input_schema: Value,
    pub danger: DangerCategory,
}

impl ToolDescription {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        danger: DangerCategory,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            danger,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: Value,
    #[serde(default)]
    pub metadata: IndexMap<String, Value>,
}

impl ToolOutput {
    pub fn new(content: Value) -> Self {
        Self {
            content,
            metadata: IndexMap::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transient,
    Permanent,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => f.write_str("transient"),
            Self::Permanent => f.write_str("permanent"),
        }
    }
}

/// Classified tool failure. Tools do not roll back partial side effects;
/// the classification is what lets the caller decide whether to retry.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum ToolExecutionError {
    #[error("transient tool failure: {0}")]
    Transient(String),
    #[error("permanent tool failure: {0}")]
    Permanent(String),
}

impl ToolExecutionError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Transient(_) => FailureKind::Transient,
            Self::Permanent(_) => FailureKind::Permanent,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Transient(message) | Self::Permanent(message) => message,
        }
    }
}

pub type ToolResult = Result<ToolOutput, ToolExecutionError>;

#[async_trait]
pub trait BrowserTool: Send + Sync {
    fn description(&self) -> &ToolDescription;
    async fn invoke(&self, args: Value) -> ToolResult;
}

/// Rejection raised at the validation boundary between model output and
/// tool execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolCallError {
    #[error("unknown tool `{0}`")]
    UnknownTool(String),
    #[error("arguments for `{tool}` violate its schema: {reason}")]
    InvalidArguments { tool: String, reason: String },
    #[error("tool `{tool}` declares an invalid input schema: {reason}")]
    InvalidSchema { tool: String, reason: String },
    #[error("tool `{0}` is already registered")]
    Duplicate(String),
}

/// A model-proposed call that passed schema validation against a known tool.
#[derive(Clone)]
pub struct ValidatedCall {
    pub tool: Arc<dyn BrowserTool>,
    pub description: ToolDescription,
    pub arguments: Value,
}

impl fmt::Debug for ValidatedCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatedCall")
            .field("tool", &self.description.name)
            .field("danger", &self.description.danger)
            .field("arguments", &self.arguments)
            .finish()
    }
}

struct ToolRecord {
    description: ToolDescription,
    schema: JSONSchema,
    handler: Arc<dyn BrowserTool>,
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: IndexMap<String, ToolRecord>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn BrowserTool>) -> Result<(), ToolCallError> {
        let description = tool.description().clone();
        if self.tools.contains_key(&description.name) {
            return Err(ToolCallError::Duplicate(description.name));
        }
        let schema = compile_schema(&description)?;
        self.tools.insert(
            description.name.clone(),
            ToolRecord {
                description,
                schema,
                handler: tool,
            },
        );
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn describe(&self, name: &str) -> Option<&ToolDescription> {
        self.tools.get(name).map(|record| &record.description)
    }

    pub fn descriptions(&self) -> Vec<ToolDescription> {
        self.tools
            .values()
            .map(|record| record.description.clone())
            .collect()
    }

    pub fn danger_index(&self) -> BTreeMap<String, DangerCategory> {
        self.tools
            .values()
            .map(|record| (record.description.name.clone(), record.description.danger))
            .collect()
    }

    /// Looks the tool up and checks the arguments against its declared
    /// schema. A missing argument object is treated as `{}`.
    pub fn validate_call(&self, name: &str, args: &Value) -> Result<ValidatedCall, ToolCallError> {
        let record = self
            .tools
            .get(name)
            .ok_or_else(|| ToolCallError::UnknownTool(name.to_string()))?;
        let arguments = if args.is_null() {
            Value::Object(Default::default())
        } else {
            args.clone()
        };

        if let Err(errors) = record.schema.validate(&arguments) {
            let reason = errors
                .map(|err| err.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ToolCallError::InvalidArguments {
                tool: name.to_string(),
                reason: if reason.is_empty() {
                    "schema validation failed".to_string()
                } else {
                    reason
                },
            });
        }

        Ok(ValidatedCall {
            tool: record.handler.clone(),
            description: record.description.clone(),
            arguments,
        })
    }
}

fn compile_schema(description: &ToolDescription) -> Result<JSONSchema, ToolCallError> {
    let schema = if description.input_schema.is_null() {
        serde_json::json!({ "type": "object" })
    } else {
        description.input_schema.clone()
    };
    JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(&schema)
        .map_err(|err| ToolCallError::InvalidSchema {
            tool: description.name.clone(),
            reason: err.to_string(),
        })
}
