use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::client::{ActionDraft, LastResult, ModelClient, ModelContext, ReflectionVerdict};
use crate::error::ModelError;
use crate::language_model::{
    ChatMessage, LanguageModelClient, LanguageModelRequest, ModelOptions,
};
use crate::plan::Plan;

#[derive(Debug, Clone)]
pub struct PromptConfig {
    pub system_prompt: String,
    pub options: ModelOptions,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.trim().to_string(),
            options: ModelOptions::default(),
        }
    }
}

/// Model client that asks a text model for strict JSON and parses it into
/// the structured shapes the workflow needs.
pub struct PromptedModelClient {
    model: Arc<dyn LanguageModelClient>,
    config: PromptConfig,
}

impl PromptedModelClient {
    pub fn new(model: Arc<dyn LanguageModelClient>, config: PromptConfig) -> Self {
        Self { model, config }
    }

    fn build_request(
        &self,
        context: &ModelContext,
        instruction: &str,
        schema: &str,
    ) -> LanguageModelRequest {
        let mut prompt = String::new();
        prompt.push_str("<<TOOLS>>\n");
        for tool in &context.tools {
            prompt.push_str(&format!(
                "- {} [danger: {}]: {}\n  input_schema: {}\n",
                tool.name,
                tool.danger,
                tool.description,
                serde_json::to_string(&tool.input_schema).unwrap_or_else(|_| "{}".to_string())
            ));
        }
        prompt.push_str("<<PLAN>>\n");
        prompt.push_str(&context.plan.render());
        prompt.push('\n');
        if let Some(step) = context.current_step.and_then(|idx| context.plan.step(idx)) {
            prompt.push_str(&format!("Current step: {}\n", step.description));
        }
        prompt.push_str("<<CONTEXT>>\n");
        for turn in &context.history {
            prompt.push_str(&turn.render());
            prompt.push('\n');
        }
        prompt.push_str("<<TASK>>\n");
        prompt.push_str(&context.task);
        prompt.push_str("\n\n");
        prompt.push_str(instruction);
        prompt.push_str("\nRespond ONLY with JSON matching this schema:\n");
        prompt.push_str(schema.trim());

        let mut messages = vec![
            ChatMessage::system(self.config.system_prompt.clone()),
            ChatMessage::user(prompt),
        ];
        if let Some(note) = &context.corrective_note {
            messages.push(ChatMessage::user(format!(
                "Your previous reply was rejected: {note}"
            )));
        }

        LanguageModelRequest {
            messages,
            tools: context.tools.clone(),
            options: self.config.options.clone(),
        }
    }

    async fn ask<T: DeserializeOwned>(
        &self,
        context: &ModelContext,
        instruction: &str,
        schema: &str,
    ) -> Result<T, ModelError> {
        let request = self.build_request(context, instruction, schema);
        let response = self.model.complete(&request).await?;
        debug!(raw = %response.text, "model replied");
        parse_json_reply(&response.text)
    }
}

#[async_trait]
impl ModelClient for PromptedModelClient {
    async fn propose_plan(&self, context: &ModelContext) -> Result<Plan, ModelError> {
        let reply: PlanReply = self
            .ask(context, PLAN_INSTRUCTION, PLAN_SCHEMA)
            .await?;
        Ok(Plan::from_descriptions(reply.steps))
    }

    async fn choose_action(&self, context: &ModelContext) -> Result<ActionDraft, ModelError> {
        let reply: ActionReply = self
            .ask(context, ACTION_INSTRUCTION, ACTION_SCHEMA)
            .await?;
        if reply.tool.trim().is_empty() {
            return Err(ModelError::malformed("action reply names no tool"));
        }
        Ok(ActionDraft {
            tool_name: reply.tool,
            arguments: reply.args,
            rationale: reply.rationale.unwrap_or_default(),
        })
    }

    async fn reflect(
        &self,
        context: &ModelContext,
        last_result: &LastResult,
    ) -> Result<ReflectionVerdict, ModelError> {
        let outcome = serde_json::to_string(last_result).unwrap_or_default();
        let instruction = format!(
            "{}\n<<LAST_RESULT>>\n{}\nRe-planning required: {}",
            REFLECT_INSTRUCTION,
            outcome,
            last_result.requires_replan()
        );
        let reply: ReflectionReply = self.ask(context, &instruction, REFLECT_SCHEMA).await?;
        Ok(ReflectionVerdict {
            step_done: reply.step_done,
            should_replan: reply.should_replan,
            skip_step: reply.skip_step,
            updated_plan: reply.updated_steps.map(Plan::from_descriptions),
            note: reply.note,
        })
    }

    async fn finalize(&self, context: &ModelContext) -> Result<String, ModelError> {
        let reply: SummaryReply = self
            .ask(context, SUMMARY_INSTRUCTION, SUMMARY_SCHEMA)
            .await?;
        if reply.summary.trim().is_empty() {
            return Err(ModelError::malformed("summary is empty"));
        }
        Ok(reply.summary)
    }
}

/// Parses a JSON object out of a model reply, tolerating a Markdown code
/// fence or chatter around the object.
pub fn parse_json_reply<T: DeserializeOwned>(text: &str) -> Result<T, ModelError> {
    let trimmed = strip_code_fence(text.trim());
    let candidate = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start <= end => &trimmed[start..=end],
        _ => {
            return Err(ModelError::malformed(format!(
                "reply contains no JSON object: {}",
                truncate(text, 200)
            )))
        }
    };
    serde_json::from_str(candidate).map_err(|err| {
        ModelError::malformed(format!(
            "reply does not match the expected shape ({err}): {}",
            truncate(text, 200)
        ))
    })
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push('…');
    out
}

#[derive(Debug, Deserialize)]
struct PlanReply {
    steps: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ActionReply {
    tool: String,
    #[serde(default)]
    args: Value,
    #[serde(default)]
    rationale: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReflectionReply {
    step_done: bool,
    #[serde(default)]
    should_replan: bool,
    #[serde(default)]
    skip_step: bool,
    #[serde(default)]
    updated_steps: Option<Vec<String>>,
    #[serde(default)]
    note: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SummaryReply {
    summary: String,
}

const PLAN_INSTRUCTION: &str =
    "Break the task into a short ordered list of concrete browser sub-goals.";

const PLAN_SCHEMA: &str = r#"{
  "type": "object",
  "required": ["steps"],
  "properties": {
    "steps": { "type": "array", "items": { "type": "string" }, "minItems": 1 }
  }
}"#;

const ACTION_INSTRUCTION: &str =
    "Choose exactly one tool call that advances the current step.";

const ACTION_SCHEMA: &str = r#"{
  "type": "object",
  "required": ["tool", "args"],
  "properties": {
    "tool": { "type": "string", "description": "Name of one listed tool" },
    "args": { "type": "object", "description": "Arguments matching the tool input_schema" },
    "rationale": { "type": "string", "description": "Why this call advances the step" }
  }
}"#;

const REFLECT_INSTRUCTION: &str = "Judge whether the last result completed the current step. \
If it failed or was refused, propose a different approach in updated_steps or skip the step.";

const REFLECT_SCHEMA: &str = r#"{
  "type": "object",
  "required": ["step_done"],
  "properties": {
    "step_done": { "type": "boolean" },
    "should_replan": { "type": "boolean" },
    "skip_step": { "type": "boolean" },
    "updated_steps": { "type": "array", "items": { "type": "string" }, "description": "Replacement for the remaining steps" },
    "note": { "type": "string" }
  }
}"#;

const SUMMARY_INSTRUCTION: &str =
    "Summarise for the user what was accomplished, quoting any information they asked for.";

const SUMMARY_SCHEMA: &str = r#"{
  "type": "object",
  "required": ["summary"],
  "properties": { "summary": { "type": "string" } }
}"#;

const DEFAULT_SYSTEM_PROMPT: &str = r#"
You are a careful autonomous browsing agent working through a task one step at a time.
Rules:
- Prefer calling tools to observe pages instead of guessing their contents.
- After each tool call, wait for the observation before planning further.
- Tools marked with a danger category other than none need the user's approval; if a call is refused, find another way or skip the step.
- Always respond with strict JSON matching the provided schema. Do not include any extra text, code fencing, or commentary.
- Tool arguments must be valid JSON objects; omit null keys.
"#;
