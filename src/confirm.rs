use agent_core::{ApprovalHandler, ConfirmationReply, ConfirmationRequest};
use anyhow::{Context, Result};
use async_trait::async_trait;
use console::style;
use dialoguer::theme::ColorfulTheme;
use dialoguer::Confirm;
use tracing::warn;

/// Asks on the terminal before a gated action runs. Without an attended
/// terminal every request is rejected.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalApprovalHandler;

impl TerminalApprovalHandler {
    pub fn new() -> Self {
        Self
    }
}

pub fn render_request(request: &ConfirmationRequest) -> String {
    let arguments = serde_json::to_string_pretty(&request.arguments)
        .unwrap_or_else(|_| request.arguments.to_string());
    let mut text = format!(
        "{} {} wants to run {}\n",
        style("!").yellow().bold(),
        style(request.danger.as_str()).red().bold(),
        style(&request.tool_name).cyan().bold(),
    );
    if !request.rationale.trim().is_empty() {
        text.push_str(&format!("  reason: {}\n", request.rationale.trim()));
    }
    for line in arguments.lines() {
        text.push_str(&format!("  {line}\n"));
    }
    text
}

#[async_trait]
impl ApprovalHandler for TerminalApprovalHandler {
    async fn request_confirmation(&self, request: &ConfirmationRequest) -> Result<ConfirmationReply> {
        if !console::user_attended() {
            warn!(tool = %request.tool_name, "no terminal attached; rejecting gated action");
            return Ok(ConfirmationReply::reject("no terminal available to confirm"));
        }

        let prompt = render_request(request);
        let approved = tokio::task::spawn_blocking(move || {
            eprint!("{prompt}");
            Confirm::with_theme(&ColorfulTheme::default())
                .with_prompt("Allow this action?")
                .default(false)
                .interact()
        })
        .await
        .context("confirmation prompt panicked")?
        .context("failed to read confirmation from the terminal")?;

        Ok(if approved {
            ConfirmationReply::approve()
        } else {
            ConfirmationReply::reject("declined at the terminal")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::ActionId;
    use ai_agent::DangerCategory;
    use serde_json::json;

    #[test]
    fn rendering_names_tool_danger_and_arguments() {
        console::set_colors_enabled(false);
        let request = ConfirmationRequest {
            action_id: ActionId::generate(),
            tool_name: "submit_form".into(),
            arguments: json!({ "element_id": 3 }),
            danger: DangerCategory::AccountModifying,
            rationale: "Save the new email address".into(),
        };
        let text = render_request(&request);
        assert!(text.contains("account-modifying wants to run submit_form"));
        assert!(text.contains("reason: Save the new email address"));
        assert!(text.contains("\"element_id\": 3"));
    }
}
