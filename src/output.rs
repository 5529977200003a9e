use agent_core::WorkflowOutcome;
use console::{measure_text_width, style, Color};

const PANEL_WIDTH: usize = 72;

fn rule(title: &str, color: Color) -> String {
    let fill = PANEL_WIDTH.saturating_sub(measure_text_width(title) + 5);
    format!("╭─ {} {}╮", style(title).fg(color).bold(), "─".repeat(fill))
}

/// Boxed block with a styled title. Long lines are wrapped on whitespace.
pub fn panel(title: &str, color: Color, body: &str) -> String {
    let inner = PANEL_WIDTH - 4;
    let mut lines = vec![rule(title, color)];
    for line in body.lines().flat_map(|line| wrap(line, inner)) {
        let pad = inner.saturating_sub(measure_text_width(&line));
        lines.push(format!("│ {line}{} │", " ".repeat(pad)));
    }
    lines.push(format!("╰{}╯", "─".repeat(PANEL_WIDTH - 2)));
    lines.join("\n")
}

fn wrap(line: &str, width: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for word in line.split_whitespace() {
        if !current.is_empty() && current.chars().count() + 1 + word.chars().count() > width {
            out.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() || out.is_empty() {
        out.push(current);
    }
    out
}

pub fn task_panel(goal: &str) -> String {
    panel("Task", Color::Cyan, goal)
}

pub fn outcome_panel(outcome: &WorkflowOutcome) -> String {
    let mut body = outcome.message();
    if !outcome.plan.is_empty() {
        body.push_str("\n\nPlan:\n");
        body.push_str(&outcome.plan.render());
    }
    if outcome.succeeded() {
        panel("Success", Color::Green, &body)
    } else {
        panel("Failed", Color::Red, &body)
    }
}
