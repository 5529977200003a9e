mod browser;
mod cli;
mod confirm;
mod journal;
mod logging;
mod output;
mod profile;
mod settings;

use std::io::{self, BufRead, Write};
use std::process::ExitCode;
use std::sync::Arc;

use agent_core::{HistorySink, NullSink, WorkflowEngine};
use ai_agent::{PromptConfig, PromptedModelClient};
use anyhow::{bail, Context, Result};
use clap::Parser;
use console::style;
use llm_router::LlmRouter;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::browser::{toolset, PageSession};
use crate::cli::Cli;
use crate::confirm::TerminalApprovalHandler;
use crate::journal::JsonlHistorySink;
use crate::settings::AppConfig;

const EXIT_FAILED: u8 = 1;
const EXIT_USAGE: u8 = 2;
const QUIT_WORDS: [&str; 3] = ["exit", "quit", "q"];

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{} {err:#}", style("error:").red().bold());
            ExitCode::from(EXIT_USAGE)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    if cli.task().is_none() && !cli.interactive {
        bail!("no task given; pass a task or use --interactive");
    }

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(model) = cli.model.as_deref().filter(|m| !m.trim().is_empty()) {
        config.model.model = model.trim().to_string();
    }
    let level = cli
        .log_level_override()
        .unwrap_or(config.logging.level.as_str())
        .to_string();
    logging::init(&level, config.logging.file.as_deref())?;

    let engine = build_engine(&config)?;
    info!(
        model = %config.model.model,
        tools = engine.tools().len(),
        "browser agent ready"
    );

    if cli.interactive {
        if let Some(task) = cli.task() {
            run_task(&engine, task).await;
        }
        interactive(&engine).await?;
        return Ok(ExitCode::SUCCESS);
    }

    match cli.task() {
        Some(task) => Ok(ExitCode::from(run_task(&engine, task).await)),
        None => Ok(ExitCode::from(EXIT_USAGE)),
    }
}

fn build_engine(config: &AppConfig) -> Result<WorkflowEngine> {
    let language_model = LlmRouter::new()?.route(&config.model)?;
    let model = Arc::new(PromptedModelClient::new(
        language_model,
        PromptConfig::default(),
    ));

    let session = PageSession::new(config.browser.clone()).context("failed to set up the HTTP client")?;
    let sink: Arc<dyn HistorySink> = match config.history.resolved_dir() {
        Some(dir) => {
            info!(dir = %dir.display(), "recording task history");
            Arc::new(JsonlHistorySink::new(dir))
        }
        None => Arc::new(NullSink),
    };

    let mut builder = WorkflowEngine::builder(model)
        .with_config(config.engine.clone())
        .with_approval_handler(Arc::new(TerminalApprovalHandler::new()))
        .with_sink(sink);
    for tool in toolset(
        Arc::new(Mutex::new(session)),
        config.profile.resolved_path(),
    ) {
        builder = builder.register_tool(tool);
    }
    Ok(builder.build()?)
}

/// Runs one task, prints its panels and returns the process exit code.
async fn run_task(engine: &WorkflowEngine, task: &str) -> u8 {
    println!("{}", output::task_panel(task));
    match engine.run(task).await {
        Ok(outcome) => {
            println!("{}", output::outcome_panel(&outcome));
            if outcome.succeeded() {
                0
            } else {
                EXIT_FAILED
            }
        }
        Err(err) => {
            error!(error = %err, "task could not run");
            println!(
                "{}",
                output::panel("Failed", console::Color::Red, &err.to_string())
            );
            if err.is_startup() {
                EXIT_USAGE
            } else {
                EXIT_FAILED
            }
        }
    }
}

async fn interactive(engine: &WorkflowEngine) -> Result<()> {
    println!(
        "{} Type a task, or {} to leave.",
        style("browser-agent").bold(),
        style("exit").cyan()
    );
    loop {
        let Some(line) = prompt_line().await? else {
            return Ok(());
        };
        let task = line.trim();
        if task.is_empty() {
            continue;
        }
        if QUIT_WORDS.contains(&task.to_lowercase().as_str()) {
            return Ok(());
        }
        run_task(engine, task).await;
    }
}

/// Next line from stdin, or `None` at end of input.
async fn prompt_line() -> Result<Option<String>> {
    tokio::task::spawn_blocking(|| {
        print!("{} ", style("task>").green().bold());
        io::stdout().flush()?;
        let mut line = String::new();
        let read = io::stdin().lock().read_line(&mut line)?;
        Ok::<_, io::Error>((read > 0).then_some(line))
    })
    .await
    .context("input reader panicked")?
    .context("failed to read from stdin")
}
