use std::path::PathBuf;

use clap::Parser;

/// Automate browser tasks described in natural language.
#[derive(Debug, Parser)]
#[command(name = "browser-agent", version, about)]
pub struct Cli {
    /// Task to run, e.g. "find the opening hours of the city library".
    pub task: Option<String>,

    /// Keep prompting for tasks until `exit`, `quit` or `q`.
    #[arg(short, long)]
    pub interactive: bool,

    /// Log at debug level.
    #[arg(short, long)]
    pub verbose: bool,

    /// Log at trace level.
    #[arg(long)]
    pub debug: bool,

    /// Config file to use instead of the default location.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Model name, overriding config and environment.
    #[arg(long, value_name = "NAME")]
    pub model: Option<String>,
}

impl Cli {
    pub fn log_level_override(&self) -> Option<&'static str> {
        if self.debug {
            Some("trace")
        } else if self.verbose {
            Some("debug")
        } else {
            None
        }
    }

    /// A trimmed, non-empty task from the command line.
    pub fn task(&self) -> Option<&str> {
        self.task
            .as_deref()
            .map(str::trim)
            .filter(|task| !task.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_task_and_flags() {
        let cli = Cli::try_parse_from([
            "browser-agent",
            "--verbose",
            "--model",
            "openai/gpt-4o",
            "  check the weather in Oslo ",
        ])
        .unwrap();
        assert_eq!(cli.task(), Some("check the weather in Oslo"));
        assert_eq!(cli.model.as_deref(), Some("openai/gpt-4o"));
        assert_eq!(cli.log_level_override(), Some("debug"));
        assert!(!cli.interactive);
    }

    #[test]
    fn debug_wins_over_verbose() {
        let cli = Cli::try_parse_from(["browser-agent", "-v", "--debug", "-i"]).unwrap();
        assert_eq!(cli.log_level_override(), Some("trace"));
        assert!(cli.interactive);
        assert_eq!(cli.task(), None);
    }

    #[test]
    fn unknown_flags_are_usage_errors() {
        let err = Cli::try_parse_from(["browser-agent", "--headless"]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
