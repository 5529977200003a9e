use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use tracing_subscriber::EnvFilter;

const QUIET_DEPENDENCIES: &str = "hyper=warn,reqwest=warn,html5ever=warn,selectors=warn";

pub fn filter_directives(level: &str) -> String {
    format!("{level},{QUIET_DEPENDENCIES}")
}

/// Installs the global subscriber. `RUST_LOG` wins over `level`. With a
/// file, lines are appended there without ANSI colours instead of stderr.
pub fn init(level: &str, file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter_directives(level)))
        .with_context(|| format!("invalid log level `{level}`"))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create log directory {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
                .map_err(|err| anyhow!(err))
        }
        None => builder
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|err| anyhow!(err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependency_noise_is_capped() {
        let directives = filter_directives("debug");
        assert!(directives.starts_with("debug,"));
        assert!(directives.contains("hyper=warn"));
        assert!(EnvFilter::try_new(directives).is_ok());
    }
}
