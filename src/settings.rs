use std::fs;
use std::path::{Path, PathBuf};

use agent_core::EngineConfig;
use anyhow::{bail, Context, Result};
use llm_router::{ModelRoute, Provider};
use serde::{Deserialize, Serialize};

const APP_DIR: &str = "browser-agent";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub request_timeout_secs: u64,
    pub user_agent: String,
    /// Results page queried by `search_web`; the query goes in `q`.
    pub search_url: String,
    /// Interactive elements listed per page.
    pub max_elements: usize,
    /// Characters of visible page text returned to the model.
    pub max_text_chars: usize,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            user_agent: concat!("browser-agent/", env!("CARGO_PKG_VERSION")).to_string(),
            search_url: "https://html.duckduckgo.com/html/".to_string(),
            max_elements: 60,
            max_text_chars: 2_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    pub path: Option<PathBuf>,
}

impl ProfileConfig {
    pub fn resolved_path(&self) -> Option<PathBuf> {
        self.path
            .clone()
            .or_else(|| config_dir().map(|dir| dir.join("profile.json")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub enabled: bool,
    pub dir: Option<PathBuf>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
        }
    }
}

impl HistoryConfig {
    pub fn resolved_dir(&self) -> Option<PathBuf> {
        if !self.enabled {
            return None;
        }
        self.dir
            .clone()
            .or_else(|| config_dir().map(|dir| dir.join("history")))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub model: ModelRoute,
    pub engine: EngineConfig,
    pub browser: BrowserConfig,
    pub logging: LoggingConfig,
    pub profile: ProfileConfig,
    pub history: HistoryConfig,
}

impl AppConfig {
    /// Reads `explicit` if given, else the default config file when it
    /// exists, else defaults. Environment overrides are applied last.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path().filter(|path| path.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("OPENROUTER_API_KEY").filter(|v| !v.is_empty()) {
            self.model.api_key = Some(key);
        }
        if let Some(model) = lookup("BROWSER_AGENT_MODEL").filter(|v| !v.is_empty()) {
            self.model.model = model;
        }
        if let Some(base_url) = lookup("BROWSER_AGENT_BASE_URL").filter(|v| !v.is_empty()) {
            self.model.base_url = Some(base_url);
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.engine
            .validate()
            .context("invalid [engine] configuration")?;
        if self.model.provider == Provider::OpenAiCompatible && self.model.base_url.is_none() {
            bail!("model.base_url is required for the open_ai_compatible provider");
        }
        if self.browser.max_elements == 0 {
            bail!("browser.max_elements must be greater than zero");
        }
        Ok(())
    }
}

pub fn config_dir() -> Option<PathBuf> {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .filter(|path| path.is_absolute())
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
        .map(|base| base.join(APP_DIR))
}

pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ai_agent::DangerCategory;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[model]
model = "anthropic/claude-3.5-haiku"

[engine.retry]
max_retries = 5

[engine.confirmation.require]
none = true

[logging]
level = "debug"
"#
        )
        .unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.model.model, "anthropic/claude-3.5-haiku");
        assert_eq!(config.model.provider, Provider::OpenRouter);
        assert_eq!(config.engine.retry.max_retries, 5);
        assert_eq!(config.engine.retry.backoff_base_ms, 500);
        assert!(config
            .engine
            .confirmation
            .requires_confirmation(DangerCategory::None));
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.browser.max_elements, 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn environment_overrides_file_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("OPENROUTER_API_KEY", "sk-env"),
            ("BROWSER_AGENT_MODEL", "openai/gpt-4o"),
            ("BROWSER_AGENT_BASE_URL", ""),
        ]);
        let mut config = AppConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.model.api_key.as_deref(), Some("sk-env"));
        assert_eq!(config.model.model, "openai/gpt-4o");
        assert!(config.model.base_url.is_none());
    }

    #[test]
    fn waiving_confirmation_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[engine.confirmation.require]\nfinancial = false").unwrap();
        let config = AppConfig::from_file(file.path()).unwrap();
        let err = config.validate().unwrap_err();
        assert!(format!("{err:#}").contains("financial"));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(AppConfig::load(Some(&dir.path().join("absent.toml"))).is_err());
    }
}
