//! Application configuration loading and validation.
//!
//! Reads `nlquery.yaml` and resolves environment variables. When no file is
//! found, defaults plus the conventional environment variables are used, so
//! a bare `OPENAI_API_KEY` is enough to talk to the LLM.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::Deserialize;
use thiserror::Error;

/// File name searched for when walking upward from the working directory.
pub const CONFIG_FILE_NAME: &str = "nlquery.yaml";

/// Env var that points directly at a config file.
pub const CONFIG_ENV_VAR: &str = "NLQUERY_CONFIG";

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse config: {reason}")]
    Parse { reason: String },

    #[error("config file not found: {path}")]
    NotFound { path: String },

    #[error("invalid config: {reason}")]
    Invalid { reason: String },
}

// ─── Public Types ────────────────────────────────────────────────────────────

/// Top-level configuration (mirrors `nlquery.yaml`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub agent: AgentSettings,
    pub jira: JiraConfig,
    pub salesforce: SalesforceConfig,
    pub logging: LoggingConfig,
}

/// Chat-completions endpoint settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// OpenAI-compatible base URL, without the `/chat/completions` suffix.
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// HTTP-level timeout for one request.
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            api_key: non_empty_env("OPENAI_API_KEY"),
            temperature: 0.0,
            max_tokens: None,
            request_timeout_secs: 120,
        }
    }
}

/// Agent loop knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Model invocations allowed per run before the run is aborted.
    pub max_turns: u32,
    pub model_timeout_secs: u64,
    pub tool_timeout_secs: u64,
    /// Run the tool calls of one assistant message concurrently.
    pub parallel_tool_calls: bool,
    /// Regenerate-and-revalidate attempts after a failed validation.
    pub validation_retries: u32,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_turns: 12,
            model_timeout_secs: 120,
            tool_timeout_secs: 60,
            parallel_tool_calls: false,
            validation_retries: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JiraConfig {
    pub base_url: Option<String>,
    pub email: Option<String>,
    pub api_token: Option<String>,
    /// Only projects in this category are offered to the name resolver.
    pub project_category: Option<String>,
    pub excluded_project_keys: Vec<String>,
}

impl Default for JiraConfig {
    fn default() -> Self {
        Self {
            base_url: non_empty_env("JIRA_BASE_URL"),
            email: non_empty_env("JIRA_EMAIL"),
            api_token: non_empty_env("JIRA_API_TOKEN"),
            project_category: None,
            excluded_project_keys: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SalesforceConfig {
    pub instance_url: Option<String>,
    pub access_token: Option<String>,
    pub api_version: String,
}

impl Default for SalesforceConfig {
    fn default() -> Self {
        Self {
            instance_url: non_empty_env("SF_INSTANCE_URL"),
            access_token: non_empty_env("SF_ACCESS_TOKEN"),
            api_version: "v60.0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Write logs to this file (rotated on startup) instead of stderr.
    pub file: Option<PathBuf>,
    /// Emit JSON lines instead of the human-readable format.
    pub json: bool,
}

impl AppConfig {
    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.max_turns == 0 {
            return Err(ConfigError::Invalid {
                reason: "agent.max_turns must be at least 1".into(),
            });
        }
        if self.llm.model.trim().is_empty() {
            return Err(ConfigError::Invalid {
                reason: "llm.model must not be empty".into(),
            });
        }
        if self.llm.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid {
                reason: "llm.base_url must not be empty".into(),
            });
        }
        Ok(())
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Locate the config file.
///
/// Resolution order: explicit path, `NLQUERY_CONFIG`, then a walk upward
/// from `start` looking for `nlquery.yaml`. An explicit path that does not
/// exist is an error; an absent file otherwise is `Ok(None)`.
pub fn find_config_path(
    explicit: Option<&Path>,
    start: &Path,
) -> Result<Option<PathBuf>, ConfigError> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(Some(path.to_path_buf()));
        }
        return Err(ConfigError::NotFound {
            path: path.display().to_string(),
        });
    }

    if let Some(from_env) = non_empty_env(CONFIG_ENV_VAR) {
        let candidate = PathBuf::from(expand_tilde(&from_env));
        if candidate.exists() {
            return Ok(Some(candidate));
        }
        tracing::warn!(path = %candidate.display(), "{CONFIG_ENV_VAR} points at a missing file");
    }

    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.exists() {
            return Ok(Some(candidate));
        }
        if !dir.pop() {
            break;
        }
    }

    Ok(None)
}

/// Load and parse a config file.
///
/// Performs environment-variable interpolation on `${VAR_NAME}` and
/// `${VAR_NAME:-default}` before parsing.
pub fn load_config_file(path: &Path) -> Result<AppConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    parse_config(&raw)
}

/// Parse config text (after interpolation) and validate it.
pub fn parse_config(raw: &str) -> Result<AppConfig, ConfigError> {
    let interpolated = interpolate_env_vars(raw);
    let config: AppConfig = if interpolated.trim().is_empty() {
        AppConfig::default()
    } else {
        serde_yaml::from_str(&interpolated).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?
    };
    config.validate()?;
    Ok(config)
}

/// Resolve and load the effective configuration.
pub fn load(explicit: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let cwd = std::env::current_dir().unwrap_or_default();
    match find_config_path(explicit, &cwd)? {
        Some(path) => {
            tracing::info!(path = %path.display(), "loading config");
            load_config_file(&path)
        }
        None => {
            tracing::info!("no {CONFIG_FILE_NAME} found, using defaults and environment");
            let config = AppConfig::default();
            config.validate()?;
            Ok(config)
        }
    }
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// `${NAME}` or `${NAME:-default}`; the default may not contain `}`.
static VAR_REF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").expect("valid variable regex")
});

/// Replace `${VAR}` and `${VAR:-default}` references in config text.
///
/// A variable that is unset or blank counts as missing: `${VAR}` becomes
/// empty and `${VAR:-default}` takes the default, with a leading `~`
/// expanded. Text that is not a well-formed reference is left as written.
fn interpolate_env_vars(input: &str) -> String {
    VAR_REF_RE
        .replace_all(input, |caps: &Captures<'_>| {
            let name = &caps[1];
            match (non_empty_env(name), caps.get(2)) {
                (Some(value), _) => value,
                (None, Some(default)) => expand_tilde(default.as_str()),
                (None, None) => {
                    tracing::debug!(var = name, "config references an unset variable");
                    String::new()
                }
            }
        })
        .into_owned()
}

/// Expand `~` or a leading `~/` to the home directory. `~user` is left alone.
fn expand_tilde(path: &str) -> String {
    let rest = match path.strip_prefix('~') {
        Some("") => "",
        Some(rest) => match rest.strip_prefix('/') {
            Some(rest) => rest,
            None => return path.to_string(),
        },
        None => return path.to_string(),
    };
    match dirs::home_dir() {
        Some(home) if rest.is_empty() => home.display().to_string(),
        Some(home) => home.join(rest).display().to_string(),
        None => path.to_string(),
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

// ─── Tests ───────────────────────────────────────────────────────────────────
