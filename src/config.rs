//! Configuration loading and management
//!
//! Handles parsing of `taskflow.toml` configuration files.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// File name looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "taskflow.toml";

/// File name inside the per-user config directory.
pub const USER_CONFIG_FILE: &str = "config.toml";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding one sub-directory per project
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Task numbering and status configuration
    #[serde(default)]
    pub tasks: TasksConfig,

    /// Search snippet rendering
    #[serde(default)]
    pub search: SearchConfig,

    /// Custom template location
    #[serde(default)]
    pub templates: TemplatesConfig,

    /// REST server bind address
    #[serde(default)]
    pub server: ListenConfig,

    /// Control channel bind address
    #[serde(default = "default_control")]
    pub control: ListenConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: default_root(),
            tasks: TasksConfig::default(),
            search: SearchConfig::default(),
            templates: TemplatesConfig::default(),
            server: ListenConfig::default(),
            control: default_control(),
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from("projects")
}

/// Task-related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TasksConfig {
    /// Statuses accepted on top of TODO / IN_PROGRESS / COMPLETED
    #[serde(default = "default_extra_statuses")]
    pub extra_statuses: Vec<String>,

    /// Zero-pad width of task IDs
    #[serde(default = "default_id_width")]
    pub id_width: usize,
}

fn default_extra_statuses() -> Vec<String> {
    vec!["ARCHIVED".to_string()]
}

fn default_id_width() -> usize {
    3
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            extra_statuses: default_extra_statuses(),
            id_width: default_id_width(),
        }
    }
}

/// Search-related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Characters of context kept on each side of a match
    #[serde(default = "default_context_chars")]
    pub context_chars: usize,

    #[serde(default = "default_highlight")]
    pub highlight_open: String,

    #[serde(default = "default_highlight")]
    pub highlight_close: String,
}

fn default_context_chars() -> usize {
    30
}

fn default_highlight() -> String {
    "**".to_string()
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            context_chars: default_context_chars(),
            highlight_open: default_highlight(),
            highlight_close: default_highlight(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplatesConfig {
    /// Custom templates directory; defaults to `<root>/.templates`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

/// Host/port pair for a listening adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    8000
}

fn default_control() -> ListenConfig {
    ListenConfig {
        host: default_host(),
        port: 8787,
    }
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_server_port(),
        }
    }
}

impl ListenConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|err| {
            Error::InvalidConfig(format!("cannot read {}: {err}", path.display()))
        })?;
        let config: Config = toml::from_str(&content)
            .map_err(|err| Error::InvalidConfig(format!("{}: {err}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the configuration: an explicit path wins, then
    /// `./taskflow.toml`, then the per-user config file, then defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            tracing::debug!(path = %path.display(), "loading explicit config");
            return Self::load(path);
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.is_file() {
            tracing::debug!(path = %local.display(), "loading local config");
            return Self::load(&local);
        }

        if let Some(user) = user_config_path() {
            if user.is_file() {
                tracing::debug!(path = %user.display(), "loading user config");
                return Self::load(&user);
            }
        }

        Ok(Self::default())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        crate::storage::write_atomic(path, content.as_bytes())
    }

    /// Directory holding custom templates
    pub fn templates_dir(&self) -> PathBuf {
        self.templates
            .dir
            .clone()
            .unwrap_or_else(|| self.root.join(".templates"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.root.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("root cannot be empty".to_string()));
        }
        self.tasks.validate()?;
        self.search.validate()?;
        Ok(())
    }
}

/// Per-user config file location, if the platform has one.
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "taskflow")
        .map(|dirs| dirs.config_dir().join(USER_CONFIG_FILE))
}

impl TasksConfig {
    fn validate(&self) -> Result<()> {
        if !(1..=9).contains(&self.id_width) {
            return Err(Error::InvalidConfig(
                "tasks.id_width must be between 1 and 9".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for status in &self.extra_statuses {
            let trimmed = status.trim();
            if trimmed.is_empty() {
                return Err(Error::InvalidConfig(
                    "tasks.extra_statuses cannot include empty entries".to_string(),
                ));
            }
            let parsed = crate::model::TaskStatus::parse(trimmed)
                .map_err(|err| Error::InvalidConfig(format!("tasks.extra_statuses: {err}")))?;
            if parsed.is_core() {
                return Err(Error::InvalidConfig(format!(
                    "tasks.extra_statuses '{trimmed}' collides with a core status"
                )));
            }
            if !seen.insert(parsed) {
                return Err(Error::InvalidConfig(format!(
                    "tasks.extra_statuses has duplicate entry '{trimmed}'"
                )));
            }
        }

        Ok(())
    }

    /// Whether `status` may be stored on a task.
    pub fn allows(&self, status: &crate::model::TaskStatus) -> bool {
        match status {
            crate::model::TaskStatus::Extension(name) => self
                .extra_statuses
                .iter()
                .any(|extra| extra.trim().eq_ignore_ascii_case(name)),
            _ => true,
        }
    }
}

impl SearchConfig {
    fn validate(&self) -> Result<()> {
        if self.context_chars == 0 {
            return Err(Error::InvalidConfig(
                "search.context_chars must be > 0".to_string(),
            ));
        }
        if self.highlight_open.is_empty() || self.highlight_close.is_empty() {
            return Err(Error::InvalidConfig(
                "search highlight markers cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}
