use anyhow::{anyhow, Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable consulted when no token is configured
pub const TOKEN_ENV_VAR: &str = "GITLAB_TOKEN";

/// Main configuration structure for labvault
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    /// GitLab server and API settings
    #[serde(default)]
    pub gitlab: GitLabConfig,

    /// Backup layout settings
    #[serde(default)]
    pub backup: BackupConfig,

    /// Mirror clone behavior
    #[serde(default)]
    pub mirror: MirrorConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// GitLab server configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GitLabConfig {
    /// Server base URL (e.g. https://gitlab.example.com)
    #[serde(default)]
    pub url: Option<String>,

    /// Access token with admin read scope; falls back to GITLAB_TOKEN
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Records requested per listing page
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Upper bound on pages fetched for a single listing
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// Replaces the host of every clone URL the server advertises
    #[serde(default)]
    pub clone_host: Option<String>,
}

/// Backup layout configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BackupConfig {
    /// Root directory for the backup tree
    #[serde(default = "default_output_directory")]
    pub output_directory: String,

    /// Back up projects that belong to no group
    #[serde(default = "default_true")]
    pub include_ungrouped: bool,

    /// Bucket directory name for ungrouped projects
    #[serde(default = "default_ungrouped_dir")]
    pub ungrouped_dir: String,

    /// Lay subgroups out under their parents (full path) instead of by slug
    #[serde(default)]
    pub nested_groups: bool,
}

/// Mirror clone configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MirrorConfig {
    /// Maximum clones running at once
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Timeout for a single clone in seconds (0 disables)
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Remove the destination of a failed clone
    #[serde(default = "default_true")]
    pub cleanup_on_error: bool,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"

    /// Optional log file, written in addition to stderr
    #[serde(default)]
    pub file: Option<String>,

    /// Enable colored output
    #[serde(default = "default_true")]
    pub color: bool,
}

// Default value functions
fn default_true() -> bool {
    true
}
fn default_page_size() -> usize {
    100
}
fn default_max_pages() -> usize {
    10_000
}
fn default_output_directory() -> String {
    "gitlab_backup".to_string()
}
fn default_ungrouped_dir() -> String {
    "ungrouped".to_string()
}
fn default_max_parallel() -> usize {
    1
}
fn default_timeout() -> u64 {
    3600
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for GitLabConfig {
    fn default() -> Self {
        Self {
            url: None,
            token: None,
            page_size: default_page_size(),
            max_pages: default_max_pages(),
            clone_host: None,
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            output_directory: default_output_directory(),
            include_ungrouped: default_true(),
            ungrouped_dir: default_ungrouped_dir(),
            nested_groups: false,
        }
    }
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            timeout: default_timeout(),
            cleanup_on_error: default_true(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
            color: default_true(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, or defaults when absent
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            tracing::debug!("No configuration at {:?}, using defaults", config_path);
            let mut config = Self::default();
            config.expand_paths()?;
            Ok(config)
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.expand_paths()?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("labvault").join("config.yml"))
    }

    /// Expand environment variables in configuration paths
    pub fn expand_paths(&mut self) -> Result<()> {
        self.backup.output_directory = shellexpand::full(&self.backup.output_directory)
            .context("Failed to expand output_directory path")?
            .into_owned();

        if let Some(file) = self.logging.file.take() {
            self.logging.file = Some(
                shellexpand::full(&file)
                    .context("Failed to expand log file path")?
                    .into_owned(),
            );
        }

        Ok(())
    }

    /// Server base URL without a trailing slash
    pub fn server_url(&self) -> Result<String> {
        match self.gitlab.url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => Ok(url.trim_end_matches('/').to_string()),
            _ => Err(anyhow!(
                "No GitLab server URL configured. Pass --url or set gitlab.url in the config file"
            )),
        }
    }

    /// Resolve the access token from the config file or the environment
    pub fn resolve_token(&self) -> Result<String> {
        if let Some(token) = self.gitlab.token.as_deref().filter(|t| !t.is_empty()) {
            return Ok(token.to_string());
        }

        let token = std::env::var(TOKEN_ENV_VAR).with_context(|| {
            format!(
                "No GitLab token configured. Pass --token or set {}",
                TOKEN_ENV_VAR
            )
        })?;

        if token.is_empty() {
            return Err(anyhow!("{} is empty", TOKEN_ENV_VAR));
        }

        Ok(token)
    }

    /// Backup root directory
    pub fn output_root(&self) -> PathBuf {
        PathBuf::from(&self.backup.output_directory)
    }

    /// Clone timeout, `None` when disabled
    pub fn clone_timeout(&self) -> Option<Duration> {
        match self.mirror.timeout {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Clamp tunables into usable ranges
    pub fn page_size(&self) -> usize {
        self.gitlab.page_size.clamp(1, 100)
    }

    pub fn max_parallel(&self) -> usize {
        self.mirror.max_parallel.max(1)
    }
}
