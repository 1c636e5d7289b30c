//! Configuration management for git-mirror-manager
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables (GIT_MIRROR_*)
//! 3. Config file (~/.config/git-mirror-manager/config.toml)
//! 4. Default values

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Mirror storage and scheduling configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MirrorsConfig {
    /// Directory holding `<namespace>/<repo>` mirrors
    pub base_dir: PathBuf,

    /// Default update schedule for every mirror
    pub update_interval: String,

    /// Per-mirror schedule overrides, keyed by mirror name
    pub overrides: HashMap<String, String>,
}

impl Default for MirrorsConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("/opt/data/mirrors"),
            update_interval: "0 0 * * *".to_string(),
            overrides: HashMap::new(),
        }
    }
}

impl MirrorsConfig {
    /// The schedule specification that applies to `name`
    pub fn update_interval_for(&self, name: &str) -> &str {
        self.overrides
            .get(name)
            .map(String::as_str)
            .unwrap_or(&self.update_interval)
    }
}

/// Git invocation configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GitConfig {
    /// Path to the git executable
    pub path: String,

    /// Upper bound for a single git command
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            path: "git".to_string(),
            timeout: Duration::from_secs(10 * 60),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on
    pub addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub mirrors: MirrorsConfig,
    pub git: GitConfig,
    pub server: ServerConfig,
}

/// Values supplied on the command line
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub base_dir: Option<PathBuf>,
    pub update_interval: Option<String>,
    pub git_path: Option<String>,
    pub git_timeout: Option<Duration>,
    pub addr: Option<String>,
}

impl Config {
    /// Load configuration from the default config file location
    ///
    /// Returns default config if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = Self::default_config_path() {
            if path.exists() {
                return Self::load_from_file(&path);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::filesystem(format!("read config {}", path.display()), e))?;
        toml::from_str(&contents)
            .map_err(|e| Error::UserInput(format!("Failed to parse config: {}", e)))
    }

    /// Get the default config file path
    ///
    /// Returns `~/.config/git-mirror-manager/config.toml` on Unix
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("git-mirror-manager").join("config.toml"))
    }

    /// Apply environment variable overrides
    ///
    /// Supported variables:
    /// - GIT_MIRROR_BASEDIR: mirror base directory
    /// - GIT_MIRROR_UPDATE_INTERVAL: default update schedule
    /// - GIT_MIRROR_GIT_PATH: git executable
    /// - GIT_MIRROR_GIT_TIMEOUT: git command timeout, e.g. `5m`
    /// - GIT_MIRROR_MANAGER_ADDR: listen address
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    fn with_overrides_from(mut self, var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        // Empty variables fall back to the configured value
        let var = |name: &str| var(name).filter(|v| !v.is_empty());

        if let Some(base_dir) = var("GIT_MIRROR_BASEDIR") {
            self.mirrors.base_dir = PathBuf::from(base_dir);
        }

        if let Some(interval) = var("GIT_MIRROR_UPDATE_INTERVAL") {
            self.mirrors.update_interval = interval;
        }

        if let Some(path) = var("GIT_MIRROR_GIT_PATH") {
            self.git.path = path;
        }

        if let Some(timeout) = var("GIT_MIRROR_GIT_TIMEOUT") {
            self.git.timeout = humantime::parse_duration(&timeout).map_err(|e| {
                Error::UserInput(format!("Invalid GIT_MIRROR_GIT_TIMEOUT '{}': {}", timeout, e))
            })?;
        }

        if let Some(addr) = var("GIT_MIRROR_MANAGER_ADDR") {
            self.server.addr = addr;
        }

        Ok(self)
    }

    /// Apply CLI flag overrides
    pub fn with_cli_overrides(mut self, cli: CliOverrides) -> Self {
        if let Some(base_dir) = cli.base_dir {
            self.mirrors.base_dir = base_dir;
        }

        if let Some(interval) = cli.update_interval {
            self.mirrors.update_interval = interval;
        }

        if let Some(path) = cli.git_path {
            self.git.path = path;
        }

        if let Some(timeout) = cli.git_timeout {
            self.git.timeout = timeout;
        }

        if let Some(addr) = cli.addr {
            self.server.addr = addr;
        }

        self
    }

    /// Load configuration with all overrides applied
    ///
    /// Priority: CLI > env > config file > defaults
    pub fn load_with_overrides(config_file: Option<&Path>, cli: CliOverrides) -> Result<Self> {
        let base = match config_file {
            Some(path) => Self::load_from_file(path)?,
            None => Self::load()?,
        };

        Ok(base.with_env_overrides()?.with_cli_overrides(cli))
    }
}
