//! Harness configuration.
//!
//! Loaded from `~/.xrt/config.toml` (or an explicit path), then overridden
//! from the environment:
//!
//! | variable                 | effect                                           |
//! |--------------------------|--------------------------------------------------|
//! | `XRT_SERVER_BIN`         | server executable                                |
//! | `XRT_TARGET`             | session target                                   |
//! | `XRT_CONNECT_TIMEOUT_MS` | connect deadline                                 |
//! | `COLAB_TPU_ADDR`         | target `grpc://$COLAB_TPU_ADDR`, no local server |

use crate::target::{Target, TargetError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_TARGET: &str = "grpc://127.0.0.1:8470";
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
pub const SERVER_BIN_NAME: &str = "xrt_server";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Server executable. When unset, `xrt_server` next to the running
    /// executable, then on `PATH`.
    pub server_binary: Option<PathBuf>,
    pub server_args: Vec<String>,
    /// Spawn a local server during bootstrap.
    pub spawn_server: bool,
    pub target: String,
    pub connect_timeout_ms: u64,
    /// Session RNG seed sent with `initialize`.
    pub seed: Option<u64>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            server_binary: None,
            server_args: Vec::new(),
            spawn_server: true,
            target: DEFAULT_TARGET.to_string(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            seed: None,
        }
    }
}

impl HarnessConfig {
    /// `~/.xrt/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".xrt").join("config.toml"))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Load an explicit path (which must exist) or the default path (which
    /// may not), then apply environment overrides.
    pub fn resolve(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_env_from(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides from `lookup`, normally `std::env::var`.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(bin) = lookup("XRT_SERVER_BIN") {
            self.server_binary = Some(PathBuf::from(bin));
        }
        if let Some(target) = lookup("XRT_TARGET") {
            self.target = target;
        }
        if let Some(ms) = lookup("XRT_CONNECT_TIMEOUT_MS") {
            self.connect_timeout_ms = ms.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "XRT_CONNECT_TIMEOUT_MS".to_string(),
                value: ms.clone(),
            })?;
        }
        if let Some(addr) = lookup("COLAB_TPU_ADDR").filter(|a| !a.trim().is_empty()) {
            tracing::debug!(addr = %addr, "remote accelerator address found, not spawning a server");
            self.target = format!("grpc://{}", addr.trim());
            self.spawn_server = false;
        }
        Ok(())
    }

    pub fn target(&self) -> Result<Target, ConfigError> {
        self.target.parse().map_err(ConfigError::Target)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// The server executable to launch.
    pub fn server_binary(&self) -> PathBuf {
        if let Some(path) = &self.server_binary {
            return path.clone();
        }
        let file_name = format!("{}{}", SERVER_BIN_NAME, std::env::consts::EXE_SUFFIX);
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(&file_name)))
            .filter(|candidate| candidate.exists())
            .unwrap_or_else(|| PathBuf::from(file_name))
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, message: String },
    Parse { path: PathBuf, message: String },
    Serialize(String),
    InvalidValue { key: String, value: String },
    Target(TargetError),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io { path, message } => write!(f, "Failed to read {}: {}", path.display(), message),
            ConfigError::Parse { path, message } => write!(f, "Failed to parse {}: {}", path.display(), message),
            ConfigError::Serialize(e) => write!(f, "Serialize error: {}", e),
            ConfigError::InvalidValue { key, value } => write!(f, "Invalid value for {}: '{}'", key, value),
            ConfigError::Target(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<TargetError> for ConfigError {
    fn from(e: TargetError) -> Self {
        ConfigError::Target(e)
    }
}
