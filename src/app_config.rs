//! Module for application configuration settings.
//!
//! User configurations may be specified in a configuration file. Nothing is ever written back:
//! when no file exists the defaults are used as-is.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

fn null_fs_runtime_dir() -> Option<PathBuf> {
    let runtime_dir = dirs::runtime_dir();
    if let Some(path) = runtime_dir {
        return Some(path.join("null-fs"));
    }

    let home_dir = dirs::home_dir();
    if let Some(path) = home_dir {
        return Some(path.join(".local").join("share").join("null-fs"));
    }

    None
}

fn default_pid_file() -> PathBuf {
    null_fs_runtime_dir().map_or_else(
        || PathBuf::from("/var/run/null-fs.pid"),
        |rd| rd.join("null-fs.pid"),
    )
}

fn default_mount_point() -> PathBuf {
    null_fs_runtime_dir().map_or_else(|| PathBuf::from("/tmp/null-fs/mnt"), |rd| rd.join("mnt"))
}

fn default_fs_name() -> String {
    "nullfs".to_owned()
}

fn default_kernel_ttl_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

fn current_uid() -> u32 {
    nix::unistd::Uid::current().as_raw()
}

fn current_gid() -> u32 {
    nix::unistd::Gid::current().as_raw()
}

/// Daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct DaemonConfig {
    /// The path to the PID file for the daemon.
    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,

    /// Where the daemon's stdout and stderr go. Discarded if not specified.
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            pid_file: default_pid_file(),
            log_file: None,
        }
    }
}

impl DaemonConfig {
    /// Open the configured log file for appending, if there is one.
    pub fn open_log_file(&self) -> Result<Option<std::fs::File>, std::io::Error> {
        let Some(path) = &self.log_file else {
            return Ok(None);
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map(Some)
    }
}

/// Application configuration structure.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    /// The mount point for the filesystem.
    #[serde(default = "default_mount_point")]
    pub mount_point: PathBuf,

    /// Name of the filesystem as shown in the mount table.
    #[serde(default = "default_fs_name")]
    pub fs_name: String,

    /// The user owning the root directory. If not specified, the current user.
    #[serde(default = "current_uid")]
    pub uid: u32,

    /// The group owning the root directory. If not specified, the current group.
    #[serde(default = "current_gid")]
    pub gid: u32,

    /// Let users other than the mounting one access the filesystem.
    #[serde(default)]
    pub allow_other: bool,

    /// Ask the kernel to unmount automatically when the process exits.
    #[serde(default = "default_true")]
    pub auto_unmount: bool,

    /// How long the kernel may cache entries and attributes, in milliseconds.
    #[serde(default = "default_kernel_ttl_ms")]
    pub kernel_ttl_ms: u64,

    #[serde(default)]
    pub daemon: DaemonConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mount_point: default_mount_point(),
            fs_name: default_fs_name(),
            uid: current_uid(),
            gid: current_gid(),
            allow_other: false,
            auto_unmount: true,
            kernel_ttl_ms: default_kernel_ttl_ms(),
            daemon: DaemonConfig::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration validation errors: {0:?}")]
    ValidationErrors(Vec<String>),

    #[error("Deserialization error: {0}")]
    DeserializationError(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Config {
    /// Validate the correctness of the configuration.
    ///
    /// Returns:
    /// - `Ok(())` if the configuration is valid.
    /// - `Err(Vec<String>)` containing every validation error message otherwise.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.mount_point.as_os_str().is_empty() {
            errors.push("Mount point must not be empty.".to_owned());
        }

        if self.fs_name.is_empty() {
            errors.push("fs-name must not be empty.".to_owned());
        } else if self.fs_name.contains(',') {
            errors.push(format!(
                "fs-name '{}' must not contain ','.",
                self.fs_name
            ));
        }

        if self.kernel_ttl_ms == 0 {
            errors.push("kernel-ttl-ms must be greater than zero.".to_owned());
        }

        if self
            .daemon
            .pid_file
            .parent()
            .is_none_or(|p| p.as_os_str().is_empty())
        {
            errors.push(format!(
                "PID file path '{}' has no parent directory.",
                self.daemon.pid_file.display()
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Entry and attribute TTL handed to the kernel.
    pub fn kernel_ttl(&self) -> Duration {
        Duration::from_millis(self.kernel_ttl_ms)
    }

    /// Returns config file paths in descending priority order.
    /// On macOS, skips `dirs::config_dir()` (resolves to ~/Library/Application Support/).
    fn config_search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        #[cfg(not(target_os = "macos"))]
        if let Some(xdg) = dirs::config_dir() {
            paths.push(xdg.join("null-fs").join("config.toml"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".config").join("null-fs").join("config.toml"));
        }

        paths.push(PathBuf::from("/etc/null-fs/config.toml"));

        paths
    }

    /// Finds the first existing config file from search paths.
    fn find_config_file() -> Option<PathBuf> {
        Self::config_search_paths().into_iter().find(|p| p.exists())
    }

    /// Loads config from a single TOML file.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = ?path, "Loading configuration file.");
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Loads configuration from the first found config file, or the external path if given.
    pub fn load(external_config_path: Option<&Path>) -> Option<Result<Self, ConfigError>> {
        if let Some(path) = external_config_path {
            return Some(Self::load_from_file(path));
        }

        Self::find_config_file().map(|path| Self::load_from_file(&path))
    }

    /// Loads config, falling back to the defaults if no file exists.
    /// Errors if a config file exists but is malformed or invalid.
    pub fn load_or_default(external_config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(res) = Self::load(external_config_path) else {
            debug!("No configuration file found, using defaults.");
            return Ok(Self::default());
        };

        let config = res?;
        if let Err(validation_errors) = config.validate() {
            return Err(ConfigError::ValidationErrors(validation_errors));
        }
        debug!("Loaded configuration successfully.");
        Ok(config)
    }
}
