//! Configuration management for the PodShell gateway.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/podshell/config.toml`.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("listen_addr must be a socket address such as 0.0.0.0:8080, got {0}")]
    InvalidListenAddr(String),

    #[error("refresh_interval_secs must be between 1 and 86400, got {0}")]
    InvalidRefreshInterval(u64),

    #[error("default_command must contain at least one element")]
    EmptyDefaultCommand,

    #[error("default_tail_lines must not be negative, got {0}")]
    InvalidTailLines(i64),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Upper bound for the registry refresh interval (one day).
const MAX_REFRESH_INTERVAL_SECS: u64 = 86_400;

/// Main configuration structure for the PodShell gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration.
    pub server: ServerConfig,

    /// Cluster registry configuration.
    pub registry: RegistryConfig,

    /// Interactive session configuration.
    pub session: SessionConfig,

    /// Log streaming configuration.
    pub logs: LogsConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to.
    pub listen_addr: String,

    /// Directory holding the terminal and log pages.
    pub static_dir: PathBuf,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Cluster registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegistryConfig {
    /// Directory scanned recursively for kubeconfig files, one per cluster.
    pub kubeconfig_dir: PathBuf,

    /// Seconds between registry refreshes.
    pub refresh_interval_secs: u64,
}

/// Interactive session configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Command executed when the client does not pass any `cmd` parameter.
    pub default_command: Vec<String>,

    /// Allocate a TTY for interactive sessions.
    pub tty: bool,
}

/// Log streaming configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogsConfig {
    /// Backlog lines requested when the client does not pass `tail`.
    pub default_tail_lines: i64,

    /// Follow mode used when the client does not pass `follow`.
    pub default_follow: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            static_dir: PathBuf::from("./frontend"),
            log_level: "info".to_string(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            kubeconfig_dir: PathBuf::from("./kubeconfig"),
            refresh_interval_secs: 60,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_command: vec![protocol::DEFAULT_COMMAND.to_string()],
            tty: true,
        }
    }
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            default_tail_lines: protocol::DEFAULT_TAIL_LINES,
            default_follow: protocol::DEFAULT_FOLLOW,
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("podshell")
        .join("config.toml")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - PODSHELL_LISTEN_ADDR: Override the HTTP listen address
    /// - PODSHELL_KUBECONFIG_DIR: Override the kubeconfig directory
    /// - PODSHELL_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("PODSHELL_LISTEN_ADDR") {
            if !addr.is_empty() {
                tracing::info!("Overriding listen_addr from environment: {}", addr);
                self.server.listen_addr = addr;
            }
        }

        if let Ok(dir) = std::env::var("PODSHELL_KUBECONFIG_DIR") {
            if !dir.is_empty() {
                tracing::info!("Overriding kubeconfig_dir from environment: {}", dir);
                self.registry.kubeconfig_dir = PathBuf::from(dir);
            }
        }

        if let Ok(level) = std::env::var("PODSHELL_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.server.log_level = level;
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.listen_addr.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::InvalidListenAddr(
                self.server.listen_addr.clone(),
            ));
        }

        let interval = self.registry.refresh_interval_secs;
        if !(1..=MAX_REFRESH_INTERVAL_SECS).contains(&interval) {
            return Err(ConfigError::InvalidRefreshInterval(interval));
        }

        if self.session.default_command.is_empty() {
            return Err(ConfigError::EmptyDefaultCommand);
        }

        if self.logs.default_tail_lines < 0 {
            return Err(ConfigError::InvalidTailLines(self.logs.default_tail_lines));
        }

        let level = self.server.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.server.log_level.clone()));
        }

        Ok(())
    }

    /// Returns the parsed listen address.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server
            .listen_addr
            .parse()
            .map_err(|_| ConfigError::InvalidListenAddr(self.server.listen_addr.clone()))
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn clear_env() {
        std::env::remove_var("PODSHELL_LISTEN_ADDR");
        std::env::remove_var("PODSHELL_KUBECONFIG_DIR");
        std::env::remove_var("PODSHELL_LOG_LEVEL");
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.server.log_level, "info");
        assert_eq!(config.registry.kubeconfig_dir, PathBuf::from("./kubeconfig"));
        assert_eq!(config.registry.refresh_interval_secs, 60);
        assert_eq!(config.session.default_command, vec!["/bin/bash"]);
        assert!(config.session.tty);
        assert_eq!(config.logs.default_tail_lines, 200);
        assert!(config.logs.default_follow);
    }

    #[test]
    fn test_from_toml_empty() {
        // Empty TOML should use all defaults
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_from_toml_partial() {
        let toml = r#"
[server]
log_level = "debug"

[logs]
default_tail_lines = 50
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.server.log_level, "debug");
        assert_eq!(config.logs.default_tail_lines, 50);
        // Other values should be defaults
        assert_eq!(config.server.listen_addr, "0.0.0.0:8080");
        assert!(config.logs.default_follow);
    }

    #[test]
    fn test_from_toml_full() {
        let toml = r#"
[server]
listen_addr = "127.0.0.1:9000"
static_dir = "/srv/podshell"
log_level = "trace"

[registry]
kubeconfig_dir = "/etc/podshell/clusters"
refresh_interval_secs = 30

[session]
default_command = ["/bin/sh", "-l"]
tty = false

[logs]
default_tail_lines = 1000
default_follow = false
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.server.listen_addr, "127.0.0.1:9000");
        assert_eq!(config.server.static_dir, PathBuf::from("/srv/podshell"));
        assert_eq!(config.server.log_level, "trace");
        assert_eq!(
            config.registry.kubeconfig_dir,
            PathBuf::from("/etc/podshell/clusters")
        );
        assert_eq!(config.registry.refresh_interval_secs, 30);
        assert_eq!(config.session.default_command, vec!["/bin/sh", "-l"]);
        assert!(!config.session.tty);
        assert_eq!(config.logs.default_tail_lines, 1000);
        assert!(!config.logs.default_follow);
    }

    #[test]
    fn test_from_toml_invalid_syntax() {
        let result = Config::from_toml("[server\nlisten_addr = 1");
        assert!(result.is_err());
    }

    #[test]
    fn test_helpful_error_messages() {
        let toml = r#"
[registry]
refresh_interval_secs = "soon"
"#;
        let err = Config::from_toml(toml).unwrap_err().to_string();
        assert!(err.contains("Invalid TOML"));
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let toml = r#"
[server]
log_level = "warn"
unknown_field = "ignored"

[unknown_section]
foo = "bar"
"#;
        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.server.log_level, "warn");
    }

    #[test]
    fn test_roundtrip_custom() {
        let mut original = Config::default();
        original.server.listen_addr = "127.0.0.1:8443".to_string();
        original.session.default_command = vec!["sh".to_string(), "-c".to_string()];
        original.logs.default_follow = false;

        let toml = original.to_toml().unwrap();
        let loaded = Config::from_toml(&toml).unwrap();

        assert_eq!(original, loaded);
    }

    #[test]
    fn test_load_missing_file() {
        let config = Config::load("/nonexistent/path/config.toml").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let mut original = Config::default();
        original.server.log_level = "debug".to_string();
        original.registry.refresh_interval_secs = 15;

        original.save(&config_path).unwrap();
        let loaded = Config::load(&config_path).unwrap();

        assert_eq!(original, loaded);
    }

    #[test]
    fn test_save_creates_directories() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir
            .path()
            .join("nested")
            .join("dirs")
            .join("config.toml");

        Config::default().save(&config_path).unwrap();

        assert!(config_path.exists());
    }

    #[test]
    fn test_load_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        fs::write(&config_path, "invalid [ toml").unwrap();

        let err = Config::load(&config_path).unwrap_err().to_string();
        assert!(err.contains("Failed to parse config file"));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.to_string_lossy().contains("podshell"));
        assert!(path.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn test_validate_default_config() {
        assert_eq!(Config::default().validate(), Ok(()));
    }

    #[test]
    fn test_validate_listen_addr() {
        let mut config = Config::default();
        config.server.listen_addr = "localhost".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidListenAddr("localhost".to_string()))
        );

        config.server.listen_addr = "[::1]:8080".to_string();
        assert!(config.validate().is_ok());
        assert_eq!(config.listen_addr().unwrap().port(), 8080);
    }

    #[test]
    fn test_validate_refresh_interval_bounds() {
        let mut config = Config::default();

        config.registry.refresh_interval_secs = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidRefreshInterval(0))
        );

        config.registry.refresh_interval_secs = 1;
        assert!(config.validate().is_ok());

        config.registry.refresh_interval_secs = 86_400;
        assert!(config.validate().is_ok());

        config.registry.refresh_interval_secs = 86_401;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidRefreshInterval(86_401))
        );
    }

    #[test]
    fn test_validate_empty_default_command() {
        let mut config = Config::default();
        config.session.default_command.clear();
        assert_eq!(config.validate(), Err(ConfigError::EmptyDefaultCommand));
    }

    #[test]
    fn test_validate_negative_tail_lines() {
        let mut config = Config::default();
        config.logs.default_tail_lines = -1;
        assert_eq!(config.validate(), Err(ConfigError::InvalidTailLines(-1)));

        config.logs.default_tail_lines = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_log_level_case_insensitive() {
        let mut config = Config::default();
        for level in ["TRACE", "Debug", "info", "WARN", "error"] {
            config.server.log_level = level.to_string();
            assert!(config.validate().is_ok(), "level {} should be valid", level);
        }
    }

    #[test]
    fn test_validate_log_level_invalid() {
        let mut config = Config::default();
        config.server.log_level = "verbose".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("verbose".to_string()))
        );
    }

    #[test]
    #[serial]
    fn test_env_override_listen_addr() {
        clear_env();
        std::env::set_var("PODSHELL_LISTEN_ADDR", "127.0.0.1:7070");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config.server.listen_addr, "127.0.0.1:7070");

        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_override_kubeconfig_dir() {
        clear_env();
        std::env::set_var("PODSHELL_KUBECONFIG_DIR", "/var/lib/podshell/clusters");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(
            config.registry.kubeconfig_dir,
            PathBuf::from("/var/lib/podshell/clusters")
        );

        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_override_log_level() {
        clear_env();
        std::env::set_var("PODSHELL_LOG_LEVEL", "debug");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config.server.log_level, "debug");

        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_override_empty_does_not_override() {
        clear_env();
        std::env::set_var("PODSHELL_LISTEN_ADDR", "");
        std::env::set_var("PODSHELL_LOG_LEVEL", "");

        let mut config = Config::default();
        config.apply_env_overrides();

        // Empty strings are ignored
        assert_eq!(config, Config::default());

        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_override_unset_does_not_override() {
        clear_env();

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config, Config::default());
    }
}
