//! Configuration management module
//!
//! Handles loading, validation, and management of application configuration.

use std::env;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Time allowed for a connect before it fails, in milliseconds
    pub connect_timeout_ms: u64,

    /// Namespace used when none is given on the command line
    pub default_namespace: String,

    /// Logging level
    pub log_level: String,

    /// File-based logging configuration
    pub log: LogConfig,

    /// Shell selection
    #[serde(default)]
    pub shell: ShellConfig,

    /// Interactive terminal configuration
    #[serde(default)]
    pub terminal: TerminalConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Shell to request first, overriding the candidate list
    pub preferred: Option<String>,

    /// Shells tried by the remote side, in order of preference
    pub candidates: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TerminalConfig {
    /// Enable colored status lines
    pub enable_colors: bool,

    /// Key pressed with Ctrl to leave an interactive session
    pub escape_key: char,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Absolute or relative path to the log file
    pub file_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            default_namespace: "default".to_string(),
            log_level: "info".to_string(),
            log: LogConfig::default(),
            shell: ShellConfig::default(),
            terminal: TerminalConfig::default(),
        }
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            preferred: None,
            candidates: vec![
                "/bin/bash".to_string(),
                "/bin/sh".to_string(),
                "/bin/ash".to_string(),
            ],
        }
    }
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            enable_colors: true,
            escape_key: ']',
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file_path: "logs/podshell.log".to_string(),
        }
    }
}

impl ShellConfig {
    /// Shells passed to the transport in the order they are tried, preferred first
    pub fn ordered(&self) -> Vec<String> {
        let mut shells: Vec<String> = self.preferred.iter().cloned().collect();
        for candidate in &self.candidates {
            if !shells.contains(candidate) {
                shells.push(candidate.clone());
            }
        }
        shells
    }
}

impl Config {
    /// Load configuration from file with environment variable overrides
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        // Apply environment variable overrides
        config.apply_env_overrides();

        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        // PODSHELL_CONNECT_TIMEOUT_MS - connect timeout
        if let Ok(timeout) = env::var("PODSHELL_CONNECT_TIMEOUT_MS") {
            if let Ok(value) = timeout.parse::<u64>() {
                self.connect_timeout_ms = value;
            }
        }

        // PODSHELL_NAMESPACE - default namespace
        if let Ok(namespace) = env::var("PODSHELL_NAMESPACE") {
            if !namespace.trim().is_empty() {
                self.default_namespace = namespace;
            }
        }

        // PODSHELL_LOG_LEVEL - logging level
        if let Ok(log_level) = env::var("PODSHELL_LOG_LEVEL") {
            self.log_level = log_level;
        }

        // PODSHELL_LOG_FILE_PATH - logging destination file
        if let Ok(file_path) = env::var("PODSHELL_LOG_FILE_PATH") {
            if !file_path.trim().is_empty() {
                self.log.file_path = file_path;
            }
        }

        // PODSHELL_SHELL - preferred shell binary
        if let Ok(shell) = env::var("PODSHELL_SHELL") {
            if !shell.trim().is_empty() {
                self.shell.preferred = Some(shell);
            }
        }

        // PODSHELL_ENABLE_COLORS - colored status lines
        if let Ok(enable_colors) = env::var("PODSHELL_ENABLE_COLORS") {
            self.terminal.enable_colors = enable_colors
                .parse()
                .unwrap_or(self.terminal.enable_colors);
        }
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Load configuration with fallback to default
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::load_from_file(path).unwrap_or_else(|err| {
            tracing::warn!("Failed to load config: {}, using defaults", err);
            let mut config = Self::default();
            config.apply_env_overrides();
            config
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout_ms == 0 {
            anyhow::bail!("connect_timeout_ms must be greater than 0");
        }

        if self.default_namespace.trim().is_empty() {
            anyhow::bail!("default_namespace must not be empty");
        }

        if self.log.file_path.trim().is_empty() {
            anyhow::bail!("Log file path must not be empty");
        }

        if self.shell.preferred.is_none() && self.shell.candidates.is_empty() {
            anyhow::bail!("At least one shell candidate must be specified");
        }

        for shell in self.shell.preferred.iter().chain(&self.shell.candidates) {
            if !shell.starts_with('/') {
                anyhow::bail!("Shell must be an absolute path: {}", shell);
            }
        }

        if !self.terminal.escape_key.is_ascii_alphanumeric()
            && !matches!(self.terminal.escape_key, ']' | '\\' | '^' | '_')
        {
            anyhow::bail!(
                "terminal.escape_key must be a key usable with Ctrl: {:?}",
                self.terminal.escape_key
            );
        }

        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Display formatted configuration
    pub fn display(&self, json: bool) -> Result<()> {
        if json {
            println!(
                "{}",
                serde_json::to_string_pretty(self).context("Failed to serialize configuration")?
            );
        } else {
            println!(
                "{}",
                toml::to_string_pretty(self).context("Failed to serialize configuration")?
            );
        }
        Ok(())
    }

    /// Handle configuration command
    pub fn handle_command(action: &Option<crate::cli::ConfigAction>, path: &str) -> Result<()> {
        match action {
            Some(crate::cli::ConfigAction::Show { json }) => {
                let config = Config::load_or_default(path);
                config.display(*json)?;
            }
            Some(crate::cli::ConfigAction::Reset) => {
                let default_config = Config::default();
                default_config.save_to_file(path)?;
                println!("Configuration reset to defaults: {}", path);
            }
            None => {
                println!("Configuration management commands:");
                println!("  podshell config show [--json] - Show current configuration");
                println!("  podshell config reset         - Reset to default configuration");
            }
        }
        Ok(())
    }
}
