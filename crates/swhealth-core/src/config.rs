//! Health-check configuration document.
//!
//! The YAML document is parsed once into a [`ConfigModel`] and validated
//! before any connection is attempted. Check declaration order is kept.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::analyzer::Severity;
use crate::error::ConfigError;

/// Default config file name looked up by the CLI.
pub const DEFAULT_CONFIG_FILE: &str = "cisco_9300_health_check.yaml";

/// Upper bound for `connection.timeout`, in seconds.
pub const MAX_TIMEOUT_SECS: u64 = 86_400;

fn default_timeout() -> u64 {
    30
}

fn default_delay_factor() -> f64 {
    1.0
}

fn default_port() -> u16 {
    22
}

fn default_output_path() -> PathBuf {
    PathBuf::from("./output")
}

fn default_prefix() -> String {
    "cisco9300_health".to_string()
}

/// Parsed and validated configuration for one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfigModel {
    pub connection: ConnectionSettings,

    /// Free-form descriptive metadata, copied verbatim into the result.
    #[serde(default)]
    pub switch_info: serde_json::Map<String, serde_json::Value>,

    #[serde(default)]
    pub health_checks: IndexMap<String, HealthCheckDefinition>,

    #[serde(default)]
    pub output: OutputSettings,

    #[serde(default)]
    pub thresholds: ThresholdSettings,
}

/// `connection:` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionSettings {
    /// Device platform, e.g. `cisco_ios`.
    pub device_type: String,

    /// Transport read timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Multiplier applied to every transport wait.
    #[serde(default = "default_delay_factor")]
    pub global_delay_factor: f64,

    #[serde(default = "default_port")]
    pub port: u16,
}

/// One named health check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthCheckDefinition {
    /// Filled from the map key at load time.
    #[serde(skip)]
    pub name: String,

    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub commands: Vec<CommandSpec>,
}

impl HealthCheckDefinition {
    /// Create an enabled check with the given commands.
    pub fn new(name: impl Into<String>, commands: Vec<CommandSpec>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            commands,
        }
    }

    /// Disable this check.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// A single diagnostic command within a check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandSpec {
    pub command: String,

    #[serde(default)]
    pub description: String,

    /// Request structured output from the session.
    #[serde(default)]
    pub parse: bool,
}

impl CommandSpec {
    pub fn new(command: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            description: description.into(),
            parse: false,
        }
    }

    /// Request structured output for this command.
    pub fn parsed(mut self) -> Self {
        self.parse = true;
        self
    }
}

/// `output:` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputSettings {
    #[serde(default = "default_output_path")]
    pub file_path: PathBuf,

    #[serde(default = "default_prefix")]
    pub filename_prefix: String,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            file_path: default_output_path(),
            filename_prefix: default_prefix(),
        }
    }
}

/// Optional `thresholds:` section. Empty means no alert rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ThresholdSettings {
    /// Raise one alert per failed command.
    #[serde(default)]
    pub alert_on_failed_commands: bool,

    #[serde(default)]
    pub patterns: Vec<PatternThreshold>,
}

impl ThresholdSettings {
    pub fn is_empty(&self) -> bool {
        !self.alert_on_failed_commands && self.patterns.is_empty()
    }
}

/// Raise an alert when command output matches `pattern`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatternThreshold {
    pub pattern: String,

    /// Restrict to one check.
    #[serde(default)]
    pub check: Option<String>,

    /// Restrict to one command text.
    #[serde(default)]
    pub command: Option<String>,

    #[serde(default)]
    pub severity: Severity,

    #[serde(default)]
    pub message: Option<String>,
}

impl ConfigModel {
    /// Load and validate a config file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml_str(&raw)?;
        info!(path = %path.display(), checks = config.health_checks.len(), "Configuration loaded");
        Ok(config)
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let mut config: ConfigModel = serde_yaml::from_str(raw)?;
        for (name, check) in config.health_checks.iter_mut() {
            check.name = name.clone();
        }
        config.validate()?;
        Ok(config)
    }

    /// Check field constraints serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let conn = &self.connection;
        if conn.device_type.trim().is_empty() {
            return Err(ConfigError::invalid("connection.device_type", "must not be empty"));
        }
        if conn.timeout == 0 {
            return Err(ConfigError::invalid("connection.timeout", "must be positive"));
        }
        if conn.timeout > MAX_TIMEOUT_SECS {
            return Err(ConfigError::invalid(
                "connection.timeout",
                format!("must be at most {MAX_TIMEOUT_SECS} seconds"),
            ));
        }
        if !conn.global_delay_factor.is_finite() || conn.global_delay_factor <= 0.0 {
            return Err(ConfigError::invalid(
                "connection.global_delay_factor",
                "must be a positive number",
            ));
        }

        for (name, check) in &self.health_checks {
            if name.trim().is_empty() {
                return Err(ConfigError::invalid("health_checks", "check name must not be empty"));
            }
            for (idx, spec) in check.commands.iter().enumerate() {
                if spec.command.trim().is_empty() {
                    return Err(ConfigError::invalid(
                        format!("health_checks.{name}.commands[{idx}].command"),
                        "must not be empty",
                    ));
                }
            }
        }

        if self.output.filename_prefix.trim().is_empty() {
            return Err(ConfigError::invalid("output.filename_prefix", "must not be empty"));
        }

        for (idx, threshold) in self.thresholds.patterns.iter().enumerate() {
            Regex::new(&threshold.pattern).map_err(|e| {
                ConfigError::invalid(format!("thresholds.patterns[{idx}].pattern"), e.to_string())
            })?;
        }

        Ok(())
    }

    /// Look up a check by name.
    pub fn check(&self, name: &str) -> Option<&HealthCheckDefinition> {
        self.health_checks.get(name)
    }

    /// Enabled checks in declaration order.
    pub fn enabled_checks(&self) -> impl Iterator<Item = &HealthCheckDefinition> {
        self.health_checks.values().filter(|c| c.enabled)
    }
}
