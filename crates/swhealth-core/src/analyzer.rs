//! Threshold analysis over a finished run.
//!
//! A [`ThresholdAnalyzer`] applies [`ThresholdRule`]s to every check of a
//! [`RunResult`] and collects the [`Alert`]s they raise. With no rules
//! registered it never raises anything.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::{PatternThreshold, ThresholdSettings};
use crate::error::ConfigError;
use crate::result::{CheckResult, CommandResult, RunResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    #[default]
    Warning,
    Critical,
}

/// A threshold violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub check_name: String,
    /// Command that triggered the alert, if the rule is per command.
    pub command: Option<String>,
    pub severity: Severity,
    pub message: String,
}

impl std::fmt::Display for Alert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.command {
            Some(cmd) => write!(
                f,
                "[{:?}] {} / {}: {}",
                self.severity, self.check_name, cmd, self.message
            ),
            None => write!(f, "[{:?}] {}: {}", self.severity, self.check_name, self.message),
        }
    }
}

/// A predicate over check or command results.
///
/// Implement `evaluate_command` for per-command rules, or override
/// `evaluate_check` to look at a check as a whole.
pub trait ThresholdRule: Send + Sync {
    /// Rule name for logs.
    fn name(&self) -> &str;

    fn evaluate_command(&self, _check: &CheckResult, _command: &CommandResult) -> Vec<Alert> {
        Vec::new()
    }

    fn evaluate_check(&self, check: &CheckResult) -> Vec<Alert> {
        check
            .commands
            .iter()
            .flat_map(|cmd| self.evaluate_command(check, cmd))
            .collect()
    }
}

/// Raises one alert per failed command.
#[derive(Debug, Clone, Copy)]
pub struct FailedCommandRule {
    pub severity: Severity,
}

impl Default for FailedCommandRule {
    fn default() -> Self {
        Self {
            severity: Severity::Warning,
        }
    }
}

impl ThresholdRule for FailedCommandRule {
    fn name(&self) -> &str {
        "failed_command"
    }

    fn evaluate_command(&self, check: &CheckResult, command: &CommandResult) -> Vec<Alert> {
        match command.error() {
            Some(error) => vec![Alert {
                check_name: check.check_name.clone(),
                command: Some(command.command.clone()),
                severity: self.severity,
                message: format!("command failed: {error}"),
            }],
            None => Vec::new(),
        }
    }
}

/// Raises an alert when text output matches a pattern.
///
/// Structured output is matched against its JSON rendering.
#[derive(Debug, Clone)]
pub struct OutputPatternRule {
    pattern: Regex,
    check: Option<String>,
    command: Option<String>,
    severity: Severity,
    message: Option<String>,
}

impl OutputPatternRule {
    pub fn new(pattern: &str, severity: Severity) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            check: None,
            command: None,
            severity,
            message: None,
        })
    }

    pub fn for_check(mut self, check: impl Into<String>) -> Self {
        self.check = Some(check.into());
        self
    }

    pub fn for_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    fn from_threshold(threshold: &PatternThreshold) -> Result<Self, regex::Error> {
        let mut rule = Self::new(&threshold.pattern, threshold.severity)?;
        rule.check = threshold.check.clone();
        rule.command = threshold.command.clone();
        rule.message = threshold.message.clone();
        Ok(rule)
    }
}

impl ThresholdRule for OutputPatternRule {
    fn name(&self) -> &str {
        "output_pattern"
    }

    fn evaluate_check(&self, check: &CheckResult) -> Vec<Alert> {
        if self.check.as_deref().is_some_and(|c| c != check.check_name) {
            return Vec::new();
        }
        check
            .commands
            .iter()
            .flat_map(|cmd| self.evaluate_command(check, cmd))
            .collect()
    }

    fn evaluate_command(&self, check: &CheckResult, command: &CommandResult) -> Vec<Alert> {
        if self.command.as_deref().is_some_and(|c| c != command.command) {
            return Vec::new();
        }
        let Some(output) = command.output() else {
            return Vec::new();
        };
        let text = match output.as_text() {
            Some(text) => std::borrow::Cow::Borrowed(text),
            None => std::borrow::Cow::Owned(serde_json::to_string(output).unwrap_or_default()),
        };
        let Some(found) = self.pattern.find(&text) else {
            return Vec::new();
        };

        let message = self
            .message
            .clone()
            .unwrap_or_else(|| format!("output matched '{}': {}", self.pattern, found.as_str()));
        vec![Alert {
            check_name: check.check_name.clone(),
            command: Some(command.command.clone()),
            severity: self.severity,
            message,
        }]
    }
}

/// Applies registered rules to a run result.
#[derive(Default)]
pub struct ThresholdAnalyzer {
    rules: Vec<Box<dyn ThresholdRule>>,
}

impl ThresholdAnalyzer {
    /// An analyzer with no rules.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule(mut self, rule: impl ThresholdRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    /// Build the rule set described by the `thresholds` section.
    pub fn from_config(settings: &ThresholdSettings) -> Result<Self, ConfigError> {
        let mut analyzer = Self::new();
        if settings.alert_on_failed_commands {
            analyzer = analyzer.with_rule(FailedCommandRule::default());
        }
        for (idx, threshold) in settings.patterns.iter().enumerate() {
            let rule = OutputPatternRule::from_threshold(threshold).map_err(|e| {
                ConfigError::invalid(format!("thresholds.patterns[{idx}].pattern"), e.to_string())
            })?;
            analyzer = analyzer.with_rule(rule);
        }
        Ok(analyzer)
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Alerts in check order; within a check, in rule registration order.
    pub fn evaluate(&self, result: &RunResult) -> Vec<Alert> {
        let mut alerts = Vec::new();
        for check in result.checks.values() {
            for rule in &self.rules {
                let raised = rule.evaluate_check(check);
                if !raised.is_empty() {
                    tracing::debug!(rule = rule.name(), check = %check.check_name, count = raised.len(), "Rule raised alerts");
                }
                alerts.extend(raised);
            }
        }
        alerts
    }
}
