//! Run result document.
//!
//! The shapes here serialize to the persisted JSON artifact:
//!
//! ```json
//! {
//!   "device_info": { "model": "C9300-48P" },
//!   "execution_time": "2026-10-19T09:30:00+02:00",
//!   "checks": {
//!     "system": {
//!       "check_name": "system",
//!       "timestamp": "2026-10-19T09:30:01+02:00",
//!       "commands": [
//!         { "command": "show version", "description": "", "status": "success", "output": "..." },
//!         { "command": "show bogus", "description": "", "status": "failed", "error": "..." }
//!       ]
//!     }
//!   }
//! }
//! ```

use chrono::{DateTime, Local};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::config::CommandSpec;

/// Payload of a successful command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum CommandOutput {
    /// Raw device text.
    Text(String),
    /// Structured payload produced by an output parser.
    Structured(serde_json::Value),
}

impl CommandOutput {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CommandOutput::Text(s) => Some(s),
            CommandOutput::Structured(_) => None,
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, CommandOutput::Structured(_))
    }
}

impl From<String> for CommandOutput {
    fn from(s: String) -> Self {
        CommandOutput::Text(s)
    }
}

impl From<&str> for CommandOutput {
    fn from(s: &str) -> Self {
        CommandOutput::Text(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Success,
    Failed,
}

/// Exactly one of output or error, keyed by `status` in JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CommandOutcome {
    Success { output: CommandOutput },
    Failed { error: String },
}

/// Outcome of one command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandResult {
    pub command: String,
    pub description: String,
    #[serde(flatten)]
    pub outcome: CommandOutcome,
}

impl CommandResult {
    pub fn success(spec: &CommandSpec, output: CommandOutput) -> Self {
        Self {
            command: spec.command.clone(),
            description: spec.description.clone(),
            outcome: CommandOutcome::Success { output },
        }
    }

    pub fn failed(spec: &CommandSpec, error: impl Into<String>) -> Self {
        Self {
            command: spec.command.clone(),
            description: spec.description.clone(),
            outcome: CommandOutcome::Failed {
                error: error.into(),
            },
        }
    }

    pub fn status(&self) -> CommandStatus {
        match self.outcome {
            CommandOutcome::Success { .. } => CommandStatus::Success,
            CommandOutcome::Failed { .. } => CommandStatus::Failed,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status() == CommandStatus::Success
    }

    pub fn output(&self) -> Option<&CommandOutput> {
        match &self.outcome {
            CommandOutcome::Success { output } => Some(output),
            CommandOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            CommandOutcome::Success { .. } => None,
            CommandOutcome::Failed { error } => Some(error),
        }
    }
}

/// Outcome of one health check, commands in declaration order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckResult {
    pub check_name: String,
    /// Captured once when the check starts.
    pub timestamp: DateTime<Local>,
    pub commands: Vec<CommandResult>,
}

impl CheckResult {
    /// Number of commands that succeeded.
    pub fn passed_count(&self) -> usize {
        self.commands.iter().filter(|c| c.is_success()).count()
    }

    /// Number of commands that failed.
    pub fn failed_count(&self) -> usize {
        self.commands.len() - self.passed_count()
    }
}

/// Complete output of one sweep.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunResult {
    pub device_info: serde_json::Map<String, serde_json::Value>,
    pub execution_time: DateTime<Local>,
    pub checks: IndexMap<String, CheckResult>,
}

/// Aggregate counts over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub checks: usize,
    pub commands: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl RunResult {
    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary {
            checks: self.checks.len(),
            ..RunSummary::default()
        };
        for check in self.checks.values() {
            summary.commands += check.commands.len();
            summary.succeeded += check.passed_count();
        }
        summary.failed = summary.commands - summary.succeeded;
        summary
    }
}
