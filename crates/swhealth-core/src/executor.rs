//! Execution of a single health check.

use chrono::Local;

use crate::config::{ConfigModel, HealthCheckDefinition};
use crate::obs;
use crate::result::{CheckResult, CommandResult};
use crate::session::CommandSession;

/// Runs the commands of one check against an open session.
pub struct CheckExecutor;

impl CheckExecutor {
    /// Execute `check` and return its result.
    ///
    /// Returns `None` for a disabled check. Commands run in declaration
    /// order and each is attempted exactly once; a failing command is
    /// recorded and the next one still runs.
    pub async fn run(
        session: &mut dyn CommandSession,
        check: &HealthCheckDefinition,
    ) -> Option<CheckResult> {
        if !check.enabled {
            obs::emit_check_skipped(&check.name);
            return None;
        }

        obs::emit_check_started(&check.name, check.commands.len());
        let timestamp = Local::now();
        let mut commands = Vec::with_capacity(check.commands.len());

        for spec in &check.commands {
            obs::emit_command_started(&check.name, &spec.command);
            let result = match session.send_command(&spec.command, spec.parse).await {
                Ok(output) => CommandResult::success(spec, output),
                Err(e) => {
                    obs::emit_command_failed(&check.name, &spec.command, &e);
                    CommandResult::failed(spec, e.to_string())
                }
            };
            commands.push(result);
        }

        Some(CheckResult {
            check_name: check.name.clone(),
            timestamp,
            commands,
        })
    }

    /// Look up `check_name` in `config` and execute it.
    ///
    /// Unknown names behave like disabled checks.
    pub async fn run_named(
        session: &mut dyn CommandSession,
        config: &ConfigModel,
        check_name: &str,
    ) -> Option<CheckResult> {
        match config.check(check_name) {
            Some(check) => Self::run(session, check).await,
            None => {
                obs::emit_check_skipped(check_name);
                None
            }
        }
    }
}
