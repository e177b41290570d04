//! Structured lifecycle events for health-check runs.
//!
//! Every component logs through these emitters so field names stay stable
//! for log consumers. Events go to whatever `tracing` subscriber is active:
//! the binary installs one via [`crate::telemetry::init_tracing`], tests can
//! scope their own with `tracing::subscriber::with_default`.

use tracing::{error, info, warn};

use crate::error::{CommandError, ConnectionError, PersistenceError};
use crate::result::RunSummary;

/// Span that tags every event of one run with its `run_id`.
///
/// Attach it to the run future with `tracing::Instrument::instrument`.
pub fn run_span(run_id: &str, host: &str) -> tracing::Span {
    tracing::info_span!("swhealth.run", run_id = %run_id, host = %host)
}

pub fn emit_run_started(check_count: usize) {
    info!(event = "run.started", checks = check_count, "Starting all health checks");
}

pub fn emit_run_finished(summary: &RunSummary, duration_ms: u64) {
    info!(
        event = "run.finished",
        checks = summary.checks,
        commands = summary.commands,
        succeeded = summary.succeeded,
        failed = summary.failed,
        duration_ms = duration_ms,
    );
}

pub fn emit_session_connecting(host: &str, connector: &str) {
    info!(event = "session.connecting", host = %host, connector = %connector, "Connecting to {host}...");
}

pub fn emit_session_connected(host: &str) {
    info!(event = "session.connected", host = %host, "Successfully connected to {host}");
}

pub fn emit_connection_failed(err: &ConnectionError) {
    error!(event = "session.failed", host = %err.host(), error = %err);
}

pub fn emit_session_disconnected(host: &str) {
    info!(event = "session.disconnected", host = %host, "Disconnected from device");
}

pub fn emit_check_skipped(check_name: &str) {
    warn!(event = "check.skipped", check = %check_name, "Health check '{check_name}' not enabled or not found");
}

pub fn emit_check_started(check_name: &str, command_count: usize) {
    info!(event = "check.started", check = %check_name, commands = command_count, "Executing {check_name} health check...");
}

pub fn emit_command_started(check_name: &str, command: &str) {
    info!(event = "command.started", check = %check_name, command = %command, "Executing: {command}");
}

pub fn emit_command_failed(check_name: &str, command: &str, err: &CommandError) {
    error!(event = "command.failed", check = %check_name, command = %command, error = %err);
}

pub fn emit_output_saved(path: &std::path::Path) {
    info!(event = "output.saved", path = %path.display(), "Results saved to {}", path.display());
}

pub fn emit_output_failed(err: &PersistenceError) {
    error!(event = "output.failed", error = %err, "Error saving results");
}

pub fn emit_alerts_raised(count: usize) {
    if count > 0 {
        warn!(event = "analysis.alerts", alerts = count);
    } else {
        info!(event = "analysis.alerts", alerts = count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_create() {
        let span = run_span("test-run-id", "sw1");
        let _entered = span.enter();
        emit_run_started(3);
    }
}
