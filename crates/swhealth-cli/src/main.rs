//! swhealth - switch health-check CLI
//!
//! Runs the diagnostic commands declared in a YAML config over one SSH
//! session and writes the outcome to a timestamped JSON file.
//!
//! ## Commands
//!
//! - `run`: Execute every enabled check and save the result
//! - `validate`: Load and validate a config file without connecting
//! - `checks`: List configured checks

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};

use swhealth_core::credentials::{ENV_HOST, ENV_PASS, ENV_SECRET, ENV_USER};
use swhealth_core::{
    init_tracing, ConfigModel, Credentials, DeviceConfig, HealthMonitor, Prompter, RunReport,
    SessionManager, SshConnector, DEFAULT_CONFIG_FILE,
};

#[derive(Parser)]
#[command(name = "swhealth")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Declarative health checks for network switches", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the switch and run every enabled check
    Run {
        /// Health-check config file
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,

        /// Directory for the result file (overrides output.file_path)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Print the summary without writing a result file
        #[arg(long)]
        no_save: bool,

        #[command(flatten)]
        credentials: CredentialArgs,
    },

    /// Validate a config file without connecting
    Validate {
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },

    /// List configured checks
    Checks {
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
}

/// Login values; anything missing is prompted for.
#[derive(Args, Debug, Default)]
struct CredentialArgs {
    /// Switch IP or hostname
    #[arg(long, env = ENV_HOST)]
    host: Option<String>,

    #[arg(short, long, env = ENV_USER)]
    username: Option<String>,

    #[arg(long, env = ENV_PASS, hide_env_values = true)]
    password: Option<String>,

    /// Enable secret; empty skips privilege elevation
    #[arg(long, env = ENV_SECRET, hide_env_values = true)]
    secret: Option<String>,
}

/// Prompts on the controlling terminal.
struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn prompt(&self, label: &str) -> io::Result<String> {
        let mut stderr = io::stderr();
        write!(stderr, "{label}: ")?;
        stderr.flush()?;
        let mut line = String::new();
        io::stdin().read_line(&mut line)?;
        Ok(line.trim_end_matches(&['\r', '\n'][..]).to_string())
    }

    fn prompt_hidden(&self, label: &str) -> io::Result<String> {
        rpassword::prompt_password(format!("{label}: "))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            config,
            output_dir,
            no_save,
            credentials,
        } => cmd_run(&config, output_dir, no_save, credentials).await,
        Commands::Validate { config } => cmd_validate(&config),
        Commands::Checks { config } => cmd_checks(&config),
    }
}

fn load_config(path: &Path) -> Result<ConfigModel> {
    ConfigModel::from_path(path)
        .with_context(|| format!("Failed to load config {}", path.display()))
}

async fn cmd_run(
    config_path: &Path,
    output_dir: Option<PathBuf>,
    no_save: bool,
    args: CredentialArgs,
) -> Result<()> {
    let config = load_config(config_path)?;
    let credentials = Credentials::resolve(
        args.host,
        args.username,
        args.password,
        args.secret,
        &TerminalPrompter,
    )
    .context("Failed to resolve switch credentials")?;
    let device = DeviceConfig::new(&config.connection, credentials);

    let mut monitor = HealthMonitor::from_config(config)?;
    if let Some(dir) = output_dir {
        monitor = monitor.with_output_dir(dir);
    }
    if no_save {
        monitor = monitor.without_sink();
    }

    let mut manager = SessionManager::new(Arc::new(SshConnector::new()));
    info!(host = %device.host, "Starting health check");

    let report = sweep(&monitor, &mut manager, &device, tokio::signal::ctrl_c()).await?;
    write_report(&mut io::stdout().lock(), &device.host, &report)?;
    Ok(())
}

/// Run the sweep until it finishes or `interrupt` resolves.
///
/// On interrupt the in-flight run is dropped and the session is closed
/// before returning. An interrupt that lands inside the run's own
/// disconnect leaves the session in the manager, so the close is retried.
async fn sweep<F>(
    monitor: &HealthMonitor,
    manager: &mut SessionManager,
    device: &DeviceConfig,
    interrupt: F,
) -> Result<RunReport>
where
    F: std::future::Future<Output = io::Result<()>>,
{
    let outcome = tokio::select! {
        outcome = monitor.run(manager, device) => Some(outcome),
        _ = interrupt => None,
    };

    match outcome {
        Some(outcome) => outcome.with_context(|| format!("Health check on {} failed", device.host)),
        None => {
            warn!(host = %device.host, "Interrupted, closing session");
            manager.disconnect().await;
            anyhow::bail!("Interrupted before the health check finished")
        }
    }
}

fn write_report(out: &mut impl Write, host: &str, report: &RunReport) -> io::Result<()> {
    let result = &report.result;
    let summary = result.summary();

    writeln!(out, "Health check: {host}")?;
    writeln!(out, "Run ID: {}", report.run_id)?;
    writeln!(out, "Executed: {}", result.execution_time.to_rfc3339())?;
    writeln!(out)?;

    for check in result.checks.values() {
        let status = if check.failed_count() == 0 { "✓" } else { "✗" };
        writeln!(
            out,
            "  {} {} ({}/{} commands succeeded)",
            status,
            check.check_name,
            check.passed_count(),
            check.commands.len()
        )?;
        for command in check.commands.iter().filter(|c| !c.is_success()) {
            writeln!(
                out,
                "      ✗ {}: {}",
                command.command,
                command.error().unwrap_or_default()
            )?;
        }
    }

    writeln!(out)?;
    writeln!(
        out,
        "Summary: {} checks, {} commands, {} succeeded, {} failed",
        summary.checks, summary.commands, summary.succeeded, summary.failed
    )?;

    match (&report.saved_to, &report.persistence_error) {
        (Some(path), _) => writeln!(out, "Saved: {}", path.display())?,
        (None, Some(err)) => writeln!(out, "✗ Result not saved: {err}")?,
        (None, None) => {}
    }

    if !report.alerts.is_empty() {
        writeln!(out)?;
        writeln!(out, "Alerts ({}):", report.alerts.len())?;
        for alert in &report.alerts {
            writeln!(out, "  {alert}")?;
        }
    }
    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let enabled = config.enabled_checks().count();
    println!(
        "✓ {} is valid: {} checks ({} enabled)",
        config_path.display(),
        config.health_checks.len(),
        enabled
    );
    Ok(())
}

fn cmd_checks(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    write_checks(&mut io::stdout().lock(), &config)?;
    Ok(())
}

fn write_checks(out: &mut impl Write, config: &ConfigModel) -> io::Result<()> {
    if config.health_checks.is_empty() {
        return writeln!(out, "No checks configured");
    }
    for check in config.health_checks.values() {
        let mark = if check.enabled { "x" } else { " " };
        writeln!(
            out,
            "[{}] {} ({} commands)",
            mark,
            check.name,
            check.commands.len()
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use swhealth_core::fakes::ScriptedConnector;
    use swhealth_core::{CommandError, ConnectionError};

    const CONFIG: &str = r#"
connection:
  device_type: cisco_ios
health_checks:
  system:
    enabled: true
    commands:
      - command: show version
      - command: show clock
  interfaces:
    commands:
      - command: show interfaces status
        parse: true
"#;

    fn device(config: &ConfigModel) -> DeviceConfig {
        DeviceConfig::new(
            &config.connection,
            Credentials::new("10.0.0.1", "admin", "hunter2"),
        )
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_arguments_parse() {
        let cli = Cli::try_parse_from([
            "swhealth",
            "run",
            "--config",
            "lab.yaml",
            "--output-dir",
            "/tmp/out",
            "--no-save",
            "--host",
            "10.0.0.1",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                config,
                output_dir,
                no_save,
                credentials,
            } => {
                assert_eq!(config, PathBuf::from("lab.yaml"));
                assert_eq!(output_dir, Some(PathBuf::from("/tmp/out")));
                assert!(no_save);
                assert_eq!(credentials.host.as_deref(), Some("10.0.0.1"));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_config_defaults_to_standard_file() {
        let cli = Cli::try_parse_from(["swhealth", "validate"]).unwrap();
        match cli.command {
            Commands::Validate { config } => assert_eq!(config, PathBuf::from(DEFAULT_CONFIG_FILE)),
            _ => panic!("expected validate"),
        }
    }

    #[test]
    fn test_write_checks_lists_enabled_flag() {
        let config = ConfigModel::from_yaml_str(CONFIG).unwrap();
        let mut out = Vec::new();
        write_checks(&mut out, &config).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "[x] system (2 commands)\n[ ] interfaces (1 commands)\n"
        );
    }

    #[tokio::test]
    async fn test_sweep_reports_failures_in_summary() {
        let config = ConfigModel::from_yaml_str(CONFIG).unwrap();
        let dev = device(&config);
        let connector = ScriptedConnector::new().fail_command(
            "show clock",
            CommandError::SessionClosed {
                command: "show clock".to_string(),
            },
        );
        let stats = connector.stats();
        let mut manager = SessionManager::new(Arc::new(connector));
        let monitor = HealthMonitor::from_config(config).unwrap().without_sink();

        let report = sweep(&monitor, &mut manager, &dev, std::future::pending())
            .await
            .unwrap();
        assert_eq!(stats.closes(), 1);

        let mut out = Vec::new();
        write_report(&mut out, "10.0.0.1", &report).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("✗ system (1/2 commands succeeded)"));
        assert!(text.contains("✗ show clock: Session closed"));
        assert!(text.contains("Summary: 1 checks, 2 commands, 1 succeeded, 1 failed"));
        assert!(!text.contains("Saved:"));
        assert!(!text.contains("Alerts"));
    }

    #[tokio::test]
    async fn test_sweep_interrupt_closes_session() {
        let config = ConfigModel::from_yaml_str(CONFIG).unwrap();
        let dev = device(&config);
        let connector = ScriptedConnector::new().hang_on("show version");
        let stats = connector.stats();
        let mut manager = SessionManager::new(Arc::new(connector));
        let monitor = HealthMonitor::from_config(config).unwrap().without_sink();

        let interrupt = async {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            Ok(())
        };
        let err = sweep(&monitor, &mut manager, &dev, interrupt)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("Interrupted"));
        assert_eq!(stats.closes(), 1);
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn test_sweep_interrupt_during_close_retries_close() {
        let config = ConfigModel::from_yaml_str(CONFIG).unwrap();
        let dev = device(&config);
        // Every check finishes at once; the run then stalls in its final close.
        let connector = ScriptedConnector::new().stall_first_close();
        let stats = connector.stats();
        let mut manager = SessionManager::new(Arc::new(connector));
        let monitor = HealthMonitor::from_config(config).unwrap().without_sink();

        let interrupt = async {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            Ok(())
        };
        let err = sweep(&monitor, &mut manager, &dev, interrupt)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("Interrupted"));
        assert_eq!(stats.closes(), 2);
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn test_sweep_connection_failure_has_context() {
        let config = ConfigModel::from_yaml_str(CONFIG).unwrap();
        let dev = device(&config);
        let connector = ScriptedConnector::new().fail_connect(ConnectionError::Timeout {
            host: "10.0.0.1".to_string(),
        });
        let mut manager = SessionManager::new(Arc::new(connector));
        let monitor = HealthMonitor::from_config(config).unwrap().without_sink();

        let err = sweep(&monitor, &mut manager, &dev, std::future::pending())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Health check on 10.0.0.1 failed");
        assert!(format!("{err:#}").contains("Timeout connecting to 10.0.0.1"));
    }
}
