//! swhealth core - declarative switch health checks
//!
//! Provides the health-check engine that:
//! - Opens one authenticated command session per run and always releases it
//! - Executes configured checks command by command, isolating failures
//! - Assembles a run result document and persists it as JSON
//! - Evaluates pluggable threshold rules over the result

pub mod aggregator;
pub mod analyzer;
pub mod config;
pub mod credentials;
pub mod error;
pub mod executor;
pub mod fakes;
pub mod monitor;
pub mod obs;
pub mod result;
pub mod session;
pub mod sink;
pub mod telemetry;

// Re-export key types
pub use aggregator::ResultAggregator;
pub use analyzer::{
    Alert, FailedCommandRule, OutputPatternRule, Severity, ThresholdAnalyzer, ThresholdRule,
};
pub use config::{
    CommandSpec, ConfigModel, ConnectionSettings, HealthCheckDefinition, OutputSettings,
    PatternThreshold, ThresholdSettings, DEFAULT_CONFIG_FILE,
};
pub use credentials::{Credentials, Prompter};
pub use error::{
    CommandError, ConfigError, ConnectionError, HealthError, PersistenceError, Result,
};
pub use executor::CheckExecutor;
pub use monitor::{HealthMonitor, RunReport};
pub use result::{
    CheckResult, CommandOutcome, CommandOutput, CommandResult, CommandStatus, RunResult,
    RunSummary,
};
pub use session::parser::{OutputParser, TabularParser};
pub use session::ssh::SshConnector;
pub use session::{CommandSession, Connector, DeviceConfig, SessionManager};
pub use sink::{JsonFileSink, OutputSink};
pub use telemetry::init_tracing;
