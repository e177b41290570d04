//! Tracing subscriber setup for the `swhealth` binary.
//!
//! Log lines go to stderr so stdout stays free for the run summary.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable holding a filter directive, e.g. `swhealth_core=debug`.
pub const LOG_ENV: &str = "SWHEALTH_LOG";

fn env_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}

/// Install the global subscriber.
///
/// `SWHEALTH_LOG`, then `RUST_LOG`, override `level`. With `json` set, lines
/// are newline-delimited JSON. Only the first call in a process takes effect.
pub fn init_tracing(json: bool, level: Level) {
    let filter = env_filter(level);
    let stderr = fmt::layer().with_writer(std::io::stderr);

    let installed = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr.json().with_current_span(true))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr.with_target(true))
            .try_init()
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
