//! Sweep over every configured check.

use chrono::Local;
use indexmap::IndexMap;

use crate::config::ConfigModel;
use crate::executor::CheckExecutor;
use crate::obs;
use crate::result::RunResult;
use crate::session::CommandSession;

/// Drives [`CheckExecutor`] across a configuration.
pub struct ResultAggregator;

impl ResultAggregator {
    /// Execute all enabled checks in declaration order.
    ///
    /// Disabled checks are omitted from `checks`. `device_info` is copied
    /// from `switch_info` unchanged and `execution_time` is taken once.
    pub async fn run_all(session: &mut dyn CommandSession, config: &ConfigModel) -> RunResult {
        let execution_time = Local::now();
        obs::emit_run_started(config.enabled_checks().count());

        let mut checks = IndexMap::new();
        for (name, check) in &config.health_checks {
            if let Some(result) = CheckExecutor::run(session, check).await {
                checks.insert(name.clone(), result);
            }
        }

        RunResult {
            device_info: config.switch_info.clone(),
            execution_time,
            checks,
        }
    }
}
