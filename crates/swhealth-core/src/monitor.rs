//! End-to-end health-check run.
//!
//! Ties the pieces together in the order connect → enable → sweep →
//! analyze → save → disconnect. Disconnect runs on every path once a
//! session was opened.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::Instrument;
use uuid::Uuid;

use crate::aggregator::ResultAggregator;
use crate::analyzer::{Alert, ThresholdAnalyzer};
use crate::config::ConfigModel;
use crate::error::{ConnectionError, PersistenceError, Result};
use crate::obs;
use crate::result::RunResult;
use crate::session::{DeviceConfig, SessionManager};
use crate::sink::{JsonFileSink, OutputSink};

/// Everything a finished run produced.
#[derive(Debug)]
pub struct RunReport {
    pub run_id: String,
    pub result: RunResult,
    pub alerts: Vec<Alert>,
    /// Where the result was written, if it was.
    pub saved_to: Option<PathBuf>,
    /// Why the result was not written, if saving failed.
    pub persistence_error: Option<PersistenceError>,
}

/// Runs a configured sweep against one device.
pub struct HealthMonitor {
    config: ConfigModel,
    analyzer: ThresholdAnalyzer,
    sink: Option<Arc<dyn OutputSink>>,
    output_dir: PathBuf,
}

impl HealthMonitor {
    /// Monitor with the analyzer and JSON sink described by `config`.
    pub fn from_config(config: ConfigModel) -> Result<Self> {
        let analyzer = ThresholdAnalyzer::from_config(&config.thresholds)?;
        let sink: Arc<dyn OutputSink> = Arc::new(JsonFileSink::new(&config.output.filename_prefix));
        let output_dir = config.output.file_path.clone();
        Ok(Self {
            config,
            analyzer,
            sink: Some(sink),
            output_dir,
        })
    }

    pub fn with_analyzer(mut self, analyzer: ThresholdAnalyzer) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Keep results in memory only.
    pub fn without_sink(mut self) -> Self {
        self.sink = None;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn config(&self) -> &ConfigModel {
        &self.config
    }

    /// Run the sweep on `manager`'s session.
    ///
    /// Connection and elevation failures are returned after cleanup.
    /// Command and save failures are reported inside the [`RunReport`].
    /// `manager` is always left disconnected.
    pub async fn run(&self, manager: &mut SessionManager, device: &DeviceConfig) -> Result<RunReport> {
        let run_id = Uuid::new_v4().to_string();
        let span = obs::run_span(&run_id, &device.host);

        async {
            let outcome = self.run_connected(manager, device, run_id.clone()).await;
            manager.disconnect().await;
            outcome
        }
        .instrument(span)
        .await
    }

    async fn run_connected(
        &self,
        manager: &mut SessionManager,
        device: &DeviceConfig,
        run_id: String,
    ) -> Result<RunReport> {
        let start = Instant::now();

        manager.connect(device).await?;
        if let Some(secret) = device.credentials.secret.as_ref() {
            manager.elevate(secret).await?;
        }
        let session = manager.session().ok_or_else(|| ConnectionError::Other {
            host: device.host.clone(),
            reason: "session closed before the sweep started".to_string(),
        })?;

        let result = ResultAggregator::run_all(session, &self.config).await;
        obs::emit_run_finished(&result.summary(), start.elapsed().as_millis() as u64);

        let alerts = self.analyzer.evaluate(&result);
        obs::emit_alerts_raised(alerts.len());

        let (saved_to, persistence_error) = match &self.sink {
            Some(sink) => match sink.save(&result, &self.output_dir) {
                Ok(path) => {
                    obs::emit_output_saved(&path);
                    (Some(path), None)
                }
                Err(e) => {
                    obs::emit_output_failed(&e);
                    (None, Some(e))
                }
            },
            None => (None, None),
        };

        Ok(RunReport {
            run_id,
            result,
            alerts,
            saved_to,
            persistence_error,
        })
    }
}
