//! Device command sessions and their lifecycle.
//!
//! A [`Connector`] opens an authenticated [`CommandSession`]; the
//! [`SessionManager`] owns the single session of a run and guarantees it is
//! released at most once.

pub mod parser;
pub mod ssh;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use tracing::{debug, warn};

use crate::config::ConnectionSettings;
use crate::credentials::Credentials;
use crate::error::{CommandError, ConnectionError};
use crate::obs;
use crate::result::CommandOutput;

/// Everything needed to reach one device.
#[derive(Debug)]
pub struct DeviceConfig {
    pub device_type: String,
    pub host: String,
    pub port: u16,
    pub credentials: Credentials,
    pub timeout: Duration,
    pub delay_factor: f64,
}

impl DeviceConfig {
    pub fn new(connection: &ConnectionSettings, credentials: Credentials) -> Self {
        Self {
            device_type: connection.device_type.clone(),
            host: credentials.host.clone(),
            port: connection.port,
            credentials,
            timeout: Duration::from_secs(connection.timeout),
            delay_factor: connection.global_delay_factor,
        }
    }

    /// Transport read timeout: `timeout` scaled by the delay factor.
    ///
    /// Saturates at `Duration::MAX` instead of overflowing.
    pub fn read_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout.as_secs_f64() * self.delay_factor)
            .unwrap_or(Duration::MAX)
    }
}

/// An authenticated, exclusive command channel to a device.
///
/// One command is in flight at a time; `&mut self` enforces that.
#[async_trait]
pub trait CommandSession: Send {
    /// Send one command and wait for its output.
    ///
    /// With `parse` set the session may return [`CommandOutput::Structured`];
    /// it falls back to text when no structure is recognised.
    async fn send_command(
        &mut self,
        command: &str,
        parse: bool,
    ) -> Result<CommandOutput, CommandError>;

    /// Raise privilege level with the enable secret.
    async fn enable(&mut self, secret: &SecretString) -> Result<(), ConnectionError>;

    /// Close the underlying transport.
    async fn close(&mut self) -> Result<(), CommandError>;
}

/// Opens sessions to devices.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        device: &DeviceConfig,
    ) -> Result<Box<dyn CommandSession>, ConnectionError>;

    /// Connector name for logs.
    fn name(&self) -> &str;
}

/// Owns the connect/enable/disconnect lifecycle of one session.
pub struct SessionManager {
    connector: Arc<dyn Connector>,
    session: Option<Box<dyn CommandSession>>,
    host: String,
}

impl SessionManager {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            session: None,
            host: String::new(),
        }
    }

    /// Open the run's session. Fails if one is already open.
    pub async fn connect(&mut self, device: &DeviceConfig) -> Result<(), ConnectionError> {
        if self.session.is_some() {
            return Err(ConnectionError::Other {
                host: device.host.clone(),
                reason: "a session is already open for this run".to_string(),
            });
        }

        obs::emit_session_connecting(&device.host, self.connector.name());
        match self.connector.connect(device).await {
            Ok(session) => {
                self.session = Some(session);
                self.host = device.host.clone();
                obs::emit_session_connected(&device.host);
                Ok(())
            }
            Err(e) => {
                obs::emit_connection_failed(&e);
                Err(e)
            }
        }
    }

    /// Enter privileged mode on the open session.
    pub async fn elevate(&mut self, secret: &SecretString) -> Result<(), ConnectionError> {
        let host = self.host.clone();
        let session = self.session.as_deref_mut().ok_or_else(|| ConnectionError::Other {
            host: host.clone(),
            reason: "no active session".to_string(),
        })?;
        if let Err(e) = session.enable(secret).await {
            obs::emit_connection_failed(&e);
            return Err(e);
        }
        debug!(host = %host, "Entered enable mode");
        Ok(())
    }

    /// The open session, if any.
    pub fn session(&mut self) -> Option<&mut (dyn CommandSession + 'static)> {
        self.session.as_deref_mut()
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Close the session. A no-op when nothing is open.
    ///
    /// Transport errors while closing are logged, never returned. The
    /// session stays in the manager until `close` returns, so a disconnect
    /// cancelled midway can be repeated.
    pub async fn disconnect(&mut self) {
        let Some(session) = self.session.as_deref_mut() else {
            return;
        };
        let closed = session.close().await;
        self.session = None;
        match closed {
            Ok(()) => obs::emit_session_disconnected(&self.host),
            Err(e) => warn!(host = %self.host, error = %e, "Error while disconnecting"),
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if self.session.is_some() {
            warn!(host = %self.host, "SessionManager dropped with an open session");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::ScriptedConnector;

    fn device() -> DeviceConfig {
        let settings = ConnectionSettings {
            device_type: "cisco_ios".to_string(),
            timeout: 10,
            global_delay_factor: 1.5,
            port: 22,
        };
        DeviceConfig::new(&settings, Credentials::new("sw1", "admin", "pw"))
    }

    #[test]
    fn test_read_timeout_scaled() {
        assert_eq!(device().read_timeout(), Duration::from_secs(15));
    }

    #[test]
    fn test_read_timeout_saturates() {
        let settings = ConnectionSettings {
            device_type: "cisco_ios".to_string(),
            timeout: u64::MAX,
            global_delay_factor: 2.0,
            port: 22,
        };
        let device = DeviceConfig::new(&settings, Credentials::new("sw1", "admin", "pw"));
        assert_eq!(device.read_timeout(), Duration::MAX);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let connector = Arc::new(ScriptedConnector::new());
        let stats = connector.stats();
        let mut manager = SessionManager::new(connector);

        manager.connect(&device()).await.unwrap();
        assert!(manager.is_connected());

        manager.disconnect().await;
        manager.disconnect().await;

        assert!(!manager.is_connected());
        assert_eq!(stats.connects(), 1);
        assert_eq!(stats.closes(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_disconnect_can_be_repeated() {
        let connector = Arc::new(ScriptedConnector::new().stall_first_close());
        let stats = connector.stats();
        let mut manager = SessionManager::new(connector);
        manager.connect(&device()).await.unwrap();

        tokio::select! {
            _ = manager.disconnect() => panic!("first close should stall"),
            _ = tokio::time::sleep(Duration::from_millis(20)) => {}
        }
        assert!(manager.is_connected(), "session kept while close was in flight");

        manager.disconnect().await;
        assert!(!manager.is_connected());
        assert_eq!(stats.closes(), 2);
    }

    #[tokio::test]
    async fn test_disconnect_without_session_is_noop() {
        let connector = Arc::new(ScriptedConnector::new());
        let stats = connector.stats();
        let mut manager = SessionManager::new(connector);
        manager.disconnect().await;
        assert_eq!(stats.closes(), 0);
    }

    #[tokio::test]
    async fn test_second_connect_rejected() {
        let connector = Arc::new(ScriptedConnector::new());
        let stats = connector.stats();
        let mut manager = SessionManager::new(connector);
        manager.connect(&device()).await.unwrap();

        let err = manager.connect(&device()).await.unwrap_err();
        assert!(matches!(err, ConnectionError::Other { .. }));
        assert_eq!(stats.connects(), 1);
        manager.disconnect().await;
    }

    #[tokio::test]
    async fn test_failed_connect_leaves_no_session() {
        let connector = Arc::new(ScriptedConnector::new().fail_connect(
            ConnectionError::AuthFailure {
                host: "sw1".to_string(),
            },
        ));
        let mut manager = SessionManager::new(connector);
        let err = manager.connect(&device()).await.unwrap_err();
        assert!(matches!(err, ConnectionError::AuthFailure { .. }));
        assert!(!manager.is_connected());
        assert!(manager.session().is_none());
    }

    #[tokio::test]
    async fn test_elevate_without_session_fails() {
        let mut manager = SessionManager::new(Arc::new(ScriptedConnector::new()));
        let err = manager
            .elevate(&SecretString::from("en".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectionError::Other { .. }));
    }

    #[tokio::test]
    async fn test_elevate_failure_surfaces_as_connection_error() {
        let connector = Arc::new(ScriptedConnector::new().fail_enable(
            ConnectionError::AuthFailure {
                host: "sw1".to_string(),
            },
        ));
        let stats = connector.stats();
        let mut manager = SessionManager::new(connector);
        manager.connect(&device()).await.unwrap();

        let err = manager
            .elevate(&SecretString::from("wrong".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectionError::AuthFailure { .. }));
        assert_eq!(stats.enables(), 1);

        manager.disconnect().await;
        assert_eq!(stats.closes(), 1);
    }
}
