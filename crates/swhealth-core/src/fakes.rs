//! Scripted session fakes (testing only)
//!
//! `ScriptedConnector` hands out `ScriptedSession`s that answer commands from
//! a canned table and count every lifecycle call in a shared `SessionStats`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use secrecy::SecretString;

use crate::error::{CommandError, ConnectionError};
use crate::result::CommandOutput;
use crate::session::{CommandSession, Connector, DeviceConfig};

/// Counters shared between a connector and the sessions it opened.
#[derive(Debug, Default)]
pub struct SessionStats {
    connects: AtomicUsize,
    enables: AtomicUsize,
    closes: AtomicUsize,
    sent: Mutex<Vec<(String, bool)>>,
}

impl SessionStats {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn enables(&self) -> usize {
        self.enables.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Commands sent, in order.
    pub fn commands(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(c, _)| c.clone()).collect()
    }

    /// Commands sent with their parse flag, in order.
    pub fn commands_with_parse(&self) -> Vec<(String, bool)> {
        self.sent.lock().unwrap().clone()
    }
}

type Script = HashMap<String, Result<CommandOutput, CommandError>>;

/// Connector that never touches the network.
#[derive(Default)]
pub struct ScriptedConnector {
    connect_error: Option<ConnectionError>,
    enable_error: Option<ConnectionError>,
    close_error: Option<CommandError>,
    script: Arc<Script>,
    hang_on: Option<String>,
    stall_close: Arc<AtomicBool>,
    stats: Arc<SessionStats>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_connect(mut self, err: ConnectionError) -> Self {
        self.connect_error = Some(err);
        self
    }

    pub fn fail_enable(mut self, err: ConnectionError) -> Self {
        self.enable_error = Some(err);
        self
    }

    pub fn fail_close(mut self, err: CommandError) -> Self {
        self.close_error = Some(err);
        self
    }

    /// Canned output for `command`.
    pub fn respond(mut self, command: &str, output: impl Into<CommandOutput>) -> Self {
        Arc::make_mut(&mut self.script).insert(command.to_string(), Ok(output.into()));
        self
    }

    /// Make `command` fail.
    pub fn fail_command(mut self, command: &str, err: CommandError) -> Self {
        Arc::make_mut(&mut self.script).insert(command.to_string(), Err(err));
        self
    }

    /// Never answer `command`, simulating a device that stops responding.
    pub fn hang_on(mut self, command: &str) -> Self {
        self.hang_on = Some(command.to_string());
        self
    }

    /// The first `close` never completes; later ones succeed.
    pub fn stall_first_close(self) -> Self {
        self.stall_close.store(true, Ordering::SeqCst);
        self
    }

    pub fn stats(&self) -> Arc<SessionStats> {
        Arc::clone(&self.stats)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(
        &self,
        _device: &DeviceConfig,
    ) -> Result<Box<dyn CommandSession>, ConnectionError> {
        if let Some(err) = &self.connect_error {
            return Err(err.clone());
        }
        self.stats.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSession {
            script: Arc::clone(&self.script),
            hang_on: self.hang_on.clone(),
            stall_close: Arc::clone(&self.stall_close),
            enable_error: self.enable_error.clone(),
            close_error: self.close_error.clone(),
            stats: Arc::clone(&self.stats),
        }))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Session answering from a fixed script.
///
/// Unscripted commands succeed with `"output of <command>"`.
pub struct ScriptedSession {
    script: Arc<Script>,
    hang_on: Option<String>,
    stall_close: Arc<AtomicBool>,
    enable_error: Option<ConnectionError>,
    close_error: Option<CommandError>,
    stats: Arc<SessionStats>,
}

#[async_trait]
impl CommandSession for ScriptedSession {
    async fn send_command(
        &mut self,
        command: &str,
        parse: bool,
    ) -> Result<CommandOutput, CommandError> {
        self.stats
            .sent
            .lock()
            .unwrap()
            .push((command.to_string(), parse));
        if self.hang_on.as_deref() == Some(command) {
            std::future::pending::<()>().await;
        }
        match self.script.get(command) {
            Some(answer) => answer.clone(),
            None => Ok(CommandOutput::Text(format!("output of {command}"))),
        }
    }

    async fn enable(&mut self, _secret: &SecretString) -> Result<(), ConnectionError> {
        self.stats.enables.fetch_add(1, Ordering::SeqCst);
        match &self.enable_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn close(&mut self) -> Result<(), CommandError> {
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
        if self.stall_close.swap(false, Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        match &self.close_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}
