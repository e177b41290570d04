//! Command sessions over the system `ssh` client.
//!
//! Spawns `ssh -tt` (wrapped in `sshpass -e` when a password is set) and
//! talks to the device CLI expect-style: write a line, read until the
//! device prompt reappears. The SSH protocol itself is left to OpenSSH.

use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::parser::{OutputParser, TabularParser};
use super::{CommandSession, Connector, DeviceConfig};
use crate::error::{CommandError, ConnectionError};
use crate::result::CommandOutput;

/// How long `close` waits for the client to exit before killing it.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Exit code `sshpass` uses for a rejected password.
const SSHPASS_BAD_PASSWORD: i32 = 5;

fn login_prompt_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:^|[\r\n])([A-Za-z0-9][\w.\-/:@]*)(?:\([\w.\-]+\))?([>#])\s*\z")
            .expect("static prompt pattern")
    })
}

fn password_prompt_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)password:\s*\z").expect("static password pattern"))
}

/// Prompt matcher for a known hostname; captures the mode character.
fn session_prompt_re(hostname: &str) -> Regex {
    Regex::new(&format!(
        r"(?:^|[\r\n]){}(?:\([\w.\-]+\))?([>#])\s*\z",
        regex::escape(hostname)
    ))
    .expect("escaped hostname is a valid pattern")
}

/// Matches every prompt at a line start, for counting prompts in a transcript.
fn prompt_mark_re(hostname: &str) -> Regex {
    Regex::new(&format!(
        r"(?:^|[\r\n]){}(?:\([\w.\-]+\))?[>#]",
        regex::escape(hostname)
    ))
    .expect("escaped hostname is a valid pattern")
}

/// The final line of `text`, with its leading line break and trailing
/// whitespace. Prompts are only ever looked for here.
fn last_line(text: &str) -> &str {
    match text.trim_end().rfind(|c: char| c == '\r' || c == '\n') {
        Some(idx) => &text[idx..],
        None => text,
    }
}

/// Move the decodable prefix of `pending` into `out`.
///
/// Invalid sequences become U+FFFD; an incomplete trailing sequence stays in
/// `pending` until more bytes arrive.
fn decode_utf8(pending: &mut Vec<u8>, out: &mut String) {
    let mut consumed = 0;
    loop {
        match std::str::from_utf8(&pending[consumed..]) {
            Ok(valid) => {
                out.push_str(valid);
                consumed = pending.len();
                break;
            }
            Err(e) => {
                let valid_end = consumed + e.valid_up_to();
                out.push_str(std::str::from_utf8(&pending[consumed..valid_end]).unwrap_or_default());
                match e.error_len() {
                    Some(len) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        consumed = valid_end + len;
                    }
                    None => {
                        consumed = valid_end;
                        break;
                    }
                }
            }
        }
    }
    pending.drain(..consumed);
}

/// Strip the echoed command and trailing prompt from raw output.
fn clean_output(raw: &str, command: &str) -> String {
    let normalized = raw.replace("\r\n", "\n").replace('\r', "");
    let mut lines: Vec<&str> = normalized.lines().collect();
    if lines.last().is_some_and(|l| login_prompt_re().is_match(l.trim_end())) {
        lines.pop();
    }
    if lines.first().is_some_and(|l| l.trim().ends_with(command.trim())) {
        lines.remove(0);
    }
    lines.join("\n")
}

enum ReadError {
    Timeout,
    Eof,
    Io(std::io::Error),
}

/// Opens [`SshSession`]s.
pub struct SshConnector {
    ssh_program: String,
    leading_args: Vec<String>,
    parser: Option<Arc<dyn OutputParser>>,
}

impl Default for SshConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl SshConnector {
    /// Connector using `ssh` from `PATH` and the tabular output parser.
    pub fn new() -> Self {
        Self {
            ssh_program: "ssh".to_string(),
            leading_args: Vec::new(),
            parser: Some(Arc::new(TabularParser)),
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.ssh_program = program.into();
        self
    }

    /// Arguments passed to the program ahead of the ssh options, for
    /// wrappers such as `sh <script>`.
    pub fn with_leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_parser(mut self, parser: Arc<dyn OutputParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    /// Always return raw text, even when parsing is requested.
    pub fn without_parser(mut self) -> Self {
        self.parser = None;
        self
    }

    fn build_command(&self, device: &DeviceConfig) -> Command {
        let password = device.credentials.password.expose_secret();
        let mut cmd = if password.is_empty() {
            let mut cmd = Command::new(&self.ssh_program);
            cmd.args(&self.leading_args).arg("-o").arg("BatchMode=yes");
            cmd
        } else {
            let mut cmd = Command::new("sshpass");
            cmd.arg("-e").arg(&self.ssh_program).args(&self.leading_args);
            cmd.env("SSHPASS", password);
            cmd
        };

        cmd.arg("-tt")
            .arg("-o")
            .arg("StrictHostKeyChecking=accept-new")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", device.timeout.as_secs().max(1)));
        if device.port != 22 {
            cmd.arg("-p").arg(device.port.to_string());
        }
        cmd.arg("-l")
            .arg(&device.credentials.username)
            .arg(&device.host);

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(
        &self,
        device: &DeviceConfig,
    ) -> Result<Box<dyn CommandSession>, ConnectionError> {
        let host = device.host.clone();
        let other = |reason: String| ConnectionError::Other {
            host: host.clone(),
            reason,
        };

        let mut child = self
            .build_command(device)
            .spawn()
            .map_err(|e| other(format!("failed to spawn ssh client: {e}")))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| other("ssh stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| other("ssh stdout unavailable".to_string()))?;

        let mut session = SshSession {
            host: host.clone(),
            child,
            stdin,
            stdout,
            pending: Vec::new(),
            text: String::new(),
            prompt: login_prompt_re().clone(),
            prompt_mark: login_prompt_re().clone(),
            sync: SyncState::InSync,
            privileged: false,
            read_timeout: device.read_timeout(),
            parser: self.parser.clone(),
        };

        if let Err(e) = session.login().await {
            let _ = session.child.kill().await;
            return Err(e);
        }
        Ok(Box::new(session))
    }

    fn name(&self) -> &str {
        "ssh"
    }
}

/// Whether the output stream is aligned with the commands sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncState {
    InSync,
    /// A read timed out; the device may still be answering.
    Pending,
    /// Resynchronisation failed; the stream can no longer be trusted.
    Lost,
}

/// An interactive device CLI behind an `ssh` child process.
pub struct SshSession {
    host: String,
    child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
    /// Undecoded bytes of an incomplete UTF-8 sequence.
    pending: Vec<u8>,
    /// Decoded output since the last completed read.
    text: String,
    prompt: Regex,
    prompt_mark: Regex,
    sync: SyncState,
    privileged: bool,
    read_timeout: Duration,
    parser: Option<Arc<dyn OutputParser>>,
}

impl SshSession {
    async fn login(&mut self) -> Result<(), ConnectionError> {
        let banner = match self
            .read_until(|tail| login_prompt_re().is_match(tail), self.read_timeout)
            .await
        {
            Ok(banner) => banner,
            Err(ReadError::Timeout) => {
                return Err(ConnectionError::Timeout {
                    host: self.host.clone(),
                })
            }
            Err(ReadError::Eof) => return Err(self.classify_exit().await),
            Err(ReadError::Io(e)) => return Err(self.other(format!("read failed: {e}"))),
        };

        let caps = login_prompt_re()
            .captures(&banner)
            .ok_or_else(|| self.other("device prompt not recognised".to_string()))?;
        let hostname = caps[1].to_string();
        self.privileged = &caps[2] == "#";
        self.prompt = session_prompt_re(&hostname);
        self.prompt_mark = prompt_mark_re(&hostname);
        debug!(host = %self.host, prompt = %hostname, privileged = self.privileged, "Device prompt detected");

        self.send_command("terminal length 0", false)
            .await
            .map_err(|e| self.other(format!("failed to disable paging: {e}")))?;
        Ok(())
    }

    /// Read until `done` accepts the last line of the output.
    ///
    /// On success the whole output is returned and the read state reset.
    /// A timeout discards what was read so far.
    async fn read_until<F>(&mut self, done: F, timeout: Duration) -> Result<String, ReadError>
    where
        F: Fn(&str) -> bool,
    {
        let deadline = Instant::now().checked_add(timeout);
        let mut chunk = [0u8; 4096];
        loop {
            if done(last_line(&self.text)) {
                self.pending.clear();
                return Ok(std::mem::take(&mut self.text));
            }

            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => Duration::MAX,
            };
            if remaining.is_zero() {
                self.discard();
                return Err(ReadError::Timeout);
            }
            match tokio::time::timeout(remaining, self.stdout.read(&mut chunk)).await {
                Err(_) => {
                    self.discard();
                    return Err(ReadError::Timeout);
                }
                Ok(Ok(0)) => return Err(ReadError::Eof),
                Ok(Ok(n)) => {
                    self.pending.extend_from_slice(&chunk[..n]);
                    decode_utf8(&mut self.pending, &mut self.text);
                }
                Ok(Err(e)) => return Err(ReadError::Io(e)),
            }
        }
    }

    fn discard(&mut self) {
        self.pending.clear();
        self.text.clear();
    }

    /// Realign the stream after a timed-out read.
    ///
    /// The timed-out command still owes one prompt, and the empty line sent
    /// here produces another. Everything up to the second one is discarded.
    async fn resync(&mut self) -> Result<(), String> {
        self.send_line("")
            .await
            .map_err(|e| format!("write failed: {e}"))?;

        let prompt = self.prompt.clone();
        let started = Instant::now();
        let mut prompts_seen = 0;
        while prompts_seen < 2 {
            let remaining = self.read_timeout.saturating_sub(started.elapsed());
            let discarded = self
                .read_until(|tail| prompt.is_match(tail), remaining)
                .await
                .map_err(|e| match e {
                    ReadError::Timeout => "no prompt within the read timeout".to_string(),
                    ReadError::Eof => "session closed".to_string(),
                    ReadError::Io(e) => format!("read failed: {e}"),
                })?;
            prompts_seen += self.prompt_mark.find_iter(&discarded).count();
            debug!(host = %self.host, bytes = discarded.len(), "Discarded late output");
        }
        Ok(())
    }

    async fn send_line(&mut self, line: &str) -> std::io::Result<()> {
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await
    }

    /// Map an early client exit to a connection error.
    async fn classify_exit(&mut self) -> ConnectionError {
        let status = tokio::time::timeout(CLOSE_GRACE, self.child.wait()).await;
        let mut stderr = String::new();
        if let Some(mut pipe) = self.child.stderr.take() {
            let _ = tokio::time::timeout(CLOSE_GRACE, pipe.read_to_string(&mut stderr)).await;
        }
        let transcript = format!("{}\n{stderr}", self.text).to_lowercase();

        let bad_password = matches!(&status, Ok(Ok(s)) if s.code() == Some(SSHPASS_BAD_PASSWORD));
        if bad_password
            || transcript.contains("permission denied")
            || transcript.contains("authentication failed")
        {
            return ConnectionError::AuthFailure {
                host: self.host.clone(),
            };
        }
        if transcript.contains("timed out") {
            return ConnectionError::Timeout {
                host: self.host.clone(),
            };
        }

        let reason = stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("ssh client exited before the device prompt")
            .trim()
            .to_string();
        self.other(reason)
    }

    fn other(&self, reason: String) -> ConnectionError {
        ConnectionError::Other {
            host: self.host.clone(),
            reason,
        }
    }

    fn command_error(&self, command: &str, err: ReadError) -> CommandError {
        match err {
            ReadError::Timeout => CommandError::Timeout {
                command: command.to_string(),
                timeout_ms: self.read_timeout.as_millis() as u64,
            },
            ReadError::Eof => CommandError::SessionClosed {
                command: command.to_string(),
            },
            ReadError::Io(e) => CommandError::Transport {
                command: command.to_string(),
                reason: e.to_string(),
            },
        }
    }
}

#[async_trait]
impl CommandSession for SshSession {
    async fn send_command(
        &mut self,
        command: &str,
        parse: bool,
    ) -> Result<CommandOutput, CommandError> {
        match self.sync {
            SyncState::InSync => {}
            SyncState::Pending => match self.resync().await {
                Ok(()) => {
                    debug!(host = %self.host, "Session back in sync");
                    self.sync = SyncState::InSync;
                }
                Err(reason) => {
                    warn!(host = %self.host, reason = %reason, "Could not resync session");
                    self.sync = SyncState::Lost;
                }
            },
            SyncState::Lost => {}
        }
        if self.sync == SyncState::Lost {
            return Err(CommandError::Transport {
                command: command.to_string(),
                reason: "session out of sync after an earlier timeout".to_string(),
            });
        }

        self.send_line(command)
            .await
            .map_err(|e| self.command_error(command, ReadError::Io(e)))?;

        let prompt = self.prompt.clone();
        let raw = match self
            .read_until(|tail| prompt.is_match(tail), self.read_timeout)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                if matches!(e, ReadError::Timeout) {
                    self.sync = SyncState::Pending;
                }
                return Err(self.command_error(command, e));
            }
        };
        let text = clean_output(&raw, command);

        if parse {
            if let Some(value) = self.parser.as_ref().and_then(|p| p.parse(command, &text)) {
                return Ok(CommandOutput::Structured(value));
            }
            debug!(command = %command, "No structured form recognised, keeping raw text");
        }
        Ok(CommandOutput::Text(text))
    }

    async fn enable(&mut self, secret: &SecretString) -> Result<(), ConnectionError> {
        if self.privileged {
            return Ok(());
        }

        let map_read = |session: &mut Self, e: ReadError| -> ConnectionError {
            match e {
                ReadError::Timeout => {
                    session.sync = SyncState::Pending;
                    ConnectionError::Timeout {
                        host: session.host.clone(),
                    }
                }
                ReadError::Eof => session.other("session closed during enable".to_string()),
                ReadError::Io(e) => session.other(format!("enable failed: {e}")),
            }
        };

        self.send_line("enable")
            .await
            .map_err(|e| self.other(format!("enable failed: {e}")))?;
        let prompt = self.prompt.clone();
        let mut reply = self
            .read_until(
                |tail| password_prompt_re().is_match(tail) || prompt.is_match(tail),
                self.read_timeout,
            )
            .await
            .map_err(|e| map_read(self, e))?;

        if password_prompt_re().is_match(&reply) {
            self.send_line(secret.expose_secret())
                .await
                .map_err(|e| self.other(format!("enable failed: {e}")))?;
            reply = self
                .read_until(
                    |tail| password_prompt_re().is_match(tail) || prompt.is_match(tail),
                    self.read_timeout,
                )
                .await
                .map_err(|e| map_read(self, e))?;
        }

        let mode = self
            .prompt
            .captures(&reply)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());
        if mode.as_deref() != Some("#") {
            return Err(ConnectionError::AuthFailure {
                host: self.host.clone(),
            });
        }
        self.privileged = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), CommandError> {
        let _ = self.send_line("exit").await;
        match tokio::time::timeout(CLOSE_GRACE, self.child.wait()).await {
            Ok(Ok(_)) => Ok(()),
            _ => self
                .child
                .kill()
                .await
                .map_err(|e| CommandError::Transport {
                    command: "exit".to_string(),
                    reason: e.to_string(),
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_prompt_detection() {
        let re = login_prompt_re();
        let caps = re.captures("Welcome\r\nSW-CORE-01>").unwrap();
        assert_eq!(&caps[1], "SW-CORE-01");
        assert_eq!(&caps[2], ">");

        let caps = re.captures("banner\nsw1# ").unwrap();
        assert_eq!(&caps[2], "#");

        assert!(!re.is_match("Password: "));
        assert!(!re.is_match("sw1> show version\nCisco IOS"));
    }

    #[test]
    fn test_session_prompt_ignores_other_hosts() {
        let re = session_prompt_re("sw1.lab");
        assert!(re.is_match("output\r\nsw1.lab#"));
        assert!(re.is_match("output\nsw1.lab(config)#"));
        assert!(!re.is_match("output\nsw2#"));
        assert!(!re.is_match("sw1xlab#"));
    }

    #[test]
    fn test_password_prompt() {
        assert!(password_prompt_re().is_match("enable\r\nPassword: "));
        assert!(!password_prompt_re().is_match("password: accepted\nsw1#"));
    }

    #[test]
    fn test_last_line_keeps_leading_break() {
        assert_eq!(last_line("show clock\r\n10:00\r\nsw1# "), "\nsw1# ");
        assert_eq!(last_line("sw1>"), "sw1>");
        assert_eq!(last_line("out\nsw1>\r\n"), "\nsw1>\r\n");
        assert!(session_prompt_re("sw1").is_match(last_line("a\nb\nsw1#")));
        assert!(!session_prompt_re("sw1").is_match(last_line("sw1#\nstill running")));
    }

    #[test]
    fn test_decode_utf8_across_chunks() {
        let bytes = "temp 45°C ok".as_bytes();
        let split = bytes.iter().position(|&b| b == 0xC2).unwrap() + 1;
        let mut pending = Vec::new();
        let mut text = String::new();

        pending.extend_from_slice(&bytes[..split]);
        decode_utf8(&mut pending, &mut text);
        assert_eq!(text, "temp 45");
        assert_eq!(pending.len(), 1, "half a character is held back");

        pending.extend_from_slice(&bytes[split..]);
        decode_utf8(&mut pending, &mut text);
        assert_eq!(text, "temp 45°C ok");
        assert!(pending.is_empty());
    }

    #[test]
    fn test_decode_utf8_replaces_invalid_bytes() {
        let mut pending = vec![b'a', 0xFF, b'b'];
        let mut text = String::new();
        decode_utf8(&mut pending, &mut text);
        assert_eq!(text, "a\u{FFFD}b");
        assert!(pending.is_empty());
    }

    #[test]
    fn test_prompt_mark_counts_prompts() {
        let re = prompt_mark_re("sw1");
        assert_eq!(re.find_iter("SLOW OUTPUT\r\nsw1>\r\nsw1>").count(), 2);
        assert_eq!(re.find_iter("sw1#show clock\nOUT\nsw1#").count(), 2);
        assert_eq!(re.find_iter("late output only").count(), 0);
    }

    #[test]
    fn test_clean_output_strips_echo_and_prompt() {
        let raw = "show clock\r\n*10:00:00.000 UTC Mon Oct 19 2026\r\nsw1#";
        assert_eq!(clean_output(raw, "show clock"), "*10:00:00.000 UTC Mon Oct 19 2026");
    }

    #[test]
    fn test_clean_output_keeps_body_without_echo() {
        let raw = "line one\nline two\nsw1>";
        assert_eq!(clean_output(raw, "show x"), "line one\nline two");
    }

    #[test]
    fn test_build_command_uses_sshpass_for_passwords() {
        use crate::config::ConnectionSettings;
        use crate::credentials::Credentials;

        let settings = ConnectionSettings {
            device_type: "cisco_ios".to_string(),
            timeout: 20,
            global_delay_factor: 1.0,
            port: 2222,
        };
        let device = DeviceConfig::new(&settings, Credentials::new("sw1", "admin", "pw"));
        let cmd = SshConnector::new().build_command(&device);
        let std_cmd = cmd.as_std();
        assert_eq!(std_cmd.get_program(), "sshpass");
        let args: Vec<_> = std_cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert!(args.contains(&"-tt".to_string()));
        assert!(args.contains(&"ConnectTimeout=20".to_string()));
        assert!(args.contains(&"2222".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("sw1"));
    }

    #[test]
    fn test_build_command_batch_mode_without_password() {
        use crate::config::ConnectionSettings;
        use crate::credentials::Credentials;

        let settings = ConnectionSettings {
            device_type: "cisco_ios".to_string(),
            timeout: 20,
            global_delay_factor: 1.0,
            port: 22,
        };
        let device = DeviceConfig::new(&settings, Credentials::new("sw1", "admin", ""));
        let cmd = SshConnector::new()
            .with_program("sh")
            .with_leading_args(["device.sh"])
            .build_command(&device);
        let std_cmd = cmd.as_std();
        assert_eq!(std_cmd.get_program(), "sh");
        let args: Vec<_> = std_cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args[0], "device.sh");
        assert_eq!(args[1], "-o");
        assert_eq!(args[2], "BatchMode=yes");
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(!args.contains(&"-p".to_string()));
    }
}
