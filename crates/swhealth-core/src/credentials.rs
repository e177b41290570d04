//! Device credentials.
//!
//! Values come from `SWITCH_HOST`, `SWITCH_USER`, `SWITCH_PASS` and
//! `SWITCH_SECRET`; anything unset is asked for through a [`Prompter`].

use secrecy::{ExposeSecret, SecretString};

use crate::error::ConfigError;

pub const ENV_HOST: &str = "SWITCH_HOST";
pub const ENV_USER: &str = "SWITCH_USER";
pub const ENV_PASS: &str = "SWITCH_PASS";
pub const ENV_SECRET: &str = "SWITCH_SECRET";

/// Interactive source for credentials that were not supplied.
pub trait Prompter {
    /// Ask for a visible value.
    fn prompt(&self, label: &str) -> std::io::Result<String>;

    /// Ask for a value without echoing it.
    fn prompt_hidden(&self, label: &str) -> std::io::Result<String>;
}

/// Login material for one device.
#[derive(Debug)]
pub struct Credentials {
    pub host: String,
    pub username: String,
    pub password: SecretString,
    /// Enable secret; `None` skips privilege elevation.
    pub secret: Option<SecretString>,
}

impl Credentials {
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            username: username.into(),
            password: SecretString::from(password.into()),
            secret: None,
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(SecretString::from(secret.into()));
        self
    }

    /// Fill gaps in the supplied values by prompting.
    ///
    /// An empty enable secret (supplied or answered) means no elevation.
    pub fn resolve(
        host: Option<String>,
        username: Option<String>,
        password: Option<String>,
        secret: Option<String>,
        prompter: &dyn Prompter,
    ) -> Result<Self, ConfigError> {
        let host = match non_empty(host) {
            Some(h) => h,
            None => ask(prompter, "Switch IP/Hostname", false)?,
        };
        let username = match non_empty(username) {
            Some(u) => u,
            None => ask(prompter, "Username", false)?,
        };
        let password = match password {
            Some(p) => p,
            None => ask(prompter, "Password", true)?,
        };
        let secret = match secret {
            Some(s) => s,
            None => ask(prompter, "Enable Secret (press Enter to skip)", true)?,
        };

        let host = host.trim().to_string();
        let username = username.trim().to_string();
        if host.is_empty() {
            return Err(ConfigError::MissingCredential("host"));
        }
        if username.is_empty() {
            return Err(ConfigError::MissingCredential("username"));
        }

        Ok(Self {
            host,
            username,
            password: SecretString::from(password),
            secret: (!secret.is_empty()).then(|| SecretString::from(secret)),
        })
    }

    /// Whether an enable secret was supplied.
    pub fn wants_enable(&self) -> bool {
        self.secret
            .as_ref()
            .is_some_and(|s| !s.expose_secret().is_empty())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn ask(prompter: &dyn Prompter, label: &'static str, hidden: bool) -> Result<String, ConfigError> {
    let answer = if hidden {
        prompter.prompt_hidden(label)
    } else {
        prompter.prompt(label)
    };
    answer.map_err(|source| ConfigError::Prompt { label, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct CannedPrompter {
        answers: RefCell<Vec<String>>,
        asked: RefCell<Vec<String>>,
    }

    impl CannedPrompter {
        fn new(answers: &[&str]) -> Self {
            Self {
                answers: RefCell::new(answers.iter().rev().map(|s| s.to_string()).collect()),
                asked: RefCell::new(Vec::new()),
            }
        }
    }

    impl Prompter for CannedPrompter {
        fn prompt(&self, label: &str) -> std::io::Result<String> {
            self.asked.borrow_mut().push(label.to_string());
            Ok(self.answers.borrow_mut().pop().unwrap_or_default())
        }

        fn prompt_hidden(&self, label: &str) -> std::io::Result<String> {
            self.prompt(label)
        }
    }

    #[test]
    fn test_all_supplied_never_prompts() {
        let prompter = CannedPrompter::new(&[]);
        let creds = Credentials::resolve(
            Some("10.1.1.1".to_string()),
            Some("admin".to_string()),
            Some("pw".to_string()),
            Some("en".to_string()),
            &prompter,
        )
        .unwrap();
        assert!(prompter.asked.borrow().is_empty());
        assert_eq!(creds.host, "10.1.1.1");
        assert_eq!(creds.password.expose_secret(), "pw");
        assert!(creds.wants_enable());
    }

    #[test]
    fn test_missing_values_are_prompted_in_order() {
        let prompter = CannedPrompter::new(&["sw1", "ops", "secretpw", ""]);
        let creds = Credentials::resolve(None, None, None, None, &prompter).unwrap();
        assert_eq!(prompter.asked.borrow().len(), 4);
        assert_eq!(creds.host, "sw1");
        assert_eq!(creds.username, "ops");
        assert!(creds.secret.is_none());
        assert!(!creds.wants_enable());
    }

    #[test]
    fn test_empty_host_after_prompt_rejected() {
        let prompter = CannedPrompter::new(&["   "]);
        let err = Credentials::resolve(None, Some("u".into()), Some("p".into()), Some(String::new()), &prompter)
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingCredential("host")));
    }

    #[test]
    fn test_debug_redacts_password() {
        let creds = Credentials::new("sw1", "admin", "hunter2").with_secret("enable-me");
        let dbg = format!("{creds:?}");
        assert!(!dbg.contains("hunter2"));
        assert!(!dbg.contains("enable-me"));
    }
}
