//! Client configuration parsing and validation.

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::ipc::locator::PipeSelector;
use crate::{AppError, Result};

/// Environment variable that overrides `client_id`.
pub const CLIENT_ID_ENV: &str = "PRESENCE_CLIENT_ID";

fn default_handshake_timeout() -> u64 {
    10
}

/// Client configuration, usually parsed from `presence.toml`.
///
/// ```toml
/// client_id = "123456"
/// pipe = 0                      # or "/run/user/1000/discord-ipc-0"
/// command_timeout_seconds = 15  # 0 waits forever
/// handshake_timeout_seconds = 10
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ClientConfig {
    /// Application client id sent in the hello.
    pub client_id: String,
    /// Which IPC channel to connect to.
    #[serde(default)]
    pub pipe: PipeSelector,
    /// Deadline for each command reply; 0 means no deadline.
    #[serde(default)]
    pub command_timeout_seconds: u64,
    /// Deadline for the READY reply; 0 means no deadline.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_seconds: u64,
}

impl ClientConfig {
    /// Configuration with defaults for `client_id`.
    #[must_use]
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            pipe: PipeSelector::Any,
            command_timeout_seconds: 0,
            handshake_timeout_seconds: default_handshake_timeout(),
        }
    }

    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Replace `client_id` with [`CLIENT_ID_ENV`] when it is set.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the override fails validation.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(id) = env::var(CLIENT_ID_ENV) {
            if id.trim().is_empty() {
                warn!(var = CLIENT_ID_ENV, "ignoring empty client id override");
            } else {
                self.client_id = id;
            }
        }
        self.validate()
    }

    /// Validate field values.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for an empty or whitespace-containing
    /// client id, or a pipe index outside `0..=9`.
    pub fn validate(&self) -> Result<()> {
        if self.client_id.is_empty() {
            return Err(AppError::Config("client_id must not be empty".into()));
        }
        if self.client_id.chars().any(char::is_whitespace) {
            return Err(AppError::Config(format!(
                "client_id must not contain whitespace: '{}'",
                self.client_id
            )));
        }
        if let PipeSelector::Index(n) = self.pipe {
            if n > 9 {
                return Err(AppError::Config(format!(
                    "pipe index must be between 0 and 9, got {n}"
                )));
            }
        }
        Ok(())
    }

    /// Per-command reply deadline.
    #[must_use]
    pub fn command_timeout(&self) -> Option<Duration> {
        non_zero_seconds(self.command_timeout_seconds)
    }

    /// READY reply deadline.
    #[must_use]
    pub fn handshake_timeout(&self) -> Option<Duration> {
        non_zero_seconds(self.handshake_timeout_seconds)
    }
}

fn non_zero_seconds(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}
