//! Session configuration
//!
//! A plain value handed to [`Session::new`](super::Session::new). It can be
//! built in code or loaded from a JSON file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::error::{SessionError, SessionResult};
use crate::DEFAULT_PORT;
use crate::protocol::{Channels, TargetLayout};

/// Configuration for a test session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Backend host name or address
    pub host: String,

    /// Backend UDP port
    pub port: u16,

    /// Fixed local port to bind (ephemeral when unset)
    pub local_port: Option<u16>,

    /// Output channels requested at attach
    pub channels: Channels,

    /// Time to wait for the attach acknowledgement
    pub attach_timeout_ms: u64,

    /// Time to wait for the target to report in after a reset
    pub reset_timeout_ms: u64,

    /// Default time `expect` waits for a line
    pub expect_timeout_ms: u64,

    /// Pause between sending detach and stopping the receiver
    pub detach_grace_ms: u64,

    /// Receiver socket poll interval, bounds how quickly it notices shutdown
    pub poll_interval_ms: u64,

    /// Reset the target in [`Session::setup_test`](super::Session::setup_test)
    pub reset_on_setup: bool,

    /// Field widths the target was built with
    pub layout: TargetLayout,

    /// Locally launched target executable
    pub local_target: Option<ProcessSpec>,

    /// Backend executable to launch before attaching
    pub backend: Option<ProcessSpec>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            local_port: None,
            channels: Channels::TEXT,
            attach_timeout_ms: 1000,
            reset_timeout_ms: 1000,
            expect_timeout_ms: 800,
            detach_grace_ms: 300,
            poll_interval_ms: 50,
            reset_on_setup: true,
            layout: TargetLayout::default(),
            local_target: None,
            backend: None,
        }
    }
}

impl SessionConfig {
    /// Load a configuration from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> SessionResult<Self> {
        let data = std::fs::read(path).map_err(|e| {
            SessionError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_slice(&data).map_err(|e| {
            SessionError::Config(format!("invalid config {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the session cannot work with.
    pub fn validate(&self) -> SessionResult<()> {
        if self.host.is_empty() {
            return Err(SessionError::Config("host must not be empty".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(SessionError::Config(
                "poll_interval_ms must be positive".into(),
            ));
        }
        let widths = [
            self.layout.signal,
            self.layout.event_size,
            self.layout.obj_ptr,
            self.layout.fun_ptr,
        ];
        if widths.iter().any(|w| ![1, 2, 4, 8].contains(w)) {
            return Err(SessionError::Config(format!(
                "unsupported field width in layout [{}]",
                self.layout
            )));
        }
        Ok(())
    }

    /// `host:port` of the backend.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Attach timeout as a duration.
    pub fn attach_timeout(&self) -> Duration {
        Duration::from_millis(self.attach_timeout_ms)
    }

    /// Reset timeout as a duration.
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    /// Default expect timeout as a duration.
    pub fn expect_timeout(&self) -> Duration {
        Duration::from_millis(self.expect_timeout_ms)
    }

    /// Detach grace period as a duration.
    pub fn detach_grace(&self) -> Duration {
        Duration::from_millis(self.detach_grace_ms)
    }

    /// Receiver poll interval as a duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// A locally launched helper process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSpec {
    /// Executable to run
    pub program: PathBuf,

    /// Command-line arguments
    #[serde(default)]
    pub args: Vec<String>,

    /// Time to let the process come up before talking to it
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

fn default_settle_ms() -> u64 {
    1000
}

impl ProcessSpec {
    /// Describe `program` with no arguments and the default settle time.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            settle_ms: default_settle_ms(),
        }
    }

    /// Settle time as a duration.
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}
