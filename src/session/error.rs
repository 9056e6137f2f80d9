//! Error types for test sessions
//!
//! Decode failures never escape the receiver; everything here is surfaced to
//! the caller as a typed failure.

use std::io;
use std::time::Duration;
use thiserror::Error;

use super::lifecycle::SessionState;
use crate::protocol::{DecodeError, EncodeError, TargetLayout};

/// Top-level session error
#[derive(Debug, Error)]
pub enum SessionError {
    /// Socket or process I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// A managed process could not be started
    #[error("Failed to launch {program}: {source}")]
    Launch {
        /// Program that failed to start
        program: String,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// The backend never acknowledged the attach request
    #[error("Timeout after {timeout:?} waiting for attach to backend at {endpoint} (is it running?)")]
    AttachTimeout {
        /// Backend address
        endpoint: String,
        /// How long we waited
        timeout: Duration,
    },

    /// The target did not report in after a reset
    #[error("Timeout after {timeout:?} waiting for target to reset")]
    TargetResetTimeout {
        /// How long we waited
        timeout: Duration,
    },

    /// No trace line arrived in time
    #[error("Expect timeout for match: \"{pattern}\"")]
    ExpectTimeout {
        /// Pattern that was being waited for
        pattern: String,
    },

    /// A trace line arrived but did not match
    #[error("Expect match failed!\nExpected: \"{expected}\"\nReceived: \"{actual}\"")]
    ExpectMismatch {
        /// Compared part of the pattern
        expected: String,
        /// Compared part of the received line
        actual: String,
    },

    /// Command issued outside the attached state
    #[error("Session is not attached (state: {state:?})")]
    NotAttached {
        /// Current session state
        state: SessionState,
    },

    /// Attach called on a live session
    #[error("Session is already attached")]
    AlreadyAttached,

    /// The target reported field widths that differ from the configuration
    #[error("Target layout mismatch: configured [{configured}], target reports [{reported}]")]
    LayoutMismatch {
        /// Configured layout
        configured: TargetLayout,
        /// Layout reported by the target
        reported: TargetLayout,
    },

    /// Lifecycle command passed to [`Session::send`](super::Session::send)
    #[error("{command} must go through the session lifecycle, not send")]
    LifecycleCommand {
        /// Name of the rejected command
        command: &'static str,
    },

    /// A command could not be encoded for the configured layout
    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    /// A protocol record could not be decoded
    #[error("Protocol error: {0}")]
    Protocol(#[from] DecodeError),
}

impl SessionError {
    /// True for failures after which the session should not be reused.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SessionError::AttachTimeout { .. }
                | SessionError::TargetResetTimeout { .. }
                | SessionError::LayoutMismatch { .. }
        )
    }
}

/// Convenience result alias for session operations
pub type SessionResult<T> = std::result::Result<T, SessionError>;
