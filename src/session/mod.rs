//! Test sessions against a QSPY backend
//!
//! A [`Session`] owns the socket, the receiver thread and the lifecycle of
//! both the backend attachment and the target. Callers issue commands and
//! then assert on the trace lines that follow with [`Session::expect`].
//!
//! ```no_run
//! use qutest::{Session, SessionConfig};
//!
//! # fn main() -> qutest::SessionResult<()> {
//! let mut session = Session::new(SessionConfig::default())?;
//! session.attach()?;
//! session.reset_target()?;
//! session.post("TIMEOUT_SIG", &[])?;
//! session.expect("%timestamp Trg-Done QS_RX_EVENT")?;
//! session.detach()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub mod config;
pub mod error;
pub mod expect;
mod facade;
pub mod lifecycle;
pub mod process;
mod receiver;

pub use config::{ProcessSpec, SessionConfig};
pub use error::{SessionError, SessionResult};
pub use expect::{Mismatch, TextQueue, match_line};
pub use lifecycle::{SessionState, TargetState};
pub use process::ManagedProcess;
pub use receiver::Handler;

use crate::protocol::{Command, Frame, RecordKind, TargetInfo, TextLine};
use receiver::{Link, Shared};

/// Hook run after every successful target reset.
pub type ResetHook = Box<dyn FnMut(&mut Session) -> SessionResult<()> + Send>;

/// A client session with a QSPY backend.
pub struct Session {
    config: SessionConfig,
    shared: Arc<Shared>,
    link: Option<Link>,
    backend: Option<ManagedProcess>,
    target: Option<ManagedProcess>,
    on_reset: Option<ResetHook>,
}

impl Session {
    /// Create a detached session.
    pub fn new(config: SessionConfig) -> SessionResult<Self> {
        config.validate()?;
        let shared = Arc::new(Shared::new(config.layout));
        Ok(Self {
            config,
            shared,
            link: None,
            backend: None,
            target: None,
            on_reset: None,
        })
    }

    /// Configuration the session was created with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current attachment state.
    pub fn session_state(&self) -> SessionState {
        self.shared.lifecycle.session()
    }

    /// Current target state.
    pub fn target_state(&self) -> TargetState {
        self.shared.lifecycle.target()
    }

    /// Handle for watching the lifecycle from another thread.
    pub fn monitor(&self) -> StateMonitor {
        StateMonitor {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Most recent target info record, if any arrived.
    pub fn target_info(&self) -> Option<TargetInfo> {
        self.shared.target_info()
    }

    /// Attach to the backend and wait for the acknowledgement.
    ///
    /// Launches the configured backend first. On failure the session is left
    /// detached and the call may be retried.
    pub fn attach(&mut self) -> SessionResult<()> {
        if self.session_state() != SessionState::Detached {
            return Err(SessionError::AlreadyAttached);
        }

        if self.backend.is_none() {
            if let Some(spec) = &self.config.backend {
                self.backend = Some(ManagedProcess::launch(spec)?);
            }
        }

        self.shared.lifecycle.set_session(SessionState::Attaching);
        let link = match Link::open(&self.config, Arc::clone(&self.shared)) {
            Ok(link) => link,
            Err(err) => {
                self.abort_attach();
                return Err(err);
            }
        };

        let sent = link.send(&Command::Attach(self.config.channels), &self.config.layout);
        self.link = Some(link);
        if let Err(err) = sent {
            self.abort_attach();
            return Err(err);
        }

        let timeout = self.config.attach_timeout();
        if !self
            .shared
            .lifecycle
            .wait_session(SessionState::Attached, timeout)
        {
            self.abort_attach();
            return Err(SessionError::AttachTimeout {
                endpoint: self.config.endpoint(),
                timeout,
            });
        }

        tracing::info!(endpoint = %self.config.endpoint(), "attached");
        Ok(())
    }

    fn abort_attach(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.stop();
        }
        if let Some(backend) = self.backend.take() {
            backend.terminate();
        }
        self.shared.lifecycle.set_session(SessionState::Detached);
    }

    /// Tell the backend we are leaving, stop the receiver and release the
    /// socket along with any processes the session launched.
    pub fn detach(&mut self) -> SessionResult<()> {
        self.ensure_attached()?;

        let sent = match &self.link {
            Some(link) => link.send(&Command::Detach, &self.config.layout),
            None => Ok(()),
        };
        thread::sleep(self.config.detach_grace());

        if let Some(mut link) = self.link.take() {
            link.stop();
        }
        if let Some(target) = self.target.take() {
            target.terminate();
        }
        if let Some(backend) = self.backend.take() {
            backend.terminate();
        }
        self.shared.lifecycle.set_session(SessionState::Detached);
        tracing::info!("detached");
        sent
    }

    /// Register a hook that runs after every successful reset.
    pub fn set_on_reset<F>(&mut self, hook: F)
    where
        F: FnMut(&mut Session) -> SessionResult<()> + Send + 'static,
    {
        self.on_reset = Some(Box::new(hook));
    }

    /// Remove the reset hook.
    pub fn clear_on_reset(&mut self) {
        self.on_reset = None;
    }

    /// Reset the target and wait for it to report in.
    ///
    /// Stale trace lines are discarded. A locally managed target is stopped and
    /// relaunched. On timeout the target is left `Down`.
    pub fn reset_target(&mut self) -> SessionResult<()> {
        self.ensure_ready()?;

        self.shared.lifecycle.set_target(TargetState::Resetting);
        self.discard_stale();

        let timeout = self.config.reset_timeout();
        if let Some(spec) = self.config.local_target.clone() {
            if let Some(running) = self.target.take() {
                self.transmit(&Command::Reset)?;
                // Let the old process run to completion before replacing it.
                thread::sleep(timeout);
                running.terminate();
                self.shared.lifecycle.set_target(TargetState::Resetting);
                self.discard_stale();
            }
            self.target = Some(ManagedProcess::spawn(&spec)?);
        } else {
            self.transmit(&Command::Reset)?;
        }

        if !self.shared.lifecycle.wait_target(TargetState::Up, timeout) {
            self.shared.lifecycle.set_target(TargetState::Down);
            return Err(SessionError::TargetResetTimeout { timeout });
        }
        self.check_layout()?;
        tracing::info!("target reset");

        if let Some(mut hook) = self.on_reset.take() {
            let result = hook(self);
            if self.on_reset.is_none() {
                self.on_reset = Some(hook);
            }
            result?;
        }
        Ok(())
    }

    /// Per-test setup: reset the target unless disabled in the configuration.
    pub fn setup_test(&mut self) -> SessionResult<()> {
        if self.config.reset_on_setup {
            self.reset_target()
        } else {
            Ok(())
        }
    }

    /// Wait for the next trace line and match it against `pattern`, using the
    /// configured expect timeout.
    pub fn expect(&mut self, pattern: &str) -> SessionResult<()> {
        self.expect_within(pattern, self.config.expect_timeout())
    }

    /// Like [`Session::expect`] with an explicit timeout.
    pub fn expect_within(&mut self, pattern: &str, timeout: Duration) -> SessionResult<()> {
        let Some(line) = self.shared.queue.pop_timeout(timeout) else {
            return Err(SessionError::ExpectTimeout {
                pattern: pattern.to_owned(),
            });
        };

        tracing::debug!(line = %line.text, pattern, "expect");
        match_line(pattern, &line.text).map_err(|mismatch| SessionError::ExpectMismatch {
            expected: mismatch.expected,
            actual: mismatch.actual,
        })
    }

    /// Pop the next trace line without matching it.
    pub fn next_line(&mut self, timeout: Duration) -> Option<TextLine> {
        self.shared.queue.pop_timeout(timeout)
    }

    /// Number of trace lines waiting to be consumed.
    pub fn pending_lines(&self) -> usize {
        self.shared.queue.len()
    }

    /// Discard every buffered trace line and return them.
    pub fn flush(&mut self) -> Vec<TextLine> {
        self.shared.queue.flush()
    }

    /// Route records of `kind` to `handler` on the receiver thread.
    ///
    /// Returns false for attach, target-info and text records, which the
    /// session always handles itself.
    pub fn register_handler<F>(&self, kind: impl Into<RecordKind>, handler: F) -> bool
    where
        F: Fn(&Frame) + Send + Sync + 'static,
    {
        self.shared.register(kind.into(), Arc::new(handler))
    }

    /// Stop routing `kind` to a registered handler.
    pub fn unregister_handler(&self, kind: impl Into<RecordKind>) -> bool {
        self.shared.unregister(kind.into())
    }

    /// Send a command without waiting for an acknowledgement.
    ///
    /// Attach, detach and reset change session state and are refused here;
    /// use [`Session::attach`], [`Session::detach`] and
    /// [`Session::reset_target`] instead.
    pub fn send(&self, command: &Command) -> SessionResult<()> {
        if matches!(command, Command::Attach(_) | Command::Detach | Command::Reset) {
            return Err(SessionError::LifecycleCommand {
                command: command.name(),
            });
        }
        self.transmit(command)
    }

    fn transmit(&self, command: &Command) -> SessionResult<()> {
        self.ensure_ready()?;
        match &self.link {
            Some(link) => link.send(command, &self.config.layout),
            None => Err(SessionError::NotAttached {
                state: self.session_state(),
            }),
        }
    }

    /// Send an arbitrary payload after the next sequence number.
    pub fn send_raw(&self, bytes: impl Into<Vec<u8>>) -> SessionResult<()> {
        self.send(&Command::Raw(bytes.into()))
    }

    fn discard_stale(&self) {
        for line in self.shared.queue.flush() {
            tracing::debug!(line = %line.text, "discarding stale line");
        }
    }

    fn ensure_attached(&self) -> SessionResult<()> {
        match self.session_state() {
            SessionState::Attached => Ok(()),
            state => Err(SessionError::NotAttached { state }),
        }
    }

    fn ensure_ready(&self) -> SessionResult<()> {
        self.ensure_attached()?;
        self.check_layout()
    }

    fn check_layout(&self) -> SessionResult<()> {
        match self.shared.layout_mismatch() {
            Some(reported) => Err(SessionError::LayoutMismatch {
                configured: self.shared.configured_layout(),
                reported,
            }),
            None => Ok(()),
        }
    }
}

/// Read-only view of a session's lifecycle that can be moved to other threads.
#[derive(Clone)]
pub struct StateMonitor {
    shared: Arc<Shared>,
}

impl StateMonitor {
    /// Current attachment state.
    pub fn session_state(&self) -> SessionState {
        self.shared.lifecycle.session()
    }

    /// Current target state.
    pub fn target_state(&self) -> TargetState {
        self.shared.lifecycle.target()
    }

    /// Block until the target reaches `state` or `timeout` elapses.
    pub fn wait_target(&self, state: TargetState, timeout: Duration) -> bool {
        self.shared.lifecycle.wait_target(state, timeout)
    }
}

impl std::fmt::Debug for StateMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMonitor")
            .field("session", &self.session_state())
            .field("target", &self.target_state())
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.session_state() == SessionState::Attached {
            if let Err(err) = self.detach() {
                tracing::warn!(error = %err, "detach on drop failed");
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.config.endpoint())
            .field("session", &self.session_state())
            .field("target", &self.target_state())
            .field("queued", &self.shared.queue.len())
            .finish()
    }
}
