//! Session and target state tracking
//!
//! Two independent axes: attachment to the backend and liveness of the
//! target. The receiver flips them from its handlers; the caller blocks on
//! them with a deadline.

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Attachment to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No socket, no receiver.
    Detached,
    /// Attach sent, waiting for the acknowledgement.
    Attaching,
    /// Backend acknowledged the attach.
    Attached,
}

/// Liveness of the instrumented target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetState {
    /// Not known to be running.
    Down,
    /// Reset requested, waiting for target info.
    Resetting,
    /// Target info received.
    Up,
}

#[derive(Debug)]
struct States {
    session: SessionState,
    target: TargetState,
}

/// Shared state cell with blocking waits.
#[derive(Debug)]
pub struct Lifecycle {
    states: Mutex<States>,
    changed: Condvar,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    /// Start detached with the target down.
    pub fn new() -> Self {
        Self {
            states: Mutex::new(States {
                session: SessionState::Detached,
                target: TargetState::Down,
            }),
            changed: Condvar::new(),
        }
    }

    /// Current session state.
    pub fn session(&self) -> SessionState {
        self.states.lock().session
    }

    /// Current target state.
    pub fn target(&self) -> TargetState {
        self.states.lock().target
    }

    /// Set the session state and wake waiters.
    pub fn set_session(&self, state: SessionState) {
        self.states.lock().session = state;
        self.changed.notify_all();
    }

    /// Set the target state and wake waiters.
    pub fn set_target(&self, state: TargetState) {
        self.states.lock().target = state;
        self.changed.notify_all();
    }

    /// Move the session to `to` only if it is currently `from`.
    pub fn transition_session(&self, from: SessionState, to: SessionState) -> bool {
        let mut states = self.states.lock();
        if states.session != from {
            return false;
        }
        states.session = to;
        drop(states);
        self.changed.notify_all();
        true
    }

    /// Block until the session reaches `state` or `timeout` elapses.
    pub fn wait_session(&self, state: SessionState, timeout: Duration) -> bool {
        self.wait(timeout, |s| s.session == state)
    }

    /// Block until the target reaches `state` or `timeout` elapses.
    pub fn wait_target(&self, state: TargetState, timeout: Duration) -> bool {
        self.wait(timeout, |s| s.target == state)
    }

    fn wait(&self, timeout: Duration, done: impl Fn(&States) -> bool) -> bool {
        let now = Instant::now();
        let deadline = now
            .checked_add(timeout)
            .unwrap_or_else(|| now + Duration::from_secs(365 * 24 * 3600));

        let mut states = self.states.lock();
        while !done(&states) {
            if self.changed.wait_until(&mut states, deadline).timed_out() {
                return done(&states);
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn starts_detached_and_down() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.session(), SessionState::Detached);
        assert_eq!(lifecycle.target(), TargetState::Down);
    }

    #[test]
    fn wait_returns_when_flipped_from_another_thread() {
        let lifecycle = Arc::new(Lifecycle::new());
        lifecycle.set_target(TargetState::Resetting);

        let flipper = {
            let lifecycle = Arc::clone(&lifecycle);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                lifecycle.set_target(TargetState::Up);
            })
        };

        assert!(lifecycle.wait_target(TargetState::Up, Duration::from_secs(2)));
        flipper.join().unwrap();
    }

    #[test]
    fn wait_times_out_without_change() {
        let lifecycle = Lifecycle::new();
        assert!(!lifecycle.wait_session(SessionState::Attached, Duration::from_millis(20)));
        assert_eq!(lifecycle.session(), SessionState::Detached);
    }

    #[test]
    fn transition_is_conditional() {
        let lifecycle = Lifecycle::new();
        assert!(!lifecycle.transition_session(SessionState::Attaching, SessionState::Attached));
        lifecycle.set_session(SessionState::Attaching);
        assert!(lifecycle.transition_session(SessionState::Attaching, SessionState::Attached));
        assert_eq!(lifecycle.session(), SessionState::Attached);
    }
}
