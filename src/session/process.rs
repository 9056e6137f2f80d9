//! Locally launched helper processes (the backend or a host-built target)

use std::process::{Child, Command, Stdio};
use std::thread;

use super::config::ProcessSpec;
use super::error::{SessionError, SessionResult};

/// A child process owned by the session. Killed when dropped.
#[derive(Debug)]
pub struct ManagedProcess {
    child: Child,
    program: String,
}

impl ManagedProcess {
    /// Spawn the process described by `spec` without waiting for it to settle.
    pub fn spawn(spec: &ProcessSpec) -> SessionResult<Self> {
        let program = spec.program.display().to_string();
        let child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| SessionError::Launch {
                program: program.clone(),
                source,
            })?;

        tracing::info!(program = %program, pid = child.id(), "launched process");
        Ok(Self { child, program })
    }

    /// Spawn and then give the process its settle time.
    pub fn launch(spec: &ProcessSpec) -> SessionResult<Self> {
        let process = Self::spawn(spec)?;
        thread::sleep(spec.settle());
        Ok(process)
    }

    /// Process id of the child.
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// True while the child has not exited.
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Kill the child and reap it.
    pub fn terminate(mut self) {
        self.kill();
    }

    fn kill(&mut self) {
        // Already-exited children make kill fail; wait still reaps them.
        let _ = self.child.kill();
        match self.child.wait() {
            Ok(status) => tracing::info!(program = %self.program, %status, "process stopped"),
            Err(err) => {
                tracing::warn!(program = %self.program, error = %err, "failed to reap process")
            }
        }
    }
}

impl Drop for ManagedProcess {
    fn drop(&mut self) {
        if self.is_running() {
            self.kill();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_program_is_a_launch_error() {
        let spec = ProcessSpec::new("/nonexistent/qutest-target");
        match ManagedProcess::spawn(&spec) {
            Err(SessionError::Launch { program, .. }) => {
                assert!(program.contains("qutest-target"));
            }
            other => panic!("expected launch error, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn terminate_stops_a_running_child() {
        let mut spec = ProcessSpec::new("sleep");
        spec.args = vec!["30".to_owned()];
        let mut process = ManagedProcess::spawn(&spec).unwrap();
        assert!(process.is_running());
        assert!(process.id() > 0);
        process.terminate();
    }
}
