//! Subprocess channel.
//!
//! Spawns the command whose standard input is fed from the scratch file and
//! owns its three pipes:
//! - `stdin` is handed to the session loop for raw byte writes;
//! - `stdout` and `stderr` are handed to the line readers.
//!
//! The child is spawned with `kill_on_drop(true)` so that an aborted session
//! never leaves it running. It inherits the environment and working
//! directory of `pipescratch` itself.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::{AppError, Result};

/// Program and arguments of the subprocess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    /// Program name or path, resolved through `PATH`.
    pub program: String,
    /// Arguments passed after the program.
    pub args: Vec<String>,
}

impl ProcessSpec {
    /// Build a spec from a command line whose first word is the program.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `words` is empty.
    pub fn from_command_line(words: &[String]) -> Result<Self> {
        let (program, args) = words
            .split_first()
            .ok_or_else(|| AppError::Config("missing command to run".into()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

/// A running subprocess with its pipes not yet handed out.
#[derive(Debug)]
pub struct ScratchProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
}

/// Spawn `spec` with all three standard streams piped.
///
/// # Errors
///
/// - `AppError::Process` if the OS cannot spawn the program.
/// - `AppError::Process` if one of the pipes was not created.
pub fn spawn_process(spec: &ProcessSpec) -> Result<ScratchProcess> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|err| AppError::Process(format!("failed to spawn {}: {err}", spec.program)))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Process("failed to capture subprocess stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Process("failed to capture subprocess stdout".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::Process("failed to capture subprocess stderr".into()))?;

    info!(
        program = spec.program.as_str(),
        args = ?spec.args,
        pid = ?child.id(),
        "subprocess started"
    );

    Ok(ScratchProcess {
        child,
        stdin: Some(stdin),
        stdout: Some(stdout),
        stderr: Some(stderr),
    })
}

impl ScratchProcess {
    /// Hand out the subprocess input pipe.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Process` if the pipe was already taken.
    pub fn take_stdin(&mut self) -> Result<ChildStdin> {
        self.stdin
            .take()
            .ok_or_else(|| AppError::Process("subprocess stdin already taken".into()))
    }

    /// Hand out the subprocess output pipe.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Process` if the pipe was already taken.
    pub fn take_stdout(&mut self) -> Result<ChildStdout> {
        self.stdout
            .take()
            .ok_or_else(|| AppError::Process("subprocess stdout already taken".into()))
    }

    /// Hand out the subprocess error pipe.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Process` if the pipe was already taken.
    pub fn take_stderr(&mut self) -> Result<ChildStderr> {
        self.stderr
            .take()
            .ok_or_else(|| AppError::Process("subprocess stderr already taken".into()))
    }

    /// Wait for the subprocess to exit.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Process` if waiting on the child fails.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        self.child
            .wait()
            .await
            .map_err(|err| AppError::Process(format!("failed to wait for subprocess: {err}")))
    }

    /// Stop the subprocess: `SIGTERM` first (Unix), then a hard kill if it
    /// is still running after `grace`.
    ///
    /// Returns the exit status, or `None` when it could not be collected.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Process` if the hard kill fails.
    pub async fn terminate(&mut self, grace: Duration) -> Result<Option<ExitStatus>> {
        if let Ok(Some(status)) = self.child.try_wait() {
            debug!(%status, "subprocess already exited");
            return Ok(Some(status));
        }

        #[cfg(unix)]
        self.send_sigterm();

        if let Ok(result) = tokio::time::timeout(grace, self.child.wait()).await {
            return Ok(result.ok());
        }

        warn!(?grace, "subprocess did not exit after SIGTERM, killing");
        self.child
            .kill()
            .await
            .map_err(|err| AppError::Process(format!("failed to kill subprocess: {err}")))?;
        Ok(self.child.try_wait().ok().flatten())
    }

    #[cfg(unix)]
    fn send_sigterm(&self) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.child.id().and_then(|id| i32::try_from(id).ok()) else {
            return;
        };
        if let Err(err) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
            warn!(pid, %err, "failed to signal subprocess");
        }
    }
}
