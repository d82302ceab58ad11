//! Editor launch for the scratch file.
//!
//! The configured editor string is split on whitespace: the first word is
//! the program, the remaining words are leading arguments, and the scratch
//! path is appended last. The editor runs detached from the session; its
//! exit, successful or not, does not end the session.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{AppError, Result};

/// Split an editor command into program and leading arguments.
///
/// Returns `None` for an empty or all-whitespace command.
#[must_use]
pub fn parse_editor_command(editor: &str) -> Option<(String, Vec<String>)> {
    let mut words = editor.split_whitespace().map(str::to_owned);
    let program = words.next()?;
    Some((program, words.collect()))
}

/// Launch `editor` on `scratch_path` in the background.
///
/// The editor is killed when `cancel` fires. Its output is discarded.
///
/// # Errors
///
/// Returns `AppError::Config` for an empty editor command and
/// `AppError::Process` if the editor cannot be spawned.
pub fn launch_editor(
    editor: &str,
    scratch_path: &Path,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>> {
    let (program, args) = parse_editor_command(editor)
        .ok_or_else(|| AppError::Config("editor command is empty".into()))?;

    let mut child = Command::new(&program)
        .args(&args)
        .arg(scratch_path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| AppError::Process(format!("failed to launch editor {program}: {err}")))?;

    info!(program = program.as_str(), path = %scratch_path.display(), "editor launched");

    Ok(tokio::spawn(async move {
        tokio::select! {
            result = child.wait() => match result {
                Ok(status) => info!(%status, "editor exited"),
                Err(err) => warn!(%err, "error waiting for editor"),
            },
            () = cancel.cancelled() => {
                // Dropping the child kills it.
            }
        }
    }))
}
