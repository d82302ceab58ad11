//! Change notifications for the scratch file.
//!
//! [`ScratchWatcher`] uses the `notify` crate to observe the directory that
//! contains the scratch file and forwards events concerning that one file
//! name into a tokio channel. Watching the directory rather than the file
//! keeps notifications flowing when an editor saves by writing a new file
//! and renaming it over the scratch path.
//!
//! Only two kinds of notification reach the session loop:
//!
//! | Backend event                               | Notification            |
//! |---------------------------------------------|-------------------------|
//! | data modification of the file               | [`FileChange::Modified`] |
//! | create / rename onto the file name          | [`FileChange::Replaced`] |
//! | watcher failure                             | `Err(AppError::Watch)`  |
//! | anything else (access, metadata, removal)   | dropped                 |
//!
//! The `notify` callback runs on the backend's own thread, so it uses the
//! synchronous `send` of an unbounded channel.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use crate::{AppError, Result};

/// A change to the scratch file that may carry new user content.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FileChange {
    /// The file's content was modified in place.
    Modified,
    /// A new file was created or renamed onto the scratch path.
    Replaced,
}

/// Item delivered by the watcher channel.
pub type WatchMessage = Result<FileChange>;

/// Receiving end of the watcher channel.
pub type WatchReceiver = mpsc::UnboundedReceiver<WatchMessage>;

/// Classify a backend event relative to the watched `file_name`.
///
/// Returns `None` for events that do not concern the file or cannot carry
/// new content.
#[must_use]
pub fn classify_event(event: &Event, file_name: &OsStr) -> Option<FileChange> {
    let is_target = |path: &PathBuf| path.file_name() == Some(file_name);

    match &event.kind {
        EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any | ModifyKind::Other) => event
            .paths
            .iter()
            .any(is_target)
            .then_some(FileChange::Modified),
        EventKind::Create(_) => event
            .paths
            .iter()
            .find(|p| is_target(*p))
            .filter(|p| p.exists())
            .map(|_| FileChange::Replaced),
        EventKind::Modify(ModifyKind::Name(
            RenameMode::To | RenameMode::Both | RenameMode::Any,
        )) => event
            .paths
            .last()
            .filter(|p| is_target(*p) && p.exists())
            .map(|_| FileChange::Replaced),
        _ => None,
    }
}

/// Watcher for a single scratch file.
///
/// Holds the [`notify`] watcher alive for its own lifetime; dropping a
/// `ScratchWatcher` stops the OS watch and closes the channel.
pub struct ScratchWatcher {
    /// Underlying notify watcher, kept alive by owning it here.
    _watcher: RecommendedWatcher,
    path: PathBuf,
}

impl std::fmt::Debug for ScratchWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScratchWatcher")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl ScratchWatcher {
    /// Start watching `path` and return the watcher together with the
    /// receiving end of its notification channel.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Watch` if `path` has no file name or the `notify`
    /// watcher cannot be created or attached.
    pub fn new(path: &Path) -> Result<(Self, WatchReceiver)> {
        let file_name: OsString = path
            .file_name()
            .ok_or_else(|| {
                AppError::Watch(format!("scratch path has no file name: {}", path.display()))
            })?
            .to_owned();

        let (change_tx, change_rx) = mpsc::unbounded_channel();

        let mut watcher = notify::recommended_watcher(
            move |result: std::result::Result<Event, notify::Error>| {
                let message = match result {
                    Ok(event) => match classify_event(&event, &file_name) {
                        Some(change) => Ok(change),
                        None => {
                            trace!(?event, "ignoring file system event");
                            return;
                        }
                    },
                    Err(err) => Err(AppError::Watch(format!("file watcher error: {err}"))),
                };
                if change_tx.send(message).is_err() {
                    debug!("watch receiver dropped, discarding notification");
                }
            },
        )
        .map_err(|err| AppError::Watch(format!("failed to create file watcher: {err}")))?;

        let watch_target = path
            .parent()
            .filter(|p| p != &Path::new(""))
            .unwrap_or(Path::new("."));

        watcher
            .watch(watch_target, RecursiveMode::NonRecursive)
            .map_err(|err| {
                AppError::Watch(format!(
                    "failed to watch '{}': {err}",
                    watch_target.display()
                ))
            })?;

        info!(path = %path.display(), "watching scratch file");

        Ok((
            Self {
                _watcher: watcher,
                path: path.to_path_buf(),
            },
            change_rx,
        ))
    }

    /// Path of the watched scratch file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
