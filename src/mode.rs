//! Session exit policy, i.e. what happens once the subprocess has exited.
//!
//! `ExitPolicy` is used as the `--on-exit` CLI flag value and the `on_exit`
//! configuration key.

use clap::ValueEnum;
use serde::Deserialize;

/// Behaviour of the session after both subprocess output streams close.
///
/// Defaults to [`ExitPolicy::Stop`].
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, ValueEnum, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitPolicy {
    /// End the session and remove the scratch file. Default policy.
    #[default]
    Stop,
    /// Keep the scratch file and watcher alive until the session is cancelled.
    /// Saves are logged but no longer forwarded.
    Linger,
}
