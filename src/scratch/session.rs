//! Scratch session loop.
//!
//! One task owns the scratch file and multiplexes three event sources with
//! `tokio::select!`:
//!
//! | Event                  | Action                                              |
//! |------------------------|-----------------------------------------------------|
//! | stdout line            | append to the stdout accumulator, rewrite the file  |
//! | stderr line            | append to the stderr accumulator, rewrite the file  |
//! | file changed (save)    | forward the whole file to stdin, reset accumulators |
//! | file changed (own)     | absorbed by [`SelfWriteAck`]                        |
//! | output stream closed   | stop listening on it; see [`ExitPolicy`]            |
//! | watcher error          | fatal                                               |
//!
//! Each event is handled to completion before the next one is selected, so
//! a rewrite is never interleaved with another action. The only window an
//! editor can observe is between the truncate and the write of a rewrite.
//!
//! Forwarding a save is the one step that waits on the subprocess: a large
//! save fills the stdin pipe while the subprocess answers on stdout. While
//! the write is in flight, output lines are still collected (and rendered
//! once the write completes) and the cancellation token is still honoured.

use std::path::PathBuf;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ScratchConfig;
use crate::mode::ExitPolicy;
use crate::scratch::ack::{AckState, SelfWriteAck};
use crate::scratch::reader::OutputStream;
use crate::scratch::rewrite::{append_comment_line, rewrite};
use crate::scratch::watcher::{FileChange, WatchReceiver};
use crate::{AppError, Result};

/// Channels and pipes a session is built from.
#[derive(Debug)]
pub struct SessionIo<W> {
    /// Subprocess standard input.
    pub input: W,
    /// Line sequence of the subprocess standard output.
    pub stdout_lines: mpsc::Receiver<String>,
    /// Line sequence of the subprocess standard error.
    pub stderr_lines: mpsc::Receiver<String>,
    /// Scratch file change notifications.
    pub changes: WatchReceiver,
}

/// One input to the session loop.
#[derive(Debug)]
pub enum SessionEvent {
    /// A complete line from the subprocess standard output.
    StdoutLine(String),
    /// A complete line from the subprocess standard error.
    StderrLine(String),
    /// The standard output sequence closed.
    StdoutClosed,
    /// The standard error sequence closed.
    StderrClosed,
    /// The scratch file changed.
    FileChanged(FileChange),
    /// The watcher failed or stopped.
    WatchFailed(AppError),
    /// The session was cancelled from outside.
    Cancelled,
}

/// Why a session ended without error.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SessionEnd {
    /// Both subprocess output streams closed under [`ExitPolicy::Stop`].
    SubprocessExited,
    /// The cancellation token fired.
    Cancelled,
}

/// Whether the loop keeps running after an event.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Flow {
    /// Select the next event.
    Continue,
    /// Leave the loop.
    Finished(SessionEnd),
}

/// State of a running scratch session.
#[derive(Debug)]
pub struct ScratchSession<W> {
    path: PathBuf,
    sentinel: String,
    line_prefix: String,
    on_exit: ExitPolicy,
    stdout_output: String,
    stderr_output: String,
    ack: SelfWriteAck,
    /// `None` once the subprocess has exited.
    input: Option<W>,
    stdout_lines: Option<mpsc::Receiver<String>>,
    stderr_lines: Option<mpsc::Receiver<String>>,
    changes: WatchReceiver,
    cancel: CancellationToken,
    saves: u64,
    rewrites: u64,
}

impl<W> ScratchSession<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Build a session for the scratch file at `path`, stopped by `cancel`.
    #[must_use]
    pub fn new(
        path: impl Into<PathBuf>,
        config: &ScratchConfig,
        io: SessionIo<W>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            path: path.into(),
            sentinel: config.sentinel_line(),
            line_prefix: config.line_prefix.clone(),
            on_exit: config.on_exit,
            stdout_output: String::new(),
            stderr_output: String::new(),
            ack: SelfWriteAck::new(config.self_write_events, config.self_write_window()),
            input: Some(io.input),
            stdout_lines: Some(io.stdout_lines),
            stderr_lines: Some(io.stderr_lines),
            changes: io.changes,
            cancel,
            saves: 0,
            rewrites: 0,
        }
    }

    /// Run the loop until the session ends.
    ///
    /// # Errors
    ///
    /// Returns the first unrecoverable error: a watcher failure, a scratch
    /// file I/O failure, or a failed write to the subprocess input.
    pub async fn run(mut self) -> Result<SessionEnd> {
        info!(path = %self.path.display(), "scratch session started");
        loop {
            let event = self.next_event().await;
            if let Flow::Finished(end) = self.handle(event).await? {
                info!(
                    ?end,
                    saves = self.saves,
                    rewrites = self.rewrites,
                    "scratch session finished"
                );
                return Ok(end);
            }
        }
    }

    /// Wait for whichever source is ready first.
    ///
    /// Closed line sequences are no longer polled.
    pub async fn next_event(&mut self) -> SessionEvent {
        tokio::select! {
            () = self.cancel.cancelled() => SessionEvent::Cancelled,

            line = recv_line(&mut self.stdout_lines), if self.stdout_lines.is_some() => {
                line.map_or(SessionEvent::StdoutClosed, SessionEvent::StdoutLine)
            }

            line = recv_line(&mut self.stderr_lines), if self.stderr_lines.is_some() => {
                line.map_or(SessionEvent::StderrClosed, SessionEvent::StderrLine)
            }

            change = self.changes.recv() => match change {
                Some(Ok(change)) => SessionEvent::FileChanged(change),
                Some(Err(err)) => SessionEvent::WatchFailed(err),
                None => SessionEvent::WatchFailed(AppError::Watch("file watcher stopped".into())),
            },
        }
    }

    /// Apply one event to the session.
    ///
    /// # Errors
    ///
    /// See [`ScratchSession::run`].
    pub async fn handle(&mut self, event: SessionEvent) -> Result<Flow> {
        match event {
            SessionEvent::StdoutLine(line) => {
                append_comment_line(&mut self.stdout_output, &self.line_prefix, &line);
                self.rewrite_file().await?;
            }
            SessionEvent::StderrLine(line) => {
                append_comment_line(&mut self.stderr_output, &self.line_prefix, &line);
                self.rewrite_file().await?;
            }
            SessionEvent::StdoutClosed => {
                self.stdout_lines = None;
                return Ok(self.stream_closed(OutputStream::Stdout));
            }
            SessionEvent::StderrClosed => {
                self.stderr_lines = None;
                return Ok(self.stream_closed(OutputStream::Stderr));
            }
            SessionEvent::FileChanged(change) => self.file_changed(change).await?,
            SessionEvent::WatchFailed(err) => return Err(err),
            SessionEvent::Cancelled => return Ok(Flow::Finished(SessionEnd::Cancelled)),
        }
        Ok(Flow::Continue)
    }

    /// Render what a rewrite would produce now, without writing it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the scratch file cannot be read.
    pub async fn render(&self) -> Result<Vec<u8>> {
        let current = self.read_file().await?;
        Ok(rewrite(
            &current,
            &self.sentinel,
            &self.stdout_output,
            &self.stderr_output,
        ))
    }

    /// Accumulated stdout comment lines since the last save.
    #[must_use]
    pub fn stdout_output(&self) -> &str {
        &self.stdout_output
    }

    /// Accumulated stderr comment lines since the last save.
    #[must_use]
    pub fn stderr_output(&self) -> &str {
        &self.stderr_output
    }

    /// Self-write acknowledgement state.
    #[must_use]
    pub fn ack_state(&self) -> &AckState {
        self.ack.state()
    }

    /// Number of saves forwarded to the subprocess.
    #[must_use]
    pub fn saves(&self) -> u64 {
        self.saves
    }

    /// Number of rewrites of the scratch file.
    #[must_use]
    pub fn rewrites(&self) -> u64 {
        self.rewrites
    }

    /// Whether the subprocess input is still open.
    #[must_use]
    pub fn accepts_input(&self) -> bool {
        self.input.is_some()
    }

    async fn file_changed(&mut self, change: FileChange) -> Result<()> {
        let mut content = self.read_file().await?;
        if self.ack.absorb(&content, Instant::now()) {
            debug!(?change, "absorbed self-write notification");
            return Ok(());
        }

        let coalesced = self.drain_queued_changes()?;
        if coalesced > 0 {
            debug!(coalesced, "coalesced queued change notifications");
            content = self.read_file().await?;
        }

        if self.input.is_none() {
            warn!("subprocess has exited, save not forwarded");
            return Ok(());
        }

        // Output from here on answers this save.
        self.stdout_output.clear();
        self.stderr_output.clear();

        let Some(received) = self.forward(&content).await? else {
            debug!("cancelled while forwarding save");
            return Ok(());
        };

        self.saves += 1;
        info!(?change, bytes = content.len(), "forwarded scratch file to subprocess");
        if received > 0 {
            debug!(received, "output arrived while forwarding save");
            self.rewrite_file().await?;
        }
        Ok(())
    }

    /// Write `content` to the subprocess input, collecting output lines
    /// meanwhile so a subprocess answering on a full pipe cannot stall it.
    ///
    /// Returns the number of lines collected, or `None` when cancelled
    /// before the write completed. Closed line sequences are left to
    /// [`ScratchSession::next_event`], which observes the closure again.
    async fn forward(&mut self, content: &[u8]) -> Result<Option<usize>> {
        let Some(input) = self.input.as_mut() else {
            return Ok(Some(0));
        };
        let mut write = std::pin::pin!(async move {
            input.write_all(content).await?;
            input.flush().await
        });

        let mut stdout_open = self.stdout_lines.is_some();
        let mut stderr_open = self.stderr_lines.is_some();
        let mut received = 0;
        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => return Ok(None),

                result = &mut write => {
                    result.map_err(|err| {
                        AppError::Process(format!("failed to write to subprocess stdin: {err}"))
                    })?;
                    return Ok(Some(received));
                }

                line = recv_line(&mut self.stdout_lines), if stdout_open => match line {
                    Some(line) => {
                        append_comment_line(&mut self.stdout_output, &self.line_prefix, &line);
                        received += 1;
                    }
                    None => stdout_open = false,
                },

                line = recv_line(&mut self.stderr_lines), if stderr_open => match line {
                    Some(line) => {
                        append_comment_line(&mut self.stderr_output, &self.line_prefix, &line);
                        received += 1;
                    }
                    None => stderr_open = false,
                },
            }
        }
    }

    /// Consume notifications already queued behind the one being handled.
    fn drain_queued_changes(&mut self) -> Result<usize> {
        let mut drained = 0;
        loop {
            match self.changes.try_recv() {
                Ok(Ok(_)) => drained += 1,
                Ok(Err(err)) => return Err(err),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return Ok(drained),
            }
        }
    }

    async fn rewrite_file(&mut self) -> Result<()> {
        let current = self.read_file().await?;
        let next = rewrite(
            &current,
            &self.sentinel,
            &self.stdout_output,
            &self.stderr_output,
        );

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)
            .await
            .map_err(|err| {
                AppError::Io(format!(
                    "failed to truncate {}: {err}",
                    self.path.display()
                ))
            })?;
        file.write_all(&next).await.map_err(|err| {
            AppError::Io(format!("failed to write {}: {err}", self.path.display()))
        })?;
        file.flush().await.map_err(|err| {
            AppError::Io(format!("failed to write {}: {err}", self.path.display()))
        })?;

        self.ack.arm(&next, Instant::now());
        self.rewrites += 1;
        debug!(bytes = next.len(), "rewrote scratch file");
        Ok(())
    }

    fn stream_closed(&mut self, source: OutputStream) -> Flow {
        info!(%source, "subprocess output closed");
        if self.stdout_lines.is_some() || self.stderr_lines.is_some() {
            return Flow::Continue;
        }

        // Nothing reads stdin any more.
        self.input = None;
        match self.on_exit {
            ExitPolicy::Stop => Flow::Finished(SessionEnd::SubprocessExited),
            ExitPolicy::Linger => {
                info!("subprocess finished, keeping scratch file until interrupted");
                Flow::Continue
            }
        }
    }

    async fn read_file(&self) -> Result<Vec<u8>> {
        tokio::fs::read(&self.path).await.map_err(|err| {
            AppError::Io(format!("failed to read {}: {err}", self.path.display()))
        })
    }
}

async fn recv_line(lines: &mut Option<mpsc::Receiver<String>>) -> Option<String> {
    match lines {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
