//! Shared helpers for session-level integration tests.
//!
//! A [`Harness`] wires a [`ScratchSession`] to in-memory channels instead
//! of a real subprocess and watcher, so individual tests drive the loop one
//! event at a time and inspect the scratch file and the bytes written to
//! the subprocess input.

use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncReadExt, DuplexStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use pipescratch::config::ScratchConfig;
use pipescratch::scratch::session::{ScratchSession, SessionIo};
use pipescratch::scratch::watcher::WatchMessage;

/// Buffer size of the in-memory stdin pipe.
const STDIN_CAPACITY: usize = 1024 * 1024;

/// Session under test together with the other ends of its channels.
pub struct Harness {
    /// Keeps the scratch directory alive for the test's duration.
    pub _dir: tempfile::TempDir,
    pub path: PathBuf,
    pub session: ScratchSession<DuplexStream>,
    /// Reading end of the subprocess input.
    pub stdin: DuplexStream,
    pub stdout_tx: mpsc::Sender<String>,
    pub stderr_tx: mpsc::Sender<String>,
    pub change_tx: mpsc::UnboundedSender<WatchMessage>,
    /// Token the session was built with.
    pub cancel: CancellationToken,
}

/// Build a harness around a scratch file holding `initial`.
pub fn harness(initial: &[u8]) -> Harness {
    harness_with_config(initial, &ScratchConfig::default())
}

/// Build a harness with an explicit configuration.
pub fn harness_with_config(initial: &[u8], config: &ScratchConfig) -> Harness {
    build(initial, config, STDIN_CAPACITY)
}

/// Build a harness whose stdin pipe holds at most `capacity` bytes, so
/// larger saves block until the other end reads.
pub fn harness_with_stdin_capacity(initial: &[u8], capacity: usize) -> Harness {
    build(initial, &ScratchConfig::default(), capacity)
}

fn build(initial: &[u8], config: &ScratchConfig, stdin_capacity: usize) -> Harness {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("scratch.sql");
    std::fs::write(&path, initial).expect("seed scratch file");

    let (input, stdin) = tokio::io::duplex(stdin_capacity);
    let (stdout_tx, stdout_lines) = mpsc::channel(16);
    let (stderr_tx, stderr_lines) = mpsc::channel(16);
    let (change_tx, changes) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    let session = ScratchSession::new(
        &path,
        config,
        SessionIo {
            input,
            stdout_lines,
            stderr_lines,
            changes,
        },
        cancel.clone(),
    );

    Harness {
        _dir: dir,
        path,
        session,
        stdin,
        stdout_tx,
        stderr_tx,
        change_tx,
        cancel,
    }
}

impl Harness {
    /// Current scratch file content.
    pub fn file(&self) -> String {
        String::from_utf8(std::fs::read(&self.path).expect("read scratch file"))
            .expect("scratch file is UTF-8")
    }

    /// Simulate an editor save of `content`.
    pub fn save(&self, content: &str) {
        std::fs::write(&self.path, content).expect("write scratch file");
    }

    /// Bytes written to the subprocess input so far.
    pub async fn stdin_bytes(&mut self) -> Vec<u8> {
        read_available(&mut self.stdin).await
    }
}

/// Read whatever is already buffered in `reader`, stopping at the first
/// read that does not complete promptly.
pub async fn read_available(reader: &mut DuplexStream) -> Vec<u8> {
    let mut collected = Vec::new();
    let mut buf = [0_u8; 4096];
    while let Ok(Ok(n)) = tokio::time::timeout(Duration::from_millis(50), reader.read(&mut buf)).await
    {
        if n == 0 {
            break;
        }
        collected.extend_from_slice(&buf[..n]);
    }
    collected
}
