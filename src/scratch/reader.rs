//! Subprocess output reader task.
//!
//! Reads newline-delimited text from one of the subprocess output pipes and
//! forwards each complete line, terminator stripped, through a tokio
//! [`mpsc`] channel. The channel is the lazy line sequence consumed by the
//! session loop: `recv()` yields the next line, and `None` once the reader
//! has finished. The sender is dropped exactly once, when the reader returns,
//! so the sequence closes exactly once and never yields afterwards.
//!
//! End-of-stream and read errors are treated alike: both close the sequence.
//! A trailing line without a `\n` is discarded (see [`ScratchLineCodec`]).

use std::fmt::{Display, Formatter};

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::scratch::codec::ScratchLineCodec;

/// Capacity of each line channel between a reader and the session loop.
pub const LINE_CHANNEL_CAPACITY: usize = 256;

/// Which subprocess output pipe a reader is attached to.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum OutputStream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

impl Display for OutputStream {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdout => f.write_str("stdout"),
            Self::Stderr => f.write_str("stderr"),
        }
    }
}

/// Reader task. Decodes lines from `stream` and sends them on `line_tx`.
///
/// Returns when the stream reaches EOF, a read error occurs, the receiving
/// side is dropped, or `cancel` fires (also while blocked on a full
/// channel). Returning drops `line_tx`, which the receiver observes as the
/// closed signal.
pub async fn run_line_reader<R>(
    source: OutputStream,
    stream: R,
    line_tx: mpsc::Sender<String>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(stream, ScratchLineCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(%source, "line reader: cancellation received, stopping");
                break;
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!(%source, "line reader: EOF detected");
                        break;
                    }
                    Some(Err(err)) => {
                        warn!(%source, %err, "line reader: read error, closing stream");
                        break;
                    }
                    Some(Ok(line)) => {
                        // A full channel must not outlive cancellation.
                        tokio::select! {
                            biased;

                            () = cancel.cancelled() => {
                                debug!(%source, "line reader: cancelled while sending, stopping");
                                break;
                            }

                            sent = line_tx.send(line) => {
                                if sent.is_err() {
                                    debug!(%source, "line reader: receiver dropped, stopping");
                                    break;
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Spawn [`run_line_reader`] on the current runtime and return the
/// receiving end of its line sequence.
#[must_use]
pub fn spawn_line_reader<R>(
    source: OutputStream,
    stream: R,
    cancel: CancellationToken,
) -> (mpsc::Receiver<String>, JoinHandle<()>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (line_tx, line_rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
    let handle = tokio::spawn(run_line_reader(source, stream, line_tx, cancel));
    (line_rx, handle)
}
