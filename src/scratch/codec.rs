//! Line codec for subprocess output streams.
//!
//! Splits a byte stream on `\n` and yields each line with the terminator
//! stripped. Compared to [`tokio_util::codec::LinesCodec`] it differs in
//! two ways that suit comment output:
//!
//! - bytes that are not valid UTF-8 are replaced with U+FFFD instead of
//!   failing the stream;
//! - an unterminated trailing fragment at end-of-stream is discarded rather
//!   than yielded or reported as an error. Output that does not end in a
//!   newline therefore never reaches the scratch file (known limitation).
//!
//! Lines longer than [`MAX_LINE_BYTES`] are skipped up to their terminator
//! and logged at `WARN`; decoding continues afterwards. The decoder never
//! fails on content, since a decoder error pauses [`tokio_util::codec::FramedRead`]
//! the same way end-of-stream does.

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;
use tracing::{debug, warn};

use crate::{AppError, Result};

/// Maximum accepted line length: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Newline-delimited decoder with lossy UTF-8 conversion.
#[derive(Debug)]
pub struct ScratchLineCodec {
    max_length: usize,
    /// Index into the buffer already scanned for `\n`.
    next_index: usize,
    /// Set while skipping the remainder of an over-long line.
    discarding: bool,
}

impl ScratchLineCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Create a codec that rejects lines longer than `max_length` bytes.
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
            discarding: false,
        }
    }

    /// The configured line length limit.
    #[must_use]
    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

impl Default for ScratchLineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ScratchLineCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>> {
        loop {
            let read_to = self.max_length.saturating_add(1).min(buf.len());
            let newline = buf[self.next_index..read_to]
                .iter()
                .position(|b| *b == b'\n');

            match (self.discarding, newline) {
                (true, Some(offset)) => {
                    // Drop the tail of the over-long line and resume.
                    buf.advance(self.next_index + offset + 1);
                    self.discarding = false;
                    self.next_index = 0;
                }
                (true, None) => {
                    buf.advance(read_to);
                    self.next_index = 0;
                    if buf.is_empty() {
                        return Ok(None);
                    }
                }
                (false, Some(offset)) => {
                    let end = self.next_index + offset;
                    self.next_index = 0;
                    let mut line = buf.split_to(end + 1);
                    line.truncate(end);
                    return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
                }
                (false, None) if buf.len() > self.max_length => {
                    warn!(
                        max_length = self.max_length,
                        "output line too long, skipping to next newline"
                    );
                    self.discarding = true;
                }
                (false, None) => {
                    self.next_index = read_to;
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        if !buf.is_empty() {
            debug!(
                bytes = buf.len(),
                "discarding unterminated trailing output"
            );
            buf.clear();
        }
        self.next_index = 0;
        self.discarding = false;
        Ok(None)
    }
}
