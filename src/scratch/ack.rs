//! Self-write acknowledgement.
//!
//! Every rewrite of the scratch file produces watcher notifications of its
//! own (typically one for the truncate and one for the write). The session
//! must swallow those rather than forward the file to the subprocess again.
//!
//! Counting notifications alone is fragile: backends coalesce or split
//! events differently, so after a rewrite the record remembers
//!
//! - how many notifications are still expected,
//! - a SHA-256 fingerprint of the bytes that were written,
//! - a deadline after which nothing more is expected.
//!
//! A notification is absorbed only while the record is armed, the deadline
//! has not passed, and the file still holds exactly what was written. Any
//! other notification is a user save.
//!
//! The count only decides when the record settles. A large write is split
//! into several chunks by the runtime and may raise more notifications than
//! expected; once the count is used up the record keeps absorbing those
//! surplus notifications until the deadline, as long as the file content
//! still matches.

use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::time::Instant;

type Fingerprint = [u8; 32];

fn fingerprint(bytes: &[u8]) -> Fingerprint {
    Sha256::digest(bytes).into()
}

/// Protocol state for notifications caused by the session's own writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckState {
    /// No self-write is pending; every notification is a user save.
    Idle,
    /// A self-write happened and its notifications are still arriving.
    AwaitingSelfWriteAck {
        /// Notifications still expected.
        remaining: usize,
        /// Hash of the bytes the session wrote.
        fingerprint: Fingerprint,
        /// Instant after which the pending notifications are abandoned.
        deadline: Instant,
    },
    /// Every expected notification arrived; surplus ones matching the last
    /// write are still absorbed until the deadline.
    Settled {
        /// Hash of the bytes the session wrote.
        fingerprint: Fingerprint,
        /// Instant after which the record is idle again.
        deadline: Instant,
    },
}

/// Tracks pending self-write notifications for one scratch file.
#[derive(Debug, Clone)]
pub struct SelfWriteAck {
    expected: usize,
    window: Duration,
    state: AckState,
}

impl SelfWriteAck {
    /// Create an idle record expecting `expected` notifications per write,
    /// each within `window` of the write.
    #[must_use]
    pub fn new(expected: usize, window: Duration) -> Self {
        Self {
            expected,
            window,
            state: AckState::Idle,
        }
    }

    /// Current protocol state.
    #[must_use]
    pub fn state(&self) -> &AckState {
        &self.state
    }

    /// Record that `written` was just written to the file at `now`.
    ///
    /// Notifications still outstanding from an earlier write within its
    /// window are carried over, since they will now observe the new content.
    pub fn arm(&mut self, written: &[u8], now: Instant) {
        let carried = match self.state {
            AckState::AwaitingSelfWriteAck {
                remaining,
                deadline,
                ..
            } if now <= deadline => remaining,
            _ => 0,
        };
        self.state = AckState::AwaitingSelfWriteAck {
            remaining: carried + self.expected,
            fingerprint: fingerprint(written),
            deadline: now + self.window,
        };
    }

    /// Decide whether a notification observed at `now`, with the file
    /// holding `content`, was caused by the last self-write.
    ///
    /// Returns `true` when the notification is absorbed. Returns `false`
    /// when it must be treated as a user save; the record is then idle.
    pub fn absorb(&mut self, content: &[u8], now: Instant) -> bool {
        let (remaining, expected, deadline) = match self.state {
            AckState::Idle => return false,
            AckState::AwaitingSelfWriteAck {
                remaining,
                fingerprint: expected,
                deadline,
            } => (remaining, expected, deadline),
            AckState::Settled {
                fingerprint: expected,
                deadline,
            } => (0, expected, deadline),
        };

        if now > deadline || fingerprint(content) != expected {
            self.state = AckState::Idle;
            return false;
        }

        self.state = match remaining.saturating_sub(1) {
            0 => AckState::Settled {
                fingerprint: expected,
                deadline,
            },
            remaining => AckState::AwaitingSelfWriteAck {
                remaining,
                fingerprint: expected,
                deadline,
            },
        };
        true
    }
}
