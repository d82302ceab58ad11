//! Scratch file coordination.
//!
//! Couples one scratch file with one subprocess:
//! - `codec`: newline framing of subprocess output.
//! - `reader`: tasks turning the output pipes into line channels.
//! - `process`: spawning the subprocess and owning its pipes.
//! - `watcher`: change notifications for the scratch file.
//! - `rewrite`: rendering the generated region below the sentinel line.
//! - `ack`: recognizing notifications caused by the session's own writes.
//! - `session`: the loop tying the above together.

pub mod ack;
pub mod codec;
pub mod process;
pub mod reader;
pub mod rewrite;
pub mod session;
pub mod watcher;
