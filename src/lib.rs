#![forbid(unsafe_code)]

//! `pipescratch`: use a scratch file as the standard input of a command.
//!
//! Each save of the scratch file is forwarded to the command's standard
//! input; the command's output is appended to the file as comment lines
//! below a sentinel line.

pub mod config;
pub mod editor;
pub mod errors;
pub mod mode;
pub mod scratch;

pub use config::ScratchConfig;
pub use errors::{AppError, Result};
