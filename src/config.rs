//! Session configuration parsing, CLI overrides, and validation.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::mode::ExitPolicy;
use crate::{AppError, Result};

/// Fixed literal that follows the line prefix in the sentinel line.
pub const SENTINEL_LITERAL: &str = "~~ scratch ~~";

fn default_extension() -> String {
    "sql".into()
}

fn default_line_prefix() -> String {
    "-- ".into()
}

fn default_self_write_events() -> usize {
    2
}

fn default_self_write_window_ms() -> u64 {
    1000
}

/// Settings for one scratch session.
///
/// Loaded from an optional TOML file, then overridden by command-line flags
/// through [`ScratchConfig::apply_overrides`].
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct ScratchConfig {
    /// Editor command invoked with the scratch path; empty prints the path.
    #[serde(default)]
    pub editor: String,
    /// File extension of the scratch file, without the leading dot.
    #[serde(default = "default_extension")]
    pub extension: String,
    /// Prefix written before every generated line, sentinel included.
    #[serde(default = "default_line_prefix")]
    pub line_prefix: String,
    /// Watcher notifications expected for each truncate-then-write.
    #[serde(default = "default_self_write_events")]
    pub self_write_events: usize,
    /// How long after a self-write its notifications are still recognized.
    #[serde(default = "default_self_write_window_ms")]
    pub self_write_window_ms: u64,
    /// What to do once the subprocess has exited.
    #[serde(default)]
    pub on_exit: ExitPolicy,
}

impl Default for ScratchConfig {
    fn default() -> Self {
        Self {
            editor: String::new(),
            extension: default_extension(),
            line_prefix: default_line_prefix(),
            self_write_events: default_self_write_events(),
            self_write_window_ms: default_self_write_window_ms(),
            on_exit: ExitPolicy::default(),
        }
    }
}

/// Command-line values that take precedence over the configuration file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// `--editor`
    pub editor: Option<String>,
    /// `--ext`
    pub extension: Option<String>,
    /// `--line-prefix`
    pub line_prefix: Option<String>,
    /// `--self-write-events`
    pub self_write_events: Option<usize>,
    /// `--self-write-window-ms`
    pub self_write_window_ms: Option<u64>,
    /// `--on-exit`
    pub on_exit: Option<ExitPolicy>,
}

impl ScratchConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Replace every field that has a command-line value and re-validate.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the merged configuration is invalid.
    pub fn apply_overrides(mut self, overrides: ConfigOverrides) -> Result<Self> {
        if let Some(editor) = overrides.editor {
            self.editor = editor;
        }
        if let Some(extension) = overrides.extension {
            self.extension = extension;
        }
        if let Some(prefix) = overrides.line_prefix {
            self.line_prefix = prefix;
        }
        if let Some(count) = overrides.self_write_events {
            self.self_write_events = count;
        }
        if let Some(window) = overrides.self_write_window_ms {
            self.self_write_window_ms = window;
        }
        if let Some(policy) = overrides.on_exit {
            self.on_exit = policy;
        }
        self.validate()?;
        Ok(self)
    }

    /// The sentinel line separating editable and generated content, without
    /// its trailing newline.
    #[must_use]
    pub fn sentinel_line(&self) -> String {
        format!("{}{SENTINEL_LITERAL}", self.line_prefix)
    }

    /// Self-write acknowledgement window as a [`Duration`].
    #[must_use]
    pub fn self_write_window(&self) -> Duration {
        Duration::from_millis(self.self_write_window_ms)
    }

    /// File name suffix for the scratch file, including the dot.
    #[must_use]
    pub fn scratch_suffix(&self) -> String {
        if self.extension.is_empty() {
            String::new()
        } else {
            format!(".{}", self.extension)
        }
    }

    fn validate(&self) -> Result<()> {
        if self
            .extension
            .chars()
            .any(|c| std::path::is_separator(c) || c == '\0')
        {
            return Err(AppError::Config(format!(
                "extension must be a plain file name component, got {:?}",
                self.extension
            )));
        }

        if self.line_prefix.contains('\n') {
            return Err(AppError::Config(
                "line_prefix must not contain a newline".into(),
            ));
        }

        if self.self_write_events == 0 {
            return Err(AppError::Config(
                "self_write_events must be greater than zero".into(),
            ));
        }

        if self.self_write_window_ms == 0 {
            return Err(AppError::Config(
                "self_write_window_ms must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}
