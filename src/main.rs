#![forbid(unsafe_code)]

//! `pipescratch` binary: scratch file as standard input/output of a command.
//!
//! Creates a temporary scratch file, starts the command, and runs the
//! session loop until the command exits or the process is interrupted.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use tracing_subscriber::{fmt, EnvFilter};

use pipescratch::config::{ConfigOverrides, ScratchConfig};
use pipescratch::editor::launch_editor;
use pipescratch::mode::ExitPolicy;
use pipescratch::scratch::process::{spawn_process, ProcessSpec};
use pipescratch::scratch::reader::{spawn_line_reader, OutputStream};
use pipescratch::scratch::session::{ScratchSession, SessionIo};
use pipescratch::scratch::watcher::ScratchWatcher;
use pipescratch::{AppError, Result};

/// Time the subprocess gets to exit after `SIGTERM` before it is killed.
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "pipescratch",
    about = "Use a scratch file as standard input of a command, with its output appended as comments",
    version,
    long_about = None
)]
struct Cli {
    /// Command invoked with the scratch file path as last argument
    /// (empty just prints the path).
    #[arg(long, visible_alias = "editor-command", value_name = "COMMAND")]
    editor: Option<String>,

    /// Extension of the scratch file [default: sql].
    #[arg(long = "ext", visible_alias = "scratch-extension", value_name = "EXTENSION")]
    extension: Option<String>,

    /// Prefix for each output line [default: "-- "].
    #[arg(long, value_name = "PREFIX", allow_hyphen_values = true)]
    line_prefix: Option<String>,

    /// Watcher notifications caused by each rewrite of the scratch file [default: 2].
    #[arg(long, value_name = "N")]
    self_write_events: Option<usize>,

    /// Window in which those notifications are expected [default: 1000].
    #[arg(long, value_name = "MS")]
    self_write_window_ms: Option<u64>,

    /// What to do once the command has exited [default: stop].
    #[arg(long, value_enum)]
    on_exit: Option<ExitPolicy>,

    /// Optional TOML file with default settings.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json). Logs go to stderr.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Command to manage input/output as a scratch file, with its arguments.
    #[arg(
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_name = "COMMAND"
    )]
    command: Vec<String>,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            editor: self.editor.clone(),
            extension: self.extension.clone(),
            line_prefix: self.line_prefix.clone(),
            self_write_events: self.self_write_events,
            self_write_window_ms: self.self_write_window_ms,
            on_exit: self.on_exit,
        }
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let base = match &args.config {
        Some(path) => ScratchConfig::load_from_path(path)?,
        None => ScratchConfig::default(),
    };
    let config = base.apply_overrides(args.overrides())?;
    let spec = ProcessSpec::from_command_line(&args.command)?;

    // ── Create the scratch file ─────────────────────────
    // Removed when `scratch` is dropped, on every return path below.
    let scratch = tempfile::Builder::new()
        .prefix("pipescratch-")
        .suffix(&config.scratch_suffix())
        .tempfile()
        .map_err(|err| AppError::Io(format!("failed to create scratch file: {err}")))?;
    let scratch_path = scratch.path().to_path_buf();
    info!(path = %scratch_path.display(), "scratch file created");

    let ct = CancellationToken::new();

    // ── Start the subprocess, watcher, and readers ──────
    let mut process = spawn_process(&spec)?;
    let (watcher, changes) = ScratchWatcher::new(&scratch_path)?;
    let (stdout_lines, stdout_handle) =
        spawn_line_reader(OutputStream::Stdout, process.take_stdout()?, ct.clone());
    let (stderr_lines, stderr_handle) =
        spawn_line_reader(OutputStream::Stderr, process.take_stderr()?, ct.clone());

    let session = ScratchSession::new(
        &scratch_path,
        &config,
        SessionIo {
            input: process.take_stdin()?,
            stdout_lines,
            stderr_lines,
            changes,
        },
        ct.clone(),
    );

    // ── Open the scratch file for the user ──────────────
    let editor_handle = if config.editor.trim().is_empty() {
        println!("{}", scratch_path.display());
        None
    } else {
        Some(launch_editor(&config.editor, &scratch_path, ct.clone())?)
    };

    let signal_ct = ct.clone();
    let signal_handle = tokio::spawn(async move {
        tokio::select! {
            () = shutdown_signal() => {
                info!("shutdown signal received");
                signal_ct.cancel();
            }
            () = signal_ct.cancelled() => {}
        }
    });

    // ── Run the session ─────────────────────────────────
    let span = info_span!("scratch_session", path = %scratch_path.display());
    let outcome = session.run().instrument(span).await;
    ct.cancel();

    // ── Shutdown ────────────────────────────────────────
    match process.terminate(TERMINATE_GRACE).await {
        Ok(Some(status)) => info!(%status, "subprocess exited"),
        Ok(None) => info!("subprocess stopped"),
        Err(err) => error!(%err, "failed to stop subprocess"),
    }

    let (stdout_joined, stderr_joined, signal_joined) =
        tokio::join!(stdout_handle, stderr_handle, signal_handle);
    for (task, joined) in [
        ("stdout reader", stdout_joined),
        ("stderr reader", stderr_joined),
        ("signal handler", signal_joined),
    ] {
        if let Err(err) = joined {
            warn!(task, %err, "task did not finish cleanly");
        }
    }
    if let Some(handle) = editor_handle {
        if let Err(err) = handle.await {
            warn!(task = "editor", %err, "task did not finish cleanly");
        }
    }
    drop(watcher);

    if let Err(err) = &outcome {
        error!(%err, "scratch session failed");
    }

    scratch
        .close()
        .map_err(|err| AppError::Io(format!("failed to remove scratch file: {err}")))?;

    let end = outcome?;
    info!(?end, "pipescratch shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
