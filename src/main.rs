//! Treewatch - recursive directory watcher
//!
//! Watches the given directories and prints one line per filesystem event.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use treewatch::config::EventFormat;
use treewatch::observability::init_tracing;
use treewatch::watcher::{EventRecord, WatchSession};
use treewatch::{Callbacks, CancellationToken, Config, Event, WatchContext};

/// Treewatch - recursive directory watcher
#[derive(Parser, Debug)]
#[command(name = "treewatch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directories to watch
    #[arg(required = true, env = "TREEWATCH_PATHS", value_delimiter = ',')]
    paths: Vec<PathBuf>,

    /// Stop after this many seconds (0 = run until Ctrl-C)
    #[arg(short, long, env = "TREEWATCH_TIMEOUT_SECS", default_value = "10")]
    timeout_secs: u64,

    /// Only watch the given directories, not their subdirectories
    #[arg(long, env = "TREEWATCH_NO_RECURSIVE")]
    no_recursive: bool,

    /// Event output format
    #[arg(short, long, env = "TREEWATCH_FORMAT", value_enum, default_value = "text")]
    format: EventFormat,

    /// Capacity of the event channel
    #[arg(long, env = "TREEWATCH_CHANNEL_CAPACITY", default_value = "1024")]
    channel_capacity: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "TREEWATCH_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long, env = "TREEWATCH_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli.log_level, cli.log_json);

    tracing::info!("treewatch v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config {
        watch_dirs: cli.paths,
        log_level: cli.log_level,
        log_json: cli.log_json,
        timeout_secs: cli.timeout_secs,
        recursive: !cli.no_recursive,
        channel_capacity: cli.channel_capacity,
        event_format: cli.format,
    };

    tracing::debug!(?config, "Configuration loaded");
    config.validate()?;

    let cancel = CancellationToken::new();
    let format = config.event_format;
    let callbacks = Callbacks::new()
        .on_any(move |_: &WatchContext, event: &Event| print_event(format, event))
        .on_error(|ctx, err| {
            tracing::error!(session = %ctx.session_id(), error = %err, "Watch error");
        });

    let session = WatchSession::from_config(cancel.clone(), &config.watcher_config(), callbacks)
        .context("failed to start watching")?;
    let handle = session.start();

    if let Some(timeout) = config.timeout() {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            tracing::info!(?timeout, "Timeout reached");
            cancel.cancel();
        });
    }

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupted");
                cancel.cancel();
            }
        });
    }

    let reason = handle.wait().await?;
    tracing::info!(?reason, "treewatch stopped");
    Ok(())
}

fn print_event(format: EventFormat, event: &Event) {
    let Some(record) = EventRecord::from_event(event) else {
        return;
    };

    let line = match format {
        EventFormat::Text => record.to_string(),
        EventFormat::Json => match serde_json::to_string(&record) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode event");
                return;
            }
        },
    };

    let mut stdout = std::io::stdout().lock();
    if let Err(e) = writeln!(stdout, "{line}") {
        tracing::warn!(error = %e, "Failed to write event");
    }
}
