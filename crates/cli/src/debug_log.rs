//! Session logging for the blocksync client
//!
//! Every invocation writes a trace log to `<tmp>/blocksync/<session>.log`.
//! Spans close with their busy/idle timings, so the file shows how long each
//! command and sync phase took and which server it talked to. The console
//! only carries warnings unless `--verbose` is given.
//!
//! `BLOCKSYNC_LOG` overrides the file filter with an `EnvFilter` directive.

use std::path::{Path, PathBuf};

use color_eyre::Result;
use color_eyre::eyre::WrapErr as _;
use tracing::info;
use tracing_subscriber::Layer as _;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use uuid::Uuid;

const FILTER_ENV: &str = "BLOCKSYNC_LOG";
const DEFAULT_FILE_FILTER: &str =
    "warn,blocksync=trace,blocksync_core=trace,blocksync_transport=trace";

/// A logging session; dropping it flushes the file log
pub struct SessionInfo {
    pub session_id: Uuid,
    pub log_path: PathBuf,
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

/// Directory holding one log file per session
fn log_dir() -> PathBuf {
    std::env::temp_dir().join("blocksync")
}

fn log_file_name(session_id: Uuid) -> String {
    format!("{session_id}.log")
}

/// Install the file and console layers for this process.
///
/// # Errors
/// Returns an error if the log directory cannot be created or the
/// `BLOCKSYNC_LOG` directive does not parse.
pub fn init(verbose: bool) -> Result<SessionInfo> {
    let session_id = Uuid::new_v4();
    let dir = log_dir();
    std::fs::create_dir_all(&dir)
        .wrap_err_with(|| format!("failed to create log directory {}", dir.display()))?;
    let log_path = session_log(&dir, session_id);

    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(&dir, log_file_name(session_id)));

    let file_filter = match std::env::var(FILTER_ENV) {
        Ok(directive) => EnvFilter::try_new(&directive)
            .wrap_err_with(|| format!("invalid {FILTER_ENV} directive {directive:?}"))?,
        Err(_) => EnvFilter::new(DEFAULT_FILE_FILTER),
    };
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_filter(file_filter);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .compact()
        .without_time()
        .with_target(false)
        .with_filter(if verbose {
            LevelFilter::DEBUG
        } else {
            LevelFilter::WARN
        });

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .init();

    info!(session = %session_id, version = env!("CARGO_PKG_VERSION"), "Session started");

    Ok(SessionInfo {
        session_id,
        log_path,
        _guard: guard,
    })
}

fn session_log(dir: &Path, session_id: Uuid) -> PathBuf {
    dir.join(log_file_name(session_id))
}
