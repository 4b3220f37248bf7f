//! # Logging Initialization
//!
//! Diagnostic logging for the engine and the `conshell` binary. This is separate from the
//! operator-visible output sink and from the per-process log files.
//!
//! [`init_logging`] installs a global `tracing` subscriber exactly once:
//!
//! 1.  **Environment Filter (`EnvFilter`)**: verbosity follows `RUST_LOG` when set, otherwise
//!     the requested level with `debug` for the `conshell` crate itself.
//! 2.  **File Logging**: with `log_to_file = true`, a daily rolling file is written to the
//!     user cache directory resolved by `directories`. ANSI colors are disabled there.
//! 3.  **Stderr Logging**: with `log_to_file = false`, or when the log file cannot be
//!     created in the cache directory, logs go to `stderr` with ANSI colors.

use anyhow::Result;
use directories::ProjectDirs;
use std::{io::stderr, panic::AssertUnwindSafe, path::Path, sync::Once};
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::{EnvFilter, fmt::layer, prelude::*};

const LOG_FILE: &str = "conshell.log";

static INIT: Once = Once::new();

pub fn init_test_logging() {
    init_logging("trace", false).expect("Failed to initialize test logging");
}

/// Initializes the logging system.
///
/// # Errors
///
/// Currently infallible; the `Result` is kept so callers can use `?` at startup.
pub fn init_logging(log_level: &str, log_to_file: bool) -> Result<()> {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("{log_level},conshell=debug")));

        let appender = log_to_file
            .then(|| ProjectDirs::from("com", "Conshell", "conshell"))
            .flatten()
            .and_then(|dirs| file_appender(dirs.cache_dir()));

        match appender {
            Some(appender) => {
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(layer().with_writer(non_blocking).with_ansi(false))
                    .init();
                // Leaked so buffered lines are flushed on exit.
                Box::leak(Box::new(guard));
            }
            None => tracing_subscriber::registry()
                .with(env_filter)
                .with(layer().with_writer(stderr).with_ansi(true))
                .init(),
        }
    });

    Ok(())
}

/// A daily rolling appender in `dir`, or `None` when the log file cannot be written there.
///
/// `rolling::daily` panics instead of returning an error when it cannot open its file, so
/// write access is checked first and the panic is caught.
fn file_appender(dir: &Path) -> Option<RollingFileAppender> {
    if !test_write_permission(dir) {
        return None;
    }
    std::panic::catch_unwind(AssertUnwindSafe(|| {
        tracing_appender::rolling::daily(dir, LOG_FILE)
    }))
    .ok()
}

fn test_write_permission(dir: &Path) -> bool {
    if std::fs::create_dir_all(dir).is_err() {
        return false;
    }
    let test_file = dir.join(".conshell_log_test");
    match std::fs::write(&test_file, "test") {
        Ok(()) => {
            let _ = std::fs::remove_file(&test_file);
            true
        }
        Err(_) => false,
    }
}
