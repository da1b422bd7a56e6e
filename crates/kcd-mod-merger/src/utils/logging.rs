//! Log setup: console output plus a daily log file next to the executable.

use camino::{Utf8Path, Utf8PathBuf};
use std::time::{Duration, SystemTime};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub const LOG_FILE_PREFIX: &str = "kcd-mod-merger";
pub const LOG_RETENTION_DAYS: u64 = 7;

const DEFAULT_FILTER: &str = "kcd_mod_merger=info,kmm_core=info";

/// Console log lines share stdout with command output.
const CONSOLE_WRITER: fn() -> std::io::Stdout = std::io::stdout;

/// Install the global subscriber. The returned guard must be held until exit
/// so buffered lines reach the log file.
pub fn init_logging() -> (Option<WorkerGuard>, Option<Utf8PathBuf>) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_FILTER.into());

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(CONSOLE_WRITER)
        .with_target(false);

    let (file_guard, file_layer, log_path) = match default_log_dir() {
        Some(log_dir) => {
            let appender = std::fs::create_dir_all(&log_dir)
                .map_err(|e| e.to_string())
                .and_then(|_| {
                    rolling::RollingFileAppender::builder()
                        .rotation(rolling::Rotation::DAILY)
                        .filename_prefix(LOG_FILE_PREFIX)
                        .filename_suffix("log")
                        .build(&log_dir)
                        .map_err(|e| e.to_string())
                });
            match appender {
                Ok(file_appender) => {
                    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
                    let layer = tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false);
                    (Some(guard), Some(layer), Some(log_dir))
                }
                Err(e) => {
                    eprintln!("Failed to set up log file in {}: {}", log_dir, e);
                    (None, None, None)
                }
            }
        }
        None => (None, None, None),
    };

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);
    if let Some(layer) = file_layer {
        registry.with(layer).init();
    } else {
        registry.init();
    }

    (file_guard, log_path)
}

/// Delete log files older than `max_age_days` from the log directory.
/// Returns how many files were removed.
pub fn cleanup_old_logs(log_dir: &Utf8Path, max_age_days: u64) -> usize {
    let max_age = Duration::from_secs(max_age_days * 24 * 60 * 60);

    let entries = match log_dir.read_dir_utf8() {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!("Failed to read log directory for cleanup: {}", e);
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let file_name = entry.file_name();

        // Only dated log files ("kcd-mod-merger.2026-10-19.log")
        if !file_name.starts_with(&format!("{LOG_FILE_PREFIX}.")) || !file_name.ends_with(".log") {
            continue;
        }

        let modified = match entry.metadata().and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(_) => continue,
        };

        let age = match SystemTime::now().duration_since(modified) {
            Ok(d) => d,
            Err(_) => continue,
        };

        if age > max_age {
            match std::fs::remove_file(entry.path()) {
                Ok(()) => {
                    tracing::debug!("Removed old log file: {}", file_name);
                    removed += 1;
                }
                Err(e) => tracing::warn!("Failed to remove old log file {}: {}", file_name, e),
            }
        }
    }
    removed
}

/// `logs/` next to the executable, falling back to the temp directory.
pub fn default_log_dir() -> Option<Utf8PathBuf> {
    if let Some(dir) = super::config::config_path("logs") {
        return Some(dir);
    }
    Utf8PathBuf::from_path_buf(std::env::temp_dir().join(LOG_FILE_PREFIX)).ok()
}
