// src/logging.rs
//
// Timestamped logging for the bridge.
// Every line goes to stderr; when file logging is on, the same line is
// appended to a per-run log file.

use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Name of the symlink that always points at the current run's log.
const LATEST_LOG_NAME: &str = "telebridge.log";

struct ActiveLog {
    file: File,
    path: PathBuf,
}

/// The open log file, if any. Shared by every `tlog!` call site.
static ACTIVE_LOG: Mutex<Option<ActiveLog>> = Mutex::new(None);

fn active_log() -> MutexGuard<'static, Option<ActiveLog>> {
    ACTIVE_LOG.lock().unwrap_or_else(|p| p.into_inner())
}

fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S%.3f").to_string()
}

/// Write one timestamped line to stderr and, when enabled, the log file.
/// Use through `tlog!`.
pub(crate) fn write_line(args: fmt::Arguments<'_>) {
    let line = format!("{} {}", timestamp(), args);
    eprintln!("{}", line);
    if let Some(log) = active_log().as_mut() {
        // A failing log file must never take the bridge down
        let _ = writeln!(log.file, "{}", line);
    }
}

/// Timestamped logging macro: `tlog!("[worker] opened {}", path)`.
/// Lines are prefixed with local `HH:MM:SS.mmm` time.
macro_rules! tlog {
    ($($arg:tt)*) => {
        $crate::logging::write_line(format_args!($($arg)*))
    };
}

/// Point `<dir>/telebridge.log` at `filename`. Unix only: Windows symlinks
/// need elevated privileges.
fn link_latest(log_dir: &Path, filename: &str) {
    #[cfg(unix)]
    {
        let link = log_dir.join(LATEST_LOG_NAME);
        let _ = std::fs::remove_file(&link);
        if let Err(e) = std::os::unix::fs::symlink(filename, &link) {
            eprintln!("{} [logging] No {} symlink: {}", timestamp(), LATEST_LOG_NAME, e);
        }
    }
    #[cfg(not(unix))]
    let _ = (log_dir, filename);
}

/// Start appending log lines to a new `YYYYmmdd-HHMMSS-telebridge.log` in
/// `log_dir`, replacing any log already open. Returns the new file's path.
pub fn init_file_logging(log_dir: &Path) -> Result<PathBuf, String> {
    std::fs::create_dir_all(log_dir)
        .map_err(|e| format!("Failed to create log dir {}: {}", log_dir.display(), e))?;

    let filename = chrono::Local::now()
        .format("%Y%m%d-%H%M%S-telebridge.log")
        .to_string();
    let path = log_dir.join(&filename);
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| format!("Failed to open log file {}: {}", path.display(), e))?;

    link_latest(log_dir, &filename);

    *active_log() = Some(ActiveLog {
        file,
        path: path.clone(),
    });
    tlog!("[logging] Logging to {}", path.display());
    Ok(path)
}

/// Path of the log file currently being written, if any.
pub fn current_log_file() -> Option<PathBuf> {
    active_log().as_ref().map(|log| log.path.clone())
}

/// Close the log file. Returns the path that was closed, if logging was on.
pub fn stop_file_logging() -> Option<PathBuf> {
    let closed = active_log().take()?;
    tlog!("[logging] Closed {}", closed.path.display());
    Some(closed.path)
}
