//! Home-based storage paths for all ag-monitor persistence.
//!
//! Everything lives under `~/.ag-monitor/` (or `$AG_MONITOR_HOME`):
//! - `store/` - Key-value blobs (settings, token, pending redirect artifacts)
//! - `logs/events.jsonl` - Structured session events
//! - `logs/debug.log` - Diagnostic tracing output

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

/// The name of the monitor directory under the home directory.
const MONITOR_DIR: &str = ".ag-monitor";

/// Environment override for the monitor home directory.
pub const HOME_ENV: &str = "AG_MONITOR_HOME";

/// Returns the monitor home directory, creating it if needed.
///
/// # Errors
///
/// Returns an error if:
/// - Home directory cannot be determined
/// - Directory creation fails
pub fn monitor_home_dir() -> Result<PathBuf> {
    let dir = match std::env::var_os(HOME_ENV) {
        Some(custom) => PathBuf::from(custom),
        None => dirs::home_dir()
            .context("Could not determine home directory for monitor storage")?
            .join(MONITOR_DIR),
    };
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create monitor directory: {}", dir.display()))?;
    Ok(dir)
}

/// Returns the key-value store directory: `~/.ag-monitor/store/`
pub fn store_dir() -> Result<PathBuf> {
    let dir = monitor_home_dir()?.join("store");
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create store directory: {}", dir.display()))?;
    Ok(dir)
}

/// Returns the logs directory: `~/.ag-monitor/logs/`
pub fn logs_dir() -> Result<PathBuf> {
    let dir = monitor_home_dir()?.join("logs");
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create logs directory: {}", dir.display()))?;
    Ok(dir)
}

/// Returns the diagnostic log path: `~/.ag-monitor/logs/debug.log`
pub fn debug_log_path() -> Result<PathBuf> {
    Ok(logs_dir()?.join("debug.log"))
}
