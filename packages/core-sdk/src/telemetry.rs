use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::Result;
use once_cell::sync::Lazy;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

const DEFAULT_LOG_DIR: &str = "logs";
const LOG_FILE: &str = "puterchat.log";

static TELEMETRY_ENABLED: Lazy<std::sync::RwLock<bool>> =
    Lazy::new(|| std::sync::RwLock::new(false));

static LOG_DIR: Lazy<PathBuf> =
    Lazy::new(|| resolve_log_dir(std::env::var("PUTERCHAT_LOG_DIR").ok()));

/**
 * \brief Turn file logging on or off for this process.
 */
pub fn set_enabled(enabled: bool) {
    if let Ok(mut guard) = TELEMETRY_ENABLED.write() {
        *guard = enabled;
    }
}

pub fn is_enabled() -> bool {
    TELEMETRY_ENABLED.read().map(|g| *g).unwrap_or(false)
}

/**
 * \brief Directory the log file lives in (`PUTERCHAT_LOG_DIR`, default `logs`).
 */
pub fn log_dir() -> &'static Path {
    LOG_DIR.as_path()
}

/**
 * \brief Record a routine event. Callers pass sizes and ids, never message text or tokens.
 */
pub fn log_event(category: &str, message: &str) {
    record("INFO", category, message);
}

/**
 * \brief Record a failure.
 */
pub fn log_error(category: &str, message: &str) {
    record("ERROR", category, message);
}

fn record(level: &str, category: &str, message: &str) {
    if !is_enabled() {
        return;
    }
    if let Err(err) = append_line(log_dir(), level, category, message) {
        eprintln!("telemetry write failed: {}", err);
    }
}

fn resolve_log_dir(configured: Option<String>) -> PathBuf {
    configured
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR))
}

fn append_line(dir: &Path, level: &str, category: &str, message: &str) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let timestamp = OffsetDateTime::now_utc().format(&Rfc3339)?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(LOG_FILE))?;
    writeln!(file, "{} [{}] {} - {}", timestamp, level, category, message)?;
    Ok(())
}
