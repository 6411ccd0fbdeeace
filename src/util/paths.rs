//! Where tracegraph keeps its config file and logs.
//!
//! Everything lives under one base directory, `~/.tracegraph` unless
//! `--data-dir` names another one.

use std::path::PathBuf;
use std::sync::OnceLock;

const DIR_NAME: &str = ".tracegraph";

static DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Pins the base directory for the rest of the process. Only the first call
/// counts; later calls are logged and ignored.
pub fn init_data_dir(custom_path: Option<PathBuf>) {
    let path = custom_path.unwrap_or_else(default_data_dir);
    if let Err(rejected) = DATA_DIR.set(path) {
        let existing = DATA_DIR
            .get()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        tracing::debug!(
            rejected = %rejected.display(),
            existing = %existing,
            "data directory already pinned"
        );
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(DIR_NAME))
}

/// Base directory. Falls back to the home-directory default when
/// [`init_data_dir`] was never called, which is the case in library use.
pub fn data_dir() -> PathBuf {
    DATA_DIR.get().cloned().unwrap_or_else(default_data_dir)
}

pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

/// File the CLI appends its tracing output to.
pub fn log_file_path() -> PathBuf {
    logs_dir().join("tracegraph.log")
}

/// Optional TOML overrides, see `Config::load`.
pub fn config_path() -> PathBuf {
    data_dir().join("config.toml")
}
