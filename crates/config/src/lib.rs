//! Configuration directory helpers for Triage
//!
//! All Triage configuration lives in a single per-user directory
//! (`~/.config/triage/` on Linux). This crate resolves paths inside it and
//! loads/saves JSON documents, leaving the shape of each document to callers.
//!
//! Call [`init`] once at startup to make sure the directory exists.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// Name of the application directory under the platform config dir
const APP_DIR: &str = "triage";

/// Environment variable that relocates the config directory (used by tests and portable installs)
pub const CONFIG_DIR_ENV: &str = "TRIAGE_CONFIG_DIR";

/// Initialize the config directory, creating it if needed.
pub fn init() -> Result<PathBuf> {
    ensure_config_dir()
}

/// Get the Triage config directory
///
/// `TRIAGE_CONFIG_DIR` wins over the platform default.
pub fn config_dir() -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV).filter(|d| !d.is_empty()) {
        return Some(PathBuf::from(dir));
    }
    dirs::config_dir().map(|p| p.join(APP_DIR))
}

/// Get the path to a file within the config directory
pub fn config_path(filename: &str) -> Option<PathBuf> {
    config_dir().map(|p| p.join(filename))
}

/// Get the data directory used for the mail cache and search index
pub fn data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join(APP_DIR))
}

/// Load and parse a JSON file from the config directory
pub fn load_json<T: DeserializeOwned>(filename: &str) -> Result<T> {
    let path = config_path(filename).context("Could not determine config directory")?;
    load_json_file(&path)
}

/// Load a JSON file from the config directory, or `T::default()` when it does not exist
///
/// A file that exists but fails to parse is still an error.
pub fn load_json_or_default<T: DeserializeOwned + Default>(filename: &str) -> Result<T> {
    if config_exists(filename) {
        load_json(filename)
    } else {
        Ok(T::default())
    }
}

/// Load and parse a JSON file from an arbitrary path
pub fn load_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Check if a file exists in the config directory
pub fn config_exists(filename: &str) -> bool {
    config_path(filename).is_some_and(|p| p.exists())
}

/// Ensure the config directory exists
pub fn ensure_config_dir() -> Result<PathBuf> {
    let dir = config_dir().context("Could not determine config directory")?;
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
    Ok(dir)
}

/// Save a value as pretty JSON into the config directory
pub fn save_json<T: serde::Serialize>(filename: &str, value: &T) -> Result<()> {
    let dir = ensure_config_dir()?;
    save_json_file(&dir.join(filename), value)
}

/// Save a value as pretty JSON to an arbitrary path
pub fn save_json_file<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write config file: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        interval: u64,
    }

    #[test]
    fn test_config_path_ends_with_filename() {
        let path = config_path("engine.json");
        assert!(path.is_some());
        assert!(path.unwrap().ends_with("engine.json"));
    }

    #[test]
    fn test_json_file_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("sample.json");

        let value = Sample {
            name: "inbox".to_string(),
            interval: 300,
        };
        save_json_file(&path, &value).unwrap();
        let loaded: Sample = load_json_file(&path).unwrap();
        assert_eq!(loaded, value);
    }

    #[test]
    fn test_load_missing_file_is_error() {
        let result: Result<Sample> = load_json_file(Path::new("/definitely/not/here.json"));
        assert!(result.is_err());
    }
}
