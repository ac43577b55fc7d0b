use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

const APP_DIR: &str = "devenv";

fn base_dir(variable: &str, fallback: &str) -> Result<PathBuf> {
    match env::var_os(variable) {
        Some(value) if !value.is_empty() => Ok(PathBuf::from(value)),
        _ => Ok(home_dir()?.join(fallback)),
    }
}

/// Get the XDG config directory for devenv
///
/// Returns `$XDG_CONFIG_HOME/devenv` or `~/.config/devenv` if not set
pub fn config_dir() -> Result<PathBuf> {
    Ok(base_dir("XDG_CONFIG_HOME", ".config")?.join(APP_DIR))
}

/// Get the XDG state directory for devenv
///
/// Returns `$XDG_STATE_HOME/devenv` or `~/.local/state/devenv` if not set.
/// Activation snapshots live under `activations/`.
pub fn state_dir() -> Result<PathBuf> {
    Ok(base_dir("XDG_STATE_HOME", ".local/state")?.join(APP_DIR))
}

/// Get the home directory
pub fn home_dir() -> Result<PathBuf> {
    directories::BaseDirs::new()
        .context("Failed to get home directory")
        .map(|bd| bd.home_dir().to_path_buf())
}
