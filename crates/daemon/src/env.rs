// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Environment variables read by the daemon.
//!
//! The variable name constants are generated by `build.rs` and live in the
//! [`names`] submodule.

use std::path::PathBuf;

/// Generated environment variable name constants.
pub mod names {
    include!(concat!(env!("OUT_DIR"), "/env_names.rs"));
}

/// Returns the value of `ERPSYNC_CONFIG` if set.
pub fn config_path() -> Option<PathBuf> {
    std::env::var(names::ERPSYNC_CONFIG).ok().map(PathBuf::from)
}

/// Returns the value of `ERPSYNC_STATE_DIR` if set.
pub fn state_dir() -> Option<PathBuf> {
    std::env::var(names::ERPSYNC_STATE_DIR)
        .ok()
        .map(PathBuf::from)
}

/// Returns the value of `XDG_STATE_HOME` if set.
pub fn xdg_state_home() -> Option<PathBuf> {
    std::env::var(names::XDG_STATE_HOME).ok().map(PathBuf::from)
}

/// Resolves the state directory: explicit flag, then `ERPSYNC_STATE_DIR`,
/// then `$XDG_STATE_HOME/erpsync`, then `~/.local/state/erpsync`.
pub fn resolve_state_dir(flag: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = flag.or_else(state_dir) {
        return dir;
    }
    if let Some(dir) = xdg_state_home() {
        return dir.join("erpsync");
    }
    dirs::home_dir()
        .map(|h| h.join(".local/state/erpsync"))
        .unwrap_or_else(|| PathBuf::from(".local/state/erpsync"))
}

/// Resolves the config file: explicit flag, then `ERPSYNC_CONFIG`, then
/// `config.toml` in the state directory if it exists.
pub fn resolve_config_path(flag: Option<PathBuf>, state_dir: &std::path::Path) -> Option<PathBuf> {
    flag.or_else(config_path).or_else(|| {
        let candidate = state_dir.join("config.toml");
        candidate.is_file().then_some(candidate)
    })
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
