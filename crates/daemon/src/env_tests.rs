// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::names;
use super::*;
use std::path::PathBuf;
use std::sync::Mutex;

// Tests in this file mutate process-wide environment variables.
static ENV_LOCK: Mutex<()> = Mutex::new(());

#[test]
fn constants_match_env_var_names() {
    assert_eq!(names::ERPSYNC_CONFIG, "ERPSYNC_CONFIG");
    assert_eq!(names::ERPSYNC_STATE_DIR, "ERPSYNC_STATE_DIR");
    assert_eq!(names::XDG_STATE_HOME, "XDG_STATE_HOME");
    assert_eq!(names::RUST_LOG, "RUST_LOG");
}

#[test]
fn state_dir_returns_path_when_set() {
    let _lock = ENV_LOCK.lock().unwrap();
    let _guard = EnvGuard::set(names::ERPSYNC_STATE_DIR, "/custom/state");
    assert_eq!(state_dir(), Some(PathBuf::from("/custom/state")));
}

#[test]
fn state_dir_returns_none_when_unset() {
    let _lock = ENV_LOCK.lock().unwrap();
    let _guard = EnvGuard::remove(names::ERPSYNC_STATE_DIR);
    assert_eq!(state_dir(), None);
}

#[test]
fn flag_wins_over_environment() {
    let _lock = ENV_LOCK.lock().unwrap();
    let _guard = EnvGuard::set(names::ERPSYNC_STATE_DIR, "/from/env");
    assert_eq!(
        resolve_state_dir(Some(PathBuf::from("/from/flag"))),
        PathBuf::from("/from/flag")
    );
    assert_eq!(resolve_state_dir(None), PathBuf::from("/from/env"));
}

#[test]
fn xdg_state_home_is_namespaced() {
    let _lock = ENV_LOCK.lock().unwrap();
    let _state = EnvGuard::remove(names::ERPSYNC_STATE_DIR);
    let _xdg = EnvGuard::set(names::XDG_STATE_HOME, "/custom/xdg");
    assert_eq!(resolve_state_dir(None), PathBuf::from("/custom/xdg/erpsync"));
}

#[test]
fn config_falls_back_to_state_dir_file() {
    let _lock = ENV_LOCK.lock().unwrap();
    let _guard = EnvGuard::remove(names::ERPSYNC_CONFIG);
    let temp = tempfile::TempDir::new().unwrap();

    assert_eq!(resolve_config_path(None, temp.path()), None);

    let file = temp.path().join("config.toml");
    std::fs::write(&file, "").unwrap();
    assert_eq!(resolve_config_path(None, temp.path()), Some(file));
}

#[test]
fn config_env_overrides_state_dir_file() {
    let _lock = ENV_LOCK.lock().unwrap();
    let _guard = EnvGuard::set(names::ERPSYNC_CONFIG, "/etc/erpsync.toml");
    let temp = tempfile::TempDir::new().unwrap();
    std::fs::write(temp.path().join("config.toml"), "").unwrap();

    assert_eq!(
        resolve_config_path(None, temp.path()),
        Some(PathBuf::from("/etc/erpsync.toml"))
    );
    assert_eq!(
        resolve_config_path(Some(PathBuf::from("/flag.toml")), temp.path()),
        Some(PathBuf::from("/flag.toml"))
    );
}

/// RAII guard that sets/removes an env var and restores it on drop.
struct EnvGuard {
    key: &'static str,
    original: Option<String>,
}

impl EnvGuard {
    fn set(key: &'static str, value: &str) -> Self {
        let original = std::env::var(key).ok();
        std::env::set_var(key, value);
        Self { key, original }
    }

    fn remove(key: &'static str) -> Self {
        let original = std::env::var(key).ok();
        std::env::remove_var(key);
        Self { key, original }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        match &self.original {
            Some(val) => std::env::set_var(self.key, val),
            None => std::env::remove_var(self.key),
        }
    }
}
