// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! erpsyncd - The erpsync maintenance daemon.
//!
//! Keeps a sync store healthy: reclaims stuck jobs, purges finished jobs,
//! expired cache entries and expired advisory locks on a fixed interval.
//! Sync modules run in the host application and share the same database.
//!
//! Usage:
//!   erpsyncd [--config <path>] [--state-dir <path>] [--once]

use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};

use erpsync_core::{system_clock, Config, Database, DbCache, Maintenance, QueueManager};

mod env;

/// Lock filename for single instance guarantee.
const LOCK_NAME: &str = "erpsyncd.lock";
/// PID filename within the state directory.
const PID_NAME: &str = "erpsyncd.pid";
/// Database filename used when the config does not name one.
const DB_NAME: &str = "sync.db";

#[derive(Debug, Parser)]
#[command(name = "erpsyncd", version, about = "erpsync maintenance daemon")]
struct Args {
    /// Config file (TOML). Defaults to $ERPSYNC_CONFIG or <state-dir>/config.toml.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for the lock, PID file and default database.
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Run one maintenance pass, print its report as JSON and exit.
    #[arg(long)]
    once: bool,
}

fn main() {
    let args = Args::parse();
    let state_dir = env::resolve_state_dir(args.state_dir);

    let config = match env::resolve_config_path(args.config, &state_dir) {
        Some(path) => match Config::load(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("erpsyncd: {}", e);
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    setup_logging(config.daemon.log_file.as_deref());

    if let Err(e) = fs::create_dir_all(&state_dir) {
        tracing::error!("failed to create state dir {}: {}", state_dir.display(), e);
        std::process::exit(1);
    }
    tracing::info!("erpsyncd starting, state_dir={}", state_dir.display());

    // Acquire file lock for single instance
    let lock_path = state_dir.join(LOCK_NAME);
    let lock_file = match acquire_lock(&lock_path) {
        Ok(f) => f,
        Err(e) => {
            tracing::error!("failed to acquire lock: {}", e);
            std::process::exit(1);
        }
    };

    let pid_path = state_dir.join(PID_NAME);
    if let Err(e) = write_pid_file(&pid_path) {
        tracing::error!("failed to write PID file: {}", e);
        std::process::exit(1);
    }

    let db_path = config
        .database
        .path
        .clone()
        .unwrap_or_else(|| state_dir.join(DB_NAME));
    let code = match run(&config, &db_path, args.once) {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!("{}", e);
            1
        }
    };

    let _ = fs::remove_file(&pid_path);
    drop(lock_file);
    tracing::info!("erpsyncd stopped");
    std::process::exit(code);
}

fn run(config: &Config, db_path: &Path, once: bool) -> erpsync_core::Result<()> {
    let db = Database::open(db_path)?;
    tracing::info!("using database {}", db_path.display());

    let clock = system_clock();
    let queue = QueueManager::new(&db, clock.clone())
        .with_retry_policy(config.retry_policy())
        .with_job_defaults(config.queue.default_priority, config.queue.max_attempts);
    let cache = DbCache::new(&db, clock);
    let maintenance = Maintenance::new(&queue, &cache)
        .with_stale_after(config.stale_after())
        .with_cleanup_after_days(config.queue.cleanup_after_days);

    loop {
        match maintenance.run_once() {
            Ok(report) => {
                if once {
                    println!("{}", serde_json::to_string(&report)?);
                    return Ok(());
                }
                tracing::info!(
                    "queue: {} pending, {} processing, {} failed",
                    report.stats.pending,
                    report.stats.processing,
                    report.stats.failed
                );
            }
            // A single bad pass should not take the daemon down
            Err(e) if !once => tracing::warn!("maintenance pass failed: {}", e),
            Err(e) => return Err(e),
        }
        std::thread::sleep(config.interval());
    }
}

fn setup_logging(log_path: Option<&Path>) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // Try to open log file, fall back to stderr
    let file = log_path.and_then(|path| {
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok()
    });
    if let Some(file) = file {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(file)
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn acquire_lock(lock_path: &Path) -> std::io::Result<fs::File> {
    use fs2::FileExt;

    let file = fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(lock_path)?;
    file.try_lock_exclusive()
        .map_err(|_| std::io::Error::other("another erpsyncd instance is already running"))?;
    Ok(file)
}

fn write_pid_file(pid_path: &Path) -> std::io::Result<()> {
    fs::write(pid_path, format!("{}", std::process::id()))
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
