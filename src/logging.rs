//! File logging
//!
//! The engine shares stdout and stderr with its host, so events only ever go
//! to a file. Nothing is logged unless a log file is configured or
//! `VTSHIM_LOG` is set.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

const DEFAULT_LEVEL: &str = "info";

/// Where to log and with which filter directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogTarget {
    pub file: PathBuf,
    pub directive: String,
}

impl LogTarget {
    /// `env` is the value of `VTSHIM_LOG`, `temp` the temporary directory.
    pub fn resolve(config: &LogConfig, env: Option<String>, temp: Option<PathBuf>) -> Option<Self> {
        let file = match (&config.file, &env) {
            (Some(file), _) => file.clone(),
            (None, Some(_)) => temp.unwrap_or_default().join("vtshim.log"),
            (None, None) => return None,
        };
        let directive = env
            .filter(|d| !d.trim().is_empty())
            .or_else(|| config.level.clone())
            .unwrap_or_else(|| DEFAULT_LEVEL.to_string());
        Some(Self { file, directive })
    }
}

/// Install the file subscriber. A host that already has one keeps it.
pub fn init(config: &LogConfig) {
    let target = LogTarget::resolve(
        config,
        std::env::var("VTSHIM_LOG").ok(),
        Some(std::env::temp_dir()),
    );
    let Some(target) = target else {
        return;
    };

    // Open log file (append mode)
    let Ok(file) = OpenOptions::new().create(true).append(true).open(&target.file) else {
        return;
    };
    let filter = EnvFilter::try_new(&target.directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_thread_ids(true)
        .try_init();
}
