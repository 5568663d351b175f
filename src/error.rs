use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors raised while probing, writing config, or supervising processes.
///
/// Only `AlreadyRunning` and `ConfigParse` stop the process; everything else
/// is logged and the caller moves on.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("probe strategy {strategy} timed out after {timeout:?}")]
    ProbeTimeout {
        strategy: &'static str,
        timeout: Duration,
    },

    #[error("probe strategy {strategy} found nothing: {details}")]
    ProbeUnavailable {
        strategy: &'static str,
        details: String,
    },

    #[error("all probe strategies exhausted")]
    ProbeExhausted,

    #[error("invalid host address {value:?}")]
    InvalidAddress { value: String },

    #[error("cannot write {key} to {path}: {source}")]
    ConfigWrite {
        path: PathBuf,
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parent directory of {path} does not exist")]
    MissingParent { path: PathBuf },

    #[error("hook {hook} failed: {details}")]
    HookFailure { hook: &'static str, details: String },

    #[error("monitor already running with PID {pid} (pid file {path})")]
    AlreadyRunning { pid: i32, path: PathBuf },

    #[error("IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config {path}: {details}")]
    ConfigParse { path: PathBuf, details: String },
}

impl SyncError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::AlreadyRunning { .. } | Self::ConfigParse { .. })
    }

    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn unavailable(strategy: &'static str, details: impl Into<String>) -> Self {
        Self::ProbeUnavailable {
            strategy,
            details: details.into(),
        }
    }
}
