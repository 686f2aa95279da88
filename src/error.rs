use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LookoutError {
    #[error("log file unavailable: {path}")]
    FileUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse failure in {path}: {detail}")]
    Parse { path: PathBuf, detail: String },

    #[error("filesystem watcher failed: {0}")]
    WatcherFailed(String),

    #[error("process enumeration failed: {0}")]
    ProcessEnumerationFailed(String),

    #[error("snapshot unavailable: cannot stat {root}")]
    SnapshotUnavailable {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("client protocol error: {0}")]
    ClientProtocol(String),

    #[error("client outbox overflow")]
    Overloaded,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LookoutError {
    /// Short kind string carried in HTTP 500 bodies and counted by PerfMonitor.
    pub fn kind(&self) -> &'static str {
        match self {
            LookoutError::FileUnavailable { .. } => "FileUnavailable",
            LookoutError::Parse { .. } => "ParseError",
            LookoutError::WatcherFailed(_) => "WatcherFailed",
            LookoutError::ProcessEnumerationFailed(_) => "ProcessEnumerationFailed",
            LookoutError::SnapshotUnavailable { .. } => "SnapshotUnavailable",
            LookoutError::ClientProtocol(_) => "ClientProtocolError",
            LookoutError::Overloaded => "Overloaded",
            LookoutError::Config(_) => "ConfigError",
            LookoutError::Io(_) => "IoError",
            LookoutError::Serialization(_) => "SerializationError",
        }
    }
}

pub type Result<T> = std::result::Result<T, LookoutError>;
