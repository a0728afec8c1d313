//! Error types for the ingest library
//!
//! Each concern gets its own enum so callers can tell a broker failure from a
//! failed download without string matching. [`IngestError`] is the outcome
//! carried by a failed task.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while establishing or consuming the broker stream
#[derive(Error, Debug)]
pub enum ReceiverError {
    #[error("invalid broker URL '{url}': {reason}")]
    InvalidBrokerUrl { url: String, reason: String },

    #[error("unsupported broker URL scheme '{0}' (expected tcp or ssl)")]
    UnsupportedScheme(String),

    #[error("broker transport error: {0}")]
    Transport(String),

    #[error("subscription refused for topics: {}", .failed.join(", "))]
    Subscription { failed: Vec<String> },

    #[error("failed to decode message on topic '{topic}': {source}")]
    Decode {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("credential lookup failed: {0}")]
    Credentials(#[from] CredentialError),
}

impl ReceiverError {
    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create an invalid broker URL error
    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidBrokerUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised while resolving credentials
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed netrc file {path}: {reason}")]
    Netrc { path: PathBuf, reason: String },
}

/// Errors raised by a fetcher
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("no fetcher for URL scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("URL '{0}' has no host")]
    MissingHost(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} fetching {url}")]
    Status { url: String, status: u16 },

    #[error("FTP transfer failed: {0}")]
    Ftp(String),

    #[error("write to sink failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("fetch timed out after {0:?}")]
    TimedOut(Duration),

    #[error(transparent)]
    Credentials(#[from] CredentialError),
}

/// Errors raised by the repository
#[derive(Error, Debug)]
pub enum RepoError {
    #[error("invalid repository key: {0}")]
    InvalidKey(String),

    #[error("repository root {0} is not a directory")]
    NotADirectory(PathBuf),

    #[error("repository I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RepoError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors raised by the post-processing executor
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("no arguments supplied for command '{0}'")]
    NoArgs(String),

    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting on '{program}': {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' exited with {status}")]
    Exit { program: String, status: String },

    #[error("'{program}' timed out after {timeout:?}")]
    TimedOut { program: String, timeout: Duration },
}

/// Why a single ingest task failed
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error("storage failed: {0}")]
    Storage(#[from] RepoError),

    #[error("temporary file error: {0}")]
    TempFile(#[source] std::io::Error),
}

impl IngestError {
    /// Short name of the failure class, used as a log field
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::Fetch(_) => "fetch",
            IngestError::Integrity(_) => "integrity",
            IngestError::Storage(_) => "storage",
            IngestError::TempFile(_) => "tempfile",
        }
    }
}
