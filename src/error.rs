use std::path::PathBuf;
use thiserror::Error;

use crate::results::ResultId;

/// Errors surfaced by [`crate::results::ResultStore`] operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("result title must not be empty")]
    EmptyTitle,

    #[error("unreadable title file in result directory {dir}: {source}")]
    UnreadableTitle {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no result with id {0}")]
    UnknownResult(ResultId),

    #[error("result {0} has no telemetry yet")]
    TelemetryNotReady(ResultId),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failures inside an upload task. Never returned to the caller of
/// [`crate::upload::UploadPipeline::upload`]; recorded as `Failed` status.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server answered with HTTP {0}")]
    Status(u16),

    #[error("failed to read media file {path}: {source}")]
    Media {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to persist telemetry to {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("upload aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("telemetry holds {0} bytes, need at least one 32-byte frame")]
    TooShort(usize),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
