use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification of an [`EngineError`], used by front ends to decide
/// how an abort is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Io,
    Connection,
    Mutation,
    Busy,
    Internal,
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{field}: {message}")]
    Validation { field: String, message: String },

    #[error("database path is not configured")]
    NotConfigured,

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot open database {}: {source}", path.display())]
    Connection {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("database is not connected")]
    NotConnected,

    #[error("{context}: {source}")]
    Database {
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("{operation} failed on {row} after {processed}/{total} rows: {source}")]
    RowFailed {
        operation: String,
        row: String,
        processed: usize,
        total: usize,
        #[source]
        source: Box<EngineError>,
    },

    #[error("{operation}: nothing to process")]
    NothingToProcess { operation: String },

    #[error("transcoding {} failed: {message}", input.display())]
    Transcode { input: PathBuf, message: String },

    #[error("another operation is already running")]
    Busy,

    #[error("worker task failed: {0}")]
    Worker(String),
}

impl EngineError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        EngineError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn database(context: impl Into<String>, source: rusqlite::Error) -> Self {
        EngineError::Database {
            context: context.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation { .. }
            | EngineError::NotConfigured
            | EngineError::NothingToProcess { .. } => ErrorKind::Configuration,
            EngineError::Io { .. } => ErrorKind::Io,
            EngineError::Connection { .. } | EngineError::NotConnected => ErrorKind::Connection,
            EngineError::Database { .. }
            | EngineError::RowFailed { .. }
            | EngineError::Transcode { .. } => ErrorKind::Mutation,
            EngineError::Busy => ErrorKind::Busy,
            EngineError::Worker(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
