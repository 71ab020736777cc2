//! Error types for the reconciliation pipeline.
//!
//! Every stage fails fast: nothing in the pipeline retries or recovers locally,
//! so each variant carries enough context (line, key, chunk) to diagnose the
//! failure from the top-level report alone.

use std::path::PathBuf;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Degenerate line count, chunk size or run configuration.
    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    /// A row of the source table could not be decoded.
    #[error("Failed to parse record at line {line}: {reason}")]
    RecordParse { line: u64, reason: String },

    /// Appending to or reading a key's accumulation store failed.
    #[error("Storage error for key '{key}': {source}")]
    Storage {
        key: String,
        #[source]
        source: std::io::Error,
    },

    /// The key store's directory could not be created.
    #[error("Failed to open key store at {}: {source}", path.display())]
    StoreOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A key reached the reconciler without any intervals.
    #[error("Failed to reconcile key '{key}': {reason}")]
    Reconciliation { key: String, reason: String },

    /// Reading the source table failed.
    #[error("{context}: {source}")]
    Source {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Job manifest or chunk result bookkeeping failed.
    #[error("{context}: {source}")]
    Manifest {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Writing the result artifact failed.
    #[error("Failed to write results to {}: {source}", path.display())]
    ResultSink {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// A chunk worker failed; wraps the underlying cause.
    #[error("Chunk {chunk_id} (lines {start_pos}..{end_pos}) failed: {source}")]
    ChunkFailed {
        chunk_id: u32,
        start_pos: u64,
        end_pos: u64,
        #[source]
        source: Box<Error>,
    },

    /// A spawned task panicked or the worker pool was already closed.
    #[error("Task failed: {context}")]
    TaskFailed { context: String },
}

impl Error {
    pub(crate) fn invalid_input(reason: impl Into<String>) -> Self {
        Error::InvalidInput {
            reason: reason.into(),
        }
    }

    pub(crate) fn storage(key: &str, source: std::io::Error) -> Self {
        Error::Storage {
            key: key.to_string(),
            source,
        }
    }

    pub(crate) fn read_failure(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Source {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn manifest(
        context: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Error::Manifest {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Strip the chunk wrapper, if any, and return the root pipeline error.
    pub fn root(&self) -> &Error {
        match self {
            Error::ChunkFailed { source, .. } => source.root(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_unwraps_chunk_failure() {
        let err = Error::ChunkFailed {
            chunk_id: 3,
            start_pos: 8,
            end_pos: 10,
            source: Box::new(Error::RecordParse {
                line: 9,
                reason: "bad date".to_string(),
            }),
        };

        assert!(matches!(err.root(), Error::RecordParse { line: 9, .. }));
        let message = err.to_string();
        assert!(message.contains("Chunk 3"));
        assert!(message.contains("lines 8..10"));
    }
}
