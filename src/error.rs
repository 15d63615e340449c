//! Error types for bamtail

use std::fmt;

use thiserror::Error;

/// Result type alias for bamtail operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while reading indexes, decoding BGZF/BAM data or merging containers.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from the underlying source or destination
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Magic, signature or size mismatch in a binary structure
    #[error("Invalid {context}: {msg}")]
    Format {
        /// Structure being decoded
        context: &'static str,
        /// What was wrong with it
        msg: String,
    },

    /// Ran out of bytes while decoding a structure
    #[error("Truncated {context}: needed {needed} bytes at offset {offset}, {available} available")]
    Truncated {
        /// Structure being decoded
        context: &'static str,
        /// Offset where the read was attempted
        offset: u64,
        /// Bytes required
        needed: usize,
        /// Bytes actually available from `offset`
        available: usize,
    },

    /// Index holds no chunk, so no safe seek point exists
    #[error("Index references no virtual offsets; cannot determine a safe seek point")]
    IndexEmpty,

    /// External merge step failed or produced unusable output
    #[error("Merge failed: {0}")]
    Merge(String),
}

impl Error {
    pub(crate) fn format(context: &'static str, msg: impl Into<String>) -> Self {
        Error::Format {
            context,
            msg: msg.into(),
        }
    }

    pub(crate) fn truncated(
        context: &'static str,
        buf: &[u8],
        offset: usize,
        needed: usize,
    ) -> Self {
        Error::Truncated {
            context,
            offset: offset as u64,
            needed,
            available: buf.len().saturating_sub(offset),
        }
    }
}

/// Extraction stage, used to report where a pipeline run failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Reading the companion index
    Index,
    /// Reading the container header from the start of the file
    Header,
    /// Reading records after the seek point
    TailRead,
    /// Writing or verifying the reconstructed container
    Write,
    /// Merging with the region container
    Merge,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Index => "index",
            Stage::Header => "header",
            Stage::TailRead => "tail-read",
            Stage::Write => "write",
            Stage::Merge => "merge",
        };
        f.write_str(name)
    }
}

/// An [`Error`] tagged with the stage it occurred in.
#[derive(Debug, Error)]
#[error("{stage} stage failed: {source}")]
pub struct StageError {
    /// Stage that failed
    pub stage: Stage,
    /// Underlying error
    #[source]
    pub source: Error,
}

impl StageError {
    /// Tag an error with a stage.
    pub fn new(stage: Stage, source: Error) -> Self {
        Self { stage, source }
    }
}

/// Attach a [`Stage`] to the error of a [`Result`].
pub(crate) trait AtStage<T> {
    fn at(self, stage: Stage) -> std::result::Result<T, StageError>;
}

impl<T> AtStage<T> for Result<T> {
    fn at(self, stage: Stage) -> std::result::Result<T, StageError> {
        self.map_err(|e| StageError::new(stage, e))
    }
}
