//! Error taxonomy shared across funnelpot.
//!
//! Configuration-time errors (port validation, preconditions, artifact I/O)
//! are fatal to the run; listener-time errors stay local to the connection
//! that caused them.

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by funnelpot components.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or out-of-range port input. Fatal to the run.
    #[error("invalid port input: {0}")]
    Validation(String),

    /// A required external condition does not hold (port 80 busy, proxy
    /// runtime missing, public address undiscoverable). Fatal to the run.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Failed to read or write a file.
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        /// The file involved.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Malformed request data or a stalled read. Connection-local; the
    /// listener drops the connection and keeps serving.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Request body bytes are not valid UTF-8 under a declared length.
    #[error("body is not valid utf-8")]
    Encoding,
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io { path: path.into(), source }
    }
}

/// Result type for funnelpot operations.
pub type Result<T> = std::result::Result<T, Error>;
