//! Centralized error types for mboximport.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the mboximport library.
#[derive(Error, Debug)]
pub enum ImportError {
    /// I/O error with the associated file path.
    #[error("I/O error reading '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Catalog discovery failed. Fatal: without a complete catalog the
    /// global message indexing (and therefore resumption) is undefined.
    #[error("Cannot enumerate '{path}': {reason}")]
    Catalog { path: PathBuf, reason: String },

    /// The import root does not exist or is not a directory.
    #[error("Import root is not a directory: {0}")]
    InvalidRoot(PathBuf),

    /// The service-account credentials could not be loaded or were rejected.
    #[error("Credentials error: {0}")]
    Credentials(String),

    /// Every account in the catalog failed authorization.
    #[error("Authorization failed for all {count} account(s); nothing to do")]
    AllAccountsFailed { count: usize },
}

/// Convenience alias for `Result<T, ImportError>`.
pub type Result<T> = std::result::Result<T, ImportError>;

impl ImportError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Allow `?` on `std::io::Error` inside functions returning `ImportError`
/// when no path context is available (rare — prefer `ImportError::io`).
impl From<std::io::Error> for ImportError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<unknown>"),
            source,
        }
    }
}
