//! Error type shared by every obikmer component

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors raised while building, reading or combining k-mer set groups
#[derive(Error, Debug)]
pub enum KmerError {
    /// A file has a bad magic number, a truncated header or a corrupt body
    #[error("malformed file {path}: {reason}")]
    MalformedFile {
        /// Offending file
        path: PathBuf,
        /// What was wrong with it
        reason: String,
    },

    /// Two groups (or a group and an append request) disagree on their parameters
    #[error("incompatible groups: {0}")]
    IncompatibleGroup(String),

    /// Construction parameters are out of range
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// A filesystem operation failed
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File or directory being accessed
        path: PathBuf,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// None of the `--set` patterns selected a set
    #[error("no set matches pattern(s): {0}")]
    PatternMatchesNothing(String),

    /// `metadata.toml` could not be parsed or serialized
    #[error("metadata error in {path}: {reason}")]
    Metadata {
        /// Metadata file
        path: PathBuf,
        /// Parser or serializer message
        reason: String,
    },

    /// Another builder owns the group directory (or a stale build was left behind)
    #[error("group {0} is locked by another builder (remove its .build directory if stale)")]
    GroupLocked(PathBuf),

    /// The build was cancelled between shards
    #[error("build cancelled")]
    Cancelled,
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, KmerError>;

impl KmerError {
    /// Wrap an I/O error with the path it happened on
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        KmerError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Build a `MalformedFile` error
    pub fn malformed(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        KmerError::MalformedFile {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }
}

/// Attach a path to `std::io::Result` values
pub(crate) trait IoContext<T> {
    fn at(self, path: impl AsRef<Path>) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    #[inline]
    fn at(self, path: impl AsRef<Path>) -> Result<T> {
        self.map_err(|e| KmerError::io(path, e))
    }
}
