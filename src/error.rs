use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Unified error type for the spool.
///
/// A reader that simply has nothing to return yet is not an error: that is
/// `Ok(None)` from `read()`. Everything here is fatal to the call that hit it.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error from disk operations (open, permission, disk full).
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A segment holds bytes that are not a valid frame.
    #[error("corruption in {} at offset {offset}: {reason}", .path.display())]
    Corruption {
        path: PathBuf,
        offset: u64,
        reason: String,
    },

    /// The per-append lock stayed held by someone else for too long.
    #[error("timed out after {waited:?} waiting for lock on {}", .path.display())]
    LockTimeout { path: PathBuf, waited: Duration },

    /// The handle was used in a way its mode or configuration does not allow.
    #[error("usage error: {0}")]
    Usage(String),

    /// Options or a limits file could not be parsed.
    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn corruption(path: impl Into<PathBuf>, offset: u64, reason: impl Into<String>) -> Self {
        Error::Corruption {
            path: path.into(),
            offset,
            reason: reason.into(),
        }
    }

    /// True for `Corruption`; callers use this to decide whether to `skip_segment()`.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption { .. })
    }
}

/// Result type alias used throughout the spool.
pub type Result<T> = std::result::Result<T, Error>;
