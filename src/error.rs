//! Fatal error kinds for the extract/restore engine.
//!
//! Only unrecoverable conditions surface here. A block identifier or style
//! hash that cannot be resolved during reconstruction is *not* an error:
//! it is logged on the diagnostic channel and the marker remnant stays
//! visible in the output. Likewise the protection folder's iteration cap
//! logs and stops folding. Regex patterns are compiled from static strings
//! and a compilation failure is a programmer error that panics at first
//! use.

use std::path::PathBuf;

/// Errors that abort processing of a document.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed XML, or input containing reserved sentinel code points.
    #[error("could not parse XML: {0}")]
    Parse(String),

    /// State store access failure.
    #[error("state store failure: {0}")]
    State(#[from] rusqlite::Error),

    /// Bad stream framing or a missing staging path.
    #[error("stream error: {0}")]
    Stream(String),

    /// The staging directory is missing expected artifacts.
    #[error("staging directory {0:?} is missing expected state files")]
    Staging(PathBuf),

    /// I/O failure on a staging artifact or the stream.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
