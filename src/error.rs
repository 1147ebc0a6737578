//! Error types for scan processing operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for scan processing operations.
pub type ScanResult<T> = Result<T, ScanError>;

/// Errors that can occur during scan processing.
///
/// The kernels themselves never fail: empty or underdetermined inputs
/// produce sentinel results (empty containers, identity transforms).
/// Only the file writers can error.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Error writing to a file.
    #[error("failed to write {path}: {source}")]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
