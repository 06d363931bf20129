//! Store-specific error types.
//!
//! Raised when the external tool cannot be spawned or exits unsuccessfully.
//! Callers decide severity: creation failures abort startup, update and render
//! failures are logged and dropped.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while invoking the store tool.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The tool binary could not be started.
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The tool ran but reported failure.
    #[error("{command} '{}' failed ({}): {stderr}", .path.display(), status_label(.status))]
    Exit {
        command: &'static str,
        path: PathBuf,
        status: Option<i32>,
        stderr: String,
    },

    /// Filesystem error around the store files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn status_label(status: &Option<i32>) -> String {
    match *status {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}
