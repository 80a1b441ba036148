use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::timer::Phase;

pub type Result<T> = std::result::Result<T, BenchError>;

/// Everything that can go wrong while benchmarking a single image.
///
/// Only the current repetition is aborted by any of these; the batch loop
/// always moves on to the next image.
#[derive(Debug, Error)]
pub enum BenchError {
    /// The engine process could not be launched at all.
    #[error("failed to launch `{command}`: {reason}")]
    Invocation { command: String, reason: String },

    #[error("{phase} phase failed: `{command}` exited with {status}: {stderr}")]
    NonZeroExit {
        phase: Phase,
        command: String,
        status: String,
        stderr: String,
    },

    #[error("teardown step `{command}` failed: {reason}")]
    Teardown { command: String, reason: String },

    #[error("image {0} is not in the catalog")]
    Configuration(String),

    /// The output stream closed before the readiness line showed up.
    #[error("container output ended before `{needle}` was seen")]
    EndedBeforeReady { needle: String },

    #[error("container {container} exited before it became ready")]
    ExitedBeforeReady { container: String },

    #[error("readiness not observed within {0:?}")]
    TimedOut(Duration),

    #[error("readiness wait was cancelled")]
    Cancelled,

    #[error("illegal readiness transition {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    #[error("catalog: {0}")]
    Catalog(#[from] serde_yaml::Error),

    #[error("csv: {0}")]
    Csv(#[from] csv::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}
