//! Error taxonomy.
//!
//! Missing session data is not an error: aggregation returns `Ok(None)`.
//! Everything else is surfaced to the caller. Preview faults terminate the
//! loop, aggregation/upload faults are reported per track.

use std::path::PathBuf;

use thiserror::Error;

/// An output queue lost its producer (device disconnected or pipeline stopped).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("output queue '{queue}' disconnected")]
pub struct StreamFault {
    pub queue: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LabelError {
    #[error("label index {index} has no label (model defines {count})")]
    Unknown { index: u32, count: usize },
}

#[derive(Error, Debug)]
pub enum ModelConfigError {
    #[error("failed to read model config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid model config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("model config declares {classes} classes but maps {labels} labels")]
    LabelCount { classes: usize, labels: usize },
    #[error("model config has no labels")]
    NoLabels,
}

#[derive(Error, Debug)]
pub enum DisplayError {
    #[error("failed to encode frame: {0}")]
    Image(#[from] image::ImageError),
    #[error("failed to write frame: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum PreviewError {
    #[error(transparent)]
    Stream(#[from] StreamFault),
    #[error(transparent)]
    Label(#[from] LabelError),
    #[error(transparent)]
    Display(#[from] DisplayError),
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed metadata table: {0}")]
    Csv(#[from] csv::Error),
    #[error("metadata table is missing column '{0}'")]
    MissingColumn(&'static str),
    #[error("track {track_id}: malformed timestamp '{value}': {reason}")]
    Parse {
        track_id: u64,
        value: String,
        reason: String,
    },
}

/// The last failure seen by the uploader before it gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailedAttempt {
    Status { status: u16, body: String },
    Transport(String),
}

impl std::fmt::Display for FailedAttempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailedAttempt::Status { status, body } => write!(f, "HTTP {}: {}", status, body),
            FailedAttempt::Transport(msg) => write!(f, "transport error: {}", msg),
        }
    }
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("invalid upload endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
    #[error("failed to read upload file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("upload rejected with HTTP {status}: {body}")]
    Permanent { status: u16, body: String },
    #[error("upload failed after {attempts} attempts, last {last}")]
    Exhausted { attempts: u32, last: FailedAttempt },
    #[error("upload transport error: {0}")]
    Transport(String),
}

/// Failure of the session-end hook for a single track.
#[derive(Error, Debug)]
pub enum SendError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Upload(#[from] UploadError),
}
