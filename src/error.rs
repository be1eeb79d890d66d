//! Error types
//!
//! Data, checkpoint and configuration problems surface as [`CaptionError`] and
//! propagate to the binary. Shape mismatches inside tensor kernels are bugs and
//! panic instead.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading data, training or decoding
#[derive(Error, Debug)]
pub enum CaptionError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to read features from {path}: {message}")]
    Npy { path: PathBuf, message: String },

    #[error("Missing feature file for video {video_id}: {path}")]
    MissingFeatures { video_id: String, path: PathBuf },

    #[error("Video {video_id} has no frames: {path}")]
    EmptyFeatures { video_id: String, path: PathBuf },

    #[error("Feature dimension mismatch for video {video_id}: expected {expected}, got {actual}")]
    FeatureDimension {
        video_id: String,
        expected: usize,
        actual: usize,
    },

    #[error("Ragged batch: video {video_id} has {actual} frames, batch has {expected}")]
    RaggedBatch {
        video_id: String,
        expected: usize,
        actual: usize,
    },

    #[error("Video {0} has no captions")]
    EmptyRecord(String),

    #[error("Invalid checkpoint {path}: {message}")]
    InvalidCheckpoint { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CaptionError {
    /// Wrap an I/O error with the path it happened on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CaptionError::Io {
            path: path.into(),
            source,
        }
    }

    /// Wrap a JSON error with the file it came from
    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        CaptionError::Json {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn checkpoint(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        CaptionError::InvalidCheckpoint {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, CaptionError>;
