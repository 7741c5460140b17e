//! Error types for ringtrack.

use thiserror::Error;

/// Errors raised by configuration loading and tracking.
#[derive(Error, Debug)]
pub enum TrackError {
    /// Inconsistent or invalid configuration, detected before the run starts
    #[error("Configuration error: {0}")]
    Config(String),

    /// Every macro-particle of a bunch has been lost
    #[error("Bunch {bunch} has no surviving macro-particles")]
    NoSurvivors { bunch: usize },

    /// A calculation mode that is recognised but not available
    #[error("Unsupported mode: {0}")]
    Unsupported(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Template rendering failed while writing output tables
    #[error("Render error: {0}")]
    Render(#[from] minijinja::Error),
}

impl TrackError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        TrackError::Config(message.into())
    }
}

pub type Result<T> = std::result::Result<T, TrackError>;
