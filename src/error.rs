//! Error types for the mixing engine.
//!
//! Every failure inside the engine is reported through [`MixError`]. None of
//! them are fatal: a failed mix leaves the previous result untouched and the
//! caller may simply try again.

use thiserror::Error;

/// Errors produced by the mixing engine.
#[derive(Error, Debug)]
pub enum MixError {
    /// Rejected input: empty buffer, bad sample rate, bad envelope, etc.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Sample-rate conversion failed or was asked for an impossible rate.
    #[error("Resampling error: {0}")]
    Resampling(String),

    /// The buffer could not be serialized to PCM.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// A mix was requested while another one is still running.
    #[error("A mix is already in progress")]
    Busy,

    /// Export was requested before any mix succeeded.
    #[error("No mix result available")]
    NoMixResult,

    /// An input audio file could not be decoded.
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    Playback(String),

    /// Envelope settings could not be loaded or saved.
    #[error("Settings error: {0}")]
    Settings(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type using [`MixError`].
pub type Result<T> = std::result::Result<T, MixError>;

impl From<hound::Error> for MixError {
    fn from(e: hound::Error) -> Self {
        match e {
            hound::Error::IoError(io) => MixError::Io(io),
            other => MixError::Decode(other.to_string()),
        }
    }
}
