//! Error types for notula.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NotulaError {
    // Configuration errors
    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Audio capture errors
    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    #[error("Audio capture failed: {message}")]
    AudioCapture { message: String },

    // Segment encoding errors
    #[error("WAV encoding failed: {message}")]
    WavEncode { message: String },

    // Transcription errors
    #[error("Transcription model not found at {path}")]
    TranscriptionModelNotFound { path: String },

    #[error("Transcription backend unavailable: {backend}")]
    BackendUnavailable { backend: String },

    #[error("Transcription failed: {message}")]
    Transcription { message: String },

    // Queue errors
    #[error("Segment queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, NotulaError>;
