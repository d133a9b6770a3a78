//! Error types for Atelier studio

use thiserror::Error;

/// Result type alias for Atelier operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Atelier studio
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio processing error (encoding, decoding, scheduling)
    #[error("audio error: {0}")]
    Audio(String),

    /// Audio hardware error (microphone access, device contexts)
    #[error("device error: {0}")]
    Device(String),

    /// Realtime transport error (connect, send, close)
    #[error("transport error: {0}")]
    Transport(String),

    /// Realtime protocol error (unexpected or malformed frames)
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Image generation or editing error
    #[error("creative action error: {0}")]
    Creative(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Base64 decoding error
    #[error("base64 error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// WebSocket error
    #[error("websocket error: {0}")]
    WebSocket(String),
}
