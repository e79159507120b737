use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),

    #[error("Peer not connected")]
    PeerNotConnected,

    #[error("Peer destroyed")]
    PeerDestroyed,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    #[error("Desktop error: {0}")]
    DesktopError(String),

    #[error("Capture error: {0}")]
    CaptureError(String),
}

/// Result type alias used across the crate
pub type Result<T> = std::result::Result<T, AppError>;
