//! Error types for the DIAS overlay

use thiserror::Error;

use crate::PeerId;

/// Core DIAS errors
#[derive(Error, Debug)]
pub enum DiasError {
    // Wire errors
    #[error("Decode failed: {0}")]
    Decode(String),

    #[error("Encode failed: {0}")]
    Encode(String),

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("Invalid peer id: {0}")]
    InvalidPeerId(String),

    // Crypto errors
    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Invalid signature")]
    InvalidSignature,

    // Transport errors
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Dial to {peer} failed: {reason}")]
    DialFailed { peer: PeerId, reason: String },

    #[error("No protocol handler for {0}")]
    NoHandler(String),

    #[error("Underlying stream has been closed")]
    StreamClosed,

    // Store errors
    #[error("Store error: {0}")]
    Store(String),

    #[error("Unknown shared object: {0}")]
    UnknownShared(String),

    #[error("Operation not supported by {kind}: {op}")]
    UnsupportedOperation { kind: String, op: String },

    // Lifecycle errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid state transition: {0}")]
    InvalidState(String),
}

impl DiasError {
    /// Errors raised by a transport that is already going away. They are
    /// expected during shutdown and churn and should not be reported.
    pub fn is_benign(&self) -> bool {
        matches!(self, DiasError::StreamClosed)
    }
}

/// Result type for DIAS operations
pub type DiasResult<T> = Result<T, DiasError>;
