use thiserror::Error;

use crate::status;

/// Top-level error type for the deepsight client.
#[derive(Debug, Error)]
pub enum VisionError {
    #[error("runtime already initialized")]
    AlreadyInitialized,

    #[error("runtime not initialized")]
    NotInitialized,

    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error("runtime error {status}: {message}")]
    Vendor { status: u32, message: String },

    #[error("{failed} of {total} workers failed; first: {first}")]
    PartialFailure {
        failed: usize,
        total: usize,
        first: String,
    },

    #[error("malformed response payload: {0}")]
    MalformedResponse(String),

    #[error("training interface not available for this session")]
    TrainingUnavailable,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VisionError {
    /// Map a raw runtime status code plus its resolved message onto the
    /// error taxonomy. Unrecognized codes stay opaque as `Vendor`.
    pub fn from_status(code: u32, message: String) -> Self {
        match code {
            status::ALREADY_INITIALIZED => VisionError::AlreadyInitialized,
            status::NOT_INITIALIZED => VisionError::NotInitialized,
            status::RESOURCE_NOT_FOUND => VisionError::ResourceNotFound(message),
            status::INVALID_STATE => VisionError::InvalidState(message),
            _ => VisionError::Vendor {
                status: code,
                message,
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, VisionError>;
