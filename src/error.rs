//! Rendering core error types.

use std::fmt;

/// Errors that can occur in the rendering core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// Failed to initialize the rendering backend.
    InitializationFailed(String),
    /// Failed to create a resource.
    ResourceCreationFailed(String),
    /// Host-side memory allocation failed.
    HostAllocationFailed(String),
    /// An invalid parameter was provided.
    InvalidParameter(String),
    /// A referenced window or backend object no longer exists.
    BackendUnavailable(String),
    /// An internal error occurred.
    Internal(String),
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InitializationFailed(msg) => write!(f, "initialization failed: {msg}"),
            Self::ResourceCreationFailed(msg) => write!(f, "resource creation failed: {msg}"),
            Self::HostAllocationFailed(msg) => write!(f, "host allocation failed: {msg}"),
            Self::InvalidParameter(msg) => write!(f, "invalid parameter: {msg}"),
            Self::BackendUnavailable(msg) => write!(f, "backend unavailable: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for RenderError {}
