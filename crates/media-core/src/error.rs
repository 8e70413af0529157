//! Error types for media source operations
//!
//! Every failure leaves the core through the failure path of the Operation
//! that caused it. Errors raised by the resource are carried verbatim; the
//! proxies only synthesize `InvalidState` (foreign mutation), `Aborted`
//! (cancellation) and `Abandoned` (proxy dropped).

use thiserror::Error;

/// Main error type for media source operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MediaSourceError {
    /// The resource does not support the requested content type
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// The caller passed an invalid argument (bad range, bad append window)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The resource is in a state incompatible with the call
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The resource has no room for more data
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Any other failure reported by the resource (e.g. a decode error)
    #[error("Resource error: {0}")]
    Resource(String),

    /// The operation was cancelled by `abort()`
    #[error("Operation aborted")]
    Aborted,

    /// The proxy was dropped before the operation settled
    #[error("Operation abandoned: proxy dropped")]
    Abandoned,
}

impl MediaSourceError {
    /// Create a not-supported error
    pub fn not_supported(msg: impl Into<String>) -> Self {
        Self::NotSupported(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create an invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Create a quota exceeded error
    pub fn quota_exceeded(msg: impl Into<String>) -> Self {
        Self::QuotaExceeded(msg.into())
    }

    /// Create a generic resource error
    pub fn resource(msg: impl Into<String>) -> Self {
        Self::Resource(msg.into())
    }

    /// True if the caller cancelled the operation, as opposed to a genuine failure
    pub fn is_cancellation(&self) -> bool {
        matches!(self, MediaSourceError::Aborted)
    }

    /// True if the resource rejected the call for lack of space
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, MediaSourceError::QuotaExceeded(_))
    }

    /// True if the failure was caused by bad caller input
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            MediaSourceError::NotSupported(_) | MediaSourceError::InvalidArgument(_)
        )
    }
}

/// Result type for media source operations
pub type Result<T> = std::result::Result<T, MediaSourceError>;

impl From<tokio::sync::oneshot::error::RecvError> for MediaSourceError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        Self::Abandoned
    }
}
