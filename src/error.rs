//! Error types
//!
//! Every adapter reuses these values instead of defining its own, so callers
//! can tell a missing namespace from a missing service (or an exhausted
//! iterator from a broken one) without matching on strings.

/// Errors returned by the registry, its iterators and its adapters
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("resource not found")]
    NotFound,

    #[error("namespace not found")]
    NamespaceNotFound,

    #[error("service not found")]
    ServiceNotFound,

    /// Normal end of a listing, not a failure
    #[error("no more items in iterator")]
    IteratorDone,

    #[error("empty namespace name provided")]
    EmptyNamespaceName,

    #[error("empty service name provided")]
    EmptyServiceName,

    #[error("empty endpoint name provided")]
    EmptyEndpointName,

    /// Names are single path segments
    #[error("invalid name {0:?}: names cannot contain '/'")]
    InvalidName(String),

    #[error("no client provided")]
    NoClientProvided,

    #[error("invalid object to filter")]
    InvalidObjectToFilter,

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("resource already exists")]
    AlreadyExists,

    #[error("invalid record at {key}: {reason}")]
    InvalidRecord { key: String, reason: String },

    #[error("operation failed: {0}")]
    OperationFailed(String),

    #[error("operation status query timed out")]
    StatusQueryTimeout,

    #[error("context canceled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// Failure reported by the underlying vendor client, forwarded as-is
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

/// Result type alias for registry operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for `NotFound`, `NamespaceNotFound` and `ServiceNotFound`
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::NotFound | Error::NamespaceNotFound | Error::ServiceNotFound
        )
    }

    pub fn is_iterator_done(&self) -> bool {
        matches!(self, Error::IteratorDone)
    }

    /// Caller mistakes: returned immediately and never retried
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Error::EmptyNamespaceName
                | Error::EmptyServiceName
                | Error::EmptyEndpointName
                | Error::InvalidName(_)
                | Error::NoClientProvided
                | Error::InvalidObjectToFilter
                | Error::InvalidFilter(_)
        )
    }

    /// True when the context ended the operation
    pub fn is_context_done(&self) -> bool {
        matches!(self, Error::Cancelled | Error::DeadlineExceeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_family() {
        assert!(Error::NotFound.is_not_found());
        assert!(Error::NamespaceNotFound.is_not_found());
        assert!(Error::ServiceNotFound.is_not_found());
        assert!(!Error::IteratorDone.is_not_found());
        assert!(!Error::AlreadyExists.is_not_found());
    }

    #[test]
    fn test_transport_keeps_message() {
        let err: Error = anyhow::anyhow!("API request failed: 503").into();
        assert_eq!(err.to_string(), "API request failed: 503");
        assert!(!err.is_precondition());
    }

    #[test]
    fn test_precondition_family() {
        assert!(Error::EmptyNamespaceName.is_precondition());
        assert!(Error::InvalidFilter("x".into()).is_precondition());
        assert!(Error::InvalidName("hr/id".into()).is_precondition());
        assert!(!Error::Cancelled.is_precondition());
        assert!(Error::Cancelled.is_context_done());
    }
}
