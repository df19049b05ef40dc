//! Error types for vix-db.
//!
//! Each provider operation reports one of three typed errors. None of them ever
//! carries secret material; messages reference endpoints and collection names
//! only.

use thiserror::Error;

// ============================================================================
// ConnectError
// ============================================================================

/// Errors raised while establishing a provider session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectError {
    /// The backend rejected the supplied credential (or none was supplied).
    #[error("Authentication failed: {message}")]
    Auth { message: String },

    /// The backend could not be reached.
    #[error("Network unreachable: {message}")]
    Network { message: String },

    /// The backend did not answer within the connect timeout.
    #[error("Connection timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    /// The endpoint configuration is incomplete or invalid.
    #[error("Malformed endpoint: {message}")]
    MalformedEndpoint { message: String },

    /// The provider is not compiled in or cannot run on this host.
    #[error("Provider '{provider}' is unavailable: {reason}")]
    Unavailable { provider: String, reason: String },
}

impl ConnectError {
    /// Create an authentication error.
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a malformed endpoint error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedEndpoint {
            message: message.into(),
        }
    }

    /// Create an unavailable-provider error.
    pub fn unavailable(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    /// Stable category name shown to users next to the message.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth",
            Self::Network { .. } => "network",
            Self::Timeout { .. } => "timeout",
            Self::MalformedEndpoint { .. } => "endpoint",
            Self::Unavailable { .. } => "unavailable",
        }
    }
}

// ============================================================================
// QueryError
// ============================================================================

/// Errors raised by read-side session operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    /// The named collection does not exist.
    #[error("Collection '{name}' not found")]
    CollectionNotFound { name: String },

    /// The session lost its backend connection.
    #[error("Connection lost: {message}")]
    ConnectionLost { message: String },

    /// The backend reported a failure.
    #[error("Backend query failed: {message}")]
    Backend { message: String },

    /// The provider does not implement this operation.
    #[error("Operation '{operation}' is not supported by this provider")]
    Unsupported { operation: &'static str },
}

impl QueryError {
    /// Create a collection-not-found error.
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::CollectionNotFound { name: name.into() }
    }

    /// Create a connection-lost error.
    pub fn connection_lost(message: impl Into<String>) -> Self {
        Self::ConnectionLost {
            message: message.into(),
        }
    }

    /// Create a backend error.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Whether this error means the session itself is no longer usable.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::ConnectionLost { .. })
    }

    /// Stable category name.
    pub fn category(&self) -> &'static str {
        match self {
            Self::CollectionNotFound { .. } => "not-found",
            Self::ConnectionLost { .. } => "connection-lost",
            Self::Backend { .. } => "backend",
            Self::Unsupported { .. } => "unsupported",
        }
    }
}

// ============================================================================
// WriteError
// ============================================================================

/// Fatal errors raised by write-side session operations.
///
/// Per-item rejections are not errors; they are reported in
/// [`BatchOutcome`](crate::provider::BatchOutcome).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WriteError {
    /// The named collection does not exist.
    #[error("Collection '{name}' not found")]
    CollectionNotFound { name: String },

    /// The session lost its backend connection.
    #[error("Connection lost: {message}")]
    ConnectionLost { message: String },

    /// The backend rejected the whole request.
    #[error("Write rejected: {message}")]
    Rejected { message: String },

    /// The backend reported a failure.
    #[error("Backend write failed: {message}")]
    Backend { message: String },

    /// The provider does not implement this operation.
    #[error("Operation '{operation}' is not supported by this provider")]
    Unsupported { operation: &'static str },
}

impl WriteError {
    /// Create a collection-not-found error.
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::CollectionNotFound { name: name.into() }
    }

    /// Create a connection-lost error.
    pub fn connection_lost(message: impl Into<String>) -> Self {
        Self::ConnectionLost {
            message: message.into(),
        }
    }

    /// Create a rejected-request error.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    /// Create a backend error.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Whether this error means the session itself is no longer usable.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::ConnectionLost { .. })
    }

    /// Stable category name.
    pub fn category(&self) -> &'static str {
        match self {
            Self::CollectionNotFound { .. } => "not-found",
            Self::ConnectionLost { .. } => "connection-lost",
            Self::Rejected { .. } => "rejected",
            Self::Backend { .. } => "backend",
            Self::Unsupported { .. } => "unsupported",
        }
    }
}

impl From<QueryError> for WriteError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::CollectionNotFound { name } => Self::CollectionNotFound { name },
            QueryError::ConnectionLost { message } => Self::ConnectionLost { message },
            QueryError::Backend { message } => Self::Backend { message },
            QueryError::Unsupported { operation } => Self::Unsupported { operation },
        }
    }
}
