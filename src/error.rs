use std::sync::Arc;

/// Boxed error returned by caller-supplied fetch and persist functions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error type for cache operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// A key-value store command failed.
    #[error("[{tier}] cache error for key '{key}': {message}")]
    Operation {
        tier: String,
        key: String,
        message: String,
    },
    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// A caller-supplied fetch or persist function failed.
    #[error("origin call failed for key '{key}': {source}")]
    Origin {
        key: String,
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync>,
    },
    /// A store command or origin call did not complete in time.
    #[error("{operation} timed out after {after_ms}ms for key '{key}'")]
    Timeout {
        operation: String,
        key: String,
        after_ms: u64,
    },
}

impl CacheError {
    /// Create a new operation error.
    pub fn operation(
        tier: impl Into<String>,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        CacheError::Operation {
            tier: tier.into(),
            key: key.into(),
            message: message.into(),
        }
    }

    /// Wrap a failure reported by a fetch or persist function.
    pub fn origin(key: impl Into<String>, source: impl Into<BoxError>) -> Self {
        CacheError::Origin {
            key: key.into(),
            source: Arc::from(source.into()),
        }
    }

    pub fn timeout(operation: impl Into<String>, key: impl Into<String>, after_ms: u64) -> Self {
        CacheError::Timeout {
            operation: operation.into(),
            key: key.into(),
            after_ms,
        }
    }

    /// True when the error came from the origin rather than the cache layer.
    pub fn is_origin(&self) -> bool {
        matches!(self, CacheError::Origin { .. })
    }
}
