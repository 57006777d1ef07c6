//! Coordination-Layer Error Taxonomy
//!
//! Raw backend conditions are translated into a small closed set at the
//! adapter boundary, so callers branch on meaning instead of on
//! backend-specific codes.

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, StoreError>;

#[doc(hidden)]
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Errors surfaced by adapter operations.
///
/// The set is closed: every recognized backend condition maps onto exactly
/// one variant, and anything unrecognized passes through as
/// [`StoreError::Backend`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// No node exists at the requested key
    #[error("key not found")]
    KeyNotFound,

    /// A leaf operation hit a directory node
    #[error("node is a directory")]
    NodeIsDirectory,

    /// A directory operation hit a leaf node
    #[error("node is not a directory")]
    NodeIsNotDirectory,

    /// Conditional create found the path already occupied
    #[error("key already exists")]
    KeyExists,

    /// A lock was requested with a TTL of zero
    #[error("invalid TTL")]
    InvalidTtl,

    /// The store could not be reached before the deadline
    #[error("request timed out")]
    Timeout,

    /// Backend condition without a dedicated mapping
    #[error(transparent)]
    Backend(BackendError),
}

/// Raw conditions reported by the wire client underneath the adapter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("key not found: {key}")]
    KeyNotFound { key: String },

    /// Leaf request answered by a directory node
    #[error("not a file: {key}")]
    NotAFile { key: String },

    /// Directory request answered by a leaf node
    #[error("not a directory: {key}")]
    NotADirectory { key: String },

    #[error("key already exists: {key}")]
    KeyExists { key: String },

    /// The requested notification index has left the retained history
    /// window; `oldest_available` is the oldest index still served
    #[error("event index cleared, oldest available is {oldest_available}")]
    EventIndexCleared { oldest_available: u64 },

    /// The store did not answer within the wire client's deadline
    #[error("store unreachable: {reason}")]
    Unreachable { reason: String },

    /// Condition the adapter does not recognize, kept verbatim
    #[error("store error {code}: {message}")]
    Raw { code: u64, message: String },
}

impl From<BackendError> for StoreError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::KeyNotFound { .. } => StoreError::KeyNotFound,
            BackendError::NotAFile { .. } => StoreError::NodeIsDirectory,
            BackendError::NotADirectory { .. } => StoreError::NodeIsNotDirectory,
            BackendError::KeyExists { .. } => StoreError::KeyExists,
            BackendError::Unreachable { .. } => StoreError::Timeout,
            other => StoreError::Backend(other),
        }
    }
}
