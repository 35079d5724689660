use thiserror::Error;

/// Logical producer error kinds (§7). Resolver errors live in `gnmid-resolver`;
/// this crate only carries the kinds a producer can raise, at construction
/// time (synchronous, surfaced from `Run`) or at runtime (as a fatal
/// envelope pushed through the queue).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProducerError {
    #[error("path not found")]
    PathNotFound,
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("unsupported origin/target combination")]
    UnsupportedOrigin,
    #[error("transient backing-store error: {0}")]
    BackingStoreTransient(String),
    #[error("fatal backing-store error: {0}")]
    BackingStoreFatal(String),
    #[error("queue was disposed")]
    QueueDisposed,
}

impl From<gnmid_queue::QueueError> for ProducerError {
    fn from(_: gnmid_queue::QueueError) -> Self {
        ProducerError::QueueDisposed
    }
}
