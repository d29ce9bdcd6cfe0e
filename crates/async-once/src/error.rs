use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// The reason why an [`OnceFuture`](crate::OnceFuture) did not resolve to a value.
///
/// Every caller that joined the same attempt observes a clone of the same error. The error of
/// the operation itself is shared behind an [`Arc`], so this type is [`Clone`] for any `E`.
#[derive(Error)]
pub enum OnceError<E> {
    /// The wrapped operation failed.
    ///
    /// The cache has been reset, so the next invocation starts a fresh attempt.
    #[error("operation failed")]
    Operation(#[source] Arc<E>),
    /// The attempt was invalidated while it was still pending.
    ///
    /// The operation itself might still be running in the background, but its outcome will
    /// never be observed by anyone.
    #[error("attempt was invalidated before it settled")]
    Invalidated,
    /// The attempt was dropped before it could settle.
    ///
    /// This happens when the operation panics, when its task is aborted, or when the runtime
    /// shuts down while the attempt is in flight.
    #[error("attempt was dropped before it settled")]
    Aborted,
}

impl<E> OnceError<E> {
    /// Returns `true` if the attempt was abandoned through invalidation.
    pub fn is_invalidated(&self) -> bool {
        matches!(self, Self::Invalidated)
    }

    /// Returns the error of the operation, if the operation itself failed.
    pub fn operation_error(&self) -> Option<&Arc<E>> {
        match self {
            Self::Operation(err) => Some(err),
            _ => None,
        }
    }
}

impl<E> Clone for OnceError<E> {
    fn clone(&self) -> Self {
        match self {
            Self::Operation(err) => Self::Operation(Arc::clone(err)),
            Self::Invalidated => Self::Invalidated,
            Self::Aborted => Self::Aborted,
        }
    }
}

impl<E: fmt::Debug> fmt::Debug for OnceError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Operation(err) => f.debug_tuple("Operation").field(err).finish(),
            Self::Invalidated => f.write_str("Invalidated"),
            Self::Aborted => f.write_str("Aborted"),
        }
    }
}

/// The outcome of an attempt, shared between all callers that joined it.
pub type OnceResult<T, E> = Result<Arc<T>, OnceError<E>>;
