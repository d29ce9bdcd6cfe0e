use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::{BoxFuture, FusedFuture, Shared};

use crate::error::OnceResult;

/// A shareable channel receiving the outcome of one attempt.
pub(crate) type AttemptChannel<T, E> = Shared<BoxFuture<'static, OnceResult<T, E>>>;

/// The handle returned by [`AsyncOnce::invoke`](crate::AsyncOnce::invoke).
///
/// It is returned for every invocation, including the ones served from a cached value, so call
/// sites can always treat the result as asynchronous.
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct OnceFuture<T, E> {
    inner: Inner<T, E>,
}

enum Inner<T, E> {
    /// A value that was already cached when the invocation happened.
    Ready(Option<Arc<T>>),
    /// A handle to an attempt that was pending when the invocation happened.
    Attempt(AttemptChannel<T, E>),
}

impl<T, E> OnceFuture<T, E> {
    pub(crate) fn ready(value: Arc<T>) -> Self {
        Self {
            inner: Inner::Ready(Some(value)),
        }
    }

    pub(crate) fn attempt(channel: AttemptChannel<T, E>) -> Self {
        Self {
            inner: Inner::Attempt(channel),
        }
    }

    /// Returns `true` if both handles observe the same outcome.
    ///
    /// Handles to the same pending attempt compare equal as long as neither of them has been
    /// polled to completion. Handles to a cached value compare equal if they carry the same
    /// value.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (&self.inner, &other.inner) {
            (Inner::Ready(Some(lhs)), Inner::Ready(Some(rhs))) => Arc::ptr_eq(lhs, rhs),
            (Inner::Attempt(lhs), Inner::Attempt(rhs)) => lhs.ptr_eq(rhs),
            _ => false,
        }
    }
}

impl<T, E> Future for OnceFuture<T, E> {
    type Output = OnceResult<T, E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.inner {
            Inner::Ready(value) => match value.take() {
                Some(value) => Poll::Ready(Ok(value)),
                None => panic!("`OnceFuture` polled after completion"),
            },
            Inner::Attempt(channel) => Pin::new(channel).poll(cx),
        }
    }
}

impl<T, E> FusedFuture for OnceFuture<T, E> {
    fn is_terminated(&self) -> bool {
        match &self.inner {
            Inner::Ready(value) => value.is_none(),
            Inner::Attempt(channel) => channel.is_terminated(),
        }
    }
}

impl<T, E> fmt::Debug for OnceFuture<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.inner {
            Inner::Ready(_) => "ready",
            Inner::Attempt(_) => "attempt",
        };
        f.debug_struct("OnceFuture").field("kind", &kind).finish()
    }
}
