use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use futures::channel::oneshot;
use futures::future::FutureExt;
use sentry::{Hub, SentryFutureExt};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

use crate::config::OnceConfig;
use crate::error::{OnceError, OnceResult};
use crate::future::{AttemptChannel, OnceFuture};
use crate::operation::OnceOperation;

/// The externally visible state of an [`AsyncOnce`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OnceStatus {
    /// Nothing is cached and no attempt is running.
    Initial,
    /// An attempt is in flight.
    Pending,
    /// A value is cached.
    Fulfilled,
}

/// Bookkeeping of an attempt that is currently in flight.
struct PendingAttempt<T, E> {
    /// The id of this attempt, unique within one [`AsyncOnce`].
    attempt: u64,
    /// The channel handed out to every caller joining this attempt.
    channel: AttemptChannel<T, E>,
    /// Detaches everybody holding `channel` from this attempt.
    cancel: CancellationToken,
    /// Aborts the task running this attempt, if configured.
    abort: Option<AbortHandle>,
}

enum State<T, E> {
    Initial,
    Pending(PendingAttempt<T, E>),
    Fulfilled(Arc<T>),
}

struct Inner<T, E> {
    state: State<T, E>,
    /// The id of the last attempt that was started.
    attempts: u64,
}

type SharedInner<T, E> = Arc<Mutex<Inner<T, E>>>;

fn lock<T, E>(inner: &Mutex<Inner<T, E>>) -> MutexGuard<'_, Inner<T, E>> {
    // The state is only ever replaced as a whole, so a poisoned lock still holds a valid state.
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Memoizes the outcome of an asynchronous operation, running at most one attempt at a time.
///
/// See the [crate documentation](crate) for the full protocol.
pub struct AsyncOnce<O, T, E> {
    operation: O,
    config: Arc<OnceConfig>,
    inner: SharedInner<T, E>,
}

impl<O, T, E> AsyncOnce<O, T, E> {
    /// Wraps `operation` with a default [`OnceConfig`].
    pub fn new(operation: O) -> Self {
        Self::with_config(operation, OnceConfig::default())
    }

    pub fn with_config(operation: O, config: OnceConfig) -> Self {
        Self {
            operation,
            config: Arc::new(config),
            inner: Arc::new(Mutex::new(Inner {
                state: State::Initial,
                attempts: 0,
            })),
        }
    }

    pub fn config(&self) -> &OnceConfig {
        &self.config
    }

    /// Returns the current state of the cache.
    pub fn status(&self) -> OnceStatus {
        match lock(&self.inner).state {
            State::Initial => OnceStatus::Initial,
            State::Pending(_) => OnceStatus::Pending,
            State::Fulfilled(_) => OnceStatus::Fulfilled,
        }
    }

    /// Returns the cached value without invoking the operation.
    pub fn peek(&self) -> Option<Arc<T>> {
        match &lock(&self.inner).state {
            State::Fulfilled(value) => Some(Arc::clone(value)),
            _ => None,
        }
    }

    /// Discards the cached value or the pending attempt.
    ///
    /// - A cached value is dropped.
    /// - Everybody waiting on a pending attempt observes [`OnceError::Invalidated`]. The
    ///   operation keeps running in the background unless
    ///   [`abort_on_invalidate`](OnceConfig::abort_on_invalidate) is set, and its outcome is
    ///   discarded.
    ///
    /// Either way, the next invocation starts a fresh attempt. Invalidating an empty cache does
    /// nothing.
    #[doc(alias = "clear")]
    pub fn invalidate(&self) {
        let name = self.config.name();
        let previous = {
            let mut inner = lock(&self.inner);
            let previous = std::mem::replace(&mut inner.state, State::Initial);
            // Cancelled under the lock, so a stale settlement can only drop the sender after the
            // callers have been detached.
            if let State::Pending(pending) = &previous {
                pending.cancel.cancel();
            }
            previous
        };

        match previous {
            State::Initial => return,
            State::Fulfilled(_) => {
                tracing::debug!(cache = name, "Discarding cached value");
            }
            State::Pending(pending) => {
                tracing::debug!(
                    cache = name,
                    attempt = pending.attempt,
                    "Detached callers from pending attempt"
                );
                if let Some(abort) = pending.abort {
                    abort.abort();
                }
            }
        }
        metric!(counter("once.invalidated") += 1, "cache" => name);
    }
}

impl<O, T, E> AsyncOnce<O, T, E>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Invokes the operation, or joins the outcome that is cached or currently being produced.
    ///
    /// The context `cx` and the arguments `args` are only passed to the operation if a new
    /// attempt is started. They are ignored when the outcome is already cached or pending.
    ///
    /// The attempt is spawned onto the current runtime right away, so it makes progress even if
    /// the returned future is never polled.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn invoke<C, A>(&self, cx: C, args: A) -> OnceFuture<T, E>
    where
        O: OnceOperation<C, A, Item = T, Error = E>,
    {
        let name = self.config.name();
        metric!(counter("once.access") += 1, "cache" => name);

        let (guard, channel) = {
            let mut inner = lock(&self.inner);
            match &inner.state {
                State::Fulfilled(value) => {
                    metric!(counter("once.hit") += 1, "cache" => name);
                    return OnceFuture::ready(Arc::clone(value));
                }
                State::Pending(pending) => {
                    // A concurrent invocation was deduplicated.
                    metric!(counter("once.joined") += 1, "cache" => name);
                    return OnceFuture::attempt(pending.channel.clone());
                }
                State::Initial => {}
            }

            inner.attempts += 1;
            let attempt = inner.attempts;
            let cancel = CancellationToken::new();
            let (sender, receiver) = oneshot::channel();
            let channel = create_channel(receiver, cancel.clone());

            inner.state = State::Pending(PendingAttempt {
                attempt,
                channel: channel.clone(),
                cancel,
                abort: None,
            });

            let guard = AttemptGuard {
                inner: Arc::clone(&self.inner),
                config: Arc::clone(&self.config),
                attempt,
                sender: Some(sender),
                started: Instant::now(),
            };
            (guard, channel)
        };

        metric!(counter("once.attempt") += 1, "cache" => name);
        tracing::trace!(cache = name, attempt = guard.attempt, "Starting new attempt");

        // The operation runs outside of the lock, so it may itself use this cache. Should it
        // panic, the guard resets the state on unwind.
        let attempt = guard.attempt;
        let computation = self.operation.call(cx, args);
        let task = async move {
            let result = computation.await;
            guard.settle(result);
        }
        .bind_hub(Hub::new_from_top(Hub::current()));

        let handle = tokio::spawn(task);
        if self.config.abort_on_invalidate {
            let mut inner = lock(&self.inner);
            match &mut inner.state {
                State::Pending(pending) if pending.attempt == attempt => {
                    pending.abort = Some(handle.abort_handle());
                }
                // Invalidated before the abort handle could be registered.
                _ => handle.abort(),
            }
        }

        OnceFuture::attempt(channel)
    }
}

/// Creates the channel shared by all callers of one attempt.
///
/// Cancellation takes precedence, so an invalidated attempt never yields the outcome of the
/// operation, even if both are ready at the same time.
fn create_channel<T, E>(
    receiver: oneshot::Receiver<OnceResult<T, E>>,
    cancel: CancellationToken,
) -> AttemptChannel<T, E>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    async move {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(OnceError::Invalidated),
            result = receiver => result.unwrap_or(Err(OnceError::Aborted)),
        }
    }
    .boxed()
    .shared()
}

/// Settles one attempt, or resets the state if the attempt is dropped before it settles.
struct AttemptGuard<T, E> {
    inner: SharedInner<T, E>,
    config: Arc<OnceConfig>,
    attempt: u64,
    sender: Option<oneshot::Sender<OnceResult<T, E>>>,
    started: Instant,
}

impl<T, E> AttemptGuard<T, E> {
    /// Applies the outcome of the operation, if this attempt is still the current one.
    fn settle(mut self, result: Result<T, E>) {
        let name = self.config.name();
        let Some(sender) = self.sender.take() else {
            return;
        };
        metric!(timer("once.attempt.duration") = self.started.elapsed(), "cache" => name);

        let mut inner = lock(&self.inner);
        let is_current = matches!(
            &inner.state,
            State::Pending(pending) if pending.attempt == self.attempt
        );
        if !is_current {
            // The attempt was invalidated, and its callers have already been detached.
            metric!(counter("once.stale") += 1, "cache" => name);
            tracing::debug!(
                cache = name,
                attempt = self.attempt,
                "Discarding settlement of superseded attempt"
            );
            return;
        }

        let result = match result {
            Ok(value) => {
                let value = Arc::new(value);
                inner.state = State::Fulfilled(Arc::clone(&value));
                tracing::trace!(cache = name, attempt = self.attempt, "Attempt fulfilled");
                Ok(value)
            }
            Err(err) => {
                inner.state = State::Initial;
                metric!(counter("once.failed") += 1, "cache" => name);
                tracing::debug!(cache = name, attempt = self.attempt, "Attempt failed");
                Err(OnceError::Operation(Arc::new(err)))
            }
        };

        // Sent while holding the lock, so no invalidation can slip in between.
        sender.send(result).ok();
    }
}

impl<T, E> Drop for AttemptGuard<T, E> {
    fn drop(&mut self) {
        if self.sender.is_none() {
            return;
        }

        let mut inner = lock(&self.inner);
        if let State::Pending(pending) = &inner.state {
            if pending.attempt == self.attempt {
                inner.state = State::Initial;
                let name = self.config.name();
                metric!(counter("once.aborted") += 1, "cache" => name);
                tracing::warn!(
                    cache = name,
                    attempt = self.attempt,
                    "Attempt was dropped before it settled"
                );
            }
        }
        // Dropping the sender resolves the channel with `OnceError::Aborted`.
    }
}

impl<O, T, E> fmt::Debug for AsyncOnce<O, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let attempts = self
            .inner
            .try_lock()
            .map(|inner| inner.attempts)
            .unwrap_or_default();
        f.debug_struct("AsyncOnce")
            .field("config", &self.config)
            .field("status", &self.status())
            .field("attempts", &attempts)
            .finish()
    }
}
