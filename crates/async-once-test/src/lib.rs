//! Helpers for testing single-flight caches.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - Attempts are spawned as separate tasks. On a current-thread runtime they only make progress
//!    while the test itself is suspended, use [`run_pending_tasks`] to let them catch up before
//!    asserting on the cache state.
//!
//!  - A [`Gate`] hands out operations that stay pending until the test explicitly resolves or
//!    rejects them, which makes it possible to interleave invocations and invalidations
//!    deterministically.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::channel::oneshot;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `async_once` crate and mutes all
///    other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("async_once=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Yields to the runtime often enough for all spawned attempts to observe their inputs.
pub async fn run_pending_tasks() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

/// The error produced by the operations in this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestError(pub String);

impl fmt::Display for TestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for TestError {}

impl From<&str> for TestError {
    fn from(message: &str) -> Self {
        Self(message.to_owned())
    }
}

/// Counts how often an operation has been started.
#[derive(Clone, Debug, Default)]
pub struct Calls(Arc<AtomicUsize>);

impl Calls {
    /// Records a call, and returns the number of calls including this one.
    pub fn record(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Returns an operation that yields the number of times it has been called.
///
/// The returned counter observes the same calls.
pub fn counter() -> (
    Calls,
    impl Fn((), ()) -> futures::future::Ready<Result<usize, TestError>>,
) {
    let calls = Calls::default();
    let operation = {
        let calls = calls.clone();
        move |(), ()| futures::future::ready(Ok(calls.record()))
    };
    (calls, operation)
}

type Settle<T> = oneshot::Sender<Result<T, TestError>>;

/// Hands out operations whose attempts stay pending until they are settled by the test.
///
/// Attempts are numbered in the order they were started, beginning at `0`.
pub struct Gate<T> {
    calls: Calls,
    attempts: Arc<Mutex<Vec<Option<Settle<T>>>>>,
}

impl<T> Clone for Gate<T> {
    fn clone(&self) -> Self {
        Self {
            calls: self.calls.clone(),
            attempts: Arc::clone(&self.attempts),
        }
    }
}

impl<T> Default for Gate<T> {
    fn default() -> Self {
        Self {
            calls: Calls::default(),
            attempts: Default::default(),
        }
    }
}

impl<T: Send + 'static> Gate<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns an operation that starts a new gated attempt on every call.
    ///
    /// An attempt whose sender is dropped (for example because the gate is dropped) fails with
    /// a [`TestError`].
    pub fn operation<C, A>(
        &self,
    ) -> impl Fn(C, A) -> Pin<Box<dyn Future<Output = Result<T, TestError>> + Send>>
    + Send
    + Sync
    + use<T, C, A> {
        let gate = self.clone();
        move |_cx, _args| {
            gate.calls.record();
            let (sender, receiver) = oneshot::channel();
            gate.attempts.lock().unwrap().push(Some(sender));
            Box::pin(async move {
                receiver
                    .await
                    .unwrap_or_else(|_| Err(TestError::from("gate closed")))
            })
        }
    }

    /// The number of attempts started so far.
    pub fn calls(&self) -> usize {
        self.calls.get()
    }

    /// Settles attempt `index` with `result`.
    ///
    /// Returns `false` if the attempt does not exist, was already settled, or nobody is
    /// listening anymore.
    pub fn settle(&self, index: usize, result: Result<T, TestError>) -> bool {
        let sender = self
            .attempts
            .lock()
            .unwrap()
            .get_mut(index)
            .and_then(Option::take);
        match sender {
            Some(sender) => sender.send(result).is_ok(),
            None => false,
        }
    }

    pub fn resolve(&self, index: usize, value: T) -> bool {
        self.settle(index, Ok(value))
    }

    pub fn reject(&self, index: usize, message: &str) -> bool {
        self.settle(index, Err(TestError::from(message)))
    }
}
