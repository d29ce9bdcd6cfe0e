//! # Single-flight memoization of async operations
//!
//! [`AsyncOnce`] wraps an asynchronous operation and makes sure it runs at most once at a time.
//! All concurrent callers join the attempt that is currently in flight and observe the same
//! outcome. A successful outcome is memoized until it is [invalidated](AsyncOnce::invalidate),
//! a failed one is forgotten so that the next call retries from scratch.
//!
//! The cache is keyed by *call site*, not by arguments: while a value is cached or an attempt is
//! pending, every invocation returns that outcome regardless of the arguments passed.
//!
//! ## Cache States
//!
//! - `Initial`: Nothing is cached. The next invocation starts a new attempt.
//! - `Pending`: An attempt is running. Invocations return a handle to that attempt.
//! - `Fulfilled`: The last attempt succeeded. Invocations return the cached value.
//!
//! ## Invalidation
//!
//! Invalidating a pending attempt does not stop the operation by default, it only detaches
//! everybody waiting on it. Those callers observe [`OnceError::Invalidated`], and whatever the
//! orphaned attempt eventually produces is discarded. Use
//! [`OnceConfig::abort_on_invalidate`] to abort the attempt task as well.
//!
//! ### Metrics
//!
//! Each metric is tagged with a `cache` field that corresponds to [`OnceConfig::name`]:
//!
//! - `once.access`: All invocations.
//! - `once.hit`: Invocations served by a cached value.
//! - `once.joined`: Invocations that joined a pending attempt.
//! - `once.attempt`: Attempts actually started.
//! - `once.attempt.duration`: Time from starting an attempt until the operation completed.
//! - `once.failed`: Attempts that failed.
//! - `once.invalidated`: Invalidations that discarded a value or a pending attempt.
//! - `once.stale`: Settlements of attempts that had already been superseded.
//! - `once.aborted`: Attempts dropped before they could settle.

#[macro_use]
pub mod metrics;

mod async_once;
mod config;
mod error;
mod future;
mod once;
mod operation;

pub use async_once::{AsyncOnce, OnceStatus};
pub use config::OnceConfig;
pub use error::{OnceError, OnceResult};
pub use future::OnceFuture;
pub use once::Once;
pub use operation::OnceOperation;
