use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Memoizes the first value produced by a synchronous operation.
///
/// This is the synchronous sibling of [`AsyncOnce`](crate::AsyncOnce): there is no pending
/// state, the operation simply runs on the calling thread. Like its async counterpart, the
/// value is cached per instance and not per argument.
pub struct Once<O, T> {
    operation: O,
    value: Mutex<Option<Arc<T>>>,
}

impl<O, T> Once<O, T> {
    pub fn new(operation: O) -> Self {
        Self {
            operation,
            value: Mutex::new(None),
        }
    }

    fn value(&self) -> MutexGuard<'_, Option<Arc<T>>> {
        self.value.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the cached value without running the operation.
    pub fn peek(&self) -> Option<Arc<T>> {
        self.value().clone()
    }

    /// Stores `value` unless another caller was faster, and returns the cached value.
    fn store(&self, value: T) -> Arc<T> {
        let mut cached = self.value();
        Arc::clone(cached.get_or_insert_with(|| Arc::new(value)))
    }

    /// Runs the operation on the first call, and returns the cached value afterwards.
    ///
    /// `cx` and `args` are only passed to the operation when nothing is cached.
    pub fn call<C, A>(&self, cx: C, args: A) -> Arc<T>
    where
        O: Fn(C, A) -> T,
    {
        if let Some(value) = self.peek() {
            return value;
        }
        // The lock is not held while the operation runs, so it may use this cell itself.
        let value = (self.operation)(cx, args);
        self.store(value)
    }

    /// Like [`call`](Self::call), but for fallible operations.
    ///
    /// Errors are returned to the caller and are not cached, so the next call runs the
    /// operation again. Once a value is cached, it is returned even if the operation would fail
    /// by now.
    pub fn try_call<C, A, E>(&self, cx: C, args: A) -> Result<Arc<T>, E>
    where
        O: Fn(C, A) -> Result<T, E>,
    {
        if let Some(value) = self.peek() {
            return Ok(value);
        }
        let value = (self.operation)(cx, args)?;
        Ok(self.store(value))
    }

    /// Forgets the cached value, so that the next call runs the operation again.
    #[doc(alias = "invalidate")]
    pub fn clear(&self) {
        if self.value().take().is_some() {
            tracing::trace!("Discarding memoized value");
        }
    }
}

impl<O, T: fmt::Debug> fmt::Debug for Once<O, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Once").field("value", &self.peek()).finish()
    }
}
