use std::future::Future;

/// An asynchronous operation that can be wrapped in an [`AsyncOnce`](crate::AsyncOnce).
///
/// The operation receives an invocation context `C` and an argument list `A`, both of which are
/// forwarded verbatim whenever a new attempt is started. Neither of them is used to distinguish
/// cache entries.
///
/// This is implemented for all closures and functions taking `(C, A)` and returning a
/// `Send + 'static` future yielding a [`Result`]:
///
/// ```
/// use async_once::AsyncOnce;
///
/// async fn fetch_greeting(client: (), (name,): (&'static str,)) -> Result<String, std::io::Error> {
///     let _ = client;
///     Ok(format!("Hello {name}"))
/// }
///
/// let greeting: AsyncOnce<_, String, std::io::Error> = AsyncOnce::new(fetch_greeting);
/// # let _ = greeting;
/// ```
pub trait OnceOperation<C, A> {
    /// The value produced by a successful attempt.
    type Item;
    /// The error produced by a failed attempt.
    type Error;
    /// The future driving a single attempt.
    ///
    /// It is spawned on the current runtime, so it must be `Send + 'static`.
    type Future: Future<Output = Result<Self::Item, Self::Error>> + Send + 'static;

    /// Starts a new attempt of this operation.
    fn call(&self, cx: C, args: A) -> Self::Future;
}

impl<F, C, A, Fut, T, E> OnceOperation<C, A> for F
where
    F: Fn(C, A) -> Fut,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    type Item = T;
    type Error = E;
    type Future = Fut;

    fn call(&self, cx: C, args: A) -> Self::Future {
        self(cx, args)
    }
}
