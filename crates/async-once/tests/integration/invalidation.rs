use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future;

use async_once::{AsyncOnce, OnceConfig, OnceStatus};
use async_once_test::{self as test, Gate, TestError, run_pending_tasks};

#[tokio::test]
async fn test_invalidate_fulfilled() {
    test::setup();
    let (calls, operation) = test::counter();
    let cached = AsyncOnce::new(operation);

    assert_eq!(*cached.invoke((), ()).await.unwrap(), 1);
    assert_eq!(*cached.invoke((), ()).await.unwrap(), 1);

    cached.invalidate();
    assert_eq!(cached.status(), OnceStatus::Initial);
    assert!(cached.peek().is_none());

    assert_eq!(*cached.invoke((), ()).await.unwrap(), 2);
    assert_eq!(*cached.invoke((), ()).await.unwrap(), 2);

    cached.invalidate();

    assert_eq!(*cached.invoke((), ()).await.unwrap(), 3);
    assert_eq!(*cached.invoke((), ()).await.unwrap(), 3);
    assert_eq!(calls.get(), 3);
}

#[tokio::test]
async fn test_invalidate_initial_is_noop() {
    test::setup();
    let (calls, operation) = test::counter();
    let cached = AsyncOnce::new(operation);

    cached.invalidate();
    cached.invalidate();
    assert_eq!(cached.status(), OnceStatus::Initial);
    assert_eq!(calls.get(), 0);

    assert_eq!(*cached.invoke((), ()).await.unwrap(), 1);
}

#[tokio::test]
async fn test_invalidate_pending() {
    test::setup();
    let gate = Gate::<usize>::new();
    let cached = AsyncOnce::new(gate.operation::<(), ()>());

    // both of these are still pending
    let first = cached.invoke((), ());
    let second = cached.invoke((), ());

    cached.invalidate();
    assert_eq!(cached.status(), OnceStatus::Initial);

    let (first, second) = futures::join!(first, second);
    let (first, second) = (first.unwrap_err(), second.unwrap_err());
    assert!(first.is_invalidated());
    assert!(second.is_invalidated());
    insta::assert_snapshot!(first.to_string(), @"attempt was invalidated before it settled");

    // this calls the underlying operation again
    let third = cached.invoke((), ());
    let fourth = cached.invoke((), ());
    assert!(third.ptr_eq(&fourth));
    assert_eq!(gate.calls(), 2);

    assert!(gate.resolve(1, 2));
    let (third, fourth) = futures::join!(third, fourth);
    assert_eq!(*third.unwrap(), 2);
    assert_eq!(*fourth.unwrap(), 2);

    // the orphaned attempt was never stopped, but its outcome is not observable
    assert!(gate.resolve(0, 1));
    run_pending_tasks().await;
    assert_eq!(cached.status(), OnceStatus::Fulfilled);
    assert_eq!(*cached.peek().unwrap(), 2);
    assert_eq!(*cached.invoke((), ()).await.unwrap(), 2);
    assert_eq!(gate.calls(), 2);
}

#[tokio::test]
async fn test_invalidate_pending_multiple() {
    test::setup();
    let gate = Gate::<usize>::new();
    let cached = AsyncOnce::new(gate.operation::<(), ()>());

    let mut invalidated = Vec::new();
    for _ in 0..10 {
        invalidated.push(cached.invoke((), ()));
        invalidated.push(cached.invoke((), ()));
        cached.invalidate();
    }

    for result in future::join_all(invalidated).await {
        assert!(result.unwrap_err().is_invalidated());
    }
    // every invalidation provisions a fresh attempt
    assert_eq!(gate.calls(), 10);

    let next = cached.invoke((), ());
    assert!(gate.resolve(10, 11));
    assert_eq!(*next.await.unwrap(), 11);
}

#[tokio::test]
async fn test_stale_settlement_is_discarded() {
    test::setup();
    let gate = Gate::<usize>::new();
    let cached = AsyncOnce::new(gate.operation::<(), ()>());

    let first = cached.invoke((), ());
    cached.invalidate();
    let second = cached.invoke((), ());
    cached.invalidate();
    assert_eq!(gate.calls(), 2);

    // the first attempt settles late, after a second one was started and invalidated
    assert!(gate.resolve(0, 1));
    run_pending_tasks().await;
    assert_eq!(cached.status(), OnceStatus::Initial);

    assert!(gate.resolve(1, 2));
    run_pending_tasks().await;
    assert_eq!(cached.status(), OnceStatus::Initial);
    assert!(cached.peek().is_none());

    assert!(first.await.unwrap_err().is_invalidated());
    assert!(second.await.unwrap_err().is_invalidated());

    let third = cached.invoke((), ());
    assert_eq!(gate.calls(), 3);
    assert!(gate.resolve(2, 3));
    assert_eq!(*third.await.unwrap(), 3);
}

#[tokio::test]
async fn test_stale_settlement_keeps_newer_attempt() {
    test::setup();
    let gate = Gate::<usize>::new();
    let cached = AsyncOnce::new(gate.operation::<(), ()>());

    let first = cached.invoke((), ());
    cached.invalidate();
    let second = cached.invoke((), ());

    // neither a late failure nor a late success of the first attempt touch the second one
    assert!(gate.reject(0, "too late"));
    run_pending_tasks().await;
    assert_eq!(cached.status(), OnceStatus::Pending);
    assert!(first.await.unwrap_err().is_invalidated());

    let joined = cached.invoke((), ());
    assert!(joined.ptr_eq(&second));

    assert!(gate.resolve(1, 2));
    assert_eq!(*second.await.unwrap(), 2);
    assert_eq!(*joined.await.unwrap(), 2);
    assert_eq!(cached.status(), OnceStatus::Fulfilled);
}

#[tokio::test]
async fn test_stale_success_does_not_resurrect() {
    test::setup();
    let gate = Gate::<usize>::new();
    let cached = AsyncOnce::new(gate.operation::<(), ()>());

    let first = cached.invoke((), ());
    cached.invalidate();

    assert!(gate.resolve(0, 1));
    run_pending_tasks().await;

    assert_eq!(cached.status(), OnceStatus::Initial);
    assert!(first.await.unwrap_err().is_invalidated());
}

/// Sets a flag once the operation future has been dropped.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

fn never_completes(
    dropped: Arc<AtomicBool>,
) -> impl Fn((), ()) -> future::BoxFuture<'static, Result<usize, TestError>> {
    move |(), ()| {
        let flag = DropFlag(Arc::clone(&dropped));
        Box::pin(async move {
            let _flag = flag;
            future::pending::<()>().await;
            Ok(1)
        })
    }
}

#[tokio::test]
async fn test_invalidate_keeps_operation_running() {
    test::setup();
    let dropped = Arc::new(AtomicBool::new(false));
    let cached = AsyncOnce::new(never_completes(Arc::clone(&dropped)));

    let pending = cached.invoke((), ());
    run_pending_tasks().await;
    cached.invalidate();

    assert!(pending.await.unwrap_err().is_invalidated());
    run_pending_tasks().await;
    assert!(!dropped.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_abort_on_invalidate() {
    test::setup();
    let dropped = Arc::new(AtomicBool::new(false));
    let config = OnceConfig {
        abort_on_invalidate: true,
        ..OnceConfig::named("aborting")
    };
    let cached = AsyncOnce::with_config(never_completes(Arc::clone(&dropped)), config);

    let pending = cached.invoke((), ());
    run_pending_tasks().await;
    assert!(!dropped.load(Ordering::SeqCst));

    cached.invalidate();

    assert!(pending.await.unwrap_err().is_invalidated());
    run_pending_tasks().await;
    assert!(dropped.load(Ordering::SeqCst));
    assert_eq!(cached.status(), OnceStatus::Initial);
}
