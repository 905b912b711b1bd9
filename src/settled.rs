//! Awaiting a settlement instead of chaining on it.
use std::{
    fmt,
    future::Future as StdFuture,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll},
};

use crate::{future::Shared, Error};

/// A [`Future`](crate::Future)'s settlement as a `std::future::Future`.
///
/// There can be many waiters on one future; each gets its own copy of the
/// outcome. A waiter becomes ready in the same scheduler turn as the
/// continuations registered with `then`, never earlier, and resolves to
/// [`Error::Abandoned`] if the future lost every resolver while pending.
///
/// # Examples
///
/// ```
/// use deferred::{scheduler, Future};
///
/// let (resolver, future) = Future::<String, String>::pending();
/// let first = future.settled();
/// let second = future.clone();
/// resolver.resolve("🍓".into());
///
/// let queue = scheduler::current();
/// let both = queue.block_on(async move { (first.await, second.await) });
/// assert_eq!(both, Ok((Ok(Ok("🍓".to_string())), Ok(Ok("🍓".to_string())))));
/// ```
pub struct Settled<T, E> {
    shared: Rc<Shared<T, E>>,
}

impl<T, E> Settled<T, E> {
    pub(crate) fn new(shared: Rc<Shared<T, E>>) -> Self {
        shared.observe();
        Self { shared }
    }
}

impl<T, E> Clone for Settled<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Settled<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settled").finish_non_exhaustive()
    }
}

impl<T: Clone, E: Clone> StdFuture for Settled<T, E> {
    type Output = Result<Result<T, E>, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.shared.poll_outcome(cx.waker()) {
            Some(outcome) => Poll::Ready(outcome),
            None => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{future::Future as _, pin::Pin, task::Poll};

    use crate::{Error, Future, MicrotaskQueue};

    #[test]
    fn test_two_waiters_resolve() {
        let queue = MicrotaskQueue::new();
        let (resolver, future) = Future::<String, ()>::pending_in(&queue.scheduler());
        let a = future.settled();
        let b = a.clone();
        resolver.resolve(String::from("🍓"));
        let got = queue.block_on(async move { (a.await, b.await) });
        assert_eq!(got, Ok((Ok(Ok("🍓".to_string())), Ok(Ok("🍓".to_string())))));
    }

    #[test]
    fn test_not_ready_before_delivery() {
        let queue = MicrotaskQueue::new();
        let (resolver, future) = Future::<i32, ()>::pending_in(&queue.scheduler());
        resolver.resolve(1);
        let waker = futures::task::noop_waker();
        let mut cx = std::task::Context::from_waker(&waker);
        let mut settled = future.settled();
        assert!(Pin::new(&mut settled).poll(&mut cx).is_pending());
        queue.run_until_idle();
        assert_eq!(
            Pin::new(&mut settled).poll(&mut cx),
            Poll::Ready(Ok(Ok(1)))
        );
    }

    #[test]
    fn test_await_abandoned() {
        let queue = MicrotaskQueue::new();
        let (resolver, future) = Future::<i32, ()>::pending_in(&queue.scheduler());
        let derived = future.then(|v| Ok(v + 1));
        drop(resolver);
        assert_eq!(queue.block_on(derived.settled()), Ok(Err(Error::Abandoned)));
    }
}
