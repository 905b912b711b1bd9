//! The settle-once future and its chaining protocol.
use std::{
    cell::{Cell, RefCell},
    fmt,
    future::IntoFuture,
    mem,
    rc::Rc,
    task::Waker,
};

use tracing::{debug, trace, warn};

use crate::{
    scheduler::Scheduler,
    thenable::{IntoResolution, Resolution, Thenable},
    Error, Resolver, Settled,
};

/// Where a settlement stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Pending,
    Fulfilled,
    Rejected,
}

/// Whether a future was built by its user or by chaining.
///
/// Only user futures report rejections nobody listened to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    User,
    Link,
}

pub(crate) enum State<T, E> {
    Pending,
    Fulfilled(T),
    Rejected(E),
}

impl<T: Clone, E: Clone> State<T, E> {
    fn outcome(&self) -> Option<Result<T, E>> {
        match self {
            State::Pending => None,
            State::Fulfilled(value) => Some(Ok(value.clone())),
            State::Rejected(reason) => Some(Err(reason.clone())),
        }
    }
}

impl<T, E> State<T, E> {
    fn status(&self) -> Status {
        match self {
            State::Pending => Status::Pending,
            State::Fulfilled(_) => Status::Fulfilled,
            State::Rejected(_) => Status::Rejected,
        }
    }
}

struct Inner<T, E> {
    state: State<T, E>,
    /// Set by the first resolve, reject or adopt.
    locked: bool,
    /// Set once the broadcast has drained the queues.
    delivered: bool,
    abandoned: bool,
    observed: bool,
    on_fulfilled: Vec<Box<dyn FnOnce(T)>>,
    on_rejected: Vec<Box<dyn FnOnce(E)>>,
    waiters: Vec<Waker>,
}

/// State shared by a future's handles, its resolvers and its waiters.
pub(crate) struct Shared<T, E> {
    inner: RefCell<Inner<T, E>>,
    scheduler: Scheduler,
    origin: Origin,
}

impl<T, E> Shared<T, E> {
    fn new(scheduler: Scheduler, origin: Origin) -> Self {
        Self {
            inner: RefCell::new(Inner {
                state: State::Pending,
                locked: false,
                delivered: false,
                abandoned: false,
                observed: false,
                on_fulfilled: Vec::new(),
                on_rejected: Vec::new(),
                waiters: Vec::new(),
            }),
            scheduler,
            origin,
        }
    }

    /// Closes the latch. Returns `false` if it was already closed.
    pub(crate) fn lock(&self) -> bool {
        !mem::replace(&mut self.inner.borrow_mut().locked, true)
    }

    pub(crate) fn is_locked(&self) -> bool {
        self.inner.borrow().locked
    }

    pub(crate) fn poll_outcome(&self, waker: &Waker) -> Option<Result<Result<T, E>, Error>>
    where
        T: Clone,
        E: Clone,
    {
        let mut inner = self.inner.borrow_mut();
        if inner.delivered {
            return inner.state.outcome().map(Ok);
        }
        if inner.abandoned {
            return Some(Err(Error::Abandoned));
        }
        if !inner.waiters.iter().any(|w| w.will_wake(waker)) {
            inner.waiters.push(waker.clone());
        }
        None
    }

    pub(crate) fn observe(&self) {
        self.inner.borrow_mut().observed = true;
    }
}

impl<T: Clone + 'static, E: Clone + 'static> Shared<T, E> {
    /// Records the terminal state and schedules the broadcast.
    ///
    /// Ignored once a terminal state exists, which absorbs thenables that
    /// call back twice.
    pub(crate) fn settle(self: &Rc<Self>, state: State<T, E>) {
        {
            let mut inner = self.inner.borrow_mut();
            if !matches!(inner.state, State::Pending) {
                return;
            }
            inner.locked = true;
            inner.state = state;
            trace!(status = ?inner.state.status(), "future settled");
        }
        let shared = self.clone();
        self.scheduler.schedule(Box::new(move || shared.broadcast()));
    }

    /// Called when the last resolver is gone, or an adopted thenable let go
    /// of its callbacks. A future still pending now can never settle, so its
    /// continuations are released and waiters woken.
    pub(crate) fn abandon(&self) {
        let (on_fulfilled, on_rejected, waiters) = {
            let mut inner = self.inner.borrow_mut();
            if !matches!(inner.state, State::Pending) || inner.abandoned {
                return;
            }
            inner.abandoned = true;
            (
                mem::take(&mut inner.on_fulfilled),
                mem::take(&mut inner.on_rejected),
                mem::take(&mut inner.waiters),
            )
        };
        debug!(
            continuations = on_fulfilled.len(),
            waiters = waiters.len(),
            "future abandoned while pending"
        );
        // Dropping a continuation abandons the future derived from it. Each
        // link of a chain is released from its own task.
        if !on_fulfilled.is_empty() || !on_rejected.is_empty() {
            self.scheduler
                .schedule(Box::new(move || drop((on_fulfilled, on_rejected))));
        }
        for waker in waiters {
            waker.wake();
        }
    }

    fn broadcast(&self) {
        let (outcome, on_fulfilled, on_rejected, waiters, observed) = {
            let mut inner = self.inner.borrow_mut();
            let Some(outcome) = inner.state.outcome() else {
                return;
            };
            inner.delivered = true;
            (
                outcome,
                mem::take(&mut inner.on_fulfilled),
                mem::take(&mut inner.on_rejected),
                mem::take(&mut inner.waiters),
                inner.observed,
            )
        };
        match outcome {
            Ok(value) => {
                drop(on_rejected);
                for callback in on_fulfilled {
                    callback(value.clone());
                }
            }
            Err(reason) => {
                if on_rejected.is_empty() && !observed && self.origin == Origin::User {
                    warn!(
                        reason_type = std::any::type_name::<E>(),
                        "possible unhandled rejection"
                    );
                }
                drop(on_fulfilled);
                for callback in on_rejected {
                    callback(reason.clone());
                }
            }
        }
        for waker in waiters {
            waker.wake();
        }
    }

    /// Adds a pair of continuations. Before the broadcast they are queued;
    /// after it the matching one is scheduled on its own.
    pub(crate) fn register(
        &self,
        on_fulfilled: Box<dyn FnOnce(T)>,
        on_rejected: Box<dyn FnOnce(E)>,
    ) {
        let outcome = {
            let mut inner = self.inner.borrow_mut();
            if inner.abandoned {
                return;
            }
            if !inner.delivered {
                inner.on_fulfilled.push(on_fulfilled);
                inner.on_rejected.push(on_rejected);
                return;
            }
            inner.state.outcome()
        };
        match outcome {
            Some(Ok(value)) => self.scheduler.schedule(Box::new(move || on_fulfilled(value))),
            Some(Err(reason)) => self.scheduler.schedule(Box::new(move || on_rejected(reason))),
            None => {}
        }
    }
}

/// A value that will be available later, or a reason it never will.
///
/// A `Future` settles at most once, as fulfilled with a `T` or rejected with
/// an `E`, and broadcasts that outcome to every continuation registered with
/// [`then`](Self::then) and friends. Continuations always run from the
/// future's [`Scheduler`], never inside the call that settled the future or
/// registered them.
///
/// Cloning a `Future` clones the handle; every clone observes the same
/// settlement.
///
/// # Examples
///
/// ```
/// use deferred::{scheduler, Future};
///
/// let greeting = Future::<&str, String>::new(|resolver| {
///     resolver.resolve("hello");
///     Ok(())
/// })
/// .then(|word| Ok(format!("{word}, world")));
///
/// assert_eq!(scheduler::current().wait(&greeting), Ok(Ok("hello, world".to_string())));
/// ```
pub struct Future<T, E> {
    pub(crate) shared: Rc<Shared<T, E>>,
}

impl<T, E> Clone for Future<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Future<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Future").field("status", &self.status()).finish()
    }
}

impl<T, E> Future<T, E> {
    pub fn status(&self) -> Status {
        self.shared.inner.borrow().state.status()
    }

    pub fn is_pending(&self) -> bool {
        self.status() == Status::Pending
    }
}

impl<T: Clone + 'static, E: Clone + 'static> Future<T, E> {
    /// Runs `executor` right away with the resolver of a new future.
    ///
    /// An `Err` from the executor rejects the future, unless the executor
    /// already settled it.
    pub fn new<X>(executor: X) -> Self
    where
        X: FnOnce(Resolver<T, E>) -> Result<(), E>,
    {
        Self::new_in(&Scheduler::current(), executor)
    }

    pub fn new_in<X>(scheduler: &Scheduler, executor: X) -> Self
    where
        X: FnOnce(Resolver<T, E>) -> Result<(), E>,
    {
        let (resolver, future) = Self::pending_in(scheduler);
        if let Err(reason) = executor(resolver.clone()) {
            resolver.reject(reason);
        }
        future
    }

    /// A pending future and the resolver that settles it.
    ///
    /// # Examples
    ///
    /// ```
    /// use deferred::{scheduler, Future};
    ///
    /// let (resolver, future) = Future::<u8, ()>::pending();
    /// resolver.resolve(1);
    /// resolver.resolve(2);
    /// assert_eq!(scheduler::current().wait(&future), Ok(Ok(1)));
    /// ```
    pub fn pending() -> (Resolver<T, E>, Self) {
        Self::pending_in(&Scheduler::current())
    }

    pub fn pending_in(scheduler: &Scheduler) -> (Resolver<T, E>, Self) {
        Self::with_origin(scheduler, Origin::User)
    }

    pub(crate) fn link_in(scheduler: &Scheduler) -> (Resolver<T, E>, Self) {
        Self::with_origin(scheduler, Origin::Link)
    }

    fn with_origin(scheduler: &Scheduler, origin: Origin) -> (Resolver<T, E>, Self) {
        let shared = Rc::new(Shared::new(scheduler.clone(), origin));
        (Resolver::new(shared.clone()), Self { shared })
    }

    pub fn resolve(value: T) -> Self {
        let (resolver, future) = Self::pending();
        resolver.resolve(value);
        future
    }

    pub fn reject(reason: E) -> Self {
        let (resolver, future) = Self::pending();
        resolver.reject(reason);
        future
    }

    /// A future that settles however `thenable` does.
    pub fn adopt(thenable: impl Thenable<T, E> + 'static) -> Self {
        let (resolver, future) = Self::pending();
        resolver.adopt(thenable);
        future
    }

    /// The settled outcome, once there is one.
    pub fn outcome(&self) -> Option<Result<T, E>> {
        self.shared.inner.borrow().state.outcome()
    }

    /// Awaitable view of this future's settlement.
    ///
    /// Creating a waiter counts as handling a rejection.
    pub fn settled(&self) -> Settled<T, E> {
        Settled::new(self.shared.clone())
    }

    /// Chains a fulfillment handler. Rejections pass through untouched.
    pub fn then<U, F, R>(&self, on_fulfilled: F) -> Future<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> R + 'static,
        R: IntoResolution<U, E>,
    {
        self.chain(
            move |value, resolver| resolver.settle(on_fulfilled(value)),
            |reason, resolver| resolver.reject(reason),
        )
    }

    /// Chains a handler for each outcome.
    pub fn then_else<U, F, R, G, S>(&self, on_fulfilled: F, on_rejected: G) -> Future<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> R + 'static,
        R: IntoResolution<U, E>,
        G: FnOnce(E) -> S + 'static,
        S: IntoResolution<U, E>,
    {
        self.chain(
            move |value, resolver| resolver.settle(on_fulfilled(value)),
            move |reason, resolver| resolver.settle(on_rejected(reason)),
        )
    }

    /// Chains a rejection handler. Fulfillments pass through untouched.
    pub fn catch<G, S>(&self, on_rejected: G) -> Future<T, E>
    where
        G: FnOnce(E) -> S + 'static,
        S: IntoResolution<T, E>,
    {
        self.chain(
            |value, resolver| resolver.resolve(value),
            move |reason, resolver| resolver.settle(on_rejected(reason)),
        )
    }

    /// Runs `on_settled` whichever way this future settles.
    ///
    /// The derived future keeps this future's outcome unless `on_settled`
    /// fails, or returns a future that rejects; then it rejects with that
    /// reason instead. A returned future is waited for first.
    pub fn finally<F, R>(&self, on_settled: F) -> Future<T, E>
    where
        F: FnOnce() -> R + 'static,
        R: IntoResolution<(), E>,
    {
        let on_fulfilled = Rc::new(Cell::new(Some(on_settled)));
        let on_rejected = on_fulfilled.clone();
        self.chain(
            move |value, resolver| run_finally(on_fulfilled.take(), resolver, Ok(value)),
            move |reason, resolver| run_finally(on_rejected.take(), resolver, Err(reason)),
        )
    }

    fn chain<U, OnF, OnR>(&self, on_fulfilled: OnF, on_rejected: OnR) -> Future<U, E>
    where
        U: Clone + 'static,
        OnF: FnOnce(T, Resolver<U, E>) + 'static,
        OnR: FnOnce(E, Resolver<U, E>) + 'static,
    {
        let (resolver, derived) = Future::link_in(&self.shared.scheduler);
        let other = resolver.clone();
        self.shared.register(
            Box::new(move |value| on_fulfilled(value, resolver)),
            Box::new(move |reason| on_rejected(reason, other)),
        );
        derived
    }
}

fn run_finally<T, E, F, R>(on_settled: Option<F>, resolver: Resolver<T, E>, outcome: Result<T, E>)
where
    T: Clone + 'static,
    E: Clone + 'static,
    F: FnOnce() -> R,
    R: IntoResolution<(), E>,
{
    let Some(on_settled) = on_settled else {
        return;
    };
    match on_settled().into_resolution() {
        Ok(Resolution::Value(())) => resolver.settle(outcome),
        Ok(Resolution::Adopt(thenable)) => {
            let rejecter = resolver.clone();
            thenable.subscribe(
                Box::new(move |()| resolver.settle(outcome)),
                Box::new(move |reason| rejecter.reject(reason)),
            );
        }
        Err(reason) => resolver.reject(reason),
    }
}

impl<T: Clone + 'static, E: Clone + 'static> Thenable<T, E> for Future<T, E> {
    fn subscribe(
        self: Box<Self>,
        on_fulfilled: Box<dyn FnOnce(T)>,
        on_rejected: Box<dyn FnOnce(E)>,
    ) {
        self.shared.register(on_fulfilled, on_rejected);
    }
}

impl<T: Clone + 'static, E: Clone + 'static> IntoFuture for Future<T, E> {
    type Output = Result<Result<T, E>, Error>;
    type IntoFuture = Settled<T, E>;

    fn into_future(self) -> Self::IntoFuture {
        self.settled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MicrotaskQueue;

    fn queue_and_scheduler() -> (MicrotaskQueue, Scheduler) {
        let queue = MicrotaskQueue::new();
        let scheduler = queue.scheduler();
        (queue, scheduler)
    }

    #[test]
    fn test_settle_once() {
        let (queue, scheduler) = queue_and_scheduler();
        let (resolver, future) = Future::<i32, &str>::pending_in(&scheduler);
        resolver.resolve(1);
        resolver.reject("late");
        resolver.clone().resolve(2);
        assert_eq!(future.status(), Status::Fulfilled);
        assert_eq!(future.outcome(), Some(Ok(1)));
        queue.run_until_idle();
        resolver.reject("later still");
        assert_eq!(future.outcome(), Some(Ok(1)));
    }

    #[test]
    fn test_delivery_is_deferred() {
        let (queue, scheduler) = queue_and_scheduler();
        let seen = Rc::new(Cell::new(None));
        let future = Future::<i32, ()>::new_in(&scheduler, |resolver| {
            resolver.resolve(7);
            Ok(())
        });
        let s = seen.clone();
        future.then(move |value| {
            s.set(Some(value));
            Ok(())
        });
        assert_eq!(seen.get(), None);
        queue.run_until_idle();
        assert_eq!(seen.get(), Some(7));
    }

    #[test]
    fn test_late_registration_still_deferred() {
        let (queue, scheduler) = queue_and_scheduler();
        let (resolver, future) = Future::<i32, ()>::pending_in(&scheduler);
        resolver.resolve(3);
        queue.run_until_idle();

        let seen = Rc::new(Cell::new(None));
        let s = seen.clone();
        future.then(move |value| {
            s.set(Some(value));
            Ok(())
        });
        assert_eq!(seen.get(), None);
        assert_eq!(queue.run_until_idle(), 1);
        assert_eq!(seen.get(), Some(3));
    }

    #[test]
    fn test_executor_error_rejects() {
        let (queue, scheduler) = queue_and_scheduler();
        let future = Future::<i32, String>::new_in(&scheduler, |_| Err("boom".to_string()));
        assert_eq!(future.status(), Status::Rejected);
        assert_eq!(queue.wait(&future), Ok(Err("boom".to_string())));
    }

    #[test]
    fn test_executor_error_after_resolve_is_ignored() {
        let (queue, scheduler) = queue_and_scheduler();
        let future = Future::<i32, String>::new_in(&scheduler, |resolver| {
            resolver.resolve(1);
            Err("too late".to_string())
        });
        assert_eq!(queue.wait(&future), Ok(Ok(1)));
    }

    #[test]
    fn test_broadcast_queues_are_cleared() {
        let (queue, scheduler) = queue_and_scheduler();
        let (resolver, future) = Future::<i32, ()>::pending_in(&scheduler);
        future.then(|_| Ok(()));
        future.catch(|_| Ok(0));
        resolver.resolve(1);
        queue.run_until_idle();
        let inner = future.shared.inner.borrow();
        assert!(inner.delivered);
        assert!(inner.on_fulfilled.is_empty());
        assert!(inner.on_rejected.is_empty());
    }

    #[test]
    fn test_chained_futures_are_links() {
        let (_queue, scheduler) = queue_and_scheduler();
        let (_resolver, future) = Future::<i32, ()>::pending_in(&scheduler);
        assert_eq!(future.shared.origin, Origin::User);
        assert_eq!(future.then(|v| Ok(v)).shared.origin, Origin::Link);
        assert_eq!(future.catch(|_| Ok(0)).shared.origin, Origin::Link);
    }

    #[test]
    fn test_debug_shows_status() {
        let (_queue, scheduler) = queue_and_scheduler();
        let (resolver, future) = Future::<i32, ()>::pending_in(&scheduler);
        assert_eq!(format!("{future:?}"), "Future { status: Pending }");
        resolver.reject(());
        assert_eq!(format!("{future:?}"), "Future { status: Rejected }");
    }
}
