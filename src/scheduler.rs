//! The deferred callback scheduler every future delivers through.
//!
//! A future never runs a callback inside the call that settled it or
//! registered the callback. Instead it hands a [`Task`] to its [`Scheduler`],
//! which must run tasks later, one at a time, in submission order.
//!
//! [`MicrotaskQueue`] is the in-process implementation. Each thread has an
//! ambient queue, returned by [`current`], which the plain constructors such
//! as [`Future::new`](crate::Future::new) bind to. Hosts with their own event
//! loop implement [`Schedule`] and pass a [`Scheduler`] to the `*_in`
//! constructors instead.
use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    fmt,
    future::Future as StdFuture,
    pin::pin,
    rc::Rc,
    task::{Context, Poll},
};

use futures::task::noop_waker_ref;
use tracing::trace;

use crate::{Error, Future};

/// A zero-argument callback waiting for its turn.
pub type Task = Box<dyn FnOnce()>;

/// Runs tasks after the current call stack unwinds, in FIFO order.
///
/// Implementations must never run `task` synchronously inside `schedule`.
pub trait Schedule {
    fn schedule(&self, task: Task);
}

impl<F> Schedule for F
where
    F: Fn(Task),
{
    fn schedule(&self, task: Task) {
        self(task)
    }
}

/// Shared handle to a [`Schedule`] implementation.
#[derive(Clone)]
pub struct Scheduler(Rc<dyn Schedule>);

impl Scheduler {
    pub fn new(schedule: impl Schedule + 'static) -> Self {
        Self(Rc::new(schedule))
    }

    /// The ambient scheduler of this thread.
    pub fn current() -> Self {
        current().scheduler()
    }

    pub(crate) fn schedule(&self, task: Task) {
        self.0.schedule(task)
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Scheduler(..)")
    }
}

thread_local! {
    static CURRENT: MicrotaskQueue = MicrotaskQueue::new();
}

/// This thread's ambient [`MicrotaskQueue`].
pub fn current() -> MicrotaskQueue {
    CURRENT.with(Clone::clone)
}

/// A single-threaded FIFO task queue.
///
/// Clones share the same queue.
///
/// # Examples
///
/// ```
/// use deferred::{Future, MicrotaskQueue};
///
/// let queue = MicrotaskQueue::new();
/// let doubled = Future::<i32, String>::new_in(&queue.scheduler(), |resolver| {
///     resolver.resolve(21);
///     Ok(())
/// })
/// .then(|value| Ok(value * 2));
///
/// assert_eq!(queue.wait(&doubled), Ok(Ok(42)));
/// ```
#[derive(Clone, Default)]
pub struct MicrotaskQueue {
    inner: Rc<Inner>,
}

#[derive(Default)]
struct Inner {
    tasks: RefCell<VecDeque<Task>>,
    running: Cell<bool>,
}

/// Clears the running flag even if a task panics.
struct Running<'a>(&'a Cell<bool>);

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl MicrotaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(self.clone())
    }

    /// Number of tasks waiting to run.
    pub fn len(&self) -> usize {
        self.inner.tasks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.tasks.borrow().is_empty()
    }

    /// Runs tasks until the queue is empty, including any tasks scheduled
    /// while running. Returns how many ran.
    ///
    /// A call made from inside a running task returns 0 and runs nothing.
    pub fn run_until_idle(&self) -> usize {
        if self.inner.running.replace(true) {
            return 0;
        }
        let _running = Running(&self.inner.running);
        let mut ran = 0;
        loop {
            // The borrow must end before the task runs: tasks schedule more tasks.
            let next = self.inner.tasks.borrow_mut().pop_front();
            match next {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => break,
            }
        }
        if ran > 0 {
            trace!(ran, "microtask queue drained");
        }
        ran
    }

    /// Polls `future` to completion, draining the queue between polls.
    ///
    /// Fails with [`Error::Stalled`] once the queue is idle and `future` is
    /// still pending: nothing left on this thread could wake it.
    pub fn block_on<F: StdFuture>(&self, future: F) -> Result<F::Output, Error> {
        let mut future = pin!(future);
        let mut cx = Context::from_waker(noop_waker_ref());
        loop {
            if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
                return Ok(output);
            }
            if self.run_until_idle() == 0 {
                return Err(Error::Stalled);
            }
        }
    }

    /// Drives the queue until `future` has delivered its settlement.
    pub fn wait<T, E>(&self, future: &Future<T, E>) -> Result<Result<T, E>, Error>
    where
        T: Clone + 'static,
        E: Clone + 'static,
    {
        self.block_on(future.settled())?
    }
}

impl Schedule for MicrotaskQueue {
    fn schedule(&self, task: Task) {
        self.inner.tasks.borrow_mut().push_back(task);
    }
}

impl fmt::Debug for MicrotaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MicrotaskQueue")
            .field("len", &self.len())
            .field("running", &self.inner.running.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tasks_run_in_submission_order() {
        let queue = MicrotaskQueue::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let log = log.clone();
            queue.schedule(Box::new(move || log.borrow_mut().push(i)));
        }
        assert!(log.borrow().is_empty());
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.run_until_idle(), 3);
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_tasks_scheduled_while_running_go_to_the_back() {
        let queue = MicrotaskQueue::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let (q, l) = (queue.clone(), log.clone());
        queue.schedule(Box::new(move || {
            l.borrow_mut().push("first");
            let l2 = l.clone();
            q.schedule(Box::new(move || l2.borrow_mut().push("nested")));
        }));
        let l = log.clone();
        queue.schedule(Box::new(move || l.borrow_mut().push("second")));

        assert_eq!(queue.run_until_idle(), 3);
        assert_eq!(*log.borrow(), vec!["first", "second", "nested"]);
    }

    #[test]
    fn test_reentrant_run_is_a_no_op() {
        let queue = MicrotaskQueue::new();
        let inner_ran = Rc::new(Cell::new(usize::MAX));
        let (q, r) = (queue.clone(), inner_ran.clone());
        queue.schedule(Box::new(move || r.set(q.run_until_idle())));
        queue.schedule(Box::new(|| {}));
        assert_eq!(queue.run_until_idle(), 2);
        assert_eq!(inner_ran.get(), 0);
    }

    #[test]
    fn test_block_on_reports_stall() {
        let queue = MicrotaskQueue::new();
        let result = queue.block_on(std::future::pending::<()>());
        assert_eq!(result, Err(Error::Stalled));
    }

    #[test]
    fn test_closure_scheduler() {
        let queue = MicrotaskQueue::new();
        let forward = queue.clone();
        let scheduler = Scheduler::new(move |task: Task| forward.schedule(task));
        let hit = Rc::new(Cell::new(false));
        let h = hit.clone();
        scheduler.schedule(Box::new(move || h.set(true)));
        assert!(!hit.get());
        queue.run_until_idle();
        assert!(hit.get());
    }
}
