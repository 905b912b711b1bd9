//! The resolve/reject capability of a future.
use std::{fmt, rc::Rc};

use crate::{
    future::{Shared, State},
    thenable::{IntoResolution, Resolution, Thenable},
};

/// Settles the [`Future`](crate::Future) it was created with.
///
/// The first call to [`resolve`](Self::resolve), [`reject`](Self::reject),
/// [`adopt`](Self::adopt) or [`settle`](Self::settle), on this resolver or
/// any clone of it, decides the outcome. Every later call is a no-op.
///
/// When the last clone is dropped while the future is still pending, the
/// future is abandoned: it stays pending forever, and anything awaiting its
/// [`settled`](crate::Future::settled) view gets
/// [`Error::Abandoned`](crate::Error::Abandoned).
///
/// # Examples
///
/// ```
/// use deferred::{scheduler, Future};
///
/// let (resolver, future) = Future::<String, String>::pending();
/// let later = resolver.clone();
/// later.reject("first".into());
/// resolver.resolve("second".into());
///
/// assert_eq!(scheduler::current().wait(&future), Ok(Err("first".to_string())));
/// ```
pub struct Resolver<T, E> {
    handle: Rc<Handle<T, E>>,
}

/// Lives as long as some resolver does.
struct Handle<T, E> {
    shared: Rc<Shared<T, E>>,
    abandon: Option<Box<dyn FnOnce()>>,
}

impl<T, E> Drop for Handle<T, E> {
    /// If this is an unsettled future, wake its waiters with an error.
    fn drop(&mut self) {
        if let Some(abandon) = self.abandon.take() {
            abandon();
        }
    }
}

/// Held by the callbacks handed to an adopted thenable. Dropped once both
/// are gone; if neither settled the future, nothing else can.
struct Adoption<T: Clone + 'static, E: Clone + 'static> {
    resolver: Resolver<T, E>,
}

impl<T: Clone + 'static, E: Clone + 'static> Drop for Adoption<T, E> {
    fn drop(&mut self) {
        self.resolver.shared().abandon();
    }
}

impl<T, E> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Resolver<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("locked", &self.is_locked())
            .finish()
    }
}

impl<T, E> Resolver<T, E> {
    fn shared(&self) -> &Rc<Shared<T, E>> {
        &self.handle.shared
    }

    /// Whether the outcome has already been decided.
    pub fn is_locked(&self) -> bool {
        self.shared().is_locked()
    }
}

impl<T: Clone + 'static, E: Clone + 'static> Resolver<T, E> {
    pub(crate) fn new(shared: Rc<Shared<T, E>>) -> Self {
        let abandoned = shared.clone();
        Self {
            handle: Rc::new(Handle {
                shared,
                abandon: Some(Box::new(move || abandoned.abandon())),
            }),
        }
    }

    pub fn resolve(&self, value: T) {
        if self.shared().lock() {
            self.shared().settle(State::Fulfilled(value));
        }
    }

    pub fn reject(&self, reason: E) {
        if self.shared().lock() {
            self.shared().settle(State::Rejected(reason));
        }
    }

    /// Follows `thenable`: the future settles however it does.
    ///
    /// The outcome is decided by this call even though the future stays
    /// pending until `thenable` settles.
    pub fn adopt(&self, thenable: impl Thenable<T, E> + 'static) {
        if self.shared().lock() {
            self.follow(Box::new(thenable));
        }
    }

    /// Resolves with a value, follows a future-like, or rejects on `Err`.
    pub fn settle(&self, outcome: impl IntoResolution<T, E>) {
        match outcome.into_resolution() {
            Ok(Resolution::Value(value)) => self.resolve(value),
            Ok(Resolution::Adopt(thenable)) => {
                if self.shared().lock() {
                    self.follow(thenable);
                }
            }
            Err(reason) => self.reject(reason),
        }
    }

    fn follow(&self, thenable: Box<dyn Thenable<T, E>>) {
        let fulfill = Rc::new(Adoption {
            resolver: self.clone(),
        });
        let reject = fulfill.clone();
        thenable.subscribe(
            Box::new(move |value| fulfill.resolver.shared().settle(State::Fulfilled(value))),
            Box::new(move |reason| reject.resolver.shared().settle(State::Rejected(reason))),
        );
    }
}
