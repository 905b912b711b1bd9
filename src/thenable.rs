//! What a future can be resolved with.
//!
//! A future resolved with another future-like value does not settle with
//! that value; it follows it and settles the same way. "Future-like" is the
//! [`Thenable`] capability: anything that will call back exactly one of two
//! continuations. [`Future`] is one, and foreign types join in by
//! implementing the trait.
use crate::Future;

/// A value that eventually settles and can report how.
///
/// `subscribe` must arrange for at most one of the continuations to be
/// called, at most once, and never before `subscribe` returns. A thenable
/// that breaks the "at most once" rule is tolerated: only the first call
/// has any effect on a follower. Dropping both continuations without
/// calling either abandons the follower.
pub trait Thenable<T, E> {
    fn subscribe(
        self: Box<Self>,
        on_fulfilled: Box<dyn FnOnce(T)>,
        on_rejected: Box<dyn FnOnce(E)>,
    );
}

/// Either a plain value or a future-like to follow.
pub enum Resolution<T, E> {
    Value(T),
    Adopt(Box<dyn Thenable<T, E>>),
}

impl<T, E> Resolution<T, E> {
    pub fn adopt(thenable: impl Thenable<T, E> + 'static) -> Self {
        Resolution::Adopt(Box::new(thenable))
    }

    pub fn is_future_like(&self) -> bool {
        matches!(self, Resolution::Adopt(_))
    }
}

impl<T: Clone + 'static, E: Clone + 'static> From<Future<T, E>> for Resolution<T, E> {
    fn from(future: Future<T, E>) -> Self {
        Resolution::adopt(future)
    }
}

/// Conversion of a callback's return value into its effect on a future.
///
/// `Ok(value)` fulfills, `Err(reason)` rejects, and a [`Future`] or
/// [`Resolution`] is resolved with.
pub trait IntoResolution<T, E> {
    fn into_resolution(self) -> Result<Resolution<T, E>, E>;
}

impl<T, E> IntoResolution<T, E> for Result<T, E> {
    fn into_resolution(self) -> Result<Resolution<T, E>, E> {
        self.map(Resolution::Value)
    }
}

impl<T, E> IntoResolution<T, E> for Resolution<T, E> {
    fn into_resolution(self) -> Result<Resolution<T, E>, E> {
        Ok(self)
    }
}

impl<T: Clone + 'static, E: Clone + 'static> IntoResolution<T, E> for Future<T, E> {
    fn into_resolution(self) -> Result<Resolution<T, E>, E> {
        Ok(Resolution::adopt(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_results_are_not_future_like() {
        let ok: Result<i32, String> = Ok(1);
        assert!(matches!(ok.into_resolution(), Ok(Resolution::Value(1))));

        let err: Result<i32, String> = Err("nope".into());
        assert!(matches!(err.into_resolution(), Err(reason) if reason == "nope"));
    }

    #[test]
    fn test_futures_are_future_like() {
        let future = Future::<i32, String>::resolve(1);
        let resolution = future.into_resolution().ok().unwrap();
        assert!(resolution.is_future_like());
        assert!(!Resolution::<i32, String>::Value(1).is_future_like());
    }
}
