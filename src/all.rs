//! Waiting on many futures at once.
use std::{
    cell::{Cell, RefCell},
    mem,
    rc::Rc,
};

use crate::{
    scheduler::Scheduler,
    thenable::{IntoResolution, Resolution},
    Future, Resolver,
};

/// Result slots of one `all` call, shared by its inputs' continuations.
struct Gather<T, E> {
    slots: RefCell<Vec<Option<T>>>,
    remaining: Cell<usize>,
    resolver: Resolver<Vec<T>, E>,
}

impl<T: Clone + 'static, E: Clone + 'static> Gather<T, E> {
    fn fill(&self, index: usize, value: T) {
        if self.resolver.is_locked() {
            return;
        }
        self.slots.borrow_mut()[index] = Some(value);
        let remaining = self.remaining.get() - 1;
        self.remaining.set(remaining);
        if remaining == 0 {
            let values = mem::take(&mut *self.slots.borrow_mut());
            self.resolver.resolve(values.into_iter().flatten().collect());
        }
    }
}

impl<T: Clone + 'static, E: Clone + 'static> Future<T, E> {
    /// Fulfills with every input's value, in input order, once all inputs
    /// have fulfilled. Rejects with the first rejection.
    ///
    /// Inputs are anything that can resolve a future: `Future`s,
    /// [`Resolution`]s, or `Result`s for values already at hand.
    ///
    /// # Examples
    ///
    /// ```
    /// use deferred::{scheduler, Future, Resolution};
    ///
    /// let (late, slow) = Future::<&str, ()>::pending();
    /// let all = Future::all(vec![
    ///     Resolution::from(slow),
    ///     Resolution::Value("b"),
    ///     Resolution::from(Future::resolve("c")),
    /// ]);
    /// late.resolve("a");
    ///
    /// assert_eq!(scheduler::current().wait(&all), Ok(Ok(vec!["a", "b", "c"])));
    /// ```
    pub fn all<I>(inputs: I) -> Future<Vec<T>, E>
    where
        I: IntoIterator,
        I::Item: IntoResolution<T, E>,
    {
        Self::all_in(&Scheduler::current(), inputs)
    }

    pub fn all_in<I>(scheduler: &Scheduler, inputs: I) -> Future<Vec<T>, E>
    where
        I: IntoIterator,
        I::Item: IntoResolution<T, E>,
    {
        let inputs: Vec<_> = inputs.into_iter().collect();
        let (resolver, all) = Future::link_in(scheduler);
        if inputs.is_empty() {
            resolver.resolve(Vec::new());
            return all;
        }

        let gather = Rc::new(Gather {
            slots: RefCell::new((0..inputs.len()).map(|_| None).collect()),
            remaining: Cell::new(inputs.len()),
            resolver,
        });
        for (index, input) in inputs.into_iter().enumerate() {
            match input.into_resolution() {
                Ok(Resolution::Value(value)) => gather.fill(index, value),
                Ok(Resolution::Adopt(thenable)) => {
                    let fulfilled = gather.clone();
                    let rejected = gather.clone();
                    thenable.subscribe(
                        Box::new(move |value| fulfilled.fill(index, value)),
                        Box::new(move |reason| rejected.resolver.reject(reason)),
                    );
                }
                Err(reason) => gather.resolver.reject(reason),
            }
        }
        all
    }
}
