//! Settle-once futures with promise-style chaining.
//!
//! A [`Future`] is the eventual outcome of some operation: fulfilled with a
//! value or rejected with a reason, exactly once. Continuations chained with
//! [`then`](Future::then), [`catch`](Future::catch) and
//! [`finally`](Future::finally) each produce a new future, so values and
//! failures flow down a chain, and [`Future::all`] joins many futures into
//! one.
//!
//! Everything runs on one thread. Continuations are delivered through a
//! [`Scheduler`] in FIFO order and never inside the call that caused them;
//! by default that is the thread's [`MicrotaskQueue`].
//!
//! # Examples
//!
//! ```
//! use deferred::{scheduler, Future};
//!
//! let total = Future::<i32, String>::resolve(1)
//!     .then(|x| Ok(x + 1))
//!     .then(|x| if x > 1 { Err(format!("{x} is too big")) } else { Ok(x) })
//!     .catch(|reason| {
//!         assert_eq!(reason, "2 is too big");
//!         Ok(0)
//!     });
//!
//! assert_eq!(scheduler::current().wait(&total), Ok(Ok(0)));
//! ```
use thiserror::Error;

pub mod all;
pub mod future;
pub mod resolver;
pub mod scheduler;
pub mod settled;
pub mod thenable;

pub use future::{Future, Status};
pub use resolver::Resolver;
pub use scheduler::{MicrotaskQueue, Schedule, Scheduler, Task};
pub use settled::Settled;
pub use thenable::{IntoResolution, Resolution, Thenable};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("every resolver was dropped before the future settled")]
    Abandoned,
    #[error("the scheduler went idle while the future was still pending")]
    Stalled,
}
