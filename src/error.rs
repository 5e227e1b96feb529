//! Error types for critical, runtime, and specialised errors.
//!
//! [`CriticalError`]s end a session: they are returned from [`run()`](crate::run()). Everything
//! that can go wrong once the session is up is a [`RuntimeError`], which the supervisor logs,
//! reports through the [`Hooks`](crate::config::Hooks), and then carries on from.

#[doc(inline)]
pub use critical::*;
#[doc(inline)]
pub use runtime::*;
#[doc(inline)]
pub use specialised::*;

mod critical;
mod runtime;
mod specialised;
