//! Error types returned by [`crate::Init::run`].
//!
//! A call can fail for exactly three reasons, and each one is a distinct
//! variant so callers can tell them apart without inspecting messages:
//!
//! - the action itself returned an error ([`Error::Action`]);
//! - the caller's own context fired first ([`Error::Context`]);
//! - the primitive was destroyed because an action panicked
//!   ([`Error::Poisoned`]).
//!
//! # Examples
//!
//! ```
//! use memoflight::{ContextError, Error};
//!
//! fn describe(e: &Error<String>) -> &'static str {
//!     match e {
//!         Error::Action(_) => "setup failed, calling again will retry",
//!         Error::Context(ContextError::Canceled) => "we gave up waiting",
//!         Error::Context(ContextError::DeadlineExceeded) => "we ran out of time",
//!         Error::Poisoned => "setup panicked, this handle is unusable",
//!     }
//! }
//!
//! let e: Error<String> = ContextError::Canceled.into();
//! assert_eq!(describe(&e), "we gave up waiting");
//! ```

/// The error a [`crate::Cancellation`] carries once it has fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ContextError {
    /// The context was canceled explicitly, or a parent context was.
    #[error("context canceled")]
    Canceled,
    /// The context's deadline passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// The error returned by [`crate::Init::run`].
///
/// `E` is the action's own error type. Every waiter joined to a failed
/// attempt receives a clone of the same `E`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error<E> {
    /// The attempt this caller was joined to failed.
    ///
    /// The handle has returned to idle; the next call starts a fresh attempt.
    #[error("action failed: {0}")]
    Action(E),

    /// The caller's context fired before an outcome reached it.
    ///
    /// The attempt keeps running in the background and, if it succeeds, its
    /// value is still memoized for later callers.
    #[error(transparent)]
    Context(#[from] ContextError),

    /// An action terminated abnormally (panicked), or a required thread could
    /// not be spawned.
    ///
    /// This is permanent: every current and future caller of the handle
    /// receives this error.
    #[error("action terminated abnormally; the handle is poisoned")]
    Poisoned,
}

impl<E> Error<E> {
    /// Returns the action's error, if this is [`Error::Action`].
    pub fn action(&self) -> Option<&E> {
        match self {
            Error::Action(e) => Some(e),
            _ => None,
        }
    }

    /// Returns `true` if the caller's own context ended the wait.
    pub fn is_context(&self) -> bool {
        matches!(self, Error::Context(_))
    }
}
