//! Cancellation contexts.
//!
//! [`crate::Init::run`] needs only two things from a caller's context: a
//! channel that becomes ready when the caller gives up, and the error to
//! report when that happens. Those two operations form the [`Cancellation`]
//! trait, so any cancellation scheme can drive the primitive.
//!
//! [`Context`] is the implementation shipped with the crate. Contexts form a
//! tree: canceling a context cancels every context derived from it, while a
//! child never affects its parent.
//!
//! ```text
//! background ──► with_cancel ──► with_timeout(50ms)
//!                     │
//!                     └────────► with_cancel
//! ```
//!
//! # Examples
//!
//! ```
//! use memoflight::{Cancellation, Context, ContextError};
//! use std::time::Duration;
//!
//! let (parent, cancel) = Context::background().with_cancel();
//! let (child, _child_cancel) = parent.with_timeout(Duration::from_secs(60));
//! assert!(!child.is_canceled());
//!
//! cancel.cancel();
//! assert_eq!(child.err(), Some(ContextError::Canceled));
//! // the done channel is disconnected once canceled
//! assert!(child.done().recv().is_err());
//! ```

use crate::error::ContextError;
use crate::sys::time::{Duration, Instant};
use crossbeam_channel::{Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// The cancellation signal a caller hands to [`crate::Init::run`].
///
/// Implementations must uphold one rule: once the receiver returned by
/// [`Cancellation::done`] is ready (it is disconnected, or yields a message),
/// [`Cancellation::err`] returns `Some` from then on.
pub trait Cancellation {
    /// A channel that becomes ready when the context is canceled.
    ///
    /// A context that can never be canceled returns
    /// [`crossbeam_channel::never`].
    fn done(&self) -> Receiver<()>;

    /// The error carried by the context, or `None` while it is live.
    fn err(&self) -> Option<ContextError>;
}

/// A cancelable context, optionally bounded by a deadline.
///
/// Cloning a `Context` is cheap and the clones share cancellation state.
#[derive(Debug, Clone)]
pub struct Context {
    // `None` for the background context, which is never canceled.
    inner: Option<Arc<Inner>>,
}

/// Cancels the [`Context`] it was created with.
///
/// Canceling is idempotent and may happen from any thread, including from
/// inside an action running on behalf of that context.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    done: Receiver<()>,
    deadline: Option<Instant>,
    state: Mutex<State>,
}

#[derive(Debug)]
struct State {
    err: Option<ContextError>,
    // Dropping this disconnects `Inner::done`.
    trigger: Option<Sender<()>>,
    children: Vec<Weak<Inner>>,
}

impl Inner {
    fn new(deadline: Option<Instant>) -> Arc<Self> {
        let (trigger, done) = crossbeam_channel::bounded(0);
        Arc::new(Inner {
            done,
            deadline,
            state: Mutex::new(State {
                err: None,
                trigger: Some(trigger),
                children: Vec::new(),
            }),
        })
    }

    fn err(&self) -> Option<ContextError> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).err
    }

    fn cancel(&self, err: ContextError) {
        let children = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.err.is_some() {
                return;
            }
            state.err = Some(err);
            // err is visible before anyone can observe the disconnect
            drop(state.trigger.take());
            std::mem::take(&mut state.children)
        };
        for child in children {
            if let Some(child) = child.upgrade() {
                child.cancel(err);
            }
        }
    }

    /// Links `child` under `self`, or cancels it right away if `self` already fired.
    fn adopt(&self, child: &Arc<Inner>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let parent_err = state.err;
        match parent_err {
            Some(err) => {
                drop(state);
                child.cancel(err);
            }
            None => {
                state.children.retain(|c| c.strong_count() > 0);
                state.children.push(Arc::downgrade(child));
            }
        }
    }
}

impl Context {
    /// The root context. It is never canceled and has no deadline.
    pub const fn background() -> Self {
        Context { inner: None }
    }

    /// Derives a child context that is canceled when the returned handle is
    /// used, or when `self` is canceled, whichever comes first.
    pub fn with_cancel(&self) -> (Context, CancelHandle) {
        self.derive(self.deadline())
    }

    /// Derives a child context that is canceled with
    /// [`ContextError::DeadlineExceeded`] at `deadline`.
    ///
    /// If `self` has an earlier deadline, the earlier one wins.
    pub fn with_deadline(&self, deadline: Instant) -> (Context, CancelHandle) {
        let deadline = match self.deadline() {
            Some(parent) if parent < deadline => parent,
            _ => deadline,
        };
        let (child, cancel) = self.derive(Some(deadline));
        watch_deadline(&cancel.inner, deadline);
        (child, cancel)
    }

    /// Shorthand for `with_deadline(Instant::now() + timeout)`.
    pub fn with_timeout(&self, timeout: Duration) -> (Context, CancelHandle) {
        self.with_deadline(Instant::now() + timeout)
    }

    /// The instant at which this context will be canceled, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.as_ref().and_then(|inner| inner.deadline)
    }

    /// Whether this context has been canceled.
    pub fn is_canceled(&self) -> bool {
        self.err().is_some()
    }

    fn derive(&self, deadline: Option<Instant>) -> (Context, CancelHandle) {
        let inner = Inner::new(deadline);
        if let Some(parent) = &self.inner {
            parent.adopt(&inner);
        }
        (
            Context {
                inner: Some(inner.clone()),
            },
            CancelHandle { inner },
        )
    }
}

impl Default for Context {
    fn default() -> Self {
        Context::background()
    }
}

impl Cancellation for Context {
    fn done(&self) -> Receiver<()> {
        match &self.inner {
            Some(inner) => inner.done.clone(),
            None => crossbeam_channel::never(),
        }
    }

    fn err(&self) -> Option<ContextError> {
        self.inner.as_ref().and_then(|inner| inner.err())
    }
}

impl CancelHandle {
    /// Cancels the context and everything derived from it.
    pub fn cancel(&self) {
        self.inner.cancel(ContextError::Canceled);
    }
}

/// Cancels `inner` with `DeadlineExceeded` at `deadline` unless it is canceled first.
fn watch_deadline(inner: &Arc<Inner>, deadline: Instant) {
    let now = Instant::now();
    if deadline <= now {
        inner.cancel(ContextError::DeadlineExceeded);
        return;
    }
    let remaining = deadline - now;
    let weak = Arc::downgrade(inner);
    let done = inner.done.clone();
    let spawned = crate::sys::thread::Builder::new()
        .name("memoflight::deadline".to_owned())
        .spawn(move || {
            crossbeam_channel::select! {
                recv(crossbeam_channel::after(remaining)) -> _ => {
                    if let Some(inner) = weak.upgrade() {
                        inner.cancel(ContextError::DeadlineExceeded);
                    }
                }
                recv(done) -> _ => {}
            }
        });
    if let Err(e) = spawned {
        logwise::error_sync!(
            "memoflight: cannot watch deadline, canceling context now: {e}",
            e = logwise::privacy::LogIt(&e)
        );
        inner.cancel(ContextError::DeadlineExceeded);
    }
}
