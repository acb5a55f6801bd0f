//! The handle callers hold: [`Init`].
//!
//! A call to [`Init::run`] goes through three phases:
//!
//! 1. **Fast path.** If a value is already frozen, return it. This is one
//!    atomic load and involves neither the coordinator nor any allocation.
//! 2. **Register.** Lazily start the coordinator, then send it a `Join`
//!    carrying this caller's private reply channel and its action. Gives up
//!    early if the value freezes or the caller's context fires.
//! 3. **Await.** Wait for a delivered failure, the frozen value, or the
//!    caller's cancellation. On cancellation, ask the coordinator to leave and
//!    accept whatever it decides: an outcome already delivered wins over the
//!    leave request.

use crate::context::Cancellation;
use crate::coordinator::{self, Outcome, Request, Shared};
use crate::error::{ContextError, Error};
use crossbeam_channel::{RecvError, Sender};
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

const DEFAULT_NAME: &str = "memoflight";

/// A cancelable, deduplicating, memoizing executor for one value.
///
/// Many threads may call [`Init::run`] concurrently. Only one attempt runs at
/// a time; callers that arrive while it runs share its outcome. The first
/// success is frozen forever, while a failure is reported to everyone waiting
/// and then forgotten, so the next call retries.
///
/// `T` is the memoized value; `E` is the action's error, cloned to every
/// waiter of a failed attempt.
///
/// # Examples
///
/// ```
/// use memoflight::{Context, Error, Init};
///
/// static CONFIG: Init<String, String> = Init::new();
///
/// let ctx = Context::background();
/// let first = CONFIG.run(&ctx, || Err("not ready".to_string()));
/// assert_eq!(first, Err(Error::Action("not ready".to_string())));
///
/// // failure is not memoized
/// let second = CONFIG.run(&ctx, || Ok("loaded".to_string()));
/// assert_eq!(second.map(String::as_str), Ok("loaded"));
///
/// // success is, and the action is never called again
/// let third = CONFIG.run(&ctx, || -> Result<String, String> { panic!("not called") });
/// assert_eq!(third.map(String::as_str), Ok("loaded"));
/// ```
pub struct Init<T, E> {
    name: Option<String>,
    core: OnceLock<Core<T, E>>,
}

/// Everything created on first use.
struct Core<T, E> {
    shared: Arc<Shared<T>>,
    requests: Sender<Request<T, E>>,
    next_waiter: AtomicU64,
}

/// Configures an [`Init`].
///
/// ```
/// use memoflight::{Builder, Init};
///
/// let pool: Init<Vec<u8>, String> = Builder::new().name("pool").build();
/// assert_eq!(pool.name(), "pool");
/// ```
#[derive(Debug, Clone, Default)]
pub struct Builder {
    name: Option<String>,
}

impl Builder {
    /// A builder with no name set; handles it builds use `"memoflight"`.
    pub fn new() -> Self {
        Builder::default()
    }

    /// Sets the name used for the handle's threads
    /// (`<name>::coordinator`, `<name>::attempt`) and log lines.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Builds an idle handle. The value and error types come from the binding.
    pub fn build<T, E>(self) -> Init<T, E> {
        Init {
            name: self.name,
            core: OnceLock::new(),
        }
    }
}

impl<T, E> Init<T, E> {
    /// Creates an idle handle. No thread is started until the first call to
    /// [`Init::run`].
    pub const fn new() -> Self {
        Init {
            name: None,
            core: OnceLock::new(),
        }
    }

    /// The configured name, or `"memoflight"` if none was set.
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(DEFAULT_NAME)
    }

    /// Returns the frozen value without blocking and without starting an attempt.
    pub fn get(&self) -> Option<&T> {
        self.core.get().and_then(|core| core.shared.slot.get())
    }

    /// Whether an attempt has succeeded.
    pub fn is_done(&self) -> bool {
        self.get().is_some()
    }

    /// Whether an action panicked, leaving the handle permanently unusable.
    pub fn is_poisoned(&self) -> bool {
        self.core.get().is_some_and(|core| {
            // the slot is published before `done` disconnects
            core.shared
                .done
                .try_recv()
                .is_err_and(|e| e.is_disconnected())
                && !core.shared.slot.is_frozen()
        })
    }
}

impl<T, E> Init<T, E>
where
    T: Send + Sync + 'static,
    E: Clone + Send + 'static,
{
    /// Returns the memoized value, running `action` if needed.
    ///
    /// - If a value is frozen, it is returned and `action` is dropped.
    /// - If an attempt is running, this call joins it and `action` is dropped.
    /// - Otherwise `action` starts a new attempt on its own thread.
    ///
    /// Returns [`Error::Action`] if the joined attempt failed,
    /// [`Error::Context`] if `ctx` fired before an outcome reached this caller,
    /// and [`Error::Poisoned`] if an action ever panicked.
    ///
    /// Canceling `ctx` never stops the attempt. It keeps running and, on
    /// success, its value is frozen for later callers.
    pub fn run<C, F>(&self, ctx: &C, action: F) -> Result<&T, Error<E>>
    where
        C: Cancellation + ?Sized,
        F: FnOnce() -> Result<T, E> + Send + 'static,
    {
        if let Some(value) = self.get() {
            return Ok(value);
        }
        // a context that has already fired never registers, so it cannot launch
        if let Some(err) = ctx.err() {
            return Err(Error::Context(err));
        }
        let core = self.core();
        let canceled = ctx.done();
        let id = core.next_waiter.fetch_add(1, Ordering::Relaxed);
        let (reply, delivered) = crossbeam_channel::bounded(1);
        let action: coordinator::Action<T, E> = Box::new(action);

        crossbeam_channel::select! {
            recv(core.shared.done) -> _ => return core.settled(),
            recv(canceled) -> _ => return Err(canceled_error(ctx)),
            send(core.requests, Request::Join { id, reply, action }) -> sent => {
                if sent.is_err() {
                    // coordinator already exited
                    return core.settled();
                }
            }
        }

        crossbeam_channel::select! {
            recv(delivered) -> outcome => return core.resolve(outcome, ctx),
            recv(core.shared.done) -> _ => return core.settled(),
            recv(canceled) -> _ => {}
        }

        // The coordinator answers `Left` only if nothing was delivered to us yet.
        let _ = core.requests.send(Request::Leave { id });
        core.resolve(delivered.recv(), ctx)
    }

    fn core(&self) -> &Core<T, E> {
        self.core.get_or_init(|| {
            let (shared, requests) = coordinator::spawn(self.name());
            Core {
                shared,
                requests,
                next_waiter: AtomicU64::new(0),
            }
        })
    }
}

impl<T, E> Core<T, E> {
    /// The result for a waiter whose private channel was disconnected.
    fn settled(&self) -> Result<&T, Error<E>> {
        self.shared.slot.get().ok_or(Error::Poisoned)
    }

    fn resolve<C>(
        &self,
        outcome: Result<Outcome<E>, RecvError>,
        ctx: &C,
    ) -> Result<&T, Error<E>>
    where
        C: Cancellation + ?Sized,
    {
        match outcome {
            Ok(Outcome::Failed(error)) => Err(Error::Action(error)),
            Ok(Outcome::Left) => Err(canceled_error(ctx)),
            Err(RecvError) => self.settled(),
        }
    }
}

fn canceled_error<E, C>(ctx: &C) -> Error<E>
where
    C: Cancellation + ?Sized,
{
    Error::Context(ctx.err().unwrap_or(ContextError::Canceled))
}

impl<T, E> Default for Init<T, E> {
    fn default() -> Self {
        Init::new()
    }
}

impl<T: Debug, E> Debug for Init<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Init")
            .field("name", &self.name())
            .field("value", &self.get())
            .field("poisoned", &self.is_poisoned())
            .finish()
    }
}
