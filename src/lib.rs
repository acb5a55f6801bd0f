/*!
A cancelable, deduplicating, memoizing executor.

memoflight runs a notionally expensive, possibly failing action on behalf of
many concurrent callers, and makes sure that:

- only one invocation of the action runs at a time;
- callers arriving while it runs share its outcome instead of starting their own;
- once the action succeeds, the result is frozen and every later caller gets it
  without running anything;
- if the action fails, everyone currently waiting gets the error, and the next
  caller triggers a fresh attempt;
- any caller can stop waiting (by canceling its context) without disturbing the
  attempt or anyone else.

It is meant for idempotent, eventually-succeeding setup work: opening a
connection pool, loading a configuration, fetching credentials.

# Quick Start

```
use memoflight::{Context, Init};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

let init: Arc<Init<u64, String>> = Arc::new(Init::new());
let calls = Arc::new(AtomicUsize::new(0));

let callers: Vec<_> = (0..8)
    .map(|_| {
        let init = init.clone();
        let calls = calls.clone();
        std::thread::spawn(move || {
            let ctx = Context::background();
            let value = init.run(&ctx, move || {
                calls.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(std::time::Duration::from_millis(10));
                Ok(42)
            });
            *value.unwrap()
        })
    })
    .collect();

for caller in callers {
    assert_eq!(caller.join().unwrap(), 42);
}
// however the callers interleaved, the value was computed exactly once
assert_eq!(calls.load(Ordering::SeqCst), 1);
```

## Giving up without stopping the work

```
use memoflight::{Context, ContextError, Error, Init};
use std::time::Duration;

let init: Init<&'static str, String> = Init::new();
let (ctx, _cancel) = Context::background().with_timeout(Duration::from_millis(5));

let slow = init.run(&ctx, || {
    std::thread::sleep(Duration::from_millis(50));
    Ok("ready")
});
assert_eq!(slow, Err(Error::Context(ContextError::DeadlineExceeded)));

// the attempt kept running; a patient caller joins it (or finds it frozen)
let patient = init.run(&Context::background(), || Ok("never used"));
assert_eq!(patient, Ok(&"ready"));
```

# Architecture

```text
 caller ──┐                     ┌──────────────┐  spawns once   ┌────────────┐
 caller ──┼── Join / Leave ───► │ coordinator  │ ─────────────► │  attempt   │
 caller ──┘   (rendezvous)      │   thread     │ ◄───────────── │  thread    │
    ▲                           └──────────────┘   Ok / Err     └────────────┘
    │  Failed / Left (private channel)   │
    └────────────────────────────────────┘
    ▲
    └── fast path: frozen slot, one atomic load
```

- **Handle** ([`Init`]) owns a one-time lazy-initialization guard and the
  frozen slot.
- **Coordinator** is one thread per handle that owns every piece of mutable
  state and applies requests one at a time.
- **Attempt runner** is one thread per attempt; it runs the action and reports
  exactly one outcome.

No async runtime is involved. Threads for everyone.

# Errors

[`Init::run`] returns [`Error`], which distinguishes the action failing
([`Error::Action`]) from the caller giving up ([`Error::Context`]). An action
that panics poisons the handle for good ([`Error::Poisoned`]): the attempt
cannot be trusted, but nobody is left hanging.

# Module Organization

- [`Init`] and [`Builder`] - the handle
- [`Context`], [`CancelHandle`], [`Cancellation`] - cancellation signals
- [`Error`], [`ContextError`] - error types
*/
mod context;
mod coordinator;
mod error;
mod frozen;
mod init;
mod sys;

pub use context::{CancelHandle, Cancellation, Context};
pub use error::{ContextError, Error};
pub use init::{Builder, Init};
