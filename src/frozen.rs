/*!
A write-once slot holding the memoized value of a handle.

`FrozenSlot<T>` is written exactly once, by the coordinator, when an attempt
succeeds. After that it is read-only for the rest of its life: never
overwritten, never cleared. Readers never block and never contact the
coordinator; a single acquire load tells them whether the value is there.

# Internal States

- `EMPTY` (0): nothing has been published
- `WRITING` (1): a publisher is moving the value into the cell
- `FROZEN` (2): the value is published and immutable

The `FROZEN` store (release) is the linearization point of a success: a reader
that observes it (acquire) observes the fully written value.

The slot only holds the value. The "done" broadcast that wakes blocked callers
is a channel closed by the coordinator right after [`FrozenSlot::publish`]
returns; see the `coordinator` module.
*/

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU8, Ordering};

const SLOT_EMPTY: u8 = 0;
const SLOT_WRITING: u8 = 1;
const SLOT_FROZEN: u8 = 2;

/// A thread-safe cell that can be published to only once.
pub(crate) struct FrozenSlot<T> {
    state: AtomicU8, //the SLOT constants
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> FrozenSlot<T> {
    pub(crate) const fn new() -> Self {
        FrozenSlot {
            state: AtomicU8::new(SLOT_EMPTY),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Publishes `value`, freezing the slot.
    ///
    /// Returns a reference to the published value, or gives `value` back if
    /// the slot was already published (or is being published concurrently).
    pub(crate) fn publish(&self, value: T) -> Result<&T, T> {
        match self.state.compare_exchange(
            SLOT_EMPTY,
            SLOT_WRITING,
            Ordering::Acquire,
            Ordering::Relaxed,
        ) {
            Ok(_) => {
                let published: &T = unsafe {
                    // SAFETY: winning the EMPTY -> WRITING exchange gives us
                    // exclusive access; no reader touches the cell before FROZEN.
                    (*self.value.get()).write(value)
                };
                self.state.store(SLOT_FROZEN, Ordering::Release);
                Ok(published)
            }
            Err(_) => Err(value),
        }
    }

    /// Returns the published value, if any. Never blocks.
    pub(crate) fn get(&self) -> Option<&T> {
        match self.state.load(Ordering::Acquire) {
            SLOT_FROZEN => unsafe {
                // SAFETY: FROZEN is only stored after the value is written, and
                // the value is never mutated again.
                Some((*self.value.get()).assume_init_ref())
            },
            _ => None,
        }
    }

    pub(crate) fn is_frozen(&self) -> bool {
        self.state.load(Ordering::Acquire) == SLOT_FROZEN
    }
}

impl<T> Drop for FrozenSlot<T> {
    fn drop(&mut self) {
        if *self.state.get_mut() == SLOT_FROZEN {
            unsafe {
                // SAFETY: we have `&mut self` and the value was initialized.
                self.value.get_mut().assume_init_drop();
            }
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for FrozenSlot<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.get() {
            Some(value) => f.debug_tuple("FrozenSlot").field(value).finish(),
            None => f.write_str("FrozenSlot(<empty>)"),
        }
    }
}

// SAFETY: the value is moved in from the coordinator thread, hence `T: Send`.
unsafe impl<T: Send> Send for FrozenSlot<T> {}

// SAFETY: the slot hands out `&T` to many threads after a single guarded
// write, so `T` must be `Sync`; it is written from another thread, so `Send`.
unsafe impl<T: Send + Sync> Sync for FrozenSlot<T> {}
