//! Platform abstraction for the threads and clocks memoflight runs on.
//!
//! Every unit of concurrency in this crate is a thread: the coordinator that
//! owns a handle's state, the runner executing one attempt, and the watcher
//! that enforces a context deadline. This module picks the implementation of
//! those threads (and of the clock used for deadlines) for the current target,
//! so the rest of the crate never needs a platform conditional.
//!
//! - **Native platforms**: `std::thread` and `std::time`
//! - **WebAssembly**: `wasm_thread` (Web Workers) and `web_time`
//!
//! # Examples
//!
//! ```
//! # mod sys {
//! #     pub use std::time;
//! #     pub use std::thread;
//! # }
//! use sys::thread;
//! use sys::time::{Duration, Instant};
//!
//! let deadline = Instant::now() + Duration::from_millis(5);
//! let watcher = thread::Builder::new()
//!     .name("memoflight::deadline".to_owned())
//!     .spawn(move || Instant::now() < deadline)
//!     .unwrap();
//! let _ = watcher.join().unwrap();
//! ```

/// Platform-appropriate time API.
///
/// Deadlines handed to [`crate::Context::with_deadline`] are expressed in this
/// module's `Instant`.
#[cfg(not(target_arch = "wasm32"))]
pub use std::time;

#[cfg(target_arch = "wasm32")]
pub use web_time as time;

/// Platform-appropriate threading API.
///
/// Coordinator and attempt threads are spawned through `thread::Builder` so
/// they carry the handle's configured name, which shows up in panic messages
/// and debuggers.
#[cfg(not(target_arch = "wasm32"))]
pub use std::thread;

#[cfg(target_arch = "wasm32")]
pub use wasm_thread as thread;
