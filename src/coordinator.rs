//! The coordinator: sole owner of a handle's mutable state.
//!
//! Each handle gets one coordinator thread, started by the first call that
//! needs it. Callers never touch the attempt or its waiter set directly; they
//! send [`Request`]s over a rendezvous inbox, and the coordinator applies them
//! one at a time. That single serialization point is what makes the protocol
//! race-free.
//!
//! # States
//!
//! ```text
//!            Join (spawns runner)
//!   ┌──────┐ ─────────────────────► ┌─────────┐  success   ┌──────────┐
//!   │ Idle │                        │ Running │ ─────────► │ Finished │
//!   └──────┘ ◄───────────────────── └─────────┘            └──────────┘
//!             failure (fan out error)   │  ▲
//!                                       └──┘ Join / Leave
//! ```
//!
//! `Idle` is `attempt == None`, `Running` is `attempt == Some(..)`, and
//! `Finished` is the coordinator thread having returned.
//!
//! # Delivery
//!
//! Every waiter owns a private channel of capacity one, and the coordinator
//! sends at most one message on it: `Failed` when its attempt fails, or `Left`
//! when it asks to leave while still joined. A waiter removed from the set is
//! never sent anything again. On success (or poisoning) the waiter's sender is
//! simply dropped, and the waiter reads the frozen slot.

use crate::frozen::FrozenSlot;
use crate::sys::thread;
use crossbeam_channel::{Receiver, Sender};
use std::collections::HashMap;
use std::sync::Arc;

/// The caller-supplied action, boxed so that requests have one concrete type.
pub(crate) type Action<T, E> = Box<dyn FnOnce() -> Result<T, E> + Send + 'static>;

/// A message from a waiter to the coordinator.
pub(crate) enum Request<T, E> {
    /// Join the running attempt, or start one with `action` if idle.
    Join {
        id: u64,
        reply: Sender<Outcome<E>>,
        action: Action<T, E>,
    },
    /// Stop waiting. Honored only if `id` is still joined.
    Leave { id: u64 },
}

/// What the coordinator sends on a waiter's private channel.
pub(crate) enum Outcome<E> {
    Failed(E),
    Left,
}

/// State readable by callers without going through the coordinator.
#[derive(Debug)]
pub(crate) struct Shared<T> {
    pub(crate) slot: FrozenSlot<T>,
    /// Disconnects once the coordinator exits: after `slot` is published on
    /// success, or with `slot` still empty when poisoned.
    pub(crate) done: Receiver<()>,
}

struct Attempt<T, E> {
    number: u64,
    waiters: HashMap<u64, Sender<Outcome<E>>>,
    outcome: Receiver<Result<T, E>>,
}

struct Coordinator<T, E> {
    name: String,
    shared: Arc<Shared<T>>,
    inbox: Receiver<Request<T, E>>,
    inbox_open: bool,
    done: Option<Sender<()>>,
    attempt: Option<Attempt<T, E>>,
    attempts: u64,
}

/// Creates the shared state and inbox for a handle and starts its coordinator.
///
/// If the thread cannot be spawned the coordinator is dropped on the spot,
/// which closes both the inbox and the done channel: every caller then sees
/// a poisoned handle instead of hanging.
pub(crate) fn spawn<T, E>(name: &str) -> (Arc<Shared<T>>, Sender<Request<T, E>>)
where
    T: Send + Sync + 'static,
    E: Clone + Send + 'static,
{
    let (done_trigger, done) = crossbeam_channel::bounded(0);
    let shared = Arc::new(Shared {
        slot: FrozenSlot::new(),
        done,
    });
    let (requests, inbox) = crossbeam_channel::bounded(0);
    let coordinator = Coordinator {
        name: name.to_owned(),
        shared: shared.clone(),
        inbox,
        inbox_open: true,
        done: Some(done_trigger),
        attempt: None,
        attempts: 0,
    };
    let spawned = thread::Builder::new()
        .name(format!("{name}::coordinator"))
        .spawn(move || coordinator.run());
    if let Err(e) = spawned {
        logwise::error_sync!(
            "{name}: cannot spawn coordinator, handle is poisoned: {e}",
            name = logwise::privacy::LogIt(&name),
            e = logwise::privacy::LogIt(&e)
        );
    }
    (shared, requests)
}

impl<T, E> Coordinator<T, E>
where
    T: Send + Sync + 'static,
    E: Clone + Send + 'static,
{
    fn run(mut self) {
        loop {
            let inbox = if self.inbox_open {
                self.inbox.clone()
            } else {
                crossbeam_channel::never()
            };
            let outcome = match &self.attempt {
                Some(attempt) => attempt.outcome.clone(),
                None => crossbeam_channel::never(),
            };
            crossbeam_channel::select! {
                recv(inbox) -> request => match request {
                    Ok(request) => self.handle(request),
                    Err(_) => {
                        // handle dropped; let a running attempt finish first
                        self.inbox_open = false;
                        if self.attempt.is_none() {
                            return;
                        }
                    }
                },
                recv(outcome) -> reported => match reported {
                    Ok(Ok(value)) => return self.freeze(value),
                    Ok(Err(error)) => {
                        self.fail(error);
                        if !self.inbox_open {
                            return;
                        }
                    }
                    // runner dropped its sender without reporting
                    Err(_) => return self.poison(),
                },
            }
        }
    }

    fn handle(&mut self, request: Request<T, E>) {
        match request {
            Request::Join { id, reply, action } => {
                if self.attempt.is_none() {
                    self.attempt = Some(self.launch(action));
                }
                // otherwise `action` is dropped uninvoked
                if let Some(attempt) = &mut self.attempt {
                    attempt.waiters.insert(id, reply);
                }
            }
            Request::Leave { id } => {
                let joined = self
                    .attempt
                    .as_mut()
                    .and_then(|attempt| attempt.waiters.remove(&id));
                // not joined: its outcome is already in its channel
                if let Some(reply) = joined {
                    let _ = reply.try_send(Outcome::Left);
                }
            }
        }
    }

    fn launch(&mut self, action: Action<T, E>) -> Attempt<T, E> {
        self.attempts += 1;
        let (report, outcome) = crossbeam_channel::bounded(1);
        let spawned = thread::Builder::new()
            .name(format!("{}::attempt", self.name))
            .spawn(move || {
                // a panic drops `report` unsent
                let _ = report.send(action());
            });
        if let Err(e) = spawned {
            logwise::error_sync!(
                "{name}: cannot spawn attempt {n}: {e}",
                name = logwise::privacy::LogIt(&self.name),
                n = logwise::privacy::LogIt(&self.attempts),
                e = logwise::privacy::LogIt(&e)
            );
        }
        Attempt {
            number: self.attempts,
            waiters: HashMap::new(),
            outcome,
        }
    }

    fn freeze(mut self, value: T) {
        let _ = self.shared.slot.publish(value);
        drop(self.done.take());
        if let Some(attempt) = self.attempt.take() {
            logwise::info_sync!(
                "{name}: attempt {n} succeeded, value frozen for {waiters} waiters",
                name = logwise::privacy::LogIt(&self.name),
                n = logwise::privacy::LogIt(&attempt.number),
                waiters = logwise::privacy::LogIt(&attempt.waiters.len())
            );
        }
    }

    fn fail(&mut self, error: E) {
        let Some(attempt) = self.attempt.take() else {
            return;
        };
        logwise::warn_sync!(
            "{name}: attempt {n} failed, reporting to {waiters} waiters",
            name = logwise::privacy::LogIt(&self.name),
            n = logwise::privacy::LogIt(&attempt.number),
            waiters = logwise::privacy::LogIt(&attempt.waiters.len())
        );
        for reply in attempt.waiters.into_values() {
            let _ = reply.try_send(Outcome::Failed(error.clone()));
        }
    }

    fn poison(mut self) {
        // done closes with the slot empty before any waiter wakes
        drop(self.done.take());
        if let Some(attempt) = self.attempt.take() {
            logwise::error_sync!(
                "{name}: attempt {n} terminated abnormally, handle is poisoned ({waiters} waiters)",
                name = logwise::privacy::LogIt(&self.name),
                n = logwise::privacy::LogIt(&attempt.number),
                waiters = logwise::privacy::LogIt(&attempt.waiters.len())
            );
        }
    }
}
