//! A flaky "connect" that fails twice before succeeding, hammered by workers.
//!
//! Each worker retries until it gets the shared connection id, giving up on a
//! single wait after 30ms. Run with `cargo run --example warmup`.
#[cfg(not(target_arch = "wasm32"))]
use std::time;
#[cfg(target_arch = "wasm32")]
use web_time as time;

use memoflight::{Context, Error, Init};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

static CONNECTION: Init<u32, String> = Init::new();

fn connect(tries: Arc<AtomicU32>) -> Result<u32, String> {
    let attempt = tries.fetch_add(1, Ordering::SeqCst) + 1;
    std::thread::sleep(time::Duration::from_millis(20));
    if attempt < 3 {
        Err(format!("connection refused (attempt {attempt})"))
    } else {
        Ok(1000 + attempt)
    }
}

fn main() {
    let tries = Arc::new(AtomicU32::new(0));
    let workers: Vec<_> = (0..6)
        .map(|worker| {
            let tries = tries.clone();
            std::thread::spawn(move || {
                loop {
                    let (ctx, _cancel) =
                        Context::background().with_timeout(time::Duration::from_millis(30));
                    let tries = tries.clone();
                    match CONNECTION.run(&ctx, move || connect(tries)) {
                        Ok(id) => {
                            logwise::info_sync!(
                                "worker {worker} connected as {id}",
                                worker = logwise::privacy::LogIt(&worker),
                                id = logwise::privacy::LogIt(id)
                            );
                            return;
                        }
                        Err(Error::Action(e)) => {
                            logwise::warn_sync!(
                                "worker {worker}: {e}, retrying",
                                worker = logwise::privacy::LogIt(&worker),
                                e = logwise::privacy::LogIt(&e)
                            );
                        }
                        Err(Error::Context(e)) => {
                            logwise::warn_sync!(
                                "worker {worker}: stopped waiting ({e}), retrying",
                                worker = logwise::privacy::LogIt(&worker),
                                e = logwise::privacy::LogIt(&e)
                            );
                        }
                        Err(Error::Poisoned) => panic!("connect panicked"),
                    }
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    logwise::info_sync!(
        "connect ran {n} times for 6 workers",
        n = logwise::privacy::LogIt(&tries.load(Ordering::SeqCst))
    );
}
