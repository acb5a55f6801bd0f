use memoflight::{Builder, Cancellation, Context, ContextError, Error, Init};
use std::sync::{Arc, Barrier};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

const N: usize = 10;

type Outcome = Result<u32, Error<String>>;

/// Runs `action` from `N` callers released together and collects what each one got.
fn fan_out<C, F>(init: &Arc<Init<u32, String>>, ctx: &C, action: F) -> Vec<Outcome>
where
    C: Cancellation + Clone + Send + 'static,
    F: Fn() -> Result<u32, String> + Send + Sync + 'static,
{
    let action = Arc::new(action);
    let start = Arc::new(Barrier::new(N));
    let (tx, rx) = crossbeam_channel::bounded(N);
    for _ in 0..N {
        let init = init.clone();
        let ctx = ctx.clone();
        let action = action.clone();
        let start = start.clone();
        let tx = tx.clone();
        std::thread::spawn(move || {
            start.wait();
            let got = init.run(&ctx, move || (*action)()).copied();
            tx.send(got).unwrap();
        });
    }
    (0..N).map(|_| rx.recv().unwrap()).collect()
}

/// Wraps an action so that `running` counts concurrent invocations.
fn tracked<F>(
    calls: Arc<AtomicUsize>,
    running: Arc<AtomicUsize>,
    action: F,
) -> impl Fn() -> Result<u32, String> + Send + Sync + 'static
where
    F: Fn() -> Result<u32, String> + Send + Sync + 'static,
{
    move || {
        calls.fetch_add(1, Ordering::SeqCst);
        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
        assert!(now <= 1, "{now} attempts running at once");
        let result = action();
        running.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[test]
fn dedupes_failure_then_success_then_reuses() {
    let init = Arc::new(Init::new());
    let ctx = Context::background();
    let calls = Arc::new(AtomicUsize::new(0));
    let running = Arc::new(AtomicUsize::new(0));

    let failing = tracked(calls.clone(), running.clone(), || {
        std::thread::sleep(Duration::from_millis(25));
        Err("fail".to_string())
    });
    for got in fan_out(&init, &ctx, failing) {
        assert_eq!(got, Err(Error::Action("fail".to_string())));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!init.is_done());

    let counter = Arc::new(AtomicU32::new(0));
    let c = counter.clone();
    let succeeding = tracked(calls.clone(), running.clone(), move || {
        std::thread::sleep(Duration::from_millis(25));
        Ok(c.fetch_add(1, Ordering::SeqCst) + 1)
    });
    for got in fan_out(&init, &ctx, succeeding) {
        assert_eq!(got, Ok(1));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(init.is_done());

    let c = counter.clone();
    let reuse = tracked(calls.clone(), running.clone(), move || {
        Ok(c.fetch_add(1, Ordering::SeqCst) + 1)
    });
    for got in fan_out(&init, &ctx, reuse) {
        assert_eq!(got, Ok(1));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(init.get(), Some(&1));
}

#[test]
fn canceled_callers_leave_and_work_completes_in_background() {
    let init = Arc::new(Init::new());
    let (ctx, cancel) = Context::background().with_cancel();
    let (release, gate) = crossbeam_channel::bounded::<()>(0);
    let counter = Arc::new(AtomicU32::new(0));

    let c = counter.clone();
    let blocked = move || {
        cancel.cancel();
        gate.recv().unwrap();
        Ok(c.fetch_add(1, Ordering::SeqCst) + 1)
    };
    for got in fan_out(&init, &ctx, blocked) {
        assert_eq!(got, Err(Error::Context(ContextError::Canceled)));
    }
    release.send(()).unwrap();

    let c = counter.clone();
    let background = Context::background();
    for got in fan_out(&init, &background, move || {
        Ok(c.fetch_add(42, Ordering::SeqCst) + 42)
    }) {
        assert_eq!(got, Ok(1));
    }
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[test]
fn cancellation_is_isolated_to_one_caller() {
    let init: Arc<Init<u32, String>> = Arc::new(Init::new());
    let (started_tx, started) = crossbeam_channel::bounded::<()>(1);
    let (release, gate) = crossbeam_channel::bounded::<()>(0);

    let patient = {
        let init = init.clone();
        std::thread::spawn(move || {
            let ctx = Context::background();
            init.run(&ctx, move || {
                started_tx.send(()).unwrap();
                gate.recv().unwrap();
                Ok(7)
            })
            .copied()
        })
    };
    started.recv().unwrap();

    let (ctx, cancel) = Context::background().with_cancel();
    let impatient = {
        let init = init.clone();
        std::thread::spawn(move || {
            init.run(&ctx, || -> Result<u32, String> { panic!("joined, never invoked") })
                .copied()
        })
    };
    std::thread::sleep(Duration::from_millis(10));
    cancel.cancel();
    assert_eq!(
        impatient.join().unwrap(),
        Err(Error::Context(ContextError::Canceled))
    );

    release.send(()).unwrap();
    assert_eq!(patient.join().unwrap(), Ok(7));
    assert!(!init.is_poisoned());
}

#[test]
fn deadline_reports_deadline_exceeded() {
    let init: Init<u32, String> = Init::new();
    let (ctx, _cancel) = Context::background().with_timeout(Duration::from_millis(10));
    let got = init.run(&ctx, || {
        std::thread::sleep(Duration::from_millis(100));
        Ok(3)
    });
    assert_eq!(got, Err(Error::Context(ContextError::DeadlineExceeded)));
    assert!(got.unwrap_err().is_context());

    // still memoized once the abandoned attempt finishes
    assert_eq!(init.run(&Context::background(), || Ok(4)), Ok(&3));
}

#[test]
fn already_canceled_context_never_blocks() {
    let init: Init<u32, String> = Init::new();
    let (ctx, cancel) = Context::background().with_cancel();
    cancel.cancel();
    let got = init.run(&ctx, || {
        std::thread::sleep(Duration::from_millis(20));
        Ok(5)
    });
    assert_eq!(got, Err(Error::Context(ContextError::Canceled)));
}

#[test]
fn already_canceled_context_never_launches_the_action() {
    let (ctx, cancel) = Context::background().with_cancel();
    cancel.cancel();
    let calls = Arc::new(AtomicUsize::new(0));
    let handles: Vec<Init<u32, String>> = (0..200).map(|_| Init::new()).collect();
    for init in &handles {
        let c = calls.clone();
        let got = init.run(&ctx, move || {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        });
        assert_eq!(got, Err(Error::Context(ContextError::Canceled)));
    }
    // a launched attempt would have bumped the counter by now
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(handles.iter().all(|init| init.get().is_none()));
}

#[test]
fn frozen_value_wins_over_canceled_context_on_fast_path() {
    let init: Init<u32, String> = Init::new();
    assert_eq!(init.run(&Context::background(), || Ok(9)), Ok(&9));
    let (ctx, cancel) = Context::background().with_cancel();
    cancel.cancel();
    for _ in 0..100 {
        assert_eq!(init.run(&ctx, || Ok(10)), Ok(&9));
    }
}

#[test]
fn callers_on_one_attempt_share_its_error() {
    let init = Arc::new(Init::new());
    let attempt = Arc::new(AtomicU32::new(0));
    let a = attempt.clone();
    let results = fan_out(&init, &Context::background(), move || {
        let n = a.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(20));
        Err(format!("attempt {n}"))
    });
    // callers on the same attempt all see that attempt's error
    let attempts = attempt.load(Ordering::SeqCst);
    let mut seen = Vec::new();
    for got in results {
        match got {
            Err(Error::Action(e)) if !seen.contains(&e) => seen.push(e),
            Err(Error::Action(_)) => {}
            other => panic!("unexpected {other:?}"),
        }
    }
    assert_eq!(seen.len() as u32, attempts);
}

#[test]
fn panicking_action_poisons_every_caller() {
    let init: Arc<Init<u32, String>> = Arc::new(Builder::new().name("poison-test").build());
    let results = fan_out(&init, &Context::background(), || {
        std::thread::sleep(Duration::from_millis(10));
        panic!("setup exploded")
    });
    for got in results {
        assert_eq!(got, Err(Error::Poisoned));
    }
    assert!(init.is_poisoned());
    assert!(!init.is_done());
    assert_eq!(init.run(&Context::background(), || Ok(1)), Err(Error::Poisoned));
}

#[test]
fn get_never_starts_an_attempt() {
    let init: Init<u32, String> = Init::new();
    assert_eq!(init.get(), None);
    assert!(!init.is_done());
    assert!(!init.is_poisoned());
    assert_eq!(init.name(), "memoflight");
    assert_eq!(init.run(&Context::background(), || Ok(11)), Ok(&11));
    assert_eq!(init.get(), Some(&11));
    assert!(format!("{init:?}").contains("11"));
}
