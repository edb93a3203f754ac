use eventide::{AsyncError, Clock, Completer, Future, RuntimeBuilder, UncaughtErrorPolicy, task, yield_now};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

#[test]
fn test_block_on_returns_the_output() {
    let rt = RuntimeBuilder::new().build();

    let result = rt.block_on(async { Future::value(21).await.unwrap() * 2 });

    assert_eq!(result, 42);
}

#[test]
fn test_block_on_keeps_runtime_reusable() {
    let rt = RuntimeBuilder::new().clock(Clock::Virtual).build();

    let first = rt.block_on(async { Future::value(1).await.unwrap() });
    let second = rt.block_on(async {
        eventide::time::sleep(Duration::from_millis(10)).await;
        2
    });

    assert_eq!(first + second, 3);
}

#[test]
#[should_panic(expected = "block_on stalled")]
fn test_block_on_stalls_on_a_future_nobody_completes() {
    let rt = RuntimeBuilder::new().build();

    rt.block_on(async {
        let completer = Completer::<u32>::new();
        completer.future().await
    });
}

#[eventide::test]
async fn test_spawned_task_completes_its_future() {
    let doubled = task::spawn(async { Future::value(21).await.unwrap() * 2 });

    assert_eq!(doubled.await.unwrap(), 42);
}

#[eventide::test]
async fn test_panicking_task_completes_with_error() {
    let failed = task::spawn(async {
        if Future::value(true).await.unwrap() {
            panic!("task exploded");
        }
        0u32
    });

    let error = failed.await.unwrap_err();
    assert!(error.message().contains("task exploded"));
}

#[eventide::test]
async fn test_yield_now_lets_microtasks_run() {
    let ran = Rc::new(Cell::new(false));
    let flag = ran.clone();

    eventide::schedule_microtask(move || flag.set(true));
    assert!(!ran.get());

    yield_now().await;
    assert!(ran.get(), "Yielding should let queued microtasks run first");
}

#[test]
fn test_run_drains_microtasks() {
    let rt = RuntimeBuilder::new().build();
    let seen = Rc::new(Cell::new(0));
    let slot = seen.clone();

    rt.run(move || {
        Future::value(5).then(move |v| {
            slot.set(v);
            Ok(())
        });
    });

    assert_eq!(seen.get(), 5);
}

#[test]
fn test_runtime_spawn_waits_to_be_driven() {
    let rt = RuntimeBuilder::new().build();
    let polled = Rc::new(Cell::new(false));
    let flag = polled.clone();

    let future = rt.spawn(async move {
        flag.set(true);
        7u32
    });
    assert!(!polled.get());

    let result = rt.block_on(async move { future.await });
    assert!(polled.get());
    assert_eq!(result.unwrap(), 7);
}

#[test]
#[should_panic(expected = "Uncaught error: lost")]
fn test_uncaught_error_panics_by_default() {
    let rt = RuntimeBuilder::new().build();

    rt.run(|| {
        Future::<u32>::error(AsyncError::msg("lost"));
    });
}

#[test]
fn test_uncaught_error_can_be_logged() {
    let rt = RuntimeBuilder::new().uncaught_errors(UncaughtErrorPolicy::Log).build();
    let after = Rc::new(RefCell::new(Vec::new()));
    let log = after.clone();

    rt.run(move || {
        Future::<u32>::error(AsyncError::msg("lost"));
        eventide::schedule_microtask(move || log.borrow_mut().push("still running"));
    });

    assert_eq!(*after.borrow(), vec!["still running"]);
}

#[test]
#[should_panic(expected = "must be called within the context of a runtime")]
fn test_spawn_outside_runtime_panics() {
    task::spawn(async {});
}
