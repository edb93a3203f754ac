use eventide::future::WaitOptions;
use eventide::time::{self, sleep};
use eventide::{AsyncError, Clock, Completer, Future, RuntimeBuilder, StackTrace, TimeoutError, UsageError, run_zoned_guarded};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

#[eventide::test(clock = "virtual")]
async fn test_delayed_then_adds_one() {
    let result = Future::<i32>::delayed_with(Duration::from_millis(100), || Ok(42))
        .then(|v| Ok(v + 1))
        .await;

    assert_eq!(result.unwrap(), 43);
    assert!(
        time::now() >= Duration::from_millis(100),
        "The delayed computation should run after the full delay"
    );
}

#[eventide::test]
async fn test_listeners_fire_in_registration_order() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let completer = Completer::<u32>::new();

    let first = log.clone();
    completer.future().then(move |v| {
        first.borrow_mut().push(format!("first {v}"));
        Ok(())
    });
    let second = log.clone();
    completer.future().then(move |v| {
        second.borrow_mut().push(format!("second {v}"));
        Ok(())
    });

    completer.complete(7);
    assert!(log.borrow().is_empty(), "An async completer never runs listeners inline");

    completer.future().await.unwrap();
    assert_eq!(*log.borrow(), vec!["first 7", "second 7"]);
}

#[eventide::test(clock = "virtual")]
async fn test_then_flattens_returned_futures() {
    let result = Future::value(4)
        .then(|v| Future::<i32>::delayed_with(Duration::from_millis(10), move || Ok(v * 10)))
        .await;

    assert_eq!(result.unwrap(), 40);
}

#[eventide::test]
async fn test_long_then_chain() {
    let mut future = Future::value(0u32);
    for _ in 0..10_000 {
        future = future.then(|v| Ok(v + 1));
    }

    assert_eq!(future.await.unwrap(), 10_000);
}

#[eventide::test]
async fn test_panicking_callback_becomes_error() {
    let result = Future::value(1).then(|_: i32| -> Result<i32, AsyncError> { panic!("callback exploded") }).await;

    let error = result.unwrap_err();
    assert!(error.message().contains("callback exploded"));
}

#[eventide::test]
async fn test_catch_error_recovers() {
    let recovered = Future::<usize>::error(AsyncError::msg("boom"))
        .catch_error(|error| Ok(error.message().len()))
        .await;

    assert_eq!(recovered.unwrap(), 4);
}

#[eventide::test]
async fn test_catch_error_where_skips_other_errors() {
    let result = Future::<u32>::error(AsyncError::new(TimeoutError(Duration::from_secs(1))))
        .catch_error_where(|_| Ok(0), |error| error.is::<UsageError>())
        .await;

    assert!(result.unwrap_err().is::<TimeoutError>());
}

#[eventide::test]
async fn test_when_complete_keeps_the_error() {
    let ran = Rc::new(RefCell::new(false));
    let flag = ran.clone();

    let result = Future::<u32>::error(AsyncError::msg("kept"))
        .when_complete(move || {
            *flag.borrow_mut() = true;
            Ok(())
        })
        .await;

    assert!(*ran.borrow());
    assert_eq!(result.unwrap_err().message(), "kept");
}

#[eventide::test]
async fn test_when_complete_rethrow_keeps_the_original() {
    let original = AsyncError::msg("first");
    let rethrown = original.replace_stack_trace(StackTrace::from_text("rethrown here"));

    let result = Future::<u32>::error(original.clone())
        .when_complete(move || Err::<(), _>(rethrown))
        .await;

    let error = result.unwrap_err();
    assert!(error.same(&original));
    assert_ne!(error.stack_trace().as_str(), Some("rethrown here"), "The original stack trace is kept");
}

#[eventide::test]
async fn test_when_complete_failure_replaces_the_outcome() {
    let result = Future::<u32>::error(AsyncError::msg("first"))
        .when_complete(|| Err::<(), _>(AsyncError::msg("cleanup failed")))
        .await;

    assert_eq!(result.unwrap_err().message(), "cleanup failed");
}

#[eventide::test(clock = "virtual")]
async fn test_wait_keeps_input_order() {
    let values = Future::wait(vec![
        Future::<u32>::delayed_with(Duration::from_millis(20), || Ok(1)),
        Future::value(2),
        Future::<u32>::delayed_with(Duration::from_millis(5), || Ok(3)),
    ])
    .await;

    assert_eq!(values.unwrap(), vec![1, 2, 3]);
}

#[eventide::test(clock = "virtual")]
async fn test_wait_cleans_up_successes_on_error() {
    let cleaned = Rc::new(RefCell::new(Vec::new()));
    let sink = cleaned.clone();

    let result = Future::wait_with(
        vec![
            Future::value(1u32),
            Future::error(AsyncError::msg("failed")),
            Future::<u32>::delayed_with(Duration::from_millis(5), || Ok(3)),
        ],
        WaitOptions::default().clean_up(move |v| sink.borrow_mut().push(v)),
    )
    .await;

    assert_eq!(result.unwrap_err().message(), "failed");

    let mut cleaned = cleaned.borrow().clone();
    cleaned.sort();
    assert_eq!(cleaned, vec![1, 3]);
}

#[eventide::test(clock = "virtual")]
async fn test_wait_clean_up_failure_stays_in_the_waiting_zone() {
    let errors = Rc::new(RefCell::new(Vec::new()));
    let sink = errors.clone();

    let (result, failing) = run_zoned_guarded(
        || {
            let failing = Completer::<u32>::new();
            let result = Future::wait_with(
                vec![Future::value(1u32), failing.future()],
                WaitOptions::default().clean_up(|_| panic!("clean-up failed")),
            )
            .catch_error(|_| Ok(Vec::new()));
            (result, failing)
        },
        move |error: AsyncError| sink.borrow_mut().push(error.message().to_string()),
    )
    .expect("body does not panic");

    sleep(Duration::from_millis(1)).await;
    failing.complete_error(AsyncError::msg("failed"));

    assert_eq!(result.await.unwrap(), Vec::<u32>::new());
    sleep(Duration::from_millis(1)).await;
    assert_eq!(*errors.borrow(), vec!["callback panicked: clean-up failed"]);
}

#[eventide::test(clock = "virtual")]
async fn test_any_takes_the_first_completion() {
    let winner = Future::any(vec![
        Future::<&str>::delayed_with(Duration::from_millis(30), || Ok("slow")),
        Future::<&str>::delayed_with(Duration::from_millis(10), || Ok("fast")),
    ])
    .await;

    assert_eq!(winner.unwrap(), "fast");
}

#[eventide::test(clock = "virtual")]
async fn test_timeout_expires() {
    let result = Future::<u32>::delayed_with(Duration::from_millis(100), || Ok(1))
        .timeout(Duration::from_millis(10))
        .await;

    let error = result.unwrap_err();
    assert_eq!(
        error.downcast_ref::<TimeoutError>(),
        Some(&TimeoutError(Duration::from_millis(10)))
    );
}

#[eventide::test(clock = "virtual")]
async fn test_timeout_with_fallback() {
    let result = Future::<u32>::delayed_with(Duration::from_millis(100), || Ok(1))
        .timeout_with(Duration::from_millis(10), || Ok(99))
        .await;

    assert_eq!(result.unwrap(), 99);
}

#[eventide::test]
async fn test_for_each_runs_in_sequence() {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();

    Future::<()>::for_each(1..=3, move |v| {
        let sink = sink.clone();
        Future::<()>::microtask(move || {
            sink.borrow_mut().push(v);
            Ok(())
        })
    })
    .await
    .unwrap();

    assert_eq!(*seen.borrow(), vec![1, 2, 3]);
}

#[eventide::test]
async fn test_do_while_stops_on_false() {
    let count = Rc::new(RefCell::new(0));
    let counter = count.clone();

    Future::<()>::do_while(move || {
        *counter.borrow_mut() += 1;
        Ok(*counter.borrow() < 5)
    })
    .await
    .unwrap();

    assert_eq!(*count.borrow(), 5);
}

#[test]
fn test_try_complete_reports_second_completion() {
    let rt = RuntimeBuilder::new().clock(Clock::Virtual).build();

    rt.run(|| {
        let completer = Completer::new();
        assert_eq!(completer.try_complete(1), Ok(()));
        assert_eq!(completer.try_complete(2), Err(UsageError::AlreadyCompleted));
        assert!(completer.is_completed());
    });
}

#[test]
#[should_panic(expected = "future already completed")]
fn test_completing_twice_panics() {
    let rt = RuntimeBuilder::new().build();

    rt.run(|| {
        let completer = Completer::new();
        completer.complete(1);
        completer.complete(2);
    });
}

#[eventide::test]
async fn test_value_completes_from_a_microtask() {
    let future = Future::value(3);
    assert!(!future.is_complete());
    assert!(future.peek().is_none());

    eventide::yield_now().await;

    assert!(future.is_complete());
    assert_eq!(future.peek().and_then(|r| r.ok()), Some(3));
}

#[eventide::test]
async fn test_sync_runs_immediately() {
    let ran = Rc::new(RefCell::new(false));
    let flag = ran.clone();

    let future = Future::<u32>::sync(move || {
        *flag.borrow_mut() = true;
        Ok(8)
    });

    assert!(*ran.borrow());
    assert_eq!(future.await.unwrap(), 8);
}

#[eventide::test]
async fn test_then_or_else_takes_the_error_branch() {
    let result: Result<String, AsyncError> = Future::<u32>::error(AsyncError::msg("nope"))
        .then_or_else(|v| Ok(format!("value {v}")), |error| Ok(format!("error {error}")))
        .await;

    assert_eq!(result.unwrap(), "error nope");
}

#[eventide::test(clock = "virtual")]
async fn test_delayed_unit_future() {
    let start = time::now();
    Future::delayed(Duration::from_millis(25)).await.unwrap();

    assert!(time::now() - start >= Duration::from_millis(25));
}

#[test]
fn test_ignored_error_is_not_uncaught() {
    let rt = RuntimeBuilder::new().build();

    rt.run(|| {
        Future::<u32>::error(AsyncError::msg("dropped on purpose")).ignore();
    });
}
