use eventide::time::sleep;
use eventide::zone::run_zoned_with;
use eventide::{AsyncError, Future, StreamController, Timer, Zone, ZoneSpecification, ZoneValues, run_zoned_guarded};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

fn collector() -> (Rc<RefCell<Vec<String>>>, impl Fn(AsyncError) + 'static) {
    let errors = Rc::new(RefCell::new(Vec::new()));
    let sink = errors.clone();
    (errors, move |error: AsyncError| sink.borrow_mut().push(error.message().to_string()))
}

#[eventide::test(clock = "virtual")]
async fn test_guarded_zone_catches_unhandled_future_error() {
    let (errors, on_error) = collector();

    run_zoned_guarded(
        || {
            Future::<u32>::error(AsyncError::msg("nobody listens"));
        },
        on_error,
    );

    sleep(Duration::from_millis(1)).await;
    assert_eq!(*errors.borrow(), vec!["nobody listens"]);
}

#[eventide::test(clock = "virtual")]
async fn test_errors_do_not_cross_error_zones() {
    let (errors, on_error) = collector();
    let listener_ran = Rc::new(Cell::new(false));
    let flag = listener_ran.clone();

    let failing = run_zoned_guarded(|| Future::<u32>::error(AsyncError::msg("stays inside")), on_error)
        .expect("body does not panic");

    failing.catch_error(move |_| {
        flag.set(true);
        Ok(0)
    });

    sleep(Duration::from_millis(1)).await;
    assert_eq!(*errors.borrow(), vec!["stays inside"]);
    assert!(!listener_ran.get(), "A listener in another error zone never sees the error");
}

#[eventide::test]
async fn test_callbacks_run_in_registration_zone() {
    let future = run_zoned_with(
        || Future::value(1).then(|_| Ok(Zone::current().get::<&str>("request").map(|v| *v))),
        ZoneSpecification::new(),
        ZoneValues::new().with("request", "abc"),
    );

    assert_eq!(future.await.unwrap(), Some("abc"));
    assert!(Zone::current().get::<&str>("request").is_none());
}

#[eventide::test(clock = "virtual")]
async fn test_timer_callback_runs_in_its_zone() {
    let seen = Rc::new(RefCell::new(None));
    let slot = seen.clone();

    let zone = Zone::current().fork(ZoneSpecification::new(), ZoneValues::new().with("id", 7u32));
    zone.run(|| {
        Timer::new(Duration::from_millis(5), move || {
            *slot.borrow_mut() = Zone::current().get::<u32>("id").map(|v| *v);
        })
    });

    sleep(Duration::from_millis(10)).await;
    assert_eq!(*seen.borrow(), Some(7));
}

#[eventide::test(clock = "virtual")]
async fn test_timer_panic_goes_to_guarded_zone() {
    let (errors, on_error) = collector();

    run_zoned_guarded(
        || {
            Timer::new(Duration::from_millis(5), || panic!("timer exploded"));
        },
        on_error,
    );

    sleep(Duration::from_millis(10)).await;
    assert_eq!(*errors.borrow(), vec!["timer exploded"]);
}

#[eventide::test]
async fn test_schedule_microtask_hook_sees_scheduling() {
    let scheduled = Rc::new(Cell::new(0));
    let counter = scheduled.clone();
    let ran = Rc::new(Cell::new(false));
    let flag = ran.clone();

    let spec = ZoneSpecification::new().schedule_microtask(move |_, parent, zone, task| {
        counter.set(counter.get() + 1);
        parent.schedule_microtask(zone, task);
    });

    run_zoned_with(
        || eventide::schedule_microtask(move || flag.set(true)),
        spec,
        ZoneValues::new(),
    );

    eventide::yield_now().await;
    assert_eq!(scheduled.get(), 1);
    assert!(ran.get());
}

#[eventide::test]
async fn test_error_callback_replaces_stored_errors() {
    let spec = ZoneSpecification::new()
        .error_callback(|_, _, _, error| Some(AsyncError::msg(format!("wrapped: {error}"))));

    let future = run_zoned_with(
        || Future::<u32>::error(AsyncError::msg("raw")),
        spec,
        ZoneValues::new(),
    );

    assert_eq!(future.await.unwrap_err().message(), "wrapped: raw");
}

#[eventide::test]
async fn test_stream_events_reach_listener_zone() {
    let controller = StreamController::<u32>::new();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();

    let stream = controller.stream();
    let subscription = run_zoned_with(
        move || {
            stream.listen(move |v| {
                let tag = Zone::current().get::<&str>("tag").map(|t| *t).unwrap_or("none");
                sink.borrow_mut().push(format!("{tag}:{v}"));
            })
        },
        ZoneSpecification::new(),
        ZoneValues::new().with("tag", "listener"),
    );

    controller.add(1);
    controller.add(2);
    controller.close().await.unwrap();

    assert_eq!(*seen.borrow(), vec!["listener:1", "listener:2"]);
    subscription.cancel();
}
