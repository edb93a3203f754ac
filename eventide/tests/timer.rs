use eventide::time::{self, sleep};
use eventide::{Clock, RuntimeBuilder, Timer};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

#[eventide::test(clock = "virtual")]
async fn test_sleep_advances_virtual_clock() {
    let start = time::now();
    sleep(Duration::from_secs(3600)).await;

    assert!(
        time::now() - start >= Duration::from_secs(3600),
        "Sleep should wait at least the specified duration"
    );
}

#[eventide::test]
async fn test_sleep_zero_duration() {
    let start = std::time::Instant::now();
    sleep(Duration::from_millis(0)).await;

    assert!(
        start.elapsed() < Duration::from_millis(50),
        "Zero duration sleep should be fast"
    );
}

#[eventide::test(clock = "virtual")]
async fn test_timers_fire_in_deadline_order() {
    let order = Rc::new(RefCell::new(Vec::new()));

    for (name, millis) in [("late", 30), ("early", 10), ("middle", 20)] {
        let order = order.clone();
        Timer::new(Duration::from_millis(millis), move || order.borrow_mut().push(name));
    }

    sleep(Duration::from_millis(50)).await;
    assert_eq!(*order.borrow(), vec!["early", "middle", "late"]);
}

#[eventide::test(clock = "virtual")]
async fn test_one_shot_timer_state() {
    let fired = Rc::new(Cell::new(false));
    let flag = fired.clone();

    let timer = Timer::new(Duration::from_millis(5), move || flag.set(true));
    assert!(timer.is_active());
    assert!(!timer.is_periodic());
    assert_eq!(timer.tick(), 0);

    sleep(Duration::from_millis(10)).await;

    assert!(fired.get());
    assert!(!timer.is_active(), "A one-shot timer is inactive once fired");
    assert_eq!(timer.tick(), 1);
}

#[eventide::test(clock = "virtual")]
async fn test_cancelled_timer_never_fires() {
    let fired = Rc::new(Cell::new(false));
    let flag = fired.clone();

    let timer = Timer::new(Duration::from_millis(5), move || flag.set(true));
    timer.cancel();
    timer.cancel();

    sleep(Duration::from_millis(10)).await;

    assert!(!fired.get());
    assert!(!timer.is_active());
}

#[eventide::test(clock = "virtual")]
async fn test_periodic_timer_cancels_itself() {
    let ticks = Rc::new(RefCell::new(Vec::new()));
    let seen = ticks.clone();

    let timer = Timer::periodic(Duration::from_millis(10), move |timer| {
        seen.borrow_mut().push(timer.tick());
        if timer.tick() == 3 {
            timer.cancel();
        }
    });
    assert!(timer.is_periodic());

    sleep(Duration::from_millis(100)).await;

    assert_eq!(*ticks.borrow(), vec![1, 2, 3]);
    assert!(!timer.is_active());
}

#[eventide::test(clock = "virtual")]
async fn test_timer_run_waits_for_microtasks() {
    let order = Rc::new(RefCell::new(Vec::new()));

    let first = order.clone();
    Timer::run(move || first.borrow_mut().push("timer"));
    let second = order.clone();
    eventide::schedule_microtask(move || second.borrow_mut().push("microtask"));

    sleep(Duration::from_millis(1)).await;
    assert_eq!(*order.borrow(), vec!["microtask", "timer"]);
}

#[test]
fn test_run_drives_timers_to_completion() {
    let rt = RuntimeBuilder::new().clock(Clock::Virtual).build();
    let fired = Rc::new(Cell::new(0));
    let count = fired.clone();

    rt.run(move || {
        let inner = count.clone();
        Timer::new(Duration::from_secs(1), move || {
            inner.set(inner.get() + 1);
            Timer::new(Duration::from_secs(1), move || inner.set(inner.get() + 1));
        });
    });

    assert_eq!(fired.get(), 2);
    assert!(rt.elapsed() >= Duration::from_secs(2));
}

#[test]
#[should_panic(expected = "must be called within the context of a runtime")]
fn test_timer_outside_runtime_panics() {
    Timer::new(Duration::from_millis(1), || {});
}
