use eventide::time::sleep;
use eventide::{AsyncError, BroadcastStreamController, Stream, StreamController, StreamSubscription, run_zoned_guarded};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

async fn settle() {
    sleep(Duration::from_millis(1)).await;
}

fn recorder() -> (Rc<RefCell<Vec<u32>>>, impl FnMut(u32) + 'static) {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    (seen, move |v| sink.borrow_mut().push(v))
}

#[eventide::test]
async fn test_canceled_listener_misses_later_events() {
    let controller = BroadcastStreamController::<u32>::sync();
    let (a_seen, a) = recorder();
    let (b_seen, b) = recorder();

    let listener_a = controller.stream().listen(a);
    controller.stream().listen(b);

    controller.add(1);
    listener_a.cancel();
    controller.add(2);

    assert_eq!(*a_seen.borrow(), vec![1]);
    assert_eq!(*b_seen.borrow(), vec![1, 2]);
}

#[eventide::test(clock = "virtual")]
async fn test_async_broadcast_reaches_every_listener() {
    let controller = BroadcastStreamController::<u32>::new();
    let first = controller.stream().to_list();
    let second = controller.stream().to_list();
    assert!(controller.stream().is_broadcast());

    controller.add(1);
    controller.add(2);
    controller.close();

    assert_eq!(first.await.unwrap(), vec![1, 2]);
    assert_eq!(second.await.unwrap(), vec![1, 2]);
}

#[eventide::test(clock = "virtual")]
async fn test_nothing_is_buffered_without_listeners() {
    let controller = BroadcastStreamController::<u32>::new();
    controller.add(1);

    let collected = controller.stream().to_list();
    controller.add(2);
    controller.close();

    assert_eq!(collected.await.unwrap(), vec![2]);
}

#[eventide::test]
async fn test_listen_and_cancel_callbacks_follow_listener_count() {
    let listens = Rc::new(Cell::new(0));
    let cancels = Rc::new(Cell::new(0));
    let (l, c) = (listens.clone(), cancels.clone());

    let controller = BroadcastStreamController::<u32>::builder()
        .sync(true)
        .on_listen(move || l.set(l.get() + 1))
        .on_cancel(move || c.set(c.get() + 1))
        .build();

    let first = controller.stream().listen(|_| {});
    let second = controller.stream().listen(|_| {});
    assert_eq!(listens.get(), 1);

    first.cancel();
    assert_eq!(cancels.get(), 0);
    second.cancel();
    assert_eq!(cancels.get(), 1);
    assert!(!controller.has_listener());

    controller.stream().listen(|_| {});
    assert_eq!(listens.get(), 2);
}

#[eventide::test(clock = "virtual")]
async fn test_adding_while_firing_is_rejected() {
    let controller = BroadcastStreamController::<u32>::sync();
    let errors = Rc::new(RefCell::new(Vec::new()));
    let sink = errors.clone();

    let reentrant = controller.clone();
    run_zoned_guarded(
        || {
            controller.stream().listen(move |v| {
                if v == 1 {
                    reentrant.add(2);
                }
            })
        },
        move |error: AsyncError| sink.borrow_mut().push(error.message().to_string()),
    );

    controller.add(1);
    settle().await;

    assert_eq!(errors.borrow().len(), 1);
    assert!(errors.borrow()[0].contains("already firing"));
}

#[eventide::test(clock = "virtual")]
async fn test_done_completes_after_close() {
    let controller = BroadcastStreamController::<u32>::new();
    let (seen, sink) = recorder();
    controller.stream().listen(sink);

    controller.add(7);
    controller.close().await.unwrap();

    assert_eq!(*seen.borrow(), vec![7]);
    assert!(controller.is_closed());
}

#[eventide::test(clock = "virtual")]
async fn test_as_broadcast_stream_shares_one_subscription() {
    let listens = Rc::new(Cell::new(0));
    let counter = listens.clone();
    let source = StreamController::<u32>::builder()
        .on_listen(move || counter.set(counter.get() + 1))
        .build();

    let shared = source.stream().as_broadcast_stream();
    assert!(shared.is_broadcast());

    let first = shared.to_list();
    let second = shared.to_list();

    source.add(1);
    source.add(2);
    source.close();

    assert_eq!(first.await.unwrap(), vec![1, 2]);
    assert_eq!(second.await.unwrap(), vec![1, 2]);
    assert_eq!(listens.get(), 1);
}

#[eventide::test(clock = "virtual")]
async fn test_as_broadcast_stream_callbacks_control_the_source() {
    let source = StreamController::<u32>::new();
    let shared = source.stream().as_broadcast_stream_with(|_| {}, |subscription| subscription.cancel());

    let listener = shared.listen(|_| {});
    settle().await;
    assert!(source.has_listener());

    listener.cancel();
    settle().await;
    assert!(!source.has_listener(), "Canceling the source from on_cancel releases it");
}

#[eventide::test]
async fn test_listener_added_mid_event_waits_for_the_next_one() {
    let controller = BroadcastStreamController::<u32>::sync();
    let (b_seen, b) = recorder();
    let (c_seen, c) = recorder();
    let mut b = Some(b);
    let c_subscription: Rc<RefCell<Option<StreamSubscription<u32>>>> = Rc::new(RefCell::new(None));

    let adder = controller.clone();
    let victim = c_subscription.clone();
    controller.stream().listen(move |v| {
        if v == 1 {
            if let Some(b) = b.take() {
                adder.stream().listen(b);
            }
            if let Some(c) = victim.borrow_mut().take() {
                c.cancel();
            }
        }
    });
    *c_subscription.borrow_mut() = Some(controller.stream().listen(c));

    controller.add(1);
    controller.add(2);

    assert_eq!(*b_seen.borrow(), vec![2], "A listener added during delivery skips that event");
    assert!(c_seen.borrow().is_empty(), "A listener canceled during delivery receives nothing");
}

struct Tracked(Rc<Cell<bool>>);

impl Iterator for Tracked {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        None
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.0.set(true);
    }
}

#[eventide::test]
async fn test_unlistened_broadcast_view_releases_its_source() {
    let dropped = Rc::new(Cell::new(false));
    let source = Stream::from_iter(Tracked(dropped.clone()));

    let shared = source.as_broadcast_stream();
    drop(source);
    assert!(!dropped.get());

    drop(shared);
    assert!(dropped.get(), "Dropping the broadcast view frees the source");
}
