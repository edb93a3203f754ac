use eventide::stream::StreamHandlers;
use eventide::time::sleep;
use eventide::{AsyncError, Completer, Stream, StreamController};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

async fn settle() {
    sleep(Duration::from_millis(1)).await;
}

#[eventide::test]
async fn test_events_are_buffered_until_listen() {
    let controller = StreamController::<u32>::new();
    controller.add(1);
    controller.add(2);
    controller.close();

    assert!(controller.is_paused(), "A controller without listener counts as paused");
    assert_eq!(controller.stream().to_list().await.unwrap(), vec![1, 2]);
}

#[eventide::test]
async fn test_sync_controller_delivers_inside_add() {
    let controller = StreamController::<u32>::sync();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();

    controller.stream().listen(move |v| sink.borrow_mut().push(v));
    controller.add(1);
    assert_eq!(*seen.borrow(), vec![1]);

    controller.add(2);
    assert_eq!(*seen.borrow(), vec![1, 2]);
}

#[eventide::test]
async fn test_async_controller_delivers_later() {
    let controller = StreamController::<u32>::new();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();

    controller.stream().listen(move |v| sink.borrow_mut().push(v));
    controller.add(1);
    assert!(seen.borrow().is_empty());

    controller.close().await.unwrap();
    assert_eq!(*seen.borrow(), vec![1]);
}

#[eventide::test]
#[should_panic(expected = "stream has already been listened to")]
async fn test_second_listener_panics() {
    let controller = StreamController::<u32>::new();
    controller.stream().listen(|_| {});
    controller.stream().listen(|_| {});
}

#[eventide::test]
#[should_panic(expected = "cannot add event after closing")]
async fn test_add_after_close_panics() {
    let controller = StreamController::<u32>::new();
    controller.close();
    controller.add(1);
}

#[eventide::test]
async fn test_close_twice_is_allowed() {
    let controller = StreamController::<u32>::new();
    controller.close();
    controller.close();

    assert!(controller.is_closed());
    assert!(controller.stream().to_list().await.unwrap().is_empty());
}

#[eventide::test(clock = "virtual")]
async fn test_lifecycle_callbacks() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let (a, b, c, d) = (log.clone(), log.clone(), log.clone(), log.clone());

    let controller = StreamController::<u32>::builder()
        .on_listen(move || a.borrow_mut().push("listen"))
        .on_pause(move || b.borrow_mut().push("pause"))
        .on_resume(move || c.borrow_mut().push("resume"))
        .on_cancel(move || d.borrow_mut().push("cancel"))
        .build();

    let subscription = controller.stream().listen(|_| {});
    assert!(controller.has_listener());

    subscription.pause();
    subscription.resume();
    subscription.cancel().await.unwrap();

    assert_eq!(*log.borrow(), vec!["listen", "pause", "resume", "cancel"]);
    assert!(!controller.has_listener());
}

#[eventide::test(clock = "virtual")]
async fn test_cancel_waits_for_cleanup_future() {
    let cleanup = Completer::<()>::new();
    let pending = cleanup.clone();
    let controller = StreamController::<u32>::builder()
        .on_cancel_with(move || pending.future())
        .build();

    let subscription = controller.stream().listen(|_| {});
    let canceled = subscription.cancel();

    let finished = Rc::new(Cell::new(false));
    let flag = finished.clone();
    canceled.then(move |()| {
        flag.set(true);
        Ok(())
    });

    settle().await;
    assert!(!finished.get(), "Cancel completes only after the cleanup");

    cleanup.complete(());
    settle().await;
    assert!(finished.get());
}

#[eventide::test(clock = "virtual")]
async fn test_done_completes_after_cancel() {
    let controller = StreamController::<u32>::new();
    let done = controller.done();

    let subscription = controller.stream().listen(|_| {});
    subscription.cancel();

    done.await.unwrap();
}

#[eventide::test(clock = "virtual")]
async fn test_add_stream_forwards_events() {
    let controller = StreamController::<u32>::new();
    let collected = controller.stream().to_list();

    controller.add_stream(Stream::from_iter([1, 2]), false).await.unwrap();
    controller.add(3);
    controller.close();

    assert_eq!(collected.await.unwrap(), vec![1, 2, 3]);
}

#[eventide::test(clock = "virtual")]
async fn test_add_stream_stops_on_error_when_asked() {
    let controller = StreamController::<u32>::new();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let errors = Rc::new(Cell::new(0));
    let (s, e) = (seen.clone(), errors.clone());
    controller.stream().listen_with(
        StreamHandlers::new()
            .on_data(move |v| s.borrow_mut().push(v))
            .on_error(move |_| e.set(e.get() + 1)),
    );

    let source = StreamController::<u32>::new();
    source.add(1);
    source.add_error(AsyncError::msg("halt"));
    source.add(2);
    source.close();

    controller.add_stream(source.stream(), true).await.unwrap();
    settle().await;

    assert_eq!(*seen.borrow(), vec![1]);
    assert_eq!(errors.get(), 1);
}

#[eventide::test]
#[should_panic(expected = "cannot add event while adding a stream")]
async fn test_add_while_adding_stream_panics() {
    let controller = StreamController::<u32>::new();
    controller.stream().listen(|_| {});

    let _adding = controller.add_stream(Stream::from_iter([1]), false);
    controller.add(2);
}

#[eventide::test]
async fn test_sync_completer_in_on_done_completes_inline() {
    let controller = StreamController::<u32>::sync();
    let completer = Completer::<u32>::sync();
    let log = Rc::new(RefCell::new(Vec::new()));

    let seen = log.clone();
    completer.future().then(move |v| {
        seen.borrow_mut().push(format!("then {v}"));
        Ok(())
    });

    let seen = log.clone();
    let finisher = completer.clone();
    controller.stream().listen_with(StreamHandlers::new().on_done(move || {
        seen.borrow_mut().push("done".to_string());
        finisher.complete(5);
        seen.borrow_mut().push("after complete".to_string());
    }));

    controller.close();

    assert_eq!(*log.borrow(), vec!["done", "then 5", "after complete"]);
}
