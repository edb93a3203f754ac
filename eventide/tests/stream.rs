use eventide::error::StreamError;
use eventide::stream::{EventSink, StreamHandlers};
use eventide::time::{self, sleep};
use eventide::{AsyncError, Completer, Future, Stream, StreamController};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

async fn settle() {
    sleep(Duration::from_millis(1)).await;
}

#[eventide::test]
async fn test_map_then_collect() {
    let doubled = Stream::from_iter([1, 2, 3]).map(|x| x * 2).to_list().await;

    assert_eq!(doubled.unwrap(), vec![2, 4, 6]);
}

#[eventide::test]
async fn test_filter_skip_take_pipeline() {
    let values = Stream::from_iter(1..=10)
        .filter(|v| v % 2 == 0)
        .skip(1)
        .take(2)
        .to_list()
        .await;

    assert_eq!(values.unwrap(), vec![4, 6]);
}

#[eventide::test]
async fn test_take_while_and_skip_while() {
    let head = Stream::from_iter([1, 2, 5, 1]).take_while(|v| *v < 3).to_list().await;
    let tail = Stream::from_iter([1, 2, 5, 1]).skip_while(|v| *v < 3).to_list().await;

    assert_eq!(head.unwrap(), vec![1, 2]);
    assert_eq!(tail.unwrap(), vec![5, 1]);
}

#[eventide::test]
async fn test_expand_flattens_in_order() {
    let values = Stream::from_iter([1, 2]).expand(|v| vec![v, v * 10]).to_list().await;

    assert_eq!(values.unwrap(), vec![1, 10, 2, 20]);
}

#[eventide::test]
async fn test_distinct_drops_consecutive_duplicates() {
    let values = Stream::from_iter([1, 1, 2, 2, 1]).distinct().to_list().await;
    let by_parity = Stream::from_iter([1, 3, 2, 4, 5])
        .distinct_by(|a, b| a % 2 == b % 2)
        .to_list()
        .await;

    assert_eq!(values.unwrap(), vec![1, 2, 1]);
    assert_eq!(by_parity.unwrap(), vec![1, 2, 5]);
}

#[eventide::test]
async fn test_map_panic_becomes_error_event() {
    let result = Stream::from_iter([1, 2, 3])
        .map(|v| if v == 2 { panic!("bad value") } else { v })
        .to_list()
        .await;

    assert!(result.unwrap_err().message().contains("bad value"));
}

#[eventide::test]
async fn test_try_map_reports_errors() {
    let result = Stream::from_iter(["1", "x", "3"])
        .try_map(|s| s.parse::<u32>().map_err(AsyncError::new))
        .to_list()
        .await;

    assert!(result.is_err());
}

#[eventide::test]
async fn test_handle_error_swallows_errors() {
    let controller = StreamController::<u32>::new();
    controller.add(1);
    controller.add_error(AsyncError::msg("skipped"));
    controller.add(2);
    controller.close();

    let errors = Rc::new(RefCell::new(Vec::new()));
    let sink = errors.clone();
    let values = controller
        .stream()
        .handle_error(move |error| sink.borrow_mut().push(error.message().to_string()))
        .to_list()
        .await;

    assert_eq!(values.unwrap(), vec![1, 2]);
    assert_eq!(*errors.borrow(), vec!["skipped"]);
}

#[eventide::test]
async fn test_handle_error_where_passes_other_errors() {
    let result = Stream::<u32>::error(AsyncError::msg("kept"))
        .handle_error_where(|_| {}, |error| error.message() == "dropped")
        .to_list()
        .await;

    assert_eq!(result.unwrap_err().message(), "kept");
}

#[eventide::test(clock = "virtual")]
async fn test_periodic_take_three() {
    let start = time::now();
    let values = Stream::periodic(Duration::from_millis(10), |n| n).take(3).to_list().await;

    assert_eq!(values.unwrap(), vec![0, 1, 2]);
    assert!(time::now() - start >= Duration::from_millis(30));
}

#[eventide::test(clock = "virtual")]
async fn test_pause_buffers_events() {
    let controller = StreamController::<u32>::new();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();

    let subscription = controller.stream().listen(move |v| sink.borrow_mut().push(v));
    subscription.pause();
    assert!(subscription.is_paused());
    assert!(controller.is_paused());

    controller.add(1);
    controller.add(2);
    settle().await;
    assert!(seen.borrow().is_empty(), "Paused subscriptions buffer their events");

    subscription.resume();
    settle().await;
    assert_eq!(*seen.borrow(), vec![1, 2]);
}

#[eventide::test(clock = "virtual")]
async fn test_pause_until_resumes_on_completion() {
    let controller = StreamController::<u32>::new();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();

    let subscription = controller.stream().listen(move |v| sink.borrow_mut().push(v));
    let gate = Completer::<()>::new();
    subscription.pause_until(gate.future());

    controller.add(1);
    settle().await;
    assert!(seen.borrow().is_empty());

    gate.complete(());
    settle().await;
    assert_eq!(*seen.borrow(), vec![1]);
}

#[eventide::test(clock = "virtual")]
async fn test_cancel_on_error_stops_delivery() {
    let controller = StreamController::<u32>::new();
    let data = Rc::new(RefCell::new(Vec::new()));
    let errors = Rc::new(Cell::new(0));
    let done = Rc::new(Cell::new(false));

    let (d, e, f) = (data.clone(), errors.clone(), done.clone());
    controller.stream().listen_with(
        StreamHandlers::new()
            .on_data(move |v| d.borrow_mut().push(v))
            .on_error(move |_| e.set(e.get() + 1))
            .on_done(move || f.set(true))
            .cancel_on_error(true),
    );

    controller.add(1);
    controller.add_error(AsyncError::msg("stop"));
    controller.add(2);
    settle().await;

    assert_eq!(*data.borrow(), vec![1]);
    assert_eq!(errors.get(), 1);
    assert!(!done.get());
    assert!(!controller.has_listener());
}

#[eventide::test]
#[should_panic(expected = "stream has already been listened to")]
async fn test_single_subscription_stream_rejects_second_listener() {
    let stream = Stream::from_iter([1, 2]);
    stream.listen(|_| {});
    stream.listen(|_| {});
}

#[eventide::test(clock = "virtual")]
async fn test_from_futures_in_completion_order() {
    let values = Stream::from_futures(vec![
        Future::<u32>::delayed_with(Duration::from_millis(20), || Ok(1)),
        Future::<u32>::delayed_with(Duration::from_millis(10), || Ok(2)),
    ])
    .to_list()
    .await;

    assert_eq!(values.unwrap(), vec![2, 1]);
}

#[eventide::test]
async fn test_future_as_stream() {
    let single = Future::value(9).as_stream().to_list().await;
    let failed = Stream::from_future(Future::<u32>::error(AsyncError::msg("gone")))
        .to_list()
        .await;

    assert_eq!(single.unwrap(), vec![9]);
    assert_eq!(failed.unwrap_err().message(), "gone");
}

#[eventide::test]
async fn test_value_error_and_empty_streams() {
    assert_eq!(Stream::value(3).to_list().await.unwrap(), vec![3]);
    assert_eq!(Stream::<u32>::empty().to_list().await.unwrap(), Vec::<u32>::new());
    assert!(Stream::<u32>::empty().is_broadcast());
    assert_eq!(
        Stream::<u32>::error(AsyncError::msg("only error"))
            .to_list()
            .await
            .unwrap_err()
            .message(),
        "only error"
    );
}

#[eventide::test(clock = "virtual")]
async fn test_timeout_reports_silence() {
    let controller = StreamController::<u32>::new();

    let result = controller.stream().timeout(Duration::from_millis(10)).first().await;

    assert_eq!(
        result.unwrap_err().downcast_ref::<StreamError>(),
        Some(&StreamError::Timeout(Duration::from_millis(10)))
    );
}

#[eventide::test(clock = "virtual")]
async fn test_timeout_with_fills_the_gap() {
    let controller = StreamController::<u32>::new();

    let result = controller
        .stream()
        .timeout_with(Duration::from_millis(10), |sink| sink.add(0))
        .first()
        .await;

    assert_eq!(result.unwrap(), 0);
}

#[eventide::test(clock = "virtual")]
async fn test_async_map_keeps_source_order() {
    let values = Stream::from_iter([30u64, 10, 20])
        .async_map(|ms| Future::<u64>::delayed_with(Duration::from_millis(ms), move || Ok(ms)))
        .to_list()
        .await;

    assert_eq!(values.unwrap(), vec![30, 10, 20]);
}

#[eventide::test(clock = "virtual")]
async fn test_as_future_completes_on_done() {
    let controller = StreamController::<u32>::new();
    let subscription = controller.stream().listen(|_| {});
    let finished = subscription.as_future("finished");

    controller.add(1);
    controller.close();

    assert_eq!(finished.await.unwrap(), "finished");
}
