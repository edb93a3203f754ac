use eventide::error::StreamError;
use eventide::{AsyncError, Stream, StreamController};
use std::cell::RefCell;
use std::rc::Rc;

fn numbers() -> Stream<u32> {
    Stream::from_iter([3, 8, 5, 10])
}

fn stream_error(error: AsyncError) -> Option<StreamError> {
    error.downcast_ref::<StreamError>().cloned()
}

#[eventide::test]
async fn test_first_last_single() {
    assert_eq!(numbers().first().await.unwrap(), 3);
    assert_eq!(numbers().last().await.unwrap(), 10);
    assert_eq!(Stream::value(4).single().await.unwrap(), 4);
}

#[eventide::test]
async fn test_empty_stream_has_no_element() {
    let first = Stream::<u32>::empty().first().await;
    let last = Stream::<u32>::empty().last().await;
    let single = Stream::<u32>::empty().single().await;

    assert_eq!(stream_error(first.unwrap_err()), Some(StreamError::NoElement));
    assert_eq!(stream_error(last.unwrap_err()), Some(StreamError::NoElement));
    assert_eq!(stream_error(single.unwrap_err()), Some(StreamError::NoElement));
}

#[eventide::test]
async fn test_single_rejects_a_second_element() {
    let result = numbers().single().await;

    assert_eq!(stream_error(result.unwrap_err()), Some(StreamError::TooManyElements));
}

#[eventide::test]
async fn test_first_stops_listening() {
    let controller = StreamController::<u32>::new();
    controller.add(1);
    controller.add(2);

    assert_eq!(controller.stream().first().await.unwrap(), 1);
    assert!(!controller.has_listener());
}

#[eventide::test]
async fn test_where_variants() {
    assert_eq!(numbers().first_where(|v| *v > 4).await.unwrap(), 8);
    assert_eq!(numbers().last_where(|v| *v < 9).await.unwrap(), 5);
    assert_eq!(numbers().single_where(|v| *v == 5).await.unwrap(), 5);

    assert_eq!(numbers().first_where_or(|v| *v > 100, || 0).await.unwrap(), 0);
    assert_eq!(numbers().last_where_or(|v| *v > 100, || 1).await.unwrap(), 1);
    assert_eq!(numbers().single_where_or(|v| *v > 100, || 2).await.unwrap(), 2);

    let missing = numbers().first_where(|v| *v > 100).await;
    assert_eq!(stream_error(missing.unwrap_err()), Some(StreamError::NoElement));

    let ambiguous = numbers().single_where(|v| *v > 4).await;
    assert_eq!(stream_error(ambiguous.unwrap_err()), Some(StreamError::TooManyElements));
}

#[eventide::test]
async fn test_panicking_test_fails_the_result() {
    let result = numbers()
        .first_where(|v| if *v == 8 { panic!("bad test") } else { false })
        .await;

    assert!(result.unwrap_err().message().contains("bad test"));
}

#[eventide::test]
async fn test_element_at() {
    assert_eq!(numbers().element_at(2).await.unwrap(), 5);

    let out_of_range = numbers().element_at(7).await;
    assert_eq!(
        stream_error(out_of_range.unwrap_err()),
        Some(StreamError::IndexOutOfRange { index: 7, length: 4 })
    );
}

#[eventide::test]
async fn test_fold_and_reduce() {
    assert_eq!(numbers().fold(0, |sum, v| sum + v).await.unwrap(), 26);
    assert_eq!(numbers().reduce(|a, b| a.max(b)).await.unwrap(), 10);

    let empty = Stream::<u32>::empty().reduce(|a, b| a + b).await;
    assert_eq!(stream_error(empty.unwrap_err()), Some(StreamError::NoElement));
    assert_eq!(Stream::<u32>::empty().fold(7, |sum, v| sum + v).await.unwrap(), 7);
}

#[eventide::test]
async fn test_any_every_contains() {
    assert!(numbers().any(|v| *v == 5).await.unwrap());
    assert!(!numbers().any(|v| *v == 6).await.unwrap());
    assert!(numbers().every(|v| *v > 2).await.unwrap());
    assert!(!numbers().every(|v| *v % 2 == 0).await.unwrap());
    assert!(numbers().contains(10).await.unwrap());
    assert!(!numbers().contains(11).await.unwrap());
}

#[eventide::test]
async fn test_length_and_is_empty() {
    assert_eq!(numbers().length().await.unwrap(), 4);
    assert!(!numbers().is_empty().await.unwrap());
    assert!(Stream::<u32>::empty().is_empty().await.unwrap());
}

#[eventide::test]
async fn test_join_and_for_each() {
    assert_eq!(numbers().join(", ").await.unwrap(), "3, 8, 5, 10");
    assert_eq!(Stream::<u32>::empty().join("-").await.unwrap(), "");

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    numbers().for_each(move |v| sink.borrow_mut().push(v)).await.unwrap();
    assert_eq!(*seen.borrow(), vec![3, 8, 5, 10]);
}

#[eventide::test]
async fn test_drain_keeps_the_first_error() {
    assert_eq!(numbers().drain("drained").await.unwrap(), "drained");

    let controller = StreamController::<u32>::new();
    controller.add(1);
    controller.add_error(AsyncError::msg("broken"));
    controller.close();

    let drained = controller.stream().drain(0).await;
    assert_eq!(drained.unwrap_err().message(), "broken");
}

#[eventide::test]
async fn test_errors_fail_consumers() {
    let result = Stream::<u32>::error(AsyncError::msg("upstream")).fold(0, |a, b| a + b).await;

    assert_eq!(result.unwrap_err().message(), "upstream");
}

#[eventide::test]
async fn test_pipe_into_controller() {
    let target = StreamController::<u32>::new();
    let collected = target.stream().to_list();

    numbers().pipe(target.clone()).await.unwrap();

    assert!(target.is_closed());
    assert_eq!(collected.await.unwrap(), vec![3, 8, 5, 10]);
}
