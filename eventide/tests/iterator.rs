use eventide::stream::StreamIterator;
use eventide::{AsyncError, Stream, StreamController};

#[eventide::test]
async fn test_reads_every_value_in_order() {
    let items = StreamIterator::new(Stream::from_iter([1, 2, 3]));
    let mut seen = Vec::new();

    while items.move_next().await.unwrap() {
        seen.push(items.current().unwrap());
    }

    assert_eq!(seen, vec![1, 2, 3]);
    assert_eq!(items.current(), None);
    assert!(!items.move_next().await.unwrap(), "A finished iterator stays finished");
}

#[eventide::test]
async fn test_current_is_empty_before_the_first_move() {
    let items = StreamIterator::new(Stream::value(5));

    assert_eq!(items.current(), None);
    assert!(items.move_next().await.unwrap());
    assert_eq!(items.current(), Some(5));
}

#[eventide::test]
async fn test_holding_a_value_pauses_the_source() {
    let controller = StreamController::<u32>::new();
    controller.add(1);
    controller.add(2);

    let items = StreamIterator::new(controller.stream());
    assert!(items.move_next().await.unwrap());

    assert!(controller.is_paused(), "The source waits while a value is held");
    assert_eq!(items.current(), Some(1));
}

#[eventide::test]
async fn test_error_finishes_the_iterator() {
    let controller = StreamController::<u32>::new();
    controller.add(1);
    controller.add_error(AsyncError::msg("broken"));
    controller.close();

    let items = StreamIterator::new(controller.stream());
    assert!(items.move_next().await.unwrap());

    let error = items.move_next().await.unwrap_err();
    assert_eq!(error.message(), "broken");
    assert!(!items.move_next().await.unwrap());
}

#[eventide::test]
async fn test_cancel_completes_a_pending_move() {
    let controller = StreamController::<u32>::new();
    let items = StreamIterator::new(controller.stream());

    let waiting = items.move_next();
    items.cancel().await.unwrap();

    assert!(!waiting.await.unwrap());
    assert!(!controller.has_listener());
}

#[eventide::test]
async fn test_cancel_before_listening() {
    let items = StreamIterator::new(Stream::from_iter([1, 2]));

    items.cancel().await.unwrap();

    assert!(!items.move_next().await.unwrap());
}

#[eventide::test]
#[should_panic(expected = "already waiting for the next stream event")]
async fn test_second_move_while_waiting_panics() {
    let controller = StreamController::<u32>::new();
    let items = StreamIterator::new(controller.stream());

    let _first = items.move_next();
    let _second = items.move_next();
}
