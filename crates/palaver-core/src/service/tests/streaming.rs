use super::support::{Harness, TransportBehavior, drain, harness};
use crate::error::CancelReason;
use crate::message::{InboundMessage, MessageSource, OutboundMessage, RequestOptions};
use crate::resolvable::SendHandle;
use crate::types::{ItemId, MessageId, ResponseId};

fn chunk(request_id: &MessageId, streaming: bool) -> InboundMessage {
    InboundMessage {
        response_id: ResponseId::from_string("r1"),
        request_id: Some(request_id.clone()),
        item_id: Some(ItemId::from_string("i1")),
        output: "partial output".to_string(),
        streaming,
        received_at: None,
    }
}

/// Sends one message whose transport attempt stays in flight, then delivers
/// the head of a streamed response for it.
async fn streaming_turn(h: &Harness) -> (MessageId, SendHandle) {
    h.transport.script([TransportBehavior::HoldUntilReleased]);
    let message = OutboundMessage::new("tell me a story");
    let id = message.id.clone();
    let handle = h
        .service
        .send(message, MessageSource::UserInput, None, RequestOptions::default());
    drain().await;

    h.service.handle_response(chunk(&id, true)).await;
    (id, handle)
}

#[tokio::test(start_paused = true)]
async fn a_streaming_response_holds_the_queue_until_finalized() {
    let h = harness();
    let (first_id, handle) = streaming_turn(&h).await;

    // The send settles as soon as streaming is confirmed...
    assert_eq!(handle.await, Ok(()));
    assert_eq!(h.sink.received.lock().unwrap().len(), 1);
    assert_eq!(
        h.service.streaming_message_id(),
        Some(ResponseId::from_string("r1"))
    );

    // ...but the queue does not advance past the streaming turn.
    let second = OutboundMessage::new("next question");
    let second_id = second.id.clone();
    let handle_two = h
        .service
        .send(second, MessageSource::UserInput, None, RequestOptions::default());
    h.transport.release();
    drain().await;
    assert_eq!(h.transport.dispatched_ids(), [first_id.clone()]);
    assert_eq!(h.service.current_request_id(), Some(first_id.clone()));

    h.service.finalize_stream("r1");
    drain().await;

    assert_eq!(h.service.streaming_message_id(), None);
    assert_eq!(h.transport.dispatched_ids(), [first_id, second_id]);
    assert_eq!(handle_two.await, Ok(()));
    // The abort handle for the finalized turn is gone.
    assert!(h.service.inner.lock_aborts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn finalize_accepts_any_recorded_alias() {
    let h = harness();
    let (first_id, handle) = streaming_turn(&h).await;
    assert_eq!(handle.await, Ok(()));

    // The item id and the original request id both route to the same turn.
    h.service.finalize_stream("i1");
    drain().await;
    assert_eq!(h.service.streaming_message_id(), None);
    assert_eq!(h.service.current_request_id(), None);

    // Finalizing again (by another alias) is a no-op.
    h.service.finalize_stream(first_id.as_str());
    assert_eq!(h.service.current_request_id(), None);
}

#[tokio::test(start_paused = true)]
async fn mid_stream_cancel_stops_the_turn_without_a_notice() {
    let h = harness();
    let (_, handle) = streaming_turn(&h).await;
    assert_eq!(handle.await, Ok(()));

    h.service
        .cancel_by_id("r1", false, CancelReason::UserCancelled);

    // Stopping an in-progress stream is visible in the transcript already;
    // no synthetic cancellation notice.
    assert!(h.sink.notices().is_empty());
    let token = h.transport.cancel_tokens.lock().unwrap()[0].clone();
    assert!(token.is_cancelled());
    assert_eq!(h.service.streaming_message_id(), None);

    drain().await;
    assert_eq!(h.service.current_request_id(), None);
    assert!(h.sink.stop_streaming.lock().unwrap().contains(&false));
}

#[tokio::test(start_paused = true)]
async fn mid_stream_cancel_by_item_id_stops_the_turn() {
    let h = harness();
    // The chunk's item id differs from both its response id and the
    // original request id.
    let (request_id, handle) = streaming_turn(&h).await;
    assert_eq!(handle.await, Ok(()));
    assert_ne!(request_id.as_str(), "i1");

    h.service
        .cancel_by_id("i1", false, CancelReason::UserCancelled);

    assert!(h.sink.notices().is_empty());
    let token = h.transport.cancel_tokens.lock().unwrap()[0].clone();
    assert!(token.is_cancelled());
    assert_eq!(h.service.streaming_message_id(), None);

    drain().await;
    assert_eq!(h.service.current_request_id(), None);
}

#[tokio::test(start_paused = true)]
async fn settling_a_streaming_turn_repoints_the_processed_alias() {
    let h = harness();

    // A completed prior turn leaves a processed id behind.
    let first = OutboundMessage::new("warm up");
    let first_id = first.id.clone();
    let handle = h
        .service
        .send(first, MessageSource::UserInput, None, RequestOptions::default());
    assert_eq!(handle.await, Ok(()));
    drain().await;

    let (second_id, handle) = streaming_turn(&h).await;
    assert_eq!(handle.await, Ok(()));

    // Once the streaming turn settles, the processed alias names that turn,
    // not the one before it.
    let meta = h
        .service
        .inner
        .streaming
        .meta_for(&ResponseId::from_string("r1"))
        .expect("tracked turn");
    assert_eq!(meta.request_id, second_id.clone());
    assert_eq!(meta.processed_alias, Some(second_id));
    assert_ne!(meta.processed_alias, Some(first_id));
}

#[tokio::test(start_paused = true)]
async fn any_cancel_during_a_streaming_turn_targets_that_turn() {
    let h = harness();
    let (_, handle) = streaming_turn(&h).await;
    assert_eq!(handle.await, Ok(()));

    // Ids that match nothing still stop the active stream.
    h.service
        .cancel_by_id("unrelated-id", false, CancelReason::UserCancelled);

    drain().await;
    assert_eq!(h.service.streaming_message_id(), None);
    assert_eq!(h.service.current_request_id(), None);
}

#[tokio::test(start_paused = true)]
async fn an_atomic_response_settles_and_advances_immediately() {
    let h = harness();
    h.transport.script([TransportBehavior::HoldUntilReleased]);

    let message = OutboundMessage::new("quick question");
    let id = message.id.clone();
    let handle = h
        .service
        .send(message, MessageSource::UserInput, None, RequestOptions::default());
    drain().await;

    h.service.handle_response(chunk(&id, false)).await;

    assert_eq!(handle.await, Ok(()));
    assert_eq!(h.service.streaming_message_id(), None);
    assert_eq!(h.service.current_request_id(), None);

    let received = h.sink.received.lock().unwrap();
    assert_eq!(received.len(), 1);
    // Delivery time is stamped when the response carries none.
    assert!(received[0].received_at.is_some());
}
