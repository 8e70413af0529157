//! Integration tests for BufferProxy against the simulated resource
//!
//! Covers submission ordering, single-flight dispatch, the error drain,
//! abort, foreign mutation and CONFIGURE handling.

use std::rc::Rc;

use tokio_test::{assert_pending, assert_ready_err, assert_ready_ok, task};

use mse2_media_core::prelude::*;
use mse2_media_core::simulated::SimCall;

/// Attached source with one buffer created through the container proxy
async fn open_buffer(
    content_type: &str,
) -> (Rc<SimulatedMediaSource>, ContainerProxy, BufferProxy, Rc<SimulatedBuffer>) {
    let source = SimulatedMediaSource::new();
    source.attach();
    let container = ContainerProxy::new(source.clone());
    let buffer = container
        .add_buffer(content_type)
        .await
        .expect("buffer should be created");
    let sim = source.buffer(0).expect("simulated buffer should exist");
    (source, container, buffer, sim)
}

#[tokio::test]
async fn test_operations_complete_in_submission_order() {
    println!("🧪 Testing FIFO completion across operation kinds");

    let (_source, _container, buffer, sim) = open_buffer("video/mp4").await;

    let mut first = task::spawn(buffer.append(vec![0u8; 1000]));
    let mut removal = task::spawn(buffer.remove_range(0.0, 0.005));
    let mut second = task::spawn(buffer.append(vec![1u8; 500]));
    let mut offset = task::spawn(buffer.set_timestamp_offset(2.5));
    let mut retype = task::spawn(buffer.change_type("video/webm; codecs=\"vp9\""));

    assert_pending!(first.poll());
    assert_pending!(removal.poll());
    assert_eq!(sim.calls(), vec![SimCall::Append(1000)]);
    assert_eq!(buffer.pending_operations(), 4);

    assert!(sim.complete_update());
    assert_ready_ok!(first.poll());
    assert_pending!(removal.poll());
    assert_pending!(second.poll());

    assert!(sim.complete_update());
    assert_ready_ok!(removal.poll());
    assert_pending!(second.poll());
    assert_pending!(offset.poll());

    assert!(sim.complete_update());
    assert_ready_ok!(second.poll());
    assert_ready_ok!(offset.poll());
    assert_ready_ok!(retype.poll());

    assert_eq!(
        sim.calls(),
        vec![
            SimCall::Append(1000),
            SimCall::RemoveRange(0.0, 0.005),
            SimCall::Append(500),
            SimCall::SetTimestampOffset(2.5),
            SimCall::ChangeType("video/webm; codecs=\"vp9\"".to_string()),
        ]
    );
    assert_eq!(sim.overlapping_calls(), 0);
    assert_eq!(buffer.pending_operations(), 0);

    println!("✅ FIFO completion test PASSED!");
}

#[tokio::test]
async fn test_only_one_operation_in_flight() {
    println!("🧪 Testing single-flight dispatch");

    let (_source, _container, buffer, sim) = open_buffer("audio/mp4").await;

    let appends: Vec<_> = (0..10)
        .map(|i| buffer.append(vec![i as u8; 100]))
        .collect();

    for completed in 0..10 {
        assert!(buffer.has_operation_in_flight());
        assert!(buffer.is_updating());
        assert_eq!(sim.append_count(), completed + 1);
        assert_eq!(buffer.pending_operations(), 9 - completed);
        assert!(sim.complete_update());
    }

    assert!(!buffer.has_operation_in_flight());
    assert_eq!(sim.overlapping_calls(), 0);

    for append in appends {
        append.await.expect("append should succeed");
    }

    println!("✅ Single-flight test PASSED!");
}

#[tokio::test]
async fn test_resource_error_fails_outstanding_operations() {
    println!("🧪 Testing error drain of the in-flight and queued operations");

    let (_source, _container, buffer, sim) = open_buffer("video/mp4").await;

    let mut ops: Vec<_> = (0..5)
        .map(|i| task::spawn(buffer.append(vec![i as u8; 64])))
        .collect();

    assert!(sim.complete_update());
    assert_ready_ok!(ops[0].poll());

    let decode_error = MediaSourceError::resource("decode error");
    assert!(sim.fail_update(decode_error.clone()));

    for op in ops.iter_mut().skip(1) {
        assert_eq!(assert_ready_err!(op.poll()), decode_error);
    }
    assert_eq!(buffer.pending_operations(), 0);
    assert!(!buffer.has_operation_in_flight());
    assert_eq!(sim.append_count(), 2);

    // The trailing update-complete lifts the error; new work is accepted.
    let mut retry = task::spawn(buffer.append(vec![9u8; 64]));
    assert_pending!(retry.poll());
    assert_eq!(sim.append_count(), 3);
    assert!(sim.complete_update());
    assert_ready_ok!(retry.poll());

    println!("✅ Error drain test PASSED!");
}

#[tokio::test]
async fn test_submissions_wait_out_a_recorded_error() {
    println!("🧪 Testing submissions while a resource error is still recorded");

    let (_source, _container, buffer, sim) = open_buffer("video/mp4").await;

    let mut failed = task::spawn(buffer.append(vec![0u8; 10]));
    assert_pending!(failed.poll());

    let decode_error = MediaSourceError::resource("decode error");
    assert!(sim.report_error(decode_error.clone()));
    assert_eq!(assert_ready_err!(failed.poll()), decode_error);
    assert!(sim.is_busy());

    let mut append = task::spawn(buffer.append(vec![1u8; 20]));
    let mut offset = task::spawn(buffer.set_timestamp_offset(4.0));
    assert_pending!(append.poll());
    assert_pending!(offset.poll());
    assert_eq!(buffer.pending_operations(), 2);
    assert!(!buffer.has_operation_in_flight());
    assert_eq!(sim.calls(), vec![SimCall::Append(10)]);

    // The trailing update-complete lifts the error and dispatches the queue.
    assert!(sim.complete_update());
    assert_pending!(append.poll());
    assert_pending!(offset.poll());
    assert!(buffer.has_operation_in_flight());

    assert!(sim.complete_update());
    assert_ready_ok!(append.poll());
    assert_ready_ok!(offset.poll());
    assert_eq!(
        sim.calls(),
        vec![
            SimCall::Append(10),
            SimCall::Append(20),
            SimCall::SetTimestampOffset(4.0),
        ]
    );
    assert_eq!(sim.overlapping_calls(), 0);

    println!("✅ Recorded error test PASSED!");
}

#[tokio::test]
async fn test_abort_while_error_recorded_only_forwards_abort() {
    println!("🧪 Testing abort during a resource error");

    let (_source, _container, buffer, sim) = open_buffer("audio/mp4").await;

    let mut failed = task::spawn(buffer.append(vec![0u8; 10]));
    assert_pending!(failed.poll());

    let decode_error = MediaSourceError::resource("decode error");
    assert!(sim.report_error(decode_error.clone()));
    assert_eq!(assert_ready_err!(failed.poll()), decode_error);

    let mut queued = task::spawn(buffer.append(vec![1u8; 20]));
    assert_pending!(queued.poll());

    // The queued append is not cancelled; the abort ends the failed update,
    // whose update-complete lifts the error and dispatches it.
    buffer.abort().expect("raw abort should be forwarded");
    assert_pending!(queued.poll());
    assert_eq!(
        sim.calls(),
        vec![SimCall::Append(10), SimCall::Abort, SimCall::Append(20)]
    );

    assert!(sim.complete_update());
    assert_ready_ok!(queued.poll());
    assert!(!buffer.has_operation_in_flight());

    println!("✅ Abort during error test PASSED!");
}

#[tokio::test]
async fn test_abort_with_nothing_outstanding() {
    println!("🧪 Testing abort on an idle buffer");

    let (_source, _container, buffer, sim) = open_buffer("audio/webm").await;

    buffer.abort().expect("abort should be forwarded");
    assert_eq!(sim.calls(), vec![SimCall::Abort]);

    let append = buffer.append(vec![0u8; 10]);
    assert!(sim.complete_update());
    append.await.expect("append after abort should succeed");

    println!("✅ Idle abort test PASSED!");
}

#[tokio::test]
async fn test_abort_cancels_every_outstanding_operation() {
    println!("🧪 Testing abort of in-flight and queued operations");

    let (_source, _container, buffer, sim) = open_buffer("video/mp4").await;

    let mut in_flight = task::spawn(buffer.append(vec![0u8; 10]));
    let mut queued_remove = task::spawn(buffer.remove_range(0.0, 1.0));
    let mut queued_append = task::spawn(buffer.append(vec![1u8; 10]));
    assert_pending!(in_flight.poll());

    buffer.abort().expect("abort should succeed");

    assert_eq!(assert_ready_err!(in_flight.poll()), MediaSourceError::Aborted);
    assert_eq!(assert_ready_err!(queued_remove.poll()), MediaSourceError::Aborted);
    assert_eq!(assert_ready_err!(queued_append.poll()), MediaSourceError::Aborted);
    assert!(!sim.is_busy());
    assert_eq!(sim.append_window(), (0.0, f64::INFINITY));

    let mut after = task::spawn(buffer.append(vec![2u8; 10]));
    assert_pending!(after.poll());
    assert!(sim.complete_update());
    assert_ready_ok!(after.poll());

    assert_eq!(
        sim.calls(),
        vec![SimCall::Append(10), SimCall::Abort, SimCall::Append(10)]
    );

    println!("✅ Abort cancellation test PASSED!");
}

#[tokio::test]
async fn test_foreign_update_fails_dispatched_operation() {
    println!("🧪 Testing detection of updates started outside the proxy");

    let (_source, _container, buffer, sim) = open_buffer("audio/mpeg").await;

    sim.start_foreign_update();
    let err = buffer
        .append(vec![0u8; 10])
        .await
        .expect_err("append should be rejected");
    assert!(matches!(err, MediaSourceError::InvalidState(_)));
    assert_eq!(sim.append_count(), 0);

    // Once the foreign update finishes the proxy works normally again.
    assert!(sim.complete_update());
    let append = buffer.append(vec![0u8; 10]);
    assert!(sim.complete_update());
    append.await.expect("append should succeed");

    println!("✅ Foreign mutation test PASSED!");
}

#[tokio::test]
async fn test_configure_applies_every_field() {
    println!("🧪 Testing CONFIGURE field application");

    let (_source, _container, buffer, sim) = open_buffer("video/mp4").await;

    let options = BufferOptions::new()
        .with_mode(AppendMode::Sequence)
        .with_timestamp_offset(10.0)
        .with_append_window(5.0, 60.0);
    buffer.configure(options).await.expect("configure should succeed");

    assert_eq!(sim.mode(), AppendMode::Sequence);
    assert_eq!(sim.timestamp_offset(), 10.0);
    assert_eq!(sim.append_window(), (5.0, 60.0));
    assert_eq!(
        sim.calls(),
        vec![
            SimCall::SetMode(AppendMode::Sequence),
            SimCall::SetTimestampOffset(10.0),
            SimCall::SetAppendWindowStart(5.0),
            SimCall::SetAppendWindowEnd(60.0),
        ]
    );

    println!("✅ CONFIGURE application test PASSED!");
}

#[tokio::test]
async fn test_append_window_moves_past_current_end() {
    println!("🧪 Testing append window updates in either order");

    let (_source, _container, buffer, sim) = open_buffer("video/mp4").await;

    buffer.set_append_window(5.0, 10.0).await.expect("first window");
    // Start 20 is past the current end 10, so the end has to move first.
    buffer.set_append_window(20.0, 30.0).await.expect("later window");
    assert_eq!(sim.append_window(), (20.0, 30.0));

    buffer.set_append_window(1.0, 2.0).await.expect("earlier window");
    assert_eq!(sim.append_window(), (1.0, 2.0));

    println!("✅ Append window ordering test PASSED!");
}

#[tokio::test]
async fn test_invalid_configure_is_rejected() {
    println!("🧪 Testing CONFIGURE rejection");

    let (_source, _container, buffer, sim) = open_buffer("video/mp4").await;

    let err = buffer
        .set_append_window(8.0, 8.0)
        .await
        .expect_err("empty window should be rejected");
    assert!(matches!(err, MediaSourceError::InvalidArgument(_)));
    assert!(sim.calls().is_empty());
    assert_eq!(sim.append_window(), (0.0, f64::INFINITY));

    // Rejections settle only their own operation.
    buffer.set_timestamp_offset(1.0).await.expect("offset should apply");

    println!("✅ CONFIGURE rejection test PASSED!");
}

#[tokio::test]
async fn test_remove_range_validation() {
    println!("🧪 Testing REMOVE_RANGE argument validation");

    let (_source, _container, buffer, sim) = open_buffer("audio/mp4").await;

    for (start, end) in [(-1.0, 5.0), (5.0, 5.0), (6.0, 2.0)] {
        let err = buffer
            .remove_range(start, end)
            .await
            .expect_err("invalid range should be rejected");
        assert!(err.is_caller_error(), "unexpected error {:?}", err);
    }
    assert!(sim.calls().is_empty());
    assert!(!buffer.has_operation_in_flight());

    println!("✅ REMOVE_RANGE validation test PASSED!");
}

#[tokio::test]
async fn test_synchronous_rejection_does_not_block_queue() {
    println!("🧪 Testing synchronous resource rejection");

    let (_source, _container, buffer, sim) = open_buffer("audio/mp4").await;
    sim.set_quota(Some(100));

    let mut too_big = task::spawn(buffer.append(vec![0u8; 500]));
    let mut small = task::spawn(buffer.append(vec![0u8; 50]));

    assert!(assert_ready_err!(too_big.poll()).is_quota_exceeded());
    assert_pending!(small.poll());
    assert!(buffer.has_operation_in_flight());

    assert!(sim.complete_update());
    assert_ready_ok!(small.poll());

    println!("✅ Synchronous rejection test PASSED!");
}

#[tokio::test]
async fn test_passthrough_queries() {
    println!("🧪 Testing buffered and track passthroughs");

    let (_source, _container, buffer, sim) = open_buffer("video/mp4; codecs=\"avc1,mp4a\"").await;
    sim.set_seconds_per_byte(0.5);

    assert!(buffer.buffered().expect("buffered").is_empty());
    let append = buffer.append(vec![0u8; 4]);
    assert!(buffer.is_updating());
    assert!(sim.complete_update());
    append.await.expect("append should succeed");

    let buffered = buffer.buffered().expect("buffered");
    assert_eq!(buffered.len(), 1);
    assert_eq!(buffered.start(0), Some(0.0));
    assert_eq!(buffered.end(0), Some(2.0));

    assert_eq!(buffer.video_tracks().len(), 1);
    assert!(buffer.audio_tracks().is_empty());
    assert!(!buffer.is_updating());

    println!("✅ Passthrough test PASSED!");
}

#[tokio::test]
async fn test_dropping_proxy_abandons_operations() {
    println!("🧪 Testing abandonment when the last proxy handle is dropped");

    let (_source, container, buffer, sim) = open_buffer("audio/mp4").await;

    let mut in_flight = task::spawn(buffer.append(vec![0u8; 10]));
    let mut queued = task::spawn(buffer.append(vec![0u8; 10]));
    assert_pending!(in_flight.poll());

    drop(buffer);
    assert!(container.buffers().is_empty());

    assert_eq!(assert_ready_err!(in_flight.poll()), MediaSourceError::Abandoned);
    assert_eq!(assert_ready_err!(queued.poll()), MediaSourceError::Abandoned);

    // Completion events for a dropped proxy are ignored.
    assert!(sim.complete_update());

    println!("✅ Abandonment test PASSED!");
}
