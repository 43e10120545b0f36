//! Integration tests for concurrent deliveries of the same message.
//!
//! The store's uniqueness constraint is the only synchronisation between
//! racing deliveries; these tests check that exactly one of them records.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use herald_events::{DispatchError, Disposition, FailureKind, PipelineEvent};

/// Test: Racing duplicates produce exactly one record and one success.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_duplicates_record_once() {
    let store = CountingStore::new();
    let dispatcher = ScriptedDispatcher::succeeding().with_delay(Duration::from_millis(50));
    let publisher = RecordingPublisher::new();
    let observer = RecordingObserver::new();
    let pipeline = Arc::new(pipeline(
        store.clone(),
        dispatcher.clone(),
        publisher.clone(),
        observer.clone(),
    ));
    let message = product_message("m1", "p1");

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let pipeline = Arc::clone(&pipeline);
            let message = message.clone();
            tokio::spawn(async move { pipeline.deliver(&message).await.unwrap() })
        })
        .collect();

    let mut dispositions = Vec::new();
    for task in tasks {
        dispositions.push(task.await.unwrap());
    }

    let processed = dispositions
        .iter()
        .filter(|d| **d == Disposition::Processed)
        .count();
    let lost = dispositions
        .iter()
        .filter(|d| {
            matches!(
                d,
                Disposition::DeadLettered {
                    kind: FailureKind::NotRetryable,
                    ..
                }
            )
        })
        .count();
    let duplicates = dispositions
        .iter()
        .filter(|d| **d == Disposition::Duplicate)
        .count();

    assert_eq!(processed, 1, "exactly one delivery records: {dispositions:?}");
    assert_eq!(processed + lost + duplicates, 8);
    assert_eq!(store.inner.len(), 1);
    assert_eq!(publisher.count(), lost);
    assert_eq!(
        observer.count(|e| matches!(e, PipelineEvent::RecordRaceLost { .. })),
        lost
    );

    // Every racer that got past the lookup dispatched.
    assert_eq!(dispatcher.call_count(), processed + lost);
}

/// Test: Concurrent deliveries of distinct messages do not interfere.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_distinct_messages_in_parallel() {
    let store = CountingStore::new();
    let dispatcher = ScriptedDispatcher::succeeding().with_delay(Duration::from_millis(20));
    let pipeline = Arc::new(pipeline(
        store.clone(),
        dispatcher.clone(),
        RecordingPublisher::new(),
        RecordingObserver::new(),
    ));

    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let pipeline = Arc::clone(&pipeline);
            let message = product_message(&format!("m{i}"), &format!("p{i}"));
            tokio::spawn(async move { pipeline.deliver(&message).await.unwrap() })
        })
        .collect();

    for task in tasks {
        assert_eq!(task.await.unwrap(), Disposition::Processed);
    }

    assert_eq!(store.inner.len(), 20);
    assert_eq!(dispatcher.call_count(), 20);
    assert_eq!(store.saves(), 20);
}

/// Test: A message redelivered after the race settles is a plain duplicate.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_redelivery_after_race_is_duplicate() {
    let dispatcher = ScriptedDispatcher::succeeding().with_delay(Duration::from_millis(20));
    let pipeline = Arc::new(pipeline(
        CountingStore::new(),
        dispatcher.clone(),
        RecordingPublisher::new(),
        RecordingObserver::new(),
    ));
    let message = product_message("m1", "p1");

    let first = {
        let pipeline = Arc::clone(&pipeline);
        let message = message.clone();
        tokio::spawn(async move { pipeline.deliver(&message).await.unwrap() })
    };
    let second = {
        let pipeline = Arc::clone(&pipeline);
        let message = message.clone();
        tokio::spawn(async move { pipeline.deliver(&message).await.unwrap() })
    };
    first.await.unwrap();
    second.await.unwrap();

    let dispatched = dispatcher.call_count();
    assert_eq!(
        pipeline.deliver(&message).await.unwrap(),
        Disposition::Duplicate
    );
    assert_eq!(dispatcher.call_count(), dispatched);
}

/// Test: Concurrent deliveries of one message each get the full retry budget.
#[tokio::test(start_paused = true)]
async fn test_concurrent_retries_count_per_delivery() {
    let dispatcher = ScriptedDispatcher::failing(DispatchError::Timeout, 100);
    let publisher = RecordingPublisher::new();
    let pipeline = pipeline(
        CountingStore::new(),
        dispatcher.clone(),
        publisher.clone(),
        RecordingObserver::new(),
    );
    let message = product_message("m1", "p1");

    let started = tokio::time::Instant::now();
    let (a, b) = tokio::join!(pipeline.deliver(&message), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        pipeline.deliver(&message).await
    });

    for disposition in [a.unwrap(), b.unwrap()] {
        match disposition {
            Disposition::DeadLettered { attempts, kind, .. } => {
                assert_eq!(attempts, 4);
                assert_eq!(kind, FailureKind::Retryable);
            }
            other => panic!("expected dead letter, got {other:?}"),
        }
    }

    // Four dispatches each: the first try plus three redeliveries.
    assert_eq!(dispatcher.call_count(), 8);
    assert!(started.elapsed() >= Duration::from_millis(350));

    let attempts: Vec<u32> = publisher
        .published()
        .iter()
        .map(|(_, record)| record.attempts)
        .collect();
    assert_eq!(attempts, vec![4, 4]);
}
