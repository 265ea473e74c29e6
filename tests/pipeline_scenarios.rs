//! End-to-end ingestion scenarios over a scripted upstream.

use std::sync::Arc;
use std::time::Duration;

use telemetry_pipeline::ingest::BatchEntry;
use telemetry_pipeline::observability::metrics;
use telemetry_pipeline::Pipeline;

mod common;

use common::{frame, padded_frame, test_config, CollectingObserver, ScriptedConnector};

#[tokio::test(start_paused = true)]
async fn test_250_messages_make_three_batches() {
    let frames = (0..250).map(|_| frame("trade")).collect();
    let connector = ScriptedConnector::new(vec![Ok(frames)]);
    let observer = CollectingObserver::new();

    let pipeline = Pipeline::builder(test_config())
        .observer(observer.clone())
        .without_monitors()
        .build();
    pipeline.start(connector).unwrap();

    assert!(observer.wait_for_messages(250, Duration::from_secs(5)).await);
    assert_eq!(observer.sizes(), vec![100, 100, 50]);

    let sequences: Vec<u64> = observer.batches().iter().map(|b| b.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3]);
    assert_eq!(pipeline.metrics().value(metrics::MESSAGES_PROCESSED), Some(250.0));

    pipeline.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_only_large_messages_are_compressed() {
    let small = padded_frame("market_data", 500);
    let large = padded_frame("market_data", 2000);
    assert_eq!((small.len(), large.len()), (500, 2000));

    let connector = ScriptedConnector::new(vec![Ok(vec![small, large.clone()])]);
    let observer = CollectingObserver::new();
    let mut config = test_config();
    config.compression.min_size_bytes = 1024;

    let pipeline = Pipeline::builder(config)
        .observer(observer.clone())
        .without_monitors()
        .build();
    pipeline.start(connector).unwrap();
    assert!(observer.wait_for_messages(2, Duration::from_secs(5)).await);

    let entries: Vec<BatchEntry> = observer
        .batches()
        .iter()
        .flat_map(|b| b.entries.clone())
        .collect();
    assert_eq!(entries.len(), 2);
    assert!(!entries[0].is_compressed());
    assert_eq!(entries[0].wire_len(), 500);
    assert!(entries[1].is_compressed());
    assert!(entries[1].wire_len() < 2000);
    assert_eq!(entries[1].raw_bytes().unwrap(), large);
    assert!(entries[1].fields().contains_key("pad"));

    assert!(pipeline.compression().has_stats_for("market_data"));
    pipeline.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_unknown_and_malformed_frames_do_not_stall_ingestion() {
    let frames = vec![
        b"not json".to_vec(),
        br#"{"timestamp":"2024-01-01T00:00:00Z"}"#.to_vec(),
        frame("heartbeat"),
        frame("trade"),
    ];
    let connector = ScriptedConnector::new(vec![Ok(frames)]);
    let observer = CollectingObserver::new();

    let pipeline = Pipeline::builder(test_config())
        .observer(observer.clone())
        .without_monitors()
        .build();
    pipeline.start(connector).unwrap();

    assert!(observer.wait_for_messages(2, Duration::from_secs(5)).await);
    assert_eq!(pipeline.metrics().value(metrics::PROTOCOL_ERRORS), Some(2.0));
    assert_eq!(pipeline.metrics().value(metrics::MESSAGES_RECEIVED), Some(4.0));
    pipeline.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_slow_observer_causes_counted_drops() {
    let frames = (0..200).map(|_| frame("trade")).collect();
    let connector = ScriptedConnector::new(vec![Ok(frames)]);
    let observer = CollectingObserver::slow(Duration::from_secs(1));

    let mut config = test_config();
    config.batching.message_queue_size = 10;
    config.batching.message_batch_size = 5;
    config.connection.enqueue_timeout_ms = 100;

    let pipeline = Arc::new(
        Pipeline::builder(config)
            .observer(observer.clone())
            .without_market_metrics()
            .without_monitors()
            .build(),
    );
    pipeline.start(connector).unwrap();

    let dropped = || pipeline.metrics().value(metrics::DROPPED_MESSAGES).unwrap_or(0.0);
    tokio::time::sleep(Duration::from_secs(2)).await;
    let early = dropped();
    tokio::time::sleep(Duration::from_secs(2)).await;
    let later = dropped();

    assert!(early > 0.0);
    assert!(later > early);
    pipeline.stop().await;
}
