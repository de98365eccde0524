//! Integration tests for offline writes and their replay.

mod common;

use common::*;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tether_core::queue::DiscardReason;
use tether_core::{
    NetworkMonitor, QueueEvent, RequestOrchestrator, RetryPolicy, SqliteStore, WriteOptions,
    Written,
};

async fn queue_post(h: &Harness, id: &str, body: Value) {
    let written: Written<Value> = h
        .orchestrator
        .post("/chat", &body, WriteOptions::new().with_mutation_id(id))
        .await
        .unwrap();
    assert!(written.is_queued());
}

fn pending_ids(h: &Harness) -> Vec<String> {
    h.orchestrator
        .queue()
        .list_pending()
        .unwrap()
        .into_iter()
        .map(|m| m.id)
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_replay_delivers_in_enqueue_order() {
    let h = harness();
    h.go_offline();
    for (i, id) in ["A", "B", "C"].iter().enumerate() {
        queue_post(&h, id, json!({ "seq": i })).await;
        h.clock.advance(Duration::from_millis(10));
    }

    h.go_online();
    let report = h.orchestrator.replay_now().await.unwrap();

    assert_eq!(report.delivered, 3);
    assert_eq!(report.remaining, 0);
    assert_eq!(
        h.transport.sent_payloads(),
        vec![json!({"seq": 0}), json!({"seq": 1}), json!({"seq": 2})]
    );
    let keys: Vec<_> = h
        .transport
        .sent()
        .iter()
        .map(|r| r.header("Idempotency-Key").unwrap().to_string())
        .collect();
    assert_eq!(keys, vec!["A", "B", "C"]);
}

#[tokio::test(start_paused = true)]
async fn test_replay_skipped_while_offline() {
    let h = harness();
    h.go_offline();
    queue_post(&h, "A", json!(1)).await;

    let report = h.orchestrator.replay_now().await.unwrap();
    assert!(report.deferred);
    assert_eq!(report.remaining, 1);
    assert_eq!(h.transport.sent_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failing_mutation_is_discarded_after_five_passes() {
    let h = single_attempt_harness();
    let mut events = h.orchestrator.queue().subscribe_events();
    h.go_offline();
    queue_post(&h, "m1", json!({"text": "hello"})).await;

    h.go_online();
    h.transport.set_fallback(status(500));

    for expected in 1..=4 {
        let report = h.orchestrator.replay_now().await.unwrap();
        assert_eq!(report.retained, 1);
        let pending = h.orchestrator.queue().list_pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].retry_count, expected);
    }

    let report = h.orchestrator.replay_now().await.unwrap();
    assert_eq!(report.discarded, 1);
    assert!(h.orchestrator.queue().is_empty().unwrap());

    let mut discarded = None;
    while let Ok(event) = events.try_recv() {
        if let QueueEvent::Discarded { id, reason } = event {
            discarded = Some((id, reason));
        }
    }
    assert_eq!(
        discarded,
        Some((
            "m1".to_string(),
            DiscardReason::RetriesExhausted { retry_count: 5 }
        ))
    );
}

#[tokio::test(start_paused = true)]
async fn test_server_errors_exhaust_retries_through_open_breaker() {
    let h = harness();
    let mut events = h.orchestrator.queue().subscribe_events();
    h.go_offline();
    queue_post(&h, "m1", json!({"text": "hello"})).await;

    h.go_online();
    h.transport.set_fallback(status(500));

    // Pass 1 makes four attempts; later passes open the breaker mid-sequence
    // or run a half-open trial after each cooldown. All reached the server.
    let expected_sent = [4, 5, 6, 7];
    for (pass, sent) in expected_sent.iter().enumerate() {
        h.clock.advance(Duration::from_secs(61));
        let report = h.orchestrator.replay_now().await.unwrap();
        assert_eq!(report.retained, 1, "pass {}", pass + 1);
        assert!(!report.deferred);
        assert_eq!(h.transport.sent_count(), *sent);
        let pending = h.orchestrator.queue().get("m1").unwrap().unwrap();
        assert_eq!(pending.retry_count, pass as u32 + 1);
    }

    h.clock.advance(Duration::from_secs(61));
    let report = h.orchestrator.replay_now().await.unwrap();
    assert_eq!(report.discarded, 1);
    assert!(h.orchestrator.queue().is_empty().unwrap());

    let discarded: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
        .filter_map(|event| match event {
            QueueEvent::Discarded { id, reason } => Some((id, reason)),
            _ => None,
        })
        .collect();
    assert_eq!(
        discarded,
        vec![(
            "m1".to_string(),
            DiscardReason::RetriesExhausted { retry_count: 5 }
        )]
    );
}

#[tokio::test(start_paused = true)]
async fn test_open_breaker_before_any_attempt_does_not_count() {
    let h = harness();
    h.go_offline();
    queue_post(&h, "m1", json!(1)).await;
    h.go_online();
    h.transport.set_fallback(status(500));

    h.orchestrator.replay_now().await.unwrap();
    h.orchestrator.replay_now().await.unwrap();
    assert_eq!(h.orchestrator.queue().get("m1").unwrap().unwrap().retry_count, 2);

    // Still inside the cooldown: nothing is sent and the count holds
    let report = h.orchestrator.replay_now().await.unwrap();
    assert!(report.deferred);
    assert_eq!(h.transport.sent_count(), 5);
    assert_eq!(h.orchestrator.queue().get("m1").unwrap().unwrap().retry_count, 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_mutation_blocks_later_ones() {
    let h = single_attempt_harness();
    h.go_offline();
    queue_post(&h, "A", json!("a")).await;
    h.clock.advance(Duration::from_millis(10));
    queue_post(&h, "B", json!("b")).await;

    h.go_online();
    h.transport.push(status(503));
    let report = h.orchestrator.replay_now().await.unwrap();

    assert_eq!(report.retained, 1);
    assert_eq!(report.delivered, 0);
    assert_eq!(h.transport.sent_count(), 1);
    assert_eq!(pending_ids(&h), vec!["A", "B"]);

    let report = h.orchestrator.replay_now().await.unwrap();
    assert_eq!(report.delivered, 2);
    assert!(h.orchestrator.queue().is_empty().unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_rejected_mutation_is_dropped_and_replay_continues() {
    let h = harness();
    h.go_offline();
    queue_post(&h, "bad", json!("bad")).await;
    h.clock.advance(Duration::from_millis(10));
    queue_post(&h, "good", json!("good")).await;

    h.go_online();
    h.transport.push(Reply::Respond(422, "invalid".to_string()));
    let report = h.orchestrator.replay_now().await.unwrap();

    assert_eq!(report.discarded, 1);
    assert_eq!(report.delivered, 1);
    assert!(h.orchestrator.queue().is_empty().unwrap());
    assert_eq!(h.transport.sent_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_replay_defers_while_circuit_open() {
    let h = harness_with(|b| b.with_retry_policy(RetryPolicy::none()));
    h.transport.set_fallback(status(500));
    for _ in 0..5 {
        let _ = h
            .orchestrator
            .get::<Value>("/health", tether_core::GetOptions::default().no_cache())
            .await;
    }

    h.go_offline();
    queue_post(&h, "A", json!(1)).await;
    h.go_online();

    let sent_before = h.transport.sent_count();
    let report = h.orchestrator.replay_now().await.unwrap();

    assert!(report.deferred);
    assert_eq!(h.transport.sent_count(), sent_before);
    let pending = h.orchestrator.queue().list_pending().unwrap();
    assert_eq!(pending[0].retry_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_online_transition_triggers_replay() {
    let h = harness();
    h.go_offline();
    h.orchestrator.init();
    assert!(h.orchestrator.is_initialized());

    queue_post(&h, "A", json!("a")).await;
    queue_post(&h, "B", json!("b")).await;
    assert_eq!(h.transport.sent_count(), 0);

    h.go_online();
    let queue_empty = || h.orchestrator.queue().is_empty().unwrap();
    wait_until(queue_empty).await;
    assert_eq!(h.transport.sent_count(), 2);

    h.orchestrator.dispose();
    assert!(!h.orchestrator.is_initialized());
}

#[tokio::test(start_paused = true)]
async fn test_init_while_online_replays_leftovers() {
    let h = harness();
    h.go_offline();
    queue_post(&h, "left", json!("over")).await;
    h.go_online();

    h.orchestrator.init();
    wait_until(|| h.orchestrator.queue().is_empty().unwrap()).await;
    assert_eq!(h.transport.sent_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dispose_stops_monitoring_started_by_init() {
    let monitor = Arc::new(NetworkMonitor::default().with_probe(Arc::new(FixedProbe(true))));
    let h = harness_with_monitor(Arc::clone(&monitor), |b| b);

    h.orchestrator.init();
    assert!(monitor.is_monitoring());

    h.orchestrator.dispose();
    assert!(!monitor.is_monitoring());
}

#[tokio::test(start_paused = true)]
async fn test_dispose_leaves_shared_monitoring_running() {
    let monitor = Arc::new(NetworkMonitor::default().with_probe(Arc::new(FixedProbe(true))));
    monitor.start();

    let h = harness_with_monitor(Arc::clone(&monitor), |b| b);
    h.orchestrator.init();
    h.orchestrator.dispose();
    assert!(monitor.is_monitoring());

    h.orchestrator.init();
    drop(h);
    assert!(monitor.is_monitoring());
    monitor.stop();
}

#[tokio::test(start_paused = true)]
async fn test_write_racing_replay_is_kept_exactly_once() {
    let h = harness();
    h.go_offline();
    queue_post(&h, "A", json!("first")).await;
    h.go_online();

    // A is in flight for one second while the app goes offline and writes again
    h.transport.push(Reply::Delayed(Duration::from_secs(1), 200, "{}".to_string()));
    let concurrent_writes = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.go_offline();
        h.clock.advance(Duration::from_millis(10));
        queue_post(&h, "B", json!("second")).await;
        queue_post(&h, "A", json!("edited")).await;
    };
    let (report, _) = tokio::join!(h.orchestrator.replay_now(), concurrent_writes);
    let report = report.unwrap();

    // The stale copy of A went out, but the edited one stays queued
    assert_eq!(report.delivered, 1);
    assert_eq!(report.remaining, 2);
    let pending = h.orchestrator.queue().list_pending().unwrap();
    let ids: Vec<_> = pending.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["A", "B"]);

    let edited: Value = serde_json::from_slice(&pending[0].payload).unwrap();
    assert_eq!(edited, json!("edited"));
}

#[tokio::test(start_paused = true)]
async fn test_queue_survives_restart_with_sqlite_store() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("tether.sqlite");

    {
        let transport = Arc::new(ScriptedTransport::new());
        let orchestrator = RequestOrchestrator::builder(BASE_URL)
            .with_transport(transport.clone())
            .with_store(Arc::new(SqliteStore::open(&db_path).unwrap()))
            .build()
            .unwrap();
        orchestrator
            .monitor()
            .report(tether_core::LinkHints::offline());

        let written: Written<Value> = orchestrator
            .post("/chat", &json!({"text": "persist"}), WriteOptions::new().with_mutation_id("p1"))
            .await
            .unwrap();
        assert!(written.is_queued());
    }

    let transport = Arc::new(ScriptedTransport::new());
    let orchestrator = RequestOrchestrator::builder(BASE_URL)
        .with_transport(transport.clone())
        .with_store(Arc::new(SqliteStore::open(&db_path).unwrap()))
        .build()
        .unwrap();

    let pending = orchestrator.queue().list_pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, "p1");

    let report = orchestrator.replay_now().await.unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(transport.sent_payloads(), vec![json!({"text": "persist"})]);
}
