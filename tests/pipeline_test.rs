use audit_forwarder::app::{Config, Pipeline};
use audit_forwarder::domain::{AuditEvent, AuditEventType};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn make_config(server_uri: &str, dir: &TempDir) -> Config {
    let mut config = Config {
        collector_url: server_uri.to_string(),
        queue_capacity: 100,
        flush_interval_secs: 1,
        health_interval_secs: 1,
        spool_path: dir.path().join("events.ndjson"),
        ..Config::default()
    };
    config.post_process();
    config.validate().unwrap();
    config
}

#[tokio::test]
async fn test_pipeline_delivers_enqueued_events() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/events"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let pipeline = Pipeline::new(&make_config(&server.uri(), &dir)).unwrap();
    pipeline.start();

    for _ in 0..5 {
        pipeline.enqueue(AuditEvent::new(AuditEventType::WorkbookOpen));
    }

    tokio::time::timeout(Duration::from_secs(10), async {
        while pipeline.publisher_stats().await.events_sent < 5 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .unwrap();

    let stats = pipeline.publisher_stats().await;
    assert_eq!(stats.events_sent, 5);
    assert_eq!(stats.queue_len, 0);
    assert!(!stats.spool_has_events);

    // The health monitor probed on start.
    tokio::time::timeout(Duration::from_secs(5), async {
        while pipeline.health_state().healthy != Some(true) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_enqueue_counts_against_queue() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let pipeline = Pipeline::new(&make_config(&server.uri(), &dir)).unwrap();

    // Pipeline never started, so the event stays queued for inspection.
    pipeline.enqueue(AuditEvent::new(AuditEventType::SessionStart));

    let stats = pipeline.queue_stats();
    assert_eq!(stats.len, 1);
    assert_eq!(stats.enqueued, 1);
}

#[tokio::test]
async fn test_shutdown_spools_undelivered_queue() {
    let server = MockServer::start().await;
    // Collector down the whole time.
    Mock::given(method("POST"))
        .and(path("/api/events"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let pipeline = Pipeline::new(&make_config(&server.uri(), &dir)).unwrap();
    pipeline.start();

    for _ in 0..3 {
        pipeline.enqueue(AuditEvent::new(AuditEventType::CellChange));
    }

    pipeline.shutdown().await;

    // Everything still on disk for the next run: either the flush loop
    // spooled a failed batch or shutdown persisted the queue remainder.
    let spooled = pipeline.publisher_stats().await;
    assert!(spooled.spool_has_events);
    assert_eq!(spooled.queue_len, 0);
}
