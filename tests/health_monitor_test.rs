use audit_forwarder::reliability::{HealthConfig, HealthMonitor};
use audit_forwarder::sender::{ClientConfig, CollectorClient};
use std::time::Duration;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn make_client(server_uri: &str) -> CollectorClient {
    CollectorClient::new(ClientConfig {
        base_url: Url::parse(server_uri).unwrap(),
        api_key: None,
        timeout: Duration::from_secs(2),
        connect_timeout: Duration::from_secs(1),
        user_agent: "audit-forwarder-test".to_string(),
    })
    .unwrap()
}

fn make_monitor(server_uri: &str) -> HealthMonitor {
    // Long interval so tests drive probes explicitly via check_now.
    HealthMonitor::new(
        make_client(server_uri),
        HealthConfig {
            check_interval: Duration::from_secs(3600),
        },
    )
}

#[tokio::test]
async fn test_healthy_collector() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .mount(&server)
        .await;

    let monitor = make_monitor(&server.uri());
    monitor.check_now().await;

    let state = monitor.state();
    assert_eq!(state.healthy, Some(true));
    assert_eq!(state.consecutive_successes, 1);
    assert!(state.last_success.is_some());
    assert!(state.last_failure.is_none());
}

#[tokio::test]
async fn test_head_fallback_when_health_endpoint_missing() {
    let server = MockServer::start().await;
    // No /health mock: wiremock answers 404, which should trigger the
    // HEAD probe against the ingestion path.
    Mock::given(method("HEAD"))
        .and(path("/api/events"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let monitor = make_monitor(&server.uri());
    monitor.check_now().await;

    assert_eq!(monitor.is_healthy(), Some(true));
}

#[tokio::test]
async fn test_unhealthy_on_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let monitor = make_monitor(&server.uri());
    monitor.check_now().await;

    let state = monitor.state();
    assert_eq!(state.healthy, Some(false));
    assert_eq!(state.consecutive_failures, 1);
    assert!(state.last_failure.is_some());
}

#[tokio::test]
async fn test_unhealthy_when_collector_unreachable() {
    // Nothing listens here.
    let monitor = make_monitor("http://127.0.0.1:1");
    monitor.check_now().await;

    assert_eq!(monitor.is_healthy(), Some(false));
}

#[tokio::test]
async fn test_status_signal_is_edge_triggered() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let monitor = make_monitor(&server.uri());
    let mut rx = monitor.subscribe();

    // First determination counts as a flip from unknown.
    monitor.check_now().await;
    assert!(rx.recv().await.unwrap());

    // Repeated healthy probes stay silent.
    monitor.check_now().await;
    monitor.check_now().await;
    assert!(rx.try_recv().is_err());

    // A flip to unhealthy fires exactly once.
    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    monitor.check_now().await;
    monitor.check_now().await;
    assert!(!rx.recv().await.unwrap());
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_start_probes_immediately_and_stop_is_idempotent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let monitor = make_monitor(&server.uri());
    monitor.start();
    monitor.start();

    // The out-of-band first probe lands without waiting for the interval.
    tokio::time::timeout(Duration::from_secs(5), async {
        while monitor.is_healthy() != Some(true) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    monitor.stop();
    monitor.stop();
    assert_eq!(monitor.is_healthy(), Some(true));
}
