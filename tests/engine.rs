//! End-to-end engine tests against a stub HTTP server.

use std::time::Duration;

use reqwest::Method;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use loadmaster_engine::{
    Endpoint, EngineError, RunConfig, RunExport, RunState, TestSession, TrafficPattern,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn get_endpoint(p: &str) -> Endpoint {
    Endpoint {
        path: p.into(),
        method: Method::GET,
        parameters: vec![],
        request_body: None,
    }
}

async fn stub_server(p: &str, status: u16, delay: Duration) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(p))
        .respond_with(ResponseTemplate::new(status).set_delay(delay))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn sequential_run_against_stub_server() {
    init_logging();
    let server = stub_server("/items", 200, Duration::from_millis(10)).await;

    let session = TestSession::new();
    let mut config = RunConfig::new(server.uri(), vec![get_endpoint("/items")]);
    config.concurrency = 1;
    config.duration_seconds = 1;
    config.pattern = TrafficPattern::Sequential;

    let handle = session.start_run(config).unwrap();
    let state = handle.wait().await;
    assert_eq!(state, RunState::Completed);

    let snap = handle.snapshot();
    assert_eq!(snap.total_requests, snap.success_count + snap.failure_count);
    assert_eq!(snap.failure_count, 0);
    assert_eq!(snap.error_rate_pct, 0.0);
    // one request in flight at a time against a ~10ms endpoint for 1s
    assert!(snap.total_requests >= 15, "only {} requests", snap.total_requests);
    assert!(snap.total_requests <= 200, "{} requests", snap.total_requests);
    assert!(snap.p50_latency_ms >= 10);
    assert!(snap.min_latency_ms <= snap.p50_latency_ms);
    assert!(snap.p50_latency_ms <= snap.p90_latency_ms);
    assert!(snap.p90_latency_ms <= snap.p99_latency_ms);
    assert!(snap.p99_latency_ms <= snap.max_latency_ms);
    assert_eq!(snap.status_code_histogram[&200], snap.total_requests);
    assert!(snap.requests_per_second > 0.0);

    let history = session.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].state, RunState::Completed);
    assert_eq!(history[0].outcomes.len() as u64, snap.total_requests);
}

#[tokio::test]
async fn cancel_mid_run_drains_and_loses_nothing() {
    init_logging();
    let server = stub_server("/slow", 200, Duration::from_millis(100)).await;

    let session = TestSession::new();
    let mut config = RunConfig::new(server.uri(), vec![get_endpoint("/slow")]);
    config.concurrency = 3;
    config.duration_seconds = 10;

    let handle = session.start_run(config).unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    let state = handle.cancel().await;
    assert_eq!(state, RunState::Cancelled);
    // idempotent: waiting again returns the same terminal state
    assert_eq!(handle.wait().await, RunState::Cancelled);

    // every issued request was drained and recorded, none lost or killed
    let snap = handle.snapshot();
    assert!(snap.total_requests > 0);
    assert_eq!(snap.total_requests, snap.success_count + snap.failure_count);

    let history = session.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].state, RunState::Cancelled);
    assert_eq!(history[0].outcomes.len() as u64, snap.total_requests);
}

#[tokio::test]
async fn invalid_base_url_fails_before_running() {
    init_logging();
    let session = TestSession::new();
    let config = RunConfig::new("not a url at all", vec![get_endpoint("/items")]);

    let handle = session.start_run(config).unwrap();
    assert_eq!(handle.wait().await, RunState::Failed);
    assert_eq!(handle.snapshot().total_requests, 0);
    assert_eq!(session.history()[0].state, RunState::Failed);
}

#[tokio::test]
async fn config_validation_is_synchronous() {
    let session = TestSession::new();
    let config = RunConfig::new("http://localhost:8080", vec![]);
    assert!(matches!(
        session.start_run(config),
        Err(EngineError::RunConfig(_))
    ));
    // a run that never validated leaves no trace in the history
    assert!(session.history().is_empty());
}

#[tokio::test]
async fn interleaved_pattern_keeps_all_endpoints_in_flight() {
    init_logging();
    let server = MockServer::start().await;
    for p in ["/a", "/b"] {
        Mock::given(method("GET"))
            .and(path(p))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(5)))
            .mount(&server)
            .await;
    }

    let session = TestSession::new();
    let mut config = RunConfig::new(server.uri(), vec![get_endpoint("/a"), get_endpoint("/b")]);
    config.concurrency = 2;
    config.duration_seconds = 1;
    config.pattern = TrafficPattern::Interleaved;

    let handle = session.start_run(config).unwrap();
    assert_eq!(handle.wait().await, RunState::Completed);

    let snap = handle.snapshot();
    let a = &snap.per_endpoint["GET /a"];
    let b = &snap.per_endpoint["GET /b"];
    assert!(a.total_requests > 0);
    assert!(b.total_requests > 0);
    assert_eq!(a.total_requests + b.total_requests, snap.total_requests);
}

#[tokio::test]
async fn rate_limit_throttles_below_concurrency_ceiling() {
    init_logging();
    let server = stub_server("/fast", 200, Duration::from_millis(1)).await;

    let session = TestSession::new();
    let mut config = RunConfig::new(server.uri(), vec![get_endpoint("/fast")]);
    config.concurrency = 10;
    config.duration_seconds = 1;
    config.rate_per_second = Some(20);

    let handle = session.start_run(config).unwrap();
    assert_eq!(handle.wait().await, RunState::Completed);

    let snap = handle.snapshot();
    // unthrottled this setup would push hundreds of requests per second
    assert!(snap.total_requests <= 30, "{} requests", snap.total_requests);
    assert!(snap.total_requests >= 5, "only {} requests", snap.total_requests);
}

#[tokio::test]
async fn failed_requests_are_recorded_not_fatal() {
    init_logging();
    let server = stub_server("/broken", 500, Duration::from_millis(5)).await;

    let session = TestSession::new();
    let mut config = RunConfig::new(server.uri(), vec![get_endpoint("/broken")]);
    config.concurrency = 2;
    config.duration_seconds = 1;

    let handle = session.start_run(config).unwrap();
    // non-2xx statuses never abort the run
    assert_eq!(handle.wait().await, RunState::Completed);

    let snap = handle.snapshot();
    assert!(snap.total_requests > 0);
    assert_eq!(snap.failure_count, snap.total_requests);
    assert_eq!(snap.error_rate_pct, 100.0);
    assert_eq!(snap.status_code_histogram[&500], snap.total_requests);
    assert_eq!(snap.error_distribution["HttpError"], snap.total_requests);
}

#[tokio::test]
async fn connection_refused_is_categorized() {
    init_logging();
    let session = TestSession::new();
    // nothing listens on port 1
    let mut config = RunConfig::new("http://127.0.0.1:1", vec![get_endpoint("/items")]);
    config.concurrency = 1;
    config.duration_seconds = 1;
    config.rate_per_second = Some(10);

    let handle = session.start_run(config).unwrap();
    assert_eq!(handle.wait().await, RunState::Completed);

    let snap = handle.snapshot();
    assert!(snap.total_requests > 0);
    assert_eq!(snap.failure_count, snap.total_requests);
    assert!(snap.error_distribution.contains_key("ConnectionRefused"));
}

#[tokio::test]
async fn full_session_flow_from_schema_to_export() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/openapi.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "paths": {
                "/items": {
                    "get": {
                        "parameters": [
                            {"name": "limit", "in": "query",
                             "schema": {"type": "integer", "minimum": 1, "maximum": 50}}
                        ]
                    }
                }
            }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(5)))
        .mount(&server)
        .await;

    let mut session = TestSession::with_seed(42);
    let url = format!("{}/openapi.json", server.uri());
    let catalog = session.load_catalog(&url).await.unwrap();
    assert_eq!(catalog.endpoints().len(), 1);

    let first = session.generate_all_requests(&catalog).unwrap();
    let second = session.generate_all_requests(&catalog).unwrap();
    assert_eq!(first, second);
    let limit = first[0].parameter_values["limit"].as_i64().unwrap();
    assert!((1..=50).contains(&limit));

    let mut config = RunConfig::new(server.uri(), catalog.endpoints().to_vec());
    config.concurrency = 2;
    config.duration_seconds = 1;

    let handle = session.start_run(config).unwrap();
    assert_eq!(handle.wait().await, RunState::Completed);

    let history = session.history();
    let export = RunExport::from(&history[0]);
    let json = serde_json::to_value(&export).unwrap();
    assert!(json["snapshot"]["totalRequests"].as_u64().unwrap() > 0);
    let rows = json["outcomes"].as_array().unwrap();
    assert_eq!(
        rows.len() as u64,
        json["snapshot"]["totalRequests"].as_u64().unwrap()
    );
    assert_eq!(rows[0]["path"], "/items");
    assert_eq!(rows[0]["statusCode"], 200);
}

#[tokio::test]
async fn snapshot_mid_run_observes_consistent_state() {
    init_logging();
    let server = stub_server("/items", 200, Duration::from_millis(10)).await;

    let session = TestSession::new();
    let mut config = RunConfig::new(server.uri(), vec![get_endpoint("/items")]);
    config.concurrency = 4;
    config.duration_seconds = 2;

    let handle = session.start_run(config).unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    let mid = handle.snapshot();
    assert_eq!(mid.total_requests, mid.success_count + mid.failure_count);

    let state = handle.wait().await;
    assert_eq!(state, RunState::Completed);
    let end = handle.snapshot();
    assert!(end.total_requests >= mid.total_requests);
}
