//! Rate budget behavior through a shared session.

use std::time::{Duration, Instant};

use serde_json::json;
use tokio::sync::mpsc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use inat_session::{ClientError, ClientSession, RateLimitConfig, SessionConfig};

async fn mock_observations(mock_server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/v1/observations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": []})))
        .mount(mock_server)
        .await;
}

fn limited_session(mock_server: &MockServer, rate_limit: RateLimitConfig) -> ClientSession {
    let config = SessionConfig::for_testing(&format!("{}/v1", mock_server.uri()))
        .enable_client_session()
        .without_cache()
        .with_rate_limit(rate_limit);
    ClientSession::new(config).unwrap()
}

#[tokio::test]
async fn test_concurrent_requests_share_budget() {
    let mock_server = MockServer::start().await;
    mock_observations(&mock_server).await;

    // Capacity 3, one token every 250ms
    let rate_limit = RateLimitConfig::per_second(4, 3);
    let session = limited_session(&mock_server, rate_limit);

    let num_requests = 8;
    let (tx, mut rx) = mpsc::channel(num_requests);

    let start = Instant::now();
    for i in 0..num_requests {
        let session = session.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let result = session.get_v1("observations", [("page", i)]).await;
            tx.send((result.is_ok(), start.elapsed())).await.unwrap();
        });
    }

    let mut elapsed = Vec::new();
    for _ in 0..num_requests {
        let (ok, took) = rx.recv().await.unwrap();
        assert!(ok);
        elapsed.push(took);
    }

    let immediate = elapsed.iter().filter(|t| **t < Duration::from_millis(150)).count();
    assert!(immediate <= 3, "{immediate} requests proceeded without waiting");

    // 5 requests beyond capacity need at least 4 refill intervals
    let total = start.elapsed();
    assert!(total >= Duration::from_millis(1000), "finished too quickly: {total:?}");
}

#[tokio::test]
async fn test_cache_hits_do_not_consume_budget() {
    let mock_server = MockServer::start().await;
    mock_observations(&mock_server).await;

    let config = SessionConfig::for_testing(&format!("{}/v1", mock_server.uri()))
        .enable_client_session()
        .with_rate_limit(RateLimitConfig::per_second(1, 2));
    let session = ClientSession::new(config).unwrap();

    session.get_v1("observations", [("q", "a")]).await.unwrap();
    for _ in 0..5 {
        assert!(session.get_v1("observations", [("q", "a")]).await.unwrap().from_cache());
    }

    // The second token is still available
    let start = Instant::now();
    session.get_v1("observations", [("q", "b")]).await.unwrap();
    assert!(start.elapsed() < Duration::from_millis(500));
}

#[tokio::test]
async fn test_max_delay_exceeded_fails_fast() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/observations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": []})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let rate_limit = RateLimitConfig {
        max_delay: Some(Duration::from_millis(10)),
        ..RateLimitConfig::per_second(1, 1)
    };
    let session = limited_session(&mock_server, rate_limit);

    session.get_v1("observations", [("page", 1)]).await.unwrap();
    let start = Instant::now();
    let err = session.get_v1("observations", [("page", 2)]).await.unwrap_err();

    assert!(matches!(err, ClientError::RateLimitExceeded { .. }));
    assert!(err.retry_after().is_some());
    assert!(start.elapsed() < Duration::from_millis(500));
}

#[tokio::test]
async fn test_bypassed_session_is_not_throttled() {
    let mock_server = MockServer::start().await;
    mock_observations(&mock_server).await;

    let config = SessionConfig::for_testing(&format!("{}/v1", mock_server.uri()))
        .with_rate_limit(RateLimitConfig::per_second(1, 1));
    let session = ClientSession::new(config).unwrap();

    let start = Instant::now();
    for page in 0..5 {
        session.get_v1("observations", [("page", page)]).await.unwrap();
    }
    assert!(start.elapsed() < Duration::from_millis(900));
}

#[test]
fn test_zero_capacity_is_config_error() {
    let config = SessionConfig::for_testing("http://127.0.0.1:1")
        .with_rate_limit(RateLimitConfig::per_second(1, 0));
    assert!(matches!(ClientSession::new(config), Err(ClientError::Config(_))));
}
