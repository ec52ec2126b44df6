//! End-to-end request flow through the observability pipeline.

use axum::http::StatusCode;
use http_pipeline::ServerConfig;

mod common;

#[tokio::test]
async fn test_ping_over_tcp() {
    let server = common::start_server(ServerConfig::default()).await;
    let client = common::client();

    let res = client.get(server.url("/ping")).send().await.unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers().contains_key("x-request-id"));
    assert_eq!(res.text().await.unwrap(), "pong");
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let server = common::start_server(ServerConfig::default()).await;
    let client = common::client();

    let res = client
        .get(server.url("/users/7"))
        .header("X-Request-ID", "trace-abc-123")
        .send()
        .await
        .unwrap();

    assert_eq!(res.headers()["x-request-id"], "trace-abc-123");
    assert_eq!(res.text().await.unwrap(), "user 7");
}

#[tokio::test]
async fn test_request_id_generated_per_request() {
    let server = common::start_server(ServerConfig::default()).await;
    let client = common::client();

    let first = client.get(server.url("/ping")).send().await.unwrap();
    let second = client.get(server.url("/ping")).send().await.unwrap();

    let first = first.headers()["x-request-id"].to_str().unwrap().to_string();
    let second = second.headers()["x-request-id"].to_str().unwrap().to_string();
    assert_eq!(first.len(), 36);
    assert_ne!(first, second);
}

#[tokio::test]
async fn test_large_body_echoed_in_full_with_body_logging() {
    let mut config = ServerConfig::default();
    config.observability.log_request_body = true;
    config.observability.log_response_body = true;
    let server = common::start_server(config).await;
    let client = common::client();

    let payload: String = "0123456789abcdef".repeat(8 * 1024);
    assert!(payload.len() > 64 * 1024);

    let res = client
        .post(server.url("/echo"))
        .body(payload.clone())
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), payload);
}

#[tokio::test]
async fn test_metrics_endpoint_reports_routes() {
    let server = common::start_server(ServerConfig::default()).await;
    let client = common::client();

    let res = client.get(server.url("/users/42")).send().await.unwrap();
    assert_eq!(res.text().await.unwrap(), "user 42");

    let body = client
        .get(server.url("/metrics"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert!(body.contains("keeper_http_requests_total"));
    assert!(body.contains(r#"route="/users/{id}""#));
    assert!(body.contains(r#"app="server""#));
    assert!(body.contains("keeper_http_request_duration_seconds_bucket"));
}

#[tokio::test]
async fn test_unmatched_path_is_404() {
    let server = common::start_server(ServerConfig::default()).await;
    let client = common::client();

    let res = client.get(server.url("/nowhere")).send().await.unwrap();

    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert!(res.headers().contains_key("x-request-id"));
}
