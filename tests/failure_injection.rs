//! Failure injection: panicking handlers, oversized bodies, shutdown.

use std::time::Duration;

use axum::http::StatusCode;
use http_pipeline::ServerConfig;

mod common;

#[tokio::test]
async fn test_panic_becomes_500_and_server_keeps_serving() {
    let server = common::start_server(ServerConfig::default()).await;
    let client = common::client();

    let res = client
        .get(server.url("/boom"))
        .header("X-Request-ID", "panic-req-1")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(res.headers()["x-request-id"], "panic-req-1");
    assert!(res.text().await.unwrap().is_empty());

    let res = client.get(server.url("/ping")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_panic_is_counted_as_500() {
    let server = common::start_server(ServerConfig::default()).await;
    let client = common::client();

    let res = client.get(server.url("/boom")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body = client
        .get(server.url("/metrics"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    let line = body
        .lines()
        .find(|line| {
            line.starts_with("keeper_http_requests_total")
                && line.contains(r#"route="/boom""#)
                && line.contains(r#"status_code="500""#)
        })
        .expect("panic series present");
    assert!(line.contains(r#"method="GET""#));
}

#[tokio::test]
async fn test_oversized_body_rejected() {
    let mut config = ServerConfig::default();
    config.limits.max_body_size = 1024;
    let server = common::start_server(config).await;
    let client = common::client();

    let res = client
        .post(server.url("/echo"))
        .body(vec![b'x'; 4096])
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_shutdown_stops_accepting() {
    let server = common::start_server(ServerConfig::default()).await;
    let client = common::client();

    let res = client.get(server.url("/ping")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    server.stop();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let result = client
        .get(server.url("/ping"))
        .timeout(Duration::from_secs(2))
        .send()
        .await;
    assert!(result.is_err());
}
