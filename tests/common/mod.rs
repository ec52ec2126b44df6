//! Shared helpers for the integration tests: a real server on an ephemeral
//! port with a handful of application routes.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::OnceLock;

use axum::body::Bytes;
use axum::extract::Path;
use axum::routing::{get, post};
use axum::Router;
use http_pipeline::observability::metrics::install_recorder;
use http_pipeline::{HttpServer, ServerConfig, Shutdown};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;

/// The process-wide Prometheus recorder, installed on first use.
pub fn metrics_handle() -> PrometheusHandle {
    static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
    HANDLE
        .get_or_init(|| install_recorder().expect("install prometheus recorder"))
        .clone()
}

async fn boom() -> &'static str {
    panic!("handler exploded")
}

async fn user(Path(id): Path<String>) -> String {
    format!("user {id}")
}

/// Application routes mounted on every test server.
pub fn routes() -> Router {
    Router::new()
        .route("/echo", post(|body: Bytes| async move { body }))
        .route("/boom", get(boom))
        .route("/users/{id}", get(user))
}

/// Running server under test. Dropping it shuts the server down.
pub struct TestServer {
    pub addr: SocketAddr,
    shutdown: Shutdown,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn stop(&self) {
        self.shutdown.trigger();
    }
}

/// Start a server with `config` on 127.0.0.1 and an ephemeral port.
pub async fn start_server(mut config: ServerConfig) -> TestServer {
    config.listener.bind_address = "127.0.0.1:0".to_string();
    let listener = TcpListener::bind(&config.listener.bind_address)
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");

    let shutdown = Shutdown::new();
    let server = HttpServer::new(config)
        .with_routes(routes())
        .with_metrics_handle(metrics_handle());
    let signalled = shutdown.signalled();
    tokio::spawn(async move {
        let _ = server.run(listener, signalled).await;
    });

    TestServer { addr, shutdown }
}

/// Client without connection pooling or proxies.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .expect("build client")
}
