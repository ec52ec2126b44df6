//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the axum Router with the built-in and application handlers
//! - Wire up limits, timeouts, and route recording on the router
//! - Wrap the router in the observability pipeline
//! - Bind and serve until shutdown, draining in-flight requests

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Request;
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use crate::config::ServerConfig;
use crate::http::routing::record_matched_route;
use crate::middleware::{
    compose, observability_stack, HttpService, LoggingOptions, MetricsLayer, MetricsOptions,
};
use crate::observability::{MetricsProvider, PrometheusMetrics};

/// Errors raised while binding or serving.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[from] io::Error),
}

/// Bind a TCP listener on `address`.
pub async fn bind(address: &str) -> Result<TcpListener, ServerError> {
    TcpListener::bind(address)
        .await
        .map_err(|source| ServerError::Bind {
            address: address.to_string(),
            source,
        })
}

/// HTTP server running application routes behind the observability pipeline.
pub struct HttpServer {
    config: ServerConfig,
    routes: Router,
    metrics_handle: Option<PrometheusHandle>,
    metrics_provider: Option<Arc<dyn MetricsProvider>>,
}

impl HttpServer {
    /// Create a server serving only the built-in endpoints.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            routes: Router::new(),
            metrics_handle: None,
            metrics_provider: None,
        }
    }

    /// Add application routes. They must not overlap `/ping` or `/metrics`.
    pub fn with_routes(mut self, routes: Router) -> Self {
        self.routes = self.routes.merge(routes);
        self
    }

    /// Expose `handle` on `GET /metrics`.
    pub fn with_metrics_handle(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }

    /// Report request metrics to `provider` instead of Prometheus.
    pub fn with_metrics_provider(mut self, provider: Arc<dyn MetricsProvider>) -> Self {
        self.metrics_provider = Some(provider);
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Build the router with all handler-level layers.
    #[allow(deprecated)]
    fn build_router(
        config: &ServerConfig,
        routes: Router,
        metrics_handle: Option<PrometheusHandle>,
    ) -> Router {
        let mut router = Router::new().route("/ping", get(ping)).merge(routes);
        if let Some(handle) = metrics_handle {
            router = router.route(
                "/metrics",
                get(move || {
                    let handle = handle.clone();
                    async move { handle.render() }
                }),
            );
        }

        router
            .route_layer(axum::middleware::from_fn(record_matched_route))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(RequestBodyLimitLayer::new(config.limits.max_body_size))
    }

    fn metrics_layer(&self) -> Option<MetricsLayer> {
        if !self.config.observability.metrics_enabled {
            return None;
        }
        let provider = self.metrics_provider.clone().unwrap_or_else(|| {
            let prometheus = PrometheusMetrics::new(
                &self.config.observability.metrics_namespace,
                &self.config.observability.app_name,
            );
            prometheus.describe();
            Arc::new(prometheus)
        });
        Some(MetricsLayer::new(provider, MetricsOptions::default()))
    }

    /// The composed pipeline: recovery, correlation ID, logging, metrics, router.
    pub fn into_service(self) -> HttpService {
        let stack = observability_stack(
            LoggingOptions::from(&self.config.observability),
            self.metrics_layer(),
        );
        let router = Self::build_router(&self.config, self.routes, self.metrics_handle);
        compose(&stack, router)
    }

    /// Serve connections from `listener` until `shutdown` resolves.
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let service = self.into_service();
        axum::serve(
            listener,
            axum::ServiceExt::<Request>::into_make_service(service),
        )
        .with_graceful_shutdown(shutdown)
        .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn ping() -> &'static str {
    "pong"
}
