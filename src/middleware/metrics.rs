//! Request metrics stage.
//!
//! Reports one request count and one duration sample per request through a
//! [`MetricsProvider`], labelled by method, route template, and status.

use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::Request;
use axum::response::Response;
use futures_util::future::BoxFuture;
use tower::{Layer, Service};

use crate::http::routing::{default_resolver, RouteCell};
use crate::middleware::{observe, RequestStart};
use crate::observability::metrics::{HttpRequestLabels, MetricsProvider};
use crate::observer::{RequestObserver, ResponseObserver, RouteFn};

/// Options for [`MetricsLayer`].
#[derive(Clone, Default)]
pub struct MetricsOptions {
    /// Route resolver; defaults to the axum matched path.
    pub route_fn: Option<RouteFn>,
}

/// Layer recording request metrics.
#[derive(Clone)]
pub struct MetricsLayer {
    provider: Arc<dyn MetricsProvider>,
    route_fn: RouteFn,
}

impl MetricsLayer {
    pub fn new(provider: Arc<dyn MetricsProvider>, options: MetricsOptions) -> Self {
        Self {
            provider,
            route_fn: options.route_fn.unwrap_or_else(default_resolver),
        }
    }
}

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService {
            inner,
            provider: self.provider.clone(),
            route_fn: self.route_fn.clone(),
        }
    }
}

/// Service produced by [`MetricsLayer`].
#[derive(Clone)]
pub struct MetricsService<S> {
    inner: S,
    provider: Arc<dyn MetricsProvider>,
    route_fn: RouteFn,
}

impl<S> Service<Request> for MetricsService<S>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response, Infallible>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let provider = self.provider.clone();
        let route_fn = self.route_fn.clone();

        Box::pin(async move {
            let start = RequestStart::ensure(&mut req);
            RouteCell::ensure(&mut req);
            let request = RequestObserver::new(&mut req, false, Some(route_fn)).await;

            observe(inner, req, ResponseObserver::new(false), move |outcome, response| {
                let labels = HttpRequestLabels {
                    method: request.method().to_string(),
                    route: request.route(),
                    status_code: outcome.status(response),
                };
                provider.inc_requests(&labels);
                provider.observe_duration(&labels, start.elapsed());
            })
            .await
        })
    }
}
