//! Request/response logging stage.
//!
//! # Responsibilities
//! - Emit one `"HTTP Request-Response"` record per request at INFO
//! - Optionally include capped copies of the request and response bodies
//! - Report panics with status 500 and cancellations at WARN with status 499
//! - Tag every record with its `outcome` (`completed`, `panicked`, `cancelled`)
//!
//! # Design Decisions
//! - The record is written when the response body finishes so
//!   `response_size` is final
//! - Body capture is off by default; bodies may carry sensitive data

use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::extract::Request;
use axum::response::Response;
use futures_util::future::BoxFuture;
use tower::{Layer, Service};

use crate::config::ObservabilityConfig;
use crate::http::routing::{default_resolver, RouteCell};
use crate::middleware::{observe, Outcome, RequestStart};
use crate::observer::{RequestObserver, ResponseObserver, RouteFn, MAX_BUFFERED_BODY};

/// Inbound header carrying the caller's span ID.
pub const SPAN_ID_HEADER: &str = "Span-ID";
/// Inbound header carrying the caller's trace ID.
pub const TRACE_ID_HEADER: &str = "Trace-ID";

/// Emit a [`RequestRecord`] at the given level.
macro_rules! emit_record {
    ($level:ident, $message:literal, $record:expr) => {{
        let record = $record;
        tracing::$level!(
            outcome = record.outcome.as_str(),
            duration_ms = record.duration_ms,
            request_uri = %record.request_uri,
            request_method = %record.request_method,
            request_path = %record.request_path,
            request_query = %record.request_query,
            request_protocol = record.request_protocol,
            request_route = %record.request_route,
            request_size = record.request_size,
            response_status = record.response_status,
            response_size = record.response_size,
            request_id = %record.request_id,
            span_id = %record.span_id,
            trace_id = %record.trace_id,
            request_body = record.request_body.as_deref(),
            response_body = record.response_body.as_deref(),
            $message
        )
    }};
}

/// Options for [`LoggingLayer`].
#[derive(Clone)]
pub struct LoggingOptions {
    pub log_request_body: bool,
    pub log_response_body: bool,
    /// Cap for captured body bytes.
    pub body_limit: usize,
    /// Route resolver; defaults to the axum matched path.
    pub route_fn: Option<RouteFn>,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            log_request_body: false,
            log_response_body: false,
            body_limit: MAX_BUFFERED_BODY,
            route_fn: None,
        }
    }
}

impl From<&ObservabilityConfig> for LoggingOptions {
    fn from(config: &ObservabilityConfig) -> Self {
        Self {
            log_request_body: config.log_request_body,
            log_response_body: config.log_response_body,
            body_limit: config.body_capture_limit,
            route_fn: None,
        }
    }
}

/// Layer logging every request it wraps.
#[derive(Clone)]
pub struct LoggingLayer {
    options: Arc<LoggingOptions>,
}

impl LoggingLayer {
    pub fn new(mut options: LoggingOptions) -> Self {
        if options.route_fn.is_none() {
            options.route_fn = Some(default_resolver());
        }
        Self {
            options: Arc::new(options),
        }
    }
}

impl<S> Layer<S> for LoggingLayer {
    type Service = LoggingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoggingService {
            inner,
            options: self.options.clone(),
        }
    }
}

/// Service produced by [`LoggingLayer`].
#[derive(Clone)]
pub struct LoggingService<S> {
    inner: S,
    options: Arc<LoggingOptions>,
}

impl<S> Service<Request> for LoggingService<S>
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
        let options = self.options.clone();

        Box::pin(async move {
            let start = RequestStart::ensure(&mut req);
            RouteCell::ensure(&mut req);

            let mut guard = None;
            if options.log_request_body {
                let route_fn = options.route_fn.clone();
                let headline = RequestObserver::new(&mut req, false, route_fn).await;
                guard = Some(CaptureGuard::new(headline, start, options.clone()));
            }
            let request = RequestObserver::with_limit(
                &mut req,
                options.log_request_body,
                options.route_fn.clone(),
                options.body_limit,
            )
            .await;
            if let Some(guard) = guard {
                guard.disarm();
            }

            let response =
                ResponseObserver::with_limit(options.log_response_body, options.body_limit);

            observe(inner, req, response, move |outcome, response| {
                emit(RequestRecord::new(outcome, start, &request, response, &options));
            })
            .await
        })
    }
}

/// Emits a cancelled record if dropped while the request body is being read.
struct CaptureGuard {
    armed: Option<(RequestObserver, Instant, Arc<LoggingOptions>)>,
}

impl CaptureGuard {
    fn new(request: RequestObserver, start: Instant, options: Arc<LoggingOptions>) -> Self {
        Self {
            armed: Some((request, start, options)),
        }
    }

    fn disarm(mut self) {
        self.armed = None;
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        if let Some((request, start, options)) = self.armed.take() {
            let response = ResponseObserver::new(false);
            emit(RequestRecord::new(
                Outcome::Cancelled,
                start,
                &request,
                &response,
                &options,
            ));
        }
    }
}

fn emit(record: RequestRecord) {
    let outcome = record.outcome;
    match outcome {
        Outcome::Cancelled => emit_record!(warn, "HTTP Request-Response cancelled", record),
        Outcome::Completed | Outcome::Panicked => {
            emit_record!(info, "HTTP Request-Response", record)
        }
    }
}

/// Field values of one request record.
struct RequestRecord {
    outcome: Outcome,
    duration_ms: u64,
    request_uri: String,
    request_method: String,
    request_path: String,
    request_query: String,
    request_protocol: &'static str,
    request_route: String,
    request_size: u64,
    response_status: u16,
    response_size: u64,
    request_id: String,
    span_id: String,
    trace_id: String,
    request_body: Option<String>,
    response_body: Option<String>,
}

impl RequestRecord {
    fn new(
        outcome: Outcome,
        start: Instant,
        request: &RequestObserver,
        response: &ResponseObserver,
        options: &LoggingOptions,
    ) -> Self {
        Self {
            outcome,
            duration_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            request_uri: request.uri(),
            request_method: request.method().to_string(),
            request_path: request.path().to_string(),
            request_query: request.query().to_string(),
            request_protocol: request.protocol(),
            request_route: request.route(),
            request_size: request.body_size(),
            response_status: outcome.status(response),
            response_size: response.body_size(),
            request_id: request.header(crate::http::X_REQUEST_ID.as_str()).to_string(),
            span_id: request.header(SPAN_ID_HEADER).to_string(),
            trace_id: request.header(TRACE_ID_HEADER).to_string(),
            request_body: options.log_request_body.then(|| request.body_string()),
            response_body: options.log_response_body.then(|| response.body_string()),
        }
    }
}
