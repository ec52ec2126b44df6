//! Observability middleware stages and their composition.
//!
//! # Data Flow
//! ```text
//! request
//!     → recover.rs   (contains panics, synthesizes 500)
//!     → request_id   (correlation ID, see http::request)
//!     → logging.rs   (one structured record per request)
//!     → metrics.rs   (request counter and latency histogram)
//!     → router / handler
//! ```
//!
//! # Design Decisions
//! - Logging and metrics report exactly once per request: on body completion,
//!   on panic (status 500, then the panic continues outward), or on
//!   cancellation (status 499)
//! - Both stages share one start instant per request ([`RequestStart`])
//! - The inner stage always reports before the outer one

pub mod chain;
pub mod logging;
pub mod metrics;
pub mod recover;

use std::convert::Infallible;
use std::panic::{resume_unwind, AssertUnwindSafe};
use std::time::Instant;

use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::Response;
use futures_util::FutureExt;
use tower::Service;

use crate::http::RequestIdLayer;
use crate::observer::{observe_response, ResponseObserver};

pub use self::chain::{compose, HttpService, Middleware};
pub use self::logging::{LoggingLayer, LoggingOptions};
pub use self::metrics::{MetricsLayer, MetricsOptions};
pub use self::recover::{abort_handler, AbortHandler, RecoverLayer};

/// Status reported for requests abandoned before completion (client closed request).
pub const STATUS_CLIENT_CLOSED: u16 = 499;

/// How a request ended, as seen by an observing stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The handler returned and its body finished, failed, or was dropped.
    Completed,
    /// The handler panicked, before returning or while its body streamed.
    Panicked,
    /// The request future was dropped before the handler returned.
    Cancelled,
}

impl Outcome {
    /// Lowercase name used in log records.
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Completed => "completed",
            Outcome::Panicked => "panicked",
            Outcome::Cancelled => "cancelled",
        }
    }

    /// Status code to report for this outcome.
    pub fn status(self, response: &ResponseObserver) -> u16 {
        match self {
            Outcome::Completed => response.status().as_u16(),
            Outcome::Panicked => StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            Outcome::Cancelled => STATUS_CLIENT_CLOSED,
        }
    }
}

/// Arrival time of a request, shared by every stage that measures duration.
#[derive(Debug, Clone, Copy)]
pub struct RequestStart(Instant);

impl RequestStart {
    /// The start instant stored on `req`, recording now if none is set yet.
    pub fn ensure(req: &mut Request) -> Instant {
        if let Some(start) = req.extensions().get::<RequestStart>() {
            return start.0;
        }
        let now = Instant::now();
        req.extensions_mut().insert(RequestStart(now));
        now
    }
}

/// The standard pipeline, outermost first: recovery, correlation ID,
/// logging, then metrics when a metrics layer is given.
pub fn observability_stack(
    logging: LoggingOptions,
    metrics: Option<MetricsLayer>,
) -> Vec<Middleware> {
    let mut stack = vec![
        Middleware::from_layer(RecoverLayer::new()),
        Middleware::from_layer(RequestIdLayer),
        Middleware::from_layer(LoggingLayer::new(logging)),
    ];
    if let Some(metrics) = metrics {
        stack.push(Middleware::from_layer(metrics));
    }
    stack
}

/// Runs `inner` and calls `report` exactly once with the request's outcome.
///
/// A panic, in the handler or in its response body, is reported and then
/// resumed; a dropped future reports [`Outcome::Cancelled`].
pub(crate) async fn observe<S, F>(
    mut inner: S,
    req: Request,
    observer: ResponseObserver,
    report: F,
) -> Result<Response, Infallible>
where
    S: Service<Request, Response = Response, Error = Infallible>,
    F: FnOnce(Outcome, &ResponseObserver) + Send + 'static,
{
    let mut pending = Pending(Some((report, observer)));
    let call = AssertUnwindSafe(async move { inner.call(req).await });

    match call.catch_unwind().await {
        Ok(Ok(response)) => match pending.0.take() {
            Some((report, observer)) => Ok(observe_response(response, observer, move |observer| {
                let outcome = if observer.panicked() {
                    Outcome::Panicked
                } else {
                    Outcome::Completed
                };
                report(outcome, observer)
            })),
            None => Ok(response),
        },
        Ok(Err(never)) => match never {},
        Err(payload) => {
            if let Some((report, observer)) = pending.0.take() {
                report(Outcome::Panicked, &observer);
            }
            resume_unwind(payload)
        }
    }
}

/// Reports [`Outcome::Cancelled`] if dropped while still armed.
struct Pending<F: FnOnce(Outcome, &ResponseObserver)>(Option<(F, ResponseObserver)>);

impl<F: FnOnce(Outcome, &ResponseObserver)> Drop for Pending<F> {
    fn drop(&mut self) {
        if let Some((report, observer)) = self.0.take() {
            report(Outcome::Cancelled, &observer);
        }
    }
}
