//! Panic recovery stage.
//!
//! # Responsibilities
//! - Contain panics raised by anything it wraps
//! - Log them at ERROR with the panic message, request ID, and call stack
//! - Answer with an empty `500` (or close an upgrade request's connection)
//! - Let the [`AbortHandler`] sentinel through untouched
//!
//! # Design Decisions
//! - Installed outermost so every other stage has already reported
//! - The backtrace is captured at the panic site by a chained panic hook;
//!   unwinding loses the frames by the time the panic is caught
//! - A panic while the body streams ends the body with an error frame since
//!   the status line is already on the wire

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::convert::Infallible;
use std::panic::{catch_unwind, panic_any, resume_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Once;
use std::task::{Context, Poll};

use axum::body::{Body, Bytes};
use axum::extract::Request;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::Response;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use hyper::body::{Body as HttpBody, Frame, SizeHint};
use tower::{Layer, Service};

use crate::http::{RequestId, RequestIdCell, X_REQUEST_ID};

/// Panic payload that aborts the request without recovery.
///
/// The recovery stage re-raises it so the transport drops the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbortHandler;

/// Abort the current request, bypassing recovery.
pub fn abort_handler() -> ! {
    panic_any(AbortHandler)
}

thread_local! {
    static LAST_BACKTRACE: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

static PANIC_HOOK: Once = Once::new();

/// Install the backtrace-capturing panic hook. Idempotent.
pub fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if !info.payload().is::<AbortHandler>() {
                let backtrace = Backtrace::force_capture();
                LAST_BACKTRACE.with(|slot| *slot.borrow_mut() = Some(backtrace));
            }
            previous(info);
        }));
    });
}

fn take_backtrace() -> String {
    LAST_BACKTRACE
        .with(|slot| slot.borrow_mut().take())
        .unwrap_or_else(Backtrace::force_capture)
        .to_string()
}

/// A panic contained by the recovery stage.
#[derive(Debug)]
pub struct RecoveredFailure {
    pub message: String,
    pub callstack: String,
    pub request_id: Option<RequestId>,
    pub upgrade: bool,
}

impl RecoveredFailure {
    fn new(payload: &(dyn Any + Send), request_id: Option<RequestId>, upgrade: bool) -> Self {
        Self {
            message: panic_message(payload),
            callstack: take_backtrace(),
            request_id,
            upgrade,
        }
    }

    fn log(&self) {
        tracing::error!(
            error = %self.message,
            request_id = %self.request_id.as_ref().map(RequestId::as_str).unwrap_or_default(),
            callstack = %self.callstack,
            upgrade = self.upgrade,
            "HTTP Request-Response Recover"
        );
    }

    /// Response sent in place of the one the handler never produced.
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        if self.upgrade {
            response
                .headers_mut()
                .insert(header::CONNECTION, HeaderValue::from_static("close"));
        }
        if let Some(value) = self
            .request_id
            .as_ref()
            .and_then(|id| HeaderValue::from_str(id.as_str()).ok())
        {
            response.headers_mut().insert(X_REQUEST_ID, value);
        }
        response
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

/// True when the `Connection` header asks for a protocol upgrade.
fn is_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
}

/// Layer containing panics of everything it wraps.
#[derive(Debug, Clone, Copy)]
pub struct RecoverLayer;

impl RecoverLayer {
    /// Create the layer and make sure the panic hook is installed.
    pub fn new() -> Self {
        install_panic_hook();
        RecoverLayer
    }
}

impl Default for RecoverLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Layer<S> for RecoverLayer {
    type Service = RecoverService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RecoverService { inner }
    }
}

/// Service produced by [`RecoverLayer`].
#[derive(Debug, Clone)]
pub struct RecoverService<S> {
    inner: S,
}

impl<S> Service<Request> for RecoverService<S>
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
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let request_id = RequestIdCell::default();
        req.extensions_mut().insert(request_id.clone());
        let upgrade = is_upgrade(req.headers());

        Box::pin(async move {
            let call = AssertUnwindSafe(async move { inner.call(req).await });
            match call.catch_unwind().await {
                Ok(Ok(response)) => {
                    let (parts, body) = response.into_parts();
                    let body = RecoveredBody {
                        inner: body,
                        request_id,
                        upgrade,
                        failed: false,
                    };
                    Ok(Response::from_parts(parts, Body::new(body)))
                }
                Ok(Err(never)) => match never {},
                Err(payload) => {
                    if payload.is::<AbortHandler>() {
                        resume_unwind(payload);
                    }
                    let failure =
                        RecoveredFailure::new(payload.as_ref(), request_id.get().cloned(), upgrade);
                    failure.log();
                    Ok(failure.into_response())
                }
            }
        })
    }
}

/// Response body that contains panics raised while it is polled.
struct RecoveredBody {
    inner: Body,
    request_id: RequestIdCell,
    upgrade: bool,
    failed: bool,
}

impl HttpBody for RecoveredBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        if this.failed {
            return Poll::Ready(None);
        }

        let inner = &mut this.inner;
        match catch_unwind(AssertUnwindSafe(|| Pin::new(inner).poll_frame(cx))) {
            Ok(poll) => poll,
            Err(payload) => {
                if payload.is::<AbortHandler>() {
                    resume_unwind(payload);
                }
                this.failed = true;
                let request_id = this.request_id.get().cloned();
                RecoveredFailure::new(payload.as_ref(), request_id, this.upgrade).log();
                Poll::Ready(Some(Err(axum::Error::new(
                    "handler panicked while streaming the response body",
                ))))
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.failed || self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
