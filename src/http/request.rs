//! Correlation ID assignment and propagation.
//!
//! # Responsibilities
//! - Reuse the inbound `X-Request-Id` verbatim when the caller supplies one
//! - Mint a UUID v4 when the header is absent or empty
//! - Normalize the inbound header so nested stages see one canonical value
//! - Expose the ID through request extensions ([`RequestIdExt`])
//! - Echo the ID on the response before any body bytes are sent
//!
//! # Design Decisions
//! - Trust-the-edge: supplied IDs are not validated or rewritten
//! - The header name is fixed for interop and not configurable

use std::convert::Infallible;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use axum::extract::Request;
use axum::http::{request, HeaderMap, HeaderName, HeaderValue};
use axum::response::Response;
use futures_util::future::BoxFuture;
use tower::{Layer, Service};
use tracing::Instrument;
use uuid::Uuid;

/// Correlation header, matched case-insensitively.
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Opaque per-request correlation identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(String);

impl RequestId {
    /// Mint a fresh random (UUID v4) identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The ID carried by `headers`, if present and non-empty.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        headers
            .get(&X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(|v| Self(v.to_owned()))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Access to the correlation ID stored in request extensions.
pub trait RequestIdExt {
    fn request_id(&self) -> Option<&RequestId>;
}

impl<B> RequestIdExt for axum::http::Request<B> {
    fn request_id(&self) -> Option<&RequestId> {
        self.extensions().get()
    }
}

impl RequestIdExt for request::Parts {
    fn request_id(&self) -> Option<&RequestId> {
        self.extensions.get()
    }
}

/// Write-once slot an outer stage can place in extensions to learn the ID
/// assigned further in.
#[derive(Debug, Clone, Default)]
pub struct RequestIdCell(Arc<OnceLock<RequestId>>);

impl RequestIdCell {
    pub fn get(&self) -> Option<&RequestId> {
        self.0.get()
    }

    fn set(&self, id: RequestId) {
        let _ = self.0.set(id);
    }
}

/// Layer assigning a [`RequestId`] to every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestIdLayer;

impl<S> Layer<S> for RequestIdLayer {
    type Service = RequestIdService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestIdService { inner }
    }
}

/// Service produced by [`RequestIdLayer`].
#[derive(Debug, Clone)]
pub struct RequestIdService<S> {
    inner: S,
}

impl<S> Service<Request> for RequestIdService<S>
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
        let id = RequestId::from_headers(req.headers()).unwrap_or_else(RequestId::generate);
        let header = HeaderValue::from_str(id.as_str()).ok();

        if let Some(value) = header.clone() {
            req.headers_mut().insert(X_REQUEST_ID, value);
        }
        if let Some(cell) = req.extensions().get::<RequestIdCell>() {
            cell.set(id.clone());
        }
        req.extensions_mut().insert(id.clone());

        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let span = tracing::info_span!("request", request_id = %id);

        Box::pin(
            async move {
                let mut response = inner.call(req).await?;
                if let Some(value) = header {
                    response.headers_mut().insert(X_REQUEST_ID, value);
                }
                Ok(response)
            }
            .instrument(span),
        )
    }
}
