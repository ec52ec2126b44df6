//! Request observation.
//!
//! # Responsibilities
//! - Snapshot request metadata (method, path, query, protocol, headers)
//! - Optionally capture a size-bounded copy of the body
//! - Resolve the route template lazily, after dispatch
//!
//! # Design Decisions
//! - At most `limit + 1` bytes are pulled from the client before the handler
//!   runs; the rest of the stream is chained back untouched, so the handler
//!   always reads the complete original body
//! - Reporting `limit + 1` as the size marks truncation without claiming a
//!   length we never saw
//! - Read errors are not surfaced: whatever was read is replayed and kept

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::Request;
use axum::http::{header, request, HeaderMap, Version};
use futures_util::{stream, StreamExt};
use hyper::body::Body as _;

use crate::observer::{MAX_BUFFERED_BODY, UNKNOWN_ROUTE};

/// Resolves the route template of a request.
///
/// Only meaningful once the router has dispatched the request; returning
/// `None` or an empty string yields [`UNKNOWN_ROUTE`].
pub type RouteFn = Arc<dyn Fn(&request::Parts) -> Option<String> + Send + Sync>;

/// Read-only view of one inbound request.
pub struct RequestObserver {
    parts: request::Parts,
    body: Option<Bytes>,
    body_size: u64,
    route_fn: Option<RouteFn>,
}

impl RequestObserver {
    /// Observe `req`, capturing up to [`MAX_BUFFERED_BODY`] bytes when
    /// `capture_body` is set.
    pub async fn new(req: &mut Request, capture_body: bool, route_fn: Option<RouteFn>) -> Self {
        Self::with_limit(req, capture_body, route_fn, MAX_BUFFERED_BODY).await
    }

    /// Like [`RequestObserver::new`] with a custom capture cap.
    pub async fn with_limit(
        req: &mut Request,
        capture_body: bool,
        route_fn: Option<RouteFn>,
        limit: usize,
    ) -> Self {
        let declared = declared_length(req.headers());
        let parts = snapshot(req);

        if !capture_body {
            let body_size = declared
                .or_else(|| req.body().size_hint().exact())
                .unwrap_or(0);
            return Self { parts, body: None, body_size, route_fn };
        }

        let captured = capture(req, limit).await;
        Self {
            parts,
            body_size: declared.unwrap_or(captured.observed_size),
            body: Some(captured.prefix),
            route_fn,
        }
    }

    pub fn method(&self) -> &str {
        self.parts.method.as_str()
    }

    pub fn path(&self) -> &str {
        self.parts.uri.path()
    }

    /// Raw query string without the leading `?`.
    pub fn query(&self) -> &str {
        self.parts.uri.query().unwrap_or("")
    }

    pub fn protocol(&self) -> &'static str {
        protocol_name(self.parts.version)
    }

    /// Header value by case-insensitive name, empty when absent.
    pub fn header(&self, name: &str) -> &str {
        self.parts
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
    }

    /// Declared content length, or the number of bytes read (capped).
    pub fn body_size(&self) -> u64 {
        self.body_size
    }

    /// Captured body prefix; empty when capture is disabled.
    pub fn body_bytes(&self) -> &[u8] {
        self.body.as_deref().unwrap_or_default()
    }

    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(self.body_bytes()).into_owned()
    }

    /// Request line, e.g. `GET /users/7?full=1 HTTP/1.1`.
    pub fn uri(&self) -> String {
        let target = self
            .parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        format!("{} {} {}", self.method(), target, self.protocol())
    }

    /// Route template, or [`UNKNOWN_ROUTE`] when it cannot be resolved.
    pub fn route(&self) -> String {
        self.route_fn
            .as_ref()
            .and_then(|resolve| resolve(&self.parts))
            .filter(|route| !route.is_empty())
            .unwrap_or_else(|| UNKNOWN_ROUTE.to_string())
    }
}

struct Captured {
    prefix: Bytes,
    observed_size: u64,
}

/// Pulls up to `limit + 1` bytes and puts a replayable body back in `req`.
async fn capture(req: &mut Request, limit: usize) -> Captured {
    let mut data = std::mem::take(req.body_mut()).into_data_stream();
    let mut chunks: Vec<Bytes> = Vec::new();
    let mut read = 0usize;
    let mut finished = false;
    let mut failed = false;

    while read <= limit {
        match data.next().await {
            Some(Ok(chunk)) => {
                read += chunk.len();
                chunks.push(chunk);
            }
            Some(Err(err)) => {
                tracing::debug!(error = %err, bytes_read = read, "Request body read failed");
                failed = true;
                break;
            }
            None => {
                finished = true;
                break;
            }
        }
    }

    let mut prefix = Vec::with_capacity(read.min(limit));
    for chunk in &chunks {
        let room = limit - prefix.len();
        if room == 0 {
            break;
        }
        prefix.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }

    let observed_size = if read <= limit { read as u64 } else { limit as u64 + 1 };
    let prefix = Bytes::from(prefix);

    *req.body_mut() = if finished && read <= limit {
        Body::from(prefix.clone())
    } else {
        let replay = stream::iter(chunks.into_iter().map(Ok::<_, axum::Error>));
        if failed {
            Body::from_stream(replay)
        } else {
            Body::from_stream(replay.chain(data))
        }
    };

    Captured { prefix, observed_size }
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn snapshot(req: &Request) -> request::Parts {
    let mut copy = axum::http::Request::new(());
    *copy.method_mut() = req.method().clone();
    *copy.uri_mut() = req.uri().clone();
    *copy.version_mut() = req.version();
    *copy.headers_mut() = req.headers().clone();
    *copy.extensions_mut() = req.extensions().clone();
    copy.into_parts().0
}

fn protocol_name(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_11 => "HTTP/1.1",
        Version::HTTP_2 => "HTTP/2.0",
        Version::HTTP_3 => "HTTP/3.0",
        _ => "HTTP/1.1",
    }
}
