//! Route template resolution for observing stages.
//!
//! Observing stages run outside the router, so the matched template is not
//! known when they snapshot the request. An empty [`RouteCell`] travels in the
//! request extensions; [`record_matched_route`], installed with
//! `Router::route_layer`, fills it once axum has matched a route.

use std::sync::{Arc, OnceLock};

use axum::extract::{MatchedPath, Request};
use axum::http::request;
use axum::middleware::Next;
use axum::response::Response;

use crate::observer::RouteFn;

/// Write-once slot for the matched route template.
#[derive(Debug, Clone, Default)]
pub struct RouteCell(Arc<OnceLock<String>>);

impl RouteCell {
    /// Make sure `req` carries a cell, inserting an empty one if needed.
    pub fn ensure(req: &mut Request) -> RouteCell {
        if let Some(cell) = req.extensions().get::<RouteCell>() {
            return cell.clone();
        }
        let cell = RouteCell::default();
        req.extensions_mut().insert(cell.clone());
        cell
    }

    pub fn get(&self) -> Option<&str> {
        self.0.get().map(String::as_str)
    }

    pub fn set(&self, route: impl Into<String>) {
        let _ = self.0.set(route.into());
    }
}

/// Route layer copying axum's [`MatchedPath`] into the request's [`RouteCell`].
pub async fn record_matched_route(req: Request, next: Next) -> Response {
    if let (Some(cell), Some(path)) = (
        req.extensions().get::<RouteCell>(),
        req.extensions().get::<MatchedPath>(),
    ) {
        cell.set(path.as_str());
    }
    next.run(req).await
}

/// Default resolver: the matched path if already known, else the cell's value.
pub fn matched_route(parts: &request::Parts) -> Option<String> {
    parts
        .extensions
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_owned())
        .or_else(|| {
            parts
                .extensions
                .get::<RouteCell>()
                .and_then(RouteCell::get)
                .map(str::to_owned)
        })
}

/// [`matched_route`] as a [`RouteFn`].
pub fn default_resolver() -> RouteFn {
    Arc::new(matched_route)
}
