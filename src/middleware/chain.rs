//! Middleware composition.
//!
//! A [`Middleware`] turns a handler into a handler. [`compose`] folds an
//! ordered list around a terminal handler so the first entry is outermost:
//! it sees the request first and the response last.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::Request;
use axum::response::Response;
use tower::util::BoxCloneSyncService;
use tower::{Layer, Service};

/// Type-erased handler every stage wraps.
pub type HttpService = BoxCloneSyncService<Request, Response, Infallible>;

/// A handler transformer.
#[derive(Clone)]
pub struct Middleware(Arc<dyn Fn(HttpService) -> HttpService + Send + Sync>);

impl Middleware {
    pub fn new<F>(wrap: F) -> Self
    where
        F: Fn(HttpService) -> HttpService + Send + Sync + 'static,
    {
        Self(Arc::new(wrap))
    }

    /// Adapt a tower [`Layer`] into a middleware.
    pub fn from_layer<L>(layer: L) -> Self
    where
        L: Layer<HttpService> + Send + Sync + 'static,
        L::Service: Service<Request, Response = Response, Error = Infallible>
            + Clone
            + Send
            + Sync
            + 'static,
        <L::Service as Service<Request>>::Future: Send + 'static,
    {
        Self::new(move |inner| HttpService::new(layer.layer(inner)))
    }

    pub fn wrap(&self, inner: HttpService) -> HttpService {
        (self.0)(inner)
    }
}

impl std::fmt::Debug for Middleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Middleware")
    }
}

/// Wrap `handler` with `middlewares`, first entry outermost.
///
/// Nothing is invoked here; the returned service runs the chain per request.
pub fn compose<S>(middlewares: &[Middleware], handler: S) -> HttpService
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
{
    middlewares
        .iter()
        .rev()
        .fold(HttpService::new(handler), |inner, middleware| middleware.wrap(inner))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use std::sync::Mutex;
    use tower::{service_fn, ServiceExt};

    type Trace = Arc<Mutex<Vec<String>>>;

    fn tag(name: &'static str, trace: Trace) -> Middleware {
        Middleware::new(move |inner: HttpService| {
            let trace = trace.clone();
            HttpService::new(service_fn(move |req: Request| {
                let trace = trace.clone();
                let inner = inner.clone();
                async move {
                    trace.lock().unwrap().push(format!("{name}:in"));
                    let response = inner.oneshot(req).await?;
                    trace.lock().unwrap().push(format!("{name}:out"));
                    Ok::<_, Infallible>(response)
                }
            }))
        })
    }

    fn handler(trace: Trace) -> HttpService {
        HttpService::new(service_fn(move |_req: Request| {
            let trace = trace.clone();
            async move {
                trace.lock().unwrap().push("handler".to_string());
                Ok::<_, Infallible>(Response::new(Body::from("done")))
            }
        }))
    }

    #[tokio::test]
    async fn test_first_middleware_is_outermost() {
        let trace: Trace = Arc::default();
        let chain = [tag("a", trace.clone()), tag("b", trace.clone())];

        let service = compose(&chain, handler(trace.clone()));
        assert!(trace.lock().unwrap().is_empty());

        service
            .oneshot(Request::new(Body::empty()))
            .await
            .unwrap();
        assert_eq!(
            *trace.lock().unwrap(),
            vec!["a:in", "b:in", "handler", "b:out", "a:out"]
        );
    }

    #[tokio::test]
    async fn test_empty_chain_is_the_handler() {
        let trace: Trace = Arc::default();
        let service = compose(&[], handler(trace.clone()));

        let response = service.oneshot(Request::new(Body::empty())).await.unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();

        assert_eq!(&body[..], b"done");
        assert_eq!(*trace.lock().unwrap(), vec!["handler"]);
    }

    #[tokio::test]
    async fn test_from_layer_wraps_tower_layers() {
        let chain = [Middleware::from_layer(crate::http::RequestIdLayer)];
        let service = compose(&chain, handler(Arc::default()));

        let response = service.oneshot(Request::new(Body::empty())).await.unwrap();
        assert!(response.headers().contains_key(crate::http::X_REQUEST_ID));
    }
}
