//! Write-through response body.
//!
//! Every data frame the server pulls from the handler's body is forwarded
//! unchanged and then reported to a [`ResponseObserver`]. When the body ends,
//! fails, panics, or is dropped, a completion callback runs exactly once. A
//! panic is marked on the observer before the callback runs and then resumed.

use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::{Body, Bytes};
use axum::response::Response;
use hyper::body::{Body as HttpBody, Frame, SizeHint};

use crate::observer::ResponseObserver;

type OnComplete = Box<dyn FnOnce(&ResponseObserver) + Send>;

/// Wraps the body of `response` so `observer` sees the status and every
/// byte written; `on_complete` fires once the body is finished.
pub fn observe_response<F>(
    response: Response,
    mut observer: ResponseObserver,
    on_complete: F,
) -> Response
where
    F: FnOnce(&ResponseObserver) + Send + 'static,
{
    observer.write_header(response.status());

    let (parts, body) = response.into_parts();
    let body = ObservedBody {
        inner: Some(body),
        observer,
        on_complete: Some(Box::new(on_complete)),
    };
    Response::from_parts(parts, Body::new(body))
}

/// Body decorator feeding a [`ResponseObserver`].
pub struct ObservedBody {
    inner: Option<Body>,
    observer: ResponseObserver,
    on_complete: Option<OnComplete>,
}

impl ObservedBody {
    fn finish(&mut self) {
        // Drop the wrapped body first so nested observers complete before this one.
        drop(self.inner.take());
        if let Some(on_complete) = self.on_complete.take() {
            on_complete(&self.observer);
        }
    }
}

impl HttpBody for ObservedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(None);
        };

        let polled = catch_unwind(AssertUnwindSafe(|| Pin::new(inner).poll_frame(cx)));
        let poll = match polled {
            Ok(poll) => poll,
            Err(payload) => {
                this.observer.mark_panicked();
                this.finish();
                resume_unwind(payload)
            }
        };

        match poll {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.observer.write(data);
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(err))) => {
                this.finish();
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.finish();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.as_ref().map_or(true, |body| body.is_end_stream())
    }

    fn size_hint(&self) -> SizeHint {
        self.inner
            .as_ref()
            .map_or_else(|| SizeHint::with_exact(0), |body| body.size_hint())
    }
}

impl Drop for ObservedBody {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::http::StatusCode;
    use futures_util::{stream, FutureExt, StreamExt};
    use std::sync::{Arc, Mutex};

    type Seen = Arc<Mutex<Vec<(StatusCode, u64, String)>>>;

    fn recorder() -> (Seen, impl FnOnce(&ResponseObserver) + Send + 'static) {
        let seen: Seen = Arc::default();
        let sink = seen.clone();
        let on_complete = move |obs: &ResponseObserver| {
            sink.lock()
                .unwrap()
                .push((obs.status(), obs.body_size(), obs.body_string()));
        };
        (seen, on_complete)
    }

    #[tokio::test]
    async fn test_body_is_forwarded_and_recorded_once() {
        let (seen, on_complete) = recorder();
        let response = Response::builder()
            .status(StatusCode::CREATED)
            .body(Body::from("created!"))
            .unwrap();

        let response = observe_response(response, ResponseObserver::new(true), on_complete);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();

        assert_eq!(&bytes[..], b"created!");
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], (StatusCode::CREATED, 8, "created!".to_string()));
    }

    #[tokio::test]
    async fn test_dropped_body_still_completes() {
        let (seen, on_complete) = recorder();
        let response = Response::new(Body::from("never read"));

        drop(observe_response(response, ResponseObserver::new(false), on_complete));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1, 0);
    }

    #[tokio::test]
    async fn test_write_error_counts_accepted_bytes() {
        let (seen, on_complete) = recorder();
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"abcd")),
            Err(std::io::Error::other("broken pipe")),
        ];
        let response = Response::new(Body::from_stream(stream::iter(chunks)));

        let response = observe_response(response, ResponseObserver::new(false), on_complete);
        assert!(to_bytes(response.into_body(), usize::MAX).await.is_err());

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1, 4);
    }

    #[tokio::test]
    async fn test_panicking_body_is_marked_then_resumed() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let chunks = stream::iter(0..2).map(|i| {
            if i == 1 {
                panic!("body exploded");
            }
            Ok::<_, std::io::Error>(Bytes::from_static(b"ok"))
        });
        let response = Response::new(Body::from_stream(chunks));
        let response = observe_response(response, ResponseObserver::new(false), move |obs| {
            sink.lock().unwrap().push((obs.panicked(), obs.body_size()));
        });

        let outcome = AssertUnwindSafe(to_bytes(response.into_body(), usize::MAX))
            .catch_unwind()
            .await;

        assert!(outcome.is_err(), "panic must continue outward");
        assert_eq!(*seen.lock().unwrap(), vec![(true, 2)]);
    }

    #[tokio::test]
    async fn test_nested_observers_complete_inner_first() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let (inner_order, outer_order) = (order.clone(), order.clone());

        let response = Response::new(Body::from("x"));
        let response = observe_response(response, ResponseObserver::new(false), move |_| {
            inner_order.lock().unwrap().push("inner");
        });
        let response = observe_response(response, ResponseObserver::new(false), move |_| {
            outer_order.lock().unwrap().push("outer");
        });

        drop(response);
        assert_eq!(*order.lock().unwrap(), vec!["inner", "outer"]);
    }
}
